//! S3 transport implementation
//!
//! Wraps aws-sdk-s3 and implements the `MultipartTransport` trait from
//! mpx-core. Each client owns its SDK handle and credentials; nothing is
//! cached process-wide.

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_types::byte_stream::ByteStream as SdkByteStream;
use bytes::Bytes;
use jiff::Timestamp;
use mpx_core::{
    Alias, ByteStream, CompletedPart, Error, MultipartTransport, ObjectMeta, ObjectMetadata,
    Result,
};

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    alias: String,
}

impl S3Client {
    /// Create a new S3 client from an alias configuration
    pub async fn new(alias: Alias) -> Result<Self> {
        let credentials = aws_credential_types::Credentials::new(
            alias.access_key.clone(),
            alias.secret_key.clone(),
            None, // session token
            None, // expiry
            "mpx-static-credentials",
        );

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(alias.region.clone()))
            .endpoint_url(&alias.endpoint)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(alias.path_style())
            .build();

        tracing::debug!(alias = %alias.name, endpoint = %alias.endpoint, "Created S3 client");
        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            alias: alias.name,
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    /// Name of the alias this client was built from
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Format AWS SDK error into a detailed error message
    fn format_sdk_error<E: std::fmt::Display>(error: &SdkError<E, HttpResponse>) -> String {
        match error {
            SdkError::ServiceError(service_err) => format!("Service error: {}", service_err.err()),
            SdkError::ConstructionFailure(err) => {
                format!("Request construction failed: {:?}", err)
            }
            SdkError::TimeoutError(_) => "Request timeout".to_string(),
            SdkError::DispatchFailure(err) => format!("Network dispatch error: {:?}", err),
            SdkError::ResponseError(err) => format!("Response error: {:?}", err),
            _ => error.to_string(),
        }
    }
}

/// Classify an SDK failure by HTTP status and provider error code
fn map_sdk_error<E>(operation: &str, error: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let message = format!("{operation}: {}", S3Client::format_sdk_error(&error));
    match &error {
        SdkError::ServiceError(service_err) => {
            let raw = service_err.raw();
            let code = service_err.err().code().map(str::to_string).or_else(|| {
                raw.headers()
                    .get("x-amz-error-code")
                    .map(str::to_string)
            });
            Error::from_status(Some(raw.status().as_u16()), code, message)
        }
        SdkError::ResponseError(err) => {
            Error::from_status(Some(err.raw().status().as_u16()), None, message)
        }
        SdkError::ConstructionFailure(_) => Error::Validation(message),
        // Timeouts and dispatch failures never got a response
        _ => Error::from_status(None, None, message),
    }
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn range_header(start: u64, end: u64) -> String {
    format!("bytes={start}-{end}")
}

fn part_number(n: u32) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::Validation(format!("part number {n} out of range")))
}

/// Adapt the SDK body into the engine's chunk stream
fn body_stream(body: SdkByteStream) -> ByteStream {
    Box::pin(futures::stream::unfold(Some(body), |state| async move {
        let mut body = state?;
        match body.try_next().await {
            Ok(Some(chunk)) => Some((Ok(chunk), Some(body))),
            Ok(None) => None,
            Err(e) => Some((Err(Error::server(format!("reading response body: {e}"))), None)),
        }
    }))
}

#[async_trait]
impl MultipartTransport for S3Client {
    async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String> {
        let user_metadata =
            (!metadata.user_metadata.is_empty()).then(|| metadata.user_metadata.clone());
        let response = self
            .inner
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(metadata.content_type.clone())
            .set_metadata(user_metadata)
            .send()
            .await
            .map_err(|e| map_sdk_error("create_multipart_upload", e))?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::server("create_multipart_upload returned no upload id"))
    }

    async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        let length = data.len() as i64;
        let response = self
            .inner
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(session_id)
            .part_number(self::part_number(part_number)?)
            .content_length(length)
            .body(SdkByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error("upload_part", e))?;

        response.e_tag().map(trim_etag).ok_or_else(|| {
            Error::Integrity(format!("upload_part returned no ETag for part {part_number}"))
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let completed = parts
            .iter()
            .map(|p| {
                Ok(S3CompletedPart::builder()
                    .part_number(part_number(p.part_number)?)
                    .e_tag(&p.etag)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .inner
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(session_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error("complete_multipart_upload", e))?;

        Ok(response.e_tag().map(trim_etag).unwrap_or_default())
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, session_id: &str) -> Result<()> {
        let result = self
            .inner
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(session_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match map_sdk_error("abort_multipart_upload", e) {
                // Already gone
                Error::Client {
                    status: Some(404), ..
                } => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn get_range<'a>(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&'a str>,
        start: u64,
        end: u64,
    ) -> Result<ByteStream> {
        let response = self
            .inner
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .range(range_header(start, end))
            .send()
            .await
            .map_err(|e| map_sdk_error("get_object", e))?;

        Ok(body_stream(response.body))
    }

    async fn head_object<'a>(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&'a str>,
    ) -> Result<ObjectMeta> {
        let response = self
            .inner
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
            .map_err(|e| map_sdk_error("head_object", e))?;

        let size = response.content_length().unwrap_or(0);
        let size = u64::try_from(size)
            .map_err(|_| Error::server(format!("head_object returned a negative size ({size})")))?;

        Ok(ObjectMeta {
            size,
            etag: response.e_tag().map(trim_etag),
            last_modified: response
                .last_modified()
                .and_then(|modified| Timestamp::from_second(modified.secs()).ok()),
            content_type: response.content_type().map(str::to_string),
        })
    }
}
