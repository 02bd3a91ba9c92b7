//! Transport capability consumed by the transfer engine
//!
//! This trait is the only thing the engine knows about the remote side.
//! It is implemented by SDK adapters (see the `mpx-s3` crate) and by
//! in-memory fakes in tests.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Body of a ranged GET, delivered in chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Metadata attached to an object when its multipart session is opened
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user_metadata: HashMap<String, String>,
}

/// Remote object attributes returned by [`MultipartTransport::head_object`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// A finished part handed to [`MultipartTransport::complete_multipart_upload`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Provider-agnostic multipart transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MultipartTransport: Send + Sync {
    /// Open a multipart session and return its id
    async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String>;

    /// Upload one part and return its ETag
    async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String>;

    /// Assemble the uploaded parts into the final object and return its ETag
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String>;

    /// Discard a multipart session and every part uploaded to it
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, session_id: &str)
    -> Result<()>;

    /// Fetch the inclusive byte range `[start, end]`
    async fn get_range<'a>(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&'a str>,
        start: u64,
        end: u64,
    ) -> Result<ByteStream>;

    /// Look up size, ETag and modification time of an object
    async fn head_object<'a>(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&'a str>,
    ) -> Result<ObjectMeta>;
}
