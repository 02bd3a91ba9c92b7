//! In-memory transport for integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};

use mpx_core::{
    ByteStream, CompletedPart, Error, MultipartTransport, ObjectMeta, ObjectMetadata, Result,
};

struct Session {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

/// Object store kept in memory, with latency and failure injection
#[derive(Default)]
pub struct MemoryTransport {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    sessions: Mutex<HashMap<String, Session>>,
    next_session: AtomicUsize,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    put_calls: Mutex<Vec<u32>>,
    range_calls: Mutex<Vec<u64>>,
    aborted: Mutex<Vec<String>>,
    put_failures: Mutex<HashMap<u32, Error>>,
    range_failures: Mutex<HashMap<u64, Error>>,
    short_ranges: Mutex<HashSet<u64>>,
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn insert_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Fail the next upload of `part_number` with `error`
    pub fn fail_put_once(&self, part_number: u32, error: Error) {
        self.put_failures.lock().unwrap().insert(part_number, error);
    }

    /// Fail the next ranged GET starting at `offset` with `error`
    pub fn fail_range_once(&self, offset: u64, error: Error) {
        self.range_failures.lock().unwrap().insert(offset, error);
    }

    /// Return one byte less than asked for ranges starting at `offset`
    pub fn truncate_range(&self, offset: u64) {
        self.short_ranges.lock().unwrap().insert(offset);
    }

    pub fn put_calls(&self) -> Vec<u32> {
        let mut calls = self.put_calls.lock().unwrap().clone();
        calls.sort_unstable();
        calls
    }

    pub fn range_calls(&self) -> Vec<u64> {
        let mut calls = self.range_calls.lock().unwrap().clone();
        calls.sort_unstable();
        calls
    }

    pub fn reset_calls(&self) {
        self.put_calls.lock().unwrap().clear();
        self.range_calls.lock().unwrap().clear();
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MultipartTransport for MemoryTransport {
    async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        _metadata: &ObjectMetadata,
    ) -> Result<String> {
        let id = format!("session-{}", self.next_session.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().unwrap().insert(
            id.clone(),
            Session {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn put_part(
        &self,
        _bucket: &str,
        _key: &str,
        session_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        self.enter().await;
        self.put_calls.lock().unwrap().push(part_number);
        let result = match self.put_failures.lock().unwrap().remove(&part_number) {
            Some(error) => Err(error),
            None => {
                let etag = sha256_hex(&data);
                match self.sessions.lock().unwrap().get_mut(session_id) {
                    Some(session) => {
                        session.parts.insert(part_number, data);
                        Ok(etag)
                    }
                    None => Err(Error::from_status(
                        Some(404),
                        Some("NoSuchUpload".into()),
                        "unknown session",
                    )),
                }
            }
        };
        self.leave();
        result
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let session = self.sessions.lock().unwrap().remove(session_id).ok_or_else(|| {
            Error::from_status(Some(404), Some("NoSuchUpload".into()), "unknown session")
        })?;

        let mut body = Vec::new();
        let mut digests = String::new();
        for part in parts {
            let data = session.parts.get(&part.part_number).ok_or_else(|| {
                Error::from_status(Some(400), Some("InvalidPart".into()), "missing part")
            })?;
            if sha256_hex(data) != part.etag {
                return Err(Error::from_status(
                    Some(400),
                    Some("InvalidPart".into()),
                    "etag mismatch",
                ));
            }
            body.extend_from_slice(data);
            digests.push_str(&part.etag);
        }

        let etag = format!("{}-{}", sha256_hex(digests.as_bytes()), parts.len());
        self.objects
            .lock()
            .unwrap()
            .insert((session.bucket, session.key), body);
        Ok(etag)
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        session_id: &str,
    ) -> Result<()> {
        self.sessions.lock().unwrap().remove(session_id);
        self.aborted.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn get_range<'a>(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&'a str>,
        start: u64,
        end: u64,
    ) -> Result<ByteStream> {
        self.enter().await;
        self.range_calls.lock().unwrap().push(start);
        let failure = self.range_failures.lock().unwrap().remove(&start);
        let result = match failure {
            Some(error) => Err(error),
            None => match self.object(bucket, key) {
                Some(data) => {
                    let mut stop = (end as usize + 1).min(data.len());
                    if self.short_ranges.lock().unwrap().contains(&start) {
                        stop -= 1;
                    }
                    let slice = data[start as usize..stop].to_vec();
                    let chunks: Vec<Result<Bytes>> = slice
                        .chunks(300)
                        .map(|c| Ok(Bytes::copy_from_slice(c)))
                        .collect();
                    Ok(futures::stream::iter(chunks).boxed())
                }
                None => Err(Error::from_status(Some(404), Some("NoSuchKey".into()), "no such key")),
            },
        };
        self.leave();
        result
    }

    async fn head_object<'a>(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&'a str>,
    ) -> Result<ObjectMeta> {
        match self.object(bucket, key) {
            Some(data) => Ok(ObjectMeta {
                size: data.len() as u64,
                etag: Some(sha256_hex(&data)),
                last_modified: None,
                content_type: None,
            }),
            None => Err(Error::from_status(Some(404), Some("NoSuchKey".into()), "no such key")),
        }
    }
}

/// Deterministic non-repeating test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
