//! Upload sources
//!
//! Parts are read by offset. A file source opens an independent handle per
//! read, so concurrent workers never share a cursor. A stream source has
//! only one cursor and serializes seek+read under a mutex.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use jiff::Timestamp;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::checkpoint::LocalIdentity;
use crate::error::{Error, Result};

/// A readable, seekable byte source
pub trait SeekableReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableReader for T {}

/// Where upload bytes come from
pub enum UploadSource {
    File(PathBuf),
    Stream(Box<dyn SeekableReader>),
}

impl std::fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadSource::File(path) => f.debug_tuple("File").field(path).finish(),
            UploadSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl UploadSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        UploadSource::File(path.into())
    }

    pub fn stream<R: SeekableReader + 'static>(reader: R) -> Self {
        UploadSource::Stream(Box::new(reader))
    }

    /// Local file path, if this is a file source
    pub fn path(&self) -> Option<&Path> {
        match self {
            UploadSource::File(path) => Some(path),
            UploadSource::Stream(_) => None,
        }
    }

    /// Stat the source and turn it into a part reader
    pub(crate) async fn open(self) -> Result<OpenedSource> {
        match self {
            UploadSource::File(path) => open_file(path).await,
            UploadSource::Stream(reader) => open_stream(reader).await,
        }
    }
}

async fn open_file(path: PathBuf) -> Result<OpenedSource> {
    let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Validation(format!("source file not found: {}", path.display()))
        } else {
            Error::LocalIo(e)
        }
    })?;
    if !metadata.is_file() {
        return Err(Error::Validation(format!(
            "source is not a regular file: {}",
            path.display()
        )));
    }

    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| Timestamp::try_from(t).ok());
    let identity = LocalIdentity::File {
        path: path.clone(),
        size: metadata.len(),
        modified,
    };
    Ok(OpenedSource {
        reader: PartReader::File(path),
        identity,
        origin_offset: 0,
        size: metadata.len(),
    })
}

async fn open_stream(mut reader: Box<dyn SeekableReader>) -> Result<OpenedSource> {
    let probed = tokio::task::spawn_blocking(move || {
        let mut probe = || -> std::io::Result<(u64, u64)> {
            let origin = reader.stream_position()?;
            let end = reader.seek(SeekFrom::End(0))?;
            reader.seek(SeekFrom::Start(origin))?;
            Ok((origin, end))
        };
        probe().map(|bounds| (bounds, reader))
    })
    .await
    .map_err(|e| Error::LocalIo(std::io::Error::other(e)))?;

    let ((origin, end), reader) = probed
        .map_err(|e| Error::Validation(format!("source stream does not support seeking: {e}")))?;
    let size = end.saturating_sub(origin);

    Ok(OpenedSource {
        reader: PartReader::Stream(Arc::new(Mutex::new(reader))),
        identity: LocalIdentity::Stream {
            origin_offset: origin,
            size,
        },
        origin_offset: origin,
        size,
    })
}

/// A source that has been stat'ed and is ready to serve parts
#[derive(Debug)]
pub(crate) struct OpenedSource {
    pub reader: PartReader,
    pub identity: LocalIdentity,
    pub origin_offset: u64,
    pub size: u64,
}

/// Reads exactly one part's bytes at an absolute offset
#[derive(Clone)]
pub(crate) enum PartReader {
    File(PathBuf),
    Stream(Arc<Mutex<Box<dyn SeekableReader>>>),
}

impl std::fmt::Debug for PartReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartReader::File(path) => f.debug_tuple("File").field(path).finish(),
            PartReader::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl PartReader {
    pub async fn read_part(&self, offset: u64, size: u64) -> Result<Bytes> {
        let len = usize::try_from(size)
            .map_err(|_| Error::Validation(format!("part of {size} bytes does not fit in memory")))?;
        match self {
            PartReader::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await.map_err(|e| short_read(e, offset, size))?;
                Ok(Bytes::from(buf))
            }
            PartReader::Stream(reader) => {
                let reader = Arc::clone(reader);
                tokio::task::spawn_blocking(move || -> Result<Bytes> {
                    let mut guard = match reader.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    guard.seek(SeekFrom::Start(offset))?;
                    let mut buf = vec![0u8; len];
                    guard
                        .read_exact(&mut buf)
                        .map_err(|e| short_read(e, offset, size))?;
                    Ok(Bytes::from(buf))
                })
                .await
                .map_err(|e| Error::LocalIo(std::io::Error::other(e)))?
            }
        }
    }
}

fn short_read(e: std::io::Error, offset: u64, size: u64) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Integrity(format!(
            "source ended before {size} bytes could be read at offset {offset}"
        ))
    } else {
        Error::LocalIo(e)
    }
}
