use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::range_reader::{check_range, RangeReader};
use crate::error::IoError;

/// Local-file implementation of [`RangeReader`].
///
/// The file length is read once on open and is the length used for
/// truncation checks. Seek-and-read pairs are serialized through a mutex;
/// open one `FileReader` per handle to read in parallel.
pub struct FileReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl FileReader {
    /// Open a file for positioned reads.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = format!("file://{}", path.display());

        let file = File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IoError::NotFound(identifier.clone())
            } else {
                IoError::Storage(format!("{}: {}", identifier, e))
            }
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| IoError::Storage(format!("{}: {}", identifier, e)))?
            .len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier,
        })
    }
}

#[async_trait]
impl RangeReader for FileReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = BytesMut::zeroed(len);
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::Storage(format!("{}: seek to {}: {}", self.identifier, offset, e)))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| IoError::Storage(format!("{}: read at {}: {}", self.identifier, offset, e)))?;

        Ok(buf.freeze())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
