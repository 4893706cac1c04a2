//! Destination of the verified pieces.
//!
//! Only the coordinator writes, so a sink needs no synchronization of its
//! own.
use std::{
    future::Future,
    io::SeekFrom,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;

use crate::error::Error;

/// Writes bytes at arbitrary offsets of the downloaded file.
pub trait OutputSink: Send {
    /// Write `data` starting at byte `offset`. Writes may come in any order.
    fn write_at(
        &mut self,
        offset: u64,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Make everything written so far durable.
    fn flush(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// [`OutputSink`] backed by a single file on disk.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Create the file at `path`, truncating it if it exists, and pre-size it
    /// to `len` bytes. Parent directories are created.
    pub async fn create(
        path: impl AsRef<Path>,
        len: u64,
    ) -> Result<Self, Error> {
        let path = path.as_ref().to_owned();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|_| {
                Error::FileOpenError(path.to_string_lossy().into_owned())
            })?;

        file.set_len(len).await?;
        debug!("created {path:?} with {len} bytes");

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for FileSink {
    async fn write_at(
        &mut self,
        offset: u64,
        data: &[u8],
    ) -> Result<(), Error> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{distributions::Alphanumeric, Rng};

    use super::*;

    fn tmp_dir() -> PathBuf {
        let name: String = rand::thread_rng()
            .sample_iter(Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        std::env::temp_dir().join(format!("piecewise-{name}"))
    }

    #[tokio::test]
    async fn writes_in_any_order() -> Result<(), Error> {
        let dir = tmp_dir();
        let path = dir.join("nested").join("out.bin");

        let mut sink = FileSink::create(&path, 7).await?;
        assert_eq!(std::fs::metadata(&path)?.len(), 7);

        sink.write_at(4, b"EFG").await?;
        sink.write_at(0, b"ABCD").await?;
        sink.flush().await?;

        assert_eq!(std::fs::read(sink.path())?, b"ABCDEFG");

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[tokio::test]
    async fn create_truncates() -> Result<(), Error> {
        let dir = tmp_dir();
        let path = dir.join("out.bin");

        std::fs::create_dir_all(&dir)?;
        std::fs::write(&path, b"previous content")?;

        let _sink = FileSink::create(&path, 3).await?;
        assert_eq!(std::fs::read(&path)?, [0, 0, 0]);

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }
}
