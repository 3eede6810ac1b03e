//! File-backed storage

use super::{RandomAccess, Stat};
use crate::error::{Result, TmcoError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Storage over a file on disk
///
/// The file is opened lazily on first use. `create` storage makes the file
/// (and nothing else) if it is missing; read-only storage never does.
pub struct FileStorage {
    file: Option<File>,
    path: PathBuf,
    writable: bool,
}

impl FileStorage {
    /// Read/write storage, creating the file on open if needed
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        FileStorage {
            file: None,
            path: path.as_ref().to_path_buf(),
            writable: true,
        }
    }

    /// Read-only storage over an existing file
    pub fn open_read<P: AsRef<Path>>(path: P) -> Self {
        FileStorage {
            file: None,
            path: path.as_ref().to_path_buf(),
            writable: false,
        }
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            self.open()?;
        }
        self.file.as_mut().ok_or(TmcoError::StoreClosed)
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.sync_all()?;
        }
        Ok(())
    }
}

impl RandomAccess for FileStorage {
    fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let file = if self.writable {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?
        } else {
            OpenOptions::new().read(true).open(&self.path)?
        };

        self.file = Some(file);
        Ok(())
    }

    fn stat(&mut self) -> Result<Stat> {
        let metadata = self.file()?.metadata()?;

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };
        #[cfg(not(unix))]
        let mode = None;

        Ok(Stat {
            size: metadata.len(),
            mode,
        })
    }

    fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len as usize];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(TmcoError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{} was opened read-only", self.path.display()),
            )));
        }

        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            if self.writable {
                file.sync_all()?;
            }
        }
        Ok(())
    }
}
