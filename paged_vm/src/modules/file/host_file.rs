use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::Arc,
};

use super::{FileHandle, FileModule};
use crate::util::shared_lock::SharedLock;

/// File of the host file system
pub struct HostFile {
    file: SharedLock<File>,

    /// path of file, used for reopening
    path: PathBuf,
}

impl HostFile {
    /// Opens an existing file for reading and writing
    pub fn open<P: Into<PathBuf>>(path: P) -> std::io::Result<Arc<Self>> {
        let path = path.into();
        let file = File::options().read(true).write(true).open(&path)?;

        Ok(Arc::new(Self {
            file: SharedLock::new(file),
            path,
        }))
    }
}

impl FileModule for HostFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let length = self.length();
        if offset >= length {
            return 0;
        }

        let count = buf.len().min(length - offset);
        let mut file = self.file.lock();
        if file.seek(SeekFrom::Start(offset as u64)).is_err() {
            return 0;
        }

        let mut read = 0;
        while read < count {
            match file.read(&mut buf[read..count]) {
                Ok(0) | Err(_) => break,
                Ok(n) => read += n,
            }
        }

        read
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let length = self.length();
        if offset >= length {
            return 0;
        }

        let count = buf.len().min(length - offset);
        let mut file = self.file.lock();
        if file.seek(SeekFrom::Start(offset as u64)).is_err() {
            return 0;
        }

        match file.write_all(&buf[..count]) {
            Ok(()) => count,
            Err(_) => 0,
        }
    }

    fn reopen(&self) -> Option<FileHandle> {
        let handle: FileHandle = HostFile::open(self.path.clone()).ok()?;
        Some(handle)
    }

    fn length(&self) -> usize {
        self.file
            .lock()
            .metadata()
            .map(|metadata| metadata.len() as usize)
            .unwrap_or(0)
    }
}
