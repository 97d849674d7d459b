use std::sync::Arc;

use super::{FileHandle, FileModule};
use crate::util::shared_lock::SharedLock;

/// File whose contents live in memory.
///
/// All handles created through [`FileModule::reopen`] share the same contents.
pub struct MemoryFile {
    inode: Arc<SharedLock<Vec<u8>>>,
}

impl MemoryFile {
    pub fn new(contents: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            inode: Arc::new(SharedLock::new(contents)),
        })
    }

    /// Copy of the current contents of the file
    pub fn contents(&self) -> Vec<u8> {
        self.inode.lock().clone()
    }
}

impl FileModule for MemoryFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.inode.lock();
        if offset >= data.len() {
            return 0;
        }

        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        count
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let mut data = self.inode.lock();
        if offset >= data.len() {
            return 0;
        }

        let count = buf.len().min(data.len() - offset);
        data[offset..offset + count].copy_from_slice(&buf[..count]);
        count
    }

    fn reopen(&self) -> Option<FileHandle> {
        Some(Arc::new(Self {
            inode: self.inode.clone(),
        }))
    }

    fn length(&self) -> usize {
        self.inode.lock().len()
    }
}

#[cfg(test)]
mod test {
    use super::MemoryFile;
    use crate::modules::file::FileModule;

    #[test]
    fn test_read_write_bounds() {
        let file = MemoryFile::new(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 8];

        assert_eq!(file.read_at(&mut buf, 1), 3);
        assert_eq!(&buf[..3], &[2, 3, 4]);
        assert_eq!(file.read_at(&mut buf, 4), 0);

        // writes never grow the file
        assert_eq!(file.write_at(&[9, 9, 9], 2), 2);
        assert_eq!(file.contents(), vec![1, 2, 9, 9]);
        assert_eq!(file.length(), 4);
    }

    #[test]
    fn test_reopen_shares_contents() {
        let file = MemoryFile::new(vec![0; 16]);
        let other = file.reopen().unwrap();

        assert_eq!(other.write_at(&[7], 5), 1);
        assert_eq!(file.contents()[5], 7);
        assert_eq!(other.length(), 16);
    }
}
