mod host_file;
mod memory_file;

pub use host_file::HostFile;
pub use memory_file::MemoryFile;

use std::sync::Arc;

/// Reference counted handle to an open file
pub type FileHandle = Arc<dyn FileModule>;

/// An open file of the file system.
///
/// Handles are shared between pages, the file is closed once the last
/// [`FileHandle`] is dropped.
pub trait FileModule: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes actually read, which is less than
    /// requested if the end of the file was reached.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize;

    /// Writes up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes actually written. Writing never grows the file.
    fn write_at(&self, buf: &[u8], offset: usize) -> usize;

    /// Opens a new, independent handle to the same file
    fn reopen(&self) -> Option<FileHandle>;

    /// Length of the file in bytes
    fn length(&self) -> usize;
}
