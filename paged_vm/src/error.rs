use core::fmt;

/// Everything that can go wrong inside of the virtual memory core.
///
/// Resource exhaustion, short I/O and invalid accesses are fatal for the
/// process that triggered them. Invalid requests are reported back to the
/// caller (normally the syscall layer) which turns them into an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No free frame and no frame that could be evicted
    OutOfFrames,
    /// No free slot left on the swap device
    SwapFull,
    /// The swap device reported an error
    SwapIo,
    /// A file read or write transferred fewer bytes than requested
    ShortIo,
    /// There is already a page registered at this address
    DuplicatePage,
    /// The address lies inside of kernel space
    KernelAddress,
    /// The address is null
    NullAddress,
    /// No page is registered at this address
    NotFound,
    /// Malformed request (e.g. zero length or unaligned address)
    InvalidArgument,
    /// The requested region overlaps with already registered pages
    Overlap,
    /// Write access to a page that is not writable
    ReadOnly,
    /// The page table refused to install a mapping
    MapFailed,
    /// The file could not be reopened
    FileReopen,
}

pub type VmResult<T> = Result<T, VmError>;

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VmError::OutOfFrames => "out of physical frames",
            VmError::SwapFull => "swap device is full",
            VmError::SwapIo => "swap device i/o error",
            VmError::ShortIo => "short file i/o",
            VmError::DuplicatePage => "page already registered",
            VmError::KernelAddress => "address inside kernel space",
            VmError::NullAddress => "null address",
            VmError::NotFound => "no page registered at address",
            VmError::InvalidArgument => "invalid argument",
            VmError::Overlap => "region overlaps existing pages",
            VmError::ReadOnly => "write to read-only page",
            VmError::MapFailed => "page table mapping failed",
            VmError::FileReopen => "could not reopen file",
        };

        f.write_str(msg)
    }
}

impl std::error::Error for VmError {}
