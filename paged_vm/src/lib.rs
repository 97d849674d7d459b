mod address_space;
mod error;
mod fault;
mod fork;
mod frame_table;
mod mmap;
mod page;
mod spt;
mod swap;
mod util;
mod vm;
mod vm_config;

#[cfg(test)]
mod test;

pub mod modules;

pub use address_space::{AddressSpace, ContextId};
pub use error::{VmError, VmResult};
pub use fault::PageFault;
pub use frame_table::FrameInfo;
pub use page::{FileSegment, PageInit, VmType};
pub use vm::Vm;
pub use vm_config::VmConfig;

/// Size of a virtual page and of a physical frame in bytes
pub const PAGE_SIZE: usize = 4096;

/// Size of a single sector of the swap device in bytes
pub const SECTOR_SIZE: usize = 512;

/// How many consecutive sectors one swap slot occupies
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

static_assertions::const_assert_eq!(SECTORS_PER_PAGE, 8);
static_assertions::const_assert_eq!(PAGE_SIZE % SECTOR_SIZE, 0);
static_assertions::const_assert!(PAGE_SIZE.is_power_of_two());

/// Virtual address inside of an address space
pub type VirtAddr = usize;

/// Physical address of a frame as handed out by the frame allocator
pub type PhysAddr = usize;
