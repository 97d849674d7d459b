//! Collaborators of the virtual memory core.
//!
//! Each collaborator is described by a module trait, so that a kernel can plug
//! in its real page tables, physical allocator, disk and file system. Host
//! implementations are provided for testing and for the desktop demo.

pub mod block_device;
pub mod file;
pub mod frame_allocator;
pub mod page_table;
