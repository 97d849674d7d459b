mod soft;

pub use soft::SoftPageTable;

use crate::{PhysAddr, VirtAddr};

/// The raw page table (MMU) of one address space.
///
/// All addresses passed to this module are page aligned.
pub trait PageTableModule: Send + 'static {
    /// Creates a new, empty page table
    fn new() -> Self;

    /// Maps the page at `va` to the frame at `phys`.
    ///
    /// Returns `false` if the mapping could not be installed
    /// (e.g. because `va` is mapped already).
    /// A new mapping starts with both the accessed and the dirty bit cleared.
    fn map(&mut self, va: VirtAddr, phys: PhysAddr, writable: bool) -> bool;

    /// Removes the mapping of `va`, does nothing if `va` is not mapped
    fn unmap(&mut self, va: VirtAddr);

    /// Returns the physical address `va` is mapped to
    fn lookup(&self, va: VirtAddr) -> Option<PhysAddr>;

    /// Returns `true` if `va` is mapped and writable
    fn is_writable(&self, va: VirtAddr) -> bool;

    fn is_dirty(&self, va: VirtAddr) -> bool;

    fn set_dirty(&mut self, va: VirtAddr, dirty: bool);

    fn is_accessed(&self, va: VirtAddr) -> bool;

    fn set_accessed(&mut self, va: VirtAddr, accessed: bool);

    /// Changes the permission of an existing mapping.
    /// The accessed and dirty bits survive.
    fn remap(&mut self, va: VirtAddr, writable: bool) -> bool {
        let Some(phys) = self.lookup(va) else {
            return false;
        };
        let dirty = self.is_dirty(va);
        let accessed = self.is_accessed(va);

        self.unmap(va);
        if !self.map(va, phys, writable) {
            return false;
        }
        self.set_dirty(va, dirty);
        self.set_accessed(va, accessed);
        true
    }
}
