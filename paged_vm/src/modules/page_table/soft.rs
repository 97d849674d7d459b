use std::collections::HashMap;

use super::PageTableModule;
use crate::{util::is_page_aligned, PhysAddr, VirtAddr};

#[derive(Debug, Clone, Copy)]
struct SoftPageTableEntry {
    phys: PhysAddr,
    writable: bool,
    dirty: bool,
    accessed: bool,
}

/// Page table kept in ordinary memory.
///
/// The hardware bits have to be updated by whoever emulates memory accesses
/// (see `AddressSpace::read_user` and `AddressSpace::write_user`).
#[derive(Default)]
pub struct SoftPageTable {
    entries: HashMap<VirtAddr, SoftPageTableEntry>,
}

impl SoftPageTable {
    /// Number of currently installed mappings
    pub fn mapped_count(&self) -> usize {
        self.entries.len()
    }
}

impl PageTableModule for SoftPageTable {
    fn new() -> Self {
        Self::default()
    }

    fn map(&mut self, va: VirtAddr, phys: PhysAddr, writable: bool) -> bool {
        debug_assert!(is_page_aligned(va) && is_page_aligned(phys));
        if self.entries.contains_key(&va) {
            return false;
        }

        self.entries.insert(
            va,
            SoftPageTableEntry {
                phys,
                writable,
                dirty: false,
                accessed: false,
            },
        );
        true
    }

    fn unmap(&mut self, va: VirtAddr) {
        self.entries.remove(&va);
    }

    fn lookup(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.entries.get(&va).map(|entry| entry.phys)
    }

    fn is_writable(&self, va: VirtAddr) -> bool {
        self.entries.get(&va).is_some_and(|entry| entry.writable)
    }

    fn is_dirty(&self, va: VirtAddr) -> bool {
        self.entries.get(&va).is_some_and(|entry| entry.dirty)
    }

    fn set_dirty(&mut self, va: VirtAddr, dirty: bool) {
        if let Some(entry) = self.entries.get_mut(&va) {
            entry.dirty = dirty;
        }
    }

    fn is_accessed(&self, va: VirtAddr) -> bool {
        self.entries.get(&va).is_some_and(|entry| entry.accessed)
    }

    fn set_accessed(&mut self, va: VirtAddr, accessed: bool) {
        if let Some(entry) = self.entries.get_mut(&va) {
            entry.accessed = accessed;
        }
    }
}

#[cfg(test)]
mod test {
    use super::SoftPageTable;
    use crate::{modules::page_table::PageTableModule, PAGE_SIZE};

    #[test]
    fn test_map_and_bits() {
        let mut table = SoftPageTable::new();
        let va = 0x1000_0000;

        assert!(table.lookup(va).is_none());
        assert!(table.map(va, 3 * PAGE_SIZE, true));
        assert!(!table.map(va, 4 * PAGE_SIZE, true), "double mapping should fail");

        assert_eq!(table.lookup(va), Some(3 * PAGE_SIZE));
        assert!(table.is_writable(va));
        assert!(!table.is_dirty(va));
        assert!(!table.is_accessed(va));

        table.set_dirty(va, true);
        table.set_accessed(va, true);
        assert!(table.is_dirty(va));
        assert!(table.is_accessed(va));

        table.unmap(va);
        assert!(table.lookup(va).is_none());
        assert!(!table.is_dirty(va));
        assert_eq!(table.mapped_count(), 0);

        // bits of unmapped pages are ignored
        table.set_dirty(va, true);
        assert!(!table.is_dirty(va));
    }

    #[test]
    fn test_remap_keeps_bits() {
        let mut table = SoftPageTable::new();
        let va = 0x2000;

        assert!(!table.remap(va, false));
        assert!(table.map(va, PAGE_SIZE, true));
        table.set_dirty(va, true);

        assert!(table.remap(va, false));
        assert!(!table.is_writable(va));
        assert!(table.is_dirty(va));
        assert!(!table.is_accessed(va));
        assert_eq!(table.lookup(va), Some(PAGE_SIZE));
    }
}
