use std::collections::HashMap;

use log::trace;

use crate::{
    modules::page_table::PageTableModule,
    page::PageRef,
    util::page_round_down,
    VirtAddr, VmError, VmResult,
};

/// Supplemental page table of one address space.
///
/// Maps page aligned virtual addresses to the page registered there, no
/// matter if the page is resident, swapped out or not initialized yet.
pub(crate) struct SupplementalPageTable<P: PageTableModule> {
    pages: HashMap<VirtAddr, PageRef<P>>,
}

impl<P: PageTableModule> SupplementalPageTable<P> {
    pub(crate) fn new() -> Self {
        Self {
            pages: HashMap::new(),
        }
    }

    /// Number of registered pages
    pub(crate) fn len(&self) -> usize {
        self.pages.len()
    }

    /// Is there a page registered for the page containing `addr`?
    pub(crate) fn contains(&self, addr: VirtAddr) -> bool {
        self.pages.contains_key(&page_round_down(addr))
    }

    /// Registers `page`. Fails if there already is a page at its address.
    pub(crate) fn insert(&mut self, page: PageRef<P>) -> VmResult<()> {
        let va = page.va();
        debug_assert_eq!(va, page_round_down(va));

        if self.pages.contains_key(&va) {
            return Err(VmError::DuplicatePage);
        }

        trace!("Insert page {:#x} into spt", va);
        self.pages.insert(va, page);
        Ok(())
    }

    /// Page containing `addr`, if any
    pub(crate) fn find(&self, addr: VirtAddr) -> Option<PageRef<P>> {
        self.pages.get(&page_round_down(addr)).cloned()
    }

    /// Unregisters the page at `va`.
    /// Releasing its frame and backing is up to the caller.
    pub(crate) fn remove(&mut self, va: VirtAddr) -> Option<PageRef<P>> {
        self.pages.remove(&page_round_down(va))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &PageRef<P>> {
        self.pages.values()
    }

    /// Registered addresses in ascending order
    pub(crate) fn addresses(&self) -> Vec<VirtAddr> {
        let mut addrs: Vec<_> = self.pages.keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    pub(crate) fn drain(&mut self) -> Vec<PageRef<P>> {
        self.pages.drain().map(|(_, page)| page).collect()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::SupplementalPageTable;
    use crate::{
        address_space::ContextId,
        modules::page_table::{PageTableModule, SoftPageTable},
        page::{Page, PageInit, PageRef, VmType},
        util::shared_lock::SharedLock,
        VmError,
    };

    fn page(va: usize) -> PageRef<SoftPageTable> {
        Page::new(
            va,
            true,
            ContextId(0),
            Arc::new(SharedLock::new(SoftPageTable::new())),
            VmType::Anonymous,
            PageInit::Zero,
        )
    }

    #[test]
    fn test_insert_find_remove() {
        let mut spt = SupplementalPageTable::new();
        assert!(spt.find(0).is_none());
        assert!(spt.find(0x1234).is_none());

        spt.insert(page(0x1000)).unwrap();
        spt.insert(page(0x3000)).unwrap();
        assert_eq!(spt.insert(page(0x1000)).err(), Some(VmError::DuplicatePage));
        assert_eq!(spt.len(), 2);

        // any address inside the page finds it
        assert_eq!(spt.find(0x1fff).unwrap().va(), 0x1000);
        assert!(spt.find(0x2000).is_none());
        assert!(spt.contains(0x3004));
        assert_eq!(spt.addresses(), vec![0x1000, 0x3000]);

        assert_eq!(spt.remove(0x1008).unwrap().va(), 0x1000);
        assert!(spt.remove(0x1000).is_none());
        assert_eq!(spt.len(), 1);
    }
}
