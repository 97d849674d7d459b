/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

mod clock;

use std::sync::Arc;

use clock::FrameClock;

use crate::{
    address_space::ContextId,
    modules::page_table::PageTableModule,
    page::{Page, PageRef},
    PhysAddr, VirtAddr,
};

/// Stable index of a frame inside of the [`FrameTable`]
pub(crate) type FrameId = usize;

/// A physical frame that backs one or more pages
pub(crate) struct Frame<P: PageTableModule> {
    phys: PhysAddr,

    /// Address space of the representative page.
    /// `None` while the frame is being evicted, such frames are skipped by the clock.
    owner: Option<ContextId>,

    /// Every page that is resident in this frame. More than one while shared
    /// copy-on-write after a fork. The first entry is the representative.
    sharers: Vec<PageRef<P>>,
}

impl<P: PageTableModule> Frame<P> {
    #[inline]
    pub(crate) fn phys(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub(crate) fn owner(&self) -> Option<ContextId> {
        self.owner
    }

    #[inline]
    pub(crate) fn set_owner(&mut self, owner: Option<ContextId>) {
        self.owner = owner;
    }

    #[inline]
    pub(crate) fn share_count(&self) -> usize {
        self.sharers.len()
    }

    #[inline]
    pub(crate) fn sharers(&self) -> &[PageRef<P>] {
        &self.sharers
    }

    pub(crate) fn take_sharers(&mut self) -> Vec<PageRef<P>> {
        core::mem::take(&mut self.sharers)
    }

    /// Was any of the sharing pages accessed? Clears the bits of all of them.
    fn test_and_clear_accessed(&self) -> bool {
        let mut accessed = false;
        for page in self.sharers.iter() {
            if page.is_accessed() {
                accessed = true;
                page.clear_accessed();
            }
        }
        accessed
    }
}

/// Result of removing a page from its frame
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Detached {
    /// The page was the last sharer, the frame is gone and the physical
    /// memory can be handed back to the allocator
    Freed(PhysAddr),
    /// Other pages still use the frame
    Shared,
}

/// Snapshot of a single frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub phys: PhysAddr,
    pub owner: Option<ContextId>,
    pub share_count: usize,
    /// Address space and virtual address of every sharing page
    pub pages: Vec<(ContextId, VirtAddr)>,
}

/// Every frame currently handed out for user pages.
///
/// Ids are stable while a frame is alive and reused afterwards.
pub(crate) struct FrameTable<P: PageTableModule> {
    frames: Vec<Option<Frame<P>>>,
    free_ids: Vec<FrameId>,
    clock: FrameClock,
}

impl<P: PageTableModule> FrameTable<P> {
    pub(crate) fn new() -> Self {
        Self {
            frames: Vec::new(),
            free_ids: Vec::new(),
            clock: FrameClock::new(),
        }
    }

    /// Number of frames in the table
    pub(crate) fn len(&self) -> usize {
        self.frames.len() - self.free_ids.len()
    }

    /// Adds a frame without any sharers yet. `owner` stays `None` until the
    /// first page is attached, so the frame can not be picked by the clock.
    pub(crate) fn insert(&mut self, phys: PhysAddr) -> FrameId {
        let frame = Frame {
            phys,
            owner: None,
            sharers: Vec::new(),
        };

        match self.free_ids.pop() {
            Some(id) => {
                debug_assert!(self.frames[id].is_none());
                self.frames[id] = Some(frame);
                id
            }
            None => {
                self.frames.push(Some(frame));
                self.frames.len() - 1
            }
        }
    }

    /// Removes an empty frame and returns its physical address
    pub(crate) fn remove(&mut self, id: FrameId) -> Option<PhysAddr> {
        let frame = self.frames.get_mut(id)?.take()?;
        debug_assert!(frame.sharers.is_empty());
        self.free_ids.push(id);
        Some(frame.phys)
    }

    #[inline]
    pub(crate) fn get(&self, id: FrameId) -> Option<&Frame<P>> {
        self.frames.get(id)?.as_ref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame<P>> {
        self.frames.get_mut(id)?.as_mut()
    }

    /// Adds `page` as a sharer of frame `id`.
    /// The first page attached to a frame makes its address space the owner.
    pub(crate) fn attach(&mut self, id: FrameId, page: PageRef<P>) {
        if let Some(frame) = self.get_mut(id) {
            if frame.sharers.is_empty() {
                frame.owner = Some(page.context());
            }
            frame.sharers.push(page);
        } else {
            debug_assert!(false, "attach to missing frame {}", id);
        }
    }

    /// Removes `page` from the sharers of frame `id`.
    ///
    /// If `page` was the representative, the next sharer takes over. Frames
    /// without any sharers are removed from the table.
    pub(crate) fn detach(&mut self, id: FrameId, page: &Page<P>) -> Detached {
        let Some(frame) = self.get_mut(id) else {
            debug_assert!(false, "detach from missing frame {}", id);
            return Detached::Shared;
        };

        if let Some(pos) = frame
            .sharers
            .iter()
            .position(|p| core::ptr::eq(Arc::as_ptr(p), page))
        {
            frame.sharers.remove(pos);
        } else {
            debug_assert!(false, "page {:#x} is not a sharer of frame {}", page.va(), id);
        }

        if frame.sharers.is_empty() {
            match self.remove(id) {
                Some(phys) => Detached::Freed(phys),
                None => Detached::Shared,
            }
        } else {
            if frame.owner.is_some() {
                frame.owner = Some(frame.sharers[0].context());
            }
            Detached::Shared
        }
    }

    /// Selects the next frame to evict with the clock algorithm.
    /// Frames without owner are not considered.
    pub(crate) fn select_victim(&mut self) -> Option<FrameId> {
        let frames = &self.frames;
        self.clock.next(
            frames.len(),
            |i| matches!(&frames[i], Some(frame) if frame.owner.is_some()),
            |i| match &frames[i] {
                Some(frame) => frame.test_and_clear_accessed(),
                None => false,
            },
        )
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (FrameId, &Frame<P>)> {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(id, frame)| frame.as_ref().map(|frame| (id, frame)))
    }

    pub(crate) fn snapshot(&self) -> Vec<FrameInfo> {
        self.iter()
            .map(|(_, frame)| FrameInfo {
                phys: frame.phys,
                owner: frame.owner,
                share_count: frame.share_count(),
                pages: frame
                    .sharers
                    .iter()
                    .map(|page| (page.context(), page.va()))
                    .collect(),
            })
            .collect()
    }

    /// Checks that every sharer points back to its frame.
    ///
    /// **Note**: Locks the state of every resident page.
    pub(crate) fn check_integrity(&self) -> bool {
        for (id, frame) in self.iter() {
            if frame.sharers.is_empty() {
                return false;
            }
            for page in frame.sharers.iter() {
                if page.state.lock().frame != Some(id) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{Detached, FrameTable};
    use crate::{
        address_space::ContextId,
        modules::page_table::{PageTableModule, SoftPageTable},
        page::{Page, PageInit, PageRef, VmType},
        util::shared_lock::SharedLock,
    };

    fn test_page(context: usize, va: usize) -> PageRef<SoftPageTable> {
        Page::new(
            va,
            true,
            ContextId(context),
            Arc::new(SharedLock::new(SoftPageTable::new())),
            VmType::Anonymous,
            PageInit::Zero,
        )
    }

    fn insert_attached(
        table: &mut FrameTable<SoftPageTable>,
        phys: usize,
        page: &PageRef<SoftPageTable>,
    ) -> usize {
        let id = table.insert(phys);
        table.attach(id, page.clone());
        page.state.lock().frame = Some(id);
        id
    }

    #[test]
    fn test_attach_detach() {
        let mut table = FrameTable::new();
        let parent = test_page(1, 0x1000);
        let child = test_page(2, 0x1000);

        let id = table.insert(0x10_0000);
        assert_eq!(table.get(id).unwrap().owner(), None);

        table.attach(id, parent.clone());
        table.attach(id, child.clone());
        let frame = table.get(id).unwrap();
        assert_eq!(frame.owner(), Some(ContextId(1)));
        assert_eq!(frame.share_count(), 2);

        // representative leaves, the child takes over
        assert_eq!(table.detach(id, &parent), Detached::Shared);
        assert_eq!(table.get(id).unwrap().owner(), Some(ContextId(2)));
        assert_eq!(table.get(id).unwrap().share_count(), 1);

        assert_eq!(table.detach(id, &child), Detached::Freed(0x10_0000));
        assert!(table.get(id).is_none());
        assert_eq!(table.len(), 0);

        // id is reused
        assert_eq!(table.insert(0x10_1000), id);
    }

    #[test]
    fn test_select_victim() {
        let mut table = FrameTable::new();
        let pages: Vec<_> = (0..3).map(|i| test_page(1, 0x1000 * (i + 1))).collect();

        let mut ids = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            ids.push(insert_attached(&mut table, 0x10_0000 + i * 0x1000, page));
            page.mmu().lock().map(page.va(), 0x10_0000 + i * 0x1000, true);
        }
        assert!(table.check_integrity());

        // first page was accessed, gets a second chance
        pages[0].mmu().lock().set_accessed(pages[0].va(), true);
        assert_eq!(table.select_victim(), Some(ids[1]));
        assert!(!pages[0].is_accessed());

        // frames being evicted are skipped
        table.get_mut(ids[2]).unwrap().set_owner(None);
        assert_eq!(table.select_victim(), Some(ids[0]));
        assert_eq!(table.select_victim(), Some(ids[1]));
    }

    #[test]
    fn test_snapshot() {
        let mut table = FrameTable::new();
        let a = test_page(1, 0x4000);
        let b = test_page(2, 0x4000);

        let id = insert_attached(&mut table, 0x20_0000, &a);
        table.attach(id, b.clone());
        b.state.lock().frame = Some(id);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].share_count, 2);
        assert_eq!(
            snapshot[0].pages,
            vec![(ContextId(1), 0x4000), (ContextId(2), 0x4000)]
        );
        assert!(table.check_integrity());

        b.state.lock().frame = None;
        assert!(!table.check_integrity());
    }
}
