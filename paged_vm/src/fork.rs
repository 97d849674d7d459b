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

use core::sync::atomic::Ordering;

use log::{debug, trace};

use crate::{
    address_space::AddressSpace,
    frame_table::FrameTable,
    modules::{
        block_device::BlockDeviceModule, frame_allocator::FrameAllocatorModule,
        page_table::PageTableModule,
    },
    page::{Page, PageKind, PageRef},
    VmError, VmResult,
};

/// Pages copied into a new address space so far.
///
/// They only become visible in the new address space on [`CopyBuilder::commit`],
/// on failure [`CopyBuilder::rollback`] undoes every copy.
struct CopyBuilder<P: PageTableModule> {
    pages: Vec<PageRef<P>>,
}

impl<P: PageTableModule> CopyBuilder<P> {
    fn new() -> Self {
        Self { pages: Vec::new() }
    }

    fn push(&mut self, page: PageRef<P>) {
        self.pages.push(page);
    }

    /// Releases all copied pages again.
    ///
    /// Source pages that were downgraded to read-only stay that way, their
    /// next write fault upgrades them once they are not shared anymore.
    fn rollback<A: FrameAllocatorModule, D: BlockDeviceModule>(
        self,
        dst: &AddressSpace<A, D, P>,
        frames: &mut FrameTable<P>,
    ) {
        debug!("Roll back {} copied pages of {}", self.pages.len(), dst.id);
        for page in self.pages.iter() {
            let mut state = page.state.lock();
            dst.vm.release_locked(frames, page, &mut state);
            page.destroy(&mut state, &dst.vm.swap);
        }
    }

    fn commit<A: FrameAllocatorModule, D: BlockDeviceModule>(self, dst: &AddressSpace<A, D, P>) {
        let mut spt = dst.spt.lock();
        for page in self.pages {
            let inserted = spt.insert(page);
            debug_assert!(inserted.is_ok(), "copy target already has pages");
        }
    }
}

impl<A: FrameAllocatorModule, D: BlockDeviceModule, P: PageTableModule> AddressSpace<A, D, P> {
    /// Creates a copy of this address space.
    ///
    /// Resident pages are shared copy-on-write: both sides are mapped
    /// read-only and get a private copy on their next write. Pages that are
    /// not initialized yet stay lazy in the copy.
    pub fn fork(&self) -> VmResult<Self> {
        let child = AddressSpace::new(&self.vm);
        self.copy_into(&child)?;
        debug!(
            "Forked {} into {} with {} pages",
            self.id,
            child.id,
            child.page_count()
        );
        Ok(child)
    }

    /// Copies every page of this address space into the empty address space `dst`.
    ///
    /// Either all pages are copied or none.
    pub(crate) fn copy_into(&self, dst: &Self) -> VmResult<()> {
        let spt = self.spt.lock();
        let copy_lock = self.vm.copy_lock.lock();
        let mut frames = self.vm.frames.lock();

        let mut builder = CopyBuilder::new();
        for page in spt.iter() {
            match self.copy_page(&mut frames, page, dst) {
                Ok(copy) => builder.push(copy),
                Err(err) => {
                    debug!(
                        "Copy of page {:#x} from {} failed: {}",
                        page.va(),
                        self.id,
                        err
                    );
                    builder.rollback(dst, &mut frames);
                    return Err(err);
                }
            }
        }

        drop(frames);
        drop(copy_lock);

        builder.commit(dst);
        *dst.mappings.lock() = self.mappings.lock().clone();
        drop(spt);

        dst.stack_bottom.store(self.stack_bottom(), Ordering::Release);
        dst.set_user_rsp(self.user_rsp());
        Ok(())
    }

    /// Creates the copy of a single page for `dst`.
    ///
    /// A resident source page shares its frame with the copy, both mapped read-only.
    fn copy_page(
        &self,
        frames: &mut FrameTable<P>,
        page: &PageRef<P>,
        dst: &Self,
    ) -> VmResult<PageRef<P>> {
        let swapped_out = {
            let state = page.state.lock();
            state.frame.is_none()
                && matches!(&state.kind, PageKind::Anonymous(anon) if anon.is_swapped_out())
        };
        if swapped_out {
            // two pages never share a swap slot
            self.vm.claim_locked(frames, page)?;
        }

        let state = page.state.lock();
        let kind = Page::<P>::duplicate_kind(&state)?;
        let copy = Page::with_kind(page.va(), page.writable(), dst.id, dst.mmu.clone(), kind);

        let Some(id) = state.frame else {
            return Ok(copy);
        };
        let phys = frames.get(id).map(|frame| frame.phys()).ok_or(VmError::NotFound)?;

        // the copy owes the file the same unsaved writes as the source
        let dirty = self.mmu.lock().is_dirty(page.va());
        {
            let mut mmu = dst.mmu.lock();
            if !mmu.map(page.va(), phys, false) {
                return Err(VmError::MapFailed);
            }
            mmu.set_dirty(page.va(), dirty);
        }
        copy.state.lock().frame = Some(id);
        frames.attach(id, copy.clone());

        self.mmu.lock().remap(page.va(), false);
        trace!(
            "Share frame {} of {:#x} between {} and {}",
            id,
            page.va(),
            self.id,
            dst.id
        );
        Ok(copy)
    }
}
