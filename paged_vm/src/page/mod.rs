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

mod anon;
mod file_backed;
mod uninit;

pub(crate) use anon::AnonPage;
pub use file_backed::FileSegment;
pub(crate) use file_backed::FilePage;
pub use uninit::PageInit;
pub(crate) use uninit::UninitPage;

use std::sync::Arc;

use log::trace;

use crate::{
    address_space::ContextId,
    frame_table::FrameId,
    modules::{block_device::BlockDeviceModule, page_table::PageTableModule},
    swap::SwapStore,
    util::shared_lock::SharedLock,
    VirtAddr, VmResult,
};

/// Handle to the page table of one address space
pub(crate) type Mmu<P> = Arc<SharedLock<P>>;

/// Shared handle to a page, held by the SPT and by the frame it is resident in
pub(crate) type PageRef<P> = Arc<Page<P>>;

/// What kind of backing a page gets once it is materialized
#[derive(Clone)]
pub enum VmType {
    /// Backed by the swap device (stack, heap, loaded executable segments)
    Anonymous,
    /// Backed by the given region of a file (memory mapped files)
    FileBacked(FileSegment),
}

/// The backing of a page
pub(crate) enum PageKind {
    /// Not materialized yet, will be initialized on first fault
    Uninit(UninitPage),
    Anonymous(AnonPage),
    FileBacked(FilePage),
}

impl PageKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            PageKind::Uninit(_) => "uninit",
            PageKind::Anonymous(_) => "anonymous",
            PageKind::FileBacked(_) => "file-backed",
        }
    }
}

/// Mutable part of a page.
///
/// **Note**: Only lock this while holding the frame table lock.
pub(crate) struct PageState {
    /// Frame this page is currently resident in
    pub(crate) frame: Option<FrameId>,

    pub(crate) kind: PageKind,
}

/// A single virtual page of an address space
pub(crate) struct Page<P: PageTableModule> {
    va: VirtAddr,
    writable: bool,
    context: ContextId,
    mmu: Mmu<P>,
    pub(crate) state: SharedLock<PageState>,
}

impl<P: PageTableModule> Page<P> {
    /// Creates a new page that will be materialized lazily
    pub(crate) fn new(
        va: VirtAddr,
        writable: bool,
        context: ContextId,
        mmu: Mmu<P>,
        target: VmType,
        init: PageInit,
    ) -> PageRef<P> {
        Self::with_kind(
            va,
            writable,
            context,
            mmu,
            PageKind::Uninit(UninitPage::new(target, init)),
        )
    }

    pub(crate) fn with_kind(
        va: VirtAddr,
        writable: bool,
        context: ContextId,
        mmu: Mmu<P>,
        kind: PageKind,
    ) -> PageRef<P> {
        Arc::new(Page {
            va,
            writable,
            context,
            mmu,
            state: SharedLock::new(PageState {
                frame: None,
                kind,
            }),
        })
    }

    #[inline]
    pub(crate) fn va(&self) -> VirtAddr {
        self.va
    }

    #[inline]
    pub(crate) fn writable(&self) -> bool {
        self.writable
    }

    #[inline]
    pub(crate) fn context(&self) -> ContextId {
        self.context
    }

    #[inline]
    pub(crate) fn mmu(&self) -> &Mmu<P> {
        &self.mmu
    }

    /// Was this page accessed since the bit was cleared the last time?
    pub(crate) fn is_accessed(&self) -> bool {
        self.mmu.lock().is_accessed(self.va)
    }

    pub(crate) fn clear_accessed(&self) {
        self.mmu.lock().set_accessed(self.va, false);
    }

    /// Fills `frame` with the contents of this page.
    ///
    /// Uninitialized pages are materialized, all other pages are read back from
    /// their backing store.
    pub(crate) fn swap_in<D: BlockDeviceModule>(
        &self,
        state: &mut PageState,
        frame: &mut [u8],
        swap: &SwapStore<D>,
    ) -> VmResult<()> {
        trace!("Swap in {} page at {:#x}", state.kind.name(), self.va);

        match &mut state.kind {
            PageKind::Uninit(uninit) => {
                // stays uninitialized if the initializer fails
                let kind = uninit.materialize(frame)?;
                state.kind = kind;
                Ok(())
            }
            PageKind::Anonymous(anon) => anon.swap_in(frame, swap),
            PageKind::FileBacked(file) => file.swap_in(frame),
        }
    }

    /// Saves the contents of `frame` to the backing store of this page, removes
    /// the mapping and detaches the frame from the page.
    ///
    /// Removing this page from the sharer list of its frame is up to the caller.
    pub(crate) fn swap_out<D: BlockDeviceModule>(
        &self,
        state: &mut PageState,
        frame: &[u8],
        swap: &SwapStore<D>,
    ) -> VmResult<()> {
        trace!("Swap out {} page at {:#x}", state.kind.name(), self.va);

        match &mut state.kind {
            PageKind::Uninit(_) => {
                debug_assert!(false, "resident page is still uninitialized");
            }
            PageKind::Anonymous(anon) => anon.swap_out(frame, swap)?,
            PageKind::FileBacked(file) => {
                let dirty = self.mmu.lock().is_dirty(self.va);
                if dirty && self.writable {
                    file.write_back(frame)?;
                    self.mmu.lock().set_dirty(self.va, false);
                }
            }
        }

        self.mmu.lock().unmap(self.va);
        state.frame = None;
        Ok(())
    }

    /// Releases backing specific data of this page.
    ///
    /// The frame has to be released before by the caller.
    pub(crate) fn destroy<D: BlockDeviceModule>(&self, state: &mut PageState, swap: &SwapStore<D>) {
        debug_assert!(state.frame.is_none(), "destroying a page that is still resident");
        if let PageKind::Anonymous(anon) = &mut state.kind {
            anon.destroy(swap);
        }
    }

    /// Creates the backing of a copy of this page for another address space.
    ///
    /// File handles are reopened, so that every copy can be closed independently.
    /// Anonymous pages have to be resident, their contents are shared through the frame.
    pub(crate) fn duplicate_kind(state: &PageState) -> VmResult<PageKind> {
        match &state.kind {
            PageKind::Uninit(uninit) => Ok(PageKind::Uninit(uninit.duplicate()?)),
            PageKind::Anonymous(anon) => {
                debug_assert!(
                    state.frame.is_some() || !anon.is_swapped_out(),
                    "swapped out anonymous pages can not be duplicated"
                );
                Ok(PageKind::Anonymous(AnonPage::new()))
            }
            PageKind::FileBacked(file) => Ok(PageKind::FileBacked(file.duplicate()?)),
        }
    }
}
