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

use core::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, trace, warn};

use crate::{
    address_space::ContextId,
    frame_table::{Detached, FrameId, FrameInfo, FrameTable},
    modules::{
        block_device::BlockDeviceModule, frame_allocator::FrameAllocatorModule,
        page_table::PageTableModule,
    },
    page::{Page, PageKind, PageRef, PageState},
    swap::SwapStore,
    util::shared_lock::SharedLock,
    VmConfig, VmError, VmResult,
};

/// The process wide part of the virtual memory core.
///
/// Owns the physical frames of the user pool, the frame table shared by all
/// address spaces and the swap store. Address spaces hold an `Arc` of it.
pub struct Vm<A: FrameAllocatorModule, D: BlockDeviceModule, P: PageTableModule> {
    pub(crate) frames: SharedLock<FrameTable<P>>,
    pub(crate) memory: SharedLock<A>,
    pub(crate) swap: SwapStore<D>,

    /// Serializes copy-on-write breaks and fork
    pub(crate) copy_lock: SharedLock<()>,

    config: VmConfig,
    next_context: AtomicUsize,
}

impl<A: FrameAllocatorModule, D: BlockDeviceModule, P: PageTableModule> Vm<A, D, P> {
    pub fn new(allocator: A, swap_device: D, config: VmConfig) -> VmResult<Self> {
        if !config.validate() {
            return Err(VmError::InvalidArgument);
        }

        let swap = SwapStore::new(swap_device);
        info!(
            "Created vm with {} frames and {} swap slots",
            allocator.frame_count(),
            swap.slot_count()
        );

        Ok(Self {
            frames: SharedLock::new(FrameTable::new()),
            memory: SharedLock::new(allocator),
            swap,
            copy_lock: SharedLock::new(()),
            config,
            next_context: AtomicUsize::new(1),
        })
    }

    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub(crate) fn next_context_id(&self) -> ContextId {
        ContextId(self.next_context.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of frames currently backing user pages
    pub fn resident_frames(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn used_swap_slots(&self) -> usize {
        self.swap.used_slots()
    }

    pub fn swap_slot_count(&self) -> usize {
        self.swap.slot_count()
    }

    /// Snapshot of every frame and the pages sharing it
    pub fn frame_snapshot(&self) -> Vec<FrameInfo> {
        self.frames.lock().snapshot()
    }

    /// Checks that the frame table and the page tables agree with each other.
    ///
    /// Every sharer has to point back to its frame and has to be mapped to
    /// the physical address of the frame.
    pub fn check_integrity(&self) -> bool {
        let frames = self.frames.lock();
        if !frames.check_integrity() {
            return false;
        }

        let mapped = frames.iter().all(|(_, frame)| {
            frame
                .sharers()
                .iter()
                .all(|page| page.mmu().lock().lookup(page.va()) == Some(frame.phys()))
        });
        mapped
    }

    /// Gets a frame for a new page, evicting another one if the pool is exhausted.
    ///
    /// The returned frame has no sharers and no owner yet.
    pub(crate) fn acquire(&self, frames: &mut FrameTable<P>) -> VmResult<FrameId> {
        let phys = self.memory.lock().alloc_user_frame();
        if let Some(phys) = phys {
            let id = frames.insert(phys);
            trace!("Allocated frame {} at {:#x}", id, phys);
            return Ok(id);
        }

        // one more victim is tried if the first one can not be swapped out
        let mut result = Err(VmError::OutOfFrames);
        for _ in 0..2 {
            let Some(victim) = frames.select_victim() else {
                break;
            };

            result = self.evict(frames, victim).map(|_| victim);
            if !matches!(result, Err(VmError::SwapFull)) {
                break;
            }
        }

        if let Err(err) = result {
            warn!("Could not get a frame: {}", err);
        }
        result
    }

    /// Swaps out every page sharing frame `id`, the frame stays in the table
    /// without sharers and can be reused.
    fn evict(&self, frames: &mut FrameTable<P>, id: FrameId) -> VmResult<()> {
        let frame = frames.get_mut(id).ok_or(VmError::OutOfFrames)?;
        let owner = frame.owner();
        frame.set_owner(None);

        let anon_sharers = frame
            .sharers()
            .iter()
            .filter(|page| matches!(page.state.lock().kind, PageKind::Anonymous(_)))
            .count();
        if self.swap.free_slots() < anon_sharers {
            frame.set_owner(owner);
            return Err(VmError::SwapFull);
        }

        let phys = frame.phys();
        let sharers = frame.take_sharers();
        debug!(
            "Evict frame {} at {:#x} with {} sharer(s)",
            id,
            phys,
            sharers.len()
        );

        let failed = sharers.iter().enumerate().find_map(|(i, page)| {
            let mut state = page.state.lock();
            let memory = self.memory.lock();
            let saved = page.swap_out(&mut state, memory.frame(phys), &self.swap);
            saved.err().map(|err| (i, err))
        });

        if let Some((i, err)) = failed {
            // pages that could not be saved stay resident
            for page in sharers.into_iter().skip(i) {
                frames.attach(id, page);
            }
            return Err(err);
        }

        Ok(())
    }

    /// Backs `page` with a frame and loads its contents.
    ///
    /// Nothing changes if the page fails to load.
    pub(crate) fn claim_locked(&self, frames: &mut FrameTable<P>, page: &PageRef<P>) -> VmResult<()> {
        if page.state.lock().frame.is_some() {
            return Ok(());
        }

        let id = self.acquire(frames)?;
        let Some(phys) = frames.get(id).map(|frame| frame.phys()) else {
            return Err(VmError::OutOfFrames);
        };

        let mut state = page.state.lock();
        if !page.mmu().lock().map(page.va(), phys, page.writable()) {
            drop(state);
            self.free_frame(frames, id);
            return Err(VmError::MapFailed);
        }

        let loaded = {
            let mut memory = self.memory.lock();
            page.swap_in(&mut state, memory.frame_mut(phys), &self.swap)
        };
        if let Err(err) = loaded {
            page.mmu().lock().unmap(page.va());
            drop(state);
            self.free_frame(frames, id);
            return Err(err);
        }

        state.frame = Some(id);
        drop(state);

        frames.attach(id, page.clone());
        trace!("Claimed page {:#x} with frame {}", page.va(), id);
        Ok(())
    }

    pub(crate) fn claim(&self, page: &PageRef<P>) -> VmResult<()> {
        let mut frames = self.frames.lock();
        self.claim_locked(&mut frames, page)
    }

    /// Hands an unused frame back to the allocator
    fn free_frame(&self, frames: &mut FrameTable<P>, id: FrameId) {
        if let Some(phys) = frames.remove(id) {
            self.memory.lock().free_user_frame(phys);
        }
    }

    /// Unmaps `page` and removes it from its frame.
    /// The frame is freed once its last sharer is gone.
    pub(crate) fn release_locked(&self, frames: &mut FrameTable<P>, page: &Page<P>, state: &mut PageState) {
        let Some(id) = state.frame.take() else {
            return;
        };

        page.mmu().lock().unmap(page.va());
        if let Detached::Freed(phys) = frames.detach(id, page) {
            self.memory.lock().free_user_frame(phys);
        }
    }

    /// Removes `page` for good.
    ///
    /// Dirty contents of writable file-backed pages are written back before
    /// the frame is released, swap slots of anonymous pages are freed.
    pub(crate) fn destroy_page(&self, page: &PageRef<P>) {
        let mut frames = self.frames.lock();
        let mut state = page.state.lock();

        if let (Some(id), PageKind::FileBacked(file)) = (state.frame, &mut state.kind) {
            let dirty = page.mmu().lock().is_dirty(page.va());
            if dirty && page.writable() {
                if let Some(frame) = frames.get(id) {
                    let memory = self.memory.lock();
                    if let Err(err) = file.write_back(memory.frame(frame.phys())) {
                        warn!("Write back of page {:#x} failed: {}", page.va(), err);
                    }
                }
            }
        }

        self.release_locked(&mut frames, page, &mut state);
        page.destroy(&mut state, &self.swap);
    }
}
