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

use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::{collections::BTreeMap, sync::Arc};

use log::{debug, trace};

use crate::{
    fault::PageFault,
    mmap::Mapping,
    modules::{
        block_device::BlockDeviceModule, frame_allocator::FrameAllocatorModule,
        page_table::PageTableModule,
    },
    page::{Mmu, Page, PageInit, VmType},
    spt::SupplementalPageTable,
    util::{is_page_aligned, page_offset, page_round_down, shared_lock::SharedLock},
    Vm, VirtAddr, VmError, VmResult, PAGE_SIZE,
};

/// How often a simulated access faults before giving up
const MAX_ACCESS_FAULTS: usize = 64;

/// Identifies the address space (execution context) a page belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) usize);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Virtual address space of one process.
///
/// Owns the page table, the supplemental page table, the stack bounds and
/// the memory mapped regions of the process. Dropping it releases all pages.
pub struct AddressSpace<A: FrameAllocatorModule, D: BlockDeviceModule, P: PageTableModule> {
    pub(crate) id: ContextId,
    pub(crate) vm: Arc<Vm<A, D, P>>,
    pub(crate) mmu: Mmu<P>,
    pub(crate) spt: SharedLock<SupplementalPageTable<P>>,

    /// Lowest page of the stack registered so far
    pub(crate) stack_bottom: AtomicUsize,

    /// User stack pointer saved on the last switch into the kernel
    pub(crate) user_rsp: AtomicUsize,

    /// Live mmap regions by base address
    pub(crate) mappings: SharedLock<BTreeMap<VirtAddr, Mapping>>,
}

impl<A: FrameAllocatorModule, D: BlockDeviceModule, P: PageTableModule> AddressSpace<A, D, P> {
    /// Creates an empty address space
    pub fn new(vm: &Arc<Vm<A, D, P>>) -> Self {
        let id = vm.next_context_id();
        let stack_top = vm.config().user_stack_top;
        debug!("Create address space {}", id);

        Self {
            id,
            vm: vm.clone(),
            mmu: Arc::new(SharedLock::new(P::new())),
            spt: SharedLock::new(SupplementalPageTable::new()),
            stack_bottom: AtomicUsize::new(stack_top),
            user_rsp: AtomicUsize::new(stack_top),
            mappings: SharedLock::new(BTreeMap::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[inline]
    pub fn vm(&self) -> &Arc<Vm<A, D, P>> {
        &self.vm
    }

    pub fn stack_bottom(&self) -> VirtAddr {
        self.stack_bottom.load(Ordering::Acquire)
    }

    pub fn user_rsp(&self) -> VirtAddr {
        self.user_rsp.load(Ordering::Acquire)
    }

    /// Saves the user stack pointer, called on every entry into the kernel
    pub fn set_user_rsp(&self, rsp: VirtAddr) {
        self.user_rsp.store(rsp, Ordering::Release);
    }

    /// Number of registered pages
    pub fn page_count(&self) -> usize {
        self.spt.lock().len()
    }

    /// Addresses of all registered pages in ascending order
    pub fn page_addresses(&self) -> Vec<VirtAddr> {
        self.spt.lock().addresses()
    }

    /// Is there a page registered that contains `addr`?
    pub fn is_registered(&self, addr: VirtAddr) -> bool {
        self.spt.lock().contains(addr)
    }

    /// Is the page containing `addr` backed by a frame right now?
    pub fn is_resident(&self, addr: VirtAddr) -> bool {
        let Some(page) = self.spt.lock().find(addr) else {
            return false;
        };
        let _frames = self.vm.frames.lock();
        let resident = page.state.lock().frame.is_some();
        resident
    }

    /// Number of pages sharing the frame of the page containing `addr`
    pub fn share_count(&self, addr: VirtAddr) -> Option<usize> {
        let page = self.spt.lock().find(addr)?;
        let frames = self.vm.frames.lock();
        let id = page.state.lock().frame?;
        frames.get(id).map(|frame| frame.share_count())
    }

    /// Is the page containing `addr` mapped writable in the page table?
    pub fn is_mapped_writable(&self, addr: VirtAddr) -> bool {
        self.mmu.lock().is_writable(page_round_down(addr))
    }

    /// Registers a new page at `va` that is initialized by `init` on its first fault
    pub fn alloc_page(
        &self,
        vm_type: VmType,
        va: VirtAddr,
        writable: bool,
        init: PageInit,
    ) -> VmResult<()> {
        if va == 0 {
            return Err(VmError::NullAddress);
        }
        if !is_page_aligned(va) {
            return Err(VmError::InvalidArgument);
        }
        if !self.vm.config().is_user_address(va) {
            return Err(VmError::KernelAddress);
        }

        let page = Page::new(va, writable, self.id, self.mmu.clone(), vm_type, init);
        self.spt.lock().insert(page)
    }

    /// Backs the page containing `va` with a frame right away
    pub fn claim_page(&self, va: VirtAddr) -> VmResult<()> {
        let page = self.spt.lock().find(va).ok_or(VmError::NotFound)?;
        self.vm.claim(&page)
    }

    /// Registers and claims the first stack page below the stack top.
    ///
    /// Returns the initial stack pointer.
    pub fn setup_stack(&self) -> VmResult<VirtAddr> {
        let top = self.vm.config().user_stack_top;
        let bottom = top - PAGE_SIZE;

        self.alloc_page(VmType::Anonymous, bottom, true, PageInit::Zero)?;
        self.claim_page(bottom)?;

        self.stack_bottom.store(bottom, Ordering::Release);
        self.set_user_rsp(top);
        debug!("Stack of {} set up at {:#x}", self.id, bottom);
        Ok(top)
    }

    /// Reads `buf.len()` bytes at `addr` the way the process would.
    ///
    /// Accesses set the accessed bit and fault like the hardware does, the
    /// saved user stack pointer is used for stack growth decisions.
    pub fn read_user(&self, addr: VirtAddr, buf: &mut [u8]) -> VmResult<()> {
        let end = addr.checked_add(buf.len()).ok_or(VmError::InvalidArgument)?;
        let mut cur = addr;

        while cur < end {
            let offset = page_offset(cur);
            let count = (PAGE_SIZE - offset).min(end - cur);
            let dest = &mut buf[cur - addr..cur - addr + count];

            self.access_page(cur, false, |frame| {
                dest.copy_from_slice(&frame[offset..offset + count])
            })?;
            cur += count;
        }

        Ok(())
    }

    /// Writes `data` at `addr` the way the process would.
    /// Sets the accessed and dirty bits of every touched page.
    pub fn write_user(&self, addr: VirtAddr, data: &[u8]) -> VmResult<()> {
        let end = addr.checked_add(data.len()).ok_or(VmError::InvalidArgument)?;
        let mut cur = addr;

        while cur < end {
            let offset = page_offset(cur);
            let count = (PAGE_SIZE - offset).min(end - cur);
            let src = &data[cur - addr..cur - addr + count];

            self.access_page(cur, true, |frame| {
                frame[offset..offset + count].copy_from_slice(src)
            })?;
            cur += count;
        }

        Ok(())
    }

    /// Translates `addr` and runs `f` on the frame it is mapped to.
    /// Faults and tries again if the translation fails.
    fn access_page<F: FnOnce(&mut [u8])>(&self, addr: VirtAddr, write: bool, f: F) -> VmResult<()> {
        let va = page_round_down(addr);

        for _ in 0..MAX_ACCESS_FAULTS {
            let not_present = {
                // no eviction while the frame is accessed
                let _frames = self.vm.frames.lock();
                let mut memory = self.vm.memory.lock();
                let mut mmu = self.mmu.lock();

                match mmu.lookup(va) {
                    Some(phys) if !write || mmu.is_writable(va) => {
                        mmu.set_accessed(va, true);
                        if write {
                            mmu.set_dirty(va, true);
                        }
                        drop(mmu);

                        f(memory.frame_mut(phys));
                        return Ok(());
                    }
                    Some(_) => false,
                    None => true,
                }
            };

            trace!(
                "Access to {:#x} (write: {}) faults in {}",
                addr,
                write,
                self.id
            );
            self.handle_fault(PageFault {
                addr,
                user: true,
                write,
                not_present,
                rsp: self.user_rsp(),
            })?;
        }

        Err(VmError::OutOfFrames)
    }

    /// Releases every page of this address space.
    ///
    /// Memory mapped regions are unmapped first, so dirty file contents reach
    /// their files. Calling this more than once does nothing.
    pub fn teardown(&self) {
        let bases: Vec<_> = self.mappings.lock().keys().copied().collect();
        for base in bases {
            self.munmap(base);
        }

        let pages = self.spt.lock().drain();
        if pages.is_empty() {
            return;
        }

        debug!("Tear down {} pages of {}", pages.len(), self.id);
        for page in pages.iter() {
            self.vm.destroy_page(page);
        }
    }
}

impl<A: FrameAllocatorModule, D: BlockDeviceModule, P: PageTableModule> Drop
    for AddressSpace<A, D, P>
{
    fn drop(&mut self) {
        self.teardown();
    }
}
