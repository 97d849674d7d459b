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

use log::{debug, trace, warn};

use crate::{
    address_space::AddressSpace,
    frame_table::{FrameId, FrameTable},
    modules::{
        block_device::BlockDeviceModule, frame_allocator::FrameAllocatorModule,
        page_table::PageTableModule,
    },
    page::{Page, PageInit, PageRef, VmType},
    util::page_round_down,
    VirtAddr, VmError, VmResult, PAGE_SIZE,
};

/// A page fault as reported by the trap handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// Faulting address
    pub addr: VirtAddr,
    /// Fault was raised in user mode
    pub user: bool,
    /// Fault was caused by a write access
    pub write: bool,
    /// The page was not present (otherwise it was a protection violation)
    pub not_present: bool,
    /// Stack pointer at the time of the fault (only meaningful for user faults)
    pub rsp: VirtAddr,
}

impl<A: FrameAllocatorModule, D: BlockDeviceModule, P: PageTableModule> AddressSpace<A, D, P> {
    /// Tries to resolve `fault`.
    ///
    /// Returns `false` if the fault is fatal for the process.
    pub fn try_handle_fault(&self, fault: PageFault) -> bool {
        match self.handle_fault(fault) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "Unresolved fault at {:#x} in {} (user: {}, write: {}, not present: {}): {}",
                    fault.addr, self.id, fault.user, fault.write, fault.not_present, err
                );
                false
            }
        }
    }

    /// Resolves `fault` by growing the stack, loading the page or breaking
    /// copy-on-write sharing.
    pub fn handle_fault(&self, fault: PageFault) -> VmResult<()> {
        trace!(
            "Fault at {:#x} in {} (user: {}, write: {}, not present: {})",
            fault.addr,
            self.id,
            fault.user,
            fault.write,
            fault.not_present
        );

        if !self.vm.config().is_user_address(fault.addr) {
            return Err(VmError::KernelAddress);
        }
        if fault.addr == 0 {
            return Err(VmError::NullAddress);
        }

        // kernel faults on user memory use the stack pointer saved on entry
        let rsp = if fault.user {
            fault.rsp
        } else {
            self.user_rsp()
        };
        if self.is_stack_growth(fault.addr, rsp) {
            self.grow_stack(fault.addr)?;
        }

        let page = self.spt.lock().find(fault.addr).ok_or(VmError::NotFound)?;
        if fault.write && !page.writable() {
            return Err(VmError::ReadOnly);
        }

        let _copy = if fault.write {
            Some(self.vm.copy_lock.lock())
        } else {
            None
        };
        let mut frames = self.vm.frames.lock();
        let frame = page.state.lock().frame;

        // `not_present` is not consulted: the page may have been evicted or
        // claimed by another fault since the trap, only its current state counts
        match frame {
            None => self.vm.claim_locked(&mut frames, &page),
            Some(_) if !fault.write => Ok(()),
            Some(id) => {
                let shared = frames.get(id).map_or(0, |frame| frame.share_count()) > 1;
                if shared {
                    self.break_cow(&mut frames, &page, id)
                } else {
                    self.make_writable(&page)
                }
            }
        }
    }

    /// Is `addr` a valid access to the not yet registered part of the stack?
    fn is_stack_growth(&self, addr: VirtAddr, rsp: VirtAddr) -> bool {
        let config = self.vm.config();
        addr >= config.stack_floor()
            && addr < self.stack_bottom()
            && addr.saturating_add(config.stack_slack) >= rsp
    }

    /// Registers zeroed stack pages from the current bottom down to `addr`
    fn grow_stack(&self, addr: VirtAddr) -> VmResult<()> {
        let new_bottom = page_round_down(addr);
        let mut spt = self.spt.lock();
        let bottom = self.stack_bottom();
        if new_bottom >= bottom {
            // grown by someone else in the meantime
            return Ok(());
        }

        debug!(
            "Grow stack of {} from {:#x} down to {:#x}",
            self.id, bottom, new_bottom
        );

        let mut va = bottom;
        while va > new_bottom {
            va -= PAGE_SIZE;
            let page = Page::new(
                va,
                true,
                self.id,
                self.mmu.clone(),
                VmType::Anonymous,
                PageInit::Zero,
            );
            match spt.insert(page) {
                Ok(()) | Err(VmError::DuplicatePage) => {}
                Err(err) => return Err(err),
            }
        }

        self.stack_bottom.store(new_bottom, Ordering::Release);
        Ok(())
    }

    /// Gives `page` a private, writable copy of its shared frame `old`
    fn break_cow(&self, frames: &mut FrameTable<P>, page: &PageRef<P>, old: FrameId) -> VmResult<()> {
        let Some(frame) = frames.get_mut(old) else {
            return Err(VmError::NotFound);
        };
        let old_phys = frame.phys();

        // keep the shared frame from being evicted while a new one is acquired
        let owner = frame.owner();
        frame.set_owner(None);
        let acquired = self.vm.acquire(frames);
        if let Some(frame) = frames.get_mut(old) {
            frame.set_owner(owner);
        }
        let new = acquired?;
        let Some(new_phys) = frames.get(new).map(|frame| frame.phys()) else {
            return Err(VmError::OutOfFrames);
        };

        let mut state = page.state.lock();
        self.vm.memory.lock().copy_frame(old_phys, new_phys);

        {
            let mut mmu = self.mmu.lock();
            let dirty = mmu.is_dirty(page.va());
            mmu.unmap(page.va());
            if !mmu.map(page.va(), new_phys, true) {
                mmu.map(page.va(), old_phys, false);
                drop(mmu);
                drop(state);
                if let Some(phys) = frames.remove(new) {
                    self.vm.memory.lock().free_user_frame(phys);
                }
                return Err(VmError::MapFailed);
            }
            mmu.set_dirty(page.va(), dirty);
        }

        frames.detach(old, page);
        state.frame = Some(new);
        drop(state);
        frames.attach(new, page.clone());

        trace!(
            "Copied shared frame {} into frame {} for {:#x} in {}",
            old,
            new,
            page.va(),
            self.id
        );
        Ok(())
    }

    /// Upgrades the mapping of a writable page whose frame is not shared anymore
    fn make_writable(&self, page: &Page<P>) -> VmResult<()> {
        let mut mmu = self.mmu.lock();
        if mmu.is_writable(page.va()) {
            return Ok(());
        }

        trace!("Upgrade {:#x} in {} to writable", page.va(), self.id);
        if mmu.remap(page.va(), true) {
            Ok(())
        } else {
            Err(VmError::MapFailed)
        }
    }
}

#[cfg(test)]
mod test {
    use super::PageFault;
    use crate::{
        test::{test_vm, TestAddressSpace},
        PageInit, VmError, VmType, PAGE_SIZE,
    };

    fn fault(addr: usize, write: bool) -> PageFault {
        PageFault {
            addr,
            user: true,
            write,
            not_present: true,
            rsp: 0,
        }
    }

    #[test]
    fn test_fault_rejections() {
        let vm = test_vm("test_fault_rejections", 4, 4);
        let space = TestAddressSpace::new(&vm);

        assert_eq!(
            space.handle_fault(fault(vm.config().kernel_base + 8, false)),
            Err(VmError::KernelAddress)
        );
        assert_eq!(space.handle_fault(fault(0, false)), Err(VmError::NullAddress));
        assert_eq!(space.handle_fault(fault(0x1000, false)), Err(VmError::NotFound));
        assert!(!space.try_handle_fault(fault(0x1000, false)));

        space
            .alloc_page(VmType::Anonymous, 0x1000, false, PageInit::Zero)
            .unwrap();
        assert_eq!(space.handle_fault(fault(0x1000, true)), Err(VmError::ReadOnly));
        assert!(space.try_handle_fault(fault(0x1010, false)));
        assert!(space.is_resident(0x1000));
        assert!(!space.is_mapped_writable(0x1000));
    }

    #[test]
    fn test_spurious_fault() {
        let vm = test_vm("test_spurious_fault", 4, 4);
        let space = TestAddressSpace::new(&vm);
        space
            .alloc_page(VmType::Anonymous, 2 * PAGE_SIZE, true, PageInit::Zero)
            .unwrap();

        assert!(space.try_handle_fault(fault(2 * PAGE_SIZE, false)));
        // page is resident already, nothing happens
        assert!(space.try_handle_fault(fault(2 * PAGE_SIZE, false)));
        assert!(space.try_handle_fault(fault(2 * PAGE_SIZE, true)));
        assert_eq!(vm.resident_frames(), 1);
        assert!(space.is_mapped_writable(2 * PAGE_SIZE));
    }

    #[test]
    fn test_stale_fault_flags() {
        let vm = test_vm("test_stale_fault_flags", 1, 4);
        let space = TestAddressSpace::new(&vm);
        for va in [PAGE_SIZE, 2 * PAGE_SIZE] {
            space
                .alloc_page(VmType::Anonymous, va, true, PageInit::Zero)
                .unwrap();
        }
        space.write_user(PAGE_SIZE, &[7]).unwrap();

        // evicted between the trap and the fault handler
        space.write_user(2 * PAGE_SIZE, &[8]).unwrap();
        assert!(!space.is_resident(PAGE_SIZE));
        let protection = PageFault {
            not_present: false,
            ..fault(PAGE_SIZE, false)
        };
        assert_eq!(space.handle_fault(protection), Ok(()));
        assert!(space.is_resident(PAGE_SIZE));

        // claimed by another fault in the meantime
        assert_eq!(space.handle_fault(fault(PAGE_SIZE, false)), Ok(()));
        assert_eq!(vm.resident_frames(), 1);

        let mut buf = [0u8];
        space.read_user(PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(buf, [7]);
    }
}
