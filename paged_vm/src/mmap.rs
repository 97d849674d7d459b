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

use log::{debug, trace};

use crate::{
    address_space::AddressSpace,
    modules::{
        block_device::BlockDeviceModule, file::FileHandle, frame_allocator::FrameAllocatorModule,
        page_table::PageTableModule,
    },
    page::{FileSegment, Page, PageInit, VmType},
    util::{div_ceil, is_page_aligned},
    VirtAddr, VmError, VmResult, PAGE_SIZE,
};

/// A live memory mapped region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mapping {
    pub(crate) page_count: usize,
}

impl<A: FrameAllocatorModule, D: BlockDeviceModule, P: PageTableModule> AddressSpace<A, D, P> {
    /// Maps `length` bytes of `file` starting at `offset` to `addr`.
    ///
    /// The pages are loaded lazily. Bytes past the end of the file read as
    /// zero and are never written back. The mapping uses its own handle of the
    /// file, so it stays valid after `file` is closed.
    pub fn mmap(
        &self,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &FileHandle,
        offset: usize,
    ) -> VmResult<VirtAddr> {
        if addr == 0 {
            return Err(VmError::NullAddress);
        }
        if length == 0 || !is_page_aligned(addr) || !is_page_aligned(offset) {
            return Err(VmError::InvalidArgument);
        }

        let page_count = div_ceil(length, PAGE_SIZE);
        let end = page_count
            .checked_mul(PAGE_SIZE)
            .and_then(|size| addr.checked_add(size))
            .ok_or(VmError::KernelAddress)?;
        if !self.vm.config().is_user_address(end - 1) {
            return Err(VmError::KernelAddress);
        }

        let file_length = file.length();
        if file_length == 0 {
            return Err(VmError::InvalidArgument);
        }

        let mut spt = self.spt.lock();
        if (0..page_count).any(|i| spt.contains(addr + i * PAGE_SIZE)) {
            return Err(VmError::Overlap);
        }

        let file = file.reopen().ok_or(VmError::FileReopen)?;
        for i in 0..page_count {
            let page_offset = offset + i * PAGE_SIZE;
            let read_bytes = PAGE_SIZE
                .min(length - i * PAGE_SIZE)
                .min(file_length.saturating_sub(page_offset));

            let segment = FileSegment::new(file.clone(), page_offset, read_bytes);
            let page = Page::new(
                addr + i * PAGE_SIZE,
                writable,
                self.id,
                self.mmu.clone(),
                VmType::FileBacked(segment.clone()),
                PageInit::Segment(segment),
            );
            spt.insert(page)?;
            trace!(
                "Mapped page {:#x} to file offset {} ({} bytes)",
                addr + i * PAGE_SIZE,
                page_offset,
                read_bytes
            );
        }

        self.mappings.lock().insert(addr, Mapping { page_count });
        debug!(
            "Mapped {} bytes at file offset {} to {:#x} in {}",
            length, offset, addr, self.id
        );
        Ok(addr)
    }

    /// Removes the mapping starting at `addr`.
    ///
    /// Dirty pages are written back to the file first. Does nothing if `addr`
    /// is not the base address of a live mapping.
    pub fn munmap(&self, addr: VirtAddr) {
        let Some(mapping) = self.mappings.lock().remove(&addr) else {
            trace!("No mapping at {:#x} in {}", addr, self.id);
            return;
        };

        debug!(
            "Unmap {} pages at {:#x} in {}",
            mapping.page_count, addr, self.id
        );
        let mut spt = self.spt.lock();
        for i in 0..mapping.page_count {
            if let Some(page) = spt.remove(addr + i * PAGE_SIZE) {
                self.vm.destroy_page(&page);
            }
        }
    }
}
