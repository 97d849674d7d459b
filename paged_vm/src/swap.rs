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

use log::trace;

use crate::{
    modules::block_device::{BlockDeviceModule, BlockSector},
    util::{bit_array::BitArray, shared_lock::SharedLock},
    VmError, VmResult, PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE,
};

/// Index of a page sized slot on the swap device
pub(crate) type SwapSlot = usize;

/// The swap device together with the bitmap of used slots.
///
/// Slot `i` occupies the sectors `i * 8 .. i * 8 + 8`, each sector holding
/// 512 consecutive bytes of the page.
pub(crate) struct SwapStore<D: BlockDeviceModule> {
    device: SharedLock<D>,
    slots: SharedLock<BitArray>,
}

impl<D: BlockDeviceModule> SwapStore<D> {
    pub(crate) fn new(device: D) -> Self {
        let slot_count = device.sector_count() as usize / SECTORS_PER_PAGE;

        Self {
            device: SharedLock::new(device),
            slots: SharedLock::new(BitArray::new(slot_count)),
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    pub(crate) fn used_slots(&self) -> usize {
        self.slots.lock().count_set()
    }

    pub(crate) fn free_slots(&self) -> usize {
        let slots = self.slots.lock();
        slots.len() - slots.count_set()
    }

    /// Marks a free slot as used and returns it
    pub(crate) fn allocate(&self) -> VmResult<SwapSlot> {
        self.slots.lock().scan_and_set().ok_or(VmError::SwapFull)
    }

    pub(crate) fn free(&self, slot: SwapSlot) {
        let mut slots = self.slots.lock();
        debug_assert!(slots.is_set(slot), "swap slot {} is not in use", slot);
        slots.set(false, slot);
    }

    #[inline]
    fn first_sector(slot: SwapSlot) -> BlockSector {
        (slot * SECTORS_PER_PAGE) as BlockSector
    }

    /// Writes the page `src` into `slot`
    pub(crate) fn write_slot(&self, slot: SwapSlot, src: &[u8]) -> VmResult<()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        trace!("Write page to swap slot {}", slot);

        let mut device = self.device.lock();
        for (i, chunk) in src.chunks_exact(SECTOR_SIZE).enumerate() {
            device
                .write_sector(Self::first_sector(slot) + i as BlockSector, chunk)
                .map_err(|_| VmError::SwapIo)?;
        }

        Ok(())
    }

    /// Reads the page stored in `slot` into `dest`
    pub(crate) fn read_slot(&self, slot: SwapSlot, dest: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(dest.len(), PAGE_SIZE);
        trace!("Read page from swap slot {}", slot);

        let mut device = self.device.lock();
        for (i, chunk) in dest.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            device
                .read_sector(Self::first_sector(slot) + i as BlockSector, chunk)
                .map_err(|_| VmError::SwapIo)?;
        }

        Ok(())
    }
}
