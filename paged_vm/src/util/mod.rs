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

pub(crate) mod bit_array;
pub(crate) mod shared_lock;

use crate::{VirtAddr, PAGE_SIZE};

/// Rounds `addr` down to the start of its page
#[inline]
pub(crate) const fn page_round_down(addr: VirtAddr) -> VirtAddr {
    addr & !(PAGE_SIZE - 1)
}

/// Offset of `addr` inside of its page
#[inline]
pub(crate) const fn page_offset(addr: VirtAddr) -> usize {
    addr & (PAGE_SIZE - 1)
}

#[inline]
pub(crate) const fn is_page_aligned(addr: VirtAddr) -> bool {
    page_offset(addr) == 0
}

/// efficient way to calculate: ceil(x / y)
#[inline]
pub(crate) const fn div_ceil(num: usize, div: usize) -> usize {
    (num + div - 1) / div
}
