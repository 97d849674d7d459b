use super::FrameAllocatorModule;
use crate::{util::bit_array::BitArray, PhysAddr, PAGE_SIZE};

/// Frame allocator managing a fixed pool of frames in ordinary memory.
///
/// Physical addresses start at [`PoolFrameAllocator::PHYS_BASE`], so
/// no frame ever has the address 0.
pub struct PoolFrameAllocator {
    memory: Box<[u8]>,
    used: BitArray,
}

impl PoolFrameAllocator {
    pub const PHYS_BASE: PhysAddr = 0x10_0000;

    pub fn new(frame_count: usize) -> Self {
        Self {
            memory: vec![0u8; frame_count * PAGE_SIZE].into_boxed_slice(),
            used: BitArray::new(frame_count),
        }
    }

    /// Number of frames currently handed out
    pub fn used_count(&self) -> usize {
        self.used.count_set()
    }

    fn index_of(&self, phys: PhysAddr) -> usize {
        debug_assert!(phys >= Self::PHYS_BASE && (phys - Self::PHYS_BASE) % PAGE_SIZE == 0);
        let index = (phys - Self::PHYS_BASE) / PAGE_SIZE;
        debug_assert!(
            index < self.used.len() && self.used.is_set(index),
            "frame {:#x} is not allocated",
            phys
        );
        index
    }
}

impl FrameAllocatorModule for PoolFrameAllocator {
    fn alloc_user_frame(&mut self) -> Option<PhysAddr> {
        let index = self.used.scan_and_set()?;
        Some(Self::PHYS_BASE + index * PAGE_SIZE)
    }

    fn free_user_frame(&mut self, phys: PhysAddr) {
        let index = self.index_of(phys);
        self.used.set(false, index);
    }

    fn frame(&self, phys: PhysAddr) -> &[u8] {
        let start = self.index_of(phys) * PAGE_SIZE;
        &self.memory[start..start + PAGE_SIZE]
    }

    fn frame_mut(&mut self, phys: PhysAddr) -> &mut [u8] {
        let start = self.index_of(phys) * PAGE_SIZE;
        &mut self.memory[start..start + PAGE_SIZE]
    }

    fn frame_count(&self) -> usize {
        self.used.len()
    }

    fn copy_frame(&mut self, src: PhysAddr, dst: PhysAddr) {
        let src = self.index_of(src) * PAGE_SIZE;
        let dst = self.index_of(dst) * PAGE_SIZE;
        self.memory.copy_within(src..src + PAGE_SIZE, dst);
    }
}
