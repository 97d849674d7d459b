mod pool;

pub use pool::PoolFrameAllocator;

use crate::{PhysAddr, PAGE_SIZE};

/// The physical page allocator of the user pool.
///
/// Frames are always exactly [`PAGE_SIZE`] bytes big and page aligned.
pub trait FrameAllocatorModule: Send + 'static {
    /// Allocates a single frame, returns `None` if the pool is exhausted
    fn alloc_user_frame(&mut self) -> Option<PhysAddr>;

    /// Returns the frame at `phys` back to the pool
    fn free_user_frame(&mut self, phys: PhysAddr);

    /// Contents of the allocated frame at `phys`
    fn frame(&self, phys: PhysAddr) -> &[u8];

    /// Mutable contents of the allocated frame at `phys`
    fn frame_mut(&mut self, phys: PhysAddr) -> &mut [u8];

    /// Total number of frames in the pool
    fn frame_count(&self) -> usize;

    /// Copies the contents of frame `src` into frame `dst`
    fn copy_frame(&mut self, src: PhysAddr, dst: PhysAddr) {
        let mut buffer = [0u8; PAGE_SIZE];
        buffer.copy_from_slice(self.frame(src));
        self.frame_mut(dst).copy_from_slice(&buffer);
    }
}
