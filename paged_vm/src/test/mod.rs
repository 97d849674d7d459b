use std::sync::Arc;

use rand::{rngs::SmallRng, RngCore};

use crate::{
    modules::{
        block_device::{test::get_test_device, FileBlockDevice},
        frame_allocator::PoolFrameAllocator,
        page_table::SoftPageTable,
    },
    AddressSpace, Vm, VmConfig, PAGE_SIZE, SECTORS_PER_PAGE,
};

mod eviction;

pub(crate) type TestVm = Vm<PoolFrameAllocator, FileBlockDevice, SoftPageTable>;
pub(crate) type TestAddressSpace = AddressSpace<PoolFrameAllocator, FileBlockDevice, SoftPageTable>;

/// Creates a vm with `frames` physical frames and a swap device with room
/// for `swap_slots` pages, stored at `/tmp/<test_name>.swap`
pub(crate) fn test_vm(test_name: &str, frames: usize, swap_slots: usize) -> Arc<TestVm> {
    let _ = env_logger::builder().is_test(true).try_init();

    let device = get_test_device(test_name, (swap_slots * SECTORS_PER_PAGE) as u32);
    Arc::new(Vm::new(PoolFrameAllocator::new(frames), device, VmConfig::default()).unwrap())
}

pub(crate) fn rand_page(rand: &mut SmallRng) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    rand.fill_bytes(&mut page);
    page
}

/// Reads the whole page at `va`
pub(crate) fn read_page(space: &TestAddressSpace, va: usize) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    space.read_user(va, &mut page).unwrap();
    page
}
