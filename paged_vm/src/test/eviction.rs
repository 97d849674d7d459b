use rand::{rngs::SmallRng, SeedableRng};

use super::{rand_page, read_page, test_vm, TestAddressSpace};
use crate::{PageInit, VmError, VmType, PAGE_SIZE};

const SEED: u64 = 5446535461589659585;

#[test]
fn test_anon_round_trip() {
    let vm = test_vm("test_anon_round_trip", 4, 16);
    let space = TestAddressSpace::new(&vm);
    let mut rand = SmallRng::seed_from_u64(SEED);

    let pages: Vec<(usize, Vec<u8>)> = (1..=12)
        .map(|i| (0x40_0000 + i * PAGE_SIZE, rand_page(&mut rand)))
        .collect();

    for (va, data) in pages.iter() {
        space
            .alloc_page(VmType::Anonymous, *va, true, PageInit::Zero)
            .unwrap();
        space.write_user(*va, data).unwrap();
    }

    assert_eq!(vm.resident_frames(), 4);
    assert_eq!(vm.used_swap_slots(), 8);
    assert!(vm.check_integrity());

    // twice, so every page goes through swap at least once
    for _ in 0..2 {
        for (va, data) in pages.iter() {
            assert_eq!(&read_page(&space, *va), data, "page {:#x} differs", va);
        }
    }

    assert_eq!(vm.used_swap_slots(), 8);
    assert!(vm.check_integrity());
}

#[test]
fn test_exactly_one_eviction() {
    let vm = test_vm("test_exactly_one_eviction", 3, 8);
    let space = TestAddressSpace::new(&vm);

    for i in 1..=4 {
        space
            .alloc_page(VmType::Anonymous, i * PAGE_SIZE, true, PageInit::Zero)
            .unwrap();
    }
    for i in 1..=3 {
        space.write_user(i * PAGE_SIZE, &[i as u8; 16]).unwrap();
    }
    assert_eq!(vm.resident_frames(), 3);
    assert_eq!(vm.used_swap_slots(), 0);

    space.write_user(4 * PAGE_SIZE, &[4; 16]).unwrap();

    let evicted: Vec<_> = (1..=3)
        .filter(|i| !space.is_resident(i * PAGE_SIZE))
        .collect();
    assert_eq!(evicted.len(), 1);
    assert!(space.is_resident(4 * PAGE_SIZE));
    assert_eq!(vm.resident_frames(), 3);
    assert_eq!(vm.used_swap_slots(), 1);

    // the evicted page comes back unchanged
    let mut buf = [0u8; 16];
    space.read_user(evicted[0] * PAGE_SIZE, &mut buf).unwrap();
    assert_eq!(buf, [evicted[0] as u8; 16]);
}

#[test]
fn test_swap_full() {
    let vm = test_vm("test_swap_full", 1, 1);
    let space = TestAddressSpace::new(&vm);
    for i in 1..=3 {
        space
            .alloc_page(VmType::Anonymous, i * PAGE_SIZE, true, PageInit::Zero)
            .unwrap();
    }

    space.write_user(PAGE_SIZE, &[1]).unwrap();
    space.write_user(2 * PAGE_SIZE, &[2]).unwrap();
    assert_eq!(vm.used_swap_slots(), 1);

    // no slot left for the second page
    assert_eq!(space.write_user(3 * PAGE_SIZE, &[3]), Err(VmError::SwapFull));
    assert!(space.is_resident(2 * PAGE_SIZE));
    assert!(!space.is_resident(3 * PAGE_SIZE));
    assert!(vm.check_integrity());

    // freeing a page makes room again
    space.teardown();
    assert_eq!(vm.used_swap_slots(), 0);
    assert_eq!(vm.resident_frames(), 0);
}

#[test]
fn test_eviction_across_address_spaces() {
    let vm = test_vm("test_eviction_across_address_spaces", 2, 8);
    let first = TestAddressSpace::new(&vm);
    let second = TestAddressSpace::new(&vm);

    for (value, space) in [(1u8, &first), (2u8, &second)] {
        for i in 1..=2 {
            space
                .alloc_page(VmType::Anonymous, i * PAGE_SIZE, true, PageInit::Zero)
                .unwrap();
            space.write_user(i * PAGE_SIZE, &[value; 8]).unwrap();
        }
    }

    // the pages of the first address space made room for the second one
    assert_eq!(vm.resident_frames(), 2);
    assert_eq!(vm.used_swap_slots(), 2);
    assert!(!first.is_resident(PAGE_SIZE) && !first.is_resident(2 * PAGE_SIZE));

    let mut buf = [0u8; 8];
    first.read_user(2 * PAGE_SIZE, &mut buf).unwrap();
    assert_eq!(buf, [1; 8]);
    second.read_user(PAGE_SIZE, &mut buf).unwrap();
    assert_eq!(buf, [2; 8]);

    drop(first);
    assert!(vm.check_integrity());
    for info in vm.frame_snapshot() {
        assert_eq!(info.owner, Some(second.id()));
    }
}
