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

use std::{error::Error, fs, sync::Arc};

use env_logger::{Builder, Env};
use log::info;
use paged_vm::{
    modules::{
        block_device::FileBlockDevice,
        file::{FileHandle, HostFile},
        frame_allocator::PoolFrameAllocator,
        page_table::SoftPageTable,
    },
    AddressSpace, PageFault, PageInit, Vm, VmConfig, VmType, PAGE_SIZE, SECTORS_PER_PAGE,
};
use rand::{rngs::SmallRng, RngCore, SeedableRng};

type DemoVm = Vm<PoolFrameAllocator, FileBlockDevice, SoftPageTable>;
type DemoAddressSpace = AddressSpace<PoolFrameAllocator, FileBlockDevice, SoftPageTable>;

const FRAMES: usize = 8;
const SWAP_SLOTS: usize = 64;
const HEAP_BASE: usize = 0x0804_8000;
const HEAP_PAGES: usize = 16;
const MAP_BASE: usize = 0x1000_0000;
const SEED: u64 = 4839201938475610293;

fn print_stats(vm: &DemoVm) {
    println!(
        "  resident frames: {}/{}, swap slots in use: {}/{}",
        vm.resident_frames(),
        FRAMES,
        vm.used_swap_slots(),
        vm.swap_slot_count()
    );
}

/// Fills more heap pages than there are frames and checks them afterwards
fn heap_demo(space: &DemoAddressSpace, rand: &mut SmallRng) -> Result<Vec<Vec<u8>>, Box<dyn Error>> {
    let mut pages = Vec::with_capacity(HEAP_PAGES);
    for i in 0..HEAP_PAGES {
        let va = HEAP_BASE + i * PAGE_SIZE;
        space.alloc_page(VmType::Anonymous, va, true, PageInit::Zero)?;

        let mut data = vec![0u8; PAGE_SIZE];
        rand.fill_bytes(&mut data);
        space.write_user(va, &data)?;
        pages.push(data);
    }

    for (i, data) in pages.iter().enumerate() {
        let mut buf = vec![0u8; PAGE_SIZE];
        space.read_user(HEAP_BASE + i * PAGE_SIZE, &mut buf)?;
        assert_eq!(&buf, data, "heap page {} was corrupted", i);
    }

    Ok(pages)
}

fn stack_demo(space: &DemoAddressSpace) -> Result<(), Box<dyn Error>> {
    let top = space.setup_stack()?;

    // a push right below the stack pointer grows the stack
    let rsp = top - 3 * PAGE_SIZE;
    space.set_user_rsp(rsp);
    space.write_user(rsp - 8, &0xDEAD_BEEFu64.to_le_bytes())?;
    println!(
        "  stack grew to {:#x} ({} pages)",
        space.stack_bottom(),
        (top - space.stack_bottom()) / PAGE_SIZE
    );

    // far below the stack pointer is a genuine invalid access
    let fatal = !space.try_handle_fault(PageFault {
        addr: rsp - 64 * PAGE_SIZE,
        user: true,
        write: true,
        not_present: true,
        rsp,
    });
    println!("  access far below the stack pointer is fatal: {}", fatal);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Info)
        .format_module_path(false)
        .init();

    let device = FileBlockDevice::new(
        "/tmp/fork_demo.swap".to_string(),
        (SWAP_SLOTS * SECTORS_PER_PAGE) as u32,
    )?;
    let vm = Arc::new(Vm::new(
        PoolFrameAllocator::new(FRAMES),
        device,
        VmConfig::default(),
    )?);
    let mut rand = SmallRng::seed_from_u64(SEED);

    let parent = AddressSpace::new(&vm);
    info!("Parent address space is {}", parent.id());

    println!("stack:");
    stack_demo(&parent)?;

    println!("heap with {} pages on {} frames:", HEAP_PAGES, FRAMES);
    let pages = heap_demo(&parent, &mut rand)?;
    print_stats(&vm);

    println!("memory mapped file:");
    let path = "/tmp/fork_demo.txt";
    fs::write(path, b"hello from a memory mapped file")?;
    let file: FileHandle = HostFile::open(path)?;
    let length = file.length();
    parent.mmap(MAP_BASE, length, true, &file, 0)?;
    drop(file);

    let mut text = vec![0u8; length];
    parent.read_user(MAP_BASE, &mut text)?;
    println!("  parent reads: {}", String::from_utf8_lossy(&text));

    println!("fork:");
    let child = parent.fork()?;
    print_stats(&vm);
    let shared = vm
        .frame_snapshot()
        .iter()
        .filter(|info| info.share_count > 1)
        .count();
    println!("  {} frames are shared copy-on-write", shared);

    child.write_user(MAP_BASE, b"HELLO")?;
    child.write_user(HEAP_BASE, &[0u8; 64])?;
    parent.read_user(MAP_BASE, &mut text)?;
    println!("  parent still reads: {}", String::from_utf8_lossy(&text));
    child.read_user(MAP_BASE, &mut text)?;
    println!("  child reads: {}", String::from_utf8_lossy(&text));

    let mut buf = vec![0u8; PAGE_SIZE];
    parent.read_user(HEAP_BASE, &mut buf)?;
    assert_eq!(buf, pages[0], "write of the child leaked into the parent");

    child.munmap(MAP_BASE);
    println!("  file after child unmapped: {}", String::from_utf8_lossy(&fs::read(path)?));
    drop(child);

    parent.munmap(MAP_BASE);
    println!("  file after parent unmapped: {}", String::from_utf8_lossy(&fs::read(path)?));
    print_stats(&vm);

    let consistent = vm.check_integrity();
    drop(parent);
    println!("frame table consistent: {}", consistent);
    print_stats(&vm);

    fs::remove_file(path)?;
    Ok(())
}
