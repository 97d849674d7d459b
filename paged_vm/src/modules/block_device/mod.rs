mod file_device;
mod memory_device;

pub use file_device::FileBlockDevice;
pub use memory_device::MemoryBlockDevice;

use crate::SECTOR_SIZE;

/// Index of a sector on a block device
pub type BlockSector = u32;

/// A block device addressed in sectors of [`SECTOR_SIZE`] bytes (e.g. the swap disk)
pub trait BlockDeviceModule: Send + 'static {
    /// Reads sector `sector` into `dest` which is exactly [`SECTOR_SIZE`] bytes big.
    ///
    /// If this call fails, it could be that already some data was written to `dest`.
    fn read_sector(&mut self, sector: BlockSector, dest: &mut [u8]) -> Result<(), ()>;

    /// Writes `src` which is exactly [`SECTOR_SIZE`] bytes big to sector `sector`
    fn write_sector(&mut self, sector: BlockSector, src: &[u8]) -> Result<(), ()>;

    /// Returns the size of this device in sectors
    ///
    /// **It is illegal to read/write across this border!**
    fn sector_count(&self) -> BlockSector;

    /// Size of this device in bytes
    fn byte_size(&self) -> usize {
        self.sector_count() as usize * SECTOR_SIZE
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::{BlockDeviceModule, FileBlockDevice};
    use crate::SECTOR_SIZE;

    pub(crate) fn get_test_device(test_name: &str, sectors: u32) -> FileBlockDevice {
        FileBlockDevice::new(format!("/tmp/{}.swap", test_name), sectors).unwrap()
    }

    fn gen_number(i: usize) -> u8 {
        (i * 3 + (i % 3) * 7 + (i % 11) * 51) as u8
    }

    pub(super) const BLOCK_DEVICE_TEST_SECTORS: u32 = 32;

    /// test if write saves all data and read restores all of it
    pub(super) fn test_block_device_normal<T: BlockDeviceModule>(mut device: T) {
        assert_eq!(device.sector_count(), BLOCK_DEVICE_TEST_SECTORS);
        assert_eq!(
            device.byte_size(),
            BLOCK_DEVICE_TEST_SECTORS as usize * SECTOR_SIZE
        );

        let mut sector = [0u8; SECTOR_SIZE];
        for s in 0..BLOCK_DEVICE_TEST_SECTORS {
            for (x, item) in sector.iter_mut().enumerate() {
                *item = gen_number(s as usize * SECTOR_SIZE + x);
            }

            device.write_sector(s, &sector).unwrap();
        }

        // read back in reverse order
        for s in (0..BLOCK_DEVICE_TEST_SECTORS).rev() {
            device.read_sector(s, &mut sector).unwrap();

            for (x, item) in sector.iter().enumerate() {
                assert_eq!(*item, gen_number(s as usize * SECTOR_SIZE + x));
            }
        }
    }
}
