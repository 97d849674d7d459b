use super::{BlockDeviceModule, BlockSector};
use crate::SECTOR_SIZE;

/// Block device that only lives in memory
pub struct MemoryBlockDevice {
    data: Box<[u8]>,
}

impl MemoryBlockDevice {
    pub fn new(sector_count: BlockSector) -> Self {
        Self {
            data: vec![0u8; sector_count as usize * SECTOR_SIZE].into_boxed_slice(),
        }
    }

    fn range(&self, sector: BlockSector) -> Result<core::ops::Range<usize>, ()> {
        let start = sector as usize * SECTOR_SIZE;
        if start + SECTOR_SIZE > self.data.len() {
            return Err(());
        }

        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDeviceModule for MemoryBlockDevice {
    fn read_sector(&mut self, sector: BlockSector, dest: &mut [u8]) -> Result<(), ()> {
        let range = self.range(sector)?;
        dest.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sector(&mut self, sector: BlockSector, src: &[u8]) -> Result<(), ()> {
        let range = self.range(sector)?;
        self.data[range].copy_from_slice(src);
        Ok(())
    }

    fn sector_count(&self) -> BlockSector {
        (self.data.len() / SECTOR_SIZE) as BlockSector
    }
}

#[cfg(test)]
mod test {
    use super::MemoryBlockDevice;
    use crate::{
        modules::block_device::{
            test::{test_block_device_normal, BLOCK_DEVICE_TEST_SECTORS},
            BlockDeviceModule,
        },
        SECTOR_SIZE,
    };

    #[test]
    fn test_memory_block_device_normal() {
        test_block_device_normal(MemoryBlockDevice::new(BLOCK_DEVICE_TEST_SECTORS));
    }

    #[test]
    fn test_memory_block_device_out_of_bounds() {
        let mut device = MemoryBlockDevice::new(2);
        let mut buffer = [0u8; SECTOR_SIZE];
        assert!(device.read_sector(1, &mut buffer).is_ok());
        assert!(device.read_sector(2, &mut buffer).is_err());
        assert!(device.write_sector(2, &buffer).is_err());
    }
}
