use crate::{
    modules::block_device::BlockDeviceModule,
    swap::{SwapSlot, SwapStore},
    VmResult,
};

/// Page without a file behind it, backed by the swap device
pub(crate) struct AnonPage {
    /// Slot holding the contents while the page is swapped out
    slot: Option<SwapSlot>,
}

impl AnonPage {
    pub(crate) fn new() -> Self {
        Self { slot: None }
    }

    pub(crate) fn is_swapped_out(&self) -> bool {
        self.slot.is_some()
    }

    /// Reads the page back from its slot and releases the slot.
    /// A page that was never swapped out comes back zeroed.
    pub(crate) fn swap_in<D: BlockDeviceModule>(
        &mut self,
        frame: &mut [u8],
        swap: &SwapStore<D>,
    ) -> VmResult<()> {
        match self.slot {
            Some(slot) => {
                swap.read_slot(slot, frame)?;
                swap.free(slot);
                self.slot = None;
            }
            None => frame.fill(0),
        }

        Ok(())
    }

    pub(crate) fn swap_out<D: BlockDeviceModule>(
        &mut self,
        frame: &[u8],
        swap: &SwapStore<D>,
    ) -> VmResult<()> {
        debug_assert!(self.slot.is_none());

        let slot = swap.allocate()?;
        if let Err(err) = swap.write_slot(slot, frame) {
            swap.free(slot);
            return Err(err);
        }

        self.slot = Some(slot);
        Ok(())
    }

    pub(crate) fn destroy<D: BlockDeviceModule>(&mut self, swap: &SwapStore<D>) {
        if let Some(slot) = self.slot.take() {
            swap.free(slot);
        }
    }
}
