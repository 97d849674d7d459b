use crate::{VirtAddr, PAGE_SIZE};

/// Layout of the user address space the virtual memory core works with
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// The user stack grows downwards starting from this address
    pub user_stack_top: VirtAddr,

    /// Maximum size the stack is allowed to grow to.
    /// `user_stack_top - max_stack_size` is the absolute floor for stack growth.
    pub max_stack_size: usize,

    /// How far below the stack pointer a fault still counts as stack access
    /// (`push` faults before the stack pointer is decremented)
    pub stack_slack: usize,

    /// Start of kernel space, everything at or above this address is off limits
    pub kernel_base: VirtAddr,
}

impl VmConfig {
    /// Lowest address the stack may ever grow to
    pub fn stack_floor(&self) -> VirtAddr {
        self.user_stack_top.saturating_sub(self.max_stack_size)
    }

    #[inline]
    pub fn is_user_address(&self, addr: VirtAddr) -> bool {
        addr < self.kernel_base
    }

    pub(crate) fn validate(&self) -> bool {
        self.user_stack_top % PAGE_SIZE == 0
            && self.max_stack_size % PAGE_SIZE == 0
            && self.max_stack_size >= PAGE_SIZE
            && self.user_stack_top <= self.kernel_base
            && self.stack_floor() > 0
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_stack_top: 0x4748_0000,
            max_stack_size: 1 << 20,
            stack_slack: 8,
            kernel_base: 0x80_0400_0000,
        }
    }
}

#[cfg(test)]
mod test {
    use super::VmConfig;

    #[test]
    fn test_default_config_is_valid() {
        let config = VmConfig::default();
        assert!(config.validate());
        assert_eq!(config.stack_floor(), 0x4748_0000 - (1 << 20));
        assert!(config.is_user_address(config.user_stack_top - 1));
        assert!(!config.is_user_address(config.kernel_base));
    }

    #[test]
    fn test_invalid_config() {
        let config = VmConfig {
            user_stack_top: 0x1001,
            ..Default::default()
        };
        assert!(!config.validate());

        let config = VmConfig {
            max_stack_size: 0,
            ..Default::default()
        };
        assert!(!config.validate());
    }
}
