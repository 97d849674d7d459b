use super::div_ceil;

/// Fixed size list of bits, used to track which slots are in use
pub(crate) struct BitArray {
    arr: Box<[u8]>,
    len: usize,
}

impl BitArray {
    /// Creates a new bit array with `len` bits that are all unset
    pub(crate) fn new(len: usize) -> Self {
        BitArray {
            arr: vec![0u8; div_ceil(len, 8)].into_boxed_slice(),
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn set(&mut self, value: bool, index: usize) {
        debug_assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        let arr_index = index / 8;
        let internal_index = index % 8;

        let item = &mut self.arr[arr_index];
        if value {
            // set bit
            *item |= 1u8 << internal_index;
        } else {
            // unset bit
            *item &= !(1u8 << internal_index);
        }
    }

    pub(crate) fn is_set(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        let arr_index = index / 8;
        let internal_index = index % 8;

        let item = self.arr[arr_index];
        (item & (1u8 << internal_index)) != 0
    }

    /// Finds the first unset bit, sets it and returns its index
    pub(crate) fn scan_and_set(&mut self) -> Option<usize> {
        for (arr_index, item) in self.arr.iter_mut().enumerate() {
            if *item == u8::MAX {
                continue;
            }

            let internal_index = item.trailing_ones() as usize;
            let index = arr_index * 8 + internal_index;
            if index >= self.len {
                // only padding bits left
                return None;
            }

            *item |= 1u8 << internal_index;
            return Some(index);
        }

        None
    }

    /// Number of set bits
    pub(crate) fn count_set(&self) -> usize {
        self.arr.iter().map(|item| item.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod test {
    use super::BitArray;

    #[test]
    fn test_set_and_unset() {
        let mut arr = BitArray::new(20);
        assert_eq!(arr.len(), 20);
        assert_eq!(arr.count_set(), 0);

        arr.set(true, 3);
        arr.set(true, 9);
        arr.set(true, 19);
        assert!(arr.is_set(3));
        assert!(arr.is_set(9));
        assert!(arr.is_set(19));
        assert!(!arr.is_set(4));
        assert_eq!(arr.count_set(), 3);

        // unsetting must only touch the given bit
        arr.set(false, 9);
        assert!(!arr.is_set(9));
        assert!(arr.is_set(3));
        assert!(arr.is_set(19));
        assert_eq!(arr.count_set(), 2);
    }

    #[test]
    fn test_scan_and_set() {
        let mut arr = BitArray::new(10);
        for i in 0..10 {
            assert_eq!(arr.scan_and_set(), Some(i));
        }

        // padding bits of the last byte must never be handed out
        assert_eq!(arr.scan_and_set(), None);

        arr.set(false, 4);
        assert_eq!(arr.scan_and_set(), Some(4));
        assert_eq!(arr.scan_and_set(), None);
    }
}
