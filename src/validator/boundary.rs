//! Bitfield map of instruction boundaries within a code segment.
//!
//! During the forward decode pass every instruction start is recorded here;
//! the jump-target check at the end of validation consults it, and accepting
//! a mask/transfer guard pair clears the transfer's bit so control flow can
//! never skip the mask protecting it.

/// One bit per code byte: set when the byte starts an instruction.
pub struct BoundaryMap {
    data: Vec<usize>,
    elements: usize,
}

const BITS: usize = usize::BITS as usize;

impl BoundaryMap {
    /// Creates a map covering `elements` code bytes, all clear.
    pub fn new(elements: usize) -> BoundaryMap {
        BoundaryMap {
            data: vec![0_usize; elements.div_ceil(BITS)],
            elements,
        }
    }

    /// Number of tracked bytes.
    pub fn len(&self) -> usize {
        self.elements
    }

    /// Whether `element` is a recorded instruction boundary.
    pub fn get(&self, element: usize) -> bool {
        if element >= self.elements {
            return false;
        }
        match self.data.get(element / BITS) {
            Some(word) => (word >> (element % BITS)) & 1 != 0,
            None => false,
        }
    }

    /// Records or clears a boundary.
    pub fn set(&mut self, element: usize, boundary: bool) {
        if element >= self.elements {
            debug_assert!(false, "boundary out of range");
            return;
        }
        if let Some(word) = self.data.get_mut(element / BITS) {
            if boundary {
                *word |= 1_usize << (element % BITS);
            } else {
                *word &= !(1_usize << (element % BITS));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        let mut map = BoundaryMap::new(4096);
        assert_eq!(map.len(), 4096);

        map.set(0, true);
        map.set(100, true);
        map.set(4095, true);
        assert!(map.get(0));
        assert!(map.get(100));
        assert!(map.get(4095));
        assert!(!map.get(1));

        map.set(100, false);
        assert!(!map.get(100));
    }

    #[test]
    fn out_of_range_reads_are_clear() {
        let map = BoundaryMap::new(64);
        assert!(!map.get(64));
        assert!(!map.get(1 << 20));
    }

    #[test]
    fn word_boundary() {
        let bits = usize::BITS as usize;
        let mut map = BoundaryMap::new(bits + 4);
        for i in 0..bits + 4 {
            map.set(i, true);
            assert!(map.get(i), "element {i} should be set");
        }
    }
}
