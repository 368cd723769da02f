//! Fixed-length bit vector of received chunks.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitmap {
    len: u32,
    bits: Vec<u8>,
}

impl Bitmap {
    /// All-unset bitmap of `len` bits.
    pub fn new(len: u32) -> Self {
        Self {
            len,
            bits: vec![0; (len as usize).div_ceil(8)],
        }
    }

    /// Bitmap covering `size` bytes split into `chunk_size` chunks: `ceil(size / chunk_size)` bits.
    /// `None` when `chunk_size` is zero or the count does not fit.
    pub fn for_size(size: u64, chunk_size: u64) -> Option<Self> {
        if chunk_size == 0 {
            return None;
        }
        let len = u32::try_from(size.div_ceil(chunk_size)).ok()?;
        Some(Self::new(len))
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Out-of-range indices read as unset.
    pub fn get(&self, index: u32) -> bool {
        if index >= self.len {
            return false;
        }
        let i = index as usize;
        self.bits[i / 8] & (1 << (i % 8)) != 0
    }

    /// Set bit `index`. Returns whether it changed.
    pub fn set(&mut self, index: u32) -> bool {
        if index >= self.len || self.get(index) {
            return false;
        }
        let i = index as usize;
        self.bits[i / 8] |= 1 << (i % 8);
        true
    }

    pub fn count_set(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    pub fn is_full(&self) -> bool {
        self.count_set() == self.len
    }

    /// Uniformly random unset index, `None` when full. Walks whole bytes, so
    /// the cost is one RNG draw plus `len / 8` popcounts.
    pub fn random_unset<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u32> {
        let missing = self.len - self.count_set();
        if missing == 0 {
            return None;
        }
        let mut k = rng.gen_range(0..missing);
        for (i, byte) in self.bits.iter().enumerate() {
            let base = i as u32 * 8;
            let width = (self.len - base).min(8);
            let unset = width - byte.count_ones();
            if k >= unset {
                k -= unset;
                continue;
            }
            for bit in 0..width {
                if byte & (1 << bit) == 0 {
                    if k == 0 {
                        return Some(base + bit);
                    }
                    k -= 1;
                }
            }
        }
        None
    }

    /// Unset every bit; the length is kept.
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = 0);
    }
}
