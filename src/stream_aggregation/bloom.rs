/// Fixed capacity bloom filter keyed by precomputed 64-bit hashes.
///
/// Owners serialize access, so the bits are plain words.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter sized for `capacity` items with the given false positive rate.
    pub fn new(capacity: usize, fp_rate: f64) -> Self {
        let fp_rate = fp_rate.clamp(0.0001, 0.5);
        let capacity = capacity.max(1);

        // m = -n * ln(p) / (ln(2)^2)
        let num_bits = (-(capacity as f64) * fp_rate.ln() / (2.0_f64.ln().powi(2))).ceil() as usize;
        let num_bits = num_bits.max(64);

        // k = (m/n) * ln(2)
        let num_hashes = ((num_bits as f64 / capacity as f64) * 2.0_f64.ln()).round() as u32;
        let num_hashes = num_hashes.clamp(1, 30);

        let num_words = num_bits.div_ceil(64);
        BloomFilter {
            bits: vec![0; num_words],
            num_bits: num_words * 64,
            num_hashes,
        }
    }

    /// Adds h to the filter. Returns true if h was definitely absent before.
    pub fn add(&mut self, h: u64) -> bool {
        let (h1, h2) = hash_pair(h);
        let mut is_new = false;
        for i in 0..self.num_hashes {
            let (word_idx, mask) = self.bit_position(h1, h2, i);
            let word = &mut self.bits[word_idx];
            if *word & mask == 0 {
                *word |= mask;
                is_new = true;
            }
        }
        is_new
    }

    /// Returns true if h may have been added.
    pub fn has(&self, h: u64) -> bool {
        let (h1, h2) = hash_pair(h);
        (0..self.num_hashes).all(|i| {
            let (word_idx, mask) = self.bit_position(h1, h2, i);
            self.bits[word_idx] & mask != 0
        })
    }

    pub fn reset(&mut self) {
        self.bits.fill(0);
    }

    fn bit_position(&self, h1: u64, h2: u64, i: u32) -> (usize, u64) {
        let index = (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as usize;
        (index / 64, 1u64 << (index % 64))
    }
}

fn hash_pair(h: u64) -> (u64, u64) {
    // the second hash must be odd so consecutive probes cover every bit
    let h2 = xxhash_rust::xxh3::xxh3_64(&h.to_le_bytes()) | 1;
    (h, h2)
}
