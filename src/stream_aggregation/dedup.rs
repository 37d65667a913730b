use std::collections::HashMap;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64;

use crate::stream_aggregation::PushSample;

const DEDUP_AGGR_SHARDS_COUNT: usize = 128;

/// Samples are handed to the flush visitor in chunks of at most this size.
const FLUSH_CHUNK_SIZE: usize = 10_000;

/// DedupAggr keeps the last pushed value per series key until the next flush.
///
/// Keys are spread over a fixed number of independently locked shards.
pub(crate) struct DedupAggr {
    shards: Vec<DedupAggrShard>,
}

#[derive(Default)]
struct DedupAggrShard {
    m: Mutex<HashMap<Vec<u8>, f64, ahash::RandomState>>,
    size_bytes: AtomicU64,
    items_count: AtomicU64,
}

impl Default for DedupAggr {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupAggr {
    pub(crate) fn new() -> Self {
        let shards = (0..DEDUP_AGGR_SHARDS_COUNT)
            .map(|_| DedupAggrShard::default())
            .collect();
        DedupAggr { shards }
    }

    pub(crate) fn size_bytes(&self) -> u64 {
        let n = size_of::<DedupAggr>() + self.shards.len() * size_of::<DedupAggrShard>();
        self.shards
            .iter()
            .map(|shard| shard.size_bytes.load(Ordering::Relaxed))
            .sum::<u64>()
            + n as u64
    }

    pub(crate) fn items_count(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.items_count.load(Ordering::Relaxed))
            .sum()
    }

    pub(crate) fn push_samples(&self, samples: &[PushSample]) {
        let mut per_shard: Vec<Vec<&PushSample>> = vec![Vec::new(); self.shards.len()];
        for sample in samples {
            let h = xxh3_64(&sample.key);
            let idx = (h % self.shards.len() as u64) as usize;
            per_shard[idx].push(sample);
        }
        for (shard, shard_samples) in self.shards.iter().zip(per_shard) {
            if !shard_samples.is_empty() {
                shard.push_samples(&shard_samples);
            }
        }
    }

    /// Hands the deduplicated samples to f, stamped with flush_timestamp.
    ///
    /// Shards are flushed in parallel. The shard state is cleared if reset_state is set.
    pub(crate) fn flush<F>(&self, f: F, flush_timestamp: i64, reset_state: bool)
    where
        F: Fn(&[PushSample]) + Sync,
    {
        self.shards
            .par_iter()
            .for_each(|shard| shard.flush(&f, flush_timestamp, reset_state));
    }
}

impl DedupAggrShard {
    fn push_samples(&self, samples: &[&PushSample]) {
        let mut m = self.m.lock();
        for sample in samples {
            match m.get_mut(sample.key.as_slice()) {
                Some(value) => *value = sample.value,
                None => {
                    let key = sample.key.clone();
                    let size = key.len() + size_of::<Vec<u8>>() + size_of::<f64>();
                    m.insert(key, sample.value);
                    self.items_count.fetch_add(1, Ordering::Relaxed);
                    self.size_bytes.fetch_add(size as u64, Ordering::Relaxed);
                }
            }
        }
    }

    fn flush<F>(&self, f: &F, flush_timestamp: i64, reset_state: bool)
    where
        F: Fn(&[PushSample]),
    {
        let m = {
            let mut m = self.m.lock();
            if m.is_empty() {
                return;
            }
            if reset_state {
                self.items_count.store(0, Ordering::Relaxed);
                self.size_bytes.store(0, Ordering::Relaxed);
                std::mem::take(&mut *m)
            } else {
                m.clone()
            }
        };

        let mut dst = Vec::with_capacity(m.len().min(FLUSH_CHUNK_SIZE));
        for (key, value) in m {
            dst.push(PushSample {
                key,
                value,
                timestamp: flush_timestamp,
            });
            if dst.len() >= FLUSH_CHUNK_SIZE {
                f(&dst);
                dst.clear();
            }
        }
        if !dst.is_empty() {
            f(&dst);
        }
    }
}
