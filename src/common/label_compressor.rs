use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use integer_encoding::VarInt;

use super::types::Label;

type ConcurrentHashMap<K, V> = papaya::HashMap<K, V, ahash::RandomState>;

static LABELS_COMPRESSOR: OnceLock<LabelsCompressor> = OnceLock::new();

/// Returns the process-wide compressor shared by all the aggregators.
pub fn labels_compressor() -> &'static LabelsCompressor {
    LABELS_COMPRESSOR.get_or_init(LabelsCompressor::new)
}

/// LabelsCompressor maps label sets to short byte keys made of varint-encoded label indexes.
///
/// Every distinct label gets a stable index for the lifetime of the compressor, so equal label
/// sets always produce equal keys.
pub struct LabelsCompressor {
    label_to_idx: ConcurrentHashMap<Label, u64>,
    idx_to_label: ConcurrentHashMap<u64, Label>,
    next_idx: AtomicU64,
    total_size_bytes: AtomicU64,
}

impl Default for LabelsCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelsCompressor {
    pub fn new() -> Self {
        LabelsCompressor {
            label_to_idx: ConcurrentHashMap::default(),
            idx_to_label: ConcurrentHashMap::default(),
            next_idx: AtomicU64::new(0),
            total_size_bytes: AtomicU64::new(0),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        std::mem::size_of::<Self>() as u64 + self.total_size_bytes.load(Ordering::Relaxed)
    }

    pub fn items_count(&self) -> u64 {
        self.label_to_idx.len() as u64
    }

    /// Appends the compressed form of labels to dst.
    pub fn compress(&self, dst: &mut Vec<u8>, labels: &[Label]) {
        marshal_var_uint64(dst, labels.len() as u64);
        if labels.is_empty() {
            return;
        }
        let label_to_idx = self.label_to_idx.pin();
        for label in labels {
            let idx = match label_to_idx.get(label) {
                Some(idx) => *idx,
                None => self.register_label(label),
            };
            marshal_var_uint64(dst, idx);
        }
    }

    fn register_label(&self, label: &Label) -> u64 {
        let idx = self.next_idx.fetch_add(1, Ordering::Relaxed);
        // the reverse mapping is published first, so every index observed
        // through label_to_idx can be decoded
        self.idx_to_label.pin().insert(idx, label.clone());
        match self.label_to_idx.pin().try_insert(label.clone(), idx) {
            Ok(_) => {
                let size = label.size_bytes() + 2 * std::mem::size_of::<u64>();
                self.total_size_bytes.fetch_add(size as u64, Ordering::Relaxed);
                idx
            }
            Err(err) => {
                // lost the race to a concurrent writer
                self.idx_to_label.pin().remove(&idx);
                *err.current
            }
        }
    }

    /// Appends the labels decoded from src to dst.
    ///
    /// src must have been produced by compress on the same compressor.
    pub fn decompress(&self, dst: &mut Vec<Label>, src: &[u8]) {
        let Some((labels_len, mut offset)) = u64::decode_var(src) else {
            panic!("BUG: cannot unmarshal labels count from compressed key");
        };
        if labels_len == 0 {
            return;
        }
        dst.reserve(labels_len as usize);
        let idx_to_label = self.idx_to_label.pin();
        for _ in 0..labels_len {
            let Some((idx, n)) = u64::decode_var(&src[offset..]) else {
                panic!("BUG: cannot unmarshal label index at offset {offset}; key is truncated");
            };
            offset += n;
            match idx_to_label.get(&idx) {
                Some(label) => dst.push(label.clone()),
                None => panic!("BUG: missing label for idx={idx}"),
            }
        }
        if offset != src.len() {
            panic!(
                "BUG: unexpected tail left after decompressing labels; len={}",
                src.len() - offset
            );
        }
    }
}

pub(crate) fn marshal_var_uint64(dst: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 10];
    let n = v.encode_var(&mut buf);
    dst.extend_from_slice(&buf[..n]);
}

pub(crate) fn unmarshal_var_uint64(src: &[u8]) -> Option<(u64, usize)> {
    u64::decode_var(src)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::common::labels::labels_to_string;

    fn new_test_series(series_count: usize, labels_per_series: usize) -> Vec<Vec<Label>> {
        (0..series_count)
            .map(|i| {
                (0..labels_per_series)
                    .map(|j| Label::new(format!("label_{j}"), format!("value_{i}_{j}")))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_labels_compressor_serial() {
        let lc = LabelsCompressor::new();

        let f = |labels: &[Label]| {
            let s_expected = labels_to_string(labels);
            let mut data = vec![];
            lc.compress(&mut data, labels);
            let mut labels_result = vec![];
            lc.decompress(&mut labels_result, &data);
            assert_eq!(labels_to_string(&labels_result), s_expected);
            if !labels.is_empty() {
                assert!(lc.size_bytes() > 0, "unexpected zero size_bytes()");
                assert!(lc.items_count() > 0, "unexpected zero items_count()");
            }
        };

        // empty labels
        f(&[]);

        f(&[
            Label::new("instance", "12345.4342.342.3"),
            Label::new("job", "kube-pod-12323"),
        ]);

        f(&[
            Label::new("instance", "12345.4342.342.3"),
            Label::new("job", "kube-pod-123124"),
            Label::new("pod", "foo-bar-baz"),
        ]);
    }

    #[test]
    fn test_labels_compressor_reuses_indexes() {
        let lc = LabelsCompressor::new();
        let labels = vec![Label::new("a", "1"), Label::new("b", "2")];
        let mut k1 = vec![];
        let mut k2 = vec![];
        lc.compress(&mut k1, &labels);
        lc.compress(&mut k2, &labels);
        assert_eq!(k1, k2);
        assert_eq!(lc.items_count(), 2);
    }

    #[test]
    fn test_labels_compressor_concurrent() {
        const CONCURRENCY: usize = 5;
        let lc = Arc::new(LabelsCompressor::new());

        let handles: Vec<_> = (0..CONCURRENCY)
            .map(|_| {
                let lc = lc.clone();
                thread::spawn(move || {
                    let series = new_test_series(100, 20);
                    for (i, labels) in series.iter().enumerate() {
                        let s_expected = labels_to_string(labels);
                        let mut data = vec![];
                        lc.compress(&mut data, labels);
                        let mut labels_result = vec![];
                        lc.decompress(&mut labels_result, &data);
                        let s_result = labels_to_string(&labels_result);
                        assert_eq!(s_result, s_expected, "unexpected result on iteration {i}");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(lc.size_bytes() > 0);
        assert_eq!(lc.items_count(), 100 * 20);
    }

    #[test]
    #[should_panic(expected = "BUG")]
    fn test_decompress_unknown_index() {
        let lc = LabelsCompressor::new();
        let mut key = vec![];
        marshal_var_uint64(&mut key, 1);
        marshal_var_uint64(&mut key, 42);
        let mut dst = vec![];
        lc.decompress(&mut dst, &key);
    }
}
