use crate::record::SplatRecord;
use foldhash::HashMap;
use foldhash::HashMapExt;
use glam::Vec3;

/// A spatial cell used as the quantization origin for its splats.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub center: Vec3,
    /// Indices into the section's record list, in encounter order.
    pub indices: Vec<u32>,
}

/// Result of bucketing one section.
#[derive(Debug, Clone, Default)]
pub struct BucketSet {
    pub bucket_size: u32,
    pub block_size: f32,
    /// Buckets holding exactly `bucket_size` indices, in seal order.
    pub full: Vec<Bucket>,
    /// Remaining non-empty buckets, in creation order.
    pub partial: Vec<Bucket>,
}

impl BucketSet {
    pub fn bucket_count(&self) -> usize {
        self.full.len() + self.partial.len()
    }

    /// Buckets in serialization order: full buckets first.
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.full.iter().chain(self.partial.iter())
    }

    pub fn splat_count(&self) -> usize {
        self.full.len() * self.bucket_size as usize
            + self.partial.iter().map(|b| b.indices.len()).sum::<usize>()
    }

    /// Record order in which splat rows are written.
    pub fn ordered_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.iter().flat_map(|b| b.indices.iter().copied())
    }
}

/// Groups `records` into cubic cells of side `block_size`, sealing a bucket as
/// soon as it holds `bucket_size` records.
///
/// A sealed cell does not stop accepting records: the next record mapped to it
/// opens a fresh pending bucket, so dense cells split into several buckets
/// sharing one centre.
pub fn compute_buckets(records: &[SplatRecord], block_size: f32, bucket_size: u32) -> BucketSet {
    let mut set = BucketSet {
        bucket_size,
        block_size,
        ..Default::default()
    };
    if records.is_empty() {
        return set;
    }

    let min = records
        .iter()
        .fold(Vec3::splat(f32::INFINITY), |lo, r| lo.min(r.position));
    let half_block = block_size * 0.5;

    // cell coordinates -> slot in `pending`
    let mut open: HashMap<[u64; 3], usize> =
        HashMap::with_capacity(records.len() / bucket_size.max(1) as usize + 1);
    let mut pending: Vec<Option<Bucket>> = Vec::new();

    for (i, record) in records.iter().enumerate() {
        let cell = ((record.position - min) / block_size).floor().max(Vec3::ZERO);
        let key = cell.to_array().map(|c| c as u64);

        let slot = *open.entry(key).or_insert_with(|| {
            pending.push(Some(Bucket {
                center: min + cell * block_size + Vec3::splat(half_block),
                indices: Vec::new(),
            }));
            pending.len() - 1
        });

        let full = match pending[slot].as_mut() {
            Some(bucket) => {
                bucket.indices.push(i as u32);
                bucket.indices.len() >= bucket_size as usize
            }
            None => false,
        };
        if full {
            if let Some(bucket) = pending[slot].take() {
                set.full.push(bucket);
            }
            open.remove(&key);
        }
    }

    set.partial = pending
        .into_iter()
        .flatten()
        .filter(|b| !b.indices.is_empty())
        .collect();

    tracing::trace!(
        full = set.full.len(),
        partial = set.partial.len(),
        "bucketed {} splats",
        records.len()
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32, y: f32, z: f32) -> SplatRecord {
        SplatRecord {
            position: Vec3::new(x, y, z),
            ..Default::default()
        }
    }

    #[test]
    fn test_accounting_matches_input() {
        let records: Vec<_> = (0..1000)
            .map(|i| at((i % 17) as f32 * 0.9, (i % 5) as f32 * 3.1, (i / 100) as f32))
            .collect();
        let set = compute_buckets(&records, 5.0, 16);
        assert_eq!(set.splat_count(), records.len());

        let mut seen = vec![0u32; records.len()];
        for idx in set.ordered_indices() {
            seen[idx as usize] += 1;
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert!(set.full.iter().all(|b| b.indices.len() == 16));
        assert!(set.partial.iter().all(|b| !b.indices.is_empty() && b.indices.len() < 16));
    }

    #[test]
    fn test_overflow_opens_new_bucket() {
        let records: Vec<_> = (0..10).map(|_| at(1.0, 1.0, 1.0)).collect();
        let set = compute_buckets(&records, 5.0, 4);
        assert_eq!(set.full.len(), 2);
        assert_eq!(set.partial.len(), 1);
        assert_eq!(set.partial[0].indices, vec![8, 9]);
        assert_eq!(set.full[0].center, set.partial[0].center);
    }

    #[test]
    fn test_positions_within_half_block_of_center() {
        let records: Vec<_> = (0..200)
            .map(|i| at(i as f32 * 0.37, -(i as f32) * 0.11, (i % 7) as f32 * 2.3))
            .collect();
        let set = compute_buckets(&records, 5.0, 256);
        for bucket in set.iter() {
            for &i in &bucket.indices {
                let d = (records[i as usize].position - bucket.center).abs();
                assert!(d.max_element() <= 2.5 + 1e-4);
            }
        }
    }

    #[test]
    fn test_widely_spread_cells_stay_distinct() {
        let records = vec![at(0.0, 0.0, 0.0), at(1e8, 1e8, 1e8)];
        let set = compute_buckets(&records, 5.0, 256);
        assert_eq!(set.bucket_count(), 2);
        for (i, bucket) in set.iter().enumerate() {
            assert_eq!(bucket.indices, vec![i as u32]);
            let d = (records[i].position - bucket.center).abs();
            assert!(d.max_element() <= 2.5 + 1e-4);
        }
    }

    #[test]
    fn test_empty_input() {
        let set = compute_buckets(&[], 5.0, 256);
        assert_eq!(set.bucket_count(), 0);
        assert_eq!(set.splat_count(), 0);
    }
}
