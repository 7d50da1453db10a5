//! Row to shard assignment.

use rand::Rng;

use crate::destination::{DestinationKey, ShardedKey};

/// Shards a spilled destination is spread over.
pub const SPILLED_RECORD_SHARDING_FACTOR: u32 = 10;

/// Round-robin shard assignment from a random starting point.
///
/// Each processing unit owns one assigner. The starting shard is drawn once,
/// so concurrent units do not all pile onto shard zero, and never resets.
#[derive(Debug, Clone)]
pub struct ShardAssigner {
    num_shards: u32,
    shard: u32,
}

impl ShardAssigner {
    /// Assigner with a random seed.
    ///
    /// `num_shards` must be positive.
    pub fn new(num_shards: u32) -> Self {
        let seed = rand::rng().random_range(0..num_shards.max(1));
        Self::with_seed(num_shards, seed)
    }

    /// Assigner starting after `seed`.
    pub fn with_seed(num_shards: u32, seed: u32) -> Self {
        let num_shards = num_shards.max(1);
        Self {
            num_shards,
            shard: seed % num_shards,
        }
    }

    /// Next shard index in `0..num_shards`.
    pub fn next_shard(&mut self) -> u32 {
        self.shard = (self.shard + 1) % self.num_shards;
        self.shard
    }

    /// Key a row of `destination` with the next shard.
    pub fn assign(&mut self, destination: DestinationKey) -> ShardedKey {
        ShardedKey::new(destination, self.next_shard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_round_robin_from_seed() {
        let mut assigner = ShardAssigner::with_seed(3, 1);
        let shards: Vec<u32> = (0..6).map(|_| assigner.next_shard()).collect();
        assert_eq!(shards, vec![2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_shards_stay_in_range() {
        for num_shards in [1, 2, 7, 64] {
            let mut assigner = ShardAssigner::new(num_shards);
            let mut counts: HashMap<u32, usize> = HashMap::new();
            for _ in 0..1_000 {
                let key = assigner.assign(DestinationKey::new("dataset.events"));
                assert!(key.shard < num_shards);
                *counts.entry(key.shard).or_default() += 1;
            }
            assert_eq!(counts.values().sum::<usize>(), 1_000);
            assert_eq!(counts.len(), num_shards.min(1_000) as usize);
        }
    }

    #[test]
    fn test_spill_factor_spread() {
        let mut assigner = ShardAssigner::with_seed(SPILLED_RECORD_SHARDING_FACTOR, 0);
        let shards: Vec<u32> = (0..10).map(|_| assigner.next_shard()).collect();
        assert_eq!(shards, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0]);
    }
}
