#![cfg(test)]

// Property tests for HashMap that read table counters, kept inside the crate
// so they run without the `stats` feature.
//
// Property: live count is resident slots minus tombstones.
//  - Operations: insert and remove over a narrow key range, so removals hit
//    both groups that still have an EMPTY byte and groups that are full.
//  - Each successful removal either frees its slot outright (resident - 1)
//    or leaves a tombstone (dead + 1), never both.
//  - At each step: len() == resident - dead, capacity() == limit - resident,
//    resident <= limit.

use core::hash::BuildHasher;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use siphasher::sip::SipHasher;

use crate::HashMap;
use crate::Reseed;

#[derive(Clone)]
struct SipBuilder(u64);

impl BuildHasher for SipBuilder {
    type Hasher = SipHasher;

    fn build_hasher(&self) -> SipHasher {
        SipHasher::new_with_keys(self.0, !self.0)
    }
}

impl Reseed for SipBuilder {
    fn reseed(&self, seed: u64) -> Self {
        SipBuilder(seed)
    }
}

proptest! {
    #[test]
    fn prop_live_count_is_resident_minus_tombstones(
        seed in any::<u64>(),
        capacity in 0usize..64,
        ops in proptest::collection::vec((any::<bool>(), 0u32..300), 1..1500),
    ) {
        let mut map: HashMap<u32, u32, SipBuilder> = HashMap::with_capacity_hasher_and_rng(
            capacity,
            SipBuilder(seed),
            SmallRng::seed_from_u64(seed),
        );

        for (insert, k) in ops {
            let before = map.debug_stats();
            if insert {
                map.insert(k, k);
            } else if map.remove(&k).is_some() {
                let after = map.debug_stats();
                let freed = (after.resident, after.dead) == (before.resident - 1, before.dead);
                let buried = (after.resident, after.dead) == (before.resident, before.dead + 1);
                prop_assert!(freed || buried, "{:?} -> {:?}", before, after);
            }

            let stats = map.debug_stats();
            prop_assert_eq!(map.len(), stats.resident - stats.dead);
            prop_assert_eq!(map.capacity(), stats.limit - stats.resident);
            prop_assert!(stats.resident <= stats.limit);
            prop_assert_eq!(stats.limit, stats.groups * 14);
        }
    }
}
