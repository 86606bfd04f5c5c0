//! `Deduper`: canonical cycle keying plus a scalable Bloom filter for
//! cross-request duplicate suppression. See `spec.md` §4.7.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::ids::CanonicalId;
use crate::model::TradeStep;

/// Rotates `steps` so they start at the lexicographically smallest `from`
/// wallet id, then hashes the `(from,to,nft)` triples. Two cycles that
/// traverse the same wallets with the same NFT choices in the same cyclic
/// order always produce the same id, regardless of starting index.
pub fn canonical_id(steps: &[TradeStep]) -> CanonicalId {
    let n = steps.len();
    debug_assert!(n >= 2, "a trade loop must have at least two steps");

    let start = (0..n)
        .min_by(|&a, &b| steps[a].from.as_str().cmp(steps[b].from.as_str()))
        .unwrap_or(0);

    let mut buf = String::new();
    for i in 0..n {
        let step = &steps[(start + i) % n];
        buf.push_str(step.from.as_str());
        buf.push('>');
        buf.push_str(step.to.as_str());
        buf.push(':');
        buf.push_str(step.nft.as_str());
        buf.push(';');
    }

    let digest = Sha256::digest(buf.as_bytes());
    let truncated = &digest[..16];
    CanonicalId(hex_encode(truncated))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

fn hash_pair(id: &CanonicalId) -> (u64, u64) {
    let digest = Sha256::digest(id.0.as_bytes());
    let h1 = u64::from_le_bytes(digest[0..8].try_into().unwrap());
    let h2 = u64::from_le_bytes(digest[8..16].try_into().unwrap()) | 1; // odd, for double hashing
    (h1, h2)
}

fn optimal_num_bits(capacity: usize, fp_rate: f64) -> usize {
    let n = capacity.max(1) as f64;
    let m = -(n * fp_rate.ln()) / (std::f64::consts::LN_2 * std::f64::consts::LN_2);
    m.ceil().max(64.0) as usize
}

fn optimal_k(num_bits: usize, capacity: usize) -> usize {
    let n = capacity.max(1) as f64;
    let k = (num_bits as f64 / n) * std::f64::consts::LN_2;
    k.round().clamp(1.0, 30.0) as usize
}

/// One fixed-size tier of a scalable Bloom filter (Almeida et al., 2007).
struct BloomTier {
    bits: Vec<u64>,
    num_bits: usize,
    k: usize,
    capacity: usize,
    count: usize,
}

impl BloomTier {
    fn new(capacity: usize, fp_rate: f64) -> Self {
        let num_bits = optimal_num_bits(capacity, fp_rate);
        let k = optimal_k(num_bits, capacity);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            num_bits,
            k,
            capacity,
            count: 0,
        }
    }

    fn positions(&self, h1: u64, h2: u64) -> impl Iterator<Item = usize> + '_ {
        let num_bits = self.num_bits as u64;
        (0..self.k as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits) as usize)
    }

    fn insert(&mut self, h1: u64, h2: u64) {
        for pos in self.positions(h1, h2).collect::<Vec<_>>() {
            self.bits[pos / 64] |= 1 << (pos % 64);
        }
        self.count += 1;
    }

    fn might_contain(&self, h1: u64, h2: u64) -> bool {
        self.positions(h1, h2).all(|pos| self.bits[pos / 64] & (1 << (pos % 64)) != 0)
    }

    fn is_full(&self) -> bool {
        self.count >= self.capacity
    }
}

/// A growable sequence of Bloom filter tiers, so the overall false-positive
/// rate stays bounded without pre-sizing for an unknown total element count.
/// Append-only within a run; `insert`/`might_contain` take `&mut self` /
/// `&self` respectively and are wrapped in a `Mutex` by `Deduper` for
/// thread-safe set operations across concurrently running discoveries.
pub struct ScalableBloomFilter {
    tiers: Vec<BloomTier>,
    base_capacity: usize,
    base_fp_rate: f64,
    growth_factor: f64,
    tightening_ratio: f64,
}

impl ScalableBloomFilter {
    pub fn new(base_capacity: usize, base_fp_rate: f64) -> Self {
        Self {
            tiers: vec![BloomTier::new(base_capacity, base_fp_rate)],
            base_capacity,
            base_fp_rate,
            growth_factor: 2.0,
            tightening_ratio: 0.9,
        }
    }

    pub fn insert(&mut self, id: &CanonicalId) {
        let (h1, h2) = hash_pair(id);
        if self.tiers.last().unwrap().is_full() {
            let tier_index = self.tiers.len();
            let capacity = (self.base_capacity as f64 * self.growth_factor.powi(tier_index as i32))
                .round() as usize;
            let fp_rate = self.base_fp_rate * self.tightening_ratio.powi(tier_index as i32);
            self.tiers.push(BloomTier::new(capacity.max(1), fp_rate.max(1e-9)));
        }
        self.tiers.last_mut().unwrap().insert(h1, h2);
    }

    pub fn might_contain(&self, id: &CanonicalId) -> bool {
        let (h1, h2) = hash_pair(id);
        self.tiers.iter().any(|t| t.might_contain(h1, h2))
    }
}

/// Canonical-id dedup plus the Bloom pre-filter. `LoopCache` remains the
/// authoritative membership check; a Bloom false positive only costs one
/// extra cache lookup.
pub struct Deduper {
    bloom: Mutex<ScalableBloomFilter>,
}

impl Deduper {
    pub fn new(base_capacity: usize, false_positive_rate: f64) -> Self {
        Self {
            bloom: Mutex::new(ScalableBloomFilter::new(base_capacity, false_positive_rate)),
        }
    }

    pub fn canonical_id(&self, steps: &[TradeStep]) -> CanonicalId {
        canonical_id(steps)
    }

    /// `true` means "probably already seen" — caller must still check
    /// `LoopCache` to be sure. `false` means "definitely new."
    pub fn probably_seen(&self, id: &CanonicalId) -> bool {
        self.bloom.lock().might_contain(id)
    }

    pub fn record(&self, id: &CanonicalId) {
        self.bloom.lock().insert(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{NftId, WalletId};

    fn step(from: &str, to: &str, nft: &str) -> TradeStep {
        TradeStep {
            from: WalletId::from(from),
            to: WalletId::from(to),
            nft: NftId::from(nft),
        }
    }

    #[test]
    fn rotation_invariant() {
        let cycle = vec![step("a", "b", "n1"), step("b", "c", "n2"), step("c", "a", "n3")];
        let rotated = vec![step("b", "c", "n2"), step("c", "a", "n3"), step("a", "b", "n1")];
        assert_eq!(canonical_id(&cycle), canonical_id(&rotated));
    }

    #[test]
    fn different_nft_choice_changes_id() {
        let cycle_a = vec![step("a", "b", "n1"), step("b", "a", "n2")];
        let cycle_b = vec![step("a", "b", "n9"), step("b", "a", "n2")];
        assert_ne!(canonical_id(&cycle_a), canonical_id(&cycle_b));
    }

    #[test]
    fn bloom_filter_has_no_false_negatives() {
        let mut bloom = ScalableBloomFilter::new(16, 0.01);
        let ids: Vec<CanonicalId> = (0..200)
            .map(|i| CanonicalId(format!("loop-{i}")))
            .collect();
        for id in &ids {
            bloom.insert(id);
        }
        for id in &ids {
            assert!(bloom.might_contain(id));
        }
    }

    #[test]
    fn deduper_marks_recorded_ids_as_probably_seen() {
        let deduper = Deduper::new(64, 0.01);
        let id = CanonicalId("abc".to_owned());
        assert!(!deduper.probably_seen(&id));
        deduper.record(&id);
        assert!(deduper.probably_seen(&id));
    }
}
