//! Block layout of the radix sort and a host mirror of its three passes.

/// Threads per workgroup in every sort pass.
pub const WORKGROUP_SIZE: u32 = 256;
/// Keys handled by one workgroup in the local and scatter passes (two per thread).
pub const BLOCK_SIZE: u32 = 2 * WORKGROUP_SIZE;
/// Bits consumed per iteration.
pub const RADIX_BITS: u32 = 2;
pub const RADIX: u32 = 1 << RADIX_BITS;
pub const ITERATIONS: u32 = 32 / RADIX_BITS;
/// Key written to padding slots; sorts behind every real key.
pub const SENTINEL_KEY: u32 = u32::MAX;

/// Sizes derived from the number of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortPlan {
    pub count: u32,
    /// Sentinel entries appended to reach a multiple of [`BLOCK_SIZE`].
    pub padding: u32,
    pub num_blocks: u32,
}

impl SortPlan {
    pub fn new(count: u32) -> Self {
        let rem = count % BLOCK_SIZE;
        let padding = if rem == 0 { 0 } else { BLOCK_SIZE - rem };
        Self {
            count,
            padding,
            num_blocks: (count + padding) / BLOCK_SIZE,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn padded(&self) -> u32 {
        self.count + self.padding
    }

    /// One counter per digit and block, digit-major.
    #[inline]
    pub fn block_sum_count(&self) -> u32 {
        RADIX * self.num_blocks
    }
}

/// Sorts `keys` with the same block-local scan, global scan and scatter sequence the GPU
/// runs, and returns the permutation of `0..keys.len()` that orders them.
pub fn sort_host(keys: &[u32]) -> Vec<u32> {
    let plan = SortPlan::new(keys.len() as u32);
    if plan.is_empty() {
        return Vec::new();
    }

    let padded = plan.padded() as usize;
    let block = BLOCK_SIZE as usize;
    let nb = plan.num_blocks as usize;

    let mut k_in: Vec<u32> = keys.to_vec();
    k_in.resize(padded, SENTINEL_KEY);
    let mut v_in: Vec<u32> = (0..padded as u32).collect();
    let mut k_out = vec![0u32; padded];
    let mut v_out = vec![0u32; padded];
    let mut local_rank = vec![0u32; padded];
    let mut block_sums = vec![0u32; plan.block_sum_count() as usize];

    for it in 0..ITERATIONS {
        let bit = it * RADIX_BITS;
        let digit = |k: u32| ((k >> bit) & (RADIX - 1)) as usize;

        // local: exclusive per-digit rank inside each block, plus block totals
        for b in 0..nb {
            let mut counts = [0u32; RADIX as usize];
            for i in b * block..(b + 1) * block {
                let d = digit(k_in[i]);
                local_rank[i] = counts[d];
                counts[d] += 1;
            }
            for (d, c) in counts.iter().enumerate() {
                block_sums[d * nb + b] = *c;
            }
        }

        // global: exclusive scan over the digit-major counters
        let mut carry = 0;
        for s in block_sums.iter_mut() {
            let v = *s;
            *s = carry;
            carry += v;
        }

        // scatter
        for i in 0..padded {
            let d = digit(k_in[i]);
            let dst = (block_sums[d * nb + i / block] + local_rank[i]) as usize;
            k_out[dst] = k_in[i];
            v_out[dst] = v_in[i];
        }

        std::mem::swap(&mut k_in, &mut k_out);
        std::mem::swap(&mut v_in, &mut v_out);
    }

    v_in.truncate(keys.len());
    v_in
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn assert_sorted_permutation(keys: &[u32], perm: &[u32]) {
        assert_eq!(perm.len(), keys.len());
        let mut seen = vec![false; keys.len()];
        for &p in perm {
            assert!(!seen[p as usize], "index {} repeated", p);
            seen[p as usize] = true;
        }
        assert!(perm.windows(2).all(|w| keys[w[0] as usize] <= keys[w[1] as usize]));
    }

    #[test]
    fn plan_padding() {
        assert_eq!(SortPlan::new(0), SortPlan::default());
        let p = SortPlan::new(1);
        assert_eq!((p.padding, p.num_blocks, p.padded()), (511, 1, 512));
        let p = SortPlan::new(1024);
        assert_eq!((p.padding, p.num_blocks, p.block_sum_count()), (0, 2, 8));
        let p = SortPlan::new(100_000);
        assert_eq!(p.padded() % BLOCK_SIZE, 0);
        assert!(p.padding < BLOCK_SIZE);
    }

    #[test]
    fn host_sort_orders_random_keys() {
        let mut rng = StdRng::seed_from_u64(3);
        for n in [0usize, 1, 63, 64, 1000, 100_000] {
            let keys: Vec<u32> = (0..n).map(|_| rng.gen()).collect();
            assert_sorted_permutation(&keys, &sort_host(&keys));
        }
    }

    #[test]
    fn host_sort_keeps_presorted_input() {
        let keys: Vec<u32> = (0..2000u32).map(|i| i * 3).collect();
        let perm = sort_host(&keys);
        assert!(perm.iter().enumerate().all(|(i, &p)| p == i as u32));
    }

    #[test]
    fn max_keys_stay_ahead_of_padding() {
        let keys = vec![u32::MAX, 5, u32::MAX, 0];
        assert_eq!(sort_host(&keys), vec![3, 1, 0, 2]);
    }
}
