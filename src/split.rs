//! Stratified train/holdout partitioning. The response is grouped into
//! quantile strata and each stratum is split independently, so both
//! partitions see the same response distribution.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Number of response strata used by the pipeline.
pub const DEFAULT_STRATA: usize = 5;

/// Disjoint row-index sets; their union covers every input row. Indices are
/// kept sorted so row order inside each partition is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub holdout: Vec<usize>,
}

/// Splits rows into training and holdout sets, stratified on the response.
/// Rows are ranked by response value, chunked into `strata` groups, and each
/// group is shuffled with a seeded RNG before allocating `train_fraction` of
/// it to training. Identical seed and input always produce the identical
/// partition.
pub fn stratified_split(
    response: &[f64],
    train_fraction: f64,
    strata: usize,
    seed: u64,
) -> SplitIndices {
    let fraction = train_fraction.clamp(0.0, 1.0);
    let strata = strata.max(1);

    let mut order: Vec<usize> = (0..response.len()).collect();
    order.sort_by(|&a, &b| {
        response[a]
            .partial_cmp(&response[b])
            .expect("non-finite values are rejected at load time")
    });

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut holdout = Vec::new();
    let stratum_size = response.len().div_ceil(strata).max(1);
    for chunk in order.chunks(stratum_size) {
        let mut stratum = chunk.to_vec();
        stratum.shuffle(&mut rng);
        let n_train = ((stratum.len() as f64) * fraction).round() as usize;
        let n_train = n_train.min(stratum.len());
        train.extend_from_slice(&stratum[..n_train]);
        holdout.extend_from_slice(&stratum[n_train..]);
    }

    train.sort_unstable();
    holdout.sort_unstable();
    SplitIndices { train, holdout }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn response(n: usize) -> Vec<f64> {
        (0..n).map(|i| ((i * 37) % 101) as f64 + i as f64 * 0.01).collect()
    }

    #[test]
    fn partitions_are_disjoint_and_exhaustive() {
        let y = response(200);
        let parts = stratified_split(&y, 0.9, DEFAULT_STRATA, 42);

        let train: HashSet<usize> = parts.train.iter().copied().collect();
        let holdout: HashSet<usize> = parts.holdout.iter().copied().collect();
        assert!(train.is_disjoint(&holdout));
        assert_eq!(train.len() + holdout.len(), 200);
        assert_eq!(parts.train.len() + parts.holdout.len(), 200);
    }

    #[test]
    fn train_share_is_close_to_requested() {
        let y = response(500);
        let parts = stratified_split(&y, 0.9, DEFAULT_STRATA, 7);
        let share = parts.train.len() as f64 / 500.0;
        assert!((0.88..=0.92).contains(&share), "train share {share}");
    }

    #[test]
    fn identical_seed_reproduces_the_partition() {
        let y = response(137);
        let a = stratified_split(&y, 0.9, DEFAULT_STRATA, 99);
        let b = stratified_split(&y, 0.9, DEFAULT_STRATA, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let y = response(137);
        let a = stratified_split(&y, 0.9, DEFAULT_STRATA, 1);
        let b = stratified_split(&y, 0.9, DEFAULT_STRATA, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn strata_preserve_the_response_spread() {
        // Every stratum contributes to the holdout, so the holdout spans the
        // full response range rather than clustering at one end.
        let y: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let parts = stratified_split(&y, 0.9, DEFAULT_STRATA, 3);
        assert_eq!(parts.holdout.len(), 10);
        let lows = parts.holdout.iter().filter(|&&i| y[i] < 50.0).count();
        assert!((1..=9).contains(&lows), "holdout is lopsided: {lows} low rows");
    }

    #[test]
    fn empty_input_yields_empty_partitions() {
        let parts = stratified_split(&[], 0.9, DEFAULT_STRATA, 0);
        assert!(parts.train.is_empty());
        assert!(parts.holdout.is_empty());
    }
}
