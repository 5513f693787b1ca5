use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One cross-validation fold as (train rows, test rows).
pub type Fold = (Vec<usize>, Vec<usize>);

/// Shuffled k-fold assignment of `n` rows.
///
/// The first `n % k` folds hold one extra test row. The same seed always
/// produces the same folds. Callers guarantee `2 <= k <= n`.
pub fn kfold(n: usize, k: usize, seed: u64) -> Vec<Fold> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let end = start + size;
        let test = order[start..end].to_vec();
        let train = order[..start]
            .iter()
            .chain(&order[end..])
            .copied()
            .collect();
        folds.push((train, test));
        start = end;
    }
    folds
}
