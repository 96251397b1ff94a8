use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::SplitConfig;
use crate::types::{SourceImage, SplitAssignment};

/// Split source images into training, validation and testing sets.
///
/// Populated and empty images are shuffled independently with one seeded
/// generator (populated first), concatenated populated-then-empty and cut by
/// count: the first `train_size` share goes to train, the next `val_size`
/// share to val, the remainder to test. Input order does not matter, images
/// are sorted by path before shuffling.
pub fn allocate_splits(mut images: Vec<SourceImage>, config: &SplitConfig) -> SplitAssignment {
    images.sort_by(|a, b| a.path.cmp(&b.path));
    let (mut populated, mut empty): (Vec<_>, Vec<_>) =
        images.into_iter().partition(SourceImage::is_populated);

    info!(
        "Allocating splits: {} populated, {} empty source images.",
        populated.len(),
        empty.len()
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    populated.shuffle(&mut rng);
    empty.shuffle(&mut rng);

    let mut ordered = populated;
    ordered.append(&mut empty);

    let total = ordered.len();
    let train_size = ((total as f64 * config.train_size).floor() as usize).min(total);
    let val_size = ((total as f64 * config.val_size).floor() as usize).min(total - train_size);

    let test = ordered.split_off(train_size + val_size);
    let val = ordered.split_off(train_size);
    let train = ordered;

    info!(
        "Split sizes: train={}, val={}, test={}",
        train.len(),
        val.len(),
        test.len()
    );

    SplitAssignment { train, val, test }
}
