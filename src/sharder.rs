//! Consistent bucketing of subjects into percentile buckets.
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Number of buckets percentage rollouts are expressed in.
pub const TOTAL_BUCKETS: u64 = 100;

pub trait Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default (and only) sharder.
///
/// Takes the first four bytes of the SHA-256 digest as a big-endian signed integer and reduces its
/// absolute value modulo `total_shards`; `i32::MIN` maps to `2^31` rather than going negative.
/// The result depends on the input bytes only, so it is stable across processes and restarts.
pub struct Sha256Sharder;

impl Sharder for Sha256Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let hash = Sha256::digest(input.as_ref());
        let value = i32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]).unsigned_abs();
        u64::from(value) % total_shards
    }
}

/// Map `(subject_id, flag_id)` to a stable bucket in `[0, 100)`.
///
/// Different flags bucket the same subject independently.
pub fn bucket(subject_id: &str, flag_id: &str) -> u8 {
    bucket_with(&Sha256Sharder, subject_id, flag_id)
}

pub(crate) fn bucket_with(sharder: &impl Sharder, subject_id: &str, flag_id: &str) -> u8 {
    let shard = sharder.get_shard(format!("{subject_id}:{flag_id}"), TOTAL_BUCKETS);
    // shard < TOTAL_BUCKETS
    shard as u8
}

/// Minimum number of subjects for [`is_uniform_distribution`] to be meaningful.
pub const MIN_DISTRIBUTION_SAMPLE: usize = 1000;

/// Check that `subject_ids` spread evenly over the ten decile buckets of `flag_id`: every decile
/// must hold `10% ± tolerance` (relative) of the subjects.
///
/// Returns [`Error::InvalidConfiguration`] for samples smaller than [`MIN_DISTRIBUTION_SAMPLE`].
pub fn is_uniform_distribution<S: AsRef<str>>(
    subject_ids: &[S],
    flag_id: &str,
    tolerance: f64,
) -> Result<bool> {
    if subject_ids.len() < MIN_DISTRIBUTION_SAMPLE {
        return Err(Error::invalid(format!(
            "need at least {MIN_DISTRIBUTION_SAMPLE} subjects for a distribution check, got {}",
            subject_ids.len()
        )));
    }

    let mut deciles = [0usize; 10];
    for subject_id in subject_ids {
        deciles[usize::from(bucket(subject_id.as_ref(), flag_id) / 10)] += 1;
    }

    let expected = subject_ids.len() as f64 / 10.0;
    Ok(deciles
        .iter()
        .all(|&count| (count as f64 - expected).abs() / expected <= tolerance))
}
