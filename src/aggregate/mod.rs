//! Secure aggregation client.
//!
//! Every party submits one count vector per round and gets back the
//! element-wise sum over all parties, with every sum at or below the
//! suppression threshold replaced by zero. Rounds are paired across
//! parties by position only, so all parties must run the same rounds in
//! the same order with vectors of the same length.

pub mod session;
pub mod wire;

pub use session::{AggregationSettings, TcpAggregator};

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// One aggregation round as submitted by the local party.
#[derive(Debug, Clone, Copy)]
pub struct Round<'a> {
    /// Series name, e.g. "male". Identical at every party for this round.
    pub name: &'a str,
    /// Bucket labels the counts are aligned with.
    pub labels: &'a [String],
    pub counts: &'a [u32],
    /// Sums at or below this value are suppressed. Zero disables suppression.
    pub k_threshold: u32,
}

impl<'a> Round<'a> {
    /// Fails fast when the counts do not line up with the bucket layout,
    /// instead of truncating or padding them.
    pub fn check_shape(&self) -> Result<()> {
        if self.counts.len() != self.labels.len() {
            return Err(Error::LengthMismatch {
                expected: self.labels.len(),
                actual: self.counts.len(),
            });
        }
        Ok(())
    }

    /// SHA-256 over the bucket labels, used by optional label verification.
    pub fn labels_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.labels.len() as u64).to_be_bytes());
        for label in self.labels {
            hasher.update((label.len() as u64).to_be_bytes());
            hasher.update(label.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Contract of the secure aggregation collaborator.
///
/// Implementations return the same vector to every party: the
/// position-wise sum of all submitted vectors with every sum `<= k`
/// replaced by zero.
pub trait SecureAggregator {
    async fn aggregate(&mut self, round: &Round<'_>) -> Result<Vec<u32>>;
}

/// Replaces every sum at or below `k_threshold` with the zero sentinel.
pub fn suppress(sums: &mut [u32], k_threshold: u32) {
    for sum in sums.iter_mut() {
        if *sum <= k_threshold {
            *sum = 0;
        }
    }
}

/// Adds `other` into `acc` modulo 2^32.
pub(crate) fn add_wrapping(acc: &mut [u32], other: &[u32]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a = a.wrapping_add(*b);
    }
}
