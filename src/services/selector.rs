//! Random reviewer selection.

use crate::models::User;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Mutex;

/// Source of randomness for reviewer picks.
///
/// Seed it with [`ReviewerSelector::seeded`] to make selections reproducible.
pub struct ReviewerSelector {
    rng: Mutex<StdRng>,
}

impl ReviewerSelector {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Uniformly sample up to `count` distinct ids from `pool`.
    ///
    /// Returns fewer than `count` ids when the pool is smaller.
    pub fn pick(&self, pool: &[User], count: usize) -> Vec<String> {
        // Poisoning leaves the generator state intact.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        pool.choose_multiple(&mut *rng, count)
            .map(|u| u.id.clone())
            .collect()
    }

    /// Uniformly pick one id, or `None` for an empty pool.
    pub fn pick_one(&self, pool: &[User]) -> Option<String> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        pool.choose(&mut *rng).map(|u| u.id.clone())
    }
}

impl Default for ReviewerSelector {
    fn default() -> Self {
        Self::from_entropy()
    }
}
