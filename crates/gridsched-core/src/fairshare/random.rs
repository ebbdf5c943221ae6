//! Weighted-random admission: one organization draw per admitted request.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::store::TransferRequest;

use super::{FairShare, LinkBudget, WeightedQueue};

/// Picks an organization with probability proportional to its weight, then an
/// activity queue of that organization proportionally to activity weight, and
/// admits the queue's front request. Repeats until the budget or the queues
/// run out.
pub struct WeightedRandom {
    rng: Mutex<StdRng>,
}

impl WeightedRandom {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic draws for tests and reproducible simulations.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for WeightedRandom {
    fn default() -> Self {
        Self::new()
    }
}

/// Index drawn with probability proportional to `weights[i]`; uniform when
/// every weight is zero. `weights` must be non-empty.
fn pick_weighted<R: Rng>(rng: &mut R, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return rng.random_range(0..weights.len());
    }
    let mut x = rng.random::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        if x < w {
            return i;
        }
        x -= w;
    }
    // Rounding at the upper edge: fall back to the last positive weight.
    weights.iter().rposition(|&w| w > 0.0).unwrap_or(0)
}

impl FairShare for WeightedRandom {
    fn name(&self) -> &'static str {
        "weighted-random"
    }

    fn select(&self, queues: &mut [WeightedQueue], budget: LinkBudget) -> Vec<TransferRequest> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut admitted = Vec::new();

        while admitted.len() < budget.available {
            let mut orgs: Vec<(&str, f64)> = Vec::new();
            for q in queues.iter() {
                if q.vo_weight > 0.0
                    && !q.queue.pending.is_empty()
                    && !orgs.iter().any(|(vo, _)| *vo == q.queue.key.vo)
                {
                    orgs.push((q.queue.key.vo.as_str(), q.vo_weight));
                }
            }
            if orgs.is_empty() {
                break;
            }
            let weights: Vec<f64> = orgs.iter().map(|(_, w)| *w).collect();
            let vo = orgs[pick_weighted(&mut *rng, &weights)].0.to_string();

            let candidates: Vec<usize> = queues
                .iter()
                .enumerate()
                .filter(|(_, q)| q.queue.key.vo == vo && !q.queue.pending.is_empty())
                .map(|(i, _)| i)
                .collect();
            let weights: Vec<f64> = candidates
                .iter()
                .map(|&i| queues[i].activity_weight)
                .collect();
            let chosen = candidates[pick_weighted(&mut *rng, &weights)];
            if let Some(request) = queues[chosen].queue.pending.pop_front() {
                admitted.push(request);
            }
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_weighted_never_selects_zero_weight() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            let i = pick_weighted(&mut rng, &[0.0, 2.0, 0.0, 1.0]);
            assert!(i == 1 || i == 3);
        }
    }

    #[test]
    fn pick_weighted_all_zero_is_uniform_over_indices() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut seen = [false; 3];
        for _ in 0..300 {
            seen[pick_weighted(&mut rng, &[0.0, 0.0, 0.0])] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
