//! Share-weight resolution and proportional slot apportionment.

use std::collections::{BTreeMap, HashMap};

/// Organization used as a catch-all when a link's share table has no entry
/// for the requesting organization.
pub const PUBLIC_SHARE: &str = "public";

/// Activity used when an organization's activity table lacks an entry.
pub const DEFAULT_ACTIVITY: &str = "default";

/// Share configuration relevant to one link.
#[derive(Debug, Clone, Default)]
pub struct ShareTable {
    /// Organization weights configured for the link. Empty means the link has
    /// no share configuration and every organization is weighted equally.
    pub vo_weights: HashMap<String, f64>,
    /// Activity weights per organization (independent of the link).
    pub activity_weights: HashMap<String, HashMap<String, f64>>,
}

impl ShareTable {
    /// Weight of `vo` on this link, or `None` when the organization is unschedulable.
    pub fn vo_weight(&self, vo: &str) -> Option<f64> {
        if self.vo_weights.is_empty() {
            return Some(1.0);
        }
        self.vo_weights
            .get(vo)
            .or_else(|| self.vo_weights.get(PUBLIC_SHARE))
            .map(|w| w.max(0.0))
    }

    /// Weight of `activity` within `vo`.
    pub fn activity_weight(&self, vo: &str, activity: &str) -> f64 {
        let Some(table) = self.activity_weights.get(vo) else {
            return 1.0;
        };
        table
            .get(activity)
            .or_else(|| table.get(DEFAULT_ACTIVITY))
            .copied()
            .unwrap_or(1.0)
            .max(0.0)
    }
}

/// One participant in a proportional split.
#[derive(Debug, Clone)]
pub(crate) struct Claim<K> {
    pub key: K,
    pub weight: f64,
    /// Work the participant could use (active + pending). Zero-demand
    /// participants receive nothing.
    pub demand: u64,
}

/// Split `total` slots across `claims` proportionally to weight.
///
/// Claims with zero weight or zero demand get nothing. With `cap_by_demand`,
/// a claim whose proportional share covers its whole demand is fixed at its
/// demand and the excess is split again among the rest (water-filling).
/// Fractions are settled by largest remainder, so the result never exceeds
/// `total` and hands out all of it when demand allows.
pub(crate) fn apportion<K: Ord + Clone>(
    total: usize,
    claims: &[Claim<K>],
    cap_by_demand: bool,
) -> BTreeMap<K, usize> {
    let mut result: BTreeMap<K, usize> = claims.iter().map(|c| (c.key.clone(), 0)).collect();
    let mut open: Vec<&Claim<K>> = claims
        .iter()
        .filter(|c| c.weight > 0.0 && c.demand > 0)
        .collect();
    let mut remaining = total;

    if cap_by_demand {
        loop {
            let weight_sum: f64 = open.iter().map(|c| c.weight).sum();
            if open.is_empty() || weight_sum <= 0.0 {
                break;
            }
            let saturated: Vec<usize> = open
                .iter()
                .enumerate()
                .filter(|(_, c)| remaining as f64 * c.weight / weight_sum >= c.demand as f64)
                .map(|(i, _)| i)
                .collect();
            if saturated.is_empty() {
                break;
            }
            for &i in saturated.iter().rev() {
                let claim = open.remove(i);
                let give = usize::try_from(claim.demand).unwrap_or(usize::MAX).min(remaining);
                result.insert(claim.key.clone(), give);
                remaining -= give;
            }
        }
    }

    let weight_sum: f64 = open.iter().map(|c| c.weight).sum();
    if open.is_empty() || weight_sum <= 0.0 || remaining == 0 {
        return result;
    }

    let mut parts: Vec<(usize, usize, f64)> = open
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let exact = remaining as f64 * c.weight / weight_sum;
            let floor = exact.floor();
            (i, floor as usize, exact - floor)
        })
        .collect();

    // Float noise can push a floor one over; trim from the smallest fractions.
    let mut assigned: usize = parts.iter().map(|p| p.1).sum();
    while assigned > remaining {
        if let Some(p) = parts
            .iter_mut()
            .filter(|p| p.1 > 0)
            .min_by(|a, b| a.2.total_cmp(&b.2))
        {
            p.1 -= 1;
            assigned -= 1;
        } else {
            break;
        }
    }

    let mut order: Vec<usize> = (0..parts.len()).collect();
    order.sort_by(|&a, &b| {
        parts[b]
            .2
            .total_cmp(&parts[a].2)
            .then(open[parts[b].0].weight.total_cmp(&open[parts[a].0].weight))
            .then(open[parts[a].0].key.cmp(&open[parts[b].0].key))
    });
    let leftover = remaining - assigned;
    for &slot in order.iter().take(leftover) {
        parts[slot].1 += 1;
    }

    for (i, slots, _) in parts {
        result.insert(open[i].key.clone(), slots);
    }
    result
}
