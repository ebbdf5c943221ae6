//! Stream-count controller: EMA-smoothed additive increase/decrease.

use crate::config::OptimizerConfig;
use crate::link::Link;

use super::state::{DecisionReason, OptimizerDecision, PairState};

/// `alpha * throughput + (1 - alpha) * previous`, seeded with the throughput
/// when the link has never been evaluated.
pub fn update_ema(previous: Option<f64>, throughput: f64, alpha: f64) -> f64 {
    match previous {
        Some(previous) => alpha * throughput + (1.0 - alpha) * previous,
        None => throughput,
    }
}

/// Decide the stream count for `link` from its observed state. Pure.
pub fn decide(link: &Link, state: &PairState, cfg: &OptimizerConfig) -> OptimizerDecision {
    let max = cfg.max_streams.max(1);
    let current = state.streams;
    let clamp = |n: u32| n.clamp(1, max);
    let ema_prev = state.ema;
    let ema = update_ema(
        state.last_decision_at.map(|_| ema_prev),
        state.throughput,
        cfg.ema_alpha,
    );
    let rate = state.success_rate;

    let steady = state.stable
        && state
            .last_decision_at
            .is_some_and(|t| state.timestamp - t < cfg.steady_interval_secs as i64);

    let (reason, streams, rationale) = if steady {
        let n = clamp(current);
        let elapsed = state
            .last_decision_at
            .map(|t| state.timestamp - t)
            .unwrap_or_default();
        (
            DecisionReason::Steady,
            n,
            format!(
                "steady: last hold {elapsed}s ago (< {}s), keeping {n} streams",
                cfg.steady_interval_secs
            ),
        )
    } else if state.completions == 0 {
        let n = clamp(current);
        (
            DecisionReason::NoCompletions,
            n,
            format!(
                "no completions in the last {}s, keeping {n} streams",
                cfg.window_secs
            ),
        )
    } else if rate >= cfg.high_success_rate && state.throughput >= ema_prev {
        let n = clamp(current.saturating_add(cfg.aggressive_increase_step));
        (
            DecisionReason::AggressiveIncrease,
            n,
            format!(
                "success rate {rate:.2} >= {:.2} and throughput {:.0} >= ema {ema_prev:.0}: {current} -> {n} streams",
                cfg.high_success_rate, state.throughput
            ),
        )
    } else if rate >= cfg.base_success_rate {
        let n = clamp(current.saturating_add(cfg.increase_step));
        (
            DecisionReason::Increase,
            n,
            format!(
                "success rate {rate:.2} >= {:.2}: {current} -> {n} streams",
                cfg.base_success_rate
            ),
        )
    } else if rate < cfg.low_success_rate {
        let n = clamp(current.saturating_sub(cfg.decrease_step));
        (
            DecisionReason::Decrease,
            n,
            format!(
                "low success rate {rate:.2} < {:.2}: {current} -> {n} streams",
                cfg.low_success_rate
            ),
        )
    } else {
        let n = clamp(current);
        (
            DecisionReason::Hold,
            n,
            format!(
                "success rate {rate:.2} within [{:.2}, {:.2}), keeping {n} streams",
                cfg.low_success_rate, cfg.base_success_rate
            ),
        )
    };

    OptimizerDecision {
        link: link.clone(),
        timestamp: state.timestamp,
        previous_streams: current,
        streams,
        reason,
        rationale,
        ema,
        state: state.clone(),
    }
}
