//! `gridsched status` – links, nodes and loop passes.

use anyhow::Result;
use gridsched_core::heartbeat::CriticalLoop;
use gridsched_core::store::{DataSource, SqliteStore};

pub async fn run_status(store: &SqliteStore) -> Result<()> {
    let links = store.link_summaries().await?;
    if links.is_empty() {
        println!("No queued or active transfers.");
    } else {
        println!(
            "{:<8} {:<8} {:<8} {:<12} {}",
            "QUEUED", "ACTIVE", "STREAMS", "EMA(B/s)", "LINK"
        );
        for l in links {
            println!(
                "{:<8} {:<8} {:<8} {:<12.0} {}",
                l.submitted, l.active, l.streams, l.ema, l.link
            );
        }
    }

    let nodes = store.heartbeats().await?;
    if nodes.is_empty() {
        println!("\nNo nodes registered.");
        return Ok(());
    }
    println!();
    println!(
        "{:<20} {:<12} {:<6} {:<12} {:<12} {}",
        "NODE", "BEAT", "DRAIN", "SCHEDULER", "OPTIMIZER", "REAPER"
    );
    for n in nodes {
        let passes = store.last_pass_timestamps(&n.node).await?;
        let pass = |which: CriticalLoop| {
            passes
                .get(&which)
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "{:<20} {:<12} {:<6} {:<12} {:<12} {}",
            n.node,
            n.beat_at,
            if n.drain { "yes" } else { "no" },
            pass(CriticalLoop::Scheduler),
            pass(CriticalLoop::Optimizer),
            pass(CriticalLoop::Reaper)
        );
    }
    Ok(())
}
