//! `gridsched drain` – toggle a node's drain flag.

use anyhow::Result;
use gridsched_core::store::SqliteStore;

pub async fn run_drain(store: &SqliteStore, node: &str, on: bool) -> Result<()> {
    store.set_drain_flag(node, on).await?;
    if on {
        println!("Node {node} draining.");
    } else {
        println!("Node {node} no longer draining.");
    }
    Ok(())
}
