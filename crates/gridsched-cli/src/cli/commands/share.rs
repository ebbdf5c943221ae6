//! `gridsched share` – set an organization's share on a link.

use anyhow::Result;
use gridsched_core::link::{Endpoint, Link};
use gridsched_core::store::SqliteStore;

pub async fn run_share(
    store: &SqliteStore,
    source: &str,
    destination: &str,
    vo: &str,
    weight: f64,
) -> Result<()> {
    let link = Link::new(Endpoint::from_url(source)?, Endpoint::from_url(destination)?);
    store.set_share(&link, vo, weight).await?;
    println!("Share of {vo} on {link} set to {weight}.");
    Ok(())
}
