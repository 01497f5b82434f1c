//! Shards command implementation.

use anyhow::Result;
use kstream_core::stream::{ShardCatalog, StreamRegistry};
use kstream_core::Config;
use std::io::Write;

/// Print the shard ids of the configured stream, or one encoded split per
/// shard when `anchor` is given.
pub async fn run(config: Config, anchor: Option<String>) -> Result<()> {
    config.validate()?;

    let registry = StreamRegistry::new();
    let service = registry
        .get_or_connect(&config.stream.name, &config.aws)
        .await;
    let catalog = ShardCatalog::new(service);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match anchor {
        Some(anchor) => {
            for split in catalog.splits(&config.stream.name, &anchor).await? {
                out.write_all(&split.encode()?)?;
                out.write_all(b"\n")?;
            }
        }
        None => {
            for shard_id in catalog.shard_ids(&config.stream.name).await? {
                writeln!(out, "{}", shard_id)?;
            }
        }
    }

    Ok(())
}
