//! Usage: conflict_report <target_block> <raw_tx>...
//!
//! Waits for the block after `target_block`, then explains why the given
//! bundle did not land in `target_block`.

use std::sync::Arc;

use alloy_primitives::Bytes;
use anyhow::{bail, Context, Result};
use tracing::info;

use relay_bundler::chain::connect_http;
use relay_bundler::config::BundlerConfig;
use relay_bundler::{logging, AuthTransport, BlocksApiClient, ConflictAnalyzer, InclusionWatcher, RelayClient};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = BundlerConfig::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref());

    let mut args = std::env::args().skip(1);
    let target_block: u64 = args
        .next()
        .context("usage: conflict_report <target_block> <raw_tx>...")?
        .parse()
        .context("target_block must be a block number")?;
    let txs = args
        .map(|arg| arg.parse::<Bytes>().with_context(|| format!("{arg:?} is not hex")))
        .collect::<Result<Vec<_>>>()?;
    if txs.is_empty() {
        bail!("at least one signed transaction is required");
    }

    let chain = connect_http(config.require_rpc_url()?, config.block_poll_interval);
    let watcher = InclusionWatcher::new(chain.clone()).with_timeout(config.inclusion_timeout);

    let relay_url = config.relay_urls.first().cloned().context("RELAY_URLS is empty")?;
    let transport = AuthTransport::new(relay_url, config.auth_signer()?, config.relay_request_timeout)?;
    let simulator = RelayClient::new(transport, chain.clone(), watcher.clone());
    let blocks = BlocksApiClient::new(config.blocks_api_url.clone(), config.relay_request_timeout)?;
    let analyzer = ConflictAnalyzer::new(Arc::new(simulator), Arc::new(blocks), chain);

    let next_block = target_block.checked_add(1).context("target_block has no following block")?;
    info!("⏳ waiting for block {} before analysing {}", next_block, target_block);
    watcher.wait_for_block(next_block).await?;

    let report = analyzer.conflicting_bundle(&txs, target_block).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
