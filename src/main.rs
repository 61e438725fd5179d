use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use relay_bundler::admin::{serve_admin, AdminState};
use relay_bundler::chain::connect_http;
use relay_bundler::config::BundlerConfig;
use relay_bundler::{
    logging, AuthTransport, BlocksApiClient, BundleRelay, ChainProvider, ConflictAnalyzer, InclusionWatcher,
    LegSigner, MultiRelayBroadcaster, RelayClient, WalletSigner,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = BundlerConfig::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref());

    let chain = connect_http(config.require_rpc_url()?, config.block_poll_interval);
    let chain_id = chain.chain_id().await.context("failed to reach RPC_URL")?;
    let watcher = InclusionWatcher::new(chain.clone()).with_timeout(config.inclusion_timeout);

    let auth_signer = config.auth_signer()?;
    info!("🚀 relay_bundler on chain {} as relay identity {}", chain_id, auth_signer.address());

    let clients = config
        .relay_urls
        .iter()
        .map(|url| {
            let transport = AuthTransport::new(url.clone(), auth_signer.clone(), config.relay_request_timeout)?;
            Ok(Arc::new(RelayClient::new(transport, chain.clone(), watcher.clone())))
        })
        .collect::<Result<Vec<_>>>()?;
    let primary = clients.first().cloned().context("RELAY_URLS is empty")?;
    for client in &clients {
        info!("📡 relay {}", client.url());
    }

    let relays: Vec<Arc<dyn BundleRelay>> = clients.into_iter().map(|c| c as Arc<dyn BundleRelay>).collect();
    let broadcaster = MultiRelayBroadcaster::new(relays, chain.clone(), watcher, config.broadcast_config());

    let blocks = BlocksApiClient::new(config.blocks_api_url.clone(), config.relay_request_timeout)?;
    let analyzer = ConflictAnalyzer::new(primary, Arc::new(blocks), chain.clone());

    let wallet = config.wallet_signer()?.map(|key| {
        info!("👛 unsigned legs will be signed by {}", key.address());
        Arc::new(WalletSigner::new(key, chain.clone())) as Arc<dyn LegSigner>
    });

    let state = AdminState {
        broadcaster: Arc::new(broadcaster),
        analyzer: Arc::new(analyzer),
        chain,
        wallet,
    };
    serve_admin(state, config.admin_addr).await
}
