//! Bundle submission to private relays: sign ordered legs, fan them out to
//! several relays, watch for inclusion, and explain misses.

pub mod admin;
pub mod broadcaster;
pub mod bundle;
pub mod capture;
pub mod chain;
pub mod config;
pub mod conflict;
pub mod error;
pub mod inclusion;
pub mod logging;
pub mod pricing;
pub mod relay;

#[cfg(test)]
mod testing;

pub use broadcaster::{BroadcastConfig, BroadcastOutcome, BundleRelay, MultiRelayBroadcaster};
pub use bundle::{Bundle, BundleLeg, BundleSigner, LegSigner, WalletSigner};
pub use chain::{ChainProvider, RpcChain};
pub use conflict::{BlocksApiClient, ConflictAnalyzer, ConflictReport, ConflictType};
pub use error::{BundleError, RelayError, RelayResult, Result};
pub use inclusion::{BundleResolution, InclusionWatcher, TransactionResolution};
pub use relay::{AuthTransport, RelayClient};
