//! Private relay access: authenticated transport, wire types and the
//! per-endpoint client.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{PendingBundle, PendingPrivateTransaction, PrivateTransactionOptions, RelayClient};
pub use transport::AuthTransport;
pub use types::{BlockTag, BundleOptions, BundleSubmission, SimulationResult, TransactionSimulation};
