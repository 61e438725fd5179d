//! In-process fakes shared by the unit tests.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{TransactionBuilder, TxSignerSync};
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{keccak256, Address, Bytes, TxKind, B256, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use axum::{body::Bytes as Body, extract::State, http::HeaderMap, Router};
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use url::Url;

use crate::broadcaster::BundleRelay;
use crate::bundle::Bundle;
use crate::chain::{BlockStream, BlockSummary, ChainProvider, ReceiptSummary};
use crate::conflict::{BlocksApiResponse, BlocksIndex, BundleSimulator};
use crate::error::{BundleError, RelayError, RelayResult, Result};
use crate::relay::transport::SIGNATURE_HEADER;
use crate::relay::{BundleOptions, BundleSubmission, SimulationResult};

pub fn test_signer(seed: u8) -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::repeat_byte(seed)).expect("valid test key")
}

/// Legacy 1 wei transfer to `0xbb..bb` on chain 1.
pub fn presign(signer: &PrivateKeySigner, nonce: u64) -> Bytes {
    let mut tx = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 0,
        gas_limit: 21_000,
        to: TxKind::Call(Address::repeat_byte(0xbb)),
        value: U256::from(1),
        input: Bytes::new(),
    };
    let signature = signer.sign_transaction_sync(&mut tx).expect("signs");
    TxEnvelope::Legacy(tx.into_signed(signature)).encoded_2718().into()
}

pub fn transfer(to: Address, nonce: Option<u64>) -> TransactionRequest {
    let request = TransactionRequest::default().with_to(to).with_value(U256::from(1));
    match nonce {
        Some(nonce) => request.with_nonce(nonce),
        None => request,
    }
}

/// `eth_callBundle` result with one entry per `(gas_used, coinbase payment, error)`.
pub fn simulation_json(txs: &[(u64, &str, Option<&str>)]) -> Value {
    let results: Vec<Value> = txs
        .iter()
        .enumerate()
        .map(|(i, (gas_used, paid, error))| {
            let mut result = json!({
                "txHash": format!("{:#x}", B256::with_last_byte(i as u8 + 1)),
                "gasUsed": gas_used,
                "gasPrice": "0",
                "gasFees": "0",
                "coinbaseDiff": paid,
                "ethSentToCoinbase": paid,
                "value": "0x"
            });
            if let Some(error) = error {
                result["error"] = json!(error);
            }
            result
        })
        .collect();
    let total: u64 = txs.iter().map(|(gas, _, _)| gas).sum();
    json!({
        "bundleGasPrice": "0",
        "bundleHash": format!("{:#x}", B256::repeat_byte(0xbe)),
        "coinbaseDiff": "0",
        "ethSentToCoinbase": "0",
        "gasFees": "0",
        "results": results,
        "stateBlockNumber": 1,
        "totalGasUsed": total
    })
}

pub fn simulation(txs: &[(u64, &str, Option<&str>)]) -> SimulationResult {
    serde_json::from_value(simulation_json(txs)).expect("valid simulation")
}

// ───────────────────────── chain ─────────────────────────

/// Blocks are full unless a test says otherwise.
const FULL_BLOCK_GAS: u64 = 30_000_000;

#[derive(Default)]
struct ChainState {
    head: u64,
    tx_counts: HashMap<Address, u64>,
    blocks: HashMap<u64, BlockSummary>,
    receipts: HashMap<B256, ReceiptSummary>,
    raws: HashMap<B256, Bytes>,
    feed: Vec<u64>,
    sent: Vec<Bytes>,
}

/// Scripted chain. Every subscriber sees the block feed replayed from the
/// start, then any block pushed after it subscribed.
pub struct FakeChain {
    state: Mutex<ChainState>,
    live: broadcast::Sender<u64>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(ChainState::default()),
            live,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().expect("chain state")
    }

    pub fn set_tx_count(&self, account: Address, count: u64) {
        self.state().tx_counts.insert(account, count);
    }

    pub fn set_head(&self, number: u64) {
        self.state().head = number;
    }

    pub fn add_block(&self, number: u64, transactions: Vec<B256>) {
        self.insert_block(number, transactions, None);
    }

    pub fn add_block_with_base_fee(&self, number: u64, transactions: Vec<B256>, base_fee: u64) {
        self.insert_block(number, transactions, Some(base_fee));
    }

    fn insert_block(&self, number: u64, transactions: Vec<B256>, base_fee_per_gas: Option<u64>) {
        self.state().blocks.insert(
            number,
            BlockSummary {
                number,
                timestamp: 1_700_000_000 + number * 12,
                base_fee_per_gas,
                gas_used: FULL_BLOCK_GAS,
                gas_limit: FULL_BLOCK_GAS,
                transactions,
            },
        );
    }

    pub fn set_gas_used(&self, number: u64, gas_used: u64) {
        if let Some(block) = self.state().blocks.get_mut(&number) {
            block.gas_used = gas_used;
        }
    }

    pub fn mine(&self, hash: B256, block: u64, gas_used: u64) {
        self.state().receipts.insert(
            hash,
            ReceiptSummary {
                transaction_hash: hash,
                block_number: Some(block),
                gas_used,
                success: true,
            },
        );
    }

    pub fn add_raw(&self, hash: B256, raw: Bytes) {
        self.state().raws.insert(hash, raw);
    }

    /// Scripts the blocks replayed to subscribers. The head is left alone.
    pub fn set_block_feed(&self, feed: Vec<u64>) {
        self.state().feed = feed;
    }

    /// Announces `number` to current subscribers.
    pub fn push_block(&self, number: u64) {
        {
            let mut state = self.state();
            state.head = state.head.max(number);
        }
        let _ = self.live.send(number);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.state().sent.clone()
    }
}

#[async_trait]
impl ChainProvider for FakeChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(1)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state().head)
    }

    async fn transaction_count(&self, account: Address) -> Result<u64> {
        Ok(self.state().tx_counts.get(&account).copied().unwrap_or_default())
    }

    async fn block(&self, number: u64) -> Result<Option<BlockSummary>> {
        Ok(self.state().blocks.get(&number).cloned())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptSummary>> {
        Ok(self.state().receipts.get(&hash).cloned())
    }

    async fn raw_transaction(&self, hash: B256) -> Result<Option<Bytes>> {
        Ok(self.state().raws.get(&hash).cloned())
    }

    async fn estimate_gas(&self, _request: &TransactionRequest) -> Result<u64> {
        Ok(21_000)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256> {
        self.state().sent.push(raw.clone());
        Ok(keccak256(raw))
    }

    fn subscribe_blocks(&self) -> BlockStream {
        let script = self.state().feed.clone();
        let live = stream::unfold(self.live.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(number) => return Some((number, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        stream::iter(script).chain(live).boxed()
    }
}

// ───────────────────────── relays ─────────────────────────

enum Behavior {
    Accept,
    Reject,
    Fail,
}

pub struct FakeRelay {
    url: String,
    behavior: Behavior,
    delay: Option<Duration>,
    completed: AtomicUsize,
    targets: Mutex<Vec<u64>>,
}

impl FakeRelay {
    fn with_behavior(url: &str, behavior: Behavior) -> Self {
        Self {
            url: url.to_string(),
            behavior,
            delay: None,
            completed: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting(url: &str) -> Self {
        Self::with_behavior(url, Behavior::Accept)
    }

    pub fn rejecting(url: &str) -> Self {
        Self::with_behavior(url, Behavior::Reject)
    }

    pub fn failing(url: &str) -> Self {
        Self::with_behavior(url, Behavior::Fail)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Submissions that ran to completion.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<u64> {
        self.targets.lock().expect("targets").clone()
    }
}

#[async_trait]
impl BundleRelay for FakeRelay {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn submit_bundle(
        &self,
        signed: Vec<Bytes>,
        target_block: u64,
        _options: BundleOptions,
    ) -> Result<RelayResult<BundleSubmission>> {
        self.targets.lock().expect("targets").push(target_block);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = match self.behavior {
            Behavior::Accept => {
                let bundle = Bundle::from_raw(&signed)?;
                Ok(Ok(BundleSubmission {
                    bundle_hash: bundle.hash(),
                    transactions: bundle.bundle_transactions(),
                    target_block,
                }))
            }
            Behavior::Reject => Ok(Err(RelayError {
                message: "bundle rejected".into(),
                code: -32000,
            })),
            Behavior::Fail => Err(BundleError::Transport("connection refused".into())),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Replays scripted `eth_callBundle` answers in order and records each call
/// as `(txs, block, state_block)`.
pub struct FakeSimulator {
    answers: Mutex<Vec<RelayResult<SimulationResult>>>,
    calls: Mutex<Vec<(Vec<Bytes>, u64, u64)>>,
}

impl FakeSimulator {
    pub fn new(mut answers: Vec<RelayResult<SimulationResult>>) -> Self {
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<Bytes>, u64, u64)> {
        self.calls.lock().expect("calls").clone()
    }
}

#[async_trait]
impl BundleSimulator for FakeSimulator {
    async fn simulate_at(
        &self,
        signed: &[Bytes],
        block: u64,
        state_block: u64,
    ) -> Result<RelayResult<SimulationResult>> {
        self.calls
            .lock()
            .expect("calls")
            .push((signed.to_vec(), block, state_block));
        self.answers
            .lock()
            .expect("answers")
            .pop()
            .ok_or_else(|| BundleError::SimulationFailed("no scripted simulation left".into()))
    }
}

pub struct FakeIndex {
    response: BlocksApiResponse,
}

impl FakeIndex {
    pub fn new(response: BlocksApiResponse) -> Self {
        Self { response }
    }
}

#[async_trait]
impl BlocksIndex for FakeIndex {
    async fn fetch_block(&self, _number: u64) -> Result<BlocksApiResponse> {
        Ok(self.response.clone())
    }
}

// ───────────────────────── relay server ─────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub signature: Option<String>,
    pub body: Vec<u8>,
}

type Responder = dyn Fn(&Value) -> String + Send + Sync;

#[derive(Clone)]
struct ServerState {
    responder: Arc<Responder>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Local HTTP endpoint answering every POST with `responder(body)`.
pub struct RelayServer {
    pub url: Url,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RelayServer {
    pub async fn spawn<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = ServerState {
            responder: Arc::new(responder),
            requests: requests.clone(),
        };
        let app = Router::new().fallback(record).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind relay server");
        let addr: SocketAddr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: Url::parse(&format!("http://{addr}/")).expect("server url"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests").clone()
    }
}

async fn record(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Body,
) -> ([(&'static str, &'static str); 1], String) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    state.requests.lock().expect("requests").push(RecordedRequest {
        signature,
        body: body.to_vec(),
    });
    let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (
        [("content-type", "application/json")],
        (state.responder)(&parsed),
    )
}
