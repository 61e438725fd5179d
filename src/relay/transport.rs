//! Authenticated JSON-RPC over HTTP.
//!
//! Every request body is serialized exactly once, hashed, and signed with the
//! operator's identity key. Relays verify the `X-Flashbots-Signature` header
//! against those exact bytes, so the body must never be re-encoded after
//! signing.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use alloy::signers::Signer;
use alloy_primitives::{keccak256, Address};
use alloy_signer_local::PrivateKeySigner;
use reqwest::header::CONTENT_TYPE;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{BundleError, RelayError, RelayResult, Result};

pub const SIGNATURE_HEADER: &str = "X-Flashbots-Signature";

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    method: &'a str,
    params: P,
    id: u64,
    jsonrpc: &'static str,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug)]
pub struct AuthTransport {
    client: reqwest::Client,
    url: Url,
    auth_signer: PrivateKeySigner,
    next_id: AtomicU64,
}

impl AuthTransport {
    pub fn new(url: Url, auth_signer: PrivateKeySigner, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url,
            auth_signer,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn auth_address(&self) -> Address {
        self.auth_signer.address()
    }

    /// Sends `method` with `params` and decodes the result.
    ///
    /// A relay `"error"` member comes back as `Ok(Err(_))`; network
    /// failures and unparseable bodies are `Err(_)`.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<RelayResult<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_vec(&JsonRpcRequest {
            method,
            params,
            id,
            jsonrpc: "2.0",
        })?;
        let signature = self.sign_body(&body).await?;

        debug!("→ {} {} (id {})", self.url, method, id);
        let response = self
            .client
            .post(self.url.clone())
            .header(SIGNATURE_HEADER, signature)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        let envelope: JsonRpcResponse = serde_json::from_str(&text).map_err(|e| {
            BundleError::Transport(format!("{method}: HTTP {status}, malformed response: {e}"))
        })?;

        match envelope.error {
            Some(error) if !error.is_null() => Ok(Err(RelayError::from_value(error))),
            _ => {
                let result = serde_json::from_value(envelope.result).map_err(|e| {
                    BundleError::Transport(format!("{method}: unexpected result shape: {e}"))
                })?;
                Ok(Ok(result))
            }
        }
    }

    /// `<checksummed address>:0x<signature>` where the signature is an
    /// EIP-191 personal-sign of the hex string of keccak256(body).
    pub async fn sign_body(&self, body: &[u8]) -> Result<String> {
        let digest = format!("{:#x}", keccak256(body));
        let signature = self
            .auth_signer
            .sign_message(digest.as_bytes())
            .await
            .map_err(|e| BundleError::Signing(e.to_string()))?;
        Ok(format!(
            "{}:0x{}",
            self.auth_signer.address().to_checksum(None),
            hex::encode(signature.as_bytes())
        ))
    }
}
