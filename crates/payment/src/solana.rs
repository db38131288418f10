//! Solana wallet: native SOL transfers over JSON-RPC.
//!
//! Transactions are assembled by hand in the legacy wire format with a
//! single System Program transfer instruction, signed with ed25519.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{Value, json};
use tracing::{debug, trace};
use typewire_core::PaymentError;

use crate::wallet::Wallet;

/// The System Program id (all zero bytes).
const SYSTEM_PROGRAM_ID: [u8; 32] = [0; 32];

/// System Program instruction index for `Transfer`.
const TRANSFER_INSTRUCTION: u32 = 2;

/// Per-request bound for RPC calls when no client is supplied.
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// A hot wallet backed by an ed25519 keypair.
pub struct SolanaWallet {
    signing_key: SigningKey,
    rpc_url: String,
    http: reqwest::Client,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl SolanaWallet {
    /// Build a wallet from a base58 secret: a 64-byte keypair or a 32-byte seed.
    pub fn from_base58(secret: &str, rpc_url: impl Into<String>) -> Result<Self, PaymentError> {
        let bytes = bs58::decode(secret.trim())
            .into_vec()
            .map_err(|e| PaymentError::Wallet(format!("secret key is not valid base58: {e}")))?;

        let signing_key = match bytes.len() {
            64 => {
                let mut keypair = [0u8; 64];
                keypair.copy_from_slice(&bytes);
                SigningKey::from_keypair_bytes(&keypair)
                    .map_err(|e| PaymentError::Wallet(format!("invalid keypair: {e}")))?
            }
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                SigningKey::from_bytes(&seed)
            }
            n => {
                return Err(PaymentError::Wallet(format!(
                    "secret key must decode to 32 or 64 bytes, got {n}"
                )));
            }
        };

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Wallet(format!("failed to create RPC client: {e}")))?;

        Ok(Self {
            signing_key,
            rpc_url: rpc_url.into(),
            http,
            confirm_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        })
    }

    pub fn with_timeouts(mut self, confirm_timeout: Duration, poll_interval: Duration) -> Self {
        self.confirm_timeout = confirm_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Use `http` for RPC calls. Its request timeout bounds every call.
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn confirmation_timeout(&self, signature: &str) -> PaymentError {
        PaymentError::ConfirmationTimeout {
            signature: signature.to_string(),
            timeout_secs: self.confirm_timeout.as_secs(),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, PaymentError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        trace!(method, "Solana RPC call");
        let reply: Value = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::Wallet(format!("{method} failed: {e}")))?
            .json()
            .await
            .map_err(|e| PaymentError::Wallet(format!("{method} returned invalid JSON: {e}")))?;

        if let Some(error) = reply.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown RPC error");
            return Err(PaymentError::TransactionFailed(format!("{method}: {message}")));
        }

        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn latest_blockhash(&self) -> Result<[u8; 32], PaymentError> {
        let result = self
            .rpc("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
            .await?;
        let hash = result["value"]["blockhash"]
            .as_str()
            .ok_or_else(|| PaymentError::Wallet("getLatestBlockhash: missing blockhash".into()))?;
        decode_key(hash).map_err(|e| PaymentError::Wallet(format!("blockhash {e}")))
    }

    /// Serialize and sign a transfer transaction.
    fn build_transfer(&self, recipient: &[u8; 32], lamports: u64, blockhash: &[u8; 32]) -> Vec<u8> {
        let from = self.signing_key.verifying_key().to_bytes();
        let message = transfer_message(&from, recipient, lamports, blockhash);
        let signature = self.signing_key.sign(&message);

        let mut tx = Vec::with_capacity(1 + 64 + message.len());
        push_compact_u16(&mut tx, 1);
        tx.extend_from_slice(&signature.to_bytes());
        tx.extend_from_slice(&message);
        tx
    }
}

#[async_trait]
impl Wallet for SolanaWallet {
    fn address(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().to_bytes()).into_string()
    }

    async fn transfer(&self, recipient: &str, lamports: u64) -> Result<String, PaymentError> {
        let to = decode_key(recipient)
            .map_err(|e| PaymentError::InvalidDemand(format!("recipient {e}")))?;
        let blockhash = self.latest_blockhash().await?;
        let tx = self.build_transfer(&to, lamports, &blockhash);
        let encoded = base64::engine::general_purpose::STANDARD.encode(tx);

        let result = self
            .rpc(
                "sendTransaction",
                json!([encoded, { "encoding": "base64", "preflightCommitment": "confirmed" }]),
            )
            .await?;

        let signature = result
            .as_str()
            .ok_or_else(|| PaymentError::TransactionFailed("sendTransaction: no signature".into()))?
            .to_string();
        debug!(%signature, lamports, "Transfer submitted");
        Ok(signature)
    }

    async fn confirm(&self, signature: &str) -> Result<(), PaymentError> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;

        loop {
            let poll = self.rpc(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": true }]),
            );
            let result = tokio::time::timeout_at(deadline, poll)
                .await
                .map_err(|_| self.confirmation_timeout(signature))??;

            let status = &result["value"][0];
            if !status.is_null() {
                if !status["err"].is_null() {
                    return Err(PaymentError::TransactionFailed(format!(
                        "{signature}: {}",
                        status["err"]
                    )));
                }
                if matches!(
                    status["confirmationStatus"].as_str(),
                    Some("confirmed" | "finalized")
                ) {
                    debug!(%signature, "Transfer confirmed");
                    return Ok(());
                }
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return Err(self.confirmation_timeout(signature));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn decode_key(encoded: &str) -> Result<[u8; 32], String> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| format!("is not valid base58: {e}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("must be 32 bytes, got {}", b.len()))
}

/// Legacy message: header, account keys, blockhash, one transfer instruction.
fn transfer_message(
    from: &[u8; 32],
    to: &[u8; 32],
    lamports: u64,
    blockhash: &[u8; 32],
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(3 + 1 + 96 + 32 + 17);

    // One required signer, no read-only signers, one read-only unsigned (the program).
    msg.extend_from_slice(&[1, 0, 1]);

    push_compact_u16(&mut msg, 3);
    msg.extend_from_slice(from);
    msg.extend_from_slice(to);
    msg.extend_from_slice(&SYSTEM_PROGRAM_ID);

    msg.extend_from_slice(blockhash);

    push_compact_u16(&mut msg, 1);
    msg.push(2);
    push_compact_u16(&mut msg, 2);
    msg.extend_from_slice(&[0, 1]);

    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&TRANSFER_INSTRUCTION.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    push_compact_u16(&mut msg, data.len() as u16);
    msg.extend_from_slice(&data);

    msg
}

fn push_compact_u16(out: &mut Vec<u8>, mut value: u16) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}
