use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bundler_types::trace::{Opcode, Trace, TraceFrame};
use bundler_types::UserOp;
use alloy::sol_types::{SolCall, SolEvent};
use reqwest::StatusCode;
use serde_json::Value;

use crate::quantity::{format_quantity, looks_like_unsupported_method, parse_quantity_u64};
use crate::{EthereumRpc, SimulationOutcome, UserOpReceipt};

alloy::sol! {
    #[derive(Debug)]
    struct PackedUserOperationForCall {
        address sender;
        uint256 nonce;
        bytes initCode;
        bytes callData;
        uint256 callGasLimit;
        uint256 verificationGasLimit;
        uint256 preVerificationGas;
        uint256 maxFeePerGas;
        uint256 maxPriorityFeePerGas;
        bytes paymasterAndData;
        bytes signature;
    }

    function simulateValidation(PackedUserOperationForCall userOp) external;
    function getUserOpHash(PackedUserOperationForCall userOp) external view returns (bytes32);
    function getDepositInfo(address account) external view returns (uint112 deposit, bool staked, uint112 stake, uint32 unstakeDelaySec, uint48 withdrawTime);

    event UserOperationEvent(bytes32 indexed userOpHash, address indexed sender, address indexed paymaster, uint256 nonce, bool success, uint256 actualGasCost, uint256 actualGasUsed);
    event UserOperationRevertReason(bytes32 indexed userOpHash, address indexed sender, uint256 nonce, bytes revertReason);
}

fn to_call_struct(user_op: &UserOp) -> PackedUserOperationForCall {
    PackedUserOperationForCall {
        sender: user_op.sender,
        nonce: user_op.nonce,
        initCode: user_op.init_code.clone(),
        callData: user_op.call_data.clone(),
        callGasLimit: user_op.call_gas_limit,
        verificationGasLimit: user_op.verification_gas_limit,
        preVerificationGas: user_op.pre_verification_gas,
        maxFeePerGas: user_op.max_fee_per_gas,
        maxPriorityFeePerGas: user_op.max_priority_fee_per_gas,
        paymasterAndData: user_op.paymaster_and_data.clone(),
        signature: user_op.signature.clone(),
    }
}

/// Live JSON-RPC-over-HTTP adapter with sticky-preferred-endpoint rotation
/// across a fixed pool of node URLs.
#[derive(Clone)]
pub struct JsonRpcEthereumClient {
    urls: Arc<Vec<String>>,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
    preferred_url: Arc<AtomicUsize>,
    last_seen_block: Arc<AtomicU64>,
}

impl JsonRpcEthereumClient {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        if urls.is_empty() {
            anyhow::bail!("rpc urls must not be empty");
        }
        let http = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            urls: Arc::new(urls),
            http,
            next_id: Arc::new(AtomicU64::new(1)),
            preferred_url: Arc::new(AtomicUsize::new(0)),
            last_seen_block: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Seeds `last_seen_block` from storage (the checkpoint a restart
    /// recovers) or, if none is persisted, leaves it at zero so the first
    /// call to `seed_from_chain_tip` is required before scanning events.
    pub fn seed_last_seen_block(&self, block: u64) {
        self.last_seen_block.store(block, Ordering::Relaxed);
    }

    pub async fn seed_from_chain_tip(&self) -> Result<()> {
        let tip = self.block_number().await?;
        self.last_seen_block.store(tip, Ordering::Relaxed);
        Ok(())
    }

    async fn block_number(&self) -> Result<u64> {
        let v = self.request("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity_u64(v).context("parse eth_blockNumber")
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        // Stick to a single "preferred" endpoint for consistency, but still
        // fall back to others in the pool on failure.
        let start = self.preferred_url.load(Ordering::Relaxed).wrapping_rem(self.urls.len());

        let mut last_err: Option<anyhow::Error> = None;
        for offset in 0..self.urls.len() {
            let idx = (start + offset) % self.urls.len();
            let url = &self.urls[idx];
            match self.http.post(url).json(&body).send().await.with_context(|| format!("{method} POST {url}")) {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.with_context(|| format!("{method} read body {url}"))?;
                    if status != StatusCode::OK {
                        last_err = Some(anyhow::anyhow!("{method} http status={} url={} body={}", status.as_u16(), url, text));
                        continue;
                    }
                    let v: Value = serde_json::from_str(&text).with_context(|| format!("{method} parse json"))?;
                    if let Some(err) = v.get("error") {
                        last_err = Some(anyhow::anyhow!("{method} rpc error: {err}"));
                        continue;
                    }
                    let Some(result) = v.get("result") else {
                        last_err = Some(anyhow::anyhow!("{method} missing result field"));
                        continue;
                    };
                    self.preferred_url.store(idx, Ordering::Relaxed);
                    return Ok(result.clone());
                }
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{method} failed")))
    }

    /// Like `request`, but surfaces the JSON-RPC `error` envelope instead of
    /// treating it as a terminal failure: `eth_call` is expected to revert
    /// during simulation, and the revert payload lives in `error.data`.
    async fn request_expect_error(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let start = self.preferred_url.load(Ordering::Relaxed).wrapping_rem(self.urls.len());
        let url = &self.urls[start];
        let resp = self.http.post(url).json(&body).send().await.with_context(|| format!("{method} POST {url}"))?;
        let text = resp.text().await.with_context(|| format!("{method} read body {url}"))?;
        let v: Value = serde_json::from_str(&text).with_context(|| format!("{method} parse json"))?;
        if let Some(result) = v.get("result") {
            anyhow::bail!("{method} did not revert as expected, result={result}");
        }
        v.get("error").cloned().ok_or_else(|| anyhow::anyhow!("{method} response has neither result nor error"))
    }

    async fn debug_trace_call(&self, to: Address, data: &Bytes) -> Result<Option<Trace>> {
        let params = serde_json::json!([
            { "to": format!("{to:#x}"), "data": format!("0x{}", hex::encode(data)) },
            "latest",
            { "tracer": "structLogger" },
        ]);
        match self.request("debug_traceCall", params).await {
            Ok(v) => Ok(Some(decode_struct_log_trace(v)?)),
            Err(e) if looks_like_unsupported_method(&e) => Ok(None),
            Err(e) => Err(e).context("debug_traceCall"),
        }
    }
}

fn decode_struct_log_trace(v: Value) -> Result<Trace> {
    let logs = v.get("structLogs").and_then(Value::as_array).context("structLogger trace missing structLogs")?;
    let mut frames = Vec::with_capacity(logs.len());
    for entry in logs {
        let op_name = entry.get("op").and_then(Value::as_str).unwrap_or("UNKNOWN");
        let depth = entry.get("depth").and_then(Value::as_u64).unwrap_or(0) as u32;
        let stack: Vec<U256> = entry
            .get("stack")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| U256::from_str_radix(s.trim_start_matches("0x"), 16).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();
        let memory = entry
            .get("memory")
            .and_then(Value::as_array)
            .map(|words| {
                let mut buf = Vec::new();
                for word in words.iter().filter_map(Value::as_str) {
                    buf.extend_from_slice(&hex::decode(word.trim_start_matches("0x")).unwrap_or_default());
                }
                Bytes::from(buf)
            })
            .unwrap_or_default();
        // Per-frame executing-contract address is not part of the standard
        // structLogger schema; callers that need EntryPoint self-call
        // detection supply it via `debug_traceCall`'s callTracer variant
        // instead. structLogger traces leave this at the zero address,
        // which the validator treats as "not the EntryPoint".
        frames.push(TraceFrame { depth, op: opcode_from_name(op_name), stack, memory, executing_contract: Address::ZERO });
    }
    Ok(frames)
}

fn opcode_from_name(name: &str) -> Opcode {
    match name {
        "BALANCE" => Opcode::Balance,
        "BASEFEE" => Opcode::Basefee,
        "BLOCKHASH" => Opcode::Blockhash,
        "COINBASE" => Opcode::Coinbase,
        "CREATE" => Opcode::Create,
        "CREATE2" => Opcode::Create2,
        "DIFFICULTY" | "PREVRANDAO" => Opcode::Prevrandao,
        "GASLIMIT" => Opcode::Gaslimit,
        "GASPRICE" => Opcode::Gasprice,
        "NUMBER" => Opcode::Number,
        "ORIGIN" => Opcode::Origin,
        "SELFBALANCE" => Opcode::Selfbalance,
        "SELFDESTRUCT" => Opcode::Selfdestruct,
        "TIMESTAMP" => Opcode::Timestamp,
        "GAS" => Opcode::Gas,
        "CALL" => Opcode::Call,
        "CALLCODE" => Opcode::Callcode,
        "DELEGATECALL" => Opcode::Delegatecall,
        "STATICCALL" => Opcode::Staticcall,
        "EXTCODEHASH" => Opcode::Extcodehash,
        "EXTCODESIZE" => Opcode::Extcodesize,
        "EXTCODECOPY" => Opcode::Extcodecopy,
        _ => Opcode::Other,
    }
}

#[async_trait]
impl EthereumRpc for JsonRpcEthereumClient {
    async fn is_contract(&self, address: Address) -> Result<bool> {
        if address.is_zero() {
            return Ok(false);
        }
        let v = self.request("eth_getCode", serde_json::json!([format!("{address:#x}"), "latest"])).await?;
        let code = v.as_str().context("eth_getCode result not a string")?;
        Ok(code.len() > 2)
    }

    async fn code_hash(&self, address: Address) -> Result<B256> {
        let v = self.request("eth_getCode", serde_json::json!([format!("{address:#x}"), "latest"])).await?;
        let code = v.as_str().context("eth_getCode result not a string")?;
        let bytes = hex::decode(code.trim_start_matches("0x")).context("decode eth_getCode result")?;
        Ok(alloy::primitives::keccak256(bytes))
    }

    async fn base_fee(&self) -> Result<U256> {
        let v = self.request("eth_getBlockByNumber", serde_json::json!(["latest", false])).await?;
        match v.get("baseFeePerGas").and_then(Value::as_str) {
            Some(s) => Ok(U256::from_str_radix(s.trim_start_matches("0x"), 16).context("parse baseFeePerGas")?),
            None => Ok(U256::ZERO),
        }
    }

    async fn balance_of_deposit(&self, entry_point: Address, paymaster: Address) -> Result<U256> {
        let call = getDepositInfoCall { account: paymaster };
        let data = call.abi_encode();
        let v = self
            .request("eth_call", serde_json::json!([{ "to": format!("{entry_point:#x}"), "data": format!("0x{}", hex::encode(&data)) }, "latest"]))
            .await?;
        let raw = v.as_str().context("eth_call result not a string")?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).context("decode getDepositInfo result")?;
        let decoded = getDepositInfoCall::abi_decode_returns(&bytes).context("decode getDepositInfo tuple")?;
        Ok(U256::from(decoded.deposit))
    }

    async fn simulate_validation(&self, entry_point: Address, user_op: &UserOp) -> Result<SimulationOutcome> {
        let call = simulateValidationCall { userOp: to_call_struct(user_op) };
        let data = Bytes::from(call.abi_encode());
        let trace = self.debug_trace_call(entry_point, &data).await?;
        let err = self
            .request_expect_error("eth_call", serde_json::json!([{ "to": format!("{entry_point:#x}"), "data": format!("0x{}", hex::encode(&data)) }, "latest"]))
            .await?;
        let raw = err.get("data").and_then(Value::as_str).context("simulateValidation revert missing data field")?;
        let raw = raw.trim_start_matches("0x");
        if raw.len() < 8 {
            anyhow::bail!("simulateValidation revert data too short: {raw}");
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hex::decode(&raw[..8]).context("decode revert selector")?);
        let payload = Bytes::from(hex::decode(&raw[8..]).context("decode revert payload")?);
        Ok(SimulationOutcome { revert_selector: selector, revert_payload: payload, trace })
    }

    async fn user_op_receipt(&self, entry_point: Address, hash: B256, from_block: u64) -> Result<Option<UserOpReceipt>> {
        let to_block = self.block_number().await?;
        self.last_seen_block.fetch_max(to_block, Ordering::Relaxed);

        let revert_filter = serde_json::json!({
            "address": format!("{entry_point:#x}"),
            "fromBlock": format_quantity(from_block),
            "toBlock": format_quantity(to_block),
            "topics": [format!("0x{:x}", UserOperationRevertReason::SIGNATURE_HASH), format!("{hash:#x}")],
        });
        let revert_logs = self.request("eth_getLogs", revert_filter).await?;
        if revert_logs.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
            let tx_hash = extract_tx_hash(&revert_logs)?;
            return Ok(Some(UserOpReceipt { tx_hash, accepted: false }));
        }

        let event_filter = serde_json::json!({
            "address": format!("{entry_point:#x}"),
            "fromBlock": format_quantity(from_block),
            "toBlock": format_quantity(to_block),
            "topics": [format!("0x{:x}", UserOperationEvent::SIGNATURE_HASH), format!("{hash:#x}")],
        });
        let event_logs = self.request("eth_getLogs", event_filter).await?;
        if event_logs.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
            let tx_hash = extract_tx_hash(&event_logs)?;
            return Ok(Some(UserOpReceipt { tx_hash, accepted: true }));
        }

        Ok(None)
    }

    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes) -> Result<U256> {
        let v = self
            .request(
                "eth_estimateGas",
                serde_json::json!([{ "from": format!("{from:#x}"), "to": format!("{to:#x}"), "data": format!("0x{}", hex::encode(&data)) }]),
            )
            .await?;
        let s = v.as_str().context("eth_estimateGas result not a string")?;
        Ok(U256::from_str_radix(s.trim_start_matches("0x"), 16).context("parse eth_estimateGas")?)
    }

    async fn get_user_op_hash(&self, entry_point: Address, user_op: &UserOp) -> Result<B256> {
        let call = getUserOpHashCall { userOp: to_call_struct(user_op) };
        let data = call.abi_encode();
        let v = self
            .request("eth_call", serde_json::json!([{ "to": format!("{entry_point:#x}"), "data": format!("0x{}", hex::encode(&data)) }, "latest"]))
            .await?;
        let raw = v.as_str().context("eth_call result not a string")?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).context("decode getUserOpHash result")?;
        if bytes.len() != 32 {
            anyhow::bail!("getUserOpHash returned {} bytes, expected 32", bytes.len());
        }
        Ok(B256::from_slice(&bytes))
    }

    fn last_seen_block(&self) -> u64 {
        self.last_seen_block.load(Ordering::Relaxed)
    }
}

fn extract_tx_hash(logs: &Value) -> Result<B256> {
    let first = logs.as_array().and_then(|a| a.first()).context("expected at least one log")?;
    let tx_hash = first.get("transactionHash").and_then(Value::as_str).context("log missing transactionHash")?;
    let bytes = hex::decode(tx_hash.trim_start_matches("0x")).context("decode transactionHash")?;
    Ok(B256::from_slice(&bytes))
}
