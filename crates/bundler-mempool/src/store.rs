//! Persists UserOps; per-sender replacement, expiry queries, and receipt
//! reconciliation against the RPC adapter's event scan.

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::{Context, Result};
use bundler_rpc_client::EthereumRpc;
use bundler_types::UserOp;
use sqlx::{PgPool, Row};

/// `PooledUserOp`: a UserOp plus the bookkeeping fields the mempool owns.
#[derive(Debug, Clone)]
pub struct PooledUserOp {
    pub hash: B256,
    pub user_op: UserOp,
    pub entry_point: Address,
    pub pre_op_gas: U256,
    pub valid_after: i64,
    pub valid_until: i64,
    pub expires_at: i64,
    pub is_trusted: bool,
    pub tx_hash: Option<B256>,
    pub accepted: Option<bool>,
}

impl PooledUserOp {
    /// `expires_at > now AND tx_hash IS NULL`.
    pub fn is_valid(&self, now: i64) -> bool {
        self.expires_at > now && self.tx_hash.is_none()
    }
}

#[derive(Clone)]
pub struct MempoolStore {
    pool: PgPool,
}

fn row_to_pooled(row: &sqlx::postgres::PgRow) -> Result<PooledUserOp> {
    let hash: Vec<u8> = row.try_get("hash")?;
    let sender: Vec<u8> = row.try_get("sender")?;
    let nonce: Vec<u8> = row.try_get("nonce")?;
    let init_code: Vec<u8> = row.try_get("init_code")?;
    let call_data: Vec<u8> = row.try_get("call_data")?;
    let call_gas_limit: Vec<u8> = row.try_get("call_gas_limit")?;
    let verification_gas_limit: Vec<u8> = row.try_get("verification_gas_limit")?;
    let pre_verification_gas: Vec<u8> = row.try_get("pre_verification_gas")?;
    let max_fee_per_gas: Vec<u8> = row.try_get("max_fee_per_gas")?;
    let max_priority_fee_per_gas: Vec<u8> = row.try_get("max_priority_fee_per_gas")?;
    let paymaster_and_data: Vec<u8> = row.try_get("paymaster_and_data")?;
    let signature: Vec<u8> = row.try_get("signature")?;
    let entry_point: Vec<u8> = row.try_get("entry_point")?;
    let pre_op_gas: Vec<u8> = row.try_get("pre_op_gas")?;
    let tx_hash: Option<Vec<u8>> = row.try_get("tx_hash")?;

    Ok(PooledUserOp {
        hash: B256::from_slice(&hash),
        user_op: UserOp {
            sender: Address::from_slice(&sender),
            nonce: U256::from_be_slice(&nonce),
            init_code: Bytes::from(init_code),
            call_data: Bytes::from(call_data),
            call_gas_limit: U256::from_be_slice(&call_gas_limit),
            verification_gas_limit: U256::from_be_slice(&verification_gas_limit),
            pre_verification_gas: U256::from_be_slice(&pre_verification_gas),
            max_fee_per_gas: U256::from_be_slice(&max_fee_per_gas),
            max_priority_fee_per_gas: U256::from_be_slice(&max_priority_fee_per_gas),
            paymaster_and_data: Bytes::from(paymaster_and_data),
            signature: Bytes::from(signature),
        },
        entry_point: Address::from_slice(&entry_point),
        pre_op_gas: U256::from_be_slice(&pre_op_gas),
        valid_after: row.try_get("valid_after")?,
        valid_until: row.try_get("valid_until")?,
        expires_at: row.try_get("expires_at")?,
        is_trusted: row.try_get("is_trusted")?,
        tx_hash: tx_hash.map(|b| B256::from_slice(&b)),
        accepted: row.try_get("accepted")?,
    })
}

impl MempoolStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes the existing pooled UserOp for this sender (if any), persists
    /// the new one with `tx_hash=NULL`, and persists the join relation to
    /// each helper's bytecode row (creating `unknown` rows on first
    /// encounter) — all inside one transaction, the per-sender
    /// delete-then-insert pattern.
    #[allow(clippy::too_many_arguments)]
    pub async fn add(
        &self,
        hash: B256,
        user_op: &UserOp,
        entry_point: Address,
        pre_op_gas: U256,
        is_trusted: bool,
        valid_after: i64,
        valid_until: i64,
        expires_at: i64,
        helper_bytecode_hashes: &[B256],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin admission tx")?;

        sqlx::query("delete from user_ops where sender = $1")
            .bind(user_op.sender.as_slice())
            .execute(&mut *tx)
            .await
            .context("delete existing pooled user op for sender")?;

        let row = sqlx::query(
            "insert into user_ops( \
                hash, sender, nonce, init_code, call_data, call_gas_limit, verification_gas_limit, \
                pre_verification_gas, max_fee_per_gas, max_priority_fee_per_gas, paymaster_and_data, signature, \
                entry_point, pre_op_gas, valid_after, valid_until, expires_at, is_trusted, tx_hash, accepted \
             ) values ( \
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, null, null \
             ) returning id",
        )
        .bind(hash.as_slice())
        .bind(user_op.sender.as_slice())
        .bind(user_op.nonce.to_be_bytes::<32>().to_vec())
        .bind(user_op.init_code.to_vec())
        .bind(user_op.call_data.to_vec())
        .bind(user_op.call_gas_limit.to_be_bytes::<32>().to_vec())
        .bind(user_op.verification_gas_limit.to_be_bytes::<32>().to_vec())
        .bind(user_op.pre_verification_gas.to_be_bytes::<32>().to_vec())
        .bind(user_op.max_fee_per_gas.to_be_bytes::<32>().to_vec())
        .bind(user_op.max_priority_fee_per_gas.to_be_bytes::<32>().to_vec())
        .bind(user_op.paymaster_and_data.to_vec())
        .bind(user_op.signature.to_vec())
        .bind(entry_point.as_slice())
        .bind(pre_op_gas.to_be_bytes::<32>().to_vec())
        .bind(valid_after)
        .bind(valid_until)
        .bind(expires_at)
        .bind(is_trusted)
        .fetch_one(&mut *tx)
        .await
        .context("insert user_ops")?;
        let user_op_id: i64 = row.try_get("id")?;

        for helper_hash in helper_bytecode_hashes {
            let bytecode_id: i64 = sqlx::query_scalar(
                "insert into bytecodes(hash, is_trusted) values ($1, null) \
                 on conflict (hash) do update set hash = excluded.hash \
                 returning id",
            )
            .bind(helper_hash.as_slice())
            .fetch_one(&mut *tx)
            .await
            .context("upsert bytecode row for helper contract")?;

            sqlx::query(
                "insert into user_ops_bytecodes(user_op_id, bytecode_id) values ($1, $2) \
                 on conflict do nothing",
            )
            .bind(user_op_id)
            .bind(bytecode_id)
            .execute(&mut *tx)
            .await
            .context("insert user_ops_bytecodes join row")?;
        }

        tx.commit().await.context("commit admission tx")?;
        Ok(())
    }

    pub async fn get_by_hash(&self, hash: B256) -> Result<Option<PooledUserOp>> {
        let row = sqlx::query("select * from user_ops where hash = $1")
            .bind(hash.as_slice())
            .fetch_optional(&self.pool)
            .await
            .context("select user_ops by hash")?;
        row.as_ref().map(row_to_pooled).transpose()
    }

    /// Whether any valid (non-expired, not yet executed) UserOp intersects
    /// `helper_bytecode_hashes` with an `unknown`-reputation helper and a
    /// different sender — the anti-DoS same-bytecode-tenancy check.
    pub async fn any_other_sender_using_unknown_bytecode(
        &self,
        sender: Address,
        helper_bytecode_hashes: &[B256],
        now: i64,
    ) -> Result<bool> {
        if helper_bytecode_hashes.is_empty() {
            return Ok(false);
        }
        let raw: Vec<&[u8]> = helper_bytecode_hashes.iter().map(|h| h.as_slice()).collect();
        let exists: bool = sqlx::query_scalar(
            "select exists( \
                select 1 from user_ops uo \
                join user_ops_bytecodes uob on uob.user_op_id = uo.id \
                join bytecodes b on b.id = uob.bytecode_id \
                where b.hash = any($1) \
                  and b.is_trusted is null \
                  and uo.sender != $2 \
                  and uo.expires_at > $3 \
                  and uo.tx_hash is null \
            )",
        )
        .bind(&raw as &[&[u8]])
        .bind(sender.as_slice())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("select anti-DoS same-bytecode-tenancy check")?;
        Ok(exists)
    }

    /// Iterates `valid` rows (`expires_at > now AND tx_hash IS NULL`) until
    /// `count` non-executed rows are assembled. Each visited row is
    /// reconciled first; rows that transition to executed are not counted
    /// but the reconciliation side effect is kept.
    pub async fn list_last(&self, rpc: &dyn EthereumRpc, count: usize, now: i64) -> Result<Vec<PooledUserOp>> {
        let candidates = sqlx::query("select * from user_ops where expires_at > $1 and tx_hash is null order by id desc")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .context("select candidate user_ops for list_last")?;

        let mut out = Vec::with_capacity(count);
        for row in &candidates {
            if out.len() >= count {
                break;
            }
            let mut pooled = row_to_pooled(row)?;
            if self.reconcile_receipt(rpc, &mut pooled).await? {
                continue;
            }
            out.push(pooled);
        }
        Ok(out)
    }

    /// No-op if `tx_hash` is already set; otherwise queries the RPC adapter
    /// for events and, on a match, persists `tx_hash`/`accepted`. Idempotent:
    /// once `tx_hash` is set, `accepted` never flips afterwards. Returns
    /// whether the row transitioned to executed.
    pub async fn reconcile_receipt(&self, rpc: &dyn EthereumRpc, pooled: &mut PooledUserOp) -> Result<bool> {
        if pooled.tx_hash.is_some() {
            return Ok(false);
        }
        let from_block = rpc.last_seen_block();
        let Some(receipt) = rpc.user_op_receipt(pooled.entry_point, pooled.hash, from_block).await? else {
            return Ok(false);
        };

        let n = sqlx::query("update user_ops set tx_hash = $1, accepted = $2 where hash = $3 and tx_hash is null")
            .bind(receipt.tx_hash.as_slice())
            .bind(receipt.accepted)
            .bind(pooled.hash.as_slice())
            .execute(&self.pool)
            .await
            .context("persist reconciled receipt")?
            .rows_affected();

        if n == 1 {
            pooled.tx_hash = Some(receipt.tx_hash);
            pooled.accepted = Some(receipt.accepted);
            Ok(true)
        } else {
            // Lost the race to a concurrent reconciliation; re-read to stay consistent.
            Ok(self.get_by_hash(pooled.hash).await?.map(|p| p.tx_hash.is_some()).unwrap_or(false))
        }
    }

    pub async fn get_receipt(&self, rpc: &dyn EthereumRpc, hash: B256) -> Result<Option<(B256, bool)>> {
        let Some(mut pooled) = self.get_by_hash(hash).await? else {
            return Ok(None);
        };
        self.reconcile_receipt(rpc, &mut pooled).await?;
        Ok(pooled.tx_hash.zip(pooled.accepted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_requires_unexpired_and_unexecuted() {
        let mut pooled = sample();
        pooled.expires_at = 2_000;
        pooled.tx_hash = None;
        assert!(pooled.is_valid(1_000));

        pooled.tx_hash = Some(B256::ZERO);
        assert!(!pooled.is_valid(1_000));

        pooled.tx_hash = None;
        pooled.expires_at = 500;
        assert!(!pooled.is_valid(1_000));
    }

    fn sample() -> PooledUserOp {
        PooledUserOp {
            hash: B256::repeat_byte(1),
            user_op: UserOp {
                sender: Address::repeat_byte(2),
                nonce: U256::ZERO,
                init_code: Bytes::new(),
                call_data: Bytes::new(),
                call_gas_limit: U256::from(100_000),
                verification_gas_limit: U256::from(100_000),
                pre_verification_gas: U256::from(50_000),
                max_fee_per_gas: U256::from(10),
                max_priority_fee_per_gas: U256::from(1),
                paymaster_and_data: Bytes::new(),
                signature: Bytes::new(),
            },
            entry_point: Address::repeat_byte(3),
            pre_op_gas: U256::from(100_000),
            valid_after: 0,
            valid_until: 2_000,
            expires_at: 2_000,
            is_trusted: false,
            tx_hash: None,
            accepted: None,
        }
    }
}
