//! Persists bytecode-hash → {trusted, unknown, banned} reputation and the
//! admin operation that transitions it, cascading bans into the mempool.

use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use bundler_rpc_client::EthereumRpc;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytecodeStatus {
    Unknown,
    Trusted,
    Banned,
}

#[derive(Clone)]
pub struct BytecodeStore {
    pool: PgPool,
}

impl BytecodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bulk status lookup; hashes with no row are `Unknown`.
    pub async fn get_status(&self, hashes: &[B256]) -> Result<Vec<BytecodeStatus>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<&[u8]> = hashes.iter().map(|h| h.as_slice()).collect();
        let rows = sqlx::query("select hash, is_trusted from bytecodes where hash = any($1)")
            .bind(&raw as &[&[u8]])
            .fetch_all(&self.pool)
            .await
            .context("select bytecodes")?;

        // `is_trusted` is nullable: a row exists with it NULL for every helper
        // contract encountered but never explicitly trusted/banned (see
        // `MempoolStore::add`'s upsert). Decoding it as a non-nullable `bool`
        // would fail as soon as any such row is read back.
        let mut known: std::collections::HashMap<B256, Option<bool>> = std::collections::HashMap::new();
        for row in rows {
            let hash: Vec<u8> = row.try_get("hash")?;
            let is_trusted: Option<bool> = row.try_get("is_trusted")?;
            known.insert(B256::from_slice(&hash), is_trusted);
        }

        Ok(hashes
            .iter()
            .map(|h| match known.get(h) {
                None | Some(None) => BytecodeStatus::Unknown,
                Some(Some(true)) => BytecodeStatus::Trusted,
                Some(Some(false)) => BytecodeStatus::Banned,
            })
            .collect())
    }

    pub async fn all_trusted(&self, hashes: &[B256]) -> Result<bool> {
        let statuses = self.get_status(hashes).await?;
        Ok(!statuses.is_empty() && statuses.iter().all(|s| *s == BytecodeStatus::Trusted))
    }

    pub async fn any_banned(&self, hashes: &[B256]) -> Result<bool> {
        let statuses = self.get_status(hashes).await?;
        Ok(statuses.iter().any(|s| *s == BytecodeStatus::Banned))
    }

    /// Fetches current code at `address`, hashes it, upserts the reputation
    /// row, and — when transitioning to banned — cascade-deletes every
    /// pooled UserOp still valid and joined to that bytecode, atomically with
    /// the update. Lock order (bytecode row, then dependent UserOps) matches
    /// the fixed order required to avoid deadlocking against concurrent
    /// admissions.
    pub async fn set_by_address(&self, rpc: &dyn EthereumRpc, address: Address, is_trusted: bool) -> Result<B256> {
        let hash = rpc.code_hash(address).await.context("fetch code hash for reputation update")?;

        let mut tx = self.pool.begin().await.context("begin reputation update tx")?;

        sqlx::query(
            "insert into bytecodes(hash, is_trusted) values ($1, $2) \
             on conflict (hash) do update set is_trusted = excluded.is_trusted",
        )
        .bind(hash.as_slice())
        .bind(is_trusted)
        .execute(&mut *tx)
        .await
        .context("upsert bytecodes")?;

        if !is_trusted {
            let deleted = sqlx::query(
                "delete from user_ops where id in ( \
                    select uo.id from user_ops uo \
                    join user_ops_bytecodes uob on uob.user_op_id = uo.id \
                    join bytecodes b on b.id = uob.bytecode_id \
                    where b.hash = $1 and uo.expires_at > extract(epoch from now())::bigint and uo.tx_hash is null \
                )",
            )
            .bind(hash.as_slice())
            .execute(&mut *tx)
            .await
            .context("cascade delete banned user ops")?
            .rows_affected();
            if deleted > 0 {
                tracing::info!(bytecode_hash = %hash, deleted, "cascade-deleted pooled user ops for banned bytecode");
            }
        }

        tx.commit().await.context("commit reputation update tx")?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_is_trusted_column() {
        // get_status's None/Some(true)/Some(false) mapping is exercised end to
        // end against Postgres in the mempool integration suite; this just
        // pins the enum's intended tri-state meaning.
        assert_ne!(BytecodeStatus::Unknown, BytecodeStatus::Trusted);
        assert_ne!(BytecodeStatus::Trusted, BytecodeStatus::Banned);
    }
}
