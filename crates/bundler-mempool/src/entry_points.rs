//! Supported-EntryPoint registry: a small set of addresses every admission
//! operation filters against.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use sqlx::PgPool;

#[derive(Clone)]
pub struct EntryPointRegistry {
    pool: PgPool,
}

fn lower_hex(address: Address) -> String {
    format!("{address:#x}").to_lowercase()
}

impl EntryPointRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn is_supported(&self, address: Address) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("select exists(select 1 from entry_points where lower(address) = lower($1))")
                .bind(lower_hex(address))
                .fetch_one(&self.pool)
                .await
                .context("select entry_points")?;
        Ok(exists)
    }

    /// Idempotent, case-insensitive: adding an already-present entry point
    /// (regardless of case) is a no-op.
    pub async fn add(&self, address: Address) -> Result<()> {
        sqlx::query(
            "insert into entry_points(address) values ($1) \
             on conflict ((lower(address))) do nothing",
        )
        .bind(lower_hex(address))
        .execute(&self.pool)
        .await
        .context("insert entry_points")?;
        Ok(())
    }

    pub async fn remove(&self, address: Address) -> Result<()> {
        sqlx::query("delete from entry_points where lower(address) = lower($1)")
            .bind(lower_hex(address))
            .execute(&self.pool)
            .await
            .context("delete entry_points")?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Address>> {
        let rows: Vec<(String,)> = sqlx::query_as("select address from entry_points order by address")
            .fetch_all(&self.pool)
            .await
            .context("list entry_points")?;
        rows.into_iter()
            .map(|(addr,)| addr.parse::<Address>().context("parse stored entry_point address"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_hex_is_case_insensitive_key() {
        let a = Address::repeat_byte(0xAB);
        assert_eq!(lower_hex(a), lower_hex(a));
        assert_eq!(lower_hex(a), format!("{a:#x}").to_lowercase());
    }
}
