//! Connects to Postgres and applies the bundler schema, using a Postgres
//! advisory lock so that multiple bundler-node processes starting
//! concurrently don't race each other running migrations.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Acquire, Executor, PgPool, Postgres};

const MIGRATIONS: &[(i32, &str)] = &[(1, include_str!("../db/migrations/0001_schema.sql"))];

/// Advisory lock key: ASCII "BNDLRMPL" packed into an i64.
const MIGRATION_LOCK_KEY: i64 = 0x424E_444C_524D_504C;

pub async fn connect(db_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .context("connect DB_URL")
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    let mut conn = pool.acquire().await.context("acquire connection for bundler-node migrations")?;

    sqlx::query("select pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .context("acquire bundler-node migration lock")?;

    let res: Result<()> = async {
        exec_sql_batch(&mut *conn, MIGRATIONS[0].1).await.context("apply bundler-node schema bootstrap (v1)")?;

        for (version, sql) in MIGRATIONS {
            if *version == 1 {
                continue;
            }
            let applied: Option<i32> = sqlx::query_scalar("select version from bundler_schema_migrations where version = $1")
                .bind(*version)
                .fetch_optional(&mut *conn)
                .await
                .context("read bundler_schema_migrations")?;
            if applied.is_some() {
                continue;
            }

            let mut tx = conn.begin().await.context("begin migration tx")?;
            exec_sql_batch(&mut *tx, sql).await.with_context(|| format!("apply bundler-node migration v{version}"))?;
            sqlx::query("insert into bundler_schema_migrations(version) values ($1)")
                .bind(*version)
                .execute(&mut *tx)
                .await
                .context("insert bundler_schema_migrations")?;
            tx.commit().await.context("commit migration tx")?;
        }
        Ok(())
    }
    .await;

    let _ = sqlx::query("select pg_advisory_unlock($1)").bind(MIGRATION_LOCK_KEY).execute(&mut *conn).await;

    res
}

async fn exec_sql_batch<E>(exec: &mut E, sql: &str) -> Result<()>
where
    for<'c> &'c mut E: Executor<'c, Database = Postgres>,
{
    for stmt in sql.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s)
            .execute(&mut *exec)
            .await
            .with_context(|| format!("execute migration statement: {}", s.lines().next().unwrap_or("")))?;
    }
    Ok(())
}
