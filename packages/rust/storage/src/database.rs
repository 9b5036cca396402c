//! Durable key-value backend on a local libSQL database file.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use sitemind_shared::{Result, SitemindError};
use tracing::{debug, info};

use crate::kv::KvStore;
use crate::migrations;

fn storage_err(e: impl std::fmt::Display) -> SitemindError {
    SitemindError::Storage(e.to_string())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now_millis() + i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2))
}

/// libSQL-backed [`KvStore`]. Open once and share behind an `Arc`.
pub struct LibsqlKv {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    closed: AtomicBool,
}

impl LibsqlKv {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SitemindError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let kv = Self {
            db,
            conn,
            closed: AtomicBool::new(false),
        };
        kv.run_migrations().await?;
        Ok(kv)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SitemindError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn conn(&self) -> Result<&Connection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SitemindError::Storage("store is closed".into()));
        }
        Ok(&self.conn)
    }

    /// Delete every expired value. Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now_millis()],
            )
            .await
            .map_err(storage_err)?;
        debug!(removed, "swept expired values");
        Ok(removed)
    }

    async fn strings(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<String>> {
        let mut rows = self.conn()?.query(sql, params).await.map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(row.get::<String>(0).map_err(storage_err)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl KvStore for LibsqlKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .strings(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_millis()],
            )
            .await?;
        Ok(values.into_iter().next())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expiry(ttl)],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, now_millis()],
        )
        .await
        .map_err(storage_err)?;

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expiry(ttl)],
            )
            .await
            .map_err(storage_err)?;
        Ok(inserted == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let values = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        let members = conn
            .execute("DELETE FROM zset WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        Ok(values + members > 0)
    }

    async fn zadd_if_absent(&self, key: &str, member: &str) -> Result<bool> {
        let inserted = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO zset (key, member) VALUES (?1, ?2)",
                params![key, member],
            )
            .await
            .map_err(storage_err)?;
        Ok(inserted == 1)
    }

    async fn zrange(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>> {
        let sql = if reverse {
            "SELECT member FROM zset WHERE key = ?1 ORDER BY seq DESC LIMIT ?2 OFFSET ?3"
        } else {
            "SELECT member FROM zset WHERE key = ?1 ORDER BY seq ASC LIMIT ?2 OFFSET ?3"
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.strings(sql, params![key, limit, offset]).await
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let mut rows = self
            .conn()?
            .query("SELECT COUNT(*) FROM zset WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as usize),
            None => Ok(0),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.strings(
            "SELECT key FROM kv
               WHERE substr(key, 1, length(?1)) = ?1
                 AND (expires_at IS NULL OR expires_at > ?2)
             UNION
             SELECT DISTINCT key FROM zset WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
            params![prefix, now_millis()],
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.load(Ordering::Acquire) {
            self.sweep_expired().await?;
            self.closed.store(true, Ordering::Release);
        }
        Ok(())
    }
}
