use crate::asset::AssetStore;
use crate::error::PradsError;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error};

/// Write-through persistence for the asset store.
///
/// Flushes are cursor-based: an entry is written iff it was seen at or
/// after the previous flush, and the cursor only moves forward. One
/// transaction covers each walk, so a failed flush leaves the database
/// untouched and the next interval retries the same entries.
pub struct AssetWriter {
    conn: Connection,
    db_last_update: u64,
    hostname: String,
}

const SELECT_SQL: &str = "SELECT ip, fp, time FROM assets WHERE service = ?1 AND ip = ?2 AND fp = ?3";
const UPDATE_SQL: &str = "UPDATE assets SET time = ?1, os = ?2, details = ?3 WHERE ip = ?4 AND fp = ?5";
const INSERT_SQL: &str = "INSERT INTO assets (ip, service, time, fp, mac, os, details, link, distance, hostname) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

/// One persisted row, as read back by `--dumpdb`.
#[derive(Debug, Clone)]
pub struct AssetRow {
    pub ip: String,
    pub service: String,
    pub time: u64,
    pub fp: String,
    pub mac: Option<String>,
    pub os: String,
    pub details: String,
    pub link: String,
    pub distance: u8,
    pub hostname: String,
}

impl AssetWriter {
    pub fn open(path: &str, hostname: &str) -> Result<Self, PradsError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, hostname)
    }

    pub fn open_in_memory(hostname: &str) -> Result<Self, PradsError> {
        Self::with_connection(Connection::open_in_memory()?, hostname)
    }

    fn with_connection(conn: Connection, hostname: &str) -> Result<Self, PradsError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS assets (
                 ip       TEXT NOT NULL,
                 service  TEXT NOT NULL,
                 time     INTEGER NOT NULL,
                 fp       TEXT NOT NULL,
                 mac      TEXT,
                 os       TEXT,
                 details  TEXT,
                 link     TEXT,
                 distance INTEGER,
                 hostname TEXT
             );
             CREATE INDEX IF NOT EXISTS assets_key ON assets (service, ip, fp);",
        )?;
        Ok(AssetWriter {
            conn,
            db_last_update: 0,
            hostname: hostname.to_string(),
        })
    }

    pub fn last_update(&self) -> u64 {
        self.db_last_update
    }

    /// Walks the store and writes every entry seen since the previous
    /// flush; returns how many rows were written.
    pub fn flush(&mut self, store: &AssetStore, now: u64) -> Result<usize, PradsError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0usize;

        for asset in store.iter() {
            if asset.last_seen < self.db_last_update {
                continue;
            }
            let ip = asset.ip.to_string();
            let service = asset.service.to_string();
            let fp = asset.fp.as_str();

            let existing: Option<i64> = {
                let mut select = tx.prepare_cached(SELECT_SQL)?;
                select
                    .query_row(params![service, ip, fp], |row| row.get::<_, i64>(2))
                    .optional()
                    .map_err(|e| {
                        error!(%service, %ip, fp, "asset select failed: {e}");
                        e
                    })?
            };

            let result = if existing.is_some() {
                let mut update = tx.prepare_cached(UPDATE_SQL)?;
                update.execute(params![asset.last_seen as i64, asset.os, asset.details, ip, fp])
            } else {
                let mut insert = tx.prepare_cached(INSERT_SQL)?;
                insert.execute(params![
                    ip,
                    service,
                    asset.last_seen as i64,
                    fp,
                    asset.mac,
                    asset.os,
                    asset.details,
                    asset.link,
                    asset.distance,
                    self.hostname,
                ])
            };
            result.map_err(|e| {
                error!(%service, %ip, fp, "asset write failed: {e}");
                e
            })?;
            written += 1;
        }

        tx.commit()?;
        self.db_last_update = now;
        debug!(written, "asset flush committed");
        Ok(written)
    }

    /// Every persisted row, most recent first.
    pub fn dump(&self) -> Result<Vec<AssetRow>, PradsError> {
        let mut stmt = self.conn.prepare(
            "SELECT ip, service, time, fp, mac, os, details, link, distance, hostname \
             FROM assets ORDER BY time DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AssetRow {
                ip: row.get(0)?,
                service: row.get(1)?,
                time: row.get::<_, i64>(2)?.max(0) as u64,
                fp: row.get(3)?,
                mac: row.get(4)?,
                os: row.get(5)?,
                details: row.get(6)?,
                link: row.get(7)?,
                distance: row.get::<_, i64>(8)?.clamp(0, 255) as u8,
                hostname: row.get(9)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
