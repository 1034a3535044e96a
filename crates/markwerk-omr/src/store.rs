// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Results store backed by SQLite.
//
// Schema:
//   page_results(
//     source       TEXT    NOT NULL,
//     page_index   INTEGER NOT NULL,
//     source_hash  TEXT    NOT NULL,   -- SHA-256 of the scanned document
//     status       TEXT    NOT NULL,   -- "finalized" | "failed"
//     result_json  TEXT    NOT NULL,   -- serialised PageResult
//     result_hash  TEXT    NOT NULL,   -- SHA-256 of result_json
//     stored_at    TEXT    NOT NULL,   -- RFC 3339
//     PRIMARY KEY (source, source_hash, page_index)
//   )
//   overrides(                         -- append-only
//     seq          INTEGER PRIMARY KEY AUTOINCREMENT,
//     id           TEXT    NOT NULL UNIQUE,
//     source       TEXT    NOT NULL,
//     source_hash  TEXT    NOT NULL,
//     page_index   INTEGER NOT NULL,
//     group_id     INTEGER NOT NULL,
//     corrected    TEXT,
//     reason       TEXT    NOT NULL,
//     recorded_at  TEXT    NOT NULL
//   )

use std::path::Path;

use chrono::{DateTime, Utc};
use markwerk_core::error::{MarkwerkError, Result};
use markwerk_core::types::{PageRef, PageResult};
use markwerk_document::integrity::{hash_bytes, verify_hash};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use crate::review::{OverrideEvent, ReviewLedger};

const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS page_results (
        source       TEXT    NOT NULL,
        page_index   INTEGER NOT NULL,
        source_hash  TEXT    NOT NULL,
        status       TEXT    NOT NULL,
        result_json  TEXT    NOT NULL,
        result_hash  TEXT    NOT NULL,
        stored_at    TEXT    NOT NULL,
        PRIMARY KEY (source, source_hash, page_index)
    );
    CREATE TABLE IF NOT EXISTS overrides (
        seq          INTEGER PRIMARY KEY AUTOINCREMENT,
        id           TEXT    NOT NULL UNIQUE,
        source       TEXT    NOT NULL,
        source_hash  TEXT    NOT NULL,
        page_index   INTEGER NOT NULL,
        group_id     INTEGER NOT NULL,
        corrected    TEXT,
        reason       TEXT    NOT NULL,
        recorded_at  TEXT    NOT NULL
    );
"#;

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> MarkwerkError + '_ {
    move |e| MarkwerkError::Database(format!("{context}: {e}"))
}

/// Persistent page results and review overrides.
///
/// Synchronous like `rusqlite` itself; call from `spawn_blocking` inside
/// async code.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open (or create) the store at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(db_err("create tables"))?;
        info!("results database opened");
        Ok(Self { conn })
    }

    /// In-memory store (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(db_err("create tables"))?;
        debug!("in-memory results database opened");
        Ok(Self { conn })
    }

    /// Insert or replace the result for one page of one scanned document.
    /// A different document stored under the same name is kept alongside.
    #[instrument(skip_all, fields(page = %result.page))]
    pub fn save_page(&self, result: &PageResult) -> Result<()> {
        let json = serde_json::to_string(result)?;
        let status = if result.is_finalized() { "finalized" } else { "failed" };
        self.conn
            .execute(
                "INSERT INTO page_results
                     (source, page_index, source_hash, status, result_json, result_hash, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (source, source_hash, page_index) DO UPDATE SET
                     status      = excluded.status,
                     result_json = excluded.result_json,
                     result_hash = excluded.result_hash,
                     stored_at   = excluded.stored_at",
                params![
                    result.page.source,
                    result.page.page_index as i64,
                    result.source_hash,
                    status,
                    json,
                    hash_bytes(json.as_bytes()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err("save page"))?;
        debug!(status, "page result stored");
        Ok(())
    }

    /// Store a whole batch in one transaction.
    pub fn save_pages(&self, results: &[PageResult]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(db_err("begin"))?;
        for result in results {
            self.save_page(result)?;
        }
        tx.commit().map_err(db_err("commit"))?;
        info!(count = results.len(), "page results stored");
        Ok(())
    }

    /// Load the most recently stored result for a page. Fails with
    /// `IntegrityMismatch` if the stored JSON was altered.
    pub fn load_page(&self, page: &PageRef) -> Result<Option<PageResult>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT result_json, result_hash FROM page_results
                 WHERE source = ?1 AND page_index = ?2
                 ORDER BY stored_at DESC, rowid DESC
                 LIMIT 1",
                params![page.source, page.page_index as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err("load page"))?;
        row.map(|(json, hash)| decode_result(&json, &hash)).transpose()
    }

    /// Every stored page, ordered by (source, page).
    pub fn load_all(&self) -> Result<Vec<PageResult>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT result_json, result_hash FROM page_results
                 ORDER BY source, page_index, stored_at, rowid",
            )
            .map_err(db_err("prepare load_all"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(db_err("query load_all"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect rows"))?;
        rows.iter().map(|(json, hash)| decode_result(json, hash)).collect()
    }

    /// Append one override event.
    #[instrument(skip_all, fields(page = %event.page, group = event.group_id))]
    pub fn record_override(&self, event: &OverrideEvent) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO overrides
                     (id, source, source_hash, page_index, group_id, corrected, reason, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id.to_string(),
                    event.page.source,
                    event.source_hash,
                    event.page.page_index as i64,
                    event.group_id,
                    event.corrected,
                    event.reason,
                    event.recorded_at.to_rfc3339(),
                ],
            )
            .map_err(db_err("record override"))?;
        Ok(())
    }

    /// Rebuild the review ledger in recording order.
    pub fn load_ledger(&self) -> Result<ReviewLedger> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, source, source_hash, page_index, group_id, corrected, reason, recorded_at
                 FROM overrides ORDER BY seq",
            )
            .map_err(db_err("prepare load_ledger"))?;
        let events = stmt
            .query_map([], row_to_override)
            .map_err(db_err("query load_ledger"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect overrides"))?;
        Ok(ReviewLedger::from_events(events))
    }
}

fn decode_result(json: &str, hash: &str) -> Result<PageResult> {
    verify_hash(json.as_bytes(), hash)?;
    Ok(serde_json::from_str(json)?)
}

fn row_to_override(row: &rusqlite::Row<'_>) -> rusqlite::Result<OverrideEvent> {
    let id: String = row.get(0)?;
    let page_index: i64 = row.get(3)?;
    let recorded_at: String = row.get(7)?;

    let id = uuid::Uuid::parse_str(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let recorded_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&recorded_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(OverrideEvent {
        id,
        page: PageRef::new(row.get::<_, String>(1)?, page_index.max(0) as usize),
        source_hash: row.get(2)?,
        group_id: row.get(4)?,
        corrected: row.get(5)?,
        reason: row.get(6)?,
        recorded_at,
    })
}
