//! # pipedoc-store
//!
//! Session-keyed SQLite persistence.
//!
//! Every extraction subsystem writes its rows here, keyed by session id,
//! with a `data_json` column carrying the full record for the read-only
//! SQL channel the chat surface queries. Writes are serialized behind a
//! mutex; the connection runs in WAL mode.
//!
//! Schema:
//! - `sessions`: id, created_at, file_type, file_name, status, error_detail
//! - `valves`: per-valve rows from P&ID analysis
//! - `pipe_bom`: per-page text extraction for isometric BOM PDFs
//! - `vlm_bom`: per-page vision extraction
//! - `symbols`: legend symbol entries
//! - `dimensions`: per-view reverse-calculated dimensions (DXF contract)

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::info;

use pipedoc_core::{
    Error, FileKind, PageBomRecord, Result, Session, SessionStatus, SymbolEntry, ValveExtract,
};
use pipedoc_extract::TextPageExtract;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    file_type TEXT,
    file_name TEXT,
    status TEXT DEFAULT 'processing',
    error_detail TEXT
);

CREATE TABLE IF NOT EXISTS valves (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT REFERENCES sessions(id),
    tag TEXT,
    valve_type TEXT,
    valve_subtype TEXT,
    size TEXT,
    fluid TEXT,
    location TEXT,
    description TEXT,
    piping_class TEXT,
    schedule TEXT,
    sheet INTEGER,
    data_json TEXT
);

CREATE TABLE IF NOT EXISTS pipe_bom (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT REFERENCES sessions(id),
    page INTEGER,
    pipe_pieces TEXT,
    weld_count INTEGER,
    weld_items TEXT,
    dimensions_mm TEXT,
    has_loose BOOLEAN,
    data_json TEXT
);

CREATE TABLE IF NOT EXISTS dimensions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT REFERENCES sessions(id),
    view_name TEXT,
    overall_width_mm REAL,
    overall_height_mm REAL,
    data_json TEXT
);

CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT REFERENCES sessions(id),
    category TEXT,
    symbol_name TEXT,
    description TEXT,
    image_path TEXT,
    bbox TEXT,
    data_json TEXT
);

CREATE TABLE IF NOT EXISTS vlm_bom (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT REFERENCES sessions(id),
    page INTEGER,
    drawing_number TEXT,
    pipe_group TEXT,
    pipe_pieces TEXT,
    components TEXT,
    weld_points TEXT,
    dimensions_mm TEXT,
    bom_table TEXT,
    total_weld_count INTEGER DEFAULT 0,
    confidence REAL DEFAULT 0,
    data_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_valves_session ON valves(session_id);
CREATE INDEX IF NOT EXISTS idx_valves_tag ON valves(tag);
CREATE INDEX IF NOT EXISTS idx_valves_type ON valves(valve_type);
CREATE INDEX IF NOT EXISTS idx_bom_session ON pipe_bom(session_id);
CREATE INDEX IF NOT EXISTS idx_symbols_session ON symbols(session_id);
CREATE INDEX IF NOT EXISTS idx_symbols_category ON symbols(category);
CREATE INDEX IF NOT EXISTS idx_vlm_bom_session ON vlm_bom(session_id);
";

/// Maximum rows the read-only SQL channel returns.
const SELECT_ROW_CAP: usize = 100;

fn persistence_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Persistence(e.to_string())
}

/// SQLite store. Writes are serialized per process behind the mutex; the
/// filesystem layout keeps sessions separate so no cross-session
/// coordination is needed.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on open or migration failure.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(persistence_err)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(persistence_err)?;
        conn.execute_batch(SCHEMA).map_err(persistence_err)?;
        info!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on schema failure.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(persistence_err)?;
        conn.execute_batch(SCHEMA).map_err(persistence_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert a new session row in `processing` state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on write failure.
    pub fn create_session(&self, id: &str, kind: FileKind, file_name: &str) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO sessions (id, file_type, file_name) VALUES (?, ?, ?)",
                params![id, kind.as_str(), file_name],
            )
            .map_err(persistence_err)?;
        Ok(())
    }

    /// Update a session's status; `error_detail` is stored (truncated)
    /// alongside an `error` status and cleared otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on write failure.
    pub fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        error_detail: Option<&str>,
    ) -> Result<()> {
        let detail = error_detail.map(pipedoc_core::session::truncate_error_detail);
        self.lock()
            .execute(
                "UPDATE sessions SET status = ?, error_detail = ? WHERE id = ?",
                params![status.as_str(), detail, id],
            )
            .map_err(persistence_err)?;
        Ok(())
    }

    /// Fetch one session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on query failure.
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at, file_type, file_name, status, error_detail
                 FROM sessions WHERE id = ?",
            )
            .map_err(persistence_err)?;
        let session = stmt
            .query_row(params![id], row_to_session)
            .map(Some)
            .or_else(|e| {
                if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                    Ok(None)
                } else {
                    Err(e)
                }
            })
            .map_err(persistence_err)?;
        Ok(session)
    }

    /// All sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on query failure.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at, file_type, file_name, status, error_detail
                 FROM sessions ORDER BY created_at DESC, id DESC",
            )
            .map_err(persistence_err)?;
        let sessions = stmt
            .query_map([], row_to_session)
            .map_err(persistence_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(persistence_err)?;
        Ok(sessions)
    }

    /// Persist P&ID valves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on write failure.
    pub fn save_valves(&self, session_id: &str, valves: &[ValveExtract]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(persistence_err)?;
        for v in valves {
            tx.execute(
                "INSERT INTO valves (session_id, tag, valve_type, valve_subtype, size,
                 fluid, location, description, piping_class, schedule, sheet, data_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    session_id,
                    v.tag,
                    v.valve_type.map(|t| t.as_str()).unwrap_or_default(),
                    v.valve_subtype,
                    v.size,
                    v.fluid,
                    v.location,
                    v.description,
                    v.piping_class,
                    v.schedule,
                    v.sheet,
                    serde_json::to_string(v)?,
                ],
            )
            .map_err(persistence_err)?;
        }
        tx.commit().map_err(persistence_err)?;
        info!(session_id, count = valves.len(), "saved valves");
        Ok(())
    }

    /// Persist the per-page text extraction of a BOM PDF.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on write failure.
    pub fn save_pipe_bom(&self, session_id: &str, pages: &[TextPageExtract]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(persistence_err)?;
        for p in pages {
            tx.execute(
                "INSERT INTO pipe_bom (session_id, page, pipe_pieces, weld_count,
                 weld_items, dimensions_mm, has_loose, data_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    session_id,
                    p.page,
                    serde_json::to_string(&p.pipe_pieces)?,
                    p.weld_count,
                    serde_json::to_string(&p.weld_items)?,
                    serde_json::to_string(&p.dimensions_mm)?,
                    p.has_loose,
                    serde_json::to_string(p)?,
                ],
            )
            .map_err(persistence_err)?;
        }
        tx.commit().map_err(persistence_err)?;
        info!(session_id, pages = pages.len(), "saved pipe BOM pages");
        Ok(())
    }

    /// Persist legend symbols.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on write failure.
    pub fn save_symbols(&self, session_id: &str, symbols: &[SymbolEntry]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(persistence_err)?;
        for s in symbols {
            tx.execute(
                "INSERT INTO symbols (session_id, category, symbol_name, description,
                 image_path, bbox, data_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    session_id,
                    s.category.as_str(),
                    s.symbol_name,
                    s.description,
                    s.image_path.as_deref().unwrap_or_default(),
                    serde_json::to_string(&s.bbox_pct)?,
                    serde_json::to_string(s)?,
                ],
            )
            .map_err(persistence_err)?;
        }
        tx.commit().map_err(persistence_err)?;
        info!(session_id, count = symbols.len(), "saved symbols");
        Ok(())
    }

    /// Persist the per-page vision extraction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on write failure.
    pub fn save_vlm_bom(&self, session_id: &str, pages: &[PageBomRecord]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(persistence_err)?;
        for p in pages {
            tx.execute(
                "INSERT INTO vlm_bom (session_id, page, drawing_number, pipe_group,
                 pipe_pieces, components, weld_points, dimensions_mm, bom_table,
                 total_weld_count, confidence, data_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    session_id,
                    p.page,
                    p.drawing_number,
                    p.pipe_group,
                    serde_json::to_string(&p.pipe_pieces)?,
                    serde_json::to_string(&p.components)?,
                    serde_json::to_string(&p.weld_points)?,
                    serde_json::to_string(&p.dimensions_mm)?,
                    serde_json::to_string(&p.bom_table)?,
                    p.total_weld_count,
                    p.confidence,
                    serde_json::to_string(p)?,
                ],
            )
            .map_err(persistence_err)?;
        }
        tx.commit().map_err(persistence_err)?;
        info!(session_id, pages = pages.len(), "saved vision BOM pages");
        Ok(())
    }

    /// Persist per-view dimensions from the DXF data contract. `views` is
    /// the renderer's `{view_name: {overall_width_mm, overall_height_mm,
    /// …}}` map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on write failure.
    pub fn save_dimensions(&self, session_id: &str, views: &Value) -> Result<()> {
        let Some(views) = views.get("views").and_then(Value::as_object) else {
            return Ok(());
        };
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(persistence_err)?;
        for (view_name, view) in views {
            tx.execute(
                "INSERT INTO dimensions (session_id, view_name, overall_width_mm,
                 overall_height_mm, data_json) VALUES (?, ?, ?, ?, ?)",
                params![
                    session_id,
                    view_name,
                    view.get("overall_width_mm").and_then(Value::as_f64).unwrap_or(0.0),
                    view.get("overall_height_mm").and_then(Value::as_f64).unwrap_or(0.0),
                    serde_json::to_string(view)?,
                ],
            )
            .map_err(persistence_err)?;
        }
        tx.commit().map_err(persistence_err)?;
        Ok(())
    }

    /// Symbols of one session, in category then insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on query failure.
    pub fn get_symbols(&self, session_id: &str) -> Result<Vec<SymbolEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT data_json FROM symbols WHERE session_id = ? ORDER BY category, id")
            .map_err(persistence_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))
            .map_err(persistence_err)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(persistence_err)?;
        Ok(rows
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect())
    }

    /// Symbols of the most recently completed P&ID session, if any. This
    /// is how a BOM upload resolves its legend reference without any
    /// process-global state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on query failure.
    pub fn latest_pid_symbols(&self) -> Result<Vec<SymbolEntry>> {
        let session_id = {
            let conn = self.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM sessions
                     WHERE file_type = 'pid' AND status = 'completed'
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                )
                .map_err(persistence_err)?;
            stmt.query_row([], |row| row.get::<_, String>(0))
                .map(Some)
                .or_else(|e| {
                    if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                        Ok(None)
                    } else {
                        Err(e)
                    }
                })
                .map_err(persistence_err)?
        };
        match session_id {
            Some(id) => self.get_symbols(&id),
            None => Ok(Vec::new()),
        }
    }

    /// Run a read-only query for the chat surface. Only statements whose
    /// first token is `SELECT` are accepted; results cap at 100 rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] for non-SELECT statements or query
    /// failure.
    pub fn execute_select(&self, sql: &str) -> Result<Vec<BTreeMap<String, Value>>> {
        let trimmed = sql.trim();
        if !trimmed
            .split_whitespace()
            .next()
            .is_some_and(|tok| tok.eq_ignore_ascii_case("select"))
        {
            return Err(Error::Persistence(
                "only SELECT statements are allowed".to_string(),
            ));
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(trimmed).map_err(persistence_err)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|c| (*c).to_string()).collect();
        let mut rows = stmt.query([]).map_err(persistence_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().map_err(persistence_err)? {
            let mut record = BTreeMap::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(i).map_err(persistence_err)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(n) => Value::from(n),
                    rusqlite::types::ValueRef::Real(f) => Value::from(f),
                    rusqlite::types::ValueRef::Text(t) => {
                        Value::from(String::from_utf8_lossy(t).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::from(format!("<{} bytes>", b.len())),
                };
                record.insert(name.clone(), value);
            }
            results.push(record);
            if results.len() >= SELECT_ROW_CAP {
                break;
            }
        }
        Ok(results)
    }

    /// Table DDL as stored in `sqlite_master`, for the chat system prompt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] on query failure.
    pub fn schema_text(&self) -> Result<String> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT sql FROM sqlite_master WHERE type='table' AND sql IS NOT NULL")
            .map_err(persistence_err)?;
        let ddl = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(persistence_err)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(persistence_err)?;
        Ok(ddl.join("\n\n"))
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let created_raw: String = row.get(1)?;
    let created_at = NaiveDateTime::parse_from_str(&created_raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or_else(|_| Utc::now());
    let kind: String = row.get(2)?;
    let status: String = row.get(4)?;
    Ok(Session {
        id: row.get(0)?,
        created_at,
        kind: kind.parse().unwrap_or(FileKind::Pdf),
        file_name: row.get(3)?,
        status: status.parse().unwrap_or(SessionStatus::Processing),
        error_detail: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedoc_core::SymbolCategory;

    fn store() -> Store {
        Store::in_memory().unwrap()
    }

    #[test]
    fn session_lifecycle_round_trip() {
        let store = store();
        store
            .create_session("s1", FileKind::PipeBom, "bom.pdf")
            .unwrap();
        let session = store.get_session("s1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Processing);
        assert_eq!(session.kind, FileKind::PipeBom);

        store
            .update_session_status("s1", SessionStatus::Error, Some(&"x".repeat(500)))
            .unwrap();
        let session = store.get_session("s1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error_detail.as_deref().map(str::len), Some(200));

        assert!(store.get_session("missing").unwrap().is_none());
        assert_eq!(store.list_sessions().unwrap().len(), 1);
    }

    #[test]
    fn select_only_channel_rejects_writes() {
        let store = store();
        store.create_session("s1", FileKind::Pid, "pid.pdf").unwrap();

        let rows = store
            .execute_select("SELECT id, file_type FROM sessions")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["file_type"], Value::from("pid"));

        assert!(store.execute_select("DELETE FROM sessions").is_err());
        assert!(store
            .execute_select("UPDATE sessions SET status='x'")
            .is_err());
        assert!(store.execute_select("  select id from sessions").is_ok());
    }

    #[test]
    fn select_caps_at_100_rows() {
        let store = store();
        for i in 0..150 {
            store
                .create_session(&format!("s{i}"), FileKind::Pdf, "f.pdf")
                .unwrap();
        }
        let rows = store.execute_select("SELECT id FROM sessions").unwrap();
        assert_eq!(rows.len(), 100);
    }

    #[test]
    fn symbols_round_trip_and_latest_pid_resolution() {
        let store = store();
        store.create_session("pid1", FileKind::Pid, "pid.pdf").unwrap();
        let symbols = vec![SymbolEntry {
            id: 1,
            category: SymbolCategory::Valve,
            symbol_name: "TS".into(),
            description: "TEMPORARY STRAINER".into(),
            image_path: None,
            image_filename: Some("symbol_001_valve.png".into()),
            bbox_pct: Some([0.1, 0.2, 0.3, 0.4]),
        }];
        store.save_symbols("pid1", &symbols).unwrap();

        // Not completed yet: no reference resolves.
        assert!(store.latest_pid_symbols().unwrap().is_empty());

        store
            .update_session_status("pid1", SessionStatus::Completed, None)
            .unwrap();
        let restored = store.latest_pid_symbols().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].description, "TEMPORARY STRAINER");
        assert_eq!(restored[0].category, SymbolCategory::Valve);
    }

    #[test]
    fn vlm_bom_rows_carry_full_record_json() {
        let store = store();
        store
            .create_session("s1", FileKind::PipeBom, "bom.pdf")
            .unwrap();
        let pages = vec![PageBomRecord {
            page: 2,
            drawing_number: "1-125.629.021".into(),
            total_weld_count: 7,
            ..Default::default()
        }];
        store.save_vlm_bom("s1", &pages).unwrap();

        let rows = store
            .execute_select("SELECT page, drawing_number, total_weld_count FROM vlm_bom")
            .unwrap();
        assert_eq!(rows[0]["page"], Value::from(2));
        assert_eq!(rows[0]["total_weld_count"], Value::from(7));
    }

    #[test]
    fn schema_text_lists_tables() {
        let store = store();
        let schema = store.schema_text().unwrap();
        assert!(schema.contains("CREATE TABLE"));
        assert!(schema.contains("vlm_bom"));
        assert!(schema.contains("symbols"));
    }
}
