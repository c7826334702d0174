use super::playlist::{
    Heartbeat, HeartbeatOutcome, ManagedPlaylist, NewManagedPlaylist, RefreshRecord, SeedParams,
};
use super::PlaylistStore;
use crate::curation::Provenance;
use crate::recipe::PlaylistType;
use crate::schedule::Cadence;
use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const SCHEMA_VERSION: i64 = 2;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS managed_playlists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    playlist_type TEXT NOT NULL,
    seed TEXT NOT NULL,
    recipe_version TEXT NOT NULL,
    target_length INTEGER NOT NULL,
    cadence TEXT NOT NULL,
    with_reasoning INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    last_refreshed INTEGER,
    next_due INTEGER,
    last_reasoning TEXT,
    last_provenance TEXT,
    track_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_managed_playlists_next_due ON managed_playlists(next_due);
CREATE TABLE IF NOT EXISTS scheduler_heartbeats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    at INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    due_count INTEGER NOT NULL,
    refreshed_count INTEGER NOT NULL,
    failed_count INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS leases (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

// Other processes (serve next to run-due) may hold the write lock briefly
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

const PLAYLIST_COLUMNS: &str = "id, name, external_id, playlist_type, seed, recipe_version, target_length,
     cadence, with_reasoning, created_at, last_refreshed, next_due, last_reasoning,
     last_provenance, track_count";

/// SQLite-backed playlist store.
#[derive(Clone)]
pub struct SqlitePlaylistStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePlaylistStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open playlist database {}", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on playlist database")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if version > SCHEMA_VERSION {
            bail!(
                "Playlist database schema version {} is newer than supported version {}",
                version,
                SCHEMA_VERSION
            );
        }

        conn.execute_batch(SCHEMA)
            .context("Failed to create playlist db schema")?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM managed_playlists", [], |r| r.get(0))?;
        info!(playlists = count, "Playlist store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Playlist store connection mutex poisoned"))
    }
}

// Helper: timestamps are stored as unix milliseconds
fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| conversion_error(format!("timestamp {millis} out of range")))
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_column<T>(value: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(conversion_error)
}

fn row_to_playlist(row: &Row<'_>) -> rusqlite::Result<ManagedPlaylist> {
    let seed_json: String = row.get(4)?;
    let seed: SeedParams = serde_json::from_str(&seed_json)
        .map_err(|e| conversion_error(format!("malformed seed '{seed_json}': {e}")))?;

    let playlist_type: PlaylistType = parse_column(row.get(3)?)?;
    let cadence: Cadence = parse_column(row.get(7)?)?;
    let last_provenance: Option<Provenance> = row
        .get::<_, Option<String>>(13)?
        .map(parse_column)
        .transpose()?;

    Ok(ManagedPlaylist {
        id: row.get(0)?,
        name: row.get(1)?,
        external_id: row.get(2)?,
        playlist_type,
        seed,
        recipe_version: row.get(5)?,
        target_length: row.get::<_, i64>(6)? as usize,
        cadence,
        with_reasoning: row.get::<_, i64>(8)? != 0,
        created_at: from_millis(row.get(9)?)?,
        last_refreshed: row.get::<_, Option<i64>>(10)?.map(from_millis).transpose()?,
        next_due: row.get::<_, Option<i64>>(11)?.map(from_millis).transpose()?,
        last_reasoning: row.get(12)?,
        last_provenance,
        track_count: row.get::<_, i64>(14)? as usize,
    })
}

impl PlaylistStore for SqlitePlaylistStore {
    fn insert(&self, playlist: &NewManagedPlaylist) -> Result<ManagedPlaylist> {
        let seed = serde_json::to_string(&playlist.seed)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO managed_playlists
             (name, external_id, playlist_type, seed, recipe_version, target_length, cadence,
              with_reasoning, created_at, last_refreshed, next_due, last_reasoning,
              last_provenance, track_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?11, ?12, ?13)",
            params![
                playlist.name,
                playlist.external_id,
                playlist.playlist_type.as_str(),
                seed,
                playlist.recipe_version,
                playlist.target_length as i64,
                playlist.cadence.as_str(),
                playlist.with_reasoning as i64,
                to_millis(playlist.created_at),
                playlist.next_due.map(to_millis),
                playlist.reasoning,
                playlist.provenance.as_str(),
                playlist.track_count as i64,
            ],
        )
        .with_context(|| format!("Failed to insert playlist '{}'", playlist.name))?;

        let id = conn.last_insert_rowid();
        let sql = format!("SELECT {PLAYLIST_COLUMNS} FROM managed_playlists WHERE id = ?1");
        conn.query_row(&sql, params![id], row_to_playlist)
            .context("Failed to read back inserted playlist")
    }

    fn get(&self, id: i64) -> Result<Option<ManagedPlaylist>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {PLAYLIST_COLUMNS} FROM managed_playlists WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_playlist).optional()?)
    }

    fn list(&self) -> Result<Vec<ManagedPlaylist>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {PLAYLIST_COLUMNS} FROM managed_playlists ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_playlist)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ManagedPlaylist>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {PLAYLIST_COLUMNS} FROM managed_playlists
             WHERE next_due IS NOT NULL AND next_due <= ?1 AND cadence != 'none'
             ORDER BY next_due, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![to_millis(now)], row_to_playlist)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_refresh(&self, id: i64, record: &RefreshRecord) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE managed_playlists
             SET last_refreshed = ?2, next_due = ?3, last_reasoning = ?4,
                 last_provenance = ?5, track_count = ?6
             WHERE id = ?1",
            params![
                id,
                to_millis(record.last_refreshed),
                record.next_due.map(to_millis),
                record.reasoning,
                record.provenance.as_str(),
                record.track_count as i64,
            ],
        )?;
        if updated == 0 {
            bail!("Playlist {} no longer exists", id);
        }
        Ok(())
    }

    fn set_schedule(&self, id: i64, cadence: Cadence, next_due: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE managed_playlists SET cadence = ?2, next_due = ?3 WHERE id = ?1",
            params![id, cadence.as_str(), next_due.map(to_millis)],
        )?;
        if updated == 0 {
            bail!("Playlist {} no longer exists", id);
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM managed_playlists WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scheduler_heartbeats (at, outcome, due_count, refreshed_count, failed_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                to_millis(heartbeat.at),
                heartbeat.outcome.as_str(),
                heartbeat.due as i64,
                heartbeat.refreshed as i64,
                heartbeat.failed as i64,
            ],
        )?;
        Ok(())
    }

    fn last_heartbeat(&self) -> Result<Option<Heartbeat>> {
        let conn = self.lock()?;
        let heartbeat = conn
            .query_row(
                "SELECT at, outcome, due_count, refreshed_count, failed_count
                 FROM scheduler_heartbeats ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    let outcome: HeartbeatOutcome = parse_column(row.get(1)?)?;
                    Ok(Heartbeat {
                        at: from_millis(row.get(0)?)?,
                        outcome,
                        due: row.get::<_, i64>(2)? as usize,
                        refreshed: row.get::<_, i64>(3)? as usize,
                        failed: row.get::<_, i64>(4)? as usize,
                    })
                },
            )
            .optional()?;
        Ok(heartbeat)
    }

    fn try_acquire_lease(&self, name: &str, holder: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool> {
        let conn = self.lock()?;
        // Single statement, so the check and the claim are one write transaction
        let claimed = conn
            .execute(
                "INSERT INTO leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE
                 SET holder = excluded.holder, expires_at = excluded.expires_at
                 WHERE leases.expires_at <= ?4 OR leases.holder = excluded.holder",
                params![name, holder, to_millis(now + ttl), to_millis(now)],
            )
            .with_context(|| format!("Failed to claim lease '{name}'"))?;
        Ok(claimed > 0)
    }

    fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )
        .with_context(|| format!("Failed to release lease '{name}'"))?;
        Ok(())
    }
}
