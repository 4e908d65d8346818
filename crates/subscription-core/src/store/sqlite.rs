//! SQLite-backed watermark store.
//!
//! Survives restarts after every statement and can be inspected with any
//! SQLite client while the daemon runs (WAL journal).

use super::{Result, StoreError, WatermarkStore};
use crate::subscription::{Millis, Subscription, SubscriptionKey, TargetKind};
use crate::PeerId;
use rusqlite::{params, Connection, ErrorCode, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS friend_subscriptions (
    peer_id            INTEGER NOT NULL,
    share_base         TEXT NOT NULL,
    sub_path           TEXT NOT NULL,
    local_destination  TEXT NOT NULL,
    watermark          INTEGER NOT NULL,
    target             TEXT NOT NULL DEFAULT 'folder',
    PRIMARY KEY (peer_id, share_base, sub_path)
);

CREATE INDEX IF NOT EXISTS idx_friend_subscriptions_peer
    ON friend_subscriptions(peer_id);
"#;

const COLUMNS: &str = "peer_id, share_base, sub_path, local_destination, watermark, target";

pub struct SqliteStore {
    path: PathBuf,
    /// `None` once closed.
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "normal").ok();
        conn.execute_batch(SCHEMA)?;
        add_target_column(&conn)?;
        debug!("Opened subscription table at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn query_subscriptions(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Subscription>> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_subscription(row)?);
        }
        Ok(out)
    }
}

fn closed() -> StoreError {
    StoreError::Persistence("subscription table is closed".into())
}

/// Tables written before file subscriptions existed lack the `target` column.
fn add_target_column(conn: &Connection) -> rusqlite::Result<()> {
    let present = conn
        .prepare("SELECT 1 FROM pragma_table_info('friend_subscriptions') WHERE name = 'target'")?
        .exists([])?;
    if !present {
        conn.execute_batch(
            "ALTER TABLE friend_subscriptions ADD COLUMN target TEXT NOT NULL DEFAULT 'folder'",
        )?;
        info!("Added target column to subscription table");
    }
    Ok(())
}

fn target_to_sql(target: TargetKind) -> &'static str {
    match target {
        TargetKind::Folder => "folder",
        TargetKind::File => "file",
    }
}

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let target = match row.get::<_, String>(5)?.as_str() {
        "file" => TargetKind::File,
        _ => TargetKind::Folder,
    };
    Ok(Subscription {
        peer_id: PeerId::from(row.get::<_, i64>(0)?),
        share_base: row.get(1)?,
        sub_path: row.get(2)?,
        local_destination: row.get(3)?,
        watermark: row.get(4)?,
        target,
    })
}

impl WatermarkStore for SqliteStore {
    fn create(&self, subscription: &Subscription) -> Result<()> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or_else(closed)?;
        let key = subscription.key();

        // Tables created before the primary key existed do not enforce
        // uniqueness, so check explicitly inside the transaction.
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM friend_subscriptions
             WHERE peer_id = ?1 AND share_base = ?2 AND sub_path = ?3)",
            params![key.peer_id.as_i64(), key.share_base, key.sub_path],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::DuplicateKey(key));
        }

        let inserted = tx.execute(
            &format!("INSERT INTO friend_subscriptions ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                subscription.peer_id.as_i64(),
                subscription.share_base,
                subscription.sub_path,
                subscription.local_destination,
                subscription.watermark,
                target_to_sql(subscription.target),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(StoreError::DuplicateKey(key));
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<Subscription>> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        Self::query_subscriptions(
            conn,
            &format!("SELECT {COLUMNS} FROM friend_subscriptions ORDER BY rowid"),
            params![],
        )
    }

    fn list_for_peer(&self, peer_id: PeerId) -> Result<Vec<Subscription>> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        Self::query_subscriptions(
            conn,
            &format!("SELECT {COLUMNS} FROM friend_subscriptions WHERE peer_id = ?1 ORDER BY rowid"),
            [peer_id.as_i64()],
        )
    }

    fn find(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM friend_subscriptions
             WHERE peer_id = ?1 AND share_base = ?2 AND sub_path = ?3
             ORDER BY rowid"
        ))?;
        let mut rows = stmt.query(params![key.peer_id.as_i64(), key.share_base, key.sub_path])?;

        let first = match rows.next()? {
            Some(row) => row_to_subscription(row)?,
            None => return Ok(None),
        };
        if rows.next()?.is_some() {
            warn!("Multiple subscriptions stored for {}; using the first", key);
        }
        Ok(Some(first))
    }

    fn advance_watermark(&self, key: &SubscriptionKey, watermark: Millis) -> Result<()> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        let updated = conn.execute(
            "UPDATE friend_subscriptions SET watermark = ?1
             WHERE peer_id = ?2 AND share_base = ?3 AND sub_path = ?4",
            params![watermark, key.peer_id.as_i64(), key.share_base, key.sub_path],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(key.clone()));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.lock();
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::from(e))?;
            debug!("Closed subscription table at {}", self.path.display());
        }
        Ok(())
    }
}
