use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A destination file record, owned by the host storage subsystem.
///
/// The staging core only reads the size and final path, and asks the host
/// to verify the file once it has been reassembled. The `verified` flag is
/// flipped by the host's verifier, never by this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub id: i64,
    pub size: u64,
    pub path: PathBuf,
    pub verified: bool,
    pub priority: i64,
    pub instrument_id: Option<i64>,
}

/// Identity of the agent or user driving an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
}

/// Host-side catalog of destination files.
pub trait DestinationCatalog: Send + Sync {
    /// Look up a destination by id. `None` when the record does not exist
    /// (e.g. it was deleted mid-upload).
    fn get(&self, id: i64) -> Result<Option<Destination>>;

    fn exists(&self, id: i64) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Hand a fully reassembled file off to the host's verifier. The host
    /// confirms the full-file checksum and sets `verified` out of band.
    fn request_verification(&self, id: i64, priority: i64) -> Result<()>;
}

/// Write-permission check, delegated to the host's ACL model.
pub trait WritePolicy: Send + Sync {
    fn can_write(&self, caller: &Caller, destination: &Destination) -> bool;
}

/// Policy that admits every caller. Useful when the transport in front of
/// the core already performs its own authorization.
pub struct AllowAll;

impl WritePolicy for AllowAll {
    fn can_write(&self, _caller: &Caller, _destination: &Destination) -> bool {
        true
    }
}

/// Catalog adapter over the host's destination table in SQLite.
///
/// The `destinations` and `destination_access` tables are host-owned; the
/// `verification_queue` table is where reassembly hand-offs land for the
/// host verifier to consume. Tables are created if absent so the daemon
/// can start against an empty database.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS destinations (
                id INTEGER PRIMARY KEY,
                size INTEGER NOT NULL,
                path TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                instrument_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS destination_access (
                destination_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                PRIMARY KEY (destination_id, user_id)
            );
            CREATE TABLE IF NOT EXISTS verification_queue (
                destination_id INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                requested_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a destination record. Host-side operation,
    /// exposed for fixtures and operational tooling.
    pub fn upsert(&self, dest: &Destination) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO destinations
             (id, size, path, verified, priority, instrument_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                dest.id,
                dest.size as i64,
                dest.path.to_string_lossy().as_ref(),
                dest.verified,
                dest.priority,
                dest.instrument_id
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM destinations WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn grant_write(&self, destination_id: i64, user_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO destination_access (destination_id, user_id)
             VALUES (?1, ?2)",
            params![destination_id, user_id],
        )?;
        Ok(())
    }

    /// Pending verification hand-offs, oldest first.
    pub fn pending_verifications(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT destination_id FROM verification_queue ORDER BY rowid")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

impl DestinationCatalog for SqliteCatalog {
    fn get(&self, id: i64) -> Result<Option<Destination>> {
        let conn = self.conn.lock().unwrap();
        let dest = conn
            .query_row(
                "SELECT id, size, path, verified, priority, instrument_id
                 FROM destinations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Destination {
                        id: row.get(0)?,
                        size: row.get::<_, i64>(1)? as u64,
                        path: PathBuf::from(row.get::<_, String>(2)?),
                        verified: row.get(3)?,
                        priority: row.get(4)?,
                        instrument_id: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(dest)
    }

    fn request_verification(&self, id: i64, priority: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO verification_queue (destination_id, priority, requested_at)
             VALUES (?1, ?2, ?3)",
            params![id, priority, chrono::Utc::now().to_rfc3339()],
        )?;
        tracing::debug!("Requested verification for destination {}", id);
        Ok(())
    }
}

impl WritePolicy for SqliteCatalog {
    fn can_write(&self, caller: &Caller, destination: &Destination) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM destination_access
             WHERE destination_id = ?1 AND user_id = ?2",
            params![destination.id, caller.user_id],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .unwrap_or(false)
    }
}

/// In-memory catalog for tests and embedders that manage destinations
/// themselves. Verification requests are recorded, not acted on.
#[derive(Default)]
pub struct MemoryCatalog {
    inner: Mutex<MemoryCatalogInner>,
}

#[derive(Default)]
struct MemoryCatalogInner {
    destinations: HashMap<i64, Destination>,
    verification_requests: Vec<(i64, i64)>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dest: Destination) {
        self.inner
            .lock()
            .unwrap()
            .destinations
            .insert(dest.id, dest);
    }

    pub fn remove(&self, id: i64) {
        self.inner.lock().unwrap().destinations.remove(&id);
    }

    pub fn verification_requests(&self) -> Vec<(i64, i64)> {
        self.inner.lock().unwrap().verification_requests.clone()
    }
}

impl DestinationCatalog for MemoryCatalog {
    fn get(&self, id: i64) -> Result<Option<Destination>> {
        Ok(self.inner.lock().unwrap().destinations.get(&id).cloned())
    }

    fn request_verification(&self, id: i64, priority: i64) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .verification_requests
            .push((id, priority));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(id: i64) -> Destination {
        Destination {
            id,
            size: 1553,
            path: PathBuf::from(format!("/data/store/{}.dat", id)),
            verified: false,
            priority: 0,
            instrument_id: Some(7),
        }
    }

    #[test]
    fn test_sqlite_catalog_roundtrip() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert(&dest(1)).unwrap();

        let loaded = catalog.get(1).unwrap().unwrap();
        assert_eq!(loaded, dest(1));
        assert!(catalog.get(2).unwrap().is_none());

        catalog.delete(1).unwrap();
        assert!(!catalog.exists(1).unwrap());
    }

    #[test]
    fn test_sqlite_write_policy() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert(&dest(1)).unwrap();
        catalog.grant_write(1, 42).unwrap();

        let d = catalog.get(1).unwrap().unwrap();
        assert!(catalog.can_write(&Caller { user_id: 42 }, &d));
        assert!(!catalog.can_write(&Caller { user_id: 43 }, &d));
    }

    #[test]
    fn test_verification_queue() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert(&dest(5)).unwrap();
        catalog.request_verification(5, 2).unwrap();
        catalog.request_verification(5, 2).unwrap();
        assert_eq!(catalog.pending_verifications().unwrap(), vec![5, 5]);
    }

    #[test]
    fn test_memory_catalog() {
        let catalog = MemoryCatalog::new();
        catalog.insert(dest(9));
        assert!(catalog.exists(9).unwrap());

        catalog.request_verification(9, 1).unwrap();
        assert_eq!(catalog.verification_requests(), vec![(9, 1)]);

        catalog.remove(9);
        assert!(!catalog.exists(9).unwrap());
    }
}
