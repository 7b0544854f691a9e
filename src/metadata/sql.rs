//! SQLite-backed metadata store.
//!
//! Artifacts are rows of one table:
//!
//! ```sql
//! CREATE TABLE artifacts (
//!     key           TEXT PRIMARY KEY NOT NULL,
//!     serializer    TEXT NOT NULL,
//!     load_kwargs   JSON NOT NULL,
//!     dump_kwargs   JSON NOT NULL,
//!     custom_fields JSON NOT NULL,
//!     checksum      TEXT,
//!     created_at    TIMESTAMP NOT NULL
//! )
//! ```
//!
//! Every operation opens its own connection, so one database file can be
//! shared by threads and processes. A put holds an immediate transaction
//! around both the cache write and the insert, and `get` refuses bytes whose
//! sidecar disagrees with the row ([`FunnelError::Integrity`]).

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{MetadataStore, MetadataStoreOptions};
use crate::cache::{Artifact, CacheStore, DuplicateKeyPolicy, GetOptions, PutOptions};
use crate::error::{FunnelError, Result};
use crate::value::{CacheValue, Kwargs};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS artifacts (
    key TEXT PRIMARY KEY NOT NULL,
    serializer TEXT NOT NULL,
    load_kwargs JSON NOT NULL,
    dump_kwargs JSON NOT NULL,
    custom_fields JSON NOT NULL,
    checksum TEXT,
    created_at TIMESTAMP NOT NULL
)";

const SELECT_COLUMNS: &str =
    "SELECT key, serializer, load_kwargs, dump_kwargs, custom_fields, checksum, created_at FROM artifacts";

/// Resolve a database URL to a SQLite file path.
///
/// Accepts `sqlite:///relative.db`, `sqlite:////absolute.db` and plain
/// paths. In-memory databases are refused since every operation reconnects.
pub fn database_path(url: &str) -> Result<PathBuf> {
    let path = match url.split_once("://") {
        None => url,
        Some(("sqlite", rest)) => rest.strip_prefix('/').unwrap_or(rest),
        Some((scheme, _)) => {
            return Err(FunnelError::validation(format!(
                "unsupported database '{}': only sqlite is available",
                scheme
            )));
        }
    };
    if path.is_empty() || path == ":memory:" {
        return Err(FunnelError::validation(format!(
            "database url '{}' must name a file",
            url
        )));
    }
    Ok(PathBuf::from(path))
}

/// Raw column values of one row.
struct Row {
    key: String,
    serializer: String,
    load_kwargs: String,
    dump_kwargs: String,
    custom_fields: String,
    checksum: Option<String>,
    created_at: String,
}

impl Row {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            serializer: row.get(1)?,
            load_kwargs: row.get(2)?,
            dump_kwargs: row.get(3)?,
            custom_fields: row.get(4)?,
            checksum: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_artifact(self, database: &Path) -> Result<Artifact> {
        let corrupt = |message: String| FunnelError::CorruptArtifact {
            key: self.key.clone(),
            path: database.display().to_string(),
            message,
        };
        let kwargs = |raw: &str| -> Result<Kwargs> {
            serde_json::from_str(raw).map_err(|e| corrupt(e.to_string()))
        };
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("bad created_at '{}': {}", self.created_at, e)))?
            .with_timezone(&Utc);
        Ok(Artifact {
            load_kwargs: kwargs(&self.load_kwargs)?,
            dump_kwargs: kwargs(&self.dump_kwargs)?,
            custom_fields: kwargs(&self.custom_fields)?,
            checksum: self.checksum.clone(),
            created_at,
            serializer: self.serializer.clone(),
            key: self.key.clone(),
        })
    }
}

fn integrity(key: &str, err: rusqlite::Error) -> FunnelError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, ref message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            FunnelError::Integrity {
                key: key.to_string(),
                message: message
                    .clone()
                    .unwrap_or_else(|| "primary key violation".to_string()),
            }
        }
        other => other.into(),
    }
}

/// Metadata store recording artifacts in a SQLite database.
#[derive(Debug)]
pub struct SqlMetadataStore {
    cache_store: CacheStore,
    options: MetadataStoreOptions,
    database: PathBuf,
}

impl SqlMetadataStore {
    /// Open the database at `database_url`, creating the file and table
    /// unless the store is readonly.
    pub fn open(
        database_url: &str,
        cache_store: CacheStore,
        options: MetadataStoreOptions,
    ) -> Result<Self> {
        let store = Self {
            cache_store,
            options,
            database: database_path(database_url)?,
        };
        if !store.options.readonly {
            if let Some(parent) = store.database.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            store.connect()?.execute(CREATE_TABLE, [])?;
        }
        tracing::debug!("Opened SQL metadata store at {}", store.database.display());
        Ok(store)
    }

    /// Path of the SQLite file.
    pub fn database(&self) -> &Path {
        &self.database
    }

    fn connect(&self) -> Result<Connection> {
        let flags = if self.options.readonly {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = Connection::open_with_flags(&self.database, flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn select(conn: &Connection, key: &str) -> Result<Option<Row>> {
        let sql = format!("{} WHERE key = ?1", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, params![key], Row::read).optional()?)
    }

    /// Write the row for `artifact` on `conn`, honoring the cache store's
    /// policy.
    ///
    /// An existing row is replaced only under `overwrite`; re-recording the
    /// very artifact already stored is a no-op; anything else is an
    /// integrity violation.
    fn write_row(&self, conn: &Connection, artifact: &Artifact) -> Result<()> {
        let existing = Self::select(conn, &artifact.key)?;
        let replace = match existing {
            None => false,
            Some(_) if self.cache_store.on_duplicate_key() == DuplicateKeyPolicy::Overwrite => {
                true
            }
            Some(row) => {
                let same = row.checksum == artifact.checksum
                    && row.into_artifact(&self.database)?.created_at == artifact.created_at;
                if same {
                    tracing::debug!("'{}' is already recorded", artifact.key);
                    return Ok(());
                }
                return Err(FunnelError::Integrity {
                    key: artifact.key.clone(),
                    message: "a different artifact is already recorded".to_string(),
                });
            }
        };

        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        let sql = format!(
            "{} INTO artifacts (key, serializer, load_kwargs, dump_kwargs, custom_fields, checksum, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            verb
        );
        conn.execute(
            &sql,
            params![
                artifact.key,
                artifact.serializer,
                serde_json::to_string(&artifact.load_kwargs)?,
                serde_json::to_string(&artifact.dump_kwargs)?,
                serde_json::to_string(&artifact.custom_fields)?,
                artifact.checksum,
                artifact
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ],
        )
        .map_err(|e| integrity(&artifact.key, e))?;
        Ok(())
    }
}

impl MetadataStore for SqlMetadataStore {
    fn cache_store(&self) -> &CacheStore {
        &self.cache_store
    }

    fn options(&self) -> &MetadataStoreOptions {
        &self.options
    }

    fn put(&self, key: &str, value: &CacheValue, options: PutOptions) -> Result<Option<Artifact>> {
        if self.options.readonly {
            tracing::debug!("Metadata store is readonly, not recording '{}'", key);
            return Ok(None);
        }
        // The write lock is held from before the bytes are written until the
        // row commits, so a key's bytes and row always come from one writer.
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(artifact) = self
            .cache_store
            .put_with(key, value, self.options.prepare_put(options))?
        else {
            return Ok(None);
        };
        self.write_row(&tx, &artifact)?;
        tx.commit().map_err(|e| integrity(key, e))?;
        Ok(Some(artifact))
    }

    fn get(&self, key: &str, load_kwargs: &Kwargs) -> Result<CacheValue> {
        let recorded = self.artifact(key)?;
        let stored = self.cache_store.artifact(key)?;
        if stored.checksum != recorded.checksum || stored.serializer != recorded.serializer {
            return Err(FunnelError::Integrity {
                key: key.to_string(),
                message: "cached value differs from the recorded artifact".to_string(),
            });
        }
        let options = GetOptions::new()
            .serializer(recorded.serializer)
            .load_kwargs(self.options.layer_load(load_kwargs));
        self.cache_store.get_with(key, options)
    }

    fn artifact(&self, key: &str) -> Result<Artifact> {
        let conn = self.connect()?;
        match Self::select(&conn, key)? {
            Some(row) => row.into_artifact(&self.database),
            None => Err(FunnelError::not_found("key", key)),
        }
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let conn = self.connect()?;
        let found = conn
            .query_row("SELECT 1 FROM artifacts WHERE key = ?1", params![key], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn artifacts(&self) -> Result<Vec<Artifact>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY key", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], Row::read)?;
        let mut artifacts = Vec::new();
        for row in rows {
            artifacts.push(row?.into_artifact(&self.database)?);
        }
        Ok(artifacts)
    }
}
