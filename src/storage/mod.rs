pub mod repository;
pub mod schema;

use rusqlite_migration::{Migrations, M};

use crate::error::{Error, Result};

/// Database wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes writes via
/// `tokio_rusqlite`'s internal channel; the reader can proceed without blocking.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

impl Database {
    /// Open the database at the default path (`~/.retaildw/retaildw.db`).
    pub async fn open() -> Result<Self> {
        Self::open_at(default_path()?).await
    }

    /// Open the database at the given path.
    pub async fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        let db = Self { writer, reader };
        db.ensure_dimensions().await?;
        log::debug!("opened database at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // For in-memory, we share the same connection for reader/writer
        // since in-memory DBs are per-connection.
        let db = Self {
            reader: writer.clone(),
            writer,
        };
        db.ensure_dimensions().await?;
        Ok(db)
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )?;
            let migrations =
                Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))]);
            migrations.to_latest(conn)?;
            Ok::<(), Error>(())
        })
        .await
        .map_err(Error::from_call)
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    /// Get a reference to the writer connection.
    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    /// Get a reference to the reader connection.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }

    /// Run `f` on the writer connection, keeping the crate error variant
    /// raised inside the closure.
    pub async fn write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.writer.call(f).await.map_err(Error::from_call)
    }

    /// Run `f` on the reader connection.
    pub async fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.reader.call(f).await.map_err(Error::from_call)
    }

    /// Ensure the period_dim table is populated.
    async fn ensure_dimensions(&self) -> Result<()> {
        self.writer
            .call(|conn| {
                schema::ensure_period_dim(conn)?;
                Ok::<(), rusqlite::Error>(())
            })
            .await?;
        Ok(())
    }
}

/// `~/.retaildw/retaildw.db`
pub fn default_path() -> Result<std::path::PathBuf> {
    let dir = dirs::home_dir()
        .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
        .join(".retaildw");
    Ok(dir.join("retaildw.db"))
}
