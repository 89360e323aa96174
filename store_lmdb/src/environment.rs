//! LMDB environment setup for the event store.

use std::path::Path;
use std::sync::Arc;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use tracing::info;

use keybridge_store::{ChangeFeed, Queue};

use crate::LmdbError;

/// Default LMDB map size: 256 MiB. Approval queues are small; this leaves
/// generous headroom for long-running deployments.
const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
/// Named databases: one per queue, plus metadata.
const MAX_DBS: u32 = 4;
/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// The LMDB-backed event store. One environment, one named database per
/// queue, keyed by the record id string.
pub struct LmdbEventStore {
    pub(crate) env: Arc<Env>,
    pub(crate) pending_db: Database<Str, Bytes>,
    pub(crate) awaiting_db: Database<Str, Bytes>,
    pub(crate) completed_db: Database<Str, Bytes>,
    pub(crate) meta_db: Database<Str, Bytes>,
    pub(crate) feed: ChangeFeed,
}

impl LmdbEventStore {
    /// Open or create the environment at `path` with the default map size.
    pub fn open(path: &Path) -> Result<Self, LmdbError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    /// Open or create the environment at `path`.
    pub fn open_with_map_size(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // Safety: each data directory is opened by at most one process;
        // the daemon holds the store for its whole lifetime.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let pending_db = env.create_database(&mut wtxn, Some(Queue::Pending.as_str()))?;
        let awaiting_db =
            env.create_database(&mut wtxn, Some(Queue::AwaitingApproval.as_str()))?;
        let completed_db = env.create_database(&mut wtxn, Some(Queue::Completed.as_str()))?;
        let meta_db: Database<Str, Bytes> = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        let store = Self {
            env: Arc::new(env),
            pending_db,
            awaiting_db,
            completed_db,
            meta_db,
            feed: ChangeFeed::default(),
        };
        store.check_schema_version()?;

        info!(path = %path.display(), "opened event store");
        Ok(store)
    }

    /// The database holding a given queue.
    pub(crate) fn db_for(&self, queue: Queue) -> Database<Str, Bytes> {
        match queue {
            Queue::Pending => self.pending_db,
            Queue::AwaitingApproval => self.awaiting_db,
            Queue::Completed => self.completed_db,
        }
    }

    /// Read the stored schema version, initialising it on first open.
    /// Fails if the store was written by a newer build.
    fn check_schema_version(&self) -> Result<(), LmdbError> {
        let rtxn = self.env.read_txn()?;
        let stored = self
            .meta_db
            .get(&rtxn, SCHEMA_VERSION_KEY)?
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_le_bytes);
        drop(rtxn);

        match stored {
            Some(v) if v > SCHEMA_VERSION => Err(LmdbError::SchemaTooNew {
                found: v,
                supported: SCHEMA_VERSION,
            }),
            Some(v) if v == SCHEMA_VERSION => Ok(()),
            _ => {
                let mut wtxn = self.env.write_txn()?;
                self.meta_db.put(
                    &mut wtxn,
                    SCHEMA_VERSION_KEY,
                    &SCHEMA_VERSION.to_le_bytes(),
                )?;
                wtxn.commit()?;
                Ok(())
            }
        }
    }

    /// The stored schema version.
    pub fn schema_version(&self) -> Result<u32, LmdbError> {
        let rtxn = self.env.read_txn()?;
        let v = self
            .meta_db
            .get(&rtxn, SCHEMA_VERSION_KEY)?
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_le_bytes)
            .unwrap_or(0);
        Ok(v)
    }
}
