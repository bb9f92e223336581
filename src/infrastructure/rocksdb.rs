use crate::domain::ports::SessionStore;
use crate::domain::session::{ChatId, Session};
use crate::error::{BotError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family holding one record per chat.
pub const CF_SESSIONS: &str = "sessions";

/// A persistent session store backed by RocksDB.
///
/// Sessions are keyed by the big-endian chat id and stored as JSON, state and
/// context together, so a restart resumes every dialog where it stopped.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBSessionStore {
    db: Arc<DB>,
}

impl RocksDBSessionStore {
    /// Opens or creates the database at `path`, creating the sessions column family if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_sessions = ColumnFamilyDescriptor::new(CF_SESSIONS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_sessions])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn sessions_cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_SESSIONS)
            .ok_or_else(|| BotError::Storage("sessions column family not found".to_string()))
    }
}

#[async_trait]
impl SessionStore for RocksDBSessionStore {
    async fn store(&self, session: Session) -> Result<()> {
        let cf = self.sessions_cf()?;
        let key = session.chat_id.0.to_be_bytes();
        let value = serde_json::to_vec(&session)?;

        self.db.put_cf(cf, key, value)?;
        Ok(())
    }

    async fn get(&self, chat_id: ChatId) -> Result<Option<Session>> {
        let cf = self.sessions_cf()?;
        match self.db.get_pinned_cf(cf, chat_id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<Session>> {
        let cf = self.sessions_cf()?;
        let mut sessions = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let session: Session = serde_json::from_slice(&value)
                .map_err(|e| BotError::Storage(format!("corrupt session record: {e}")))?;
            sessions.push(session);
        }

        Ok(sessions)
    }
}
