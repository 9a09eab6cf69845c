//! Single-record persistence for the active chat transcript.
//!
//! The store keeps at most one record, keyed by [`LATEST_SESSION_KEY`]. Every
//! save clears the container and inserts the new record inside one
//! transaction, so a load never observes a merge or a half-written state.

mod database;
mod file;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::{Error, Result};

pub use database::{Container, KEY_FIELD, MemoryDatabase, RecordDatabase, WriteOp};
pub use file::FileDatabase;

/// Key of the one transcript record.
pub const LATEST_SESSION_KEY: &str = "latest_session";

/// Default name of the record container holding transcripts.
pub const HISTORY_CONTAINER: &str = "history";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// The stored record: `{ id, messages }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub id: String,
    pub messages: Vec<Message>,
}

/// Persists the single active transcript.
///
/// Construct once and share (the database handle is reference counted).
/// Saves are not ordered against each other; callers that care about
/// last-write-wins must serialize their own save calls.
pub struct TranscriptStore<D: RecordDatabase = FileDatabase> {
    db: Arc<D>,
    container: String,
}

impl<D: RecordDatabase> Clone for TranscriptStore<D> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            container: self.container.clone(),
        }
    }
}

impl TranscriptStore<FileDatabase> {
    /// Creates a file-backed store from storage configuration.
    #[must_use]
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::with_container(
            FileDatabase::new(config.database_dir()),
            config.container.clone(),
        )
    }
}

impl<D: RecordDatabase> TranscriptStore<D> {
    /// Creates a store over `db` using the default container.
    #[must_use]
    pub fn new(db: D) -> Self {
        Self::with_container(db, HISTORY_CONTAINER)
    }

    /// Creates a store over `db` using a custom container name.
    #[must_use]
    pub fn with_container(db: D, container: impl Into<String>) -> Self {
        Self {
            db: Arc::new(db),
            container: container.into(),
        }
    }

    /// Returns the underlying database.
    #[must_use]
    pub fn database(&self) -> &D {
        &self.db
    }

    /// Replaces the stored transcript with `messages`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the database cannot be opened,
    /// or another error if the transaction fails. In both cases the
    /// previously stored transcript (if any) is left intact.
    pub async fn save(&self, messages: &[Message]) -> Result<()> {
        self.db.open(&self.container).await?;

        let record = TranscriptRecord {
            id: LATEST_SESSION_KEY.to_string(),
            messages: messages.to_vec(),
        };
        let value = serde_json::to_value(&record)?;

        self.db
            .commit(&self.container, vec![WriteOp::Clear, WriteOp::Put(value)])
            .await?;
        log::debug!("Saved transcript with {} message(s)", messages.len());
        Ok(())
    }

    /// Loads the stored transcript.
    ///
    /// Returns `Ok(None)` if nothing has ever been saved. An explicitly saved
    /// empty transcript comes back as `Ok(Some(vec![]))`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the database cannot be opened
    /// or the stored record cannot be decoded.
    pub async fn load(&self) -> Result<Option<Vec<Message>>> {
        self.db.open(&self.container).await?;

        let Some(value) = self.db.get(&self.container, LATEST_SESSION_KEY).await? else {
            return Ok(None);
        };
        let record: TranscriptRecord = serde_json::from_value(value).map_err(|e| {
            Error::StorageUnavailable(format!("stored transcript is unreadable: {e}"))
        })?;
        Ok(Some(record.messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use tempfile::TempDir;

    fn memory_store() -> TranscriptStore<MemoryDatabase> {
        TranscriptStore::new(MemoryDatabase::new())
    }

    fn sample() -> Vec<Message> {
        vec![
            Message::system("You are helpful."),
            Message::user("hi"),
            Message::assistant(""),
        ]
    }

    /// Database whose open or commit can be made to fail.
    struct FlakyDatabase {
        inner: MemoryDatabase,
        deny_open: std::sync::atomic::AtomicBool,
        deny_commit: std::sync::atomic::AtomicBool,
    }

    impl FlakyDatabase {
        fn new() -> Self {
            Self {
                inner: MemoryDatabase::new(),
                deny_open: false.into(),
                deny_commit: false.into(),
            }
        }
    }

    #[async_trait]
    impl RecordDatabase for FlakyDatabase {
        async fn open(&self, container: &str) -> Result<()> {
            if self.deny_open.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::StorageUnavailable("storage disabled".to_string()));
            }
            self.inner.open(container).await
        }

        async fn get(&self, container: &str, key: &str) -> Result<Option<Value>> {
            self.inner.get(container, key).await
        }

        async fn commit(&self, container: &str, ops: Vec<WriteOp>) -> Result<()> {
            if self.deny_commit.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::Transaction("quota exceeded".to_string()));
            }
            self.inner.commit(container, ops).await
        }
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
        assert_eq!(Role::System.to_string(), "system");
    }

    #[test]
    fn unknown_role_is_rejected() {
        let result: std::result::Result<Message, _> =
            serde_json::from_str(r#"{"role":"tool","content":"x"}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn load_before_any_save_is_none() {
        let store = memory_store();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn saved_empty_transcript_is_distinct_from_none() {
        let store = memory_store();
        store.save(&[]).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn round_trip_preserves_order_roles_and_content() {
        let store = memory_store();
        store.save(&sample()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(sample()));

        let single = vec![Message::user("only one")];
        store.save(&single).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(single));
    }

    #[tokio::test]
    async fn second_save_replaces_first() {
        let store = memory_store();
        let first = vec![Message::user("a"), Message::assistant("b")];
        let second = vec![Message::user("c")];

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(second));
        assert_eq!(store.database().len(HISTORY_CONTAINER), 1);
    }

    #[tokio::test]
    async fn load_does_not_mutate() {
        let store = memory_store();
        store.save(&sample()).await.unwrap();
        let _ = store.load().await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn open_failure_is_distinguishable_from_no_data() {
        let db = FlakyDatabase::new();
        db.deny_open.store(true, std::sync::atomic::Ordering::SeqCst);
        let store = TranscriptStore::new(db);

        let err = store.load().await.unwrap_err();
        assert!(err.is_storage_unavailable());
        assert!(store.save(&sample()).await.unwrap_err().is_storage_unavailable());
    }

    #[tokio::test]
    async fn failed_save_keeps_prior_transcript() {
        let store = TranscriptStore::new(FlakyDatabase::new());
        store.save(&sample()).await.unwrap();

        store
            .database()
            .deny_commit
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let result = store.save(&[Message::user("lost")]).await;

        assert!(matches!(result, Err(Error::Transaction(_))));
        assert_eq!(store.load().await.unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::default().with_data_dir(dir.path());

        TranscriptStore::from_config(&config)
            .save(&sample())
            .await
            .unwrap();

        let reopened = TranscriptStore::from_config(&config);
        assert_eq!(reopened.load().await.unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn stored_record_matches_schema() {
        let store = memory_store();
        store.save(&[Message::user("hi")]).await.unwrap();

        let raw = store
            .database()
            .get(HISTORY_CONTAINER, LATEST_SESSION_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "id": "latest_session",
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[tokio::test]
    async fn concurrent_saves_leave_one_of_them() {
        let store = memory_store();
        let a = vec![Message::user("a")];
        let b = vec![Message::user("b")];

        let (ra, rb) = tokio::join!(store.save(&a), store.save(&b));
        ra.unwrap();
        rb.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded == a || loaded == b);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn role() -> impl Strategy<Value = Role> {
            prop_oneof![Just(Role::System), Just(Role::User), Just(Role::Assistant)]
        }

        fn messages() -> impl Strategy<Value = Vec<Message>> {
            proptest::collection::vec(
                (role(), ".*").prop_map(|(r, c)| Message::new(r, c)),
                0..12,
            )
        }

        proptest! {
            #[test]
            fn save_then_load_returns_last_saved(first in messages(), second in messages()) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                let loaded = rt.block_on(async {
                    let store = memory_store();
                    store.save(&first).await.unwrap();
                    store.save(&second).await.unwrap();
                    store.load().await.unwrap()
                });
                prop_assert_eq!(loaded, Some(second));
            }
        }
    }
}
