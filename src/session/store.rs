//! The CAS-less session store trait, an in-memory implementation, and the
//! read-modify-write-with-verify loop that gives callers safety despite the
//! store offering none.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::session::types::SessionRecord;

/// A durable-for-the-session's-lifetime key-value store with a secondary
/// `file_hash -> upload_id` index. Deliberately offers no compare-and-swap:
/// callers that need atomic updates (see [`mark_chunk_received`]) build it
/// themselves on top of `get`/`put`.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, record: SessionRecord, ttl: Duration) -> Result<()>;
    /// Returns `None` once the record's ttl (refreshed on every `put`, see
    /// [`mark_chunk_received`]) has elapsed, even if the sweeper hasn't run
    /// yet — callers never need their own, second notion of "expired".
    async fn get(&self, upload_id: &str) -> Option<SessionRecord>;
    async fn find_by_file_hash(&self, hash: &str) -> Option<SessionRecord>;
    async fn delete(&self, upload_id: &str);
    /// Ids whose TTL has elapsed, for the sweeper. Not part of the core
    /// read/write contract; implementations may return an empty list if
    /// they expire entries eagerly instead.
    async fn expired_ids(&self) -> Vec<String>;
}

struct Entry {
    record: SessionRecord,
    expires_at: DateTimeUtc,
}

type DateTimeUtc = chrono::DateTime<Utc>;

/// In-memory session store backed by a lock-protected map. Appropriate for
/// the single-deployment, shared-filesystem scope this core targets; a
/// networked KV can implement the same trait without touching the ingest
/// endpoint's RMW loop.
#[derive(Clone)]
pub struct InMemorySessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    by_id: RwLock<HashMap<String, Entry>>,
    by_hash: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                by_id: RwLock::new(HashMap::new()),
                by_hash: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, record: SessionRecord, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));

        let upload_id = record.upload_id.clone();
        let hash = record.file_info.hash.clone();

        {
            let mut by_id = self.inner.by_id.write().await;
            by_id.insert(
                upload_id.clone(),
                Entry {
                    record,
                    expires_at,
                },
            );
        }

        if let Some(hash) = hash {
            let mut by_hash = self.inner.by_hash.write().await;
            by_hash.insert(hash, upload_id);
        }

        Ok(())
    }

    async fn get(&self, upload_id: &str) -> Option<SessionRecord> {
        let by_id = self.inner.by_id.read().await;
        let entry = by_id.get(upload_id)?;
        if entry.expires_at < Utc::now() {
            return None;
        }
        Some(entry.record.clone())
    }

    async fn find_by_file_hash(&self, hash: &str) -> Option<SessionRecord> {
        let upload_id = {
            let by_hash = self.inner.by_hash.read().await;
            by_hash.get(hash).cloned()?
        };
        self.get(&upload_id).await
    }

    async fn delete(&self, upload_id: &str) {
        let hash = {
            let mut by_id = self.inner.by_id.write().await;
            by_id.remove(upload_id).and_then(|e| e.record.file_info.hash)
        };

        if let Some(hash) = hash {
            let mut by_hash = self.inner.by_hash.write().await;
            by_hash.remove(&hash);
        }
    }

    async fn expired_ids(&self) -> Vec<String> {
        let now = Utc::now();
        let by_id = self.inner.by_id.read().await;
        by_id
            .iter()
            .filter(|(_, e)| e.expires_at < now)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Read-modify-write-with-verify: the only safe way to mutate
/// `received_chunks` against a store without compare-and-swap.
///
/// 1. Read the latest record.
/// 2. If the index is already present, done — this also makes the call idempotent.
/// 3. Add the index, sort, write back.
/// 4. Re-read; if the index is present, the write landed. Otherwise back off
///    `2^attempt` ms and retry, up to `max_retries`.
///
/// This is not linearizable: two writers adding different indices can each
/// overwrite the other's write on step 3. The verify step in step 4 detects
/// that case for each writer independently and the retry closes the window;
/// externally no received index is ever lost as long as at least one retry
/// succeeds within the budget.
pub async fn mark_chunk_received(
    store: &dyn SessionStore,
    upload_id: &str,
    chunk_index: u64,
    max_retries: u32,
    ttl: Duration,
) -> Result<SessionRecord> {
    for attempt in 0..=max_retries {
        let mut record = store.get(upload_id).await.ok_or(AppError::SessionMissing)?;

        if record.received_chunks.contains(&chunk_index) {
            return Ok(record);
        }

        record.add_received(chunk_index);
        // Re-puts the record with a ttl measured from now rather than
        // preserving its original expiry, so a trickle of chunks keeps a
        // session alive for as long as it keeps making progress.
        store.put(record.clone(), ttl).await?;

        if let Some(verified) = store.get(upload_id).await {
            if verified.received_chunks.contains(&chunk_index) {
                return Ok(verified);
            }
        }

        if attempt < max_retries {
            let backoff_ms = 1u64 << attempt.min(16);
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }

    Err(AppError::UpdateNotConverged {
        attempts: max_retries + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::FileInfo;

    fn info() -> FileInfo {
        FileInfo {
            name: "f.bin".into(),
            mime_type: "application/octet-stream".into(),
            size: 9,
            hash: Some("deadbeef".into()),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new("abc".into(), info(), 3);
        store.put(record.clone(), Duration::from_secs(60)).await.unwrap();

        let fetched = store.get("abc").await.unwrap();
        assert_eq!(fetched.upload_id, "abc");
        assert_eq!(fetched.total_chunks, 3);
    }

    #[tokio::test]
    async fn find_by_file_hash_uses_secondary_index() {
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new("abc".into(), info(), 3);
        store.put(record, Duration::from_secs(60)).await.unwrap();

        let found = store.find_by_file_hash("deadbeef").await.unwrap();
        assert_eq!(found.upload_id, "abc");
        assert!(store.find_by_file_hash("nope").await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_both_indices() {
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new("abc".into(), info(), 3);
        store.put(record, Duration::from_secs(60)).await.unwrap();

        store.delete("abc").await;

        assert!(store.get("abc").await.is_none());
        assert!(store.find_by_file_hash("deadbeef").await.is_none());
    }

    #[tokio::test]
    async fn mark_chunk_received_is_idempotent() {
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new("abc".into(), info(), 3);
        store.put(record, Duration::from_secs(60)).await.unwrap();

        mark_chunk_received(&store, "abc", 1, 3, Duration::from_secs(60)).await.unwrap();
        let second = mark_chunk_received(&store, "abc", 1, 3, Duration::from_secs(60)).await.unwrap();
        assert_eq!(second.received_chunks, vec![1]);
    }

    #[tokio::test]
    async fn mark_chunk_received_accumulates_distinct_indices_sequentially() {
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new("abc".into(), info(), 3);
        store.put(record, Duration::from_secs(60)).await.unwrap();

        mark_chunk_received(&store, "abc", 0, 3, Duration::from_secs(60)).await.unwrap();
        mark_chunk_received(&store, "abc", 2, 3, Duration::from_secs(60)).await.unwrap();
        let last = mark_chunk_received(&store, "abc", 1, 3, Duration::from_secs(60)).await.unwrap();

        assert_eq!(last.received_chunks, vec![0, 1, 2]);
        assert!(last.is_complete());
    }

    #[tokio::test]
    async fn mark_chunk_received_missing_session_errors() {
        let store = InMemorySessionStore::new();
        let result = mark_chunk_received(&store, "ghost", 0, 3, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(AppError::SessionMissing)));
    }

    /// A store whose `get` races a concurrent external write exactly once,
    /// exercising the verify-then-retry path of the RMW loop rather than
    /// its single-writer fast path.
    struct RacyStore {
        inner: InMemorySessionStore,
        raced: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl SessionStore for RacyStore {
        async fn put(&self, record: SessionRecord, ttl: Duration) -> Result<()> {
            if !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                // Simulate a concurrent writer clobbering this write with a
                // record that lacks the index we just added.
                let mut clobbered = record.clone();
                clobbered.received_chunks.retain(|&i| i != *record.received_chunks.last().unwrap());
                return self.inner.put(clobbered, ttl).await;
            }
            self.inner.put(record, ttl).await
        }
        async fn get(&self, upload_id: &str) -> Option<SessionRecord> {
            self.inner.get(upload_id).await
        }
        async fn find_by_file_hash(&self, hash: &str) -> Option<SessionRecord> {
            self.inner.find_by_file_hash(hash).await
        }
        async fn delete(&self, upload_id: &str) {
            self.inner.delete(upload_id).await
        }
        async fn expired_ids(&self) -> Vec<String> {
            self.inner.expired_ids().await
        }
    }

    #[tokio::test]
    async fn mark_chunk_received_recovers_from_a_lost_write() {
        let racy = RacyStore {
            inner: InMemorySessionStore::new(),
            raced: std::sync::atomic::AtomicBool::new(false),
        };
        let record = SessionRecord::new("abc".into(), info(), 3);
        racy.inner.put(record, Duration::from_secs(60)).await.unwrap();

        let result = mark_chunk_received(&racy, "abc", 0, 3, Duration::from_secs(60)).await.unwrap();
        assert_eq!(result.received_chunks, vec![0]);
    }
}
