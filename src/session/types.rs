//! Session record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File metadata declared by the client at initiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Authoritative total byte count.
    pub size: u64,
    /// Client-computed SHA-256 of the whole file. The resumability key.
    pub hash: Option<String>,
}

/// The server-side record of one in-flight chunked upload.
///
/// `received_chunks` is kept sorted and deduplicated; its length, not
/// insertion order, is what matters. Every mutation happens through
/// [`crate::session::SessionStore`] — holders of a cloned `SessionRecord`
/// hold a snapshot, never the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub upload_id: String,
    pub file_info: FileInfo,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub received_chunks: Vec<u64>,
    pub complete: bool,
    pub final_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(upload_id: String, file_info: FileInfo, chunk_size: u64) -> Self {
        let total_chunks = div_ceil(file_info.size, chunk_size);
        Self {
            upload_id,
            file_info,
            chunk_size,
            total_chunks,
            received_chunks: Vec::new(),
            complete: false,
            final_path: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() as u64 == self.total_chunks
    }

    pub fn missing_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        (self.received_chunks.len() as f64 / self.total_chunks as f64) * 100.0
    }

    /// Adds `index` if absent, keeping `received_chunks` sorted. No-op if
    /// already present or out of bounds — callers check bounds separately.
    pub fn add_received(&mut self, index: u64) {
        if !self.received_chunks.contains(&index) {
            self.received_chunks.push(index);
            self.received_chunks.sort_unstable();
        }
    }
}

fn div_ceil(a: u64, b: u64) -> u64 {
    if b == 0 {
        0
    } else {
        (a + b - 1) / b
    }
}
