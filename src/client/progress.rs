//! Progress reporting for the client dispatcher.

use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub total_size: u64,
    pub uploaded: u64,
    pub progress: f64,
    pub current_chunk: Option<u64>,
    pub total_chunks: u64,
}

impl ProgressUpdate {
    pub fn new(total_size: u64, uploaded: u64, current_chunk: Option<u64>, total_chunks: u64) -> Self {
        let progress = if total_size > 0 {
            uploaded as f64 / total_size as f64
        } else {
            1.0
        };
        Self {
            total_size,
            uploaded,
            progress,
            current_chunk,
            total_chunks,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkProgress {
    pub index: u64,
    pub loaded: u64,
}

pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, update: ProgressUpdate);
}

pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

impl<T: ProgressCallback> ProgressCallback for Arc<T> {
    fn on_progress(&self, update: ProgressUpdate) {
        (**self).on_progress(update)
    }
}

impl ProgressCallback for Box<dyn ProgressCallback> {
    fn on_progress(&self, update: ProgressUpdate) {
        (**self).on_progress(update)
    }
}
