//! Sizing Policy (C3)
//!
//! Pure function: file size -> {should_chunk, chunk_size, total_chunks}.
//! No I/O, no async, independently testable and benchmarkable.

use crate::chunk::Backend;

const MIN_CHUNK_KB: f64 = 4096.0; // 4 MiB floor
const SIGMOID_OFFSET: f64 = 20.7944; // places the midpoint around 1 GiB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingDecision {
    pub should_chunk: bool,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

impl SizingDecision {
    fn skip() -> Self {
        Self {
            should_chunk: false,
            chunk_size: 0,
            total_chunks: 0,
        }
    }
}

/// Decides whether a file should be chunked and, if so, the chunk size and
/// chunk count. `enabled` and `backend` gate the decision independently of
/// the sigmoid: chunking is refused outright on a non-local backend.
///
/// Fails with [`ConfigurationError`](crate::error::AppError::ConfigurationError)
/// only when `force` requests chunking be attempted against a non-local
/// backend; otherwise a non-local backend or a too-small file simply
/// produces `should_chunk: false` so the caller falls back to the ordinary
/// upload path.
pub fn decide(
    file_size_bytes: u64,
    max_chunk_kb: f64,
    min_chunks: u64,
    enabled: bool,
    backend: Backend,
    force: bool,
) -> Result<SizingDecision, crate::error::AppError> {
    if backend != Backend::Local {
        if force {
            return Err(crate::error::AppError::ConfigurationError);
        }
        return Ok(SizingDecision::skip());
    }

    if !enabled || file_size_bytes == 0 {
        return Ok(SizingDecision::skip());
    }

    let x = (file_size_bytes as f64).ln() - SIGMOID_OFFSET;
    let chunk_kb = MIN_CHUNK_KB + (max_chunk_kb - MIN_CHUNK_KB) / (1.0 + (-x).exp());
    let chunk_size = (chunk_kb * 1024.0).floor() as u64;
    let chunk_size = chunk_size.max(1);
    let total_chunks = div_ceil(file_size_bytes, chunk_size);

    Ok(SizingDecision {
        should_chunk: total_chunks >= min_chunks,
        chunk_size,
        total_chunks,
    })
}

fn div_ceil(a: u64, b: u64) -> u64 {
    if b == 0 {
        0
    } else {
        (a + b - 1) / b
    }
}
