//! Positioned-write chunk storage and final assembly.

use std::path::PathBuf;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

use crate::chunk::path::{sanitize_ext, sanitize_upload_id};
use crate::config::ChunkedUploadRules;
use crate::error::{AppError, Result};
use crate::session::FileInfo;

/// Which storage backend chunked uploads are configured to use. Chunked
/// uploads are only supported on a local filesystem; any other value must
/// cause every operation to fail with `UnsupportedBackend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Remote,
}

/// Writes chunk bytes at their canonical offset into a single sparse temp
/// file per upload, and assembles + validates the finished file.
#[derive(Clone)]
pub struct ChunkWriter {
    inner: Arc<Inner>,
}

struct Inner {
    uploads_dir: PathBuf,
    backend: Backend,
}

#[derive(Serialize)]
struct Sidecar {
    name: String,
    #[serde(rename = "type")]
    mime_type: String,
    size: u64,
    /// Set to the generated final filename, not a real content hash. This
    /// mirrors an existing quirk in the interface this core implements and
    /// is kept as-is for compatibility rather than "fixed".
    hash: String,
}

impl ChunkWriter {
    pub fn new(uploads_dir: PathBuf, backend: Backend) -> Self {
        Self {
            inner: Arc::new(Inner {
                uploads_dir,
                backend,
            }),
        }
    }

    fn temp_path(&self, sanitized_id: &str, sanitized_ext: &str) -> PathBuf {
        let file_name = if sanitized_ext.is_empty() {
            sanitized_id.to_string()
        } else {
            format!("{}.{}", sanitized_id, sanitized_ext)
        };
        self.inner.uploads_dir.join(file_name)
    }

    /// Writes `bytes` at offset `chunk_index * chunk_size` of the upload's
    /// temp file. Opens create-or-open, seeks, writes, flushes, and fsyncs
    /// before returning success; any I/O failure yields `WriteFailure` and
    /// no partial success is ever reported. Repeating the same chunk is a
    /// no-op on disk (same offset, same bytes).
    pub async fn store_chunk(
        &self,
        upload_id: &str,
        chunk_index: u64,
        bytes: &[u8],
        chunk_size: u64,
        ext: &str,
    ) -> Result<()> {
        if self.inner.backend != Backend::Local {
            return Err(AppError::UnsupportedBackend);
        }

        let sanitized_id = sanitize_upload_id(upload_id);
        if sanitized_id.is_empty() {
            return Err(AppError::InvalidUploadId);
        }
        let sanitized_ext = sanitize_ext(ext);

        tokio::fs::create_dir_all(&self.inner.uploads_dir)
            .await
            .map_err(|e| AppError::WriteFailure(e.to_string()))?;

        let path = self.temp_path(&sanitized_id, &sanitized_ext);
        let offset = chunk_index * chunk_size;
        let data = bytes.to_vec();

        tokio::task::spawn_blocking(move || write_at_offset(&path, offset, &data))
            .await
            .map_err(|e| AppError::WriteFailure(e.to_string()))?
            .map_err(|e| AppError::WriteFailure(e.to_string()))
    }

    /// Verifies the temp file exists and its length equals the declared
    /// size, runs the validation ruleset against it, and on pass renames it
    /// (atomic within one filesystem) to a random 40-char filename in the
    /// uploads directory alongside a JSON metadata sidecar. On failure the
    /// temp file is deleted. Returns the final filename relative to the
    /// uploads directory.
    pub async fn assemble_file(
        &self,
        upload_id: &str,
        file_info: &FileInfo,
        ext: &str,
        rules: &ChunkedUploadRules,
    ) -> Result<String> {
        if self.inner.backend != Backend::Local {
            return Err(AppError::UnsupportedBackend);
        }

        let sanitized_id = sanitize_upload_id(upload_id);
        if sanitized_id.is_empty() {
            return Err(AppError::InvalidUploadId);
        }
        let sanitized_ext = sanitize_ext(ext);
        let temp_path = self.temp_path(&sanitized_id, &sanitized_ext);

        let metadata = tokio::fs::metadata(&temp_path)
            .await
            .map_err(|e| AppError::WriteFailure(format!("temp file missing: {e}")))?;

        if metadata.len() != file_info.size {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(AppError::ValidationFailure(format!(
                "assembled length {} does not match declared size {}",
                metadata.len(),
                file_info.size
            )));
        }

        if let Err(reason) = validate(file_info, &sanitized_ext, rules) {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(AppError::ValidationFailure(reason));
        }

        let random_name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(40)
            .map(char::from)
            .collect();

        let final_name = if sanitized_ext.is_empty() {
            random_name
        } else {
            format!("{}.{}", random_name, sanitized_ext)
        };
        let final_path = self.inner.uploads_dir.join(&final_name);

        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| AppError::WriteFailure(format!("final rename failed: {e}")))?;

        let sidecar = Sidecar {
            name: file_info.name.clone(),
            mime_type: file_info.mime_type.clone(),
            size: file_info.size,
            hash: final_name.clone(),
        };
        let sidecar_path = self.inner.uploads_dir.join(format!("{}.json", final_name));
        let sidecar_json = serde_json::to_vec(&sidecar)
            .map_err(|e| AppError::WriteFailure(format!("sidecar encode failed: {e}")))?;
        tokio::fs::write(&sidecar_path, sidecar_json)
            .await
            .map_err(|e| AppError::WriteFailure(format!("sidecar write failed: {e}")))?;

        Ok(final_name)
    }

    /// Best-effort delete of the temp file; errors are swallowed since this
    /// is a cleanup path that must not itself fail a request.
    pub async fn cleanup(&self, upload_id: &str, ext: &str) {
        let sanitized_id = sanitize_upload_id(upload_id);
        if sanitized_id.is_empty() {
            return;
        }
        let sanitized_ext = sanitize_ext(ext);
        let path = self.temp_path(&sanitized_id, &sanitized_ext);
        let _ = tokio::fs::remove_file(&path).await;
    }
}

fn validate(file_info: &FileInfo, ext: &str, rules: &ChunkedUploadRules) -> std::result::Result<(), String> {
    if file_info.size > rules.max_total_bytes {
        return Err(format!(
            "size {} exceeds cap {}",
            file_info.size, rules.max_total_bytes
        ));
    }

    if !rules.allowed_mime.is_empty()
        && !rules
            .allowed_mime
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&file_info.mime_type))
    {
        return Err(format!("mime type {} is not allowed", file_info.mime_type));
    }

    if !rules.allowed_ext.is_empty()
        && !rules.allowed_ext.iter().any(|e| e.eq_ignore_ascii_case(ext))
    {
        return Err(format!("extension {ext} is not allowed"));
    }

    Ok(())
}

#[cfg(unix)]
fn write_at_offset(path: &std::path::Path, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)?;
    file.write_at(data, offset)?;
    file.sync_all()
}

#[cfg(windows)]
fn write_at_offset(path: &std::path::Path, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)?;
    let mut written = 0usize;
    while written < data.len() {
        written += file.seek_write(&data[written..], offset + written as u64)?;
    }
    file.sync_all()
}
