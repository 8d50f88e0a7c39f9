//! Runtime configuration
//!
//! Loaded from the environment (via `dotenvy`) with hardcoded fallbacks,
//! following the same `from_env`-with-defaults pattern the rest of the
//! codebase uses for its own config surfaces.

use std::env;
use std::path::PathBuf;

/// Validation ruleset applied to the assembled file before it is moved
/// into the uploads directory.
#[derive(Debug, Clone)]
pub struct ChunkedUploadRules {
    /// Maximum total assembled size, in bytes.
    pub max_total_bytes: u64,
    /// Allowed MIME types. Empty means "allow any".
    pub allowed_mime: Vec<String>,
    /// Allowed file extensions (without the leading dot), lowercase. Empty means "allow any".
    pub allowed_ext: Vec<String>,
}

impl Default for ChunkedUploadRules {
    fn default() -> Self {
        Self {
            max_total_bytes: 5 * 1024 * 1024 * 1024, // 5 GiB
            allowed_mime: Vec::new(),
            allowed_ext: Vec::new(),
        }
    }
}

/// Chunked-upload configuration surface.
#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch for the chunked upload path.
    pub enabled: bool,
    /// Ceiling of the sizing sigmoid, in KiB.
    pub max_chunk_kb: f64,
    /// Below this chunk count, chunking is skipped for the file.
    pub min_chunks: u64,
    /// Session store TTL, in seconds.
    pub session_ttl_secs: i64,
    /// Server-side RMW retries and client-side chunk retries.
    pub retry_attempts: u32,
    /// Validation ruleset run against the assembled file.
    pub chunked_upload_rules: ChunkedUploadRules,
    /// Directory temp and final files are written to.
    pub uploads_dir: PathBuf,
    /// HTTP bind port for the server binary.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chunk_kb: 65536.0, // 64 MiB ceiling
            min_chunks: 2,
            session_ttl_secs: 6 * 3600,
            retry_attempts: 3,
            chunked_upload_rules: ChunkedUploadRules::default(),
            uploads_dir: PathBuf::from("./uploads"),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// field-by-field rather than failing outright on a missing variable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = env::var("CHUNKED_UPLOAD_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.enabled);

        let max_chunk_kb = env::var("CHUNKED_UPLOAD_MAX_CHUNK_KB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_chunk_kb);

        let min_chunks = env::var("CHUNKED_UPLOAD_MIN_CHUNKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_chunks);

        let session_ttl_secs = env::var("CHUNKED_UPLOAD_SESSION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.session_ttl_secs);

        let retry_attempts = env::var("CHUNKED_UPLOAD_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.retry_attempts);

        let max_total_bytes = env::var("CHUNKED_UPLOAD_MAX_TOTAL_MB")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(defaults.chunked_upload_rules.max_total_bytes);

        let allowed_mime = env::var("CHUNKED_UPLOAD_ALLOWED_MIME")
            .ok()
            .map(|v| split_csv(&v))
            .unwrap_or(defaults.chunked_upload_rules.allowed_mime);

        let allowed_ext = env::var("CHUNKED_UPLOAD_ALLOWED_EXT")
            .ok()
            .map(|v| split_csv(&v))
            .unwrap_or(defaults.chunked_upload_rules.allowed_ext);

        let uploads_dir = env::var("CHUNKED_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.uploads_dir);

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        Self {
            enabled,
            max_chunk_kb,
            min_chunks,
            session_ttl_secs,
            retry_attempts,
            chunked_upload_rules: ChunkedUploadRules {
                max_total_bytes,
                allowed_mime,
                allowed_ext,
            },
            uploads_dir,
            port,
        }
    }
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.enabled);
        assert!(cfg.max_chunk_kb > 4096.0);
        assert!(cfg.min_chunks >= 1);
    }

    #[test]
    fn split_csv_trims_and_lowercases() {
        assert_eq!(
            split_csv(" PDF, Epub ,,zip"),
            vec!["pdf".to_string(), "epub".to_string(), "zip".to_string()]
        );
    }
}
