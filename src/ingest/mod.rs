//! Ingest Endpoint (C4)
//!
//! The HTTP surface of the protocol: validates a chunk, hash-checks it,
//! delegates the write to [`crate::chunk`], updates [`crate::session`], and
//! on the completing chunk performs assembly.
//!
//! Session creation itself ("initialize") is the embedding framework's
//! decision; `initiate` below is the minimal endpoint needed to exercise
//! the ingest contract end to end — it asks [`crate::sizing`] for a chunk
//! size and either returns an existing resumable session (by file hash) or
//! creates a fresh one.

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunk::Backend;
use crate::error::{AppError, Result};
use crate::session::{FileInfo, SessionRecord};
use crate::sizing;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/initiate", post(initiate))
        .route("/chunks", post(ingest_chunk))
}

// ============================================================================
// Initiate
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest {
    name: String,
    #[serde(rename = "type")]
    mime_type: String,
    size: u64,
    hash: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    upload_id: String,
    should_chunk: bool,
    chunk_size: u64,
    total_chunks: u64,
    received_chunks: Vec<u64>,
}

async fn initiate(
    State(state): State<AppState>,
    Json(req): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>> {
    let config = state.config();

    // Resumability: a matching file hash reuses the same upload_id and
    // whatever chunks it has already received.
    if let Some(hash) = req.hash.as_deref() {
        if let Some(existing) = state.session_store().find_by_file_hash(hash).await {
            if !existing.complete {
                return Ok(Json(InitiateResponse {
                    upload_id: existing.upload_id,
                    should_chunk: true,
                    chunk_size: existing.chunk_size,
                    total_chunks: existing.total_chunks,
                    received_chunks: existing.received_chunks,
                }));
            }
        }
    }

    let decision = sizing::decide(
        req.size,
        config.max_chunk_kb,
        config.min_chunks,
        config.enabled,
        Backend::Local,
        false,
    )?;

    if !decision.should_chunk {
        return Ok(Json(InitiateResponse {
            upload_id: String::new(),
            should_chunk: false,
            chunk_size: 0,
            total_chunks: 0,
            received_chunks: Vec::new(),
        }));
    }

    let upload_id = random_upload_id();
    let file_info = FileInfo {
        name: req.name,
        mime_type: req.mime_type,
        size: req.size,
        hash: req.hash,
    };
    let record = SessionRecord::new(upload_id.clone(), file_info, decision.chunk_size);

    state
        .session_store()
        .put(
            record,
            std::time::Duration::from_secs(config.session_ttl_secs.max(0) as u64),
        )
        .await?;

    Ok(Json(InitiateResponse {
        upload_id,
        should_chunk: true,
        chunk_size: decision.chunk_size,
        total_chunks: decision.total_chunks,
        received_chunks: Vec::new(),
    }))
}

fn random_upload_id() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

// ============================================================================
// Chunk ingest
// ============================================================================

#[derive(Serialize)]
#[serde(untagged)]
enum ChunkResponse {
    Complete { complete: bool, path: String },
    Progress { progress: f64, received: u64, total: u64 },
}

async fn ingest_chunk(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    multipart: Multipart,
) -> Result<Json<ChunkResponse>> {
    if !state.gate().verify(&headers) {
        return Err(AppError::Unauthorized);
    }

    let parsed = parse_multipart(multipart).await?;

    let mut record = state
        .session_store()
        .get(&parsed.upload_id)
        .await
        .ok_or(AppError::SessionMissing)?;

    if record.complete {
        let path = record.final_path.clone().ok_or(AppError::SessionMissing)?;
        return Ok(Json(ChunkResponse::Complete {
            complete: true,
            path,
        }));
    }

    if parsed.chunk_index >= record.total_chunks {
        return Err(AppError::MalformedRequest(format!(
            "chunk_index {} out of range [0, {})",
            parsed.chunk_index, record.total_chunks
        )));
    }

    let actual_hash = hex::encode(Sha256::digest(&parsed.chunk_data));
    if !actual_hash.eq_ignore_ascii_case(&parsed.chunk_hash) {
        return Err(AppError::HashMismatch {
            chunk_index: parsed.chunk_index,
        });
    }

    let ext = extension_of(&record.file_info.name);

    state
        .chunk_writer()
        .store_chunk(
            &parsed.upload_id,
            parsed.chunk_index,
            &parsed.chunk_data,
            record.chunk_size,
            &ext,
        )
        .await?;

    let retries = state.config().retry_attempts;
    let ttl = std::time::Duration::from_secs(state.config().session_ttl_secs.max(0) as u64);
    record = crate::session::mark_chunk_received(
        state.session_store().as_ref(),
        &parsed.upload_id,
        parsed.chunk_index,
        retries,
        ttl,
    )
    .await?;

    if !record.is_complete() {
        return Ok(Json(ChunkResponse::Progress {
            progress: record.progress(),
            received: record.received_chunks.len() as u64,
            total: record.total_chunks,
        }));
    }

    finalize(&state, &parsed.upload_id, record, &ext).await
}

/// Runs on the request that observes the completing chunk. Size-cap check
/// happens here, before assembly; the full validation ruleset runs inside
/// `assemble_file`, after assembly — two separate stages rather than one
/// combined pass, so a cap violation never needs a successful rename first.
async fn finalize(
    state: &AppState,
    upload_id: &str,
    mut record: SessionRecord,
    ext: &str,
) -> Result<Json<ChunkResponse>> {
    if record.complete {
        let path = record.final_path.clone().ok_or(AppError::SessionMissing)?;
        return Ok(Json(ChunkResponse::Complete {
            complete: true,
            path,
        }));
    }

    if record.file_info.size > state.config().chunked_upload_rules.max_total_bytes {
        state.chunk_writer().cleanup(upload_id, ext).await;
        return Err(AppError::SizeExceeded);
    }

    let assembled = state
        .chunk_writer()
        .assemble_file(
            upload_id,
            &record.file_info,
            ext,
            &state.config().chunked_upload_rules,
        )
        .await;

    let final_path = match assembled {
        Ok(path) => path,
        Err(err) => {
            // Another concurrent request may have already renamed the temp
            // file out from under us (first renamer wins). If the session
            // now shows complete, this request simply lost the race rather
            // than failed; surface the winner's path.
            if let Some(winner) = state.session_store().get(upload_id).await {
                if winner.complete {
                    let path = winner.final_path.ok_or(AppError::SessionMissing)?;
                    return Ok(Json(ChunkResponse::Complete {
                        complete: true,
                        path,
                    }));
                }
            }
            return Err(err);
        }
    };

    record.complete = true;
    record.final_path = Some(final_path.clone());
    state
        .session_store()
        .put(
            record,
            std::time::Duration::from_secs(state.config().session_ttl_secs.max(0) as u64),
        )
        .await?;

    Ok(Json(ChunkResponse::Complete {
        complete: true,
        path: final_path,
    }))
}

fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string()
}

// ============================================================================
// Multipart shape validation
// ============================================================================

struct ParsedChunk {
    upload_id: String,
    chunk_index: u64,
    chunk_data: Vec<u8>,
    chunk_hash: String,
}

async fn parse_multipart(mut multipart: Multipart) -> Result<ParsedChunk> {
    let mut upload_id = None;
    let mut chunk_index = None;
    let mut chunk_data = None;
    let mut chunk_hash = None;

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| AppError::MalformedRequest(e.to_string()))?;
        let Some(field) = field else { break };

        match field.name().unwrap_or_default() {
            "upload_id" => {
                upload_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::MalformedRequest(e.to_string()))?,
                );
            }
            "chunk_index" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::MalformedRequest(e.to_string()))?;
                chunk_index = Some(
                    text.parse::<u64>()
                        .map_err(|_| AppError::MalformedRequest("chunk_index must be a non-negative integer".into()))?,
                );
            }
            "chunk_data" => {
                chunk_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::MalformedRequest(e.to_string()))?
                        .to_vec(),
                );
            }
            "chunk_hash" => {
                chunk_hash = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::MalformedRequest(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let upload_id = upload_id.ok_or_else(|| AppError::MalformedRequest("missing upload_id".into()))?;
    let sanitized = crate::chunk::sanitize_upload_id(&upload_id);
    if sanitized.is_empty() {
        return Err(AppError::InvalidUploadId);
    }

    let chunk_index = chunk_index.ok_or_else(|| AppError::MalformedRequest("missing chunk_index".into()))?;
    let chunk_data = chunk_data.ok_or_else(|| AppError::MalformedRequest("missing chunk_data".into()))?;
    let chunk_hash = chunk_hash.ok_or_else(|| AppError::MalformedRequest("missing chunk_hash".into()))?;

    if chunk_hash.len() != 64 || !chunk_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::MalformedRequest(
            "chunk_hash must be 64 hex characters".into(),
        ));
    }

    Ok(ParsedChunk {
        upload_id,
        chunk_index,
        chunk_data,
        chunk_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, BearerToken};
    use crate::chunk::{Backend, ChunkWriter};
    use crate::session::InMemorySessionStore;
    use crate::session::SessionStore;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> TestServer {
        let mut config = crate::config::Config::default();
        config.uploads_dir = dir.path().to_path_buf();
        config.retry_attempts = 3;

        let state = AppState::new(
            config,
            Arc::new(InMemorySessionStore::new()),
            ChunkWriter::new(dir.path().to_path_buf(), Backend::Local),
            Arc::new(AllowAll),
        );

        TestServer::new(router().with_state(state)).unwrap()
    }

    fn chunk_form(upload_id: &str, index: u64, data: &[u8]) -> MultipartForm {
        let hash = hex::encode(Sha256::digest(data));
        MultipartForm::new()
            .add_text("upload_id", upload_id)
            .add_text("chunk_index", index.to_string())
            .add_part("chunk_data", Part::bytes(data.to_vec()))
            .add_text("chunk_hash", hash)
    }

    async fn initiate(server: &TestServer, name: &str, size: u64) -> String {
        let resp = server
            .post("/initiate")
            .json(&serde_json::json!({"name": name, "type": "application/octet-stream", "size": size}))
            .await;
        resp.assert_status_ok();
        resp.json::<serde_json::Value>()["uploadId"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn random_upload_id_is_64_hex_chars() {
        let id = random_upload_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn single_chunk_upload_completes_immediately() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        // Force a tiny chunk size by bypassing /initiate: insert the session directly.
        let state_store = InMemorySessionStore::new();
        let record = SessionRecord::new(
            "onechunk".into(),
            FileInfo {
                name: "a.bin".into(),
                mime_type: "application/octet-stream".into(),
                size: 5,
                hash: None,
            },
            5,
        );
        state_store
            .put(record, std::time::Duration::from_secs(3600))
            .await
            .unwrap();

        let test_state = AppState::new(
            crate::config::Config {
                uploads_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            Arc::new(state_store),
            ChunkWriter::new(dir.path().to_path_buf(), Backend::Local),
            Arc::new(AllowAll),
        );
        let server = TestServer::new(router().with_state(test_state)).unwrap();

        let resp = server
            .post("/chunks")
            .multipart(chunk_form("onechunk", 0, b"hello"))
            .await;
        resp.assert_status_ok();
        let body: serde_json::Value = resp.json();
        assert_eq!(body["complete"], true);
        assert!(body["path"].as_str().unwrap().ends_with(".bin"));
    }

    #[tokio::test]
    async fn hash_mismatch_returns_conflict_with_bare_chunk_index() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);
        let upload_id = initiate(&server, "movie.mp4", 20_000_000).await;

        let resp = server
            .post("/chunks")
            .multipart(
                MultipartForm::new()
                    .add_text("upload_id", &upload_id)
                    .add_text("chunk_index", "0")
                    .add_part("chunk_data", Part::bytes(b"data".to_vec()))
                    .add_text("chunk_hash", "0".repeat(64)),
            )
            .await;

        resp.assert_status(axum::http::StatusCode::CONFLICT);
        let body: serde_json::Value = resp.json();
        assert_eq!(body["chunkIndex"], 0);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn unknown_upload_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);

        let resp = server
            .post("/chunks")
            .multipart(chunk_form("ghost", 0, b"data"))
            .await;

        resp.assert_status_not_found();
    }

    #[tokio::test]
    async fn gate_rejects_without_matching_bearer_token() {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(
            crate::config::Config {
                uploads_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            Arc::new(InMemorySessionStore::new()),
            ChunkWriter::new(dir.path().to_path_buf(), Backend::Local),
            Arc::new(BearerToken::new("s3cr3t")),
        );
        let server = TestServer::new(router().with_state(state)).unwrap();

        let resp = server
            .post("/chunks")
            .multipart(chunk_form("anything", 0, b"data"))
            .await;

        resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn multi_chunk_upload_accumulates_then_completes() {
        let dir = TempDir::new().unwrap();
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new(
            "multi".into(),
            FileInfo {
                name: "doc.bin".into(),
                mime_type: "application/octet-stream".into(),
                size: 8,
                hash: None,
            },
            4,
        );
        store.put(record, std::time::Duration::from_secs(3600)).await.unwrap();

        let state = AppState::new(
            crate::config::Config {
                uploads_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            Arc::new(store),
            ChunkWriter::new(dir.path().to_path_buf(), Backend::Local),
            Arc::new(AllowAll),
        );
        let server = TestServer::new(router().with_state(state)).unwrap();

        let first = server
            .post("/chunks")
            .multipart(chunk_form("multi", 0, b"aaaa"))
            .await;
        first.assert_status_ok();
        let first_body: serde_json::Value = first.json();
        assert_eq!(first_body["complete"], serde_json::Value::Null);
        assert_eq!(first_body["received"], 1);

        let second = server
            .post("/chunks")
            .multipart(chunk_form("multi", 1, b"bbbb"))
            .await;
        second.assert_status_ok();
        let second_body: serde_json::Value = second.json();
        assert_eq!(second_body["complete"], true);

        let bytes = tokio::fs::read(dir.path().join(second_body["path"].as_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(bytes, b"aaaabbbb");
    }

    #[tokio::test]
    async fn concurrent_completion_converges_on_a_single_final_path() {
        let dir = TempDir::new().unwrap();
        let store = InMemorySessionStore::new();
        let record = SessionRecord::new(
            "race".into(),
            FileInfo {
                name: "race.bin".into(),
                mime_type: "application/octet-stream".into(),
                size: 8,
                hash: None,
            },
            4,
        );
        store.put(record, std::time::Duration::from_secs(3600)).await.unwrap();

        let state = AppState::new(
            crate::config::Config {
                uploads_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            Arc::new(store),
            ChunkWriter::new(dir.path().to_path_buf(), Backend::Local),
            Arc::new(AllowAll),
        );
        let server = TestServer::new(router().with_state(state)).unwrap();

        server
            .post("/chunks")
            .multipart(chunk_form("race", 0, b"aaaa"))
            .await
            .assert_status_ok();

        // Two requests for the same completing chunk, launched together.
        let req_a = server.post("/chunks").multipart(chunk_form("race", 1, b"bbbb"));
        let req_b = server.post("/chunks").multipart(chunk_form("race", 1, b"bbbb"));
        let (resp_a, resp_b) = tokio::join!(req_a, req_b);

        resp_a.assert_status_ok();
        resp_b.assert_status_ok();
        let a: serde_json::Value = resp_a.json();
        let b: serde_json::Value = resp_b.json();
        assert_eq!(a["complete"], true);
        assert_eq!(b["complete"], true);
        assert_eq!(a["path"], b["path"]);
    }
}
