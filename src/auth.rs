//! The ingest endpoint's signature gate.
//!
//! Authentication, signed-URL validation, and CSRF are the framework's
//! concern and are out of scope here; this module only supplies the single
//! seam the endpoint needs to honor its 401 contract element. The default
//! implementation accepts everything, which is correct for a core that does
//! not own the signing scheme.

use axum::http::HeaderMap;

/// Verifies a request is allowed to reach the ingest endpoint. Implementors
/// are expected to inspect headers the surrounding framework attaches
/// (a signed URL token, a session cookie, an HMAC over the request) — this
/// crate does not define that scheme.
pub trait SignatureGate: Send + Sync {
    fn verify(&self, headers: &HeaderMap) -> bool;
}

/// Accepts every request. Used when the embedding framework handles auth
/// upstream of this core (e.g. in outer routing middleware) and the gate
/// would otherwise be redundant.
pub struct AllowAll;

impl SignatureGate for AllowAll {
    fn verify(&self, _headers: &HeaderMap) -> bool {
        true
    }
}

/// Checks a shared-secret bearer token carried in `Authorization: Bearer <token>`.
/// One concrete example of wiring a real gate in; not a prescribed scheme.
pub struct BearerToken {
    expected: String,
}

impl BearerToken {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl SignatureGate for BearerToken {
    fn verify(&self, headers: &HeaderMap) -> bool {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| token == self.expected)
            .unwrap_or(false)
    }
}
