//! Chunk File Writer (C2)
//!
//! Positioned writes into a single sparse temp file per upload; final
//! assembly is a length check, a validation pass, and an atomic rename.

mod path;
mod writer;

pub use path::{sanitize_ext, sanitize_upload_id};
pub use writer::{Backend, ChunkWriter};
