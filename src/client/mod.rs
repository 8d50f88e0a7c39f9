//! Client Dispatcher (C5)
//!
//! Reference client that reads a local file, splits it into chunks per a
//! server-declared (or locally computed) [`crate::sizing::SizingDecision`],
//! and uploads them with bounded concurrency, retries, and cancellation.

mod dispatcher;
mod error;
mod progress;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{ClientError, ClientResult};
pub use progress::{ChunkProgress, NoOpProgress, ProgressCallback, ProgressUpdate};
