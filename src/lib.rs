//! Chunked upload core
//!
//! This crate exposes the five components of the chunked-upload protocol
//! so they can be exercised independently of the HTTP server binary:
//!
//! - [`sizing`]: pure chunk-size/chunk-count decision function
//! - [`session`]: session record type and the CAS-less session store trait
//! - [`chunk`]: positioned-write chunk storage and final assembly
//! - [`ingest`]: the axum router and handler for the chunk ingest endpoint
//! - [`client`]: the browser/desktop-side chunk dispatcher
//!
//! `auth`, `sweeper`, `config`, `error`, and `state` are the ambient
//! plumbing the server binary wires together in `main.rs`.

pub mod auth;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod ingest;
pub mod session;
pub mod sizing;
pub mod state;
pub mod sweeper;
