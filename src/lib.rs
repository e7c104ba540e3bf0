//! # vector-sync
//!
//! Incremental synchronization of a document collection into a vector index,
//! plus semantic search over that index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ DocumentSource│──▶│ diff vs    │──▶│  Embedding   │──▶│ VectorStore  │
//! │ (fs, memory)  │   │ snapshot   │   │ Orchestrator │   │ (Vectorize)  │
//! └──────────────┘   └─────┬──────┘   └─────────────┘   └──────┬───────┘
//!                          │                                    │
//!                          ▼                                    ▼
//!                   ┌─────────────┐                      ┌─────────────┐
//!                   │ SyncState   │                      │ QueryService│
//!                   │ (SQLite)    │                      └─────────────┘
//!                   └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credential resolution |
//! | [`models`] | Core data types |
//! | [`error`] | `ProviderError` and `SyncError` |
//! | [`fingerprint`] | Content fingerprints |
//! | [`detect`] | Change detection (`diff`) |
//! | [`retry`] | Exponential backoff |
//! | [`cloudflare`] | Cloudflare REST client and envelope decoding |
//! | [`embedding`] | Embedding providers and the orchestrator |
//! | [`vector_store`] | Vector store trait, Vectorize and in-memory stores |
//! | [`source`] | Document sources |
//! | [`state`] | Sync state persistence and writer guards |
//! | [`reconcile`] | The sync pass |
//! | [`query`] | Semantic search |
//! | [`commands`] | CLI command handlers |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cloudflare;
pub mod commands;
pub mod config;
pub mod db;
pub mod detect;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod migrate;
pub mod models;
pub mod query;
pub mod reconcile;
pub mod retry;
pub mod source;
pub mod state;
pub mod vector_store;
