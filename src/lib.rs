//! # Precedent Harness
//!
//! Retrieval engine for historical customs-ruling precedents.
//!
//! Given a product / HS-code query, the engine returns the prior rulings
//! most relevant to it: freshly collected from the authoritative source
//! when needed, served from a TTL cache when possible, and always enriched
//! with nearest neighbors from a durable vector index. The assembled,
//! ranked document list is handed to an external analysis collaborator;
//! this crate never interprets ruling content beyond similarity ranking.
//!
//! ## Architecture
//!
//! ```text
//! HS-code query
//!      │
//!      ▼
//! ┌──────────────┐  miss  ┌────────────┐
//! │ Ruling Cache │───────▶│ Collector  │──▶ external ruling source
//! │   (TTL)      │        │ (HTTP)     │
//! └──────┬───────┘        └─────┬──────┘
//!        │ hit                  │ embed + upsert
//!        ▼                      ▼
//! ┌─────────────────────────────────────┐
//! │   Vector Index (SQLite, durable)    │
//! │   embeddings ⟷ document metadata    │
//! └──────────────────┬──────────────────┘
//!                    ▼
//!          ranked neighbor set → analyzer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pct init                               # create database
//! pct query 8518.22.00 --product "bluetooth speaker"
//! pct search "wireless loudspeakers"     # index-only semantic search
//! pct stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`cache`] | TTL ruling cache |
//! | [`collector`] | Precedent collection from the ruling source |
//! | [`embedding`] | Deterministic embedding generation |
//! | [`index`] | Durable vector index + metadata store |
//! | [`retrieve`] | Retrieval orchestration |
//! | [`stats`] | Database and cache statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod collector;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod migrate;
pub mod models;
pub mod retrieve;
pub mod stats;
