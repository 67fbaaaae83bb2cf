//! # Pagetrail
//!
//! A queryable personal index of browser history and bookmarks.
//!
//! Pagetrail ingests a Chromium-family browser profile (visit history plus
//! bookmarks) into SQLite, embeds records via a remote embedding service,
//! and answers hybrid queries that fuse structured, fulltext, and vector
//! retrieval into one ranked list — via a CLI and an HTTP JSON API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Browser      │──▶│   Ingest      │──▶│  SQLite    │
//! │ History/     │   │ upsert+embed │   │ FTS5+Vec  │
//! │ Bookmarks    │   └──────────────┘   └─────┬─────┘
//! └──────────────┘                            │
//!                          ┌──────────────────┤
//!                          ▼                  ▼
//!                     ┌──────────┐      ┌──────────┐
//!                     │   CLI    │      │   HTTP   │
//!                     │  (ptx)   │      │  (JSON)  │
//!                     └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ptx init                       # create database
//! ptx ingest                     # read the browser profile
//! ptx search "rust async traits" # hybrid search
//! ptx aggregate --group-by domain
//! ptx embed pending              # backfill embeddings
//! ptx serve http                 # start the JSON API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`reader`] | Browser profile readers (History, Bookmarks) |
//! | [`ingest`] | Idempotent ingestion pipeline |
//! | [`store`] | Typed access to the record tables |
//! | [`filter`] | Structured filter vocabulary |
//! | [`embedding`] | Remote embedding client and vector math |
//! | [`backfill`] | Incremental embedding backfill |
//! | [`search`] | Per-kind hybrid retrieval and fusion |
//! | [`query`] | Cross-kind request orchestration |
//! | [`server`] | HTTP JSON API |
//! | [`stats`] | Index statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backfill;
pub mod config;
pub mod db;
pub mod embedding;
pub mod filter;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod query;
pub mod reader;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
