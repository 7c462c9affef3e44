//! # flowcast
//!
//! Scheduled feed ingestion with live fanout of update notifications.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → Worker → Fetcher → Normalizer → Store
//!                         ↓
//!                        Hub → Subscriber mailboxes → websockets
//! ```
//!
//! - [`ingest`]: Periodic, bounded-concurrency ingestion and retention
//! - [`fetcher`]: HTTP retrieval under a deadline
//! - [`normalizer`]: Converts RSS/Atom/JSON Feed documents to domain models
//! - [`store`]: SQLite persistence layer
//! - [`hub`]: Subscriber registry and broadcast with slow-consumer eviction
//! - [`server`]: Websocket transport for the hub
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a source
//! flowcast add https://blog.rust-lang.org/feed.xml
//!
//! # Fetch everything that is due
//! flowcast update
//!
//! # Run the scheduler and websocket server
//! flowcast serve
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// fetcher and configuration.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// TOML configuration, loaded from `~/.config/flowcast/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Source`](domain::Source): A polled feed and its fetch status
/// - [`ContentItem`](domain::ContentItem): Stored entries with SHA256 IDs
/// - [`Event`](domain::Event): Notifications pushed to live subscribers
pub mod domain;

/// HTTP fetching.
///
/// - [`SourceFetcher`](fetcher::SourceFetcher): Async trait for retrieval
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Distribution hub and subscriber pumps.
pub mod hub;

/// Ingestion worker, scheduler and retention sweeper.
pub mod ingest;

/// Feed parsing and normalization.
///
/// Converts RSS 0.9x/1.0/2.0, Atom 0.3/1.0, and JSON Feed 1.0
/// into unified [`ParsedSource`](domain::ParsedSource) values.
pub mod normalizer;

/// Websocket and health endpoints.
pub mod server;

/// SQLite persistence layer.
///
/// - [`SourceStore`](store::SourceStore) and
///   [`ContentStore`](store::ContentStore): storage traits
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
