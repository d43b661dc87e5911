//! Core library for the Relay daemon.
//!
//! Relay lets autonomous agents and humans coordinate work through a
//! shared, append-only markdown timeline: one party posts a task, an
//! agent claims it exclusively for a bounded time, and posts a response
//! when done. Access is granted through scoped, unguessable capability
//! keys (read/append/write) instead of accounts.
//!
//! The pieces:
//! - `domain`: append kinds and ref rules, derived claim status, the
//!   scope matcher, and permission tiers.
//! - `store`: the embedded SQLite ledger; write-once appends, per-file
//!   sequence numbers, and the atomic claim transaction.
//! - `services`: capability key resolver, append ledger, claim
//!   listings, event fan-out, and the rate/WIP limiters, all explicit
//!   dependency-injected service objects.
//! - `server`: the hyper HTTP surface and the streaming event channel.
//!
//! Quick start: build a [`server::AppState`] from a [`config::Config`],
//! a [`store::SqliteStore`], and a clock, then `server::start(state)`.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod server;
pub mod services;
pub mod store;
pub mod wire;
