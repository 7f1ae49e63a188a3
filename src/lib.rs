//! Offline-first scan client
//!
//! Barcode scans and product images are written to a local SQLite event
//! store together with a delivery job, then drained to the backend by a
//! queue worker. Scans race a persistent WebSocket channel against an
//! idempotent HTTP fallback; images go out as multipart uploads. A small
//! relay client lets instances of one mesh find each other and exchange
//! sealed envelopes.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
