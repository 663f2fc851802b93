//! CourtListener bulk-data loader
//!
//! Discovers the dated snapshots published in the CourtListener bulk-data
//! bucket, downloads the people-database files, loads them into Postgres in
//! foreign-key order and validates the result. Each stage runs as a
//! cancellable background job driven through a Redis-backed queue.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
