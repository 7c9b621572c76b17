//! # shiplog-rs
//!
//! Deployment ledger for GitHub repositories.
//!
//! Reconstructs deployments per repository per environment (dev/uat/prod)
//! from three channels: GitHub webhooks, scheduled repository scans, and
//! release log documents. Every write is find-or-create against a
//! uniqueness constraint, so replays and overlapping channels converge.

pub mod config;
pub mod context;
pub mod correlate;
pub mod db;
pub mod docs;
pub mod engine;
pub mod error;
pub mod github;
pub mod model;
pub mod parser;
pub mod scan;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod webhook;
