//! # Syncline Library
//!
//! This library provides the core functionality for the Syncline service:
//! connection management, the credential vault, provider clients, the sync
//! runner and scheduler, and the HTTP surface.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod cursor;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sync_runner;
pub mod telemetry;
pub mod tier;
pub mod vault;
pub mod webhook_verification;
pub use migration;
