//! # Clinic Roster Backend
//!
//! Tracks which doctors and QA staff are available right now.
//!
//! Staff declare availability windows and take breaks; a background
//! reconciler keeps each window's `is_available` flag in line with the clock,
//! expiring finished windows and restoring windows once a break has ended.
//!
//! ## Architecture
//!
//! - [`models`]: domain types and the [`Clock`](models::Clock)
//! - [`db`]: repository traits with in-memory and Postgres backends
//! - [`services`]: roster operations, sessions and the reconciler
//! - [`config`]: server settings from the environment
//! - [`http`]: axum JSON API

// RepositoryError carries rich context for debugging
#![allow(clippy::result_large_err)]

pub mod config;
pub mod db;
pub mod models;
pub mod services;

#[cfg(feature = "http-server")]
pub mod http;
