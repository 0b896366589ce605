//! Report manager library.
//!
//! Template and report use-cases: templates are validated against live data
//! source schemas and stored as metadata plus a blob; reports are recorded
//! and handed to the generation worker through the job queue.

pub mod app;
pub mod config;
pub mod context;
pub mod db;
pub mod entity;
pub mod error;
pub mod migration;
pub mod models;
pub mod services;
pub mod telemetry;
