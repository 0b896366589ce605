//! Use-case test suite.
//!
//! Drives the template and report services end to end against in-memory
//! repositories, storage and schema sources. The cache and queue are the
//! crate's own in-process adapters.
//!
//! Run with: cargo test --test usecases

mod support;

mod template_tests;
