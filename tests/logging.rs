//! Integration tests for `src/logging.rs`.

#[path = "logging/logging_test.rs"]
mod logging_test;
