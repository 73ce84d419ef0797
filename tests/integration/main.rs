//! Integration tests for Highrise
//!
//! These tests exercise queues, locks and the scheduler through the public
//! API against real SQLite databases.

mod lock_tests;
mod queue_tests;
mod scheduler_tests;
