//! Shared test utilities for docpipe integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring both pipeline stages over in-memory adapters
//! - Fakes for the downloader and a call-counting repository

pub mod fakes;
pub mod harness;

pub use fakes::{FakeDownloader, SpyRepository};
pub use harness::{message, message_at, TestHarness};
