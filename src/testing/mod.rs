//! Testing utilities for partition orchestration.
//!
//! This module provides in-memory fakes for every external collaborator so
//! the controllers and enumerators can be driven through real splits,
//! throttles, and ownership races without a live service:
//! - [`InMemoryCollection`] — a document container with a splittable
//!   partition map and failure injection
//! - [`InMemoryLeaseStore`] — a lease store with a shareable backing so two
//!   host identities can race
//! - [`RecordingObserver`] — records every observer callback for assertions

mod memory;

mod feed_integration_tests;
mod supervisor_tests;

pub use memory::{InMemoryCollection, InMemoryLeaseStore, RecordingObserver};
