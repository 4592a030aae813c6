//! Low-level primitives shared by the storage layer.

/// Entity locks and scan completion signals.
///
/// Thread-safe coordination between scans, writers and index drops.
pub mod concurrency;
