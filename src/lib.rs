//! Purpose: Shared library crate used by the `rowstream` CLI and tests.
//! Exports: `api` (caller-facing streaming surface), `core` (stores, streams, errors).
//! Role: Bounded-memory access layer; callers pull rows, batches, pages, or aggregates.
//! Invariants: No operation materializes a full result set.
//! Invariants: Every stream owns exactly one connection and releases it exactly once.
pub mod api;
pub mod core;
pub mod table_paths;
