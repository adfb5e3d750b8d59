//! Purpose: Uniform table storage over a flat key space or nested buckets.
//! Exports: `api` (the `Store` facade and its types) and `core` (codec, adapters, predicates).
//! Role: Library behind the `tablekv` CLI and the integration tests.
//! Invariants: Both engines present identical table semantics to callers.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
