//! Per-provider session bindings shared across concurrent calls.

mod registry;

pub use registry::SessionRegistry;
