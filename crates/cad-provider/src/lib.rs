//! Concrete agent-CLI providers and the per-call orchestration pipeline.
//!
//! A [`Provider`] is one supported agent CLI: its binary identity, argv
//! shapes, event normalization, and token-usage extraction. [`AgentDriver`]
//! composes the supervisor, workspace snapshotter, tool-server config
//! builder, and session registry into the single `call_model` operation the
//! upstream engine invokes.

mod config;
mod discovery;
mod driver;
mod events;
mod prompt;
mod provider;
mod usage;

pub use cad_process::{RawResponse, StreamCallback, StreamUpdate};
pub use driver::{AgentDriver, CallOptions, DriverConfig, ModelResponse};
pub use provider::{Provider, StreamFlavor};
pub use usage::{UsageLedger, UsageSink};
