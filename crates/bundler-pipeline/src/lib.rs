//! Composes the UserOp value object, RPC adapter, simulation decoder, trace
//! validator, and bytecode reputation store into a single admission pipeline,
//! plus the admin operations that mutate reputation and the
//! supported-entry-point registry.

pub mod admin;
pub mod error;
pub mod validate;

pub use error::PipelineError;
pub use validate::{accept, validate, Decision, PipelineDeps, Settings};
