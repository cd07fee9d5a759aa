//! Capability model for the Fractal delegation engine.
//!
//! Agents carry a set of capabilities and live at a hierarchical level; both
//! gate what an agent may do and which agents it may create.
//!
//! # Main types
//!
//! - [`Capability`] — A permission tag (orchestrate, spawn, execute, validate, synthesize).
//! - [`CapabilitySet`] — An ordered collection of capabilities.
//! - [`AgentLevel`] — Position in the hierarchy (root, domain, specialist, worker).
//! - [`AgentRole`] — Role tag; each role lives at a fixed level.
//! - [`authorize_spawn`] — The single check every child creation goes through.

/// Capability and capability-set definitions.
pub mod capability;
/// Levels, roles and spawn authorization.
pub mod hierarchy;

pub use capability::{Capability, CapabilitySet};
pub use hierarchy::{authorize_spawn, AgentLevel, AgentRole, SecurityError};
