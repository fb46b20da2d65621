//! Shared types for the xpanel workspace.
//!
//! Keep the agent wire protocol and cross-crate enums here so the
//! control plane and agents never drift apart on serialization.

#![warn(missing_docs)]

/// Agent protocol DTOs and shared enums.
pub mod api;
