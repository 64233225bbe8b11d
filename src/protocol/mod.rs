//! Cooperative protocol kernel.
//!
//! Protocols are explicit state machines. They never share memory; all
//! interaction goes through signals, timers and port messages mediated by
//! the deterministic scheduler.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`id`] | [`ProtocolId`] newtype |
//! | [`payload`] | [`PortName`], [`Header`], [`MessagePayload`], [`Message`] |
//! | [`signal`] | [`Signal`], [`Waitable`], [`Resolution`], [`TimerId`] |
//! | [`traits`] | [`Protocol`] trait + [`ProtocolContext`] |
//! | [`trace`] | [`TraceEntry`] struct |
//! | [`runtime`] | [`ProtocolRuntime`] struct |

pub mod id;
pub mod payload;
pub mod runtime;
pub mod signal;
pub mod trace;
pub mod traits;

pub use id::ProtocolId;
pub use payload::{Header, Message, MessagePayload, PortName};
pub use runtime::{Kernel, ProtocolRuntime};
pub use signal::{Resolution, Signal, SignalName, TimerId, Waitable};
pub use trace::{Activity, TraceEntry};
pub use traits::{Protocol, ProtocolContext};

#[cfg(test)]
mod tests;
