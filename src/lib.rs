//! Declarative chat-bot runtime.
//!
//! A bot is described by a [`spec::Specification`]: commands, event
//! handlers, reusable flows, state declarations, automod rules and outbound
//! pipes. The [`Runtime`] interprets it: expressions and templates are
//! evaluated by [`expression`], actions run through [`executor`], persistent
//! values live in [`state`] and incoming messages are screened by
//! [`automod`].

pub mod automod;
pub mod config;
pub mod duration;
pub mod error;
pub mod event;
pub mod executor;
pub mod expression;
pub mod pipe;
pub mod platform;
pub mod runtime;
pub mod spec;
pub mod state;
pub mod telemetry;
pub mod value;

// Re-exports
pub use error::{Error, RuntimeResult};
pub use runtime::{EventOutcome, Runtime};
pub use value::{Value, ValueMap};
