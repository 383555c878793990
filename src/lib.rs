//! Composition core of a modular mail-transfer agent.
//!
//! Protocol endpoints, backend modules (storage, authentication, queues,
//! delivery targets), and per-connection policy checks are all wired together
//! from a declarative configuration tree at startup:
//!
//! 1. The embedding process registers every available module and endpoint
//!    type in a [`registry::Registry`].
//! 2. [`compose::compose`] consumes the parsed [`config::Node`] tree and
//!    produces the frozen, fully initialized instance set, or a descriptive
//!    configuration error.
//! 3. Each accepted connection gets a [`check::CheckContext`], evaluated by
//!    an ordered [`check::Pipeline`] of stateless policy checks.

pub mod address;
pub mod check;
pub mod compose;
pub mod config;
pub mod dns;
pub mod logging;
pub mod module;
pub mod registry;

pub use tracing;
