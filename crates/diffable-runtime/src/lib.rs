#![forbid(unsafe_code)]

//! Runtime: the serialized apply controller and its collaborators.
//!
//! # Key Components
//!
//! - [`ApplyController`] - Owns the current snapshot; serializes apply requests
//! - [`Renderer`] - Boundary to whatever draws the collection
//! - [`CollectionHost`] / [`DataSource`] - Thin adapter that loads records
//! - [`CancellationToken`] - Cooperative cancellation checked at fixed points
//! - [`ControllerConfig`] - Animation default and full-reload policy
//!
//! # Role in diffable
//! `diffable-runtime` is the stateful half. It takes snapshots built with
//! `diffable-core`, diffs them against the last applied one in strict FIFO
//! order, and forwards the resulting edit scripts to a [`Renderer`].
//!
//! # Logging
//! Events are emitted through `tracing` under the `diffable.apply` and
//! `diffable.host` targets; each request runs inside a `diffable.apply`
//! span. The crate never installs a subscriber.

pub mod cancellation;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
mod queue;
pub mod render;

pub use cancellation::{CancellationSource, CancellationToken};
pub use config::{ConfigError, ControllerConfig, FULL_RELOAD_ENV};
pub use controller::{
    ApplyController, ApplyNotice, ApplyOptions, ApplyOutcome, ApplyReport, NoticeStatus,
    RenderMode,
};
pub use error::{ApplyError, Result};
pub use host::{CollectionHost, DataSource, LoadOutcome};
pub use render::{Completion, RenderUpdate, Renderer};

pub use diffable_core;
