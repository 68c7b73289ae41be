//! Library to install and configure the [Holland][holland] backup tool
//! declaratively.
//!
//! The desired state is declared as resources in a [`model::ResourceModel`],
//! ordered by a [`graph::DependencyGraph`] and converged onto a
//! [`host::Host`] by the [`engine::ConvergenceEngine`]. Runs are idempotent:
//! only what differs from the declaration is changed.
//! The resources making up a Holland installation are built by
//! [`holland::catalog`].
//!
//! [holland]: https://github.com/holland-backup/holland

#![forbid(unsafe_code)]

pub mod cli;
pub mod engine;
pub mod graph;
pub mod holland;
pub mod host;
pub mod lens;
pub mod lock;
pub mod model;
