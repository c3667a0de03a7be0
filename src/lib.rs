//! # reweave
//!
//! Cooperative reconciliation runtime for declarative UI trees.
//!
//! Callers describe what the UI should look like as an [`Element`] tree;
//! the runtime diffs consecutive descriptions against a double-buffered
//! work-unit graph and applies the minimal set of mutations to an
//! external host tree through the [`Host`] trait. The diffing itself is
//! cooperative: passes can be paused between units, resumed,
//! reprioritized through bitset lanes, or abandoned when higher-priority
//! work arrives.
//!
//! ## Architecture
//!
//! ```text
//! Element tree → reconciler + hooks engine → flagged fiber tree → commit → Host
//!                      ↑                                             │
//!                      └──────── update queues ← dispatches ←────────┘
//! ```
//!
//! ## Modules
//!
//! - [`element`] - Intent-tree data shape (elements, props, children)
//! - [`hooks`] - Stateful primitives for function components
//! - [`context`] - Provider-scoped ambient values
//! - [`lanes`] - Bitset priority lanes
//! - [`scheduler`] - Cooperative task scheduler with yield policies
//! - [`host`] - Host-tree contract and the in-memory reference host
//! - [`runtime`] - Roots, the work loop, commit, and the drive API

pub mod context;
pub mod element;
pub mod hooks;
pub mod host;
pub mod lanes;
pub mod runtime;
pub mod scheduler;

mod fiber;
mod flags;
mod reconcile;
mod update_queue;

// Re-export commonly used items
pub use context::Context;

pub use element::{
    Children, ComponentFn, Element, NodeRef, PropValue, Props, component, create_node_ref,
    handler,
};

pub use hooks::{Cleanup, Dep, Dispatch, HookCtx, TransitionStart, cleanup};

pub use host::{Host, HostOp, HostUpdate, InstanceId, MemoryHost};

pub use lanes::Lanes;

pub use runtime::{Root, Runtime, RuntimeError, RuntimeOptions};

pub use scheduler::{CallbackId, Priority, YieldPolicy};
