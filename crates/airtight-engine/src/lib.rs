#![forbid(unsafe_code)]

//! Immutability enforcement over a managed host object graph.
//!
//! - [`graph_freezer`] deep-freezes everything reachable from a root.
//! - [`mutation_guard`] wraps live objects in write-rejecting handles.
//! - [`protection_policy`] applies both to a fixed set of named host roots,
//!   leaving network request interfaces untouched.

pub mod graph_freezer;
pub mod mutation_guard;
pub mod object_model;
pub mod protection_event;
pub mod protection_policy;
