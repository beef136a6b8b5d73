//! Core traits for persisted record types
//!
//! These traits define what a type needs to be stored locally, observed
//! through the change feed, and reconciled against a remote listing.

mod model;

pub use model::{Model, RemoteModel};
