#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Data model shared between the persistence engine and whatever process hosts it.
//!
//! Nothing in this crate talks to a storage backend or a scheduler; it only
//! describes the values that flow between them so that `persist-engine` and a
//! host binary can agree on types without depending on each other's internals.

mod model;

pub use model::{Model, PreparedRequest, RuntimeConfig, StorageItem};
