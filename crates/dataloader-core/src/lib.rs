//! Dataloader Core - Types shared between a batching loader and its instrumentation
//!
//! This crate provides the values a loader engine hands to observers:
//! - Deferred results (`Thunk`, `ThunkMany`)
//! - Per-key results (`LoadResult`)
//! - Error types
//! - Marker traits for keys and values

pub mod error;
pub mod thunk;

use std::fmt::Debug;
use std::hash::Hash;

pub use error::{LoadError, Result};
pub use thunk::{Deferred, Resolver, Thunk, ThunkMany};

/// Result of loading a single key
pub type LoadResult<V> = std::result::Result<V, LoadError>;

/// A key a loader can batch and deduplicate on
pub trait Key: Debug + Clone + Eq + Hash + Send + Sync + 'static {}

impl<T> Key for T where T: Debug + Clone + Eq + Hash + Send + Sync + 'static {}

/// A value produced for a key
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}
