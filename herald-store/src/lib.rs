//! Persistence for campaigns and their messages.
//!
//! The dispatch engine only talks to the [`Store`] trait. Every status change
//! goes through a compare-and-swap on the current status and every aggregate
//! counter through [`Store::increment`], so the dispatch loop and the delivery
//! reconciler can share rows without lost updates.

pub mod backends;
pub mod error;
pub mod r#trait;

pub use backends::MemoryStore;
pub use error::{Result, StoreError};
pub use r#trait::Store;
