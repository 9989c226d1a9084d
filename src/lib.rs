//! # megawatcher
//!
//! State-change fan-out engine: one in-memory snapshot of every entity in
//! a backing store, refreshed from its change stream, serving many
//! concurrent observers that each advance independently through history.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │   Backing store (yours)         │  change stream + point lookups
//! ├─────────────────────────────────┤
//! │   AllWatcher loop               │  single-writer task owning AllInfo
//! ├─────────────────────────────────┤
//! │   StateWatcher × N              │  next()/stop() per remote client
//! └─────────────────────────────────┘
//! ```
//!
//! Each observer's `next` returns the minimum delta batch since its last
//! call: intermediate updates are coalesced into the latest payload, and
//! an entity created and removed entirely between two calls is never
//! reported at all. Removed entries are garbage-collected once every
//! observer that knew them has been told they are gone.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use megawatcher::{AllWatcher, WatcherConfig};
//!
//! let backing = Arc::new(MyBacking::connect(..).await?);
//! let handle = AllWatcher::spawn(backing, WatcherConfig::load()?.validate()?);
//!
//! let mut watcher = handle.observe();
//! while let Ok(deltas) = watcher.next().await {
//!     for delta in deltas {
//!         push_to_client(delta);
//!     }
//! }
//! ```
//!
//! The snapshot is ephemeral: on a fatal backing failure the loop dies,
//! every observer surfaces the error, and the surrounding agent is
//! expected to reconnect and spawn a fresh loop.

mod backing;
pub mod config;
mod entity;
mod errors;
mod lifecycle;
mod snapshot;
mod watcher;

pub use backing::*;
pub use config::*;
pub use entity::*;
pub use errors::*;
pub use snapshot::*;
pub use watcher::*;


#[cfg(test)]
pub(crate) mod test_utils;
