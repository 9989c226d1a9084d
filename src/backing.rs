//! Contract the external source of truth must satisfy.
//!
//! The watcher loop is the only caller. It subscribes to the change
//! stream before the initial load, so implementations may deliver
//! duplicate notifications during startup; the loop's change handling is
//! idempotent with respect to both updates and removals.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use crate::entity::EntityId;
use crate::entity::EntityInfo;
use crate::errors::BackingError;
use crate::snapshot::AllInfo;

/// Access to the underlying store.
///
/// # Thread Safety Requirements
///
/// Implementations are shared with the spawned loop task and MUST be
/// thread-safe. The loop never issues overlapping calls, but `watch`
/// implementations typically deliver notifications from their own tasks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Backing: Send + Sync + 'static {
    /// Maps a payload back to its entity id.
    ///
    /// The default uses the payload's natural key; stores whose documents
    /// are keyed differently override this.
    fn entity_id_for_info(&self, info: &EntityInfo) -> EntityId {
        info.entity_id()
    }

    /// Populates the empty snapshot with the full current world.
    /// Called once, at loop startup.
    async fn load_all(&self, all: &mut AllInfo) -> Result<(), BackingError>;

    /// Current state of a single entity. `Ok(None)` means the entity no
    /// longer exists; any `Err` is fatal to the loop.
    async fn fetch(&self, id: &EntityId) -> Result<Option<EntityInfo>, BackingError>;

    /// Begins streaming change notifications onto `changes`. Duplicates
    /// are permitted; drops are not. Ordering across different ids is
    /// arbitrary.
    async fn watch(&self, changes: mpsc::Sender<EntityId>) -> Result<(), BackingError>;

    /// Detaches the change stream. Called once on loop teardown; the
    /// store is free to reject further operations afterwards.
    async fn unwatch(&self);
}
