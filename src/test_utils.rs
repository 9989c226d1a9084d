//! In-memory backing fake and entity builders for loop tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::backing::Backing;
use crate::entity::EntityId;
use crate::entity::EntityInfo;
use crate::entity::EntityKind;
use crate::entity::MachineInfo;
use crate::entity::ServiceInfo;
use crate::entity::UnitInfo;
use crate::errors::BackingError;
use crate::snapshot::AllInfo;

pub(crate) fn svc(name: &str, exposed: bool) -> EntityInfo {
    EntityInfo::Service(ServiceInfo {
        name: name.to_string(),
        exposed,
        charm_url: String::new(),
    })
}

pub(crate) fn svc_id(name: &str) -> EntityId {
    EntityId::new(EntityKind::Service, name)
}

pub(crate) fn unit(name: &str, service: &str) -> EntityInfo {
    EntityInfo::Unit(UnitInfo {
        name: name.to_string(),
        service: service.to_string(),
        series: String::new(),
        public_address: String::new(),
        machine_id: None,
    })
}

pub(crate) fn unit_id(name: &str) -> EntityId {
    EntityId::new(EntityKind::Unit, name)
}

pub(crate) fn machine(id: &str) -> EntityInfo {
    EntityInfo::Machine(MachineInfo {
        id: id.to_string(),
        instance_id: String::new(),
    })
}

pub(crate) fn machine_id(id: &str) -> EntityId {
    EntityId::new(EntityKind::Machine, id)
}

/// Behavioral fake of a backing store: a mutexed world plus a change
/// stream. `put`/`remove` mutate the world first and notify afterwards,
/// so a fetch triggered by the notification always sees the new state.
#[derive(Default)]
pub(crate) struct MemBacking {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: HashMap<EntityId, EntityInfo>,
    subscribers: Vec<mpsc::Sender<EntityId>>,
    load_error: Option<BackingError>,
    unwatched: bool,
}

impl MemBacking {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A backing whose initial load fails with the given error.
    pub(crate) fn failing_load(error: BackingError) -> Arc<Self> {
        let backing = Self::default();
        backing.inner.try_lock().unwrap().load_error = Some(error);
        Arc::new(backing)
    }

    /// Creates or replaces an entity and notifies every subscriber.
    pub(crate) async fn put(&self, info: EntityInfo) {
        let id = self.entity_id_for_info(&info);
        let subscribers = {
            let mut inner = self.inner.lock().await;
            inner.state.insert(id.clone(), info);
            inner.subscribers.clone()
        };
        for tx in subscribers {
            // The loop may already be gone in teardown-order tests.
            let _ = tx.send(id.clone()).await;
        }
    }

    /// Deletes an entity and notifies every subscriber.
    pub(crate) async fn remove(&self, id: EntityId) {
        let subscribers = {
            let mut inner = self.inner.lock().await;
            inner.state.remove(&id);
            inner.subscribers.clone()
        };
        for tx in subscribers {
            let _ = tx.send(id.clone()).await;
        }
    }

    /// Drops every subscription, closing the loop's change stream.
    pub(crate) async fn close_stream(&self) {
        self.inner.lock().await.subscribers.clear();
    }

    /// Blocks until a spawned loop has called `watch`. Tests mutate the
    /// world only after this point so no notification is lost.
    pub(crate) async fn wait_subscribed(&self) {
        for _ in 0..200 {
            if !self.inner.lock().await.subscribers.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("watcher loop never subscribed to the change stream");
    }

    pub(crate) async fn was_unwatched(&self) -> bool {
        self.inner.lock().await.unwatched
    }
}

#[async_trait]
impl Backing for MemBacking {
    async fn load_all(&self, all: &mut AllInfo) -> Result<(), BackingError> {
        let mut inner = self.inner.lock().await;
        if let Some(error) = inner.load_error.take() {
            return Err(error);
        }
        for info in inner.state.values() {
            all.add(self.entity_id_for_info(info), info.clone());
        }
        Ok(())
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<EntityInfo>, BackingError> {
        Ok(self.inner.lock().await.state.get(id).cloned())
    }

    async fn watch(&self, changes: mpsc::Sender<EntityId>) -> Result<(), BackingError> {
        self.inner.lock().await.subscribers.push(changes);
        Ok(())
    }

    async fn unwatch(&self) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.clear();
        inner.unwatched = true;
    }
}
