//! Entity identities, payloads and the delta wire shape.
//!
//! The fan-out engine never interprets payload fields. It compares whole
//! payloads for equality to suppress no-op updates, and ships them to
//! observers verbatim.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Collection tag of an entity. The id space is disjoint across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Machine,
    Unit,
    Service,
    Relation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Machine => "machine",
            EntityKind::Unit => "unit",
            EntityKind::Service => "service",
            EntityKind::Relation => "relation",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an entity: collection tag plus opaque key.
///
/// Equality is structural. This is the shape carried on the backing
/// store's change stream and the key of the snapshot's id map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub kind: EntityKind,
    pub key: String,
}

impl EntityId {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id: String,
    #[serde(default)]
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub service: String,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub public_address: String,
    #[serde(default)]
    pub machine_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub charm_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInfo {
    pub key: String,
}

/// Payload of one entity, tagged by its collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityInfo {
    Machine(MachineInfo),
    Unit(UnitInfo),
    Service(ServiceInfo),
    Relation(RelationInfo),
}

impl EntityInfo {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityInfo::Machine(_) => EntityKind::Machine,
            EntityInfo::Unit(_) => EntityKind::Unit,
            EntityInfo::Service(_) => EntityKind::Service,
            EntityInfo::Relation(_) => EntityKind::Relation,
        }
    }

    /// Natural identity of the payload. Backing stores whose documents
    /// carry a different key override `Backing::entity_id_for_info`.
    pub fn entity_id(&self) -> EntityId {
        let key = match self {
            EntityInfo::Machine(m) => m.id.clone(),
            EntityInfo::Unit(u) => u.name.clone(),
            EntityInfo::Service(s) => s.name.clone(),
            EntityInfo::Relation(r) => r.key.clone(),
        };
        EntityId {
            kind: self.kind(),
            key,
        }
    }
}

/// One change record shipped to an observer.
///
/// When `removed` is true the payload is the last state the observer was
/// shown for that entity; its fields are otherwise meaningless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub removed: bool,
    pub entity: EntityInfo,
}

impl Delta {
    pub fn changed(entity: EntityInfo) -> Self {
        Self {
            removed: false,
            entity,
        }
    }

    pub fn removed(entity: EntityInfo) -> Self {
        Self {
            removed: true,
            entity,
        }
    }
}
