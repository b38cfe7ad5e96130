//! Relation snapshot model.
//!
//! The host framework owns the relation-data transport. Each handler
//! invocation receives a [`RelationSnapshot`]: the local unit's writable data
//! bag plus read-only copies of every joined remote unit's bag. Writes to
//! `local` are handed back to the host once the handler returns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flat string key/value document published by a single unit.
pub type RelationData = BTreeMap<String, String>;

/// Unit identity, e.g. `kubernetes-worker/3`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the application the unit belongs to (the part before `/`).
    pub fn application_name(&self) -> &str {
        self.0.split_once('/').map(|(app, _)| app).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for UnitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A joined remote unit and the data it published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUnit {
    pub name: UnitName,
    #[serde(default)]
    pub data: RelationData,
}

/// Point-in-time view of one relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationSnapshot {
    pub relation_id: u64,
    /// Data published by the local unit.
    #[serde(default)]
    pub local: RelationData,
    /// Joined remote units, in join order.
    #[serde(default)]
    pub remote: Vec<RemoteUnit>,
    /// Units that departed since the previous evaluation.
    #[serde(default)]
    pub departed: Vec<UnitName>,
}

impl RelationSnapshot {
    pub fn new(relation_id: u64) -> Self {
        Self {
            relation_id,
            ..Default::default()
        }
    }

    /// Add (or replace) a joined remote unit, keeping join order.
    pub fn with_remote(mut self, name: impl Into<UnitName>, data: RelationData) -> Self {
        self.upsert_remote(name.into(), data);
        self
    }

    pub fn upsert_remote(&mut self, name: UnitName, data: RelationData) {
        match self.remote.iter_mut().find(|u| u.name == name) {
            Some(unit) => unit.data = data,
            None => self.remote.push(RemoteUnit { name, data }),
        }
    }

    /// Remove a remote unit and record it as departed.
    pub fn depart(&mut self, name: &UnitName) -> bool {
        let before = self.remote.len();
        self.remote.retain(|u| &u.name != name);
        let removed = self.remote.len() != before;
        if removed && !self.departed.contains(name) {
            self.departed.push(name.clone());
        }
        removed
    }

    pub fn remote_unit(&self, name: &UnitName) -> Option<&RemoteUnit> {
        self.remote.iter().find(|u| &u.name == name)
    }

    pub fn first_remote(&self) -> Option<&RemoteUnit> {
        self.remote.first()
    }

    pub fn is_joined(&self, name: &UnitName) -> bool {
        self.remote_unit(name).is_some()
    }
}

/// Every relation currently established on one endpoint.
///
/// A provider is related to each requiring application separately; a
/// requester only ever expects one relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    #[serde(default)]
    pub relations: Vec<RelationSnapshot>,
}

impl EndpointSnapshot {
    pub fn new(relations: Vec<RelationSnapshot>) -> Self {
        Self { relations }
    }

    pub fn relation(&self, relation_id: u64) -> Option<&RelationSnapshot> {
        self.relations.iter().find(|r| r.relation_id == relation_id)
    }

    pub fn relation_mut(&mut self, relation_id: u64) -> Option<&mut RelationSnapshot> {
        self.relations.iter_mut().find(|r| r.relation_id == relation_id)
    }

    /// The relation a requester talks over.
    pub fn primary(&self) -> Option<&RelationSnapshot> {
        self.relations.first()
    }

    pub fn primary_mut(&mut self) -> Option<&mut RelationSnapshot> {
        self.relations.first_mut()
    }

    /// Joined remote units across all relations, with their relation id.
    pub fn joined_units(&self) -> impl Iterator<Item = (u64, &RemoteUnit)> {
        self.relations
            .iter()
            .flat_map(|r| r.remote.iter().map(move |u| (r.relation_id, u)))
    }

    pub fn has_departed(&self) -> bool {
        self.relations.iter().any(|r| !r.departed.is_empty())
    }
}
