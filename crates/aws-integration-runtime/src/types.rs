//! Runtime types.

use std::collections::BTreeSet;

use serde::Serialize;

/// Which side of the relation this unit is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Charm asking for AWS features.
    Requirer,
    /// The AWS integrator.
    Provider,
}

/// Relation lifecycle event delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationEvent {
    Joined,
    Changed,
    /// Units left; the snapshot lists them in `departed`.
    Departed,
    /// A relation was removed; the snapshot no longer contains it.
    Broken,
}

/// Edge-triggered flag the host schedules handlers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    /// The relation is established.
    Joined,
    /// Requester: the provider completed the current request.
    Ready,
    /// Provider: at least one request is new or updated.
    Requested,
}

impl Flag {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Ready => "ready",
            Self::Requested => "requested",
        }
    }
}

/// Next step computed by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    SetFlag(Flag),
    ClearFlag(Flag),
    /// Requester: resolve and publish the instance identity.
    PublishIdentity,
    /// Provider: forget acknowledgements of departed units.
    ForgetDeparted,
    /// Provider: drop acknowledgements of units no longer joined anywhere.
    SweepAcknowledgements,
}

impl Action {
    pub fn toggle(flag: Flag, on: bool) -> Self {
        if on {
            Self::SetFlag(flag)
        } else {
            Self::ClearFlag(flag)
        }
    }
}

/// Flags currently raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlagSet(BTreeSet<Flag>);

impl FlagSet {
    pub fn contains(&self, flag: Flag) -> bool {
        self.0.contains(&flag)
    }

    pub fn set(&mut self, flag: Flag) -> bool {
        self.0.insert(flag)
    }

    pub fn clear(&mut self, flag: Flag) -> bool {
        self.0.remove(&flag)
    }

    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
