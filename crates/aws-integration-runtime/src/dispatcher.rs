//! Dispatcher: maps relation events to actions and keeps the flag set.

use tracing::{debug, info, warn};

use aws_integration_core::{EndpointSnapshot, Error, InterfaceConfig, Result};
use aws_integration_protocol::{AwsProvides, AwsRequires, MetadataSource, Requester};
use aws_integration_store::KeyValueStore;

use crate::types::*;

/// Per-endpoint dispatcher for one side of the relation.
///
/// [`Dispatcher::plan`] only reads the snapshot (and, on the provider side,
/// the acknowledgement store). [`Dispatcher::apply`] performs the resulting
/// actions: flag updates on the dispatcher, identity publishing and
/// acknowledgement cleanup on the snapshot and store. Side effects are
/// planned ahead of the flags they justify, so a failing action leaves
/// those flags untouched.
pub struct Dispatcher<'a> {
    config: &'a InterfaceConfig,
    store: &'a dyn KeyValueStore,
    role: Role,
    metadata: Option<&'a dyn MetadataSource>,
    flags: FlagSet,
}

impl<'a> Dispatcher<'a> {
    pub fn requirer(
        config: &'a InterfaceConfig,
        store: &'a dyn KeyValueStore,
        metadata: &'a dyn MetadataSource,
    ) -> Self {
        Self {
            config,
            store,
            role: Role::Requirer,
            metadata: Some(metadata),
            flags: FlagSet::default(),
        }
    }

    pub fn provider(config: &'a InterfaceConfig, store: &'a dyn KeyValueStore) -> Self {
        Self {
            config,
            store,
            role: Role::Provider,
            metadata: None,
            flags: FlagSet::default(),
        }
    }

    /// Resume with the flags the host persisted from a previous invocation.
    pub fn with_flags(mut self, flags: FlagSet) -> Self {
        self.flags = flags;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn flags(&self) -> &FlagSet {
        &self.flags
    }

    pub fn is_set(&self, flag: Flag) -> bool {
        self.flags.contains(flag)
    }

    /// Raised flags as the host names them, e.g. `endpoint.aws.ready`.
    pub fn flag_names(&self) -> Vec<String> {
        self.flags
            .iter()
            .map(|f| self.config.expand_name(f.name()))
            .collect()
    }

    /// Compute the actions `event` calls for, without performing them.
    pub fn plan(&self, event: RelationEvent, endpoint: &EndpointSnapshot) -> Result<Vec<Action>> {
        match self.role {
            Role::Requirer => self.plan_requirer(event, endpoint),
            Role::Provider => self.plan_provider(event, endpoint),
        }
    }

    fn plan_requirer(&self, event: RelationEvent, endpoint: &EndpointSnapshot) -> Result<Vec<Action>> {
        let requires = AwsRequires::new(self.config, self.store);
        let ready = match endpoint.primary() {
            Some(relation) => requires.is_ready(relation)?,
            None => false,
        };

        let actions = match event {
            RelationEvent::Joined => vec![Action::PublishIdentity, Action::SetFlag(Flag::Joined)],
            RelationEvent::Changed | RelationEvent::Departed => {
                vec![Action::toggle(Flag::Ready, ready)]
            }
            RelationEvent::Broken if endpoint.primary().is_none() => {
                vec![Action::ClearFlag(Flag::Joined), Action::ClearFlag(Flag::Ready)]
            }
            RelationEvent::Broken => vec![Action::toggle(Flag::Ready, ready)],
        };
        Ok(actions)
    }

    fn plan_provider(&self, event: RelationEvent, endpoint: &EndpointSnapshot) -> Result<Vec<Action>> {
        let provides = AwsProvides::new(self.config, self.store);

        let actions = match event {
            RelationEvent::Joined => vec![Action::SetFlag(Flag::Joined)],
            RelationEvent::Changed => {
                vec![Action::toggle(Flag::Requested, provides.has_pending(endpoint)?)]
            }
            RelationEvent::Departed => vec![
                Action::ForgetDeparted,
                Action::toggle(Flag::Requested, provides.has_pending(endpoint)?),
            ],
            RelationEvent::Broken if endpoint.relations.is_empty() => vec![
                Action::SweepAcknowledgements,
                Action::ClearFlag(Flag::Joined),
                Action::ClearFlag(Flag::Requested),
            ],
            RelationEvent::Broken => vec![
                Action::SweepAcknowledgements,
                Action::toggle(Flag::Requested, provides.has_pending(endpoint)?),
            ],
        };
        Ok(actions)
    }

    /// Perform `actions` in order.
    pub fn apply(&mut self, actions: &[Action], endpoint: &mut EndpointSnapshot) -> Result<()> {
        for action in actions {
            match action {
                Action::SetFlag(flag) => self.set_flag(*flag),
                Action::ClearFlag(flag) => self.clear_flag(*flag),
                Action::PublishIdentity => self.publish_identity(endpoint)?,
                Action::ForgetDeparted => {
                    let provides = AwsProvides::new(self.config, self.store);
                    for relation in endpoint.relations.iter_mut() {
                        provides.forget_departed(relation)?;
                    }
                }
                Action::SweepAcknowledgements => {
                    AwsProvides::new(self.config, self.store).sweep_acknowledgements(endpoint)?;
                }
            }
        }
        Ok(())
    }

    fn set_flag(&mut self, flag: Flag) {
        if self.flags.set(flag) {
            debug!("set {}", self.config.expand_name(flag.name()));
        }
    }

    fn clear_flag(&mut self, flag: Flag) {
        if self.flags.clear(flag) {
            debug!("cleared {}", self.config.expand_name(flag.name()));
        }
    }

    /// Builder for this unit's request on the primary relation.
    ///
    /// Lowers `ready` right away: whatever is requested next has to be
    /// completed by the provider again before `ready` comes back on a later
    /// [`RelationEvent::Changed`].
    pub fn request<'e>(&mut self, endpoint: &'e mut EndpointSnapshot) -> Result<Requester<'e>> {
        if self.role != Role::Requirer {
            return Err(Error::Config(
                "only the requiring side publishes requests".into(),
            ));
        }
        let relation = endpoint.primary_mut().ok_or_else(|| {
            Error::Storage(format!("no {} relation to request on", self.config.endpoint))
        })?;
        self.clear_flag(Flag::Ready);
        Ok(AwsRequires::new(self.config, self.store).request(&mut relation.local))
    }

    fn publish_identity(&self, endpoint: &mut EndpointSnapshot) -> Result<()> {
        let metadata = self.metadata.ok_or_else(|| {
            Error::Config("identity publishing needs a metadata source".into())
        })?;
        let Some(relation) = endpoint.primary_mut() else {
            warn!("No {} relation to publish the instance identity on", self.config.endpoint);
            return Ok(());
        };
        let requires = AwsRequires::new(self.config, self.store);
        let identity = requires.resolve_identity(metadata)?;
        requires.publish_identity(&mut relation.local, &identity);
        info!(
            "Published instance {} on relation {}",
            identity.instance_id, relation.relation_id
        );
        Ok(())
    }

    /// Plan and apply `event`. Returns the actions taken.
    pub fn handle(
        &mut self,
        event: RelationEvent,
        endpoint: &mut EndpointSnapshot,
    ) -> Result<Vec<Action>> {
        let actions = self.plan(event, endpoint)?;
        debug!("{:?} on {} -> {:?}", event, self.config.endpoint, actions);
        self.apply(&actions, endpoint)?;
        Ok(actions)
    }
}
