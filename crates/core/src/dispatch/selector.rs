use std::collections::HashMap;

use super::{
    ClientOverridePolicy, DispatchKind, DispatchPolicy, LinearPolicy, ParallelPolicy,
    PolicySettings,
};
use crate::domain::proposal::{ClientTag, WorkflowMode};
use crate::errors::DomainError;

/// Maps a proposal's workflow mode and client to exactly one policy.
///
/// Parallel workflows always use [`ParallelPolicy`]. Linear workflows use a
/// registered client override when one exists, otherwise [`LinearPolicy`].
pub struct PolicySelector {
    linear: LinearPolicy,
    parallel: ParallelPolicy,
    overrides: HashMap<ClientTag, ClientOverridePolicy>,
}

impl PolicySelector {
    /// Built-in policies plus the NCR override.
    pub fn new(settings: PolicySettings) -> Self {
        Self::without_overrides(settings).with_override(ClientOverridePolicy::ncr(settings))
    }

    pub fn without_overrides(settings: PolicySettings) -> Self {
        Self {
            linear: LinearPolicy::new(settings),
            parallel: ParallelPolicy::new(settings),
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, policy: ClientOverridePolicy) -> Self {
        self.overrides.insert(policy.client().clone(), policy);
        self
    }

    pub fn kind_for(&self, mode: WorkflowMode, client: Option<&ClientTag>) -> DispatchKind {
        match (mode, client) {
            (WorkflowMode::Parallel, _) => DispatchKind::Parallel,
            (WorkflowMode::Linear, Some(client)) if self.overrides.contains_key(client) => {
                DispatchKind::ClientOverride(client.clone())
            }
            (WorkflowMode::Linear, _) => DispatchKind::Linear,
        }
    }

    /// Resolves raw stored values; an unrecognized mode is an error, never a default.
    pub fn kind_for_raw(
        &self,
        mode: &str,
        client: Option<&str>,
    ) -> Result<DispatchKind, DomainError> {
        let mode: WorkflowMode = mode.parse()?;
        let client = client.map(ClientTag::new);
        Ok(self.kind_for(mode, client.as_ref()))
    }

    pub fn policy(&self, kind: &DispatchKind) -> Result<&dyn DispatchPolicy, DomainError> {
        match kind {
            DispatchKind::Linear => Ok(&self.linear),
            DispatchKind::Parallel => Ok(&self.parallel),
            DispatchKind::ClientOverride(client) => self
                .overrides
                .get(client)
                .map(|policy| policy as &dyn DispatchPolicy)
                .ok_or_else(|| {
                    DomainError::InvariantViolation(format!(
                        "no dispatch override is registered for client `{client}`"
                    ))
                }),
        }
    }

    pub fn select(
        &self,
        mode: WorkflowMode,
        client: Option<&ClientTag>,
    ) -> Result<&dyn DispatchPolicy, DomainError> {
        self.policy(&self.kind_for(mode, client))
    }
}

impl Default for PolicySelector {
    fn default() -> Self {
        Self::new(PolicySettings::default())
    }
}
