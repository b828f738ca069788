//! Placement of tenants and addresses onto brokers.
//!
//! The infra client does not decide where anything lives. It hands the
//! current broker set to a [`Scheduler`], which fills in
//! [`Placement::brokers`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::CoreError;
use crate::model::Host;
use crate::state::BrokerState;

/// Object being placed, identified by name and namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub name: String,
    pub namespace: String,
    /// Brokers assigned so far. Empty until scheduled.
    pub brokers: Vec<Host>,
}

impl Placement {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            brokers: Vec::new(),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        !self.brokers.is_empty()
    }
}

pub trait Scheduler: Send + Sync {
    fn schedule_tenant(
        &self,
        placement: &mut Placement,
        brokers: &[&BrokerState],
    ) -> Result<(), CoreError>;

    fn schedule_address(
        &self,
        placement: &mut Placement,
        brokers: &[&BrokerState],
    ) -> Result<(), CoreError>;
}

// ── DummyScheduler ───────────────────────────────────────────────────

/// Assigns one broker per placement: the one this scheduler has assigned
/// least often, ties going to the lowest hostname. Placements that
/// already have brokers are left alone.
#[derive(Debug, Default)]
pub struct DummyScheduler {
    assignments: Mutex<HashMap<String, usize>>,
}

impl DummyScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of placements assigned to `hostname` so far.
    pub fn assigned(&self, hostname: &str) -> usize {
        self.lock().get(hostname).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.assignments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn assign(&self, placement: &mut Placement, brokers: &[&BrokerState]) -> Result<(), CoreError> {
        if placement.is_scheduled() {
            return Ok(());
        }

        let mut assignments = self.lock();
        let chosen = brokers
            .iter()
            .map(|b| b.host())
            .min_by(|a, b| {
                let load_a = assignments.get(&a.hostname).copied().unwrap_or(0);
                let load_b = assignments.get(&b.hostname).copied().unwrap_or(0);
                load_a.cmp(&load_b).then_with(|| a.hostname.cmp(&b.hostname))
            })
            .ok_or(CoreError::NoBrokersAvailable)?;

        *assignments.entry(chosen.hostname.clone()).or_default() += 1;
        tracing::debug!(
            name = %placement.name,
            namespace = %placement.namespace,
            broker = %chosen,
            "Scheduled placement"
        );
        placement.brokers.push(chosen.clone());
        Ok(())
    }
}

impl Scheduler for DummyScheduler {
    fn schedule_tenant(
        &self,
        placement: &mut Placement,
        brokers: &[&BrokerState],
    ) -> Result<(), CoreError> {
        self.assign(placement, brokers)
    }

    fn schedule_address(
        &self,
        placement: &mut Placement,
        brokers: &[&BrokerState],
    ) -> Result<(), CoreError> {
        self.assign(placement, brokers)
    }
}
