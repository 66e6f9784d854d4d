//! Registration ledger.
//!
//! Holds the current registration of every device plus the append-only history of
//! all registrations ever accepted. The ledger decides whether a registration is
//! acceptable; the aggregate decides what that means for deployments.
//!
//! Every accepted registration and unregistration is stamped with a write time.
//! Stamps strictly increase across the whole ledger, and the latest stamp of each
//! device is kept so deployment freshness can see unregistrations too.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use super::graph::DeviceGraph;
use crate::{
    error::{DeploymentError, Result},
    invariant,
    protocol::{DeviceRegistration, RegistrationEntry, RoleName},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationLedger {
    registered: BTreeMap<RoleName, RegistrationEntry>,
    history: BTreeMap<RoleName, Vec<RegistrationEntry>>,
    /// Stamp of the latest registration or unregistration of each device
    changed_on: BTreeMap<RoleName, DateTime<Utc>>,
    last_write: Option<DateTime<Utc>>,
}

impl RegistrationLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from stored state. Consistency is checked by the caller.
    ///
    /// Devices missing from `changed_on` fall back to their latest history entry.
    #[must_use]
    pub fn from_parts(
        registered: BTreeMap<RoleName, RegistrationEntry>,
        history: BTreeMap<RoleName, Vec<RegistrationEntry>>,
        mut changed_on: BTreeMap<RoleName, DateTime<Utc>>,
    ) -> Self {
        for (role, entries) in &history {
            if let Some(last) = entries.last() {
                let stamp = changed_on.entry(role.clone()).or_insert(last.registered_on);
                *stamp = (*stamp).max(last.registered_on);
            }
        }
        let last_write = changed_on.values().max().copied();
        Self {
            registered,
            history,
            changed_on,
            last_write,
        }
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Store `registration` for `device` and return the write timestamp.
    ///
    /// Write timestamps strictly increase, so a registration written at the same
    /// instant as the previous one is stamped one microsecond later.
    ///
    /// # Errors
    ///
    /// - `UnknownDevice` if the device is not part of the protocol
    /// - `AlreadyRegistered` if the device holds a registration
    /// - `RegistrationMismatch` if the registration shape is not the one the device expects
    /// - `DeviceIdInUse` if a device of the same type is registered with the same id
    pub fn register(
        &mut self,
        graph: &DeviceGraph,
        device: &RoleName,
        registration: DeviceRegistration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let descriptor = graph
            .device(device)
            .ok_or_else(|| DeploymentError::UnknownDevice(device.clone()))?;

        invariant!(
            !self.registered.contains_key(device),
            DeploymentError::AlreadyRegistered(device.clone())
        );

        if let Some(expected) = descriptor.device_type.expected_registration() {
            invariant!(
                registration.kind() == expected,
                DeploymentError::RegistrationMismatch {
                    role: device.clone(),
                    expected,
                    actual: registration.kind(),
                }
            );
        }

        let collision = self.registered.iter().find(|(other, entry)| {
            entry.registration.device_id == registration.device_id
                && graph
                    .device(other)
                    .is_some_and(|d| d.device_type == descriptor.device_type)
        });
        if let Some((other, _)) = collision {
            return Err(DeploymentError::DeviceIdInUse {
                device_id: registration.device_id,
                registered_to: other.clone(),
            });
        }

        let registered_on = self.stamp(device, now);
        let entry = RegistrationEntry {
            registration,
            registered_on,
        };
        self.history
            .entry(device.clone())
            .or_default()
            .push(entry.clone());
        self.registered.insert(device.clone(), entry);

        Ok(registered_on)
    }

    /// Clear the current registration of `device` and return the write timestamp.
    /// History is kept.
    ///
    /// # Errors
    ///
    /// - `UnknownDevice` if the device is not part of the protocol
    /// - `NotRegistered` if the device holds no registration
    pub fn unregister(
        &mut self,
        graph: &DeviceGraph,
        device: &RoleName,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        invariant!(
            graph.contains(device),
            DeploymentError::UnknownDevice(device.clone())
        );
        self.registered
            .remove(device)
            .ok_or_else(|| DeploymentError::NotRegistered(device.clone()))?;
        Ok(self.stamp(device, now))
    }

    /// Record a change of `device` at `now`, moved past the previous write if needed.
    fn stamp(&mut self, device: &RoleName, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.last_write {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        self.changed_on.insert(device.clone(), stamp);
        self.last_write = Some(stamp);
        stamp
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    #[must_use]
    pub fn registration(&self, device: &RoleName) -> Option<&RegistrationEntry> {
        self.registered.get(device)
    }

    #[must_use]
    pub fn is_registered(&self, device: &RoleName) -> bool {
        self.registered.contains_key(device)
    }

    #[must_use]
    pub const fn registered(&self) -> &BTreeMap<RoleName, RegistrationEntry> {
        &self.registered
    }

    #[must_use]
    pub const fn history(&self) -> &BTreeMap<RoleName, Vec<RegistrationEntry>> {
        &self.history
    }

    /// Stamp of the latest registration or unregistration of `device`.
    #[must_use]
    pub fn changed_on(&self, device: &RoleName) -> Option<DateTime<Utc>> {
        self.changed_on.get(device).copied()
    }

    #[must_use]
    pub const fn changes(&self) -> &BTreeMap<RoleName, DateTime<Utc>> {
        &self.changed_on
    }

    /// Every registration ever written for `device`, oldest first.
    #[must_use]
    pub fn history_of(&self, device: &RoleName) -> &[RegistrationEntry] {
        self.history.get(device).map_or(&[][..], Vec::as_slice)
    }
}
