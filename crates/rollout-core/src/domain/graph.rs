//! Device dependency graph.
//!
//! Derived once from a validated protocol and never recomputed. Connections form a
//! forest: every device has at most one parent, and the roots which are masters are
//! the only devices that can be deployed. Everything below a root (connected devices
//! and chained masters alike) is relayed through that root.

use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::{DeviceDescriptor, RoleName, StudyProtocolSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGraph {
    devices: BTreeMap<RoleName, DeviceDescriptor>,
    /// child -> the master it is connected to
    parents: BTreeMap<RoleName, RoleName>,
    children: BTreeMap<RoleName, BTreeSet<RoleName>>,
    deployable: BTreeSet<RoleName>,
}

impl DeviceGraph {
    /// Build the graph for a protocol which passed [`StudyProtocolSnapshot::validate`].
    #[must_use]
    pub fn from_protocol(protocol: &StudyProtocolSnapshot) -> Self {
        let devices: BTreeMap<RoleName, DeviceDescriptor> = protocol
            .devices
            .iter()
            .map(|d| (d.role_name.clone(), d.clone()))
            .collect();

        let mut parents = BTreeMap::new();
        let mut children: BTreeMap<RoleName, BTreeSet<RoleName>> = BTreeMap::new();
        for connection in &protocol.connections {
            parents.insert(connection.role_name.clone(), connection.connected_to.clone());
            children
                .entry(connection.connected_to.clone())
                .or_default()
                .insert(connection.role_name.clone());
        }

        let deployable = devices
            .values()
            .filter(|d| d.is_master() && !parents.contains_key(&d.role_name))
            .map(|d| d.role_name.clone())
            .collect();

        Self {
            devices,
            parents,
            children,
            deployable,
        }
    }

    /// All devices in the protocol, ordered by role name.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.values()
    }

    #[must_use]
    pub fn device(&self, role: &RoleName) -> Option<&DeviceDescriptor> {
        self.devices.get(role)
    }

    #[must_use]
    pub fn contains(&self, role: &RoleName) -> bool {
        self.devices.contains_key(role)
    }

    #[must_use]
    pub fn is_master(&self, role: &RoleName) -> bool {
        self.devices.get(role).is_some_and(DeviceDescriptor::is_master)
    }

    /// Whether `role` is a master which is not itself connected to another master.
    #[must_use]
    pub fn can_be_deployed(&self, role: &RoleName) -> bool {
        self.deployable.contains(role)
    }

    /// Deployable master devices, ordered by role name.
    pub fn deployable_masters(&self) -> impl Iterator<Item = &RoleName> {
        self.deployable.iter()
    }

    /// Whether `role` is a deployable master which is not optional.
    #[must_use]
    pub fn requires_deployment(&self, role: &RoleName) -> bool {
        self.can_be_deployed(role) && self.devices.get(role).is_some_and(|d| !d.is_optional)
    }

    /// Every device relayed through `master`, chained masters and their own
    /// connected devices included. Excludes `master` itself.
    #[must_use]
    pub fn connected_devices_of(&self, master: &RoleName) -> BTreeSet<RoleName> {
        let mut subtree = BTreeSet::new();
        let mut pending: Vec<&RoleName> = vec![master];
        while let Some(current) = pending.pop() {
            for child in self.children.get(current).into_iter().flatten() {
                if subtree.insert(child.clone()) {
                    pending.push(child);
                }
            }
        }
        subtree
    }

    /// The deployable master whose deployment includes `role`; `role` itself when it
    /// is deployable.
    #[must_use]
    pub fn deployment_root(&self, role: &RoleName) -> Option<&RoleName> {
        let mut current = self.devices.get_key_value(role)?.0;
        // Bounded by the device count; validated protocols contain no cycles.
        for _ in 0..self.devices.len() {
            match self.parents.get(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        self.deployable.get(current)
    }
}
