//! Lifecycle scenarios for the study deployment aggregate.
//!
//! Covers registration, deployment confirmation, invalidation, start and stop
//! through the public API only.

#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rollout_core::{
    domain::DeploymentEvent,
    protocol::{
        DeviceDescriptor, DeviceRegistration, DeviceType, MacAddress, RoleName,
        StudyProtocolSnapshot, TaskControl, TaskDescriptor, Trigger,
    },
    Clock, DeploymentError, DeploymentPhase, DeviceState, ManualClock, StudyDeployment,
};

// ═══════════════════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

fn role(name: &str) -> RoleName {
    RoleName::parse(name).expect("valid role name")
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
    ))
}

fn deployment_of(protocol: StudyProtocolSnapshot, clock: &Arc<ManualClock>) -> StudyDeployment {
    StudyDeployment::from_invitations(protocol, &[], clock.clone()).expect("valid deployment")
}

/// A required master `M` and an optional master `O`.
fn required_and_optional() -> StudyProtocolSnapshot {
    let mut protocol = StudyProtocolSnapshot::new("M and O", Utc::now());
    protocol.add_master_device(DeviceDescriptor::master(role("M"), DeviceType::Smartphone));
    protocol.add_master_device(DeviceDescriptor::master(role("O"), DeviceType::Smartphone).optional());
    protocol
}

/// A phone relaying a heart rate monitor and a chained tablet with its own sensor.
fn phone_with_sensors() -> StudyProtocolSnapshot {
    let mut protocol = StudyProtocolSnapshot::new("Phone with sensors", Utc::now());
    protocol.add_master_device(DeviceDescriptor::master(role("Phone"), DeviceType::Smartphone));
    protocol.add_connected_device(
        DeviceDescriptor::connected(role("Monitor"), DeviceType::HeartRateMonitor),
        &role("Phone"),
    );
    protocol.add_connected_device(
        DeviceDescriptor::master(role("Tablet"), DeviceType::Generic),
        &role("Phone"),
    );
    protocol.add_connected_device(
        DeviceDescriptor::connected(role("Tablet sensor"), DeviceType::Generic).optional(),
        &role("Tablet"),
    );
    let trigger = protocol
        .add_trigger(Trigger::at_start_of_study(role("Phone")))
        .expect("trigger id available");
    protocol.add_task_control(
        TaskControl::start(trigger, "Measure heart rate", role("Monitor")),
        TaskDescriptor::new("Measure heart rate", Vec::new()),
    );
    protocol
}

fn monitor_registration() -> DeviceRegistration {
    DeviceRegistration::for_mac_address(MacAddress::parse("00-11-22-33-44-55").expect("valid mac"))
}

fn register_all_phone_devices(deployment: &mut StudyDeployment) {
    deployment
        .register_device(&role("Phone"), DeviceRegistration::new("phone"))
        .expect("registers phone");
    deployment
        .register_device(&role("Monitor"), monitor_registration())
        .expect("registers monitor");
    deployment
        .register_device(&role("Tablet"), DeviceRegistration::new("tablet"))
        .expect("registers tablet");
}

fn deploy(deployment: &mut StudyDeployment, device: &RoleName) {
    let unit = deployment
        .device_deployment_for(device)
        .expect("deployment available");
    deployment
        .device_deployed(device, unit.last_updated_on)
        .expect("deployment confirmed");
}

fn event_types(deployment: &mut StudyDeployment) -> Vec<&'static str> {
    deployment
        .consume_events()
        .iter()
        .map(DeploymentEvent::event_type)
        .collect()
}

fn state_of(deployment: &StudyDeployment, device: &str) -> DeviceState {
    deployment
        .status()
        .device_status(&role(device))
        .expect("known device")
        .state
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn all_devices_start_unregistered() {
    let deployment = deployment_of(phone_with_sensors(), &clock());
    let status = deployment.status();

    assert_eq!(status.phase, DeploymentPhase::Invited);
    assert_eq!(status.devices.len(), 4);
    assert!(status
        .devices
        .iter()
        .all(|s| s.state == DeviceState::Unregistered));
}

#[test]
fn registering_a_device_reports_it_registered() {
    let clock = clock();
    let mut deployment = deployment_of(phone_with_sensors(), &clock);

    deployment
        .register_device(&role("Monitor"), monitor_registration())
        .expect("registers");

    assert!(matches!(
        state_of(&deployment, "Monitor"),
        DeviceState::Registered { .. }
    ));
    assert_eq!(deployment.status().phase, DeploymentPhase::DeployingDevices);
    assert_eq!(event_types(&mut deployment), vec!["device_registered"]);
}

#[test]
fn registration_history_keeps_previous_registrations() {
    let clock = clock();
    let mut deployment = deployment_of(required_and_optional(), &clock);

    deployment
        .register_device(&role("M"), DeviceRegistration::new("first"))
        .expect("registers");
    deployment.unregister_device(&role("M")).expect("unregisters");
    deployment
        .register_device(&role("M"), DeviceRegistration::new("second"))
        .expect("registers");

    let history = &deployment.registration_history()[&role("M")];
    let ids: Vec<_> = history
        .iter()
        .map(|e| e.registration.device_id.as_str())
        .collect();
    assert_eq!(ids, vec!["first", "second"]);
    assert_eq!(
        deployment.registered_devices()[&role("M")].registration.device_id,
        "second"
    );
}

#[test]
fn unknown_device_queries_are_invalid_arguments() {
    let clock = clock();
    let mut deployment = deployment_of(required_and_optional(), &clock);

    let register = deployment.register_device(&role("X"), DeviceRegistration::new("x"));
    let compose = deployment.device_deployment_for(&role("X"));
    let deployed = deployment.device_deployed(&role("X"), clock.now());

    for error in [register.err(), compose.err(), deployed.err()] {
        let error = error.expect("operation fails");
        assert_eq!(error, DeploymentError::UnknownDevice(role("X")));
        assert!(error.is_invalid_argument());
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DEPLOYMENT
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn deployment_requires_required_connected_devices() {
    let clock = clock();
    let mut deployment = deployment_of(phone_with_sensors(), &clock);
    deployment
        .register_device(&role("Phone"), DeviceRegistration::new("phone"))
        .expect("registers");

    let result = deployment.device_deployment_for(&role("Phone"));

    assert!(result.is_err_and(|e| e.is_illegal_state()));
    assert_eq!(
        state_of(&deployment, "Phone"),
        DeviceState::Registered {
            can_obtain_deployment: false
        }
    );
}

#[test]
fn unit_includes_relayed_devices_and_their_tasks() {
    let clock = clock();
    let mut deployment = deployment_of(phone_with_sensors(), &clock);
    register_all_phone_devices(&mut deployment);

    let unit = deployment
        .device_deployment_for(&role("Phone"))
        .expect("deployment available");

    let connected: Vec<_> = unit
        .connected_devices
        .iter()
        .map(|d| d.role_name.as_str())
        .collect();
    assert_eq!(connected, vec!["Monitor", "Tablet", "Tablet sensor"]);
    assert!(!unit
        .connected_device_registrations
        .contains_key(&role("Tablet sensor")));
    assert_eq!(unit.tasks.len(), 1);
    assert_eq!(unit.task_controls.len(), 1);
    assert_eq!(
        unit.last_updated_on,
        deployment.registered_devices()[&role("Tablet")].registered_on
    );
}

#[test]
fn chained_masters_cannot_be_deployed() {
    let clock = clock();
    let mut deployment = deployment_of(phone_with_sensors(), &clock);
    register_all_phone_devices(&mut deployment);

    let status = deployment.status();
    let tablet = status.device_status(&role("Tablet")).expect("known device");
    assert!(!tablet.can_be_deployed);

    let compose = deployment.device_deployment_for(&role("Tablet"));
    assert!(compose.is_err_and(|e| e.is_illegal_state()));

    let confirm = deployment.device_deployed(&role("Tablet"), clock.now());
    assert!(confirm.is_err_and(|e| e.is_illegal_state()));
}

#[test]
fn confirming_twice_emits_one_event() {
    let clock = clock();
    let mut deployment = deployment_of(required_and_optional(), &clock);
    deployment
        .register_device(&role("M"), DeviceRegistration::new("m"))
        .expect("registers");
    deployment.consume_events();

    let token = deployment
        .device_deployment_for(&role("M"))
        .expect("deployment available")
        .last_updated_on;
    deployment
        .device_deployed(&role("M"), token)
        .expect("confirms");
    deployment
        .device_deployed(&role("M"), token)
        .expect("confirming again is a no-op");

    assert_eq!(event_types(&mut deployment), vec!["device_deployed", "started"]);
}

#[test]
fn outdated_token_is_rejected_as_invalid_argument() {
    let clock = clock();
    let mut deployment = deployment_of(phone_with_sensors(), &clock);
    register_all_phone_devices(&mut deployment);
    let outdated = deployment
        .device_deployment_for(&role("Phone"))
        .expect("deployment available")
        .last_updated_on;

    clock.advance(Duration::minutes(1));
    deployment
        .register_device(&role("Tablet sensor"), DeviceRegistration::new("sensor"))
        .expect("registers");

    let result = deployment.device_deployed(&role("Phone"), outdated);
    assert!(matches!(result, Err(DeploymentError::StaleDeployment { .. })));
    assert!(deployment.deployed_devices().is_empty());

    deploy(&mut deployment, &role("Phone"));
    assert!(deployment.deployed_devices().contains(&role("Phone")));
}

#[test]
fn new_registration_does_not_invalidate() {
    let clock = clock();
    let mut deployment = deployment_of(phone_with_sensors(), &clock);
    register_all_phone_devices(&mut deployment);
    deploy(&mut deployment, &role("Phone"));
    deployment.consume_events();

    deployment
        .register_device(&role("Tablet sensor"), DeviceRegistration::new("sensor"))
        .expect("registers");

    assert_eq!(state_of(&deployment, "Phone"), DeviceState::Deployed);
    assert_eq!(event_types(&mut deployment), vec!["device_registered"]);
}

// ═══════════════════════════════════════════════════════════════════════════
// INVALIDATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn unregistering_a_dependency_invalidates_the_master_once() {
    for dependency in ["Phone", "Monitor", "Tablet"] {
        let clock = clock();
        let mut deployment = deployment_of(phone_with_sensors(), &clock);
        register_all_phone_devices(&mut deployment);
        deploy(&mut deployment, &role("Phone"));
        deployment.consume_events();

        deployment
            .unregister_device(&role(dependency))
            .expect("unregisters");

        assert_eq!(
            state_of(&deployment, "Phone"),
            DeviceState::NeedsRedeployment,
            "unregistering {dependency}"
        );
        assert_eq!(
            event_types(&mut deployment),
            vec!["device_unregistered", "deployment_invalidated"]
        );
    }
}

#[test]
fn unit_composed_before_an_unregistration_is_outdated() {
    // An optional sensor registered before its master, then removed after deployment
    let clock = clock();
    let mut protocol = StudyProtocolSnapshot::new("M with S", Utc::now());
    protocol.add_master_device(DeviceDescriptor::master(role("M"), DeviceType::Smartphone));
    protocol.add_connected_device(
        DeviceDescriptor::connected(role("S"), DeviceType::Generic).optional(),
        &role("M"),
    );
    let mut deployment = deployment_of(protocol, &clock);

    deployment
        .register_device(&role("S"), DeviceRegistration::new("sensor"))
        .expect("registers sensor");
    clock.advance(Duration::seconds(1));
    deployment
        .register_device(&role("M"), DeviceRegistration::new("phone"))
        .expect("registers master");
    let old_unit = deployment
        .device_deployment_for(&role("M"))
        .expect("deployment available");
    deployment
        .device_deployed(&role("M"), old_unit.last_updated_on)
        .expect("deployment confirmed");

    deployment
        .unregister_device(&role("S"))
        .expect("unregisters sensor");

    let result = deployment.device_deployed(&role("M"), old_unit.last_updated_on);
    assert!(matches!(result, Err(DeploymentError::StaleDeployment { .. })));
    assert_eq!(state_of(&deployment, "M"), DeviceState::NeedsRedeployment);

    let new_unit = deployment
        .device_deployment_for(&role("M"))
        .expect("deployment available");
    assert!(new_unit.last_updated_on > old_unit.last_updated_on);
    assert!(new_unit.connected_device_registrations.is_empty());
    deployment
        .device_deployed(&role("M"), new_unit.last_updated_on)
        .expect("fresh deployment confirmed");
    assert_eq!(state_of(&deployment, "M"), DeviceState::Deployed);
}

#[test]
fn sibling_masters_are_independent() {
    let clock = clock();
    let mut deployment = deployment_of(required_and_optional(), &clock);
    deployment
        .register_device(&role("M"), DeviceRegistration::new("m"))
        .expect("registers");
    deployment
        .register_device(&role("O"), DeviceRegistration::new("o"))
        .expect("registers");
    deploy(&mut deployment, &role("M"));
    deploy(&mut deployment, &role("O"));

    deployment.unregister_device(&role("O")).expect("unregisters");

    assert_eq!(state_of(&deployment, "M"), DeviceState::Deployed);
    assert_eq!(state_of(&deployment, "O"), DeviceState::NeedsRedeployment);
}

#[test]
fn redeploying_clears_invalidation() {
    let clock = clock();
    let mut deployment = deployment_of(phone_with_sensors(), &clock);
    register_all_phone_devices(&mut deployment);
    deploy(&mut deployment, &role("Phone"));

    deployment
        .unregister_device(&role("Monitor"))
        .expect("unregisters");
    deployment
        .register_device(&role("Monitor"), monitor_registration())
        .expect("registers");
    deploy(&mut deployment, &role("Phone"));

    assert!(deployment.invalidated_devices().is_empty());
    assert_eq!(deployment.status().phase, DeploymentPhase::Running);
}

// ═══════════════════════════════════════════════════════════════════════════
// PHASES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn only_optional_masters_run_after_one_is_deployed() {
    let mut protocol = StudyProtocolSnapshot::new("Optional only", Utc::now());
    protocol.add_master_device(DeviceDescriptor::master(role("A"), DeviceType::Generic).optional());
    protocol.add_master_device(DeviceDescriptor::master(role("B"), DeviceType::Generic).optional());
    let clock = clock();
    let mut deployment = deployment_of(protocol, &clock);

    deployment
        .register_device(&role("A"), DeviceRegistration::new("a"))
        .expect("registers");
    deploy(&mut deployment, &role("A"));

    assert_eq!(deployment.status().phase, DeploymentPhase::Running);
    assert!(deployment.started_on().is_some());
}

#[test]
fn required_masters_must_all_be_deployed() {
    let mut protocol = required_and_optional();
    protocol.add_master_device(DeviceDescriptor::master(role("N"), DeviceType::Generic));
    let clock = clock();
    let mut deployment = deployment_of(protocol, &clock);
    for (device, id) in [("M", "m"), ("N", "n"), ("O", "o")] {
        deployment
            .register_device(&role(device), DeviceRegistration::new(id))
            .expect("registers");
    }

    deploy(&mut deployment, &role("M"));
    deploy(&mut deployment, &role("O"));
    assert_eq!(deployment.status().phase, DeploymentPhase::DeployingDevices);
    assert!(deployment.started_on().is_none());

    deploy(&mut deployment, &role("N"));
    assert_eq!(deployment.status().phase, DeploymentPhase::Running);
}

#[test]
fn started_on_survives_unregistering_everything() {
    let clock = clock();
    let mut deployment = deployment_of(required_and_optional(), &clock);
    deployment
        .register_device(&role("M"), DeviceRegistration::new("m"))
        .expect("registers");
    deploy(&mut deployment, &role("M"));
    let started_on = deployment.started_on();

    clock.advance(Duration::hours(1));
    deployment.unregister_device(&role("M")).expect("unregisters");

    assert_eq!(deployment.started_on(), started_on);
    assert_eq!(deployment.status().phase, DeploymentPhase::DeployingDevices);
}

#[test]
fn required_and_optional_master_scenario() {
    let clock = clock();
    let mut deployment = deployment_of(required_and_optional(), &clock);

    deployment
        .register_device(&role("M"), DeviceRegistration::new("m"))
        .expect("registers");
    deploy(&mut deployment, &role("M"));
    assert_eq!(deployment.status().phase, DeploymentPhase::Running);
    let started_on = deployment.started_on().expect("started");

    clock.advance(Duration::minutes(5));
    deployment
        .register_device(&role("O"), DeviceRegistration::new("o"))
        .expect("registers");
    deploy(&mut deployment, &role("O"));
    assert_eq!(deployment.status().phase, DeploymentPhase::Running);
    assert_eq!(deployment.started_on(), Some(started_on));

    deployment.unregister_device(&role("M")).expect("unregisters");
    assert_eq!(state_of(&deployment, "M"), DeviceState::NeedsRedeployment);
    assert_eq!(deployment.status().phase, DeploymentPhase::DeployingDevices);
}

// ═══════════════════════════════════════════════════════════════════════════
// STOP
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn stopped_deployment_rejects_commands_but_serves_deployments() {
    let clock = clock();
    let mut deployment = deployment_of(required_and_optional(), &clock);
    deployment
        .register_device(&role("M"), DeviceRegistration::new("m"))
        .expect("registers");
    let token = deployment
        .device_deployment_for(&role("M"))
        .expect("deployment available")
        .last_updated_on;

    deployment.stop();

    assert_eq!(deployment.status().phase, DeploymentPhase::Stopped);
    assert!(deployment.device_deployment_for(&role("M")).is_ok());
    for error in [
        deployment
            .register_device(&role("O"), DeviceRegistration::new("o"))
            .err(),
        deployment.unregister_device(&role("M")).err(),
        deployment.device_deployed(&role("M"), token).err(),
    ] {
        assert_eq!(error, Some(DeploymentError::Stopped));
    }
}
