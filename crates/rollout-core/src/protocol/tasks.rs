//! Tasks, triggers and task controls.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::RoleName;

/// Type of data collected in a data stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataType {
    pub namespace: String,
    pub name: String,
}

impl DataType {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Recorded on a trigger's source device each time it starts or stops a task.
    #[must_use]
    pub fn triggered_task() -> Self {
        Self::new("rollout", "triggeredtask")
    }

    /// Recorded on the device that ran a task once it completes.
    #[must_use]
    pub fn completed_task() -> Self {
        Self::new("rollout", "completedtask")
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Something a task measures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Measure {
    DataStream { data_type: DataType },
    TriggerData { trigger_id: TriggerId },
}

/// A unit of work a device can run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique name of the task within the protocol
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub measures: Vec<Measure>,
}

impl TaskDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, measures: Vec<Measure>) -> Self {
        Self {
            name: name.into(),
            description: None,
            measures,
        }
    }
}

/// Identifier of a trigger within a protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TriggerId(pub u32);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Fires once the given time has passed since the start of the study.
    ElapsedTime { elapsed_seconds: u64 },
    /// Fires when the participant initiates it.
    Manual {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Fires every day at the given time.
    ScheduledDaily { hour: u8, minute: u8 },
}

/// A condition evaluated on a source device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    pub source_device_role_name: RoleName,
    pub condition: TriggerCondition,
}

impl Trigger {
    /// Fires on `source` as soon as the study starts.
    #[must_use]
    pub const fn at_start_of_study(source: RoleName) -> Self {
        Self {
            source_device_role_name: source,
            condition: TriggerCondition::ElapsedTime { elapsed_seconds: 0 },
        }
    }
}

/// What a task control does to its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Control {
    Start,
    Stop,
}

/// Starts or stops a task on a destination device when a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskControl {
    pub trigger_id: TriggerId,
    pub task_name: String,
    pub destination_device_role_name: RoleName,
    pub control: Control,
}

impl TaskControl {
    #[must_use]
    pub fn start(trigger_id: TriggerId, task_name: impl Into<String>, destination: RoleName) -> Self {
        Self {
            trigger_id,
            task_name: task_name.into(),
            destination_device_role_name: destination,
            control: Control::Start,
        }
    }

    #[must_use]
    pub fn stop(trigger_id: TriggerId, task_name: impl Into<String>, destination: RoleName) -> Self {
        Self {
            control: Control::Stop,
            ..Self::start(trigger_id, task_name, destination)
        }
    }
}
