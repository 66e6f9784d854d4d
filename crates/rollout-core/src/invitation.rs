//! Participant invitations.
//!
//! A deployment is created for a group of participants, each invited to use one or
//! more of the protocol's devices. Account management lives elsewhere; these types
//! only carry what the deployment needs to validate device assignments.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::RoleName;

/// How an invited participant is identified to the account service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountIdentity {
    Username { username: String },
    EmailAddress { email_address: String },
}

/// Human-readable information sent along with an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyInvitation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StudyInvitation {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// An invitation for one participant to use a set of the protocol's devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInvitation {
    pub participant_id: Uuid,
    pub assigned_role_names: BTreeSet<RoleName>,
    pub identity: AccountIdentity,
    pub invitation: StudyInvitation,
}

impl ParticipantInvitation {
    /// Invite a new participant, identified by username, to the given devices.
    #[must_use]
    pub fn for_username(
        username: impl Into<String>,
        assigned_role_names: impl IntoIterator<Item = RoleName>,
    ) -> Self {
        Self {
            participant_id: Uuid::new_v4(),
            assigned_role_names: assigned_role_names.into_iter().collect(),
            identity: AccountIdentity::Username {
                username: username.into(),
            },
            invitation: StudyInvitation::new("Study invitation"),
        }
    }
}

/// Device assignment of one participant, as tracked by a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStatus {
    pub participant_id: Uuid,
    pub assigned_role_names: BTreeSet<RoleName>,
}

impl From<&ParticipantInvitation> for ParticipantStatus {
    fn from(invitation: &ParticipantInvitation) -> Self {
        Self {
            participant_id: invitation.participant_id,
            assigned_role_names: invitation.assigned_role_names.clone(),
        }
    }
}
