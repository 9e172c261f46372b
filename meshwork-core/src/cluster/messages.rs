//! Wire protocol messages exchanged between nodes

use bytes::Bytes;
use std::collections::BTreeMap;

use super::node_state::NodeState;
use super::view::ClusterView;
use crate::error::MeshworkError;

/// Every message a node sends or accepts. Encoded with an explicit
/// discriminator byte, see [`codec`](super::codec).
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterMessage {
    JoinRequest {
        state: NodeState,
        auth_token: String,
    },
    JoinResponse {
        view: ClusterView,
    },
    Gossip {
        view: ClusterView,
    },
    GetViewRequest,
    GetViewResponse {
        view: ClusterView,
        in_quorum: bool,
        leader_address: Option<String>,
    },
    LeaveRequest,
    LeaveAck,
    ForceMemberDown {
        node_id: String,
        admin_token: String,
    },
    TriggerViewBroadcast {
        admin_token: String,
    },
    /// Acknowledges an admin operation
    AdminAck,
    /// Local request to publish new custom state for this node
    UpdateNodeState {
        custom_state: BTreeMap<String, String>,
    },
    /// Reply to a request that was refused
    Rejected(Rejection),
    /// Opaque application payload, used for singleton traffic
    User {
        payload: Bytes,
    },
}

impl ClusterMessage {
    /// Stable name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClusterMessage::JoinRequest { .. } => "join_request",
            ClusterMessage::JoinResponse { .. } => "join_response",
            ClusterMessage::Gossip { .. } => "gossip",
            ClusterMessage::GetViewRequest => "get_view_request",
            ClusterMessage::GetViewResponse { .. } => "get_view_response",
            ClusterMessage::LeaveRequest => "leave_request",
            ClusterMessage::LeaveAck => "leave_ack",
            ClusterMessage::ForceMemberDown { .. } => "force_member_down",
            ClusterMessage::TriggerViewBroadcast { .. } => "trigger_view_broadcast",
            ClusterMessage::AdminAck => "admin_ack",
            ClusterMessage::UpdateNodeState { .. } => "update_node_state",
            ClusterMessage::Rejected(_) => "rejected",
            ClusterMessage::User { .. } => "user",
        }
    }

    /// Turn a `Rejected` reply into the error it carries
    pub fn into_result(self) -> Result<ClusterMessage, MeshworkError> {
        match self {
            ClusterMessage::Rejected(rejection) => Err(rejection.into()),
            other => Ok(other),
        }
    }
}

impl From<MeshworkError> for ClusterMessage {
    fn from(err: MeshworkError) -> Self {
        ClusterMessage::Rejected(Rejection::from(&err))
    }
}

/// Error category carried by a [`Rejection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectKind {
    ClusterDisabled = 1,
    NameMismatch = 2,
    NodeStatusMismatch = 3,
    JoinAuthFailed = 4,
    JoinRateLimited = 5,
    JoinNotAllowed = 6,
    NotInQuorum = 7,
    ProtocolVersionMismatch = 8,
    AdminAuthFailed = 9,
    Other = 255,
}

impl RejectKind {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => RejectKind::ClusterDisabled,
            2 => RejectKind::NameMismatch,
            3 => RejectKind::NodeStatusMismatch,
            4 => RejectKind::JoinAuthFailed,
            5 => RejectKind::JoinRateLimited,
            6 => RejectKind::JoinNotAllowed,
            7 => RejectKind::NotInQuorum,
            8 => RejectKind::ProtocolVersionMismatch,
            9 => RejectKind::AdminAuthFailed,
            _ => RejectKind::Other,
        }
    }
}

/// A refused request: the error kind plus the fields needed to rebuild it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectKind,
    pub params: Vec<String>,
    pub message: String,
}

impl From<&MeshworkError> for Rejection {
    fn from(err: &MeshworkError) -> Self {
        let (kind, params) = match err {
            MeshworkError::ClusterDisabled => (RejectKind::ClusterDisabled, vec![]),
            MeshworkError::NameMismatch { expected, actual } => {
                (RejectKind::NameMismatch, vec![expected.clone(), actual.clone()])
            }
            MeshworkError::NodeStatusMismatch {
                node_id,
                expected,
                actual,
            } => (
                RejectKind::NodeStatusMismatch,
                vec![node_id.clone(), expected.clone(), actual.clone()],
            ),
            MeshworkError::JoinAuthFailed { node_id } => {
                (RejectKind::JoinAuthFailed, vec![node_id.clone()])
            }
            MeshworkError::JoinRateLimited { address } => {
                (RejectKind::JoinRateLimited, vec![address.clone()])
            }
            MeshworkError::JoinNotAllowed { reason } => {
                (RejectKind::JoinNotAllowed, vec![reason.clone()])
            }
            MeshworkError::NotInQuorum { healthy, required } => (
                RejectKind::NotInQuorum,
                vec![healthy.to_string(), required.to_string()],
            ),
            MeshworkError::ProtocolVersionMismatch { version, min, max } => (
                RejectKind::ProtocolVersionMismatch,
                vec![version.to_string(), min.to_string(), max.to_string()],
            ),
            MeshworkError::AdminAuthFailed { operation } => {
                (RejectKind::AdminAuthFailed, vec![operation.clone()])
            }
            _ => (RejectKind::Other, vec![]),
        };
        Rejection {
            kind,
            params,
            message: err.to_string(),
        }
    }
}

impl From<Rejection> for MeshworkError {
    fn from(rejection: Rejection) -> Self {
        let Rejection {
            kind,
            params,
            message,
        } = rejection;
        let param = |i: usize| params.get(i).cloned().unwrap_or_default();
        let number = |i: usize| params.get(i).and_then(|p| p.parse::<usize>().ok()).unwrap_or(0);
        let version = |i: usize| params.get(i).and_then(|p| p.parse::<u16>().ok()).unwrap_or(0);

        match kind {
            RejectKind::ClusterDisabled => MeshworkError::ClusterDisabled,
            RejectKind::NameMismatch => MeshworkError::NameMismatch {
                expected: param(0),
                actual: param(1),
            },
            RejectKind::NodeStatusMismatch => MeshworkError::NodeStatusMismatch {
                node_id: param(0),
                expected: param(1),
                actual: param(2),
            },
            RejectKind::JoinAuthFailed => MeshworkError::JoinAuthFailed { node_id: param(0) },
            RejectKind::JoinRateLimited => MeshworkError::JoinRateLimited { address: param(0) },
            RejectKind::JoinNotAllowed => MeshworkError::JoinNotAllowed { reason: param(0) },
            RejectKind::NotInQuorum => MeshworkError::NotInQuorum {
                healthy: number(0),
                required: number(1),
            },
            RejectKind::ProtocolVersionMismatch => MeshworkError::ProtocolVersionMismatch {
                version: version(0),
                min: version(1),
                max: version(2),
            },
            RejectKind::AdminAuthFailed => MeshworkError::AdminAuthFailed { operation: param(0) },
            RejectKind::Other => MeshworkError::Internal { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_rebuilds_error() {
        let errors = vec![
            MeshworkError::ClusterDisabled,
            MeshworkError::NameMismatch {
                expected: "prod".into(),
                actual: "dev".into(),
            },
            MeshworkError::JoinAuthFailed { node_id: "n2".into() },
            MeshworkError::NotInQuorum { healthy: 1, required: 2 },
            MeshworkError::ProtocolVersionMismatch { version: 9, min: 1, max: 2 },
        ];
        for err in errors {
            let message = ClusterMessage::from(err.clone());
            assert_eq!(message.into_result().unwrap_err(), err);
        }
    }

    #[test]
    fn test_unknown_kind_maps_to_other() {
        assert_eq!(RejectKind::from_u8(77), RejectKind::Other);
        let err: MeshworkError = Rejection::from(&MeshworkError::internal("boom")).into();
        assert!(matches!(err, MeshworkError::Internal { ref message } if message.contains("boom")));
    }
}
