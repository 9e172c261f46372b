//! Binary wire encoding for cluster messages
//!
//! Layout rules:
//! - a message is one discriminator byte followed by its fields in order
//! - strings and byte blobs are u32 length prefixed, integers big endian
//! - `NodeState` and `ClusterView` bodies are u32 length prefixed; a decoder
//!   skips any bytes it does not understand at the end of a body, so newer
//!   peers may append fields
//! - optional values carry a presence byte (0 absent, 1 present)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use super::messages::{ClusterMessage, RejectKind, Rejection};
use super::node_state::{MemberStatus, NodeState, MAX_ADDRESS_LEN};
use super::version_vector::{VersionVector, MAX_VERSION_VECTOR_ENTRIES};
use super::view::ClusterView;
use crate::error::{MeshworkError, MeshworkResult};

/// Upper bound on entries of any encoded map or list
pub const MAX_MAP_ENTRIES: usize = 65_536;

/// Upper bound on a single encoded string
pub const MAX_STRING_LEN: usize = 1 << 20;

mod kind {
    pub const JOIN_REQUEST: u8 = 1;
    pub const JOIN_RESPONSE: u8 = 2;
    pub const GOSSIP: u8 = 3;
    pub const GET_VIEW_REQUEST: u8 = 4;
    pub const GET_VIEW_RESPONSE: u8 = 5;
    pub const LEAVE_REQUEST: u8 = 6;
    pub const LEAVE_ACK: u8 = 7;
    pub const FORCE_MEMBER_DOWN: u8 = 8;
    pub const TRIGGER_VIEW_BROADCAST: u8 = 9;
    pub const ADMIN_ACK: u8 = 10;
    pub const UPDATE_NODE_STATE: u8 = 11;
    pub const REJECTED: u8 = 12;
    pub const USER: u8 = 13;
}

pub fn encode(message: &ClusterMessage) -> MeshworkResult<Bytes> {
    let mut buf = BytesMut::with_capacity(256);
    match message {
        ClusterMessage::JoinRequest { state, auth_token } => {
            buf.put_u8(kind::JOIN_REQUEST);
            put_node_state(&mut buf, state)?;
            put_str(&mut buf, auth_token)?;
        }
        ClusterMessage::JoinResponse { view } => {
            buf.put_u8(kind::JOIN_RESPONSE);
            put_view(&mut buf, view)?;
        }
        ClusterMessage::Gossip { view } => {
            buf.put_u8(kind::GOSSIP);
            put_view(&mut buf, view)?;
        }
        ClusterMessage::GetViewRequest => buf.put_u8(kind::GET_VIEW_REQUEST),
        ClusterMessage::GetViewResponse {
            view,
            in_quorum,
            leader_address,
        } => {
            buf.put_u8(kind::GET_VIEW_RESPONSE);
            buf.put_u8(1);
            put_view(&mut buf, view)?;
            buf.put_u8(u8::from(*in_quorum));
            match leader_address {
                Some(addr) => {
                    buf.put_u8(1);
                    put_str(&mut buf, addr)?;
                }
                None => buf.put_u8(0),
            }
        }
        ClusterMessage::LeaveRequest => buf.put_u8(kind::LEAVE_REQUEST),
        ClusterMessage::LeaveAck => buf.put_u8(kind::LEAVE_ACK),
        ClusterMessage::ForceMemberDown {
            node_id,
            admin_token,
        } => {
            buf.put_u8(kind::FORCE_MEMBER_DOWN);
            put_str(&mut buf, node_id)?;
            put_str(&mut buf, admin_token)?;
        }
        ClusterMessage::TriggerViewBroadcast { admin_token } => {
            buf.put_u8(kind::TRIGGER_VIEW_BROADCAST);
            put_str(&mut buf, admin_token)?;
        }
        ClusterMessage::AdminAck => buf.put_u8(kind::ADMIN_ACK),
        ClusterMessage::UpdateNodeState { custom_state } => {
            buf.put_u8(kind::UPDATE_NODE_STATE);
            put_map(&mut buf, custom_state)?;
        }
        ClusterMessage::Rejected(rejection) => {
            buf.put_u8(kind::REJECTED);
            buf.put_u8(rejection.kind as u8);
            put_len(&mut buf, rejection.params.len(), MAX_MAP_ENTRIES, "rejection params")?;
            for param in &rejection.params {
                put_str(&mut buf, param)?;
            }
            put_str(&mut buf, &rejection.message)?;
        }
        ClusterMessage::User { payload } => {
            buf.put_u8(kind::USER);
            put_len(&mut buf, payload.len(), usize::MAX, "user payload")?;
            buf.put_slice(payload);
        }
    }
    Ok(buf.freeze())
}

pub fn decode(mut buf: Bytes) -> MeshworkResult<ClusterMessage> {
    let discriminator = get_u8(&mut buf, "message kind")?;
    let message = match discriminator {
        kind::JOIN_REQUEST => ClusterMessage::JoinRequest {
            state: get_node_state(&mut buf)?,
            auth_token: get_str(&mut buf, "auth token")?,
        },
        kind::JOIN_RESPONSE => ClusterMessage::JoinResponse {
            view: get_view(&mut buf)?,
        },
        kind::GOSSIP => ClusterMessage::Gossip {
            view: get_view(&mut buf)?,
        },
        kind::GET_VIEW_REQUEST => ClusterMessage::GetViewRequest,
        kind::GET_VIEW_RESPONSE => {
            if get_u8(&mut buf, "view presence")? != 1 {
                return Err(MeshworkError::codec("get view response", "missing view"));
            }
            let view = get_view(&mut buf)?;
            let in_quorum = get_u8(&mut buf, "in quorum")? != 0;
            let leader_address = match get_u8(&mut buf, "leader presence")? {
                0 => None,
                _ => Some(get_str(&mut buf, "leader address")?),
            };
            ClusterMessage::GetViewResponse {
                view,
                in_quorum,
                leader_address,
            }
        }
        kind::LEAVE_REQUEST => ClusterMessage::LeaveRequest,
        kind::LEAVE_ACK => ClusterMessage::LeaveAck,
        kind::FORCE_MEMBER_DOWN => ClusterMessage::ForceMemberDown {
            node_id: get_str(&mut buf, "node id")?,
            admin_token: get_str(&mut buf, "admin token")?,
        },
        kind::TRIGGER_VIEW_BROADCAST => ClusterMessage::TriggerViewBroadcast {
            admin_token: get_str(&mut buf, "admin token")?,
        },
        kind::ADMIN_ACK => ClusterMessage::AdminAck,
        kind::UPDATE_NODE_STATE => ClusterMessage::UpdateNodeState {
            custom_state: get_map(&mut buf, "custom state")?,
        },
        kind::REJECTED => {
            let kind = RejectKind::from_u8(get_u8(&mut buf, "reject kind")?);
            let count = get_len(&mut buf, MAX_MAP_ENTRIES, "rejection params")?;
            let mut params = Vec::with_capacity(count);
            for _ in 0..count {
                params.push(get_str(&mut buf, "rejection param")?);
            }
            let message = get_str(&mut buf, "rejection message")?;
            ClusterMessage::Rejected(Rejection {
                kind,
                params,
                message,
            })
        }
        kind::USER => {
            let len = get_len(&mut buf, usize::MAX, "user payload")?;
            need(&buf, len, "user payload")?;
            ClusterMessage::User {
                payload: buf.split_to(len),
            }
        }
        other => {
            return Err(MeshworkError::codec(
                "message kind",
                format!("unknown discriminator {}", other),
            ))
        }
    };
    Ok(message)
}

/// Encode a view on its own, e.g. for snapshots written to disk
pub fn encode_view(view: &ClusterView) -> MeshworkResult<Bytes> {
    let mut buf = BytesMut::new();
    put_view(&mut buf, view)?;
    Ok(buf.freeze())
}

pub fn decode_view(mut buf: Bytes) -> MeshworkResult<ClusterView> {
    get_view(&mut buf)
}

fn put_node_state(buf: &mut BytesMut, state: &NodeState) -> MeshworkResult<()> {
    if state.address.len() > MAX_ADDRESS_LEN {
        return Err(MeshworkError::codec("node state", "address too long"));
    }
    let mut body = BytesMut::with_capacity(128);
    put_str(&mut body, &state.id)?;
    put_str(&mut body, &state.cluster_name)?;
    put_str(&mut body, &state.address)?;
    body.put_u64(state.generation);
    body.put_u64(state.logical_clock);
    body.put_i64(state.timestamp);
    body.put_u8(state.status.as_u8());
    body.put_i64(state.last_seen);
    put_map(&mut body, &state.labels)?;
    put_map(&mut body, &state.custom_state)?;
    put_body(buf, body, "node state")
}

fn get_node_state(buf: &mut Bytes) -> MeshworkResult<NodeState> {
    let mut body = get_body(buf, "node state")?;
    let id = get_str(&mut body, "node id")?;
    let cluster_name = get_str(&mut body, "cluster name")?;
    let address = get_str(&mut body, "address")?;
    if address.len() > MAX_ADDRESS_LEN {
        return Err(MeshworkError::codec("node state", "address too long"));
    }
    Ok(NodeState {
        id,
        cluster_name,
        address,
        generation: get_u64(&mut body, "generation")?,
        logical_clock: get_u64(&mut body, "logical clock")?,
        timestamp: get_i64(&mut body, "timestamp")?,
        status: MemberStatus::try_from(get_u8(&mut body, "status")?)?,
        last_seen: get_i64(&mut body, "last seen")?,
        labels: get_map(&mut body, "labels")?,
        custom_state: get_map(&mut body, "custom state")?,
    })
}

fn put_view(buf: &mut BytesMut, view: &ClusterView) -> MeshworkResult<()> {
    let mut body = BytesMut::with_capacity(256);
    body.put_u16(view.protocol_version);
    put_str(&mut body, &view.view_id)?;
    body.put_u64(view.epoch);
    body.put_i64(view.timestamp);
    body.put_u32(u32::try_from(view.max_vv_entries).unwrap_or(u32::MAX));

    put_len(&mut body, view.len(), MAX_MAP_ENTRIES, "members")?;
    for member in view.members() {
        put_node_state(&mut body, member)?;
    }

    let vv = view.version_vector();
    put_len(&mut body, vv.len(), MAX_VERSION_VECTOR_ENTRIES, "version vector")?;
    for (id, counter) in vv.entries() {
        put_str(&mut body, id)?;
        body.put_u64(counter);
    }

    // Derived counts travel for observers; decoders recompute them
    body.put_u32(view.healthy_count() as u32);
    body.put_u32(view.unhealthy_count() as u32);
    body.put_u32(view.quorum_size() as u32);
    put_body(buf, body, "cluster view")
}

fn get_view(buf: &mut Bytes) -> MeshworkResult<ClusterView> {
    let mut body = get_body(buf, "cluster view")?;
    let protocol_version = get_u16(&mut body, "protocol version")?;
    let view_id = get_str(&mut body, "view id")?;
    let epoch = get_u64(&mut body, "epoch")?;
    let timestamp = get_i64(&mut body, "timestamp")?;
    let max_vv_entries = get_u32(&mut body, "max vv entries")? as usize;

    let count = get_len(&mut body, MAX_MAP_ENTRIES, "members")?;
    let mut members = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        members.push(get_node_state(&mut body)?);
    }

    let count = get_len(&mut body, MAX_VERSION_VECTOR_ENTRIES, "version vector")?;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let id = get_str(&mut body, "version vector id")?;
        entries.push((id, get_u64(&mut body, "version vector counter")?));
    }
    let version_vector = VersionVector::from_entries(entries)?;

    Ok(ClusterView::from_parts(
        view_id,
        epoch,
        timestamp,
        members,
        version_vector,
        protocol_version,
        max_vv_entries,
    ))
}

fn put_body(buf: &mut BytesMut, body: BytesMut, context: &str) -> MeshworkResult<()> {
    put_len(buf, body.len(), u32::MAX as usize, context)?;
    buf.put_slice(&body);
    Ok(())
}

fn get_body(buf: &mut Bytes, context: &str) -> MeshworkResult<Bytes> {
    let len = get_len(buf, u32::MAX as usize, context)?;
    need(buf, len, context)?;
    Ok(buf.split_to(len))
}

fn put_len(buf: &mut BytesMut, len: usize, max: usize, context: &str) -> MeshworkResult<()> {
    if len > max || len > u32::MAX as usize {
        return Err(MeshworkError::codec(context, format!("length {} exceeds limit", len)));
    }
    buf.put_u32(len as u32);
    Ok(())
}

fn get_len(buf: &mut Bytes, max: usize, context: &str) -> MeshworkResult<usize> {
    let len = get_u32(buf, context)? as usize;
    if len > max {
        return Err(MeshworkError::codec(context, format!("length {} exceeds limit", len)));
    }
    Ok(len)
}

fn put_str(buf: &mut BytesMut, value: &str) -> MeshworkResult<()> {
    put_len(buf, value.len(), MAX_STRING_LEN, "string")?;
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_str(buf: &mut Bytes, context: &str) -> MeshworkResult<String> {
    let len = get_len(buf, MAX_STRING_LEN, context)?;
    need(buf, len, context)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| MeshworkError::codec(context, "invalid utf-8"))
}

fn put_map(buf: &mut BytesMut, map: &BTreeMap<String, String>) -> MeshworkResult<()> {
    put_len(buf, map.len(), MAX_MAP_ENTRIES, "map")?;
    for (key, value) in map {
        put_str(buf, key)?;
        put_str(buf, value)?;
    }
    Ok(())
}

fn get_map(buf: &mut Bytes, context: &str) -> MeshworkResult<BTreeMap<String, String>> {
    let count = get_len(buf, MAX_MAP_ENTRIES, context)?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = get_str(buf, context)?;
        let value = get_str(buf, context)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn need(buf: &Bytes, len: usize, context: &str) -> MeshworkResult<()> {
    if buf.remaining() < len {
        return Err(MeshworkError::codec(
            context,
            format!("need {} bytes, have {}", len, buf.remaining()),
        ));
    }
    Ok(())
}

fn get_u8(buf: &mut Bytes, context: &str) -> MeshworkResult<u8> {
    need(buf, 1, context)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes, context: &str) -> MeshworkResult<u16> {
    need(buf, 2, context)?;
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes, context: &str) -> MeshworkResult<u32> {
    need(buf, 4, context)?;
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut Bytes, context: &str) -> MeshworkResult<u64> {
    need(buf, 8, context)?;
    Ok(buf.get_u64())
}

fn get_i64(buf: &mut Bytes, context: &str) -> MeshworkResult<i64> {
    need(buf, 8, context)?;
    Ok(buf.get_i64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node_state::LABEL_DATACENTER;
    use pretty_assertions::assert_eq;

    fn sample_state(id: &str) -> NodeState {
        let mut s = NodeState::new(id, "prod", format!("{}.svc:7946", id), 1_700_000_000);
        s.status = MemberStatus::Up;
        s.labels.insert(LABEL_DATACENTER.into(), "eu-1".into());
        s.custom_state.insert("role".into(), "ingest".into());
        s
    }

    fn sample_view() -> ClusterView {
        let mut view = ClusterView::new(42, 100);
        view.add_member(&sample_state("b"));
        view.add_member(&sample_state("a"));
        view.increment_version("a").unwrap();
        view.increment_version("b").unwrap();
        view.epoch = 3;
        view
    }

    #[test]
    fn test_gossip_message_survives_encoding() {
        let message = ClusterMessage::Gossip { view: sample_view() };
        let decoded = decode(encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_get_view_response_optional_leader() {
        for leader in [None, Some("a.svc:7946".to_string())] {
            let message = ClusterMessage::GetViewResponse {
                view: sample_view(),
                in_quorum: true,
                leader_address: leader,
            };
            assert_eq!(decode(encode(&message).unwrap()).unwrap(), message);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let first = sample_view();

        // Same content built in a different order
        let mut reordered = ClusterView::new(42, 100);
        reordered.view_id = first.view_id.clone();
        reordered.add_member(&sample_state("a"));
        reordered.add_member(&sample_state("b"));
        reordered.increment_version("b").unwrap();
        reordered.increment_version("a").unwrap();
        reordered.epoch = 3;

        assert_eq!(encode_view(&first).unwrap(), encode_view(&reordered).unwrap());
    }

    #[test]
    fn test_unknown_trailing_fields_are_skipped() {
        let state = sample_state("a");
        let mut body = BytesMut::new();
        put_node_state(&mut body, &state).unwrap();

        // Re-frame the body with extra bytes a newer peer might append
        let mut frozen = body.freeze();
        let original_len = frozen.get_u32() as usize;
        let mut extended = BytesMut::new();
        extended.put_u32((original_len + 5) as u32);
        extended.put_slice(&frozen[..original_len]);
        extended.put_slice(&[9, 9, 9, 9, 9]);
        extended.put_u32(0xDEAD_BEEF);

        let mut input = extended.freeze();
        assert_eq!(get_node_state(&mut input).unwrap(), state);
        // The next field after the body is still readable
        assert_eq!(input.get_u32(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let encoded = encode(&ClusterMessage::Gossip { view: sample_view() }).unwrap();
        for cut in [1, 5, encoded.len() / 2, encoded.len() - 1] {
            assert!(decode(encoded.slice(..cut)).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_unknown_discriminator() {
        let err = decode(Bytes::from_static(&[200])).unwrap_err();
        assert!(matches!(err, MeshworkError::Codec { .. }));
    }

    #[test]
    fn test_counts_recomputed_on_decode() {
        let view = sample_view();
        let decoded = decode_view(encode_view(&view).unwrap()).unwrap();
        assert_eq!(decoded.healthy_count(), 2);
        assert_eq!(decoded.quorum_size(), 2);
    }
}
