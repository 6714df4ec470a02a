/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

//! Messages carried on the voice signaling channel.
//!
//! Every frame on the channel is one JSON object tagged by `type`. The
//! signaling server only fans these out; it never inspects media or
//! negotiation payloads.
//!
//! Peer ids (`peerId`) are ephemeral transport addresses minted per
//! connection. User ids are stable; any message that needs to identify a
//! participant across reconnects carries the `userId` explicitly.

use serde::{Deserialize, Serialize};

/// Identifies the sender of a relayed signal: the stable user id plus the
/// transport address the reply should be routed to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerTag {
    pub user_id: String,
    pub peer_id: String,
}

/// Session negotiation payload relayed verbatim between two peers.
///
/// These shapes are transport plumbing for the peer-connection layer; they
/// are not part of the application contract and may grow fields without
/// notice.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SignalPayload {
    #[serde(rename_all = "camelCase")]
    Offer { sdp: String },
    #[serde(rename_all = "camelCase")]
    Answer { sdp: String },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    },
}

/// A frame on the signaling channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SignalMessage {
    /// Client → server: announce this client in a meeting's voice room.
    #[serde(rename = "voice:join-room", rename_all = "camelCase")]
    JoinRoom {
        meeting_id: String,
        user_id: String,
        peer_id: String,
    },

    /// Server → client: another participant is present in the room.
    ///
    /// Delivery is at-least-once; receivers must treat a repeated
    /// `peerId` as a no-op.
    #[serde(rename = "voice:user-joined", rename_all = "camelCase")]
    UserJoined { user_id: String, peer_id: String },

    /// Server → client: a participant's signaling connection went away.
    ///
    /// Only the transport address is known at leave time.
    #[serde(rename = "voice:user-left", rename_all = "camelCase")]
    UserLeft { peer_id: String },

    /// Mirror transport for the control-channel state message, used while a
    /// control connection has not opened yet (or as a redundant broadcast).
    ///
    /// Absent fields mean "unchanged", matching
    /// [`ControlMessage::StateChange`](crate::state::ControlMessage).
    #[serde(rename = "voice:state-change", rename_all = "camelCase")]
    StateChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meeting_id: Option<String>,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_mic_enabled: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_camera_enabled: Option<bool>,
    },

    /// Peer-to-peer negotiation relay, routed by the server to the `to`
    /// transport address.
    ///
    /// `connId` correlates every frame of one logical connection's
    /// negotiation: when both sides originate to each other at once, two
    /// connections negotiate with the same pair of addresses and answers
    /// and candidates must not cross between them.
    #[serde(rename = "voice:signal", rename_all = "camelCase")]
    Signal {
        to: String,
        from: PeerTag,
        conn_id: String,
        payload: SignalPayload,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_wire_shape() {
        let msg = SignalMessage::JoinRoom {
            meeting_id: "m1".into(),
            user_id: "alice".into(),
            peer_id: "alice-1712000000000".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"voice:join-room","meetingId":"m1","userId":"alice","peerId":"alice-1712000000000"}"#
        );
    }

    #[test]
    fn user_joined_and_left_wire_shapes() {
        let joined: SignalMessage = serde_json::from_str(
            r#"{"type":"voice:user-joined","userId":"bob","peerId":"bob-42"}"#,
        )
        .unwrap();
        assert_eq!(
            joined,
            SignalMessage::UserJoined {
                user_id: "bob".into(),
                peer_id: "bob-42".into()
            }
        );

        let left: SignalMessage =
            serde_json::from_str(r#"{"type":"voice:user-left","peerId":"bob-42"}"#).unwrap();
        assert_eq!(
            left,
            SignalMessage::UserLeft {
                peer_id: "bob-42".into()
            }
        );
    }

    #[test]
    fn state_change_tolerates_partial_fields() {
        let msg: SignalMessage = serde_json::from_str(
            r#"{"type":"voice:state-change","userId":"bob","isCameraEnabled":false}"#,
        )
        .unwrap();
        match msg {
            SignalMessage::StateChange {
                user_id,
                is_mic_enabled,
                is_camera_enabled,
                ..
            } => {
                assert_eq!(user_id, "bob");
                assert_eq!(is_mic_enabled, None);
                assert_eq!(is_camera_enabled, Some(false));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn signal_relay_round_trips_ice() {
        let msg = SignalMessage::Signal {
            to: "bob-42".into(),
            from: PeerTag {
                user_id: "alice".into(),
                peer_id: "alice-7".into(),
            },
            conn_id: "alice-7#1".into(),
            payload: SignalPayload::IceCandidate {
                candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: SignalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_message_types_are_rejected() {
        let err = serde_json::from_str::<SignalMessage>(r#"{"type":"voice:nonsense"}"#);
        assert!(err.is_err());
    }
}
