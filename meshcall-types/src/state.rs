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

//! Messages exchanged directly between peers over the control connection.
//!
//! The control connection is an ordered, reliable side-channel; frames are
//! small JSON objects tagged by `type`. The same per-field semantics apply
//! when a state change is mirrored over the signaling channel: a field that
//! is absent (or null) means "unchanged", so a partial message never
//! destroys previously known state.

use serde::{Deserialize, Serialize};

/// A frame on the per-peer control connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// The sender's current mic/camera flags.
    ///
    /// Senders broadcast the full combined state on every toggle and once
    /// immediately after a control connection opens; receivers must accept
    /// partial messages all the same.
    #[serde(rename = "state-change", rename_all = "camelCase")]
    StateChange {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_mic_enabled: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_camera_enabled: Option<bool>,
    },
}

impl ControlMessage {
    /// Full-state message as sent on toggle and on control-channel open.
    pub fn state_change(user_id: &str, mic: bool, camera: bool) -> Self {
        ControlMessage::StateChange {
            user_id: user_id.to_owned(),
            is_mic_enabled: Some(mic),
            is_camera_enabled: Some(camera),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_wire_shape() {
        let json = serde_json::to_string(&ControlMessage::state_change("alice", true, false))
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"state-change","userId":"alice","isMicEnabled":true,"isCameraEnabled":false}"#
        );
    }

    #[test]
    fn absent_fields_deserialize_as_none() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"state-change","userId":"bob"}"#).unwrap();
        assert_eq!(
            msg,
            ControlMessage::StateChange {
                user_id: "bob".into(),
                is_mic_enabled: None,
                is_camera_enabled: None,
            }
        );
    }
}
