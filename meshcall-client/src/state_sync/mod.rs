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

//! Mic/camera state synchronization across peers.
//!
//! State changes travel primarily over the per-peer control connection and
//! are redundantly mirrored over the signaling channel, so an update is not
//! lost while a control connection is still opening. Both transports feed
//! the same [`StateTable::apply`] merge; the origin is carried only for
//! logging and tests.
//!
//! Merging is per-field: a message that omits a field leaves the previously
//! known value untouched, so a partial message can never destructively
//! overwrite state.

use log::debug;
use meshcall_types::ControlMessage;
use std::collections::HashMap;

/// Which transport delivered a state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOrigin {
    ControlChannel,
    Signaling,
}

/// A decoded state update, transport-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub user_id: String,
    pub mic_enabled: Option<bool>,
    pub camera_enabled: Option<bool>,
}

impl From<ControlMessage> for StateUpdate {
    fn from(msg: ControlMessage) -> Self {
        match msg {
            ControlMessage::StateChange {
                user_id,
                is_mic_enabled,
                is_camera_enabled,
            } => StateUpdate {
                user_id,
                mic_enabled: is_mic_enabled,
                camera_enabled: is_camera_enabled,
            },
        }
    }
}

/// Reported mic/camera flags for one remote participant.
///
/// Flags default to enabled until the peer reports otherwise, matching what
/// a peer that has never toggled anything would broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerMediaState {
    pub mic_enabled: bool,
    pub camera_enabled: bool,
}

impl Default for PeerMediaState {
    fn default() -> Self {
        Self {
            mic_enabled: true,
            camera_enabled: true,
        }
    }
}

/// Reported state for every known remote participant.
#[derive(Debug, Default)]
pub struct StateTable {
    states: HashMap<String, PeerMediaState>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one update; returns the new state if anything changed.
    pub fn apply(&mut self, origin: StateOrigin, update: StateUpdate) -> Option<PeerMediaState> {
        let entry = self.states.entry(update.user_id.clone()).or_default();
        let before = *entry;
        if let Some(mic) = update.mic_enabled {
            entry.mic_enabled = mic;
        }
        if let Some(camera) = update.camera_enabled {
            entry.camera_enabled = camera;
        }
        if *entry == before {
            return None;
        }
        debug!(
            "state-sync: {} now mic={} camera={} (via {:?})",
            update.user_id, entry.mic_enabled, entry.camera_enabled, origin
        );
        Some(*entry)
    }

    /// Make sure a participant has a (default) entry, e.g. when their media
    /// link opens before any state message arrived.
    pub fn ensure(&mut self, user_id: &str) -> PeerMediaState {
        *self.states.entry(user_id.to_owned()).or_default()
    }

    pub fn get(&self, user_id: &str) -> Option<PeerMediaState> {
        self.states.get(user_id).copied()
    }

    pub fn remove(&mut self, user_id: &str) -> Option<PeerMediaState> {
        self.states.remove(user_id)
    }

    pub fn snapshot(&self) -> HashMap<String, PeerMediaState> {
        self.states.clone()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(user: &str, mic: Option<bool>, camera: Option<bool>) -> StateUpdate {
        StateUpdate {
            user_id: user.into(),
            mic_enabled: mic,
            camera_enabled: camera,
        }
    }

    #[test]
    fn unknown_users_start_from_enabled_defaults() {
        let mut table = StateTable::new();
        let state = table
            .apply(StateOrigin::ControlChannel, update("bob", None, Some(false)))
            .expect("camera off is a change from the default");
        assert!(state.mic_enabled);
        assert!(!state.camera_enabled);
    }

    #[test]
    fn partial_update_preserves_other_fields() {
        let mut table = StateTable::new();
        table.apply(
            StateOrigin::ControlChannel,
            update("bob", Some(false), Some(false)),
        );
        let state = table
            .apply(StateOrigin::Signaling, update("bob", None, Some(true)))
            .unwrap();
        assert!(!state.mic_enabled, "omitted mic field must not be reset");
        assert!(state.camera_enabled);
    }

    #[test]
    fn redundant_update_reports_no_change() {
        let mut table = StateTable::new();
        table.apply(
            StateOrigin::ControlChannel,
            update("bob", Some(true), Some(true)),
        );
        // The signaling mirror of the same toggle arrives second.
        assert_eq!(
            table.apply(StateOrigin::Signaling, update("bob", Some(true), Some(true))),
            None
        );
    }

    #[test]
    fn merge_rule_is_origin_independent() {
        let mut via_control = StateTable::new();
        let mut via_signaling = StateTable::new();
        via_control.apply(
            StateOrigin::ControlChannel,
            update("bob", Some(false), None),
        );
        via_signaling.apply(StateOrigin::Signaling, update("bob", Some(false), None));
        assert_eq!(via_control.get("bob"), via_signaling.get("bob"));
    }

    #[test]
    fn remove_forgets_the_participant() {
        let mut table = StateTable::new();
        table.apply(
            StateOrigin::ControlChannel,
            update("bob", Some(false), Some(false)),
        );
        table.remove("bob");
        assert_eq!(table.get("bob"), None);
        // A rejoining participant starts from defaults again.
        assert_eq!(table.ensure("bob"), PeerMediaState::default());
    }

    #[test]
    fn control_message_decodes_into_update() {
        let msg: ControlMessage = serde_json::from_str(
            r#"{"type":"state-change","userId":"alice","isMicEnabled":false}"#,
        )
        .unwrap();
        assert_eq!(
            StateUpdate::from(msg),
            update("alice", Some(false), None)
        );
    }
}
