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

//! One logical peer-to-peer link: a media connection plus the `"control"`
//! data channel riding on the same peer connection.
//!
//! State machine: `Connecting -> Open -> Closed`, with a direct
//! `Connecting -> Closed` when negotiation fails. There is no way back from
//! `Closed`; a dropped link is replaced only when the member rejoins the
//! room and discovery runs again.

use crate::constants::DEFAULT_STUN_SERVER;
use log::{debug, warn};
use meshcall_types::ControlMessage;
use wasm_bindgen::JsValue;
use web_sys::{
    RtcConfiguration, RtcDataChannel, RtcDataChannelState, RtcIceServer, RtcPeerConnection,
};

pub(crate) use super::registry::{LinkId, LinkRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkState {
    Connecting,
    Open,
    Closed,
}

pub(crate) struct PeerLink {
    pub id: LinkId,
    pub role: LinkRole,
    pub user_id: String,
    pub peer_addr: String,
    pub conn_id: String,
    pub state: LinkState,
    pub pc: RtcPeerConnection,
    pub control: Option<RtcDataChannel>,
    pub control_open: bool,
}

impl PeerLink {
    pub fn new(
        id: LinkId,
        role: LinkRole,
        user_id: String,
        peer_addr: String,
        conn_id: String,
        pc: RtcPeerConnection,
    ) -> Self {
        Self {
            id,
            role,
            user_id,
            peer_addr,
            conn_id,
            state: LinkState::Connecting,
            pc,
            control: None,
            control_open: false,
        }
    }

    /// Send a control frame if this link's control channel is open.
    pub fn send_control(&self, msg: &ControlMessage) -> bool {
        let Some(dc) = self.control.as_ref() else {
            return false;
        };
        if !self.control_open || dc.ready_state() != RtcDataChannelState::Open {
            return false;
        }
        match serde_json::to_string(msg) {
            Ok(text) => match dc.send_with_str(&text) {
                Ok(()) => true,
                Err(e) => {
                    warn!("control channel send to {} failed: {e:?}", self.user_id);
                    false
                }
            },
            Err(e) => {
                warn!("could not encode control frame: {e}");
                false
            }
        }
    }

    /// Tear the link down. Idempotent; a closed link ignores further
    /// closes.
    pub fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        debug!("closing link {} to {} ({:?})", self.id, self.user_id, self.role);
        self.state = LinkState::Closed;
        self.control_open = false;
        if let Some(dc) = self.control.take() {
            dc.set_onopen(None);
            dc.set_onmessage(None);
            dc.set_onclose(None);
            dc.close();
        }
        self.pc.set_onicecandidate(None);
        self.pc.set_ontrack(None);
        self.pc.set_oniceconnectionstatechange(None);
        self.pc.set_ondatachannel(None);
        self.pc.close();
    }
}

/// Build the peer connection a link runs over.
pub(crate) fn create_peer_connection(ice_urls: &[String]) -> Result<RtcPeerConnection, JsValue> {
    let config = RtcConfiguration::new();
    let servers = js_sys::Array::new();
    let urls = js_sys::Array::new();
    if ice_urls.is_empty() {
        urls.push(&JsValue::from_str(DEFAULT_STUN_SERVER));
    } else {
        for url in ice_urls {
            urls.push(&JsValue::from_str(url));
        }
    }
    let server = RtcIceServer::new();
    server.set_urls(&urls);
    servers.push(&server);
    config.set_ice_servers(&servers);
    RtcPeerConnection::new_with_configuration(&config)
}

/// Pull the SDP string out of a `createOffer`/`createAnswer` result.
pub(crate) fn sdp_from_js(desc: &JsValue) -> Option<String> {
    js_sys::Reflect::get(desc, &JsValue::from_str("sdp"))
        .ok()
        .and_then(|sdp| sdp.as_string())
}
