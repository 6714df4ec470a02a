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

//! The Signaling Gateway: a thin real-time channel that announces room
//! membership and relays small control payloads. It carries no media and
//! performs no negotiation itself.
//!
//! Membership is tracked here, keyed by transport address, so that a leave
//! notification (which only carries the address) can always be resolved to
//! the stable user id before it reaches the session manager.
//!
//! The socket reconnects on its own with capped exponential backoff. Open
//! peer links never depend on this channel once established, so an outage
//! only pauses discovery and the state-change mirror.

use super::Backoff;
use crate::constants::{SIGNALING_BACKOFF_BASE_MS, SIGNALING_BACKOFF_CAP_MS};
use crate::state_sync::StateUpdate;
use anyhow::{anyhow, Result};
use gloo::timers::callback::Timeout;
use log::{debug, warn};
use meshcall_types::{PeerTag, SignalMessage, SignalPayload};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::prelude::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{CloseEvent, MessageEvent, WebSocket};
use web_time::SystemTime;

/// A participant currently known to be in the room.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub user_id: String,
    pub peer_addr: String,
    pub joined_at: SystemTime,
}

/// Options for [`SignalingGateway::connect`].
#[derive(Clone)]
pub struct SignalingGatewayOptions {
    pub url: String,
    pub meeting_id: String,
    pub user_id: String,

    /// Called with the local peer address on every successful (re)connect.
    pub on_connected: Rc<dyn Fn(String)>,

    /// Called once per outage; reconnection is already scheduled when this
    /// fires.
    pub on_connection_lost: Rc<dyn Fn(String)>,

    pub on_member_joined: Rc<dyn Fn(RoomMember)>,
    pub on_member_left: Rc<dyn Fn(RoomMember)>,

    /// Negotiation relay frames addressed to this client.
    pub on_signal: Rc<dyn Fn(PeerTag, String, SignalPayload)>,

    /// State-change messages arriving over the signaling mirror.
    pub on_state_change: Rc<dyn Fn(StateUpdate)>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Status {
    Connecting,
    Open,
    Closed,
}

// Handlers for the current socket; replaced wholesale on reconnect.
struct SocketHooks {
    _onopen: Closure<dyn FnMut(JsValue)>,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onclose: Closure<dyn FnMut(CloseEvent)>,
    _onerror: Closure<dyn FnMut(JsValue)>,
}

struct GatewayInner {
    options: SignalingGatewayOptions,
    peer_addr: String,
    ws: Option<WebSocket>,
    _hooks: Option<SocketHooks>,
    status: Status,
    // Guards stale socket callbacks across reconnects.
    epoch: u32,
    members: HashMap<String, RoomMember>,
    backoff: Backoff,
    _reconnect: Option<Timeout>,
    outage_reported: bool,
    closing: bool,
}

/// Client endpoint of the voice signaling channel.
#[derive(Clone)]
pub struct SignalingGateway {
    inner: Rc<RefCell<GatewayInner>>,
}

impl SignalingGateway {
    /// Mint a peer address, open the socket and announce this client in the
    /// meeting's voice room once the socket opens.
    pub fn connect(options: SignalingGatewayOptions) -> Result<Self> {
        let peer_addr = format!("{}-{}", options.user_id, js_sys::Date::now() as u64);
        let inner = Rc::new(RefCell::new(GatewayInner {
            options,
            peer_addr,
            ws: None,
            _hooks: None,
            status: Status::Connecting,
            epoch: 0,
            members: HashMap::new(),
            backoff: Backoff::new(SIGNALING_BACKOFF_BASE_MS, SIGNALING_BACKOFF_CAP_MS),
            _reconnect: None,
            outage_reported: false,
            closing: false,
        }));
        open_socket(&inner).map_err(|e| anyhow!("signaling connect failed: {e:?}"))?;
        Ok(Self { inner })
    }

    /// The transport address other peers use to reach this client.
    pub fn peer_addr(&self) -> String {
        self.inner.borrow().peer_addr.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().status == Status::Open
    }

    /// Members currently known to be in the room.
    pub fn members(&self) -> Vec<RoomMember> {
        self.inner.borrow().members.values().cloned().collect()
    }

    pub fn member_for_addr(&self, peer_addr: &str) -> Option<RoomMember> {
        self.inner.borrow().members.get(peer_addr).cloned()
    }

    /// Best-effort send; drops the frame with a log line when the socket is
    /// not open.
    pub fn send(&self, msg: &SignalMessage) {
        let inner = self.inner.borrow();
        if inner.status != Status::Open {
            debug!("signaling: dropping frame while disconnected");
            return;
        }
        let Some(ws) = inner.ws.as_ref() else {
            return;
        };
        match serde_json::to_string(msg) {
            Ok(text) => {
                if let Err(e) = ws.send_with_str(&text) {
                    warn!("signaling: send failed: {e:?}");
                }
            }
            Err(e) => warn!("signaling: could not encode frame: {e}"),
        }
    }

    /// Intentional shutdown: stops reconnection and closes the socket.
    /// Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.closing = true;
        inner._reconnect = None;
        if let Some(ws) = inner.ws.take() {
            detach_socket(&ws);
            let _ = ws.close();
        }
        inner._hooks = None;
        inner.status = Status::Closed;
        inner.members.clear();
    }
}

fn detach_socket(ws: &WebSocket) {
    ws.set_onopen(None);
    ws.set_onmessage(None);
    ws.set_onclose(None);
    ws.set_onerror(None);
}

fn open_socket(rc: &Rc<RefCell<GatewayInner>>) -> std::result::Result<(), JsValue> {
    let url = rc.borrow().options.url.clone();
    let ws = WebSocket::new(&url)?;

    let generation = {
        let mut inner = rc.borrow_mut();
        if let Some(old) = inner.ws.take() {
            detach_socket(&old);
            let _ = old.close();
        }
        inner.epoch = inner.epoch.wrapping_add(1);
        inner.status = Status::Connecting;
        inner.epoch
    };

    let onopen = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |_: JsValue| {
            if let Some(rc) = weak.upgrade() {
                handle_open(&rc, generation);
            }
        }) as Box<dyn FnMut(JsValue)>)
    };
    let onmessage = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(rc) = weak.upgrade() {
                if let Ok(text) = event.data().dyn_into::<js_sys::JsString>() {
                    handle_frame(&rc, &String::from(text));
                }
            }
        }) as Box<dyn FnMut(MessageEvent)>)
    };
    let onclose = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |event: CloseEvent| {
            if let Some(rc) = weak.upgrade() {
                handle_close(&rc, generation, &format!("code {}", event.code()));
            }
        }) as Box<dyn FnMut(CloseEvent)>)
    };
    let onerror = Closure::wrap(Box::new(move |e: JsValue| {
        // The paired close event carries the useful information.
        debug!("signaling: socket error: {e:?}");
    }) as Box<dyn FnMut(JsValue)>);

    ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));

    let mut inner = rc.borrow_mut();
    inner.ws = Some(ws);
    inner._hooks = Some(SocketHooks {
        _onopen: onopen,
        _onmessage: onmessage,
        _onclose: onclose,
        _onerror: onerror,
    });
    Ok(())
}

fn handle_open(rc: &Rc<RefCell<GatewayInner>>, generation: u32) {
    let (peer_addr, on_connected) = {
        let mut inner = rc.borrow_mut();
        if inner.epoch != generation || inner.closing {
            return;
        }
        inner.status = Status::Open;
        inner.backoff.reset();
        inner.outage_reported = false;
        let join = SignalMessage::JoinRoom {
            meeting_id: inner.options.meeting_id.clone(),
            user_id: inner.options.user_id.clone(),
            peer_id: inner.peer_addr.clone(),
        };
        if let (Some(ws), Ok(text)) = (inner.ws.as_ref(), serde_json::to_string(&join)) {
            if let Err(e) = ws.send_with_str(&text) {
                warn!("signaling: join announcement failed: {e:?}");
            }
        }
        (inner.peer_addr.clone(), inner.options.on_connected.clone())
    };
    debug!("signaling: connected as {peer_addr}");
    on_connected(peer_addr);
}

fn handle_close(rc: &Rc<RefCell<GatewayInner>>, generation: u32, reason: &str) {
    let lost = {
        let mut inner = rc.borrow_mut();
        if inner.epoch != generation {
            return;
        }
        inner.status = Status::Closed;
        if inner.closing {
            return;
        }
        let lost = if inner.outage_reported {
            None
        } else {
            inner.outage_reported = true;
            Some(inner.options.on_connection_lost.clone())
        };
        schedule_reconnect(&mut inner, rc);
        lost
    };
    if let Some(on_connection_lost) = lost {
        warn!("signaling: connection lost ({reason}); reconnecting");
        on_connection_lost(reason.to_owned());
    }
}

fn schedule_reconnect(inner: &mut GatewayInner, rc: &Rc<RefCell<GatewayInner>>) {
    let delay = inner.backoff.next_delay_ms();
    debug!("signaling: next reconnect attempt in {delay}ms");
    let rc = Rc::clone(rc);
    inner._reconnect = Some(Timeout::new(delay, move || {
        if rc.borrow().closing {
            return;
        }
        if let Err(e) = open_socket(&rc) {
            warn!("signaling: reconnect attempt failed: {e:?}");
            let mut inner = rc.borrow_mut();
            schedule_reconnect(&mut inner, &rc);
        }
    }));
}

fn handle_frame(rc: &Rc<RefCell<GatewayInner>>, text: &str) {
    let msg: SignalMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("signaling: ignoring unparseable frame: {e}");
            return;
        }
    };
    match msg {
        SignalMessage::UserJoined { user_id, peer_id } => {
            let emit = {
                let mut inner = rc.borrow_mut();
                if user_id == inner.options.user_id {
                    // Our own announcement echoed back; the local identity
                    // never enters the remote collections.
                    None
                } else {
                    let member = inner
                        .members
                        .entry(peer_id.clone())
                        .or_insert_with(|| RoomMember {
                            user_id: user_id.clone(),
                            peer_addr: peer_id.clone(),
                            joined_at: SystemTime::now(),
                        })
                        .clone();
                    // At-least-once: duplicates are re-emitted and the
                    // session manager treats them as no-ops.
                    Some((member, inner.options.on_member_joined.clone()))
                }
            };
            if let Some((member, on_member_joined)) = emit {
                on_member_joined(member);
            }
        }
        SignalMessage::UserLeft { peer_id } => {
            let emit = {
                let mut inner = rc.borrow_mut();
                let member = inner.members.remove(&peer_id);
                member.map(|member| (member, inner.options.on_member_left.clone()))
            };
            match emit {
                Some((member, on_member_left)) => on_member_left(member),
                None => debug!("signaling: leave for unknown address {peer_id}"),
            }
        }
        SignalMessage::StateChange {
            user_id,
            is_mic_enabled,
            is_camera_enabled,
            ..
        } => {
            let emit = {
                let inner = rc.borrow();
                if user_id == inner.options.user_id {
                    None
                } else {
                    Some(inner.options.on_state_change.clone())
                }
            };
            if let Some(on_state_change) = emit {
                on_state_change(StateUpdate {
                    user_id,
                    mic_enabled: is_mic_enabled,
                    camera_enabled: is_camera_enabled,
                });
            }
        }
        SignalMessage::Signal {
            to,
            from,
            conn_id,
            payload,
        } => {
            let emit = {
                let inner = rc.borrow();
                if to != inner.peer_addr || from.user_id == inner.options.user_id {
                    debug!("signaling: dropping misrouted signal for {to}");
                    None
                } else {
                    Some(inner.options.on_signal.clone())
                }
            };
            if let Some(on_signal) = emit {
                on_signal(from, conn_id, payload);
            }
        }
        SignalMessage::JoinRoom { .. } => {
            debug!("signaling: unexpected join-room frame from server");
        }
    }
}
