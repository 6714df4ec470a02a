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

//! The Peer Session Manager: owner of the local capture stream and of every
//! peer link in the mesh.
//!
//! Discovery comes from the [`SignalingGateway`]; for each announced member
//! the manager negotiates one peer connection carrying media plus a
//! `"control"` data channel, resolves the remote user id from the signal
//! envelope (never from the transport address), and reconciles both
//! directions of simultaneous origination down to a single open link per
//! remote user. All teardown paths funnel through [`PeerSessionManager::stop`].

use super::local_media::{LocalMediaState, TrackKind};
use super::peer_link::{
    create_peer_connection, sdp_from_js, LinkId, LinkRole, LinkState, PeerLink,
};
use super::registry::{LinkRegistry, OpenOutcome};
use super::remote_peer::RemotePeer;
use crate::media_devices::{request_user_media, CaptureError};
use crate::signaling::{RoomMember, SignalingGateway, SignalingGatewayOptions};
use crate::state_sync::{PeerMediaState, StateOrigin, StateTable, StateUpdate};
use log::{debug, error, warn};
use meshcall_types::{ControlMessage, PeerTag, SignalMessage, SignalPayload};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::rc::Rc;
use wasm_bindgen::prelude::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    MediaStream, MediaStreamTrack, MessageEvent, RtcDataChannel, RtcDataChannelEvent,
    RtcIceCandidateInit, RtcIceConnectionState, RtcPeerConnection, RtcPeerConnectionIceEvent,
    RtcSdpType, RtcSessionDescriptionInit, RtcTrackEvent,
};

/// Session-level failures exposed through `last_error` and the error
/// callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Device capture failed for every modality.
    Capture(CaptureError),
    /// A peer link could not be negotiated. The link is discarded and not
    /// retried; the peer may simply have left.
    NegotiationFailed { user_id: String },
    /// The signaling channel dropped. Reconnection with backoff is already
    /// underway; established links keep running.
    TransportDisconnected { reason: String },
    /// A toggle was requested with no usable stream.
    ToggleWithoutStream,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Capture(e) => write!(f, "{e}"),
            SessionError::NegotiationFailed { user_id } => {
                write!(f, "could not establish a media link to {user_id}")
            }
            SessionError::TransportDisconnected { reason } => {
                write!(f, "signaling connection lost: {reason}")
            }
            SessionError::ToggleWithoutStream => {
                write!(f, "no active media stream to toggle")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Idle,
    Starting,
    Running,
    Stopped,
}

/// Options for constructing a [`PeerSessionManager`].
///
/// The callbacks are how the UI layer observes the session; every one of
/// them defaults to a no-op so consumers only wire what they render.
#[derive(Clone)]
pub struct PeerSessionManagerOptions {
    pub meeting_id: String,
    pub user_id: String,

    /// URL of the voice signaling channel.
    pub signaling_url: String,

    /// STUN/TURN urls; a default public STUN server is used when empty.
    pub ice_servers: Vec<String>,

    /// Called on every successful signaling (re)connect.
    pub on_connected: Rc<dyn Fn()>,

    /// Called once per signaling outage. Established links keep running.
    pub on_connection_lost: Rc<dyn Fn(String)>,

    /// Called when local capture succeeds, with the (read-only) stream.
    pub on_local_stream: Rc<dyn Fn(MediaStream)>,

    /// Called when a remote participant's stream becomes available.
    pub on_remote_stream_added: Rc<dyn Fn(String, MediaStream)>,

    /// Called when a remote participant's stream goes away.
    pub on_remote_stream_removed: Rc<dyn Fn(String)>,

    /// Called when a remote participant's reported state changes, or when
    /// track-level reconciliation flips the rendering gate.
    pub on_remote_state_changed: Rc<dyn Fn(String, PeerMediaState)>,

    /// Called for surfaced session errors (see [`SessionError`]).
    pub on_session_error: Rc<dyn Fn(SessionError)>,
}

impl PeerSessionManagerOptions {
    /// Options with no-op callbacks; set the ones the UI cares about.
    pub fn new(meeting_id: &str, user_id: &str, signaling_url: &str) -> Self {
        Self {
            meeting_id: meeting_id.to_owned(),
            user_id: user_id.to_owned(),
            signaling_url: signaling_url.to_owned(),
            ice_servers: Vec::new(),
            on_connected: Rc::new(|| {}),
            on_connection_lost: Rc::new(|_| {}),
            on_local_stream: Rc::new(|_| {}),
            on_remote_stream_added: Rc::new(|_, _| {}),
            on_remote_stream_removed: Rc::new(|_| {}),
            on_remote_state_changed: Rc::new(|_, _| {}),
            on_session_error: Rc::new(|_| {}),
        }
    }
}

struct Inner {
    options: PeerSessionManagerOptions,
    phase: SessionPhase,
    local: LocalMediaState,
    gateway: Option<SignalingGateway>,
    registry: LinkRegistry,
    links: HashMap<LinkId, PeerLink>,
    remotes: HashMap<String, RemotePeer>,
    states: StateTable,
    last_error: Option<SessionError>,
}

impl Inner {
    fn local_tag(&self) -> Option<PeerTag> {
        self.gateway.as_ref().map(|gw| PeerTag {
            user_id: self.options.user_id.clone(),
            peer_id: gw.peer_addr(),
        })
    }
}

/// The media session for one meeting.
///
/// Construct with [`new`](Self::new), then [`start`](Self::start). All exit
/// paths (explicit stop, view unmount, navigation) must call
/// [`stop`](Self::stop); it is safe to call repeatedly and while a start is
/// still in flight.
#[derive(Clone)]
pub struct PeerSessionManager {
    inner: Rc<RefCell<Inner>>,
}

impl PeerSessionManager {
    pub fn new(options: PeerSessionManagerOptions) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                options,
                phase: SessionPhase::Idle,
                local: LocalMediaState::new(),
                gateway: None,
                registry: LinkRegistry::new(),
                links: HashMap::new(),
                remotes: HashMap::new(),
                states: StateTable::new(),
                last_error: None,
            })),
        }
    }

    /// Acquire local media, connect to signaling and begin forming links.
    ///
    /// Asynchronous; progress and failures are reported through the option
    /// callbacks and [`last_error`](Self::last_error).
    pub fn start(&self) {
        let rc = Rc::clone(&self.inner);
        wasm_bindgen_futures::spawn_local(async move {
            run_start(rc).await;
        });
    }

    /// The single teardown funnel: cancels an in-flight capture, stops all
    /// local tracks, closes every link and disconnects from signaling.
    pub fn stop(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.phase == SessionPhase::Stopped {
            return;
        }
        debug!("session: stopping");
        inner.phase = SessionPhase::Stopped;
        inner.local.stop_tracks();
        for (_, mut link) in inner.links.drain() {
            link.close();
        }
        inner.registry.clear();
        // Dropping the remotes cancels their reconcile polls and unhooks
        // track listeners.
        inner.remotes.clear();
        inner.states.clear();
        if let Some(gateway) = inner.gateway.take() {
            gateway.disconnect();
        }
    }

    /// Flip the microphone. `false` when there is no stream or no audio
    /// track to act on.
    pub fn toggle_mic(&self) -> bool {
        self.toggle(TrackKind::Audio)
    }

    /// Flip the camera. `false` when there is no stream or no video track
    /// to act on.
    pub fn toggle_camera(&self) -> bool {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&self, kind: TrackKind) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.local.toggle(kind).is_none() {
            debug!("session: toggle {kind:?} without a usable stream");
            return false;
        }
        let msg = ControlMessage::state_change(
            &inner.options.user_id,
            inner.local.mic_enabled(),
            inner.local.camera_enabled(),
        );
        // Primary transport: every open control channel.
        for link in inner.links.values().filter(|l| l.state == LinkState::Open) {
            link.send_control(&msg);
        }
        // Best-effort mirror over signaling, in case a control channel has
        // not opened yet.
        let mirror = SignalMessage::StateChange {
            meeting_id: Some(inner.options.meeting_id.clone()),
            user_id: inner.options.user_id.clone(),
            is_mic_enabled: Some(inner.local.mic_enabled()),
            is_camera_enabled: Some(inner.local.camera_enabled()),
        };
        if let Some(gateway) = inner.gateway.clone() {
            drop(inner);
            gateway.send(&mirror);
        }
        true
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.inner.borrow().local.stream()
    }

    pub fn mic_enabled(&self) -> bool {
        self.inner.borrow().local.mic_enabled()
    }

    pub fn camera_enabled(&self) -> bool {
        self.inner.borrow().local.camera_enabled()
    }

    /// Remote streams keyed by user id, sorted alphabetically.
    pub fn remote_streams(&self) -> Vec<(String, MediaStream)> {
        let inner = self.inner.borrow();
        let mut streams: Vec<(String, MediaStream)> = inner
            .remotes
            .values()
            .map(|remote| (remote.user_id().to_owned(), remote.stream()))
            .collect();
        streams.sort_by(|a, b| a.0.cmp(&b.0));
        streams
    }

    /// Reported mic/camera flags for every remote participant.
    pub fn remote_states(&self) -> HashMap<String, PeerMediaState> {
        self.inner.borrow().states.snapshot()
    }

    /// The rendering gate for a remote tile: reported camera flag AND
    /// track-level liveness must both agree.
    pub fn should_display_video(&self, user_id: &str) -> bool {
        let inner = self.inner.borrow();
        let Some(remote) = inner.remotes.get(user_id) else {
            return false;
        };
        let reported = inner.states.get(user_id).unwrap_or_default();
        remote.display_video(reported.camera_enabled)
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .borrow()
            .gateway
            .as_ref()
            .is_some_and(|gw| gw.is_connected())
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.borrow().last_error.clone()
    }
}

async fn run_start(rc: Rc<RefCell<Inner>>) {
    {
        let mut inner = rc.borrow_mut();
        if inner.phase != SessionPhase::Idle {
            warn!("session: start() on a session that is not idle; ignoring");
            return;
        }
        inner.phase = SessionPhase::Starting;
    }

    // Suspension point: the permission prompt. stop() may have run by the
    // time this resolves.
    let captured = request_user_media().await;

    let media = match captured {
        Ok(media) => media,
        Err(e) => {
            error!("session: capture failed: {e}");
            let (cb, err) = {
                let mut inner = rc.borrow_mut();
                inner.phase = SessionPhase::Stopped;
                let err = SessionError::Capture(e);
                inner.last_error = Some(err.clone());
                (inner.options.on_session_error.clone(), err)
            };
            cb(err);
            return;
        }
    };

    let on_local = {
        let mut inner = rc.borrow_mut();
        if inner.phase == SessionPhase::Stopped {
            // A cancelled start owns whatever it captured.
            for track in media.stream.get_tracks().iter() {
                track.unchecked_ref::<MediaStreamTrack>().stop();
            }
            return;
        }
        inner
            .local
            .set_captured(media.stream.clone(), media.mic_enabled, media.camera_enabled);
        inner.options.on_local_stream.clone()
    };
    on_local(media.stream.clone());

    let gateway_options = gateway_options(&rc);
    match SignalingGateway::connect(gateway_options) {
        Ok(gateway) => {
            let mut inner = rc.borrow_mut();
            if inner.phase == SessionPhase::Stopped {
                gateway.disconnect();
                return;
            }
            inner.gateway = Some(gateway);
            inner.phase = SessionPhase::Running;
        }
        Err(e) => {
            let (cb, err) = {
                let mut inner = rc.borrow_mut();
                inner.phase = SessionPhase::Stopped;
                inner.local.stop_tracks();
                let err = SessionError::TransportDisconnected {
                    reason: e.to_string(),
                };
                inner.last_error = Some(err.clone());
                (inner.options.on_session_error.clone(), err)
            };
            cb(err);
        }
    }
}

fn gateway_options(rc: &Rc<RefCell<Inner>>) -> SignalingGatewayOptions {
    let inner = rc.borrow();
    let weak = Rc::downgrade(rc);
    SignalingGatewayOptions {
        url: inner.options.signaling_url.clone(),
        meeting_id: inner.options.meeting_id.clone(),
        user_id: inner.options.user_id.clone(),
        on_connected: {
            let weak = weak.clone();
            Rc::new(move |_peer_addr| {
                if let Some(rc) = weak.upgrade() {
                    let cb = rc.borrow().options.on_connected.clone();
                    cb();
                }
            })
        },
        on_connection_lost: {
            let weak = weak.clone();
            Rc::new(move |reason: String| {
                if let Some(rc) = weak.upgrade() {
                    let cb = {
                        let mut inner = rc.borrow_mut();
                        inner.last_error = Some(SessionError::TransportDisconnected {
                            reason: reason.clone(),
                        });
                        inner.options.on_connection_lost.clone()
                    };
                    cb(reason);
                }
            })
        },
        on_member_joined: {
            let weak = weak.clone();
            Rc::new(move |member: RoomMember| {
                if let Some(rc) = weak.upgrade() {
                    handle_member_joined(&rc, member);
                }
            })
        },
        on_member_left: {
            let weak = weak.clone();
            Rc::new(move |member: RoomMember| {
                if let Some(rc) = weak.upgrade() {
                    handle_member_left(&rc, member);
                }
            })
        },
        on_signal: {
            let weak = weak.clone();
            Rc::new(move |from: PeerTag, conn_id: String, payload: SignalPayload| {
                if let Some(rc) = weak.upgrade() {
                    handle_signal(&rc, from, conn_id, payload);
                }
            })
        },
        on_state_change: {
            let weak = weak.clone();
            Rc::new(move |update: StateUpdate| {
                if let Some(rc) = weak.upgrade() {
                    handle_state_update(&rc, StateOrigin::Signaling, update);
                }
            })
        },
    }
}

fn handle_member_joined(rc: &Rc<RefCell<Inner>>, member: RoomMember) {
    let link_id = {
        let mut inner = rc.borrow_mut();
        if inner.phase != SessionPhase::Running {
            return;
        }
        let Some(local_addr) = inner.gateway.as_ref().map(|gw| gw.peer_addr()) else {
            return;
        };
        let Some((id, conn_id)) =
            inner
                .registry
                .begin_outbound(&member.user_id, &member.peer_addr, &local_addr)
        else {
            debug!("session: already have a link toward {}", member.peer_addr);
            return;
        };
        let pc = match create_peer_connection(&inner.options.ice_servers) {
            Ok(pc) => pc,
            Err(e) => {
                warn!("session: peer connection for {} failed: {e:?}", member.user_id);
                inner.registry.forget(id);
                return;
            }
        };
        let mut link = PeerLink::new(
            id,
            LinkRole::Outbound,
            member.user_id.clone(),
            member.peer_addr.clone(),
            conn_id,
            pc,
        );
        attach_local_tracks(&inner, &link.pc);
        wire_pc(rc, id, &link.pc, LinkRole::Outbound);
        let dc = link.pc.create_data_channel(crate::constants::CONTROL_CHANNEL_LABEL);
        wire_control(rc, id, &dc);
        link.control = Some(dc);
        inner.links.insert(id, link);
        debug!("session: originating link {id} to {}", member.user_id);
        id
    };
    let rc = Rc::clone(rc);
    wasm_bindgen_futures::spawn_local(async move {
        send_offer(rc, link_id).await;
    });
}

fn handle_member_left(rc: &Rc<RefCell<Inner>>, member: RoomMember) {
    let removed = {
        let mut inner = rc.borrow_mut();
        let ids = inner.registry.drop_addr(&member.peer_addr);
        for id in &ids {
            if let Some(mut link) = inner.links.remove(id) {
                link.close();
            }
        }
        // Drop the remote's media only when no other link still serves the
        // user (they may have rejoined under a fresh address already).
        if inner.registry.open_link_for_user(&member.user_id).is_none()
            && inner.remotes.remove(&member.user_id).is_some()
        {
            inner.states.remove(&member.user_id);
            Some((
                member.user_id.clone(),
                inner.options.on_remote_stream_removed.clone(),
            ))
        } else {
            None
        }
    };
    if let Some((user_id, on_removed)) = removed {
        debug!("session: {user_id} left");
        on_removed(user_id);
    }
}

fn handle_signal(rc: &Rc<RefCell<Inner>>, from: PeerTag, conn_id: String, payload: SignalPayload) {
    match payload {
        SignalPayload::Offer { sdp } => handle_offer(rc, from, conn_id, sdp),
        SignalPayload::Answer { sdp } => {
            let found = {
                let inner = rc.borrow();
                inner
                    .registry
                    .link_for_conn(&conn_id)
                    .and_then(|id| inner.links.get(&id))
                    .filter(|link| link.state == LinkState::Connecting)
                    .map(|link| (link.id, link.pc.clone()))
            };
            let Some((id, pc)) = found else {
                debug!("session: answer for unknown connection {conn_id}");
                return;
            };
            let rc = Rc::clone(rc);
            wasm_bindgen_futures::spawn_local(async move {
                apply_remote_description(rc, id, pc, RtcSdpType::Answer, sdp).await;
            });
        }
        SignalPayload::IceCandidate {
            candidate,
            sdp_mid,
            sdp_m_line_index,
        } => {
            let pc = {
                let inner = rc.borrow();
                inner
                    .registry
                    .link_for_conn(&conn_id)
                    .and_then(|id| inner.links.get(&id))
                    .filter(|link| link.state != LinkState::Closed)
                    .map(|link| link.pc.clone())
            };
            let Some(pc) = pc else {
                debug!("session: candidate for unknown connection {conn_id}");
                return;
            };
            let init = RtcIceCandidateInit::new(&candidate);
            init.set_sdp_mid(sdp_mid.as_deref());
            init.set_sdp_m_line_index(sdp_m_line_index);
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(e) = JsFuture::from(
                    pc.add_ice_candidate_with_opt_rtc_ice_candidate_init(Some(&init)),
                )
                .await
                {
                    debug!("session: addIceCandidate failed: {e:?}");
                }
            });
        }
    }
}

fn handle_offer(rc: &Rc<RefCell<Inner>>, from: PeerTag, conn_id: String, sdp: String) {
    let link_id = {
        let mut inner = rc.borrow_mut();
        if inner.phase != SessionPhase::Running {
            return;
        }
        let Some(id) = inner
            .registry
            .begin_inbound(&from.user_id, &from.peer_id, &conn_id)
        else {
            debug!("session: duplicate offer on connection {conn_id}");
            return;
        };
        let pc = match create_peer_connection(&inner.options.ice_servers) {
            Ok(pc) => pc,
            Err(e) => {
                warn!("session: peer connection for {} failed: {e:?}", from.user_id);
                inner.registry.forget(id);
                return;
            }
        };
        let link = PeerLink::new(
            id,
            LinkRole::Inbound,
            from.user_id.clone(),
            from.peer_id.clone(),
            conn_id,
            pc,
        );
        // Answer with our media; the control channel arrives from the
        // offerer via ondatachannel.
        attach_local_tracks(&inner, &link.pc);
        wire_pc(rc, id, &link.pc, LinkRole::Inbound);
        inner.links.insert(id, link);
        debug!("session: answering inbound link {id} from {}", from.user_id);
        id
    };
    let rc = Rc::clone(rc);
    wasm_bindgen_futures::spawn_local(async move {
        answer_offer(rc, link_id, sdp).await;
    });
}

fn attach_local_tracks(inner: &Inner, pc: &RtcPeerConnection) {
    if let Some(stream) = inner.local.stream() {
        for track in stream.get_tracks().iter() {
            let track: MediaStreamTrack = track.unchecked_into();
            pc.add_track(&track, &stream, &js_sys::Array::new());
        }
    }
}

async fn send_offer(rc: Rc<RefCell<Inner>>, id: LinkId) {
    let Some(pc) = connecting_pc(&rc, id) else {
        return;
    };
    let offer = match JsFuture::from(pc.create_offer()).await {
        Ok(offer) => offer,
        Err(e) => return negotiation_failed(&rc, id, &format!("createOffer: {e:?}")),
    };
    let Some(sdp) = sdp_from_js(&offer) else {
        return negotiation_failed(&rc, id, "offer without sdp");
    };
    let desc = RtcSessionDescriptionInit::new(RtcSdpType::Offer);
    desc.set_sdp(&sdp);
    if let Err(e) = JsFuture::from(pc.set_local_description(&desc)).await {
        return negotiation_failed(&rc, id, &format!("setLocalDescription: {e:?}"));
    }
    relay_signal(&rc, id, SignalPayload::Offer { sdp });
}

async fn answer_offer(rc: Rc<RefCell<Inner>>, id: LinkId, remote_sdp: String) {
    let Some(pc) = connecting_pc(&rc, id) else {
        return;
    };
    let remote = RtcSessionDescriptionInit::new(RtcSdpType::Offer);
    remote.set_sdp(&remote_sdp);
    if let Err(e) = JsFuture::from(pc.set_remote_description(&remote)).await {
        return negotiation_failed(&rc, id, &format!("setRemoteDescription: {e:?}"));
    }
    let answer = match JsFuture::from(pc.create_answer()).await {
        Ok(answer) => answer,
        Err(e) => return negotiation_failed(&rc, id, &format!("createAnswer: {e:?}")),
    };
    let Some(sdp) = sdp_from_js(&answer) else {
        return negotiation_failed(&rc, id, "answer without sdp");
    };
    let desc = RtcSessionDescriptionInit::new(RtcSdpType::Answer);
    desc.set_sdp(&sdp);
    if let Err(e) = JsFuture::from(pc.set_local_description(&desc)).await {
        return negotiation_failed(&rc, id, &format!("setLocalDescription: {e:?}"));
    }
    relay_signal(&rc, id, SignalPayload::Answer { sdp });
}

async fn apply_remote_description(
    rc: Rc<RefCell<Inner>>,
    id: LinkId,
    pc: RtcPeerConnection,
    sdp_type: RtcSdpType,
    sdp: String,
) {
    let desc = RtcSessionDescriptionInit::new(sdp_type);
    desc.set_sdp(&sdp);
    if let Err(e) = JsFuture::from(pc.set_remote_description(&desc)).await {
        negotiation_failed(&rc, id, &format!("setRemoteDescription: {e:?}"));
    }
}

/// The link's peer connection, provided the link is still negotiating.
fn connecting_pc(rc: &Rc<RefCell<Inner>>, id: LinkId) -> Option<RtcPeerConnection> {
    let inner = rc.borrow();
    inner
        .links
        .get(&id)
        .filter(|link| link.state == LinkState::Connecting)
        .map(|link| link.pc.clone())
}

fn relay_signal(rc: &Rc<RefCell<Inner>>, id: LinkId, payload: SignalPayload) {
    let frame = {
        let inner = rc.borrow();
        match (inner.links.get(&id), inner.local_tag(), inner.gateway.clone()) {
            (Some(link), Some(from), Some(gateway)) => Some((
                gateway,
                SignalMessage::Signal {
                    to: link.peer_addr.clone(),
                    from,
                    conn_id: link.conn_id.clone(),
                    payload,
                },
            )),
            _ => None,
        }
    };
    if let Some((gateway, frame)) = frame {
        gateway.send(&frame);
    }
}

/// Negotiation failure: log, discard the link, no retry.
fn negotiation_failed(rc: &Rc<RefCell<Inner>>, id: LinkId, detail: &str) {
    let mut inner = rc.borrow_mut();
    let Some(mut link) = inner.links.remove(&id) else {
        return;
    };
    warn!(
        "session: negotiation with {} failed ({detail}); dropping link {id}",
        link.user_id
    );
    link.close();
    inner.registry.forget(id);
}

fn wire_pc(rc: &Rc<RefCell<Inner>>, id: LinkId, pc: &RtcPeerConnection, role: LinkRole) {
    let onicecandidate = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |ev: RtcPeerConnectionIceEvent| {
            let Some(rc) = weak.upgrade() else { return };
            if let Some(candidate) = ev.candidate() {
                relay_signal(
                    &rc,
                    id,
                    SignalPayload::IceCandidate {
                        candidate: candidate.candidate(),
                        sdp_mid: candidate.sdp_mid(),
                        sdp_m_line_index: candidate.sdp_m_line_index(),
                    },
                );
            }
        }) as Box<dyn FnMut(RtcPeerConnectionIceEvent)>)
    };
    pc.set_onicecandidate(Some(onicecandidate.as_ref().unchecked_ref()));
    onicecandidate.forget();

    let ontrack = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |ev: RtcTrackEvent| {
            if let Some(rc) = weak.upgrade() {
                handle_track(&rc, id, ev);
            }
        }) as Box<dyn FnMut(RtcTrackEvent)>)
    };
    pc.set_ontrack(Some(ontrack.as_ref().unchecked_ref()));
    ontrack.forget();

    let onstate = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |_: JsValue| {
            if let Some(rc) = weak.upgrade() {
                handle_ice_state(&rc, id);
            }
        }) as Box<dyn FnMut(JsValue)>)
    };
    pc.set_oniceconnectionstatechange(Some(onstate.as_ref().unchecked_ref()));
    onstate.forget();

    if role == LinkRole::Inbound {
        let ondatachannel = {
            let weak = Rc::downgrade(rc);
            Closure::wrap(Box::new(move |ev: RtcDataChannelEvent| {
                let Some(rc) = weak.upgrade() else { return };
                let dc = ev.channel();
                wire_control(&rc, id, &dc);
                let mut inner = rc.borrow_mut();
                if let Some(link) = inner.links.get_mut(&id) {
                    link.control = Some(dc);
                }
            }) as Box<dyn FnMut(RtcDataChannelEvent)>)
        };
        pc.set_ondatachannel(Some(ondatachannel.as_ref().unchecked_ref()));
        ondatachannel.forget();
    }
}

fn wire_control(rc: &Rc<RefCell<Inner>>, id: LinkId, dc: &RtcDataChannel) {
    let onopen = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |_: JsValue| {
            if let Some(rc) = weak.upgrade() {
                handle_control_open(&rc, id);
            }
        }) as Box<dyn FnMut(JsValue)>)
    };
    dc.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    onopen.forget();

    let onmessage = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |ev: MessageEvent| {
            let Some(rc) = weak.upgrade() else { return };
            let Ok(text) = ev.data().dyn_into::<js_sys::JsString>() else {
                return;
            };
            match serde_json::from_str::<ControlMessage>(&String::from(text)) {
                Ok(msg) => handle_state_update(&rc, StateOrigin::ControlChannel, msg.into()),
                Err(e) => debug!("session: unparseable control frame: {e}"),
            }
        }) as Box<dyn FnMut(MessageEvent)>)
    };
    dc.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();

    let onclose = {
        let weak = Rc::downgrade(rc);
        Closure::wrap(Box::new(move |_: JsValue| {
            let Some(rc) = weak.upgrade() else { return };
            let mut inner = rc.borrow_mut();
            if let Some(link) = inner.links.get_mut(&id) {
                link.control_open = false;
            }
        }) as Box<dyn FnMut(JsValue)>)
    };
    dc.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    onclose.forget();
}

/// A control channel opened: push our full current state so the other side
/// observes correct initial flags without waiting for a toggle.
fn handle_control_open(rc: &Rc<RefCell<Inner>>, id: LinkId) {
    let mut inner = rc.borrow_mut();
    let msg = ControlMessage::state_change(
        &inner.options.user_id,
        inner.local.mic_enabled(),
        inner.local.camera_enabled(),
    );
    if let Some(link) = inner.links.get_mut(&id) {
        link.control_open = true;
        link.send_control(&msg);
        debug!("session: control channel to {} open", link.user_id);
    }
}

/// Media arrived on a link: decide whether it is the winning link for its
/// user and surface the stream.
fn handle_track(rc: &Rc<RefCell<Inner>>, id: LinkId, ev: RtcTrackEvent) {
    let emit = {
        let mut inner = rc.borrow_mut();
        let Some(link) = inner.links.get(&id) else {
            return;
        };
        if link.state != LinkState::Connecting {
            // Second track of an already-open stream.
            return;
        }
        let user_id = link.user_id.clone();

        let stream: MediaStream = {
            let streams = ev.streams();
            if streams.length() > 0 {
                streams.get(0).unchecked_into()
            } else {
                match MediaStream::new() {
                    Ok(stream) => {
                        stream.add_track(&ev.track());
                        stream
                    }
                    Err(e) => {
                        warn!("session: could not wrap remote track: {e:?}");
                        return;
                    }
                }
            }
        };

        match inner.registry.mark_open(id) {
            Some(OpenOutcome::Opened) => {
                if let Some(link) = inner.links.get_mut(&id) {
                    link.state = LinkState::Open;
                }
                let on_reconcile: Rc<dyn Fn(String)> = {
                    let weak = Rc::downgrade(rc);
                    Rc::new(move |user: String| {
                        if let Some(rc) = weak.upgrade() {
                            handle_reconcile(&rc, &user);
                        }
                    })
                };
                let remote = RemotePeer::new(user_id.clone(), stream.clone(), on_reconcile);
                inner.remotes.insert(user_id.clone(), remote);
                inner.states.ensure(&user_id);
                debug!("session: link {id} to {user_id} is open");
                Some((
                    user_id,
                    stream,
                    inner.options.on_remote_stream_added.clone(),
                ))
            }
            Some(OpenOutcome::Duplicate { keep }) => {
                debug!(
                    "session: duplicate link to {user_id}; keeping {keep}, closing {id}"
                );
                if let Some(mut link) = inner.links.remove(&id) {
                    link.close();
                }
                inner.registry.forget(id);
                None
            }
            None => {
                // The member left while we negotiated.
                if let Some(mut link) = inner.links.remove(&id) {
                    link.close();
                }
                None
            }
        }
    };
    if let Some((user_id, stream, on_added)) = emit {
        on_added(user_id, stream);
    }
}

fn handle_ice_state(rc: &Rc<RefCell<Inner>>, id: LinkId) {
    let emit = {
        let mut inner = rc.borrow_mut();
        let Some(link) = inner.links.get(&id) else {
            return;
        };
        let ice_state = link.pc.ice_connection_state();
        match ice_state {
            RtcIceConnectionState::Failed | RtcIceConnectionState::Closed => {
                let was_open = link.state == LinkState::Open;
                let user_id = link.user_id.clone();
                if let Some(mut link) = inner.links.remove(&id) {
                    link.close();
                }
                inner.registry.forget(id);
                if was_open {
                    // Terminal: the member must rejoin for a new link.
                    if inner.registry.open_link_for_user(&user_id).is_none()
                        && inner.remotes.remove(&user_id).is_some()
                    {
                        inner.states.remove(&user_id);
                        warn!("session: open link to {user_id} dropped ({ice_state:?})");
                        Some((user_id, inner.options.on_remote_stream_removed.clone()))
                    } else {
                        None
                    }
                } else {
                    warn!("session: negotiation with {user_id} failed ({ice_state:?})");
                    None
                }
            }
            RtcIceConnectionState::Disconnected => {
                debug!("session: link {id} ice state disconnected");
                None
            }
            _ => None,
        }
    };
    if let Some((user_id, on_removed)) = emit {
        on_removed(user_id);
    }
}

/// One merge path for both transports (§ per-field merge in `state_sync`).
fn handle_state_update(rc: &Rc<RefCell<Inner>>, origin: StateOrigin, update: StateUpdate) {
    let emit = {
        let mut inner = rc.borrow_mut();
        if update.user_id == inner.options.user_id {
            return;
        }
        let user_id = update.user_id.clone();
        let changed = inner.states.apply(origin, update);
        changed.map(|state| {
            // Refresh the gate cache so reconciliation does not re-emit
            // for the same effective change.
            if let Some(remote) = inner.remotes.get(&user_id) {
                remote
                    .last_displayed
                    .set(Some(remote.display_video(state.camera_enabled)));
            }
            (
                user_id,
                state,
                inner.options.on_remote_state_changed.clone(),
            )
        })
    };
    if let Some((user_id, state, on_changed)) = emit {
        on_changed(user_id, state);
    }
}

/// Track event or 1 Hz poll: re-evaluate the rendering gate and notify the
/// UI only when its result flips.
fn handle_reconcile(rc: &Rc<RefCell<Inner>>, user_id: &str) {
    let emit = {
        let inner = rc.borrow();
        let Some(remote) = inner.remotes.get(user_id) else {
            return;
        };
        let reported = inner.states.get(user_id).unwrap_or_default();
        let display = remote.display_video(reported.camera_enabled);
        if remote.last_displayed.replace(Some(display)) == Some(display) {
            None
        } else {
            Some((
                user_id.to_owned(),
                reported,
                inner.options.on_remote_state_changed.clone(),
            ))
        }
    };
    if let Some((user_id, state, on_changed)) = emit {
        on_changed(user_id, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_render_for_the_ui() {
        let err = SessionError::NegotiationFailed {
            user_id: "bob".into(),
        };
        assert_eq!(err.to_string(), "could not establish a media link to bob");

        let err = SessionError::TransportDisconnected {
            reason: "code 1006".into(),
        };
        assert_eq!(
            err.to_string(),
            "signaling connection lost: code 1006"
        );

        assert_eq!(
            SessionError::ToggleWithoutStream.to_string(),
            "no active media stream to toggle"
        );
    }
}
