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

//! One remote participant's media, as delivered by their open peer link.
//!
//! Whether a remote video tile may be painted depends on two independent
//! signals agreeing: the camera flag the peer reported over state sync, and
//! the local track state. The reported flag can lag a track-level mute from
//! a network blip, and the track alone cannot see an out-of-band
//! user-driven camera-off, so neither is trusted alone. The two are
//! reconciled on every track `mute`/`unmute`/`ended` event plus a
//! low-frequency poll that catches missed events.

use crate::constants::STATE_RECONCILE_INTERVAL_MS;
use gloo::timers::callback::Interval;
use std::cell::Cell;
use std::rc::Rc;
use wasm_bindgen::prelude::Closure;
use wasm_bindgen::JsCast;
use web_sys::{MediaStream, MediaStreamTrack, MediaStreamTrackState};

/// The rendering gate. All four signals must agree before painting frames.
pub(crate) fn video_gate(reported_camera: bool, enabled: bool, muted: bool, live: bool) -> bool {
    reported_camera && enabled && !muted && live
}

pub(crate) struct RemotePeer {
    user_id: String,
    stream: MediaStream,
    /// Gate result last delivered to the UI; reconciliation only notifies
    /// on change.
    pub last_displayed: Cell<Option<bool>>,
    _poll: Interval,
    _track_hooks: Vec<Closure<dyn FnMut(web_sys::Event)>>,
}

impl RemotePeer {
    /// Wrap a freshly delivered remote stream. `on_reconcile` fires on
    /// every track mute/unmute/ended event and once a second as a safety
    /// net.
    pub fn new(user_id: String, stream: MediaStream, on_reconcile: Rc<dyn Fn(String)>) -> Self {
        let mut track_hooks = Vec::new();
        for track in stream.get_tracks().iter() {
            let track: MediaStreamTrack = track.unchecked_into();
            let hook = {
                let on_reconcile = on_reconcile.clone();
                let user_id = user_id.clone();
                Closure::wrap(Box::new(move |_: web_sys::Event| {
                    on_reconcile(user_id.clone());
                }) as Box<dyn FnMut(web_sys::Event)>)
            };
            track.set_onmute(Some(hook.as_ref().unchecked_ref()));
            track.set_onunmute(Some(hook.as_ref().unchecked_ref()));
            track.set_onended(Some(hook.as_ref().unchecked_ref()));
            track_hooks.push(hook);
        }

        let poll = {
            let on_reconcile = on_reconcile.clone();
            let user_id = user_id.clone();
            Interval::new(STATE_RECONCILE_INTERVAL_MS, move || {
                on_reconcile(user_id.clone());
            })
        };

        Self {
            user_id,
            stream,
            last_displayed: Cell::new(None),
            _poll: poll,
            _track_hooks: track_hooks,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn stream(&self) -> MediaStream {
        self.stream.clone()
    }

    /// Evaluate the rendering gate against the peer-reported camera flag.
    pub fn display_video(&self, reported_camera: bool) -> bool {
        let tracks = self.stream.get_video_tracks();
        if tracks.length() == 0 {
            return false;
        }
        let track: MediaStreamTrack = tracks.get(0).unchecked_into();
        video_gate(
            reported_camera,
            track.enabled(),
            track.muted(),
            track.ready_state() == MediaStreamTrackState::Live,
        )
    }
}

impl Drop for RemotePeer {
    fn drop(&mut self) {
        // Unhook before the closures die; the poll interval cancels itself.
        for track in self.stream.get_tracks().iter() {
            let track: MediaStreamTrack = track.unchecked_into();
            track.set_onmute(None);
            track.set_onunmute(None);
            track.set_onended(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::video_gate;

    #[test]
    fn all_signals_must_agree_to_render() {
        assert!(video_gate(true, true, false, true));
    }

    #[test]
    fn reported_true_but_track_muted_must_not_render() {
        // Regression guard: the reported flag alone is never sufficient.
        assert!(!video_gate(true, true, true, true));
    }

    #[test]
    fn track_live_but_reported_off_must_not_render() {
        assert!(!video_gate(false, true, false, true));
    }

    #[test]
    fn disabled_or_dead_tracks_never_render() {
        assert!(!video_gate(true, false, false, true));
        assert!(!video_gate(true, true, false, false));
    }
}
