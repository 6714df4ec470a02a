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

//! The local capture stream and its mic/camera flags.
//!
//! The session manager is the only owner of this state; everything else
//! receives read-only stream handles and must never stop tracks itself.

use wasm_bindgen::JsCast;
use web_sys::{MediaStream, MediaStreamTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackKind {
    Audio,
    Video,
}

pub(crate) struct LocalMediaState {
    stream: Option<MediaStream>,
    mic_enabled: bool,
    camera_enabled: bool,
}

impl LocalMediaState {
    pub fn new() -> Self {
        Self {
            stream: None,
            mic_enabled: true,
            camera_enabled: true,
        }
    }

    pub fn set_captured(&mut self, stream: MediaStream, mic_enabled: bool, camera_enabled: bool) {
        self.stream = Some(stream);
        self.mic_enabled = mic_enabled;
        self.camera_enabled = camera_enabled;
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.stream.clone()
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    /// Flip one modality, applying the new value to every local track of
    /// that kind. Returns the new value, or `None` when there is no stream
    /// or no track to act on.
    pub fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let stream = self.stream.as_ref()?;
        let tracks = match kind {
            TrackKind::Audio => stream.get_audio_tracks(),
            TrackKind::Video => stream.get_video_tracks(),
        };
        if tracks.length() == 0 {
            return None;
        }
        let enabled = match kind {
            TrackKind::Audio => {
                self.mic_enabled = !self.mic_enabled;
                self.mic_enabled
            }
            TrackKind::Video => {
                self.camera_enabled = !self.camera_enabled;
                self.camera_enabled
            }
        };
        for track in tracks.iter() {
            track.unchecked_ref::<MediaStreamTrack>().set_enabled(enabled);
        }
        Some(enabled)
    }

    /// Stop every capture track and drop the stream. Only teardown calls
    /// this.
    pub fn stop_tracks(&mut self) {
        if let Some(stream) = self.stream.take() {
            for track in stream.get_tracks().iter() {
                track.unchecked_ref::<MediaStreamTrack>().stop();
            }
        }
    }
}
