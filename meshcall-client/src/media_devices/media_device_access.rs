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

//! Camera and microphone acquisition with graceful degradation.
//!
//! The capture ladder: one combined audio+video request first; if the
//! browser refuses it, independent audio-only and video-only requests, and
//! whatever succeeds is merged into a single stream. Losing one modality
//! only disables that modality's flag. Only when nothing at all is granted
//! does capture fail, with the error categorized from the `DOMException`
//! name so the UI can show one meaningful message.

use crate::constants::{VIDEO_HEIGHT, VIDEO_WIDTH};
use gloo::utils::window;
use log::warn;
use std::fmt::Display;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{DomException, MediaStream, MediaStreamConstraints, MediaTrackConstraints};

/// Why capture failed, per modality or in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorKind {
    /// The user (or a policy) refused device access.
    PermissionDenied,
    /// No matching capture hardware exists.
    DeviceNotFound,
    Unknown,
}

impl Display for CaptureErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureErrorKind::PermissionDenied => write!(f, "camera/microphone access was denied"),
            CaptureErrorKind::DeviceNotFound => write!(f, "no camera or microphone was found"),
            CaptureErrorKind::Unknown => write!(f, "could not access media devices"),
        }
    }
}

/// A categorized capture failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureError {
    pub kind: CaptureErrorKind,
    pub message: String,
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of a successful (possibly degraded) capture.
pub struct CapturedMedia {
    pub stream: MediaStream,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
}

/// Map a `DOMException` name to the error taxonomy. The legacy spellings
/// are still emitted by some engines.
pub(crate) fn categorize(name: &str) -> CaptureErrorKind {
    match name {
        "NotAllowedError" | "PermissionDeniedError" => CaptureErrorKind::PermissionDenied,
        "NotFoundError" | "DevicesNotFoundError" => CaptureErrorKind::DeviceNotFound,
        _ => CaptureErrorKind::Unknown,
    }
}

/// Flags for a split-request fallback. `None` means nothing was granted.
pub(crate) fn fallback_flags(audio_ok: bool, video_ok: bool) -> Option<(bool, bool)> {
    match (audio_ok, video_ok) {
        (true, true) => Some((true, true)),
        (true, false) => Some((true, false)),
        (false, true) => Some((false, true)),
        (false, false) => None,
    }
}

fn capture_error_from_js(error: &JsValue) -> CaptureError {
    match error.dyn_ref::<DomException>() {
        Some(dom) => CaptureError {
            kind: categorize(&dom.name()),
            message: dom.message(),
        },
        None => CaptureError {
            kind: CaptureErrorKind::Unknown,
            message: format!("{error:?}"),
        },
    }
}

/// `{ ideal: value }` constraint object.
fn constrain_ideal(value: u32) -> JsValue {
    let range = js_sys::Object::new();
    let _ = js_sys::Reflect::set(
        &range,
        &JsValue::from_str("ideal"),
        &JsValue::from_f64(value as f64),
    );
    range.into()
}

fn video_constraints() -> MediaTrackConstraints {
    let video = MediaTrackConstraints::new();
    video.set_width(&constrain_ideal(VIDEO_WIDTH));
    video.set_height(&constrain_ideal(VIDEO_HEIGHT));
    video.set_facing_mode(&JsValue::from_str("user"));
    video
}

fn constraints(audio: bool, video: bool) -> MediaStreamConstraints {
    let c = MediaStreamConstraints::new();
    c.set_audio(&JsValue::from_bool(audio));
    if video {
        c.set_video(&video_constraints().into());
    } else {
        c.set_video(&JsValue::from_bool(false));
    }
    c
}

async fn get_user_media(constraints: &MediaStreamConstraints) -> Result<MediaStream, JsValue> {
    let media_devices = window().navigator().media_devices()?;
    let promise = media_devices.get_user_media_with_constraints(constraints)?;
    let stream = JsFuture::from(promise).await?;
    Ok(stream.unchecked_into::<MediaStream>())
}

fn adopt_tracks(target: &MediaStream, source: &MediaStream) {
    for track in source.get_tracks().iter() {
        target.add_track(track.unchecked_ref());
    }
}

/// Run the capture ladder.
pub(crate) async fn request_user_media() -> Result<CapturedMedia, CaptureError> {
    let combined_error = match get_user_media(&constraints(true, true)).await {
        Ok(stream) => {
            return Ok(CapturedMedia {
                stream,
                mic_enabled: true,
                camera_enabled: true,
            })
        }
        Err(e) => e,
    };
    warn!(
        "combined capture failed ({:?}), retrying one modality at a time",
        capture_error_from_js(&combined_error).kind
    );

    let audio = get_user_media(&constraints(true, false)).await.ok();
    let video = get_user_media(&constraints(false, true)).await.ok();

    let Some((mic_enabled, camera_enabled)) = fallback_flags(audio.is_some(), video.is_some())
    else {
        // Nothing granted at all; report the original combined failure.
        return Err(capture_error_from_js(&combined_error));
    };

    let stream = match (audio, video) {
        (Some(audio), Some(video)) => {
            let merged = MediaStream::new().map_err(|e| capture_error_from_js(&e))?;
            adopt_tracks(&merged, &audio);
            adopt_tracks(&merged, &video);
            merged
        }
        (Some(single), None) | (None, Some(single)) => single,
        (None, None) => return Err(capture_error_from_js(&combined_error)),
    };

    Ok(CapturedMedia {
        stream,
        mic_enabled,
        camera_enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dom_exception_names_map_to_the_taxonomy() {
        assert_eq!(
            categorize("NotAllowedError"),
            CaptureErrorKind::PermissionDenied
        );
        assert_eq!(
            categorize("PermissionDeniedError"),
            CaptureErrorKind::PermissionDenied
        );
        assert_eq!(categorize("NotFoundError"), CaptureErrorKind::DeviceNotFound);
        assert_eq!(
            categorize("DevicesNotFoundError"),
            CaptureErrorKind::DeviceNotFound
        );
        assert_eq!(categorize("AbortError"), CaptureErrorKind::Unknown);
        assert_eq!(categorize(""), CaptureErrorKind::Unknown);
    }

    #[test]
    fn single_modality_grant_degrades_instead_of_failing() {
        // Video denied, audio granted: the session starts audio-only.
        assert_eq!(fallback_flags(true, false), Some((true, false)));
        // The mirror case starts video-only.
        assert_eq!(fallback_flags(false, true), Some((false, true)));
    }

    #[test]
    fn total_denial_is_fatal() {
        assert_eq!(fallback_flags(false, false), None);
    }

    #[test]
    fn capture_errors_render_for_the_ui() {
        let err = CaptureError {
            kind: CaptureErrorKind::PermissionDenied,
            message: "Permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "camera/microphone access was denied: Permission denied"
        );
    }
}
