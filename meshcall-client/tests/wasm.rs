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

//! Browser integration tests for the session surface.
//!
//! These run in a real browser via wasm-bindgen-test; they exercise the
//! parts of the API that need live web objects but no media permissions or
//! signaling server.

#![cfg(target_arch = "wasm32")]

use meshcall_client::{
    ActiveSpeakerDetector, ActiveSpeakerOptions, PeerSessionManager, PeerSessionManagerOptions,
};
use wasm_bindgen_test::*;
use web_sys::MediaStream;

wasm_bindgen_test_configure!(run_in_browser);

fn test_session() -> PeerSessionManager {
    PeerSessionManager::new(PeerSessionManagerOptions::new(
        "m1",
        "alice",
        "ws://localhost:9",
    ))
}

#[wasm_bindgen_test]
fn session_defaults_before_start() {
    let session = test_session();
    assert!(session.local_stream().is_none());
    assert!(session.remote_streams().is_empty());
    assert!(session.remote_states().is_empty());
    assert!(session.mic_enabled());
    assert!(session.camera_enabled());
    assert!(session.last_error().is_none());
    assert!(!session.is_connected());
}

#[wasm_bindgen_test]
fn toggling_without_a_stream_reports_failure() {
    let session = test_session();
    assert!(!session.toggle_mic());
    assert!(!session.toggle_camera());
    // The failed toggle must not flip the exposed flags.
    assert!(session.mic_enabled());
    assert!(session.camera_enabled());
}

#[wasm_bindgen_test]
fn stop_is_safe_to_call_repeatedly_without_a_start() {
    let session = test_session();
    session.stop();
    session.stop();
    assert!(session.local_stream().is_none());
}

#[wasm_bindgen_test]
fn unknown_users_never_display_video() {
    let session = test_session();
    assert!(!session.should_display_video("nobody"));
}

#[wasm_bindgen_test]
fn detector_attach_is_idempotent_and_ignores_silent_streams() {
    let detector = ActiveSpeakerDetector::new(ActiveSpeakerOptions::default());
    let stream = MediaStream::new().unwrap();
    // No audio track: nothing to measure, nothing to crash on.
    detector.attach("alice", &stream);
    detector.attach("alice", &stream);
    detector.detach("alice");
    detector.detach("alice");
    assert!(detector.state().speaking.is_empty());
    assert_eq!(detector.state().active_speaker_id, None);
}

#[wasm_bindgen_test]
fn detector_start_stop_cycles_cleanly() {
    let detector = ActiveSpeakerDetector::new(ActiveSpeakerOptions::default());
    detector.start();
    detector.start();
    detector.stop();
    detector.stop();
    assert_eq!(detector.state().active_speaker_id, None);
}
