//! This crate provides the client-side (browser) media session for a
//! full-mesh video call. It takes care of discovering who is in a meeting's
//! voice room, negotiating one peer-to-peer link per participant (media
//! plus a control side-channel), keeping everyone's mic/camera flags
//! consistent, and electing the current active speaker.
//!
//! This crate intends to make no assumptions about the UI or the HTML of
//! the client app. It exposes streams and state through callbacks and
//! getters; rendering, routing and meeting CRUD belong to the embedding
//! application, as do authentication (an opaque user id is taken as input)
//! and text chat.
//!
//! # Outline of usage
//!
//! For more detailed documentation see the doc for each struct.
//!
//! ## Session creation and start:
//! ```ignore
//! let mut options = PeerSessionManagerOptions::new(meeting_id, user_id, signaling_url);
//! options.on_remote_stream_added = ...; // callbacks for events the UI renders
//! let session = PeerSessionManager::new(options);
//!
//! session.start();
//! session.toggle_mic();
//! session.toggle_camera();
//! session.stop();
//! ```
//!
//! ## Active speaker detection:
//! ```ignore
//! let detector = ActiveSpeakerDetector::new(ActiveSpeakerOptions::default());
//! detector.attach(user_id, &stream);  // wire to on_remote_stream_added
//! detector.detach(user_id);           // wire to on_remote_stream_removed
//! detector.start();
//! detector.stop();
//! ```
//!
//! The session manager is the sole owner of the local capture stream;
//! consumers receive read-only handles and must never stop tracks
//! themselves.

use log::info;
use wasm_bindgen::prelude::*;

mod constants;
mod media_devices;
mod session;
mod signaling;
mod speaker;
mod state_sync;

pub use media_devices::{CaptureError, CaptureErrorKind};
pub use session::{PeerSessionManager, PeerSessionManagerOptions, SessionError};
pub use signaling::{RoomMember, SignalingGateway, SignalingGatewayOptions};
pub use speaker::{ActiveSpeakerDetector, ActiveSpeakerOptions, SpeakerState};
pub use state_sync::{PeerMediaState, StateOrigin, StateUpdate};

#[wasm_bindgen(start)]
pub fn start() {
    // This will be called when the WASM module loads
    info!("meshcall-client library starting up");
}
