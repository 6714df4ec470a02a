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

//! The peer session: local capture, the link mesh and remote media.

mod local_media;
mod manager;
mod peer_link;
mod registry;
mod remote_peer;

pub use manager::{PeerSessionManager, PeerSessionManagerOptions, SessionError};
