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

//! Shared wire types for the meshcall session subsystem.
//!
//! This crate defines the JSON contract between a meshcall client and the
//! voice signaling channel, plus the small control messages peers exchange
//! directly over their control connections. It is intentionally
//! framework-agnostic (no web-sys, no transport types) so the same
//! definitions serve the browser client, the signaling backend, and tests.

pub mod signaling;
pub mod state;

pub use signaling::{PeerTag, SignalMessage, SignalPayload};
pub use state::ControlMessage;
