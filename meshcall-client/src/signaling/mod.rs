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

//! Room membership over the voice signaling channel.

mod backoff;
mod gateway;

pub(crate) use backoff::Backoff;
pub use gateway::{RoomMember, SignalingGateway, SignalingGatewayOptions};
