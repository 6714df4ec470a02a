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

//! Local device capture.

mod media_device_access;

pub use media_device_access::{CaptureError, CaptureErrorKind, CapturedMedia};
pub(crate) use media_device_access::request_user_media;
