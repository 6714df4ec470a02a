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

//! Loudness analysis and active-speaker election.

mod active_speaker;
mod audio_level;

pub use active_speaker::{ActiveSpeakerDetector, ActiveSpeakerOptions, SpeakerState};
pub use audio_level::AudioLevelAnalyzer;
