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

//! Per-stream loudness measurement.
//!
//! One [`AudioLevelAnalyzer`] taps one `MediaStream` through a
//! `MediaStreamAudioSourceNode` feeding an `AnalyserNode`. Reading a level
//! never blocks; it samples whatever waveform the analyser currently holds.

use crate::constants::ANALYSER_FFT_SIZE;
use wasm_bindgen::JsValue;
use web_sys::{AnalyserNode, AudioContext, MediaStream, MediaStreamAudioSourceNode};

/// RMS energy of byte time-domain samples, normalized to 0..1.
///
/// Samples are unsigned bytes centered on 128 (the Web Audio byte waveform
/// encoding); silence is all-128 and reads as 0.0.
pub(crate) fn rms(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|&s| {
            let v = (s as f32 - 128.0) / 128.0;
            v * v
        })
        .sum();
    (sum / samples.len() as f32).sqrt()
}

/// Analysis tap for a single participant's stream.
pub struct AudioLevelAnalyzer {
    source: MediaStreamAudioSourceNode,
    analyser: AnalyserNode,
    buffer: Vec<u8>,
}

impl AudioLevelAnalyzer {
    /// Attach an analyser to `stream`. Returns `Ok(None)` for streams with
    /// no audio track (nothing to measure).
    pub(crate) fn attach(
        ctx: &AudioContext,
        stream: &MediaStream,
    ) -> Result<Option<Self>, JsValue> {
        if stream.get_audio_tracks().length() == 0 {
            return Ok(None);
        }
        let source = ctx.create_media_stream_source(stream)?;
        let analyser = ctx.create_analyser()?;
        analyser.set_fft_size(ANALYSER_FFT_SIZE);
        source.connect_with_audio_node(&analyser)?;
        let buffer = vec![0u8; analyser.frequency_bin_count() as usize];
        Ok(Some(Self {
            source,
            analyser,
            buffer,
        }))
    }

    /// Current RMS level, 0..1.
    pub fn level(&mut self) -> f32 {
        self.analyser.get_byte_time_domain_data(&mut self.buffer);
        rms(&self.buffer)
    }

    /// Disconnect from the audio graph. Must be called before dropping an
    /// analyser whose stream is going away.
    pub(crate) fn detach(&self) {
        let _ = self.source.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::rms;

    #[test]
    fn silence_is_zero() {
        assert_eq!(rms(&[128u8; 256]), 0.0);
    }

    #[test]
    fn empty_buffer_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn full_scale_square_wave_is_about_one() {
        let samples: Vec<u8> = (0..256).map(|i| if i % 2 == 0 { 0 } else { 255 }).collect();
        let level = rms(&samples);
        assert!((level - 1.0).abs() < 0.01, "got {level}");
    }

    #[test]
    fn quiet_signal_stays_below_speaking_threshold() {
        // +/- 4 around center: amplitude 4/128 = 0.03125 RMS for a square wave.
        let samples: Vec<u8> = (0..256).map(|i| if i % 2 == 0 { 124 } else { 132 }).collect();
        assert!(rms(&samples) < crate::constants::SPEAKING_THRESHOLD);
    }

    #[test]
    fn loud_signal_exceeds_speaking_threshold() {
        let samples: Vec<u8> = (0..256).map(|i| if i % 2 == 0 { 96 } else { 160 }).collect();
        assert!(rms(&samples) > crate::constants::SPEAKING_THRESHOLD);
    }
}
