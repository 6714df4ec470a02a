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

//! Active-speaker election across all attached streams.
//!
//! The detector keeps one [`AudioLevelAnalyzer`] per user id, all fed from a
//! single `AudioContext`, and runs one animation-frame loop that reads every
//! analyser in the same pass. A user is speaking iff their RMS exceeds the
//! threshold; the loudest speaking user is the active speaker. Ties are not
//! special-cased: whichever equally-loud user the (unspecified) iteration
//! order favors wins the tick, and that nondeterminism is accepted.
//!
//! Wire `attach`/`detach` to the session manager's stream-added/removed
//! callbacks; both are idempotent per user id.

use super::audio_level::AudioLevelAnalyzer;
use crate::constants::SPEAKING_THRESHOLD;
use gloo::render::{request_animation_frame, AnimationFrame};
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use web_sys::{AudioContext, MediaStream};

/// Election result for one analysis tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpeakerState {
    pub active_speaker_id: Option<String>,
    pub speaking: HashSet<String>,
}

/// One pass over current levels. Pure; exercised directly by tests.
pub(crate) fn rank<'a, I>(levels: I, threshold: f32) -> SpeakerState
where
    I: IntoIterator<Item = (&'a str, f32)>,
{
    let mut state = SpeakerState::default();
    let mut max_level = 0.0f32;
    for (user_id, level) in levels {
        if level > threshold {
            state.speaking.insert(user_id.to_owned());
            if level > max_level {
                max_level = level;
                state.active_speaker_id = Some(user_id.to_owned());
            }
        }
    }
    state
}

/// Options for [`ActiveSpeakerDetector::new`].
#[derive(Clone)]
pub struct ActiveSpeakerOptions {
    /// RMS level above which a user counts as speaking.
    pub threshold: f32,

    /// Called whenever the election result changes.
    pub on_change: Rc<dyn Fn(SpeakerState)>,
}

impl Default for ActiveSpeakerOptions {
    fn default() -> Self {
        Self {
            threshold: SPEAKING_THRESHOLD,
            on_change: Rc::new(|_| {}),
        }
    }
}

struct DetectorInner {
    options: ActiveSpeakerOptions,
    ctx: Option<AudioContext>,
    analysers: HashMap<String, AudioLevelAnalyzer>,
    state: SpeakerState,
    frame: Option<AnimationFrame>,
    running: bool,
}

/// Continuous active-speaker detection over the streams of a call.
#[derive(Clone)]
pub struct ActiveSpeakerDetector {
    inner: Rc<RefCell<DetectorInner>>,
}

impl ActiveSpeakerDetector {
    pub fn new(options: ActiveSpeakerOptions) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DetectorInner {
                options,
                ctx: None,
                analysers: HashMap::new(),
                state: SpeakerState::default(),
                frame: None,
                running: false,
            })),
        }
    }

    /// Start measuring `stream` under `user_id`. Idempotent: a user that is
    /// already attached is left alone. Streams without audio are ignored.
    pub fn attach(&self, user_id: &str, stream: &MediaStream) {
        let mut inner = self.inner.borrow_mut();
        if inner.analysers.contains_key(user_id) {
            return;
        }
        if inner.ctx.is_none() {
            match AudioContext::new() {
                Ok(ctx) => inner.ctx = Some(ctx),
                Err(e) => {
                    warn!("active-speaker: AudioContext unavailable: {e:?}");
                    return;
                }
            }
        }
        let Some(ctx) = inner.ctx.clone() else {
            return;
        };
        match AudioLevelAnalyzer::attach(&ctx, stream) {
            Ok(Some(analyser)) => {
                debug!("active-speaker: attached {user_id}");
                inner.analysers.insert(user_id.to_owned(), analyser);
            }
            Ok(None) => debug!("active-speaker: {user_id} has no audio track"),
            Err(e) => warn!("active-speaker: attach failed for {user_id}: {e:?}"),
        }
    }

    /// Stop measuring a user. Their analyser is disconnected from the audio
    /// graph before being dropped. Unknown users are a no-op.
    pub fn detach(&self, user_id: &str) {
        let mut inner = self.inner.borrow_mut();
        if let Some(analyser) = inner.analysers.remove(user_id) {
            analyser.detach();
            debug!("active-speaker: detached {user_id}");
        }
    }

    /// Begin the analysis loop. No-op when already running.
    pub fn start(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.running {
                return;
            }
            inner.running = true;
        }
        Self::schedule(Rc::clone(&self.inner));
    }

    /// Cancel the loop, disconnect every analyser and close the context.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.running = false;
        // Dropping the pending handle cancels the queued frame.
        let _ = inner.frame.take();
        for analyser in inner.analysers.values() {
            analyser.detach();
        }
        inner.analysers.clear();
        inner.state = SpeakerState::default();
        if let Some(ctx) = inner.ctx.take() {
            let _ = ctx.close();
        }
    }

    /// Most recent election result.
    pub fn state(&self) -> SpeakerState {
        self.inner.borrow().state.clone()
    }

    fn schedule(inner: Rc<RefCell<DetectorInner>>) {
        let handle = {
            let inner_for_tick = Rc::clone(&inner);
            request_animation_frame(move |_timestamp| {
                let changed = {
                    let mut inner = inner_for_tick.borrow_mut();
                    if !inner.running {
                        return;
                    }
                    let threshold = inner.options.threshold;
                    let levels: Vec<(String, f32)> = inner
                        .analysers
                        .iter_mut()
                        .map(|(user, analyser)| (user.clone(), analyser.level()))
                        .collect();
                    let next = rank(
                        levels.iter().map(|(user, level)| (user.as_str(), *level)),
                        threshold,
                    );
                    if next != inner.state {
                        inner.state = next.clone();
                        Some((next, inner.options.on_change.clone()))
                    } else {
                        None
                    }
                };
                if let Some((state, on_change)) = changed {
                    on_change(state);
                }
                Self::schedule(Rc::clone(&inner_for_tick));
            })
        };
        inner.borrow_mut().frame = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nobody_above_threshold_means_no_speaker() {
        let state = rank([("alice", 0.02), ("bob", 0.079)], 0.08);
        assert_eq!(state.active_speaker_id, None);
        assert!(state.speaking.is_empty());
    }

    #[test]
    fn loudest_speaking_user_wins() {
        let state = rank([("alice", 0.2), ("bob", 0.5), ("carol", 0.3)], 0.08);
        assert_eq!(state.active_speaker_id.as_deref(), Some("bob"));
        assert_eq!(state.speaking.len(), 3);
    }

    #[test]
    fn active_speaker_is_always_in_the_speaking_set() {
        let state = rank([("alice", 0.09), ("bob", 0.01)], 0.08);
        if let Some(active) = &state.active_speaker_id {
            assert!(state.speaking.contains(active));
        }
        assert!(!state.speaking.contains("bob"));
    }

    #[test]
    fn speaking_set_only_contains_users_above_threshold() {
        let state = rank([("alice", 0.08), ("bob", 0.0801)], 0.08);
        // Exactly at threshold does not count as speaking.
        assert!(!state.speaking.contains("alice"));
        assert!(state.speaking.contains("bob"));
        assert_eq!(state.active_speaker_id.as_deref(), Some("bob"));
    }

    #[test]
    fn threshold_is_configurable() {
        let strict = rank([("alice", 0.1)], 0.5);
        assert_eq!(strict.active_speaker_id, None);
        let lax = rank([("alice", 0.1)], 0.05);
        assert_eq!(lax.active_speaker_id.as_deref(), Some("alice"));
    }
}
