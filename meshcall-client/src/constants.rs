// Tunables for the session subsystem. Values mirror what the browser APIs
// and the signaling deployment expect; change with care.

/// RMS level above which a participant counts as speaking. 0..1 scale.
pub const SPEAKING_THRESHOLD: f32 = 0.08;

/// FFT size for the per-stream analyser; frequency_bin_count is half this.
pub const ANALYSER_FFT_SIZE: u32 = 512;

pub const VIDEO_WIDTH: u32 = 1280;
pub const VIDEO_HEIGHT: u32 = 720;

/// Safety-net poll that re-checks remote track state against the reported
/// camera flag, in case a mute/unmute event was missed.
pub const STATE_RECONCILE_INTERVAL_MS: u32 = 1000;

/// Signaling reconnect backoff: base delay, doubled per attempt up to cap.
pub const SIGNALING_BACKOFF_BASE_MS: u32 = 1000;
pub const SIGNALING_BACKOFF_CAP_MS: u32 = 30_000;

/// Label of the per-peer reliable side-channel used for state sync.
pub const CONTROL_CHANNEL_LABEL: &str = "control";

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
