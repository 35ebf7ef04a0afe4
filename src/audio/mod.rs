//! Audio session policy.
//!
//! This module classifies application audio sessions into volume policy
//! buckets, enforces their initial volumes, flags drift, and tracks the
//! meeting microphone used by the mute hotkey.

pub mod classify;
pub mod engine;
pub mod policy;
pub mod session;

pub use classify::{ClassifierRules, SessionClassifier};
pub use engine::{MicSession, VolumePolicyEngine};
pub use policy::{PolicyError, PolicyKind, PolicyTable, TrackedSession, VolumePolicy};
pub use session::{
    percent_to_scalar, scalar_to_percent, AudioError, AudioEvent, AudioSession,
    AudioSessionProvider, CaptureDevice, DeviceState, SessionFlow, SessionState,
};
