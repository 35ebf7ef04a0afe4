//! Volume policy buckets.
//!
//! A [`VolumePolicy`] names a category of audio session, the volume a newly
//! seen session of that category is set to, and the range it may drift in.
//! The [`PolicyTable`] holds exactly one policy per [`PolicyKind`] together
//! with the session currently tracked for it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Session categories, in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Mixer system sounds
    System,

    /// Teams call audio
    TeamsCall,

    /// Teams notification and ringtone audio
    TeamsNotification,

    /// Primary browser channel
    Browser,

    /// Secondary browser channel used for music and video
    Media,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 5] = [
        PolicyKind::System,
        PolicyKind::TeamsCall,
        PolicyKind::TeamsNotification,
        PolicyKind::Browser,
        PolicyKind::Media,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            PolicyKind::System => "System",
            PolicyKind::TeamsCall => "Call",
            PolicyKind::TeamsNotification => "Notification",
            PolicyKind::Browser => "Browser",
            PolicyKind::Media => "Media",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("{kind} policy: initial volume {initial} outside {min}-{max}")]
    InitialOutOfRange {
        kind: PolicyKind,
        initial: u8,
        min: u8,
        max: u8,
    },

    #[error("{kind} policy: invalid range {min}-{max}")]
    InvalidRange { kind: PolicyKind, min: u8, max: u8 },

    #[error("{kind} policy defined more than once")]
    Duplicate { kind: PolicyKind },

    #[error("{kind} policy missing")]
    Missing { kind: PolicyKind },
}

/// Target volume and acceptable range for one session category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePolicy {
    kind: PolicyKind,
    initial: u8,
    min: u8,
    max: u8,
}

impl VolumePolicy {
    pub fn new(kind: PolicyKind, initial: u8, min: u8, max: u8) -> Result<Self, PolicyError> {
        if min > max || max > 100 {
            return Err(PolicyError::InvalidRange { kind, min, max });
        }
        if !(min..=max).contains(&initial) {
            return Err(PolicyError::InitialOutOfRange {
                kind,
                initial,
                min,
                max,
            });
        }
        Ok(Self {
            kind,
            initial,
            min,
            max,
        })
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn initial(&self) -> u8 {
        self.initial
    }

    pub fn range(&self) -> RangeInclusive<u8> {
        self.min..=self.max
    }

    pub fn allows(&self, volume: u8) -> bool {
        self.range().contains(&volume)
    }
}

/// The session a policy is currently watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSession {
    pub session_id: String,
    pub volume: u8,
}

/// A policy plus its tracked session.
#[derive(Debug, Clone)]
pub struct PolicySlot {
    policy: VolumePolicy,
    tracked: Option<TrackedSession>,
}

impl PolicySlot {
    pub fn policy(&self) -> &VolumePolicy {
        &self.policy
    }

    pub fn tracked(&self) -> Option<&TrackedSession> {
        self.tracked.as_ref()
    }

    /// Valid when nothing is tracked or the tracked volume is in range.
    pub fn is_valid(&self) -> bool {
        self.tracked
            .as_ref()
            .map_or(true, |tracked| self.policy.allows(tracked.volume))
    }

    pub fn track(&mut self, session_id: &str, volume: u8) {
        self.tracked = Some(TrackedSession {
            session_id: session_id.to_string(),
            volume,
        });
    }

    fn release(&mut self, session_id: &str) -> bool {
        if self
            .tracked
            .as_ref()
            .is_some_and(|tracked| tracked.session_id == session_id)
        {
            self.tracked = None;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for PolicySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tracked {
            Some(tracked) if self.is_valid() => write!(f, "{} {}", self.policy.kind, tracked.volume),
            Some(tracked) => write!(
                f,
                "{} {} ({}-{})",
                self.policy.kind, tracked.volume, self.policy.min, self.policy.max
            ),
            None => write!(f, "{} -", self.policy.kind),
        }
    }
}

/// Exactly one slot per [`PolicyKind`].
#[derive(Debug, Clone)]
pub struct PolicyTable {
    slots: Vec<PolicySlot>,
}

impl PolicyTable {
    pub fn new(policies: Vec<VolumePolicy>) -> Result<Self, PolicyError> {
        let mut ordered: Vec<Option<VolumePolicy>> = vec![None; PolicyKind::ALL.len()];
        for policy in policies {
            let slot = &mut ordered[policy.kind.index()];
            if slot.is_some() {
                return Err(PolicyError::Duplicate { kind: policy.kind });
            }
            *slot = Some(policy);
        }

        let slots = PolicyKind::ALL
            .iter()
            .zip(ordered)
            .map(|(&kind, policy)| {
                policy
                    .map(|policy| PolicySlot {
                        policy,
                        tracked: None,
                    })
                    .ok_or(PolicyError::Missing { kind })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { slots })
    }

    pub fn slot(&self, kind: PolicyKind) -> &PolicySlot {
        &self.slots[kind.index()]
    }

    pub fn slot_mut(&mut self, kind: PolicyKind) -> &mut PolicySlot {
        &mut self.slots[kind.index()]
    }

    pub fn slots(&self) -> impl Iterator<Item = &PolicySlot> {
        self.slots.iter()
    }

    pub fn is_valid(&self) -> bool {
        self.slots.iter().all(PolicySlot::is_valid)
    }

    pub fn violations(&self) -> impl Iterator<Item = &PolicySlot> {
        self.slots.iter().filter(|slot| !slot.is_valid())
    }

    /// Stop tracking `session_id` wherever it is tracked.
    pub fn release(&mut self, session_id: &str) -> Option<PolicyKind> {
        self.slots
            .iter_mut()
            .find_map(|slot| slot.release(session_id).then_some(slot.policy.kind))
    }
}
