//! Playback event vocabulary
//!
//! This module defines the backend-independent instructions every output
//! backend understands. An [`EventStream`](crate::EventStream) is an ordered
//! list of these.

use std::fmt;

use serde::Serialize;

use crate::rat::Rat;

/// Number of logical MIDI channels.
pub const NUM_CHANNELS: u8 = 16;

/// Zero-indexed percussion channel (MIDI channel 10).
pub const PERCUSSION_CHANNEL: u8 = 9;

pub const DEFAULT_VELOCITY: u8 = 100;
pub const DEFAULT_VOLUME: u8 = 100;

/// Quarter notes per minute for `bpm` beats of length `1/beat_unit`.
///
/// Saturates at `u32::MAX` for very fast tempos.
pub fn quarter_bpm(bpm: u32, beat_unit: u32) -> u32 {
    (bpm as u64 * 4 / beat_unit.max(1) as u64).min(u32::MAX as u64) as u32
}

/// A single playback instruction.
///
/// `NoteLenTime` is the only event that moves time forward; every other event
/// happens at the position reached by the preceding `NoteLenTime` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    /// `bpm` beats of length `1/beat_unit` per minute.
    Tempo { bpm: u32, beat_unit: u32 },
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8, velocity: u8 },
    /// Program change.
    SetPatch { channel: u8, patch: u8 },
    Bender { channel: u8, value: u16 },
    Volume { channel: u8, volume: u8 },
    /// Advance the time cursor by a note length.
    NoteLenTime(Rat),
}

impl Event {
    /// The MIDI channel the event addresses, if any.
    pub fn channel(&self) -> Option<u8> {
        match *self {
            Event::NoteOn { channel, .. }
            | Event::NoteOff { channel, .. }
            | Event::SetPatch { channel, .. }
            | Event::Bender { channel, .. }
            | Event::Volume { channel, .. } => Some(channel),
            Event::Tempo { .. } | Event::NoteLenTime(_) => None,
        }
    }

    pub fn is_set_patch(&self) -> bool {
        matches!(self, Event::SetPatch { .. })
    }

    /// Compact token used by [`EventStream::str_repr`](crate::EventStream::str_repr).
    ///
    /// With `details == 0` note-ons only show the pitch, with `details >= 1`
    /// they also show the channel. Note-ons on the percussion channel are
    /// always written `P<pitch>`. Bender events have no token.
    pub fn token(&self, details: u8) -> Option<String> {
        let token = match *self {
            Event::Tempo { bpm, beat_unit } => format!("t{}/{}", bpm, beat_unit),
            Event::NoteOn { channel, pitch, .. } => {
                if channel == PERCUSSION_CHANNEL {
                    format!("P{}", pitch)
                } else if details == 0 {
                    format!("n{}", pitch)
                } else {
                    format!("n{}:{}", channel, pitch)
                }
            }
            Event::NoteOff { pitch, .. } => format!("o{}", pitch),
            Event::SetPatch { channel, patch } => format!("p{}:{}", channel, patch),
            Event::Volume { channel, volume } => format!("v{}:{}", channel, volume),
            Event::NoteLenTime(len) => format!("d{}", len),
            Event::Bender { .. } => return None,
        };
        Some(token)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Event::Tempo { bpm, beat_unit } => write!(f, "tempo {}/{}", bpm, beat_unit),
            Event::NoteOn { channel, pitch, velocity } => {
                write!(f, "note-on ch:{} pitch:{} vel:{}", channel, pitch, velocity)
            }
            Event::NoteOff { channel, pitch, velocity } => {
                write!(f, "note-off ch:{} pitch:{} vel:{}", channel, pitch, velocity)
            }
            Event::SetPatch { channel, patch } => write!(f, "program-change ch:{} patch:{}", channel, patch),
            Event::Bender { channel, value } => write!(f, "bender ch:{} value:{}", channel, value),
            Event::Volume { channel, volume } => write!(f, "volume ch:{} volume:{}", channel, volume),
            Event::NoteLenTime(len) => write!(f, "notelen-time {}", len),
        }
    }
}
