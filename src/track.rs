//! # Tracks
//!
//! A [`Track`] is one voice of music as the notation layer produces it: an
//! ordered list of note, delay and instrument directives. Tracks know nothing
//! about MIDI channels; [`EventStream::from_tracks`](crate::EventStream::from_tracks)
//! merges any number of them and assigns channels.
//!
//! ## Example
//! ```rust
//! use soundcard::{Rat, Track};
//!
//! let mut t = Track::new();
//! t.set_patch(3);
//! t.note(Rat::note_value(4), 60, None);
//! t.note(Rat::note_value(4), 64, None);
//! assert_eq!(t.str_repr(), "p3 n60 d1/4 o60 n64 d1/4 o64");
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::event::{DEFAULT_VELOCITY, NUM_CHANNELS};
use crate::rat::Rat;

/// One directive inside a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TrackEvent {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8, velocity: u8 },
    /// Moves the track's position forward.
    Delay(Rat),
    SetPatch(u8),
    SetVolume(u8),
    Tempo { bpm: u32, beat_unit: u32 },
    Bender { channel: u8, value: u16 },
}

/// An ordered list of musical directives for one voice.
///
/// Invariants (asserted when adding events):
/// - pitches, velocities and patches are in `0..128`
/// - volumes are in `0..128`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub percussion: bool,
    default_velocity: u8,
    events: Vec<TrackEvent>,
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}

impl Track {
    pub fn new() -> Self {
        Track {
            name: None,
            percussion: false,
            default_velocity: DEFAULT_VELOCITY,
            events: Vec::new(),
        }
    }

    /// A track whose notes always play on the percussion channel.
    pub fn percussion() -> Self {
        Track {
            percussion: true,
            ..Track::new()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_default_velocity(mut self, velocity: u8) -> Self {
        assert!(velocity < 128);
        self.default_velocity = velocity;
        self
    }

    pub fn events(&self) -> &[TrackEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn velocity(&self, velocity: Option<u8>) -> u8 {
        let vel = velocity.unwrap_or(self.default_velocity);
        assert!(vel < 128, "velocity {} out of range", vel);
        vel
    }

    pub fn start_note(&mut self, pitch: u8, velocity: Option<u8>) {
        assert!(pitch < 128, "pitch {} out of range", pitch);
        let velocity = self.velocity(velocity);
        self.events.push(TrackEvent::NoteOn { pitch, velocity });
    }

    pub fn stop_note(&mut self, pitch: u8, velocity: Option<u8>) {
        assert!(pitch < 128, "pitch {} out of range", pitch);
        let velocity = self.velocity(velocity);
        self.events.push(TrackEvent::NoteOff { pitch, velocity });
    }

    /// Advance the track position by `len`.
    pub fn notelen_time(&mut self, len: Rat) {
        self.events.push(TrackEvent::Delay(len));
    }

    /// Start a note, wait `len`, stop it.
    pub fn note(&mut self, len: Rat, pitch: u8, velocity: Option<u8>) {
        let velocity = self.velocity(velocity);
        self.start_note(pitch, Some(velocity));
        self.notelen_time(len);
        self.stop_note(pitch, Some(velocity));
    }

    /// Change the instrument for the notes following this directive.
    pub fn set_patch(&mut self, patch: u8) {
        assert!(patch < 128, "patch {} out of range", patch);
        self.events.push(TrackEvent::SetPatch(patch));
    }

    /// Set the instrument at the very start of the track.
    ///
    /// When called several times, the first call wins.
    pub fn prepend_patch(&mut self, patch: u8) {
        assert!(patch < 128, "patch {} out of range", patch);
        self.events.insert(0, TrackEvent::SetPatch(patch));
    }

    pub fn set_volume(&mut self, volume: u8) {
        assert!(volume < 128, "volume {} out of range", volume);
        self.events.push(TrackEvent::SetVolume(volume));
    }

    pub fn prepend_volume(&mut self, volume: u8) {
        assert!(volume < 128, "volume {} out of range", volume);
        self.events.insert(0, TrackEvent::SetVolume(volume));
    }

    pub fn set_bpm(&mut self, bpm: u32, beat_unit: u32) {
        assert!(bpm > 0 && beat_unit > 0);
        self.events.push(TrackEvent::Tempo { bpm, beat_unit });
    }

    pub fn prepend_bpm(&mut self, bpm: u32, beat_unit: u32) {
        assert!(bpm > 0 && beat_unit > 0);
        self.events.insert(0, TrackEvent::Tempo { bpm, beat_unit });
    }

    pub fn bender(&mut self, channel: u8, value: u16) {
        assert!(channel < NUM_CHANNELS);
        self.events.push(TrackEvent::Bender { channel, value });
    }

    /// Merge the events of `other` into this track, keeping every event at
    /// its musical position. Events at the same position keep this track's
    /// events first.
    pub fn merge_with(&mut self, other: &Track) {
        let mut by_pos: BTreeMap<Rat, Vec<TrackEvent>> = BTreeMap::new();
        for track in [&*self, other] {
            let mut pos = Rat::ZERO;
            for event in &track.events {
                match event {
                    TrackEvent::Delay(len) => pos += *len,
                    _ => by_pos.entry(pos).or_default().push(*event),
                }
            }
        }
        let mut merged = Vec::new();
        let mut last_pos: Option<Rat> = None;
        for (pos, events) in by_pos {
            if let Some(last) = last_pos {
                merged.push(TrackEvent::Delay(pos - last));
            }
            merged.extend(events);
            last_pos = Some(pos);
        }
        self.events = merged;
    }

    /// Replace every note-on and note-off of pitch `old` with `new`.
    pub fn replace_note(&mut self, old: u8, new: u8) {
        assert!(old < 128 && new < 128);
        for event in &mut self.events {
            match event {
                TrackEvent::NoteOn { pitch, .. } | TrackEvent::NoteOff { pitch, .. } if *pitch == old => {
                    *pitch = new;
                }
                _ => {}
            }
        }
    }

    /// The events paired with their absolute position. Delays are consumed.
    pub(crate) fn timed_events(&self) -> Vec<(Rat, TrackEvent)> {
        let mut pos = Rat::ZERO;
        let mut out = Vec::with_capacity(self.events.len());
        for event in &self.events {
            match event {
                TrackEvent::Delay(len) => pos += *len,
                _ => out.push((pos, *event)),
            }
        }
        out
    }

    /// Compact rendering such as `p3 v100 n60 d1/4 o60`.
    pub fn str_repr(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                TrackEvent::SetPatch(p) => Some(format!("p{}", p)),
                TrackEvent::Tempo { bpm, beat_unit } => Some(format!("t{}/{}", bpm, beat_unit)),
                TrackEvent::SetVolume(v) => Some(format!("v{}", v)),
                TrackEvent::NoteOn { pitch, .. } => Some(format!("n{}", pitch)),
                TrackEvent::NoteOff { pitch, .. } => Some(format!("o{}", pitch)),
                TrackEvent::Delay(len) => Some(format!("d{}", len)),
                TrackEvent::Bender { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
