//! # Event Streams
//!
//! This module turns [`Track`]s into a single, backend-independent
//! [`EventStream`] that every output backend consumes.
//!
//! ## Purpose
//!
//! Tracks describe music per voice and know nothing about MIDI channels.
//! Building a stream:
//! - merges all tracks by musical position, so notes starting at the same
//!   position are emitted together
//! - assigns MIDI channels, sharing a channel between notes with the same
//!   patch and volume (see [`channels`])
//! - emits program changes, volume changes and tempo changes only when the
//!   target channel's state actually differs
//! - moves program changes back in time so the instrument is loaded during
//!   the preceding silence on that channel
//!
//! ## Example
//! ```rust
//! use soundcard::{EventStream, Rat, Track};
//!
//! let mut t = Track::new();
//! t.set_patch(3);
//! t.note(Rat::note_value(4), 60, None);
//! let stream = EventStream::from_tracks(&[t]);
//! assert_eq!(stream.str_repr(1), "p0:3 v0:100 n0:60 d1/4 o60");
//! ```

mod channels;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::event::{Event, DEFAULT_VOLUME, NUM_CHANNELS, PERCUSSION_CHANNEL};
use crate::rat::Rat;
use crate::track::{Track, TrackEvent};

use channels::ChannelDevice;

/// An ordered, replayable list of [`Event`]s, plus the tracks it was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventStream {
    events: Vec<Event>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tracks: Vec<Track>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `tracks` into one stream using all sixteen MIDI channels.
    pub fn from_tracks(tracks: &[Track]) -> Self {
        Self::from_tracks_with_channel_limit(tracks, NUM_CHANNELS)
    }

    /// Like [`EventStream::from_tracks`], but only hand out `limit` melodic
    /// channels. Notes that find no channel are dropped with a warning.
    pub fn from_tracks_with_channel_limit(tracks: &[Track], limit: u8) -> Self {
        let merged = merge_tracks(tracks, limit);
        EventStream {
            events: hoist_program_changes(merged),
            tracks: tracks.to_vec(),
        }
    }

    /// A stream made of already channel-assigned events.
    pub fn from_events(events: Vec<Event>) -> Self {
        EventStream {
            events,
            tracks: Vec::new(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Space separated rendering of the stream, used by tests and capture.
    ///
    /// `details == 0` leaves out the channel of note-ons.
    pub fn str_repr(&self, details: u8) -> String {
        self.events
            .iter()
            .filter_map(|e| e.token(details))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The events with every group between two time advances reordered as
    /// note-offs, tempo, program changes, volume, bender and note-ons.
    pub fn sorted_events(&self) -> Vec<Event> {
        let mut out = Vec::with_capacity(self.events.len());
        let mut groups: [Vec<Event>; 6] = Default::default();
        for event in &self.events {
            let group = match event {
                Event::NoteLenTime(_) => {
                    for g in groups.iter_mut() {
                        out.append(g);
                    }
                    out.push(*event);
                    continue;
                }
                Event::NoteOff { .. } => 0,
                Event::Tempo { .. } => 1,
                Event::SetPatch { .. } => 2,
                Event::Volume { .. } => 3,
                Event::Bender { .. } => 4,
                Event::NoteOn { .. } => 5,
            };
            groups[group].push(*event);
        }
        for g in groups.iter_mut() {
            out.append(g);
        }
        out
    }
}

impl<'a> IntoIterator for &'a EventStream {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl From<Vec<Event>> for EventStream {
    fn from(events: Vec<Event>) -> Self {
        EventStream::from_events(events)
    }
}

/// Per-track state while merging.
struct TrackState {
    patch: u8,
    volume: u8,
    /// Sounding pitch -> the channel it was started on.
    notes: HashMap<u8, u8>,
}

/// Events of one track at one position, split by kind.
#[derive(Default)]
struct Bucket {
    offs: Vec<TrackEvent>,
    others: Vec<TrackEvent>,
    ons: Vec<TrackEvent>,
}

fn bucket_track(track: &Track) -> BTreeMap<Rat, Bucket> {
    let mut buckets: BTreeMap<Rat, Bucket> = BTreeMap::new();
    for (pos, event) in track.timed_events() {
        let bucket = buckets.entry(pos).or_default();
        match event {
            TrackEvent::NoteOff { .. } => bucket.offs.push(event),
            TrackEvent::NoteOn { .. } => bucket.ons.push(event),
            _ => bucket.others.push(event),
        }
    }
    buckets
}

fn merge_tracks(tracks: &[Track], limit: u8) -> Vec<Event> {
    let buckets: Vec<BTreeMap<Rat, Bucket>> = tracks.iter().map(bucket_track).collect();
    let positions: BTreeSet<Rat> = buckets.iter().flat_map(|b| b.keys().copied()).collect();
    let mut states: Vec<TrackState> = tracks
        .iter()
        .map(|_| TrackState {
            patch: 0,
            volume: DEFAULT_VOLUME,
            notes: HashMap::new(),
        })
        .collect();

    let mut dev = ChannelDevice::new(limit);
    let mut tempo_request: Option<(u32, u32)> = None;
    let mut tempo_current: Option<(u32, u32)> = None;
    let mut out = Vec::new();
    let mut last_pos = Rat::ZERO;

    for pos in positions {
        if pos != last_pos {
            out.push(Event::NoteLenTime(pos - last_pos));
        }

        for (idx, track_buckets) in buckets.iter().enumerate() {
            let Some(bucket) = track_buckets.get(&pos) else { continue };
            for event in &bucket.offs {
                if let TrackEvent::NoteOff { pitch, velocity } = *event {
                    match states[idx].notes.remove(&pitch) {
                        Some(channel) => {
                            dev.stop_note(channel, pitch);
                            out.push(Event::NoteOff { channel, pitch, velocity });
                        }
                        None => debug!(track = idx, pitch, "note-off for a note that is not playing"),
                    }
                }
            }
        }

        for (idx, track_buckets) in buckets.iter().enumerate() {
            let Some(bucket) = track_buckets.get(&pos) else { continue };
            for event in &bucket.others {
                match *event {
                    TrackEvent::SetPatch(patch) => states[idx].patch = patch,
                    TrackEvent::SetVolume(volume) => states[idx].volume = volume,
                    TrackEvent::Tempo { bpm, beat_unit } => tempo_request = Some((bpm, beat_unit)),
                    TrackEvent::Bender { channel, value } => out.push(Event::Bender { channel, value }),
                    TrackEvent::NoteOn { .. } | TrackEvent::NoteOff { .. } | TrackEvent::Delay(_) => {}
                }
            }
        }

        for (idx, track_buckets) in buckets.iter().enumerate() {
            let Some(bucket) = track_buckets.get(&pos) else { continue };
            for event in &bucket.ons {
                let TrackEvent::NoteOn { pitch, velocity } = *event else { continue };
                if states[idx].notes.contains_key(&pitch) {
                    debug!(track = idx, pitch, "note-on for a note that is already playing");
                    continue;
                }
                if tempo_request != tempo_current {
                    if let Some((bpm, beat_unit)) = tempo_request {
                        out.push(Event::Tempo { bpm, beat_unit });
                    }
                    tempo_current = tempo_request;
                }
                let state = &states[idx];
                let channel = if tracks[idx].percussion {
                    PERCUSSION_CHANNEL
                } else {
                    let Some(channel) = dev.require_channel(pitch, state.patch, state.volume) else {
                        warn!(track = idx, pitch, "no free MIDI channel, dropping note");
                        continue;
                    };
                    if dev.update_patch(channel, state.patch) {
                        out.push(Event::SetPatch { channel, patch: state.patch });
                    }
                    channel
                };
                if dev.update_volume(channel, state.volume) {
                    out.push(Event::Volume { channel, volume: state.volume });
                }
                if dev.is_playing(channel, pitch) {
                    debug!(channel, pitch, "tone already sounding on channel, ignoring");
                    continue;
                }
                states[idx].notes.insert(pitch, channel);
                dev.start_note(channel, pitch);
                out.push(Event::NoteOn { channel, pitch, velocity });
            }
        }

        last_pos = pos;
    }
    out
}

/// Move every program change back to just after the last earlier event on
/// the same channel. Program changes that end up next to each other are kept
/// in channel order.
fn hoist_program_changes(events: Vec<Event>) -> Vec<Event> {
    let mut ret: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        let Event::SetPatch { channel, .. } = event else {
            ret.push(event);
            continue;
        };
        if ret.is_empty() {
            ret.push(event);
            continue;
        }
        let mut i = ret.len();
        while i > 1 && ret[i - 1].channel() != Some(channel) {
            i -= 1;
        }
        if i < ret.len() {
            while i < ret.len() - 1 {
                match ret[i] {
                    Event::SetPatch { channel: c, .. } if c < channel => i += 1,
                    _ => break,
                }
            }
        }
        ret.insert(i, event);
    }
    ret
}

#[cfg(test)]
mod tests;
