//! # Standard MIDI File Writer
//!
//! Serializes one or more [`EventStream`]s into a format 1 Standard MIDI File
//! with a single track and 96 pulses per quarter note. The external player
//! backend and MIDI export both go through this module.
//!
//! ## Timing
//!
//! A whole note is `4 * PPQN` ticks. `NoteLenTime` events are not written
//! themselves; the accumulated length becomes the delta time of the next
//! note-on, note-off or tempo change. Program changes and volume changes are
//! written with a zero delta.
//!
//! ## Example
//! ```rust
//! use soundcard::{midifile, EventStream, Rat, Track};
//!
//! let mut t = Track::new();
//! t.note(Rat::note_value(4), 60, None);
//! let bytes = midifile::encode(&[EventStream::from_tracks(&[t])], 0);
//! assert_eq!(&bytes[..4], b"MThd");
//! ```

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::SoundError;
use crate::event::{quarter_bpm, Event};
use crate::rat::Rat;
use crate::stream::EventStream;

/// Pulses per quarter note.
pub const PPQN: u16 = 96;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROLLER_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
const CONTROLLER_VOLUME: u8 = 0x07;

/// Encode `ticks` as a variable-length quantity.
pub fn delta(ticks: u32) -> Vec<u8> {
    let mut out = vec![(ticks & 0x7F) as u8];
    let mut rest = ticks >> 7;
    while rest != 0 {
        out.insert(0, (rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    out
}

/// Microseconds per quarter note for `quarter_bpm` quarter notes per minute.
pub fn tempo_micros(quarter_bpm: u32) -> u32 {
    (60_000_000 / quarter_bpm.max(1)).clamp(1, 0xFF_FFFF)
}

/// Ticks covered by a note length, rounded towards zero.
pub fn ticks(len: Rat) -> u32 {
    (len * (4 * PPQN as i64)).trunc().max(0) as u32
}

fn tempo_event(delta_ticks: u32, quarter_bpm: u32) -> Vec<u8> {
    let us = tempo_micros(quarter_bpm);
    let mut out = delta(delta_ticks);
    out.extend_from_slice(&[0xFF, 0x51, 0x03, (us >> 16) as u8, (us >> 8) as u8, us as u8]);
    out
}

/// Builds the track chunk incrementally.
struct TrackWriter {
    data: Vec<u8>,
    notelen: Rat,
    patch_changed: bool,
    set_patch_delay: u32,
}

impl TrackWriter {
    fn new(set_patch_delay: u32) -> Self {
        let mut data = Vec::new();
        // start at 60 quarter notes per minute
        data.extend(tempo_event(0, 60));
        TrackWriter {
            data,
            notelen: Rat::ZERO,
            patch_changed: false,
            set_patch_delay,
        }
    }

    fn channel_message(&mut self, delta_ticks: u32, status: u8, data: &[u8]) {
        self.data.extend(delta(delta_ticks));
        self.data.push(status);
        self.data.extend_from_slice(data);
    }

    fn take_notelen(&mut self) -> u32 {
        let t = ticks(self.notelen);
        self.notelen = Rat::ZERO;
        t
    }

    fn push_stream(&mut self, stream: &EventStream) {
        for event in stream.sorted_events() {
            match event {
                Event::Tempo { bpm, beat_unit } => {
                    // a pending rest still runs at the old tempo
                    let t = self.take_notelen();
                    self.data.extend(tempo_event(t, quarter_bpm(bpm, beat_unit)));
                }
                Event::NoteLenTime(len) => self.notelen += len,
                Event::NoteOn { channel, pitch, velocity } => {
                    if self.patch_changed {
                        if self.set_patch_delay > 0 {
                            // give the synth time to load the new instrument
                            self.channel_message(self.set_patch_delay, NOTE_OFF, &[0, 0]);
                        }
                        self.patch_changed = false;
                    }
                    let t = self.take_notelen();
                    self.channel_message(t, NOTE_ON | channel, &[pitch, velocity]);
                }
                Event::NoteOff { channel, pitch, velocity } => {
                    let t = self.take_notelen();
                    self.channel_message(t, NOTE_OFF | channel, &[pitch, velocity]);
                }
                Event::SetPatch { channel, patch } => {
                    self.channel_message(0, PROGRAM_CHANGE | channel, &[patch]);
                    self.patch_changed = true;
                }
                Event::Volume { channel, volume } => {
                    self.channel_message(0, CONTROLLER_CHANGE | channel, &[CONTROLLER_VOLUME, volume]);
                }
                Event::Bender { channel, .. } => {
                    debug!(channel, "pitch bend is not written to MIDI files");
                }
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.data.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
        let mut file = Vec::with_capacity(self.data.len() + 22);
        file.extend_from_slice(b"MThd");
        file.extend_from_slice(&6u32.to_be_bytes());
        file.extend_from_slice(&1u16.to_be_bytes()); // format 1
        file.extend_from_slice(&1u16.to_be_bytes()); // one track
        file.extend_from_slice(&PPQN.to_be_bytes());
        file.extend_from_slice(b"MTrk");
        file.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        file.extend(self.data);
        file
    }
}

/// Encode `streams`, played back to back, as a complete MIDI file.
///
/// When `set_patch_delay` is non-zero, the first note-on after a program
/// change is preceded by a silent note-off that many ticks long.
pub fn encode(streams: &[EventStream], set_patch_delay: u32) -> Vec<u8> {
    let mut writer = TrackWriter::new(set_patch_delay);
    for stream in streams {
        writer.push_stream(stream);
    }
    writer.finish()
}

/// Write `streams` to `path`, replacing any existing file.
pub fn write_midi_file(
    path: impl AsRef<Path>,
    streams: &[EventStream],
    set_patch_delay: u32,
) -> Result<(), SoundError> {
    let path = path.as_ref();
    let bytes = encode(streams, set_patch_delay);
    debug!(path = %path.display(), bytes = bytes.len(), "writing MIDI file");
    fs::write(path, bytes)?;
    Ok(())
}
