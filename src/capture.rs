//! # Capture
//!
//! A [`Backend`] wrapper that can record streams instead of playing them.
//!
//! ## Purpose
//! Between [`Capture::start_capture`] and [`Capture::end_capture`] every
//! stream handed to the wrapper is stored rather than sent to the device, so
//! tests can check exactly which notes, patches and tempo changes some music
//! produces. Outside a capture all calls go straight to the wrapped backend.
//!
//! ## Example
//! ```rust
//! use soundcard::backend::fake::FakeSynth;
//! use soundcard::{Backend, Capture, Rat, Track};
//!
//! let mut synth = Capture::new(FakeSynth::new(false));
//! let mut t = Track::new();
//! t.note(Rat::note_value(4), 60, None);
//!
//! synth.start_capture();
//! synth.play_tracks(&[t]).unwrap();
//! assert_eq!(synth.end_capture(0), "p0:0 v0:100 n60 d1/4 o60");
//! assert!(synth.inner().played().is_empty());
//! ```

use crate::backend::{Backend, BackendKind};
use crate::error::SoundError;
use crate::stream::EventStream;

#[derive(Debug)]
pub struct Capture<B: Backend> {
    inner: B,
    capturing: bool,
    captured: Option<EventStream>,
}

impl<B: Backend> Capture<B> {
    pub fn new(inner: B) -> Self {
        Capture {
            inner,
            capturing: false,
            captured: None,
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Start recording streams instead of playing them.
    ///
    /// # Panics
    /// If a capture is already active.
    pub fn start_capture(&mut self) {
        assert!(!self.capturing, "capture already started");
        self.capturing = true;
        self.captured = None;
    }

    /// The last stream played during the capture, rendered with
    /// [`EventStream::str_repr`]. Empty when nothing was played.
    pub fn captured_repr(&self, details: u8) -> String {
        self.captured
            .as_ref()
            .map(|s| s.str_repr(details))
            .unwrap_or_default()
    }

    /// Stop capturing and return the last captured stream.
    ///
    /// # Panics
    /// If no capture is active.
    pub fn end_capture_stream(&mut self) -> Option<EventStream> {
        assert!(self.capturing, "no capture active");
        self.capturing = false;
        self.captured.take()
    }

    /// Stop capturing and return the last captured stream as a string.
    pub fn end_capture(&mut self, details: u8) -> String {
        self.end_capture_stream()
            .map(|s| s.str_repr(details))
            .unwrap_or_default()
    }
}

impl<B: Backend> Backend for Capture<B> {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn device_index(&self) -> Option<usize> {
        self.inner.device_index()
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        if self.capturing {
            self.captured = Some(stream.clone());
            return Ok(());
        }
        self.inner.play_event_stream(stream)
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        self.inner.stop()
    }

    fn close(&mut self) -> Result<(), SoundError> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeSynth;
    use crate::event::Event;
    use crate::rat::Rat;
    use crate::track::Track;

    fn captured() -> Capture<FakeSynth> {
        Capture::new(FakeSynth::new(false))
    }

    #[test]
    fn test_capture_round_trip() {
        let mut synth = captured();
        let stream = EventStream::from_events(vec![
            Event::Tempo { bpm: 90, beat_unit: 4 },
            Event::SetPatch { channel: 2, patch: 33 },
            Event::NoteOn { channel: 2, pitch: 40, velocity: 100 },
            Event::NoteLenTime(Rat::new(3, 8)),
            Event::NoteOff { channel: 2, pitch: 40, velocity: 100 },
        ]);
        synth.start_capture();
        synth.play_event_stream(&stream).unwrap();
        assert_eq!(synth.captured_repr(1), stream.str_repr(1));
        assert_eq!(synth.end_capture_stream(), Some(stream));
        assert!(!synth.is_capturing());
    }

    #[test]
    fn test_last_stream_wins() {
        let mut synth = captured();
        let mut a = Track::new();
        a.note(Rat::note_value(4), 60, None);
        let mut b = Track::new();
        b.note(Rat::note_value(8), 62, None);
        synth.start_capture();
        synth.play_tracks(&[a]).unwrap();
        synth.play_tracks(&[b]).unwrap();
        assert_eq!(synth.end_capture(1), "p0:0 v0:100 n0:62 d1/8 o62");
    }

    #[test]
    fn test_playback_restored_after_capture() {
        let mut synth = captured();
        synth.start_capture();
        assert_eq!(synth.end_capture(0), "");
        synth.play_event_stream(&EventStream::new()).unwrap();
        assert_eq!(synth.inner().played().len(), 1);
    }

    #[test]
    #[should_panic(expected = "capture already started")]
    fn test_double_start_panics() {
        let mut synth = captured();
        synth.start_capture();
        synth.start_capture();
    }

    #[test]
    #[should_panic(expected = "no capture active")]
    fn test_end_without_start_panics() {
        captured().end_capture(0);
    }
}
