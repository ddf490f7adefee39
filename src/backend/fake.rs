//! A backend without sound output
//!
//! Used when sound is turned off and in tests. Played streams are logged at
//! debug level and kept in memory.

use tracing::debug;

use super::{Backend, BackendKind};
use crate::error::SoundError;
use crate::stream::EventStream;

#[derive(Debug, Default)]
pub struct FakeSynth {
    played: Vec<EventStream>,
    stops: usize,
    closed: bool,
}

impl FakeSynth {
    pub fn new(verbose_init: bool) -> Self {
        if verbose_init {
            debug!("using the fake synth, no sound will be played");
        }
        FakeSynth::default()
    }

    /// Every stream played so far, oldest first.
    pub fn played(&self) -> &[EventStream] {
        &self.played
    }

    /// Number of times `stop` was called.
    pub fn stops(&self) -> usize {
        self.stops
    }
}

impl Backend for FakeSynth {
    fn kind(&self) -> BackendKind {
        BackendKind::Fake
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        if self.closed {
            return Err(SoundError::Closed {
                kind: BackendKind::Fake,
            });
        }
        debug!(events = stream.len(), "fake synth playing stream");
        for event in stream {
            debug!("{}", event);
        }
        self.played.push(stream.clone());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        self.stops += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SoundError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat::Rat;
    use crate::track::Track;

    #[test]
    fn test_fake_synth_records_streams() {
        let mut synth = FakeSynth::new(false);
        let mut t = Track::new();
        t.note(Rat::note_value(2), 67, None);
        synth.play_tracks(&[t]).unwrap();
        synth.play_event_stream(&EventStream::new()).unwrap();
        assert_eq!(synth.played().len(), 2);
        assert_eq!(synth.played()[0].str_repr(0), "p0:0 v0:100 n67 d1/2 o67");
        assert!(synth.played()[1].is_empty());
    }

    #[test]
    fn test_fake_synth_closed() {
        let mut synth = FakeSynth::new(true);
        synth.stop().unwrap();
        synth.close().unwrap();
        synth.close().unwrap();
        assert_eq!(synth.stops(), 1);
        assert!(synth.play_event_stream(&EventStream::new()).is_err());
    }
}
