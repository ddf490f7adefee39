//! # Backends
//!
//! Interchangeable output targets for an [`EventStream`].
//!
//! ## Purpose
//! Every backend implements [`Backend`]: it consumes a stream, translates
//! each [`Event`](crate::Event) into calls on its own device API and converts
//! note lengths into its own time unit.
//!
//! ## Variants
//! - [`legacy::LegacySequencer`] - `/dev/sequencer`, notes mapped onto a
//!   small pool of hardware voices by a [`VoiceAllocator`](crate::voices::VoiceAllocator)
//! - [`modern::ModernSequencer`] - `/dev/music`, one hardware channel per MIDI channel
//! - [`driver::DriverSynth`] - a platform MIDI output driver
//! - [`external::ExternalPlayer`] - writes a MIDI file and runs a player program
//! - [`alsa_seq::AlsaSequencer`] - an ALSA sequencer client with its own queue
//! - [`fake::FakeSynth`] - no output, logs and remembers what it played
//!
//! Device-facing backends are generic over a small device trait
//! ([`oss::SequencerDevice`], [`driver::MidiDriver`], [`alsa_seq::SeqConnection`])
//! so they can be driven by in-memory devices in tests.

pub mod alsa_seq;
pub mod driver;
pub mod external;
pub mod fake;
pub mod legacy;
pub mod modern;
pub mod oss;

use std::fmt;

use serde::Serialize;

use crate::error::SoundError;
use crate::stream::EventStream;
use crate::track::Track;

/// Coarse family of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    LegacySequencer,
    ModernSequencer,
    Driver,
    ExternalProcess,
    AlsaSequencer,
    Fake,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LegacySequencer => "legacy-sequencer",
            BackendKind::ModernSequencer => "modern-sequencer",
            BackendKind::Driver => "driver",
            BackendKind::ExternalProcess => "external-process",
            BackendKind::AlsaSequencer => "alsa-sequencer",
            BackendKind::Fake => "fake",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The playback contract shared by all output targets.
///
/// Playing a new stream supersedes whatever the backend was playing. `stop`
/// silences the output and is fine to call when nothing plays. `close`
/// releases the device and may be called more than once; other calls after
/// it fail with [`SoundError::Closed`].
pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Index of the device in use, for backends that choose between several.
    fn device_index(&self) -> Option<usize> {
        None
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError>;

    /// Merge `tracks` into a stream and play it.
    fn play_tracks(&mut self, tracks: &[Track]) -> Result<(), SoundError> {
        self.play_event_stream(&EventStream::from_tracks(tracks))
    }

    fn stop(&mut self) -> Result<(), SoundError>;

    fn close(&mut self) -> Result<(), SoundError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn device_index(&self) -> Option<usize> {
        (**self).device_index()
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        (**self).play_event_stream(stream)
    }

    fn play_tracks(&mut self, tracks: &[Track]) -> Result<(), SoundError> {
        (**self).play_tracks(tracks)
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        (**self).stop()
    }

    fn close(&mut self) -> Result<(), SoundError> {
        (**self).close()
    }
}
