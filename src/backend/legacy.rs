//! Legacy multi-voice sequencer (`/dev/sequencer`)
//!
//! The device has no notion of MIDI channels. Sixteen logical channels are
//! emulated on top of the synth's voices: every note-on takes a voice from a
//! [`VoiceAllocator`], loads the channel's patch into it when needed and
//! starts the note there. Notes that find no free voice are skipped.
//!
//! The device timer runs at a fixed rate, so the tempo is folded into every
//! delta time instead of being programmed into the device.

use tracing::{debug, warn};

use super::oss::{open_synth, SeqCommand, SequencerDevice};
use super::{Backend, BackendKind};
use crate::error::SoundError;
use crate::event::Event;
use crate::rat::Rat;
use crate::stream::EventStream;
use crate::voices::VoiceAllocator;

/// Tempo in effect at the start of every stream: 60 quarter notes a minute.
pub const DEFAULT_TEMPO: (u32, u32) = (60, 4);

/// Timer ticks for a note length `len` at `bpm` beats of `1/beat_unit`.
pub fn delta_ticks(len: Rat, (bpm, beat_unit): (u32, u32)) -> u32 {
    let base = (len * 96).trunc().max(0) as f64;
    (base * 60.0 * beat_unit as f64 / bpm.max(1) as f64) as u32
}

#[derive(Debug)]
pub struct LegacySequencer<D: SequencerDevice> {
    device: D,
    synth: usize,
    voices: VoiceAllocator,
    num_voices: usize,
    tempo: (u32, u32),
    closed: bool,
}

impl<D: SequencerDevice> LegacySequencer<D> {
    /// Open synth number `synth` on `device`.
    pub fn new(device: D, synth: usize, verbose_init: bool) -> Result<Self, SoundError> {
        let opened = open_synth(device, synth, verbose_init)?;
        Ok(LegacySequencer {
            device: opened.device,
            synth: opened.synth,
            voices: VoiceAllocator::new(opened.num_voices),
            num_voices: opened.num_voices,
            tempo: DEFAULT_TEMPO,
            closed: false,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn voices(&self) -> &VoiceAllocator {
        &self.voices
    }

    pub fn num_voices(&self) -> usize {
        self.num_voices
    }

    fn queue(&mut self, command: SeqCommand) {
        self.device.queue(self.synth as u8, command);
    }

    fn ensure_open(&self) -> Result<(), SoundError> {
        if self.closed {
            return Err(SoundError::Closed {
                kind: BackendKind::LegacySequencer,
            });
        }
        Ok(())
    }

    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8) {
        let Some(alloc) = self.voices.allocate(channel, pitch) else {
            warn!(channel, pitch, "out of voices, skipping note");
            return;
        };
        if let Some(old) = alloc.evicted {
            self.queue(SeqCommand::StopNote { voice: old, note: pitch, velocity: 100 });
        }
        if let Some(patch) = alloc.set_patch {
            self.queue(SeqCommand::SetPatch { voice: alloc.voice, patch });
        }
        self.queue(SeqCommand::StartNote { voice: alloc.voice, note: pitch, velocity });
    }
}

#[cfg(target_os = "linux")]
impl LegacySequencer<super::oss::OssDevice> {
    /// Open the sequencer device file at `path`.
    pub fn open(path: impl AsRef<std::path::Path>, synth: usize, verbose_init: bool) -> Result<Self, SoundError> {
        Self::new(super::oss::OssDevice::open(path)?, synth, verbose_init)
    }
}

impl<D: SequencerDevice> Backend for LegacySequencer<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::LegacySequencer
    }

    fn device_index(&self) -> Option<usize> {
        Some(self.synth)
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        self.ensure_open()?;
        self.device.reset()?;
        self.voices.reset(self.num_voices);
        for voice in 0..self.num_voices {
            self.queue(SeqCommand::SetPatch { voice: voice as u8, patch: 0 });
        }
        self.tempo = DEFAULT_TEMPO;
        self.queue(SeqCommand::StartTimer);

        for event in stream {
            match *event {
                Event::Tempo { bpm, beat_unit } => self.tempo = (bpm, beat_unit),
                Event::NoteOn { channel, pitch, velocity } => self.note_on(channel, pitch, velocity),
                Event::NoteOff { channel, pitch, velocity } => {
                    if let Some(voice) = self.voices.free(channel, pitch) {
                        self.queue(SeqCommand::StopNote { voice, note: pitch, velocity });
                    }
                }
                Event::NoteLenTime(len) => {
                    let ticks = delta_ticks(len, self.tempo);
                    self.queue(SeqCommand::DeltaTime(ticks));
                }
                Event::SetPatch { channel, patch } => self.voices.set_channel_patch(channel, patch),
                Event::Bender { channel, .. } => debug!(channel, "bender not supported on /dev/sequencer"),
                Event::Volume { channel, .. } => debug!(channel, "volume not supported on /dev/sequencer"),
            }
        }
        self.device.dump()
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        if self.closed {
            return Ok(());
        }
        self.device.reset()?;
        self.voices.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), SoundError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.device.close()
    }
}
