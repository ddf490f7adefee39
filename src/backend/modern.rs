//! Modern per-channel sequencer (`/dev/music`)
//!
//! Every MIDI channel maps straight onto a device channel, so events are
//! forwarded one to one. The timer's tempo register only holds values below
//! 256, so faster tempos are expressed by doubling the timebase and halving
//! the tempo, which keeps the length of a tick the same.
//!
//! The timebase cannot change while events are queued. Before a stream is
//! played, the fastest tempo in it picks the timebase, which is programmed
//! once. Tempo changes are then queued in-band at their position, so time
//! already waited is never rescaled.

use tracing::warn;

use super::oss::{open_synth, SeqCommand, SequencerDevice, CTL_MAIN_VOLUME};
use super::{Backend, BackendKind};
use crate::error::SoundError;
use crate::event::{quarter_bpm, Event, NUM_CHANNELS};
use crate::rat::Rat;
use crate::stream::EventStream;

/// Timer ticks per quarter note before any doubling.
pub const BASE_TIMEBASE: u32 = 96;

const MAX_TIMER_TEMPO: u32 = 255;

/// A timebase/tempo pair as programmed into the device timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSetting {
    /// Ticks per quarter note.
    pub timebase: u32,
    /// Quarter notes per minute.
    pub tempo: u32,
}

impl TimerSetting {
    /// The setting for `quarter_bpm` quarter notes per minute.
    ///
    /// # Example
    /// ```
    /// use soundcard::backend::modern::TimerSetting;
    ///
    /// assert_eq!(TimerSetting::for_tempo(120), TimerSetting { timebase: 96, tempo: 120 });
    /// assert_eq!(TimerSetting::for_tempo(300), TimerSetting { timebase: 192, tempo: 150 });
    /// ```
    pub fn for_tempo(quarter_bpm: u32) -> Self {
        let mut setting = TimerSetting {
            timebase: BASE_TIMEBASE,
            tempo: quarter_bpm.max(1),
        };
        let mut doublings = 0;
        while setting.tempo > MAX_TIMER_TEMPO {
            setting.timebase = setting.timebase.saturating_mul(2);
            setting.tempo /= 2;
            doublings += 1;
        }
        if doublings > 1 {
            warn!(
                quarter_bpm,
                timebase = setting.timebase,
                "tempo above 511, timebase doubled {} times",
                doublings
            );
        }
        setting
    }

    /// The setting for `quarter_bpm` on this timebase.
    pub fn with_tempo(&self, quarter_bpm: u32) -> Self {
        let tempo = quarter_bpm as u64 * BASE_TIMEBASE as u64 / self.timebase.max(1) as u64;
        TimerSetting {
            timebase: self.timebase,
            tempo: tempo.clamp(1, u32::MAX as u64) as u32,
        }
    }

    /// Real time covered by one timer tick.
    pub fn seconds_per_tick(&self) -> f64 {
        60.0 / (self.timebase as f64 * self.tempo as f64)
    }
}

impl Default for TimerSetting {
    fn default() -> Self {
        TimerSetting {
            timebase: BASE_TIMEBASE,
            tempo: 60,
        }
    }
}

/// The timebase for `stream`: the one its fastest tempo needs, starting
/// from the default 60 quarter notes per minute.
pub fn stream_timebase(stream: &EventStream) -> TimerSetting {
    let fastest = stream
        .iter()
        .filter_map(|event| match *event {
            Event::Tempo { bpm, beat_unit } => Some(quarter_bpm(bpm, beat_unit)),
            _ => None,
        })
        .fold(TimerSetting::default().tempo, u32::max);
    TimerSetting::for_tempo(fastest)
}

/// Delta time ticks for a note length, in units of [`BASE_TIMEBASE`].
pub fn delta_ticks(len: Rat) -> u32 {
    (len * (BASE_TIMEBASE as i64 * 4)).trunc().max(0) as u32
}

#[derive(Debug)]
pub struct ModernSequencer<D: SequencerDevice> {
    device: D,
    synth: usize,
    timer: TimerSetting,
    closed: bool,
}

impl<D: SequencerDevice> ModernSequencer<D> {
    pub fn new(device: D, synth: usize, verbose_init: bool) -> Result<Self, SoundError> {
        let mut opened = open_synth(device, synth, verbose_init)?;
        let timer = TimerSetting::default();
        opened.device.set_timebase(timer.timebase)?;
        opened.device.set_tempo(timer.tempo)?;
        Ok(ModernSequencer {
            device: opened.device,
            synth: opened.synth,
            timer,
            closed: false,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// The timer setting in effect at the end of the last queued stream.
    pub fn timer(&self) -> TimerSetting {
        self.timer
    }

    fn queue(&mut self, command: SeqCommand) {
        self.device.queue(self.synth as u8, command);
    }

    fn program_timer(&mut self, setting: TimerSetting) -> Result<(), SoundError> {
        self.device.set_timebase(setting.timebase)?;
        self.device.set_tempo(setting.tempo)?;
        self.timer = setting;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl ModernSequencer<super::oss::OssDevice> {
    pub fn open(path: impl AsRef<std::path::Path>, synth: usize, verbose_init: bool) -> Result<Self, SoundError> {
        Self::new(super::oss::OssDevice::open(path)?, synth, verbose_init)
    }
}

impl<D: SequencerDevice> Backend for ModernSequencer<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::ModernSequencer
    }

    fn device_index(&self) -> Option<usize> {
        Some(self.synth)
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        if self.closed {
            return Err(SoundError::Closed {
                kind: BackendKind::ModernSequencer,
            });
        }
        self.device.reset()?;
        for channel in 0..NUM_CHANNELS {
            self.queue(SeqCommand::SetPatch { voice: channel, patch: 0 });
        }
        let start = stream_timebase(stream).with_tempo(TimerSetting::default().tempo);
        self.program_timer(start)?;
        self.queue(SeqCommand::StartTimer);

        for event in stream {
            match *event {
                Event::Tempo { bpm, beat_unit } => {
                    let setting = self.timer.with_tempo(quarter_bpm(bpm, beat_unit));
                    self.queue(SeqCommand::TimerTempo(setting.tempo));
                    self.timer = setting;
                }
                Event::NoteOn { channel, pitch, velocity } => {
                    self.queue(SeqCommand::StartNote { voice: channel, note: pitch, velocity });
                }
                Event::NoteOff { channel, pitch, velocity } => {
                    self.queue(SeqCommand::StopNote { voice: channel, note: pitch, velocity });
                }
                Event::NoteLenTime(len) => self.queue(SeqCommand::DeltaTime(delta_ticks(len))),
                Event::SetPatch { channel, patch } => {
                    self.queue(SeqCommand::SetPatch { voice: channel, patch });
                }
                Event::Bender { channel, value } => self.queue(SeqCommand::Bender { channel, value }),
                Event::Volume { channel, volume } => self.queue(SeqCommand::Control {
                    channel,
                    controller: CTL_MAIN_VOLUME,
                    value: volume as u16,
                }),
            }
        }
        self.device.dump()
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        if self.closed {
            return Ok(());
        }
        self.device.reset()
    }

    fn close(&mut self) -> Result<(), SoundError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.device.close()
    }
}
