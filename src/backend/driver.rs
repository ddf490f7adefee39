//! Platform MIDI driver output
//!
//! The driver receives a list of timestamped messages and plays them on its
//! own. Delays are given in driver ticks, 1000 to the whole note, and the
//! tempo as a scale value: [`TEMPO_SCALE`] times the beat unit divided by the
//! beats per minute. A larger tempo value plays slower.
//!
//! After every program change a silent note-off with a short delay is queued
//! so the synth has time to load the instrument before the next note.

use tracing::{debug, warn};

use super::{Backend, BackendKind};
use crate::error::SoundError;
use crate::event::{Event, NUM_CHANNELS};
use crate::rat::Rat;
use crate::stream::EventStream;

/// Scale constant for driver tempo values.
pub const TEMPO_SCALE: u32 = 1_440_000;

/// Driver ticks in a whole note.
pub const TICKS_PER_WHOLE: i64 = 1000;

/// Delay of the note-off queued after a program change.
pub const PROGRAM_CHANGE_DELAY: u32 = 100;

/// Tempo values must fit in 24 bits.
pub const MAX_TEMPO: u32 = 1 << 24;

/// Driver tempo value for `bpm` beats of `1/beat_unit` per minute.
pub fn driver_tempo(bpm: u32, beat_unit: u32) -> u32 {
    (TEMPO_SCALE as u64 * beat_unit as u64 / bpm.max(1) as u64).min(u32::MAX as u64) as u32
}

/// Controller 123 (all notes off) for every channel.
pub fn all_notes_off() -> impl Iterator<Item = [u8; 3]> {
    (0..NUM_CHANNELS).map(|channel| [0xB0 | channel, 123, 0])
}

/// A platform MIDI output that plays a queue of timestamped messages.
pub trait MidiDriver {
    /// Number of output devices the driver knows about.
    fn output_count(&self) -> usize;

    /// Open output `device_index`, dropping anything queued before. Notes
    /// left sounding by a stream that was still playing are turned off.
    fn reset(&mut self, device_index: usize) -> Result<(), SoundError>;

    fn set_tempo(&mut self, tempo: u32) -> Result<(), SoundError>;

    fn program_change(&mut self, channel: u8, program: u8) -> Result<(), SoundError>;

    /// Queue a note-on `delay` ticks after the previous message.
    fn note_on(&mut self, delay: u32, channel: u8, note: u8, velocity: u8) -> Result<(), SoundError>;

    fn note_off(&mut self, delay: u32, channel: u8, note: u8, velocity: u8) -> Result<(), SoundError>;

    /// Start playing the queued messages.
    fn play(&mut self) -> Result<(), SoundError>;

    /// Stop playback and silence all channels.
    fn stop(&mut self) -> Result<(), SoundError>;

    fn close(&mut self);
}

/// Driver delay for the time accumulated in `notelen`, which is reset.
fn take_delay(notelen: &mut Rat) -> u32 {
    let delay = (*notelen * TICKS_PER_WHOLE).trunc().max(0) as u32;
    *notelen = Rat::ZERO;
    delay
}

fn check_range(device_index: usize, what: &str, value: u32, limit: u32) -> Result<(), SoundError> {
    if value >= limit {
        return Err(SoundError::Driver {
            device_index,
            message: format!("{} out of range: {}", what, value),
        });
    }
    Ok(())
}

pub struct DriverSynth<M: MidiDriver> {
    driver: Option<M>,
    device_index: usize,
}

impl<M: MidiDriver> DriverSynth<M> {
    /// Open output `device_index`, falling back to output 0 once.
    pub fn new(mut driver: M, device_index: usize, verbose_init: bool) -> Result<Self, SoundError> {
        let device_index = match driver.reset(device_index) {
            Ok(()) => device_index,
            Err(e) => {
                if driver.output_count() == 0 {
                    debug!(error = %e, "driver open failed");
                    return Err(SoundError::NoOutputDevices);
                }
                warn!(device_index, error = %e, "could not open MIDI output, retrying with device 0");
                driver.reset(0)?;
                0
            }
        };
        if verbose_init {
            debug!(device_index, "using the platform MIDI driver");
        }
        Ok(DriverSynth {
            driver: Some(driver),
            device_index,
        })
    }

    pub fn driver(&self) -> Option<&M> {
        self.driver.as_ref()
    }

    fn check_note(&self, channel: u8, note: u8, velocity: u8) -> Result<(), SoundError> {
        check_range(self.device_index, "channel", channel as u32, NUM_CHANNELS as u32)?;
        check_range(self.device_index, "note", note as u32, 128)?;
        check_range(self.device_index, "velocity", velocity as u32, 128)
    }
}

#[cfg(feature = "midir")]
impl DriverSynth<midir_driver::MidirDriver> {
    pub fn open(device_index: usize, verbose_init: bool) -> Result<Self, SoundError> {
        Self::new(midir_driver::MidirDriver::new("soundcard"), device_index, verbose_init)
    }
}

impl<M: MidiDriver> Backend for DriverSynth<M> {
    fn kind(&self) -> BackendKind {
        BackendKind::Driver
    }

    fn device_index(&self) -> Option<usize> {
        Some(self.device_index)
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        let device_index = self.device_index;
        for event in stream {
            if let Event::NoteOn { channel, pitch, velocity } | Event::NoteOff { channel, pitch, velocity } = *event {
                self.check_note(channel, pitch, velocity)?;
            }
        }
        let driver = self.driver.as_mut().ok_or(SoundError::Closed {
            kind: BackendKind::Driver,
        })?;
        driver.reset(device_index)?;
        driver.set_tempo(driver_tempo(60, 4))?;
        let mut notelen = Rat::ZERO;
        for event in stream {
            match *event {
                Event::Tempo { bpm, beat_unit } => {
                    let tempo = driver_tempo(bpm, beat_unit);
                    check_range(device_index, "tempo", tempo, MAX_TEMPO)?;
                    driver.set_tempo(tempo)?;
                }
                Event::NoteLenTime(len) => notelen += len,
                Event::NoteOn { channel, pitch, velocity } => {
                    driver.note_on(take_delay(&mut notelen), channel, pitch, velocity)?;
                }
                Event::NoteOff { channel, pitch, velocity } => {
                    driver.note_off(take_delay(&mut notelen), channel, pitch, velocity)?;
                }
                Event::SetPatch { channel, patch } => {
                    driver.program_change(channel, patch)?;
                    driver.note_off(PROGRAM_CHANGE_DELAY, 0, 0, 0)?;
                }
                Event::Bender { channel, .. } => debug!(channel, "bender not supported by the MIDI driver"),
                Event::Volume { channel, .. } => debug!(channel, "volume not supported by the MIDI driver"),
            }
        }
        driver.play()
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        match self.driver.as_mut() {
            Some(driver) => driver.stop(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), SoundError> {
        if let Some(mut driver) = self.driver.take() {
            let stopped = driver.stop();
            driver.close();
            stopped?;
        }
        Ok(())
    }
}

#[cfg(feature = "midir")]
pub use self::midir_driver::MidirDriver;

#[cfg(feature = "midir")]
mod midir_driver {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use midir::{MidiOutput, MidiOutputConnection};
    use tracing::{debug, warn};

    use super::MidiDriver;
    use crate::error::SoundError;

    /// Driver ticks per quarter note in the tempo value's time base.
    const TICKS_PER_TEMPO_UNIT: u64 = 24;

    const SLEEP_SLICE: Duration = Duration::from_millis(10);

    struct TimedMessage {
        wait: Duration,
        bytes: [u8; 3],
    }

    /// [`MidiDriver`] on top of `midir`. Queued messages are played by a
    /// background thread that owns the output connection while it runs.
    pub struct MidirDriver {
        client_name: String,
        device_index: usize,
        conn: Option<MidiOutputConnection>,
        player: Option<JoinHandle<MidiOutputConnection>>,
        stop_flag: Arc<AtomicBool>,
        pending: Vec<TimedMessage>,
        tempo: u32,
    }

    impl MidirDriver {
        pub fn new(client_name: &str) -> Self {
            MidirDriver {
                client_name: client_name.to_string(),
                device_index: 0,
                conn: None,
                player: None,
                stop_flag: Arc::new(AtomicBool::new(false)),
                pending: Vec::new(),
                tempo: super::driver_tempo(60, 4),
            }
        }

        fn error(&self, message: impl ToString) -> SoundError {
            SoundError::Driver {
                device_index: self.device_index,
                message: message.to_string(),
            }
        }

        fn wait_for(&self, delay: u32) -> Duration {
            Duration::from_micros(delay as u64 * self.tempo as u64 / TICKS_PER_TEMPO_UNIT)
        }

        fn push(&mut self, delay: u32, bytes: [u8; 3]) {
            let wait = self.wait_for(delay);
            self.pending.push(TimedMessage { wait, bytes });
        }

        /// Stop the player thread and take the connection back. Returns
        /// whether a player was running.
        fn join_player(&mut self) -> bool {
            let Some(handle) = self.player.take() else {
                return false;
            };
            self.stop_flag.store(true, Ordering::SeqCst);
            match handle.join() {
                Ok(conn) => self.conn = Some(conn),
                Err(_) => warn!("MIDI player thread panicked"),
            }
            self.stop_flag.store(false, Ordering::SeqCst);
            true
        }

        fn silence(&mut self) -> Result<(), SoundError> {
            let device_index = self.device_index;
            if let Some(conn) = self.conn.as_mut() {
                for message in super::all_notes_off() {
                    conn.send(&message).map_err(|e| SoundError::Driver {
                        device_index,
                        message: e.to_string(),
                    })?;
                }
            }
            Ok(())
        }

        /// Join a running player and turn off whatever it left sounding.
        fn interrupt_player(&mut self) {
            if self.join_player() {
                if let Err(e) = self.silence() {
                    warn!(error = %e, "could not silence interrupted stream");
                }
            }
        }
    }

    impl MidiDriver for MidirDriver {
        fn output_count(&self) -> usize {
            MidiOutput::new(&self.client_name)
                .map(|out| out.port_count())
                .unwrap_or(0)
        }

        fn reset(&mut self, device_index: usize) -> Result<(), SoundError> {
            self.interrupt_player();
            self.pending.clear();
            self.device_index = device_index;
            if let Some(conn) = self.conn.take() {
                conn.close();
            }
            let out = MidiOutput::new(&self.client_name).map_err(|e| self.error(e))?;
            let ports = out.ports();
            let port = ports
                .get(device_index)
                .ok_or_else(|| self.error("no such MIDI output"))?;
            let name = out.port_name(port).unwrap_or_default();
            let conn = out
                .connect(port, "soundcard-out")
                .map_err(|e| self.error(e))?;
            debug!(device_index, port = %name, "opened MIDI output");
            self.conn = Some(conn);
            Ok(())
        }

        fn set_tempo(&mut self, tempo: u32) -> Result<(), SoundError> {
            self.tempo = tempo;
            Ok(())
        }

        fn program_change(&mut self, channel: u8, program: u8) -> Result<(), SoundError> {
            // two byte message, the last byte is not sent
            self.push(0, [0xC0 | channel, program, 0]);
            Ok(())
        }

        fn note_on(&mut self, delay: u32, channel: u8, note: u8, velocity: u8) -> Result<(), SoundError> {
            self.push(delay, [0x90 | channel, note, velocity]);
            Ok(())
        }

        fn note_off(&mut self, delay: u32, channel: u8, note: u8, velocity: u8) -> Result<(), SoundError> {
            self.push(delay, [0x80 | channel, note, velocity]);
            Ok(())
        }

        fn play(&mut self) -> Result<(), SoundError> {
            self.interrupt_player();
            let mut conn = self
                .conn
                .take()
                .ok_or_else(|| self.error("MIDI output is not open"))?;
            let messages = std::mem::take(&mut self.pending);
            let stop = Arc::clone(&self.stop_flag);
            let handle = thread::spawn(move || {
                'messages: for msg in messages {
                    let mut remaining = msg.wait;
                    while !remaining.is_zero() {
                        if stop.load(Ordering::SeqCst) {
                            break 'messages;
                        }
                        let slice = remaining.min(SLEEP_SLICE);
                        thread::sleep(slice);
                        remaining -= slice;
                    }
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let len = if msg.bytes[0] & 0xF0 == 0xC0 { 2 } else { 3 };
                    if let Err(e) = conn.send(&msg.bytes[..len]) {
                        warn!(error = %e, "failed to send MIDI message");
                    }
                }
                conn
            });
            self.player = Some(handle);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), SoundError> {
            self.join_player();
            self.pending.clear();
            self.silence()
        }

        fn close(&mut self) {
            self.interrupt_player();
            if let Some(conn) = self.conn.take() {
                conn.close();
            }
        }
    }

    impl Drop for MidirDriver {
        fn drop(&mut self) {
            self.close();
        }
    }
}
