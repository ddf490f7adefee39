//! OSS sequencer devices (`/dev/sequencer`, `/dev/music`)
//!
//! Both sequencer backends talk to the device through [`SequencerDevice`]:
//! a handful of ioctls plus a buffer of 8 byte event records that is written
//! to the device in one go. [`OssDevice`] is the real device on Linux.

use std::path::Path;

use tracing::{info, warn};

use crate::error::SoundError;

/// Controller number of the channel main volume.
pub const CTL_MAIN_VOLUME: u8 = 7;

const EV_TIMING: u8 = 0x81;
const EV_CHN_COMMON: u8 = 0x92;
const EV_CHN_VOICE: u8 = 0x93;
const TMR_WAIT_REL: u8 = 2;
const TMR_START: u8 = 4;
const TMR_TEMPO: u8 = 6;

/// One queued sequencer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCommand {
    StartNote { voice: u8, note: u8, velocity: u8 },
    StopNote { voice: u8, note: u8, velocity: u8 },
    SetPatch { voice: u8, patch: u8 },
    Control { channel: u8, controller: u8, value: u16 },
    Bender { channel: u8, value: u16 },
    /// Wait this many timer ticks before the following events.
    DeltaTime(u32),
    StartTimer,
    /// Change the timer tempo at this point of the queue.
    TimerTempo(u32),
}

impl SeqCommand {
    /// The event record the kernel expects for this command on `synth`.
    pub fn encode(&self, synth: u8) -> [u8; 8] {
        match *self {
            SeqCommand::StartNote { voice, note, velocity } => {
                [EV_CHN_VOICE, synth, 0x90, voice, note, velocity, 0, 0]
            }
            SeqCommand::StopNote { voice, note, velocity } => {
                [EV_CHN_VOICE, synth, 0x80, voice, note, velocity, 0, 0]
            }
            SeqCommand::SetPatch { voice, patch } => [EV_CHN_COMMON, synth, 0xC0, voice, patch, 0, 0, 0],
            SeqCommand::Control { channel, controller, value } => {
                let [lo, hi] = value.to_le_bytes();
                [EV_CHN_COMMON, synth, 0xB0, channel, controller, 0, lo, hi]
            }
            SeqCommand::Bender { channel, value } => {
                let [lo, hi] = value.to_le_bytes();
                [EV_CHN_COMMON, synth, 0xE0, channel, 0, 0, lo, hi]
            }
            SeqCommand::DeltaTime(ticks) => {
                let [a, b, c, d] = ticks.to_le_bytes();
                [EV_TIMING, TMR_WAIT_REL, 0, 0, a, b, c, d]
            }
            SeqCommand::StartTimer => [EV_TIMING, TMR_START, 0, 0, 0, 0, 0, 0],
            SeqCommand::TimerTempo(tempo) => {
                let [a, b, c, d] = tempo.to_le_bytes();
                [EV_TIMING, TMR_TEMPO, 0, 0, a, b, c, d]
            }
        }
    }
}

/// Name and polyphony of one synthesizer behind the sequencer device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthInfo {
    pub name: String,
    pub nr_voices: usize,
}

/// The operations the sequencer backends need from a device.
pub trait SequencerDevice {
    fn path(&self) -> &Path;

    /// `SNDCTL_SEQ_RESET`: drop queued events and silence the synths.
    fn reset(&mut self) -> Result<(), SoundError>;

    /// `SNDCTL_SEQ_NRSYNTHS`
    fn num_synths(&mut self) -> Result<usize, SoundError>;

    /// `SNDCTL_SYNTH_INFO`
    fn synth_info(&mut self, synth: usize) -> Result<SynthInfo, SoundError>;

    /// `SNDCTL_TMR_TIMEBASE`, only supported by `/dev/music`.
    fn set_timebase(&mut self, ticks_per_quarter: u32) -> Result<(), SoundError>;

    /// `SNDCTL_TMR_TEMPO`, only supported by `/dev/music`.
    fn set_tempo(&mut self, quarter_bpm: u32) -> Result<(), SoundError>;

    /// Append a command to the event buffer.
    fn queue(&mut self, synth: u8, command: SeqCommand);

    /// Write the event buffer to the device.
    fn dump(&mut self) -> Result<(), SoundError>;

    /// Reset and release the device. Calling it again does nothing.
    fn close(&mut self) -> Result<(), SoundError>;
}

/// A sequencer device after the common open sequence.
#[derive(Debug)]
pub struct OpenedSynth<D> {
    pub device: D,
    /// The synth in use, possibly lowered from the requested one.
    pub synth: usize,
    pub num_voices: usize,
}

/// Reset `device`, pick synth `requested` (or the last one if there are
/// fewer) and read its voice count.
pub fn open_synth<D: SequencerDevice>(
    mut device: D,
    requested: usize,
    verbose_init: bool,
) -> Result<OpenedSynth<D>, SoundError> {
    device.reset()?;
    let nrsynths = match device.num_synths() {
        Ok(n) => n,
        Err(e) => {
            let _ = device.close();
            return Err(e);
        }
    };
    let mut synth = requested;
    if synth >= nrsynths {
        if nrsynths == 0 {
            let _ = device.close();
            return Err(SoundError::NoSynths {
                device: device.path().to_path_buf(),
            });
        }
        warn!(requested, available = nrsynths, "synth number too high, using the last synth");
        synth = nrsynths - 1;
    }
    let num_voices = match device.synth_info(synth) {
        Ok(si) => si.nr_voices,
        Err(e) => {
            let _ = device.close();
            return Err(e);
        }
    };
    if verbose_init {
        info!(device = %device.path().display(), "the following sound devices have been found");
        for x in 0..nrsynths {
            let name = device.synth_info(x).map(|si| si.name).unwrap_or_default();
            info!("{}: {}", x, name);
        }
        info!(synth, num_voices, "using synth");
    }
    Ok(OpenedSynth {
        device,
        synth,
        num_voices,
    })
}

#[cfg(target_os = "linux")]
pub use self::linux::OssDevice;

#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::CStr;
    use std::fs::{File, OpenOptions};
    use std::io::{self, Write};
    use std::os::unix::io::AsRawFd;
    use std::path::{Path, PathBuf};

    use libc::{c_char, c_int, c_uint};
    use tracing::debug;

    use super::{SeqCommand, SequencerDevice, SynthInfo};
    use crate::error::SoundError;

    const SNDCTL_SEQ_RESET: u32 = 0x0000_5100;
    const SNDCTL_SEQ_NRSYNTHS: u32 = 0x8004_510A;
    const SNDCTL_SYNTH_INFO: u32 = 0xC08C_5102;
    const SNDCTL_TMR_TIMEBASE: u32 = 0xC004_5401;
    const SNDCTL_TMR_TEMPO: u32 = 0xC004_5405;

    #[repr(C)]
    #[allow(dead_code)]
    struct RawSynthInfo {
        name: [c_char; 30],
        device: c_int,
        synth_type: c_int,
        synth_subtype: c_int,
        perc_mode: c_int,
        nr_voices: c_int,
        nr_drums: c_int,
        instr_bank_size: c_int,
        capabilities: c_uint,
        dummies: [c_int; 19],
    }

    /// An OSS sequencer device file opened write-only.
    #[derive(Debug)]
    pub struct OssDevice {
        path: PathBuf,
        file: Option<File>,
        buf: Vec<u8>,
    }

    impl OssDevice {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, SoundError> {
            let path = path.as_ref().to_path_buf();
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|source| SoundError::Syscall {
                    device: path.clone(),
                    context: "open() failed".to_string(),
                    source,
                })?;
            Ok(OssDevice {
                path,
                file: Some(file),
                buf: Vec::with_capacity(2048),
            })
        }

        fn fd(&self) -> Result<c_int, SoundError> {
            match &self.file {
                Some(f) => Ok(f.as_raw_fd()),
                None => Err(SoundError::Syscall {
                    device: self.path.clone(),
                    context: "device is closed".to_string(),
                    source: io::Error::from_raw_os_error(libc::EBADF),
                }),
            }
        }

        fn ioctl<T>(&self, request: u32, name: &str, arg: *mut T) -> Result<(), SoundError> {
            let fd = self.fd()?;
            // SAFETY: fd is an open descriptor and arg points to a value of the
            // type the request expects.
            let rc = unsafe { libc::ioctl(fd, request as _, arg) };
            if rc == -1 {
                return Err(SoundError::Syscall {
                    device: self.path.clone(),
                    context: format!("ioctl(seqfd, {}) failed", name),
                    source: io::Error::last_os_error(),
                });
            }
            Ok(())
        }

        fn int_ioctl(&self, request: u32, name: &str, value: c_int) -> Result<c_int, SoundError> {
            let mut v = value;
            self.ioctl(request, name, &mut v as *mut c_int)?;
            Ok(v)
        }
    }

    impl SequencerDevice for OssDevice {
        fn path(&self) -> &Path {
            &self.path
        }

        fn reset(&mut self) -> Result<(), SoundError> {
            self.buf.clear();
            self.ioctl(SNDCTL_SEQ_RESET, "SNDCTL_SEQ_RESET", std::ptr::null_mut::<c_int>())
        }

        fn num_synths(&mut self) -> Result<usize, SoundError> {
            let n = self.int_ioctl(SNDCTL_SEQ_NRSYNTHS, "SNDCTL_SEQ_NRSYNTHS", 0)?;
            Ok(n.max(0) as usize)
        }

        fn synth_info(&mut self, synth: usize) -> Result<SynthInfo, SoundError> {
            // SAFETY: RawSynthInfo is plain old data, all zero is a valid value.
            let mut si: RawSynthInfo = unsafe { std::mem::zeroed() };
            si.device = synth as c_int;
            self.ioctl(SNDCTL_SYNTH_INFO, "SNDCTL_SYNTH_INFO", &mut si as *mut RawSynthInfo)?;
            // the kernel does not promise a terminating nul
            si.name[29] = 0;
            // SAFETY: name is nul terminated above.
            let name = unsafe { CStr::from_ptr(si.name.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            Ok(SynthInfo {
                name,
                nr_voices: si.nr_voices.max(0) as usize,
            })
        }

        fn set_timebase(&mut self, ticks_per_quarter: u32) -> Result<(), SoundError> {
            self.int_ioctl(SNDCTL_TMR_TIMEBASE, "SNDCTL_TMR_TIMEBASE", ticks_per_quarter as c_int)
                .map(|_| ())
        }

        fn set_tempo(&mut self, quarter_bpm: u32) -> Result<(), SoundError> {
            self.int_ioctl(SNDCTL_TMR_TEMPO, "SNDCTL_TMR_TEMPO", quarter_bpm as c_int)
                .map(|_| ())
        }

        fn queue(&mut self, synth: u8, command: SeqCommand) {
            self.buf.extend_from_slice(&command.encode(synth));
        }

        fn dump(&mut self) -> Result<(), SoundError> {
            if self.buf.is_empty() {
                return Ok(());
            }
            let path = self.path.clone();
            let Some(file) = self.file.as_mut() else {
                return Err(SoundError::Syscall {
                    device: path,
                    context: "write() on a closed device".to_string(),
                    source: io::Error::from_raw_os_error(libc::EBADF),
                });
            };
            debug!(bytes = self.buf.len(), "writing sequencer buffer");
            let result = file.write_all(&self.buf);
            self.buf.clear();
            result.map_err(|source| SoundError::Syscall {
                device: path,
                context: "write() failed".to_string(),
                source,
            })
        }

        fn close(&mut self) -> Result<(), SoundError> {
            if self.file.is_none() {
                return Ok(());
            }
            let reset = self.reset();
            self.file = None;
            reset
        }
    }

    impl Drop for OssDevice {
        fn drop(&mut self) {
            let _ = self.close();
        }
    }
}
