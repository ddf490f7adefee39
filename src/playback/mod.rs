//! # Playback Module
//!
//! The facade front ends use to play music.
//!
//! ## Purpose
//! [`Playback`] owns the single active [`Backend`]. It builds it from an
//! [`OutputMethod`], forwards `play`/`stop`/`close`, reports initialization
//! failures to the caller and offers two ways to divert played music:
//! 1. **Capture** - record the last stream instead of playing it, for tests
//! 2. **Export** - collect every stream and write them to one MIDI file
//!
//! ## States
//! - `Uninitialized` - no backend; `play` fails with [`SoundError::NotInitialized`]
//! - `Ready` - a backend is open and silent
//! - `Playing` - a stream was submitted and `stop` has not been called since
//!
//! A failed [`Playback::initialize`] always leaves the facade `Uninitialized`.
//!
//! ## Example
//! ```rust
//! use soundcard::config::OutputMethod;
//! use soundcard::{Playback, PlaybackState, Rat, Track};
//!
//! let mut playback = Playback::new();
//! playback.initialize(&OutputMethod::Fake, false).unwrap();
//!
//! let mut t = Track::new();
//! t.note(Rat::note_value(4), 60, None);
//!
//! playback.start_capture().unwrap();
//! playback.play_tracks(&[t]).unwrap();
//! assert_eq!(playback.end_capture(1).unwrap(), "p0:0 v0:100 n0:60 d1/4 o60");
//! assert_eq!(playback.state(), PlaybackState::Playing);
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::external::ExternalPlayer;
use crate::backend::fake::FakeSynth;
use crate::backend::{Backend, BackendKind};
use crate::capture::Capture;
use crate::config::OutputMethod;
use crate::error::SoundError;
use crate::midifile;
use crate::stream::EventStream;
use crate::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Uninitialized,
    Ready,
    Playing,
}

/// Streams collected while exporting.
#[derive(Debug)]
struct Export {
    path: PathBuf,
    streams: Vec<EventStream>,
}

/// Device files served by the per-channel sequencer. Every other path is
/// treated as a legacy `/dev/sequencer` device.
const MODERN_DEVICE_FILES: [&str; 2] = ["/dev/sequencer2", "/dev/music"];

pub fn is_modern_device_file(path: &Path) -> bool {
    MODERN_DEVICE_FILES.iter().any(|f| path == Path::new(f))
}

pub struct Playback {
    backend: Option<Capture<Box<dyn Backend>>>,
    state: PlaybackState,
    export: Option<Export>,
    set_patch_delay: u32,
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

impl Playback {
    pub fn new() -> Self {
        Playback {
            backend: None,
            state: PlaybackState::Uninitialized,
            export: None,
            set_patch_delay: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn device_index(&self) -> Option<usize> {
        self.backend.as_ref().and_then(|b| b.device_index())
    }

    /// Silence to insert after program changes in exported MIDI files.
    pub fn set_patch_delay(&mut self, ticks: u32) {
        self.set_patch_delay = ticks;
    }

    /// Close any current backend and open the one described by `method`.
    pub fn initialize(&mut self, method: &OutputMethod, verbose_init: bool) -> Result<(), SoundError> {
        self.close_backend();
        if let OutputMethod::ExternalPlayer { set_patch_delay, .. } = method {
            self.set_patch_delay = *set_patch_delay;
        }
        match open_backend(method, verbose_init) {
            Ok(backend) => {
                self.initialize_with(backend);
                Ok(())
            }
            Err(e) => {
                warn!(method = method.name(), error = %e, "sound initialization failed");
                Err(e)
            }
        }
    }

    /// Use an already constructed backend, closing the current one.
    pub fn initialize_with(&mut self, backend: Box<dyn Backend>) {
        self.close_backend();
        info!(backend = %backend.kind(), device_index = ?backend.device_index(), "sound initialized");
        self.backend = Some(Capture::new(backend));
        self.state = PlaybackState::Ready;
    }

    pub fn play_tracks(&mut self, tracks: &[Track]) -> Result<(), SoundError> {
        self.play_stream(&EventStream::from_tracks(tracks))
    }

    /// Play `stream`, replacing whatever is playing. While exporting the
    /// stream is only collected.
    pub fn play_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        if let Some(export) = self.export.as_mut() {
            export.streams.push(stream.clone());
            return Ok(());
        }
        let backend = self.backend.as_mut().ok_or(SoundError::NotInitialized)?;
        backend.play_event_stream(stream)?;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), SoundError> {
        match self.backend.as_mut() {
            Some(backend) => {
                backend.stop()?;
                self.state = PlaybackState::Ready;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Release the backend. Safe to call in any state.
    pub fn close(&mut self) -> Result<(), SoundError> {
        self.state = PlaybackState::Uninitialized;
        match self.backend.take() {
            Some(mut backend) => backend.close(),
            None => Ok(()),
        }
    }

    fn close_backend(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "closing the previous backend failed");
        }
    }

    /// Record played streams instead of sounding them.
    ///
    /// # Panics
    /// If a capture is already active.
    pub fn start_capture(&mut self) -> Result<(), SoundError> {
        let backend = self.backend.as_mut().ok_or(SoundError::NotInitialized)?;
        backend.start_capture();
        Ok(())
    }

    /// End the capture and return the last captured stream as a string.
    ///
    /// # Panics
    /// If no capture is active.
    pub fn end_capture(&mut self, details: u8) -> Result<String, SoundError> {
        let backend = self.backend.as_mut().ok_or(SoundError::NotInitialized)?;
        Ok(backend.end_capture(details))
    }

    /// Collect everything played from now on for [`Playback::end_export`].
    ///
    /// # Panics
    /// If an export is already active.
    pub fn start_export(&mut self, path: impl Into<PathBuf>) {
        assert!(self.export.is_none(), "export already started");
        let path = path.into();
        debug!(path = %path.display(), "starting MIDI export");
        self.export = Some(Export {
            path,
            streams: Vec::new(),
        });
    }

    pub fn is_exporting(&self) -> bool {
        self.export.is_some()
    }

    /// Write the collected streams to the export file and go back to normal
    /// playback. Nothing is written when nothing was played.
    ///
    /// # Panics
    /// If no export is active.
    pub fn end_export(&mut self) -> Result<(), SoundError> {
        let export = match self.export.take() {
            Some(export) => export,
            None => panic!("no export active"),
        };
        if export.streams.is_empty() {
            debug!(path = %export.path.display(), "nothing played, no MIDI file written");
            return Ok(());
        }
        midifile::write_midi_file(&export.path, &export.streams, self.set_patch_delay)
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(error = %e, "closing backend on drop failed");
        }
    }
}

/// Construct the backend for `method`.
pub fn open_backend(method: &OutputMethod, verbose_init: bool) -> Result<Box<dyn Backend>, SoundError> {
    match method {
        OutputMethod::Fake => Ok(Box::new(FakeSynth::new(verbose_init))),
        OutputMethod::SequencerDevice { device_file, synth } => {
            open_sequencer(method, device_file, *synth, verbose_init)
        }
        OutputMethod::Driver { device_index } => open_driver(method, *device_index, verbose_init),
        OutputMethod::ExternalPlayer {
            player,
            converter,
            set_patch_delay,
        } => Ok(Box::new(ExternalPlayer::new(
            player.clone(),
            converter.clone(),
            *set_patch_delay,
            verbose_init,
        )?)),
        OutputMethod::AlsaSequencer { client, port } => open_alsa(method, (*client, *port), verbose_init),
    }
}

#[cfg(target_os = "linux")]
fn open_sequencer(
    _method: &OutputMethod,
    device_file: &Path,
    synth: usize,
    verbose_init: bool,
) -> Result<Box<dyn Backend>, SoundError> {
    use crate::backend::legacy::LegacySequencer;
    use crate::backend::modern::ModernSequencer;

    if is_modern_device_file(device_file) {
        return Ok(Box::new(ModernSequencer::open(device_file, synth, verbose_init)?));
    }
    if device_file != Path::new("/dev/sequencer") {
        warn!(
            device = %device_file.display(),
            "unknown device file, assuming it is /dev/sequencer compatible"
        );
    }
    Ok(Box::new(LegacySequencer::open(device_file, synth, verbose_init)?))
}

#[cfg(not(target_os = "linux"))]
fn open_sequencer(
    method: &OutputMethod,
    _device_file: &Path,
    _synth: usize,
    _verbose_init: bool,
) -> Result<Box<dyn Backend>, SoundError> {
    Err(SoundError::Unsupported {
        method: method.name().to_string(),
    })
}

#[cfg(feature = "midir")]
fn open_driver(_method: &OutputMethod, device_index: usize, verbose_init: bool) -> Result<Box<dyn Backend>, SoundError> {
    use crate::backend::driver::DriverSynth;

    Ok(Box::new(DriverSynth::open(device_index, verbose_init)?))
}

#[cfg(not(feature = "midir"))]
fn open_driver(method: &OutputMethod, _device_index: usize, _verbose_init: bool) -> Result<Box<dyn Backend>, SoundError> {
    Err(SoundError::Unsupported {
        method: method.name().to_string(),
    })
}

#[cfg(all(feature = "alsa", target_os = "linux"))]
fn open_alsa(_method: &OutputMethod, dest: (i32, i32), verbose_init: bool) -> Result<Box<dyn Backend>, SoundError> {
    use crate::backend::alsa_seq::AlsaSequencer;

    Ok(Box::new(AlsaSequencer::open(dest, verbose_init)?))
}

#[cfg(not(all(feature = "alsa", target_os = "linux")))]
fn open_alsa(method: &OutputMethod, _dest: (i32, i32), _verbose_init: bool) -> Result<Box<dyn Backend>, SoundError> {
    Err(SoundError::Unsupported {
        method: method.name().to_string(),
    })
}

#[cfg(test)]
mod tests;
