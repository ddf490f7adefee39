//! # Error Types
//!
//! This module defines all error types for the soundcard playback engine.
//!
//! Every error carries enough context (device path, device index, binary name,
//! underlying OS error) for a front end to tell the user which output method
//! failed and why.
//!
//! ## Error Types
//! - `Syscall` - Opening or controlling a sequencer device file failed
//! - `NoSynths` - The sequencer device reports no synthesizers
//! - `Driver` / `NoOutputDevices` - The platform MIDI driver could not be used
//! - `Connection` - The low-level sequencer client, port or queue could not be set up
//! - `BinaryNotFound` / `BinaryLaunch` / `BinaryFailed` - An external player or converter could not be run
//! - `Unsupported` - The output method is not available in this build
//! - `NotInitialized` / `Closed` - Playback attempted without a usable backend
//! - `Config` - The configuration file is invalid
//!
//! Running out of synthesizer voices is *not* an error: the voice allocator
//! returns `None` and the note is skipped.
//!
//! ## Usage
//! ```rust
//! use soundcard::{Playback, SoundError};
//!
//! let mut playback = Playback::new();
//! match playback.play_tracks(&[]) {
//!     Err(SoundError::NotInitialized) => eprintln!("configure sound first"),
//!     Err(SoundError::BinaryNotFound { binary, .. }) => {
//!         eprintln!("install {} or fix the player path", binary);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//!     Ok(()) => {}
//! }
//! ```

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::backend::BackendKind;

#[derive(Error, Debug)]
pub enum SoundError {
    /// A system call on a sequencer device failed.
    ///
    /// `context` names the operation (for example the ioctl), `source` holds the
    /// OS error so [`SoundError::errno`] can report the raw error code.
    #[error("While trying to open the device {}\n{context}: {source}", device.display())]
    Syscall {
        device: PathBuf,
        context: String,
        #[source]
        source: io::Error,
    },

    /// The sequencer device opened fine but has no synthesizers attached.
    ///
    /// # Example
    /// ```
    /// # use soundcard::SoundError;
    /// let err = SoundError::NoSynths { device: "/dev/sequencer".into() };
    /// assert_eq!(
    ///     err.to_string(),
    ///     "SNDCTL_SEQ_NRSYNTHS report that there are no synths on /dev/sequencer."
    /// );
    /// ```
    #[error("SNDCTL_SEQ_NRSYNTHS report that there are no synths on {}.", device.display())]
    NoSynths { device: PathBuf },

    /// The platform MIDI driver refused to open or accept events.
    #[error("MIDI driver error on device {device_index}: {message}")]
    Driver { device_index: usize, message: String },

    /// The platform MIDI driver has no output devices at all.
    #[error("No MIDI output devices available.")]
    NoOutputDevices,

    /// The low-level sequencer connection could not be established.
    #[error("Sequencer connection failed: {message}")]
    Connection { message: String },

    /// The external binary does not exist or is not on the search path.
    ///
    /// The remedy is to install the program or fix its path.
    #[error("Tried `{binary}`: {source}. Please check that the program is installed and on your PATH.")]
    BinaryNotFound {
        binary: String,
        #[source]
        source: io::Error,
    },

    /// The external binary exists but could not be started, for example
    /// because it is not executable.
    ///
    /// The remedy is to fix the program's permissions or configured path.
    #[error("Could not start `{binary}`: {source}")]
    BinaryLaunch {
        binary: String,
        #[source]
        source: io::Error,
    },

    /// The external binary was found and started, but exited abnormally.
    ///
    /// The remedy is to reconfigure the program's options.
    #[error("Running `{binary}` failed: {status}")]
    BinaryFailed { binary: String, status: ExitStatus },

    /// The requested output method is not compiled into this build.
    #[error("Output method '{method}' is not supported by this build")]
    Unsupported { method: String },

    /// Playback was requested before any output method was initialized.
    #[error("Sound output has not been initialized")]
    NotInitialized,

    /// A backend was used after it was closed.
    #[error("Attempted to use the {kind} backend after closing it")]
    Closed { kind: BackendKind },

    /// Invalid configuration.
    #[error("Invalid sound configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SoundError {
    /// The raw OS error code behind this error, if there is one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            SoundError::Syscall { source, .. }
            | SoundError::BinaryNotFound { source, .. }
            | SoundError::BinaryLaunch { source, .. } => source.raw_os_error(),
            SoundError::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// True for failures that mean the chosen output method is unusable as configured.
    pub fn is_init_failure(&self) -> bool {
        matches!(
            self,
            SoundError::Syscall { .. }
                | SoundError::NoSynths { .. }
                | SoundError::Driver { .. }
                | SoundError::NoOutputDevices
                | SoundError::Connection { .. }
                | SoundError::Unsupported { .. }
        )
    }
}
