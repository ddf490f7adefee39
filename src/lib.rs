pub mod backend;
pub mod capture;
pub mod config;
pub mod error;
pub mod event;
pub mod instruments;
pub mod midifile;
pub mod playback;
pub mod rat;
pub mod stream;
pub mod track;
pub mod voices;

pub use backend::{Backend, BackendKind};
pub use capture::Capture;
pub use config::{OutputMethod, SoundConfig};
pub use error::*;
pub use event::Event;
pub use playback::{Playback, PlaybackState};
pub use rat::Rat;
pub use stream::EventStream;
pub use track::{Track, TrackEvent};

use std::path::Path;

/// Merge `tracks` and write them to a standard MIDI file.
pub fn export_midi(path: impl AsRef<Path>, tracks: &[Track], set_patch_delay: u32) -> Result<(), SoundError> {
    midifile::write_midi_file(path, &[EventStream::from_tracks(tracks)], set_patch_delay)
}

/// Initialize playback from a configuration file.
pub fn playback_from_config(path: impl AsRef<Path>) -> Result<Playback, SoundError> {
    let config = SoundConfig::load(path)?;
    let mut playback = Playback::new();
    playback.set_patch_delay(config.set_patch_delay);
    playback.initialize(&config.output_method()?, config.verbose_init)?;
    Ok(playback)
}
