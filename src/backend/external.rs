//! External MIDI player
//!
//! Every stream is written to a temporary MIDI file which an external program
//! then plays. An optional converter (for example a MIDI to WAV renderer) runs
//! first, to completion. Starting playback kills the previous player process
//! if it is still running.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use tracing::{debug, info};

use super::{Backend, BackendKind};
use crate::error::SoundError;
use crate::midifile;
use crate::stream::EventStream;

fn split_options(options: &str) -> Vec<String> {
    options
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve `binary` on the search path. A name with a directory part is
/// used as given.
fn resolve(binary: &str) -> Result<PathBuf, SoundError> {
    let path = Path::new(binary);
    if path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }
    which::which(binary).map_err(|e| SoundError::BinaryNotFound {
        binary: binary.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, e.to_string()),
    })
}

/// Map an error from starting `binary` to a missing or an unusable program.
fn launch_error(binary: &str, source: io::Error) -> SoundError {
    let binary = binary.to_string();
    if source.kind() == io::ErrorKind::NotFound {
        SoundError::BinaryNotFound { binary, source }
    } else {
        SoundError::BinaryLaunch { binary, source }
    }
}

/// A player program and its options.
///
/// In the options, the first argument containing `%s` gets the file name
/// substituted. Further bare `%s` arguments are dropped, and when no
/// argument contained `%s` the file name is appended.
///
/// # Example
/// ```
/// use std::path::Path;
/// use soundcard::backend::external::PlayerCommand;
///
/// let cmd = PlayerCommand::new("timidity", "-idq --volume=%s");
/// assert_eq!(cmd.args_for(Path::new("/tmp/a.mid")), ["-idq", "--volume=/tmp/a.mid"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCommand {
    pub binary: String,
    pub options: Vec<String>,
}

impl PlayerCommand {
    pub fn new(binary: &str, options: &str) -> Self {
        PlayerCommand {
            binary: binary.to_string(),
            options: split_options(options),
        }
    }

    pub fn args_for(&self, file: &Path) -> Vec<String> {
        let file = file.display().to_string();
        let mut args = self.options.clone();
        let found = match args.iter().position(|a| a.contains("%s")) {
            Some(i) => {
                args[i] = args[i].replacen("%s", &file, 1);
                true
            }
            None => false,
        };
        args.retain(|a| a != "%s");
        if !found {
            args.push(file);
        }
        args
    }

    /// Start the player on `file` without waiting for it.
    pub fn spawn(&self, file: &Path) -> Result<Child, SoundError> {
        let program = resolve(&self.binary)?;
        let args = self.args_for(file);
        debug!(binary = %self.binary, ?args, "starting player");
        Command::new(program)
            .args(&args)
            .spawn()
            .map_err(|source| launch_error(&self.binary, source))
    }
}

/// A converter program run on the MIDI file before playing it.
///
/// `%(in)s` and `%(out)s` in the options are replaced by the input and output
/// file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterCommand {
    pub binary: String,
    pub options: Vec<String>,
    /// Extension of the converted file, without the dot.
    pub extension: String,
}

impl ConverterCommand {
    pub fn new(binary: &str, options: &str, extension: &str) -> Self {
        ConverterCommand {
            binary: binary.to_string(),
            options: split_options(options),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn args_for(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        self.options
            .iter()
            .map(|a| a.replace("%(in)s", &input).replace("%(out)s", &output))
            .collect()
    }

    /// Run the converter and wait for it to finish.
    pub fn run(&self, input: &Path, output: &Path) -> Result<(), SoundError> {
        let program = resolve(&self.binary)?;
        let args = self.args_for(input, output);
        debug!(binary = %self.binary, ?args, "running converter");
        let status = Command::new(program)
            .args(&args)
            .status()
            .map_err(|source| launch_error(&self.binary, source))?;
        if !status.success() {
            return Err(SoundError::BinaryFailed {
                binary: self.binary.clone(),
                status,
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ExternalPlayer {
    player: PlayerCommand,
    converter: Option<ConverterCommand>,
    set_patch_delay: u32,
    midi_file: Option<tempfile::TempPath>,
    converted: Option<PathBuf>,
    child: Option<Child>,
}

impl ExternalPlayer {
    /// Create the temporary MIDI file. The player binary is only looked up
    /// when something is played.
    pub fn new(
        player: PlayerCommand,
        converter: Option<ConverterCommand>,
        set_patch_delay: u32,
        verbose_init: bool,
    ) -> Result<Self, SoundError> {
        let midi_file = tempfile::Builder::new()
            .prefix("soundcard-")
            .suffix(".mid")
            .tempfile()?
            .into_temp_path();
        if verbose_init {
            info!(player = %player.binary, tmpfile = %midi_file.display(), "using an external MIDI player");
        }
        Ok(ExternalPlayer {
            player,
            converter,
            set_patch_delay,
            midi_file: Some(midi_file),
            converted: None,
            child: None,
        })
    }

    /// Path of the temporary MIDI file, until the player is closed.
    pub fn midi_file(&self) -> Option<&Path> {
        self.midi_file.as_deref()
    }

    /// Whether a player process started by this backend is still running.
    pub fn is_playing(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    debug!(error = %e, "failed to kill player");
                }
            }
            // reap
            let _ = child.wait();
        }
    }
}

impl Backend for ExternalPlayer {
    fn kind(&self) -> BackendKind {
        BackendKind::ExternalProcess
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        let midi_file = self.midi_file.as_ref().ok_or(SoundError::Closed {
            kind: BackendKind::ExternalProcess,
        })?;
        let midi_path = midi_file.to_path_buf();
        midifile::write_midi_file(&midi_path, std::slice::from_ref(stream), self.set_patch_delay)?;
        let file = match &self.converter {
            Some(converter) => {
                let out = midi_path.with_extension(&converter.extension);
                self.converted = Some(out.clone());
                converter.run(&midi_path, &out)?;
                out
            }
            None => midi_path,
        };
        self.kill_child();
        self.child = Some(self.player.spawn(&file)?);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        self.kill_child();
        Ok(())
    }

    fn close(&mut self) -> Result<(), SoundError> {
        self.kill_child();
        if let Some(converted) = self.converted.take() {
            if let Err(e) = std::fs::remove_file(&converted) {
                debug!(file = %converted.display(), error = %e, "could not remove converted file");
            }
        }
        if let Some(midi_file) = self.midi_file.take() {
            midi_file.close()?;
        }
        Ok(())
    }
}

impl Drop for ExternalPlayer {
    fn drop(&mut self) {
        self.kill_child();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat::Rat;
    use crate::track::Track;

    const MISSING: &str = "soundcard-no-such-player-binary";

    fn phrase() -> Vec<Track> {
        let mut t = Track::new();
        t.note(Rat::note_value(4), 60, None);
        vec![t]
    }

    #[test]
    fn test_player_args() {
        let file = Path::new("/tmp/x.mid");
        assert_eq!(PlayerCommand::new("p", "").args_for(file), ["/tmp/x.mid"]);
        assert_eq!(PlayerCommand::new("p", "-q").args_for(file), ["-q", "/tmp/x.mid"]);
        assert_eq!(PlayerCommand::new("p", "%s -q").args_for(file), ["/tmp/x.mid", "-q"]);
        assert_eq!(
            PlayerCommand::new("p", "-a  %s %s -b").args_for(file),
            ["-a", "/tmp/x.mid", "-b"]
        );
        assert_eq!(PlayerCommand::new("p", "--file=%s").args_for(file), ["--file=/tmp/x.mid"]);
    }

    #[test]
    fn test_converter_args() {
        let conv = ConverterCommand::new("timidity", "-Ow %(in)s -o %(out)s", ".wav");
        assert_eq!(conv.extension, "wav");
        assert_eq!(
            conv.args_for(Path::new("a.mid"), Path::new("a.wav")),
            ["-Ow", "a.mid", "-o", "a.wav"]
        );
    }

    #[test]
    fn test_missing_player_is_not_found() {
        let mut player = ExternalPlayer::new(PlayerCommand::new(MISSING, ""), None, 0, false).unwrap();
        match player.play_tracks(&phrase()) {
            Err(SoundError::BinaryNotFound { binary, .. }) => assert_eq!(binary, MISSING),
            other => panic!("expected BinaryNotFound, got {:?}", other),
        }
        // the file was still written
        let written = std::fs::read(player.midi_file().unwrap()).unwrap();
        assert_eq!(&written[..4], b"MThd");
        player.close().unwrap();
    }

    #[test]
    fn test_missing_converter_is_not_found() {
        let conv = ConverterCommand::new(MISSING, "%(in)s %(out)s", "wav");
        let mut player = ExternalPlayer::new(PlayerCommand::new(MISSING, ""), Some(conv), 0, false).unwrap();
        assert!(matches!(
            player.play_tracks(&phrase()),
            Err(SoundError::BinaryNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_converter_is_binary_failed() {
        let conv = ConverterCommand::new("false", "%(in)s", "wav");
        let mut player = ExternalPlayer::new(PlayerCommand::new("true", ""), Some(conv), 0, false).unwrap();
        match player.play_tracks(&phrase()) {
            Err(SoundError::BinaryFailed { binary, status }) => {
                assert_eq!(binary, "false");
                assert!(!status.success());
            }
            other => panic!("expected BinaryFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unrunnable_file_is_launch_failure() {
        use std::io::Write;

        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "not a program").unwrap();
        let script = script.into_temp_path();
        let binary = script.display().to_string();

        match PlayerCommand::new(&binary, "").spawn(Path::new("a.mid")) {
            Err(SoundError::BinaryLaunch { binary: b, source }) => {
                assert_eq!(b, binary);
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("expected BinaryLaunch, got {:?}", other.map(|_| ())),
        }
        let conv = ConverterCommand::new(&binary, "%(in)s", "wav");
        assert!(matches!(
            conv.run(Path::new("a.mid"), Path::new("a.wav")),
            Err(SoundError::BinaryLaunch { .. })
        ));

        let gone = PlayerCommand::new("/nonexistent/soundcard-player", "");
        assert!(matches!(
            gone.spawn(Path::new("a.mid")),
            Err(SoundError::BinaryNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_play_stop_close() {
        let mut player = ExternalPlayer::new(PlayerCommand::new("true", ""), None, 0, false).unwrap();
        player.play_tracks(&phrase()).unwrap();
        player.play_tracks(&phrase()).unwrap();
        player.stop().unwrap();
        assert!(!player.is_playing());
        let path = player.midi_file().unwrap().to_path_buf();
        assert!(path.exists());
        player.close().unwrap();
        player.close().unwrap();
        assert!(!path.exists());
        assert!(matches!(
            player.play_tracks(&phrase()),
            Err(SoundError::Closed { kind: BackendKind::ExternalProcess })
        ));
    }
}
