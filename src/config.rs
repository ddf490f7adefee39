//! # Configuration
//!
//! Sound output settings read from a YAML file.
//!
//! ## Keys
//! - `type` - `fake-synth`, `sequencer-device`, `winsynth`, `external-midiplayer`
//!   or `alsa-sequencer`
//! - `device_file`, `synth_number` - sequencer device and synth to use
//! - `alsa_client_port` - `[client, port]` to connect the ALSA client to
//! - `midi_player`, `midi_player_options` - external player command
//! - `midi_converter`, `midi_converter_options`, `converted_extension` -
//!   optional converter run before the player
//! - `set_patch_delay` - ticks of silence after a program change in MIDI files
//! - `verbose_init` - log device details when initializing
//!
//! Every key is optional.
//!
//! ## Example
//! ```rust
//! use soundcard::config::{OutputMethod, SoundConfig};
//!
//! let config = SoundConfig::from_yaml("type: sequencer-device\nsynth_number: 1\n").unwrap();
//! assert_eq!(
//!     config.output_method().unwrap(),
//!     OutputMethod::SequencerDevice { device_file: "/dev/sequencer2".into(), synth: 1 }
//! );
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::external::{ConverterCommand, PlayerCommand};
use crate::error::SoundError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputType {
    #[default]
    FakeSynth,
    SequencerDevice,
    Winsynth,
    ExternalMidiplayer,
    AlsaSequencer,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SoundConfig {
    #[serde(rename = "type")]
    pub output_type: OutputType,
    pub device_file: PathBuf,
    pub synth_number: usize,
    pub alsa_client_port: (i32, i32),
    pub midi_player: String,
    pub midi_player_options: String,
    pub midi_converter: Option<String>,
    pub midi_converter_options: String,
    pub converted_extension: String,
    pub set_patch_delay: u32,
    pub verbose_init: bool,
}

impl Default for SoundConfig {
    fn default() -> Self {
        SoundConfig {
            output_type: OutputType::FakeSynth,
            device_file: PathBuf::from("/dev/sequencer2"),
            synth_number: 0,
            alsa_client_port: (128, 0),
            midi_player: "timidity".to_string(),
            midi_player_options: "-idq".to_string(),
            midi_converter: None,
            midi_converter_options: "-Ow %(in)s -o %(out)s".to_string(),
            converted_extension: "wav".to_string(),
            set_patch_delay: 0,
            verbose_init: false,
        }
    }
}

/// A fully specified output target, ready to be initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMethod {
    Fake,
    /// `/dev/sequencer2` and `/dev/music` open the modern sequencer, any
    /// other path the legacy one.
    SequencerDevice { device_file: PathBuf, synth: usize },
    Driver { device_index: usize },
    ExternalPlayer {
        player: PlayerCommand,
        converter: Option<ConverterCommand>,
        set_patch_delay: u32,
    },
    AlsaSequencer { client: i32, port: i32 },
}

impl OutputMethod {
    /// Name of the method as written in the configuration.
    pub fn name(&self) -> &'static str {
        match self {
            OutputMethod::Fake => "fake-synth",
            OutputMethod::SequencerDevice { .. } => "sequencer-device",
            OutputMethod::Driver { .. } => "winsynth",
            OutputMethod::ExternalPlayer { .. } => "external-midiplayer",
            OutputMethod::AlsaSequencer { .. } => "alsa-sequencer",
        }
    }
}

impl SoundConfig {
    pub fn from_yaml(content: &str) -> Result<Self, SoundError> {
        // an empty document means all defaults
        if content.trim().is_empty() {
            return Ok(SoundConfig::default());
        }
        serde_yaml::from_str(content).map_err(|e| SoundError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SoundError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn output_method(&self) -> Result<OutputMethod, SoundError> {
        let method = match self.output_type {
            OutputType::FakeSynth => OutputMethod::Fake,
            OutputType::SequencerDevice => OutputMethod::SequencerDevice {
                device_file: self.device_file.clone(),
                synth: self.synth_number,
            },
            OutputType::Winsynth => OutputMethod::Driver {
                device_index: self.synth_number,
            },
            OutputType::ExternalMidiplayer => {
                if self.midi_player.trim().is_empty() {
                    return Err(SoundError::Config("midi_player is empty".to_string()));
                }
                let converter = match self.midi_converter.as_deref() {
                    Some(binary) if !binary.trim().is_empty() => Some(ConverterCommand::new(
                        binary,
                        &self.midi_converter_options,
                        &self.converted_extension,
                    )),
                    _ => None,
                };
                OutputMethod::ExternalPlayer {
                    player: PlayerCommand::new(&self.midi_player, &self.midi_player_options),
                    converter,
                    set_patch_delay: self.set_patch_delay,
                }
            }
            OutputType::AlsaSequencer => {
                let (client, port) = self.alsa_client_port;
                if client < 0 || port < 0 {
                    return Err(SoundError::Config(format!(
                        "Invalid alsa_client_port: {}:{}",
                        client, port
                    )));
                }
                OutputMethod::AlsaSequencer { client, port }
            }
        };
        Ok(method)
    }
}
