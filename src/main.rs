use std::env;
use std::process;
use std::thread;
use std::time::Duration;

use soundcard::{Playback, Rat, SoundConfig, Track};
use tracing_subscriber::EnvFilter;

/// A C major scale followed by a chord, with a bass line on a second track.
fn demo_tracks() -> Vec<Track> {
    let mut melody = Track::new().with_name("melody");
    melody.set_bpm(120, 4);
    melody.set_patch(0);
    for pitch in [60, 62, 64, 65, 67, 69, 71, 72] {
        melody.note(Rat::note_value(8), pitch, None);
    }
    for pitch in [60, 64, 67] {
        melody.start_note(pitch, None);
    }
    melody.notelen_time(Rat::note_value(2));
    for pitch in [60, 64, 67] {
        melody.stop_note(pitch, None);
    }

    let mut bass = Track::new().with_name("bass");
    bass.set_patch(32);
    bass.note(Rat::note_value(2), 36, Some(90));
    bass.note(Rat::note_value(2), 43, Some(90));
    bass.note(Rat::note_value(2), 36, Some(90));
    vec![melody, bass]
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: soundcard <config.yaml>");
        eprintln!("       soundcard <config.yaml> --export <output.mid>");
        process::exit(1);
    }

    let config_path = &args[1];
    let mut export_path: Option<&String> = None;

    // Parse flags
    if args.len() > 2 {
        if args[2] != "--export" || args.len() != 4 {
            eprintln!("Usage: soundcard <config.yaml> --export <output.mid>");
            process::exit(1);
        }
        export_path = args.get(3);
    }

    let config = match SoundConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading config '{}': {}", config_path, e);
            process::exit(1);
        }
    };

    let tracks = demo_tracks();

    if let Some(path) = export_path {
        if let Err(e) = soundcard::export_midi(path, &tracks, config.set_patch_delay) {
            eprintln!("Error writing to '{}': {}", path, e);
            process::exit(1);
        }
        eprintln!("Wrote MIDI file to {}", path);
        return;
    }

    let method = match config.output_method() {
        Ok(method) => method,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let mut playback = Playback::new();
    playback.set_patch_delay(config.set_patch_delay);
    if let Err(e) = playback.initialize(&method, config.verbose_init) {
        eprintln!("Sound init failed ({}): {}", method.name(), e);
        process::exit(1);
    }

    if let Err(e) = playback.play_tracks(&tracks) {
        eprintln!("Playback error: {}", e);
        process::exit(1);
    }
    // playback runs in the device queue or player process
    thread::sleep(Duration::from_secs(4));

    if let Err(e) = playback.close() {
        eprintln!("Error closing sound output: {}", e);
        process::exit(1);
    }
}
