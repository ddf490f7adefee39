use std::cell::RefCell;
use std::rc::Rc;

use super::*;
use crate::rat::Rat;

/// Calls seen by a [`SharedBackend`], kept outside the facade.
#[derive(Debug, Default)]
struct Log {
    played: Vec<String>,
    stops: usize,
    closes: usize,
}

struct SharedBackend {
    log: Rc<RefCell<Log>>,
}

impl Backend for SharedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fake
    }

    fn device_index(&self) -> Option<usize> {
        Some(2)
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        self.log.borrow_mut().played.push(stream.str_repr(1));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        self.log.borrow_mut().stops += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SoundError> {
        self.log.borrow_mut().closes += 1;
        Ok(())
    }
}

fn shared() -> (Playback, Rc<RefCell<Log>>) {
    let log = Rc::new(RefCell::new(Log::default()));
    let mut playback = Playback::new();
    playback.initialize_with(Box::new(SharedBackend { log: Rc::clone(&log) }));
    (playback, log)
}

fn phrase(pitch: u8) -> Vec<Track> {
    let mut t = Track::new();
    t.note(Rat::note_value(4), pitch, None);
    vec![t]
}

#[test]
fn test_play_requires_initialization() {
    let mut playback = Playback::new();
    assert_eq!(playback.state(), PlaybackState::Uninitialized);
    assert!(matches!(
        playback.play_tracks(&phrase(60)),
        Err(SoundError::NotInitialized)
    ));
    assert!(playback.stop().is_ok());
    assert!(playback.close().is_ok());
    assert_eq!(playback.backend_kind(), None);
}

#[test]
fn test_state_transitions() {
    let (mut playback, log) = shared();
    assert_eq!(playback.state(), PlaybackState::Ready);
    assert_eq!(playback.device_index(), Some(2));
    playback.play_tracks(&phrase(60)).unwrap();
    assert_eq!(playback.state(), PlaybackState::Playing);
    playback.play_tracks(&phrase(62)).unwrap();
    assert_eq!(playback.state(), PlaybackState::Playing);
    playback.stop().unwrap();
    assert_eq!(playback.state(), PlaybackState::Ready);
    playback.close().unwrap();
    playback.close().unwrap();
    assert_eq!(playback.state(), PlaybackState::Uninitialized);

    let log = log.borrow();
    assert_eq!(
        log.played,
        ["p0:0 v0:100 n0:60 d1/4 o60", "p0:0 v0:100 n0:62 d1/4 o62"]
    );
    assert_eq!(log.stops, 1);
    assert_eq!(log.closes, 1);
}

#[test]
fn test_initialize_closes_previous_backend() {
    let (mut playback, log) = shared();
    playback.initialize(&OutputMethod::Fake, false).unwrap();
    assert_eq!(log.borrow().closes, 1);
    assert_eq!(playback.backend_kind(), Some(BackendKind::Fake));
    assert_eq!(playback.device_index(), None);
}

#[test]
fn test_failed_initialize_leaves_uninitialized() {
    let (mut playback, log) = shared();
    let method = OutputMethod::SequencerDevice {
        device_file: PathBuf::from("/nonexistent/soundcard/sequencer"),
        synth: 0,
    };
    let err = playback.initialize(&method, false).unwrap_err();
    assert!(err.is_init_failure());
    assert_eq!(playback.state(), PlaybackState::Uninitialized);
    assert!(!playback.is_initialized());
    assert_eq!(log.borrow().closes, 1);
}

#[cfg(not(feature = "midir"))]
#[test]
fn test_driver_unsupported_without_feature() {
    let mut playback = Playback::new();
    match playback.initialize(&OutputMethod::Driver { device_index: 0 }, false) {
        Err(SoundError::Unsupported { method }) => assert_eq!(method, "winsynth"),
        other => panic!("expected Unsupported, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_player_binary() {
    use crate::backend::external::PlayerCommand;

    let mut playback = Playback::new();
    let method = OutputMethod::ExternalPlayer {
        player: PlayerCommand::new("soundcard-no-such-player-binary", ""),
        converter: None,
        set_patch_delay: 0,
    };
    playback.initialize(&method, false).unwrap();
    assert_eq!(playback.backend_kind(), Some(BackendKind::ExternalProcess));
    assert!(matches!(
        playback.play_tracks(&phrase(60)),
        Err(SoundError::BinaryNotFound { .. })
    ));
    playback.close().unwrap();
}

#[test]
fn test_capture_bypasses_backend() {
    let (mut playback, log) = shared();
    playback.start_capture().unwrap();
    playback.play_tracks(&phrase(64)).unwrap();
    assert_eq!(playback.end_capture(0).unwrap(), "p0:0 v0:100 n64 d1/4 o64");
    assert!(log.borrow().played.is_empty());
    playback.play_tracks(&phrase(65)).unwrap();
    assert_eq!(log.borrow().played.len(), 1);
}

#[test]
fn test_capture_requires_backend() {
    let mut playback = Playback::new();
    assert!(matches!(playback.start_capture(), Err(SoundError::NotInitialized)));
}

#[test]
fn test_export_collects_streams() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.mid");
    let mut playback = Playback::new();
    playback.start_export(&path);
    assert!(playback.is_exporting());
    playback.play_tracks(&phrase(60)).unwrap();
    playback.play_tracks(&phrase(67)).unwrap();
    playback.end_export().unwrap();
    assert!(!playback.is_exporting());

    let expected = midifile::encode(
        &[
            EventStream::from_tracks(&phrase(60)),
            EventStream::from_tracks(&phrase(67)),
        ],
        0,
    );
    assert_eq!(std::fs::read(&path).unwrap(), expected);
    // back to normal playback
    assert!(matches!(
        playback.play_tracks(&phrase(60)),
        Err(SoundError::NotInitialized)
    ));
}

#[test]
fn test_empty_export_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.mid");
    let (mut playback, log) = shared();
    playback.start_export(&path);
    playback.end_export().unwrap();
    assert!(!path.exists());
    assert!(log.borrow().played.is_empty());
}

#[test]
#[should_panic(expected = "export already started")]
fn test_double_export_panics() {
    let mut playback = Playback::new();
    playback.start_export("a.mid");
    playback.start_export("b.mid");
}

#[test]
fn test_modern_device_files() {
    assert!(is_modern_device_file(Path::new("/dev/music")));
    assert!(is_modern_device_file(Path::new("/dev/sequencer2")));
    assert!(!is_modern_device_file(Path::new("/dev/sequencer")));
}
