use super::*;

fn quarter() -> Rat {
    Rat::note_value(4)
}

fn eighth() -> Rat {
    Rat::note_value(8)
}

#[test]
fn test_single_note_events() {
    let mut t = Track::new();
    t.note(quarter(), 90, Some(127));
    let stream = EventStream::from_tracks(&[t]);
    assert_eq!(
        stream.events(),
        &[
            Event::SetPatch { channel: 0, patch: 0 },
            Event::Volume { channel: 0, volume: 100 },
            Event::NoteOn { channel: 0, pitch: 90, velocity: 127 },
            Event::NoteLenTime(quarter()),
            Event::NoteOff { channel: 0, pitch: 90, velocity: 127 },
        ]
    );
}

#[test]
fn test_empty_stream() {
    let stream = EventStream::from_tracks(&[]);
    assert!(stream.is_empty());
    assert_eq!(stream.str_repr(1), "");
    let stream = EventStream::from_tracks(&[Track::new()]);
    assert!(stream.is_empty());
}

#[test]
fn test_patch_change_in_one_voice() {
    let mut t = Track::new();
    t.note(quarter(), 90, None);
    t.set_patch(3);
    t.note(quarter(), 91, None);
    let stream = EventStream::from_tracks(&[t]);
    assert_eq!(
        stream.str_repr(1),
        "p0:0 p1:3 v0:100 n0:90 d1/4 o90 v1:100 n1:91 d1/4 o91"
    );
}

#[test]
fn test_overlapping_tracks_share_channel() {
    let mut t1 = Track::new();
    for pitch in [92, 90, 92, 94] {
        t1.note(eighth(), pitch, None);
    }
    let mut t2 = Track::new();
    t2.note(Rat::note_value(2), 90, None);
    let stream = EventStream::from_tracks(&[t1, t2]);
    assert_eq!(
        stream.str_repr(1),
        "p0:0 p1:0 v0:100 n0:92 n0:90 d1/8 o92 v1:100 n1:90 d1/8 o90 n0:92 d1/8 o92 n0:94 d1/8 o94 o90"
    );
}

fn three_instruments(first_volume: Option<u8>) -> Vec<Track> {
    [(3, 93), (4, 94), (5, 95)]
        .iter()
        .enumerate()
        .map(|(i, &(patch, pitch))| {
            let mut t = Track::new();
            t.set_patch(patch);
            if i == 0 {
                if let Some(volume) = first_volume {
                    t.set_volume(volume);
                }
            }
            t.note(quarter(), pitch, None);
            t
        })
        .collect()
}

#[test]
fn test_three_instruments() {
    let stream = EventStream::from_tracks(&three_instruments(None));
    assert_eq!(
        stream.str_repr(1),
        "p0:3 p1:4 p2:5 v0:100 n0:93 v1:100 n1:94 v2:100 n2:95 d1/4 o93 o94 o95"
    );
    let stream = EventStream::from_tracks(&three_instruments(Some(88)));
    assert_eq!(
        stream.str_repr(1),
        "p0:3 p1:4 p2:5 v0:88 n0:93 v1:100 n1:94 v2:100 n2:95 d1/4 o93 o94 o95"
    );
}

#[test]
fn test_channels_reused_across_positions() {
    let mut t1 = Track::new();
    t1.set_patch(3);
    t1.note(quarter(), 93, None);
    t1.note(quarter(), 95, None);
    let mut t2 = Track::new();
    t2.set_patch(4);
    t2.note(quarter(), 95, None);
    t2.note(quarter(), 97, None);
    let stream = EventStream::from_tracks(&[t1, t2]);
    assert_eq!(
        stream.str_repr(1),
        "p0:3 p1:4 v0:100 n0:93 v1:100 n1:95 d1/4 o93 o95 n0:95 n1:97 d1/4 o95 o97"
    );
}

#[test]
fn test_late_entry_gets_patch_early() {
    let mut t1 = Track::new();
    t1.set_patch(1);
    t1.set_volume(101);
    t1.note(quarter(), 64, None);
    let mut t2 = Track::new();
    t2.set_patch(2);
    t2.set_volume(102);
    t2.notelen_time(quarter());
    t2.note(quarter(), 66, None);
    let stream = EventStream::from_tracks(&[t1, t2]);
    assert_eq!(
        stream.str_repr(1),
        "p0:1 p1:2 v0:101 n0:64 d1/4 o64 v1:102 n1:66 d1/4 o66"
    );
}

#[test]
fn test_patch_and_volume_order_does_not_matter() {
    let mut a = Track::new();
    a.set_patch(1);
    a.set_volume(101);
    a.note(quarter(), 64, None);
    let mut b = Track::new();
    b.set_volume(101);
    b.set_patch(1);
    b.note(quarter(), 64, None);
    let expected = "p0:1 v0:101 n0:64 d1/4 o64";
    assert_eq!(EventStream::from_tracks(&[a]).str_repr(1), expected);
    assert_eq!(EventStream::from_tracks(&[b]).str_repr(1), expected);
}

#[test]
fn test_prepend_patch_first_call_wins() {
    let mut t = Track::new();
    t.note(quarter(), 55, None);
    t.prepend_patch(2);
    t.prepend_patch(3);
    assert_eq!(EventStream::from_tracks(&[t]).str_repr(0), "p0:2 v0:100 n55 d1/4 o55");
}

#[test]
fn test_set_patch_last_call_wins() {
    let mut t = Track::new();
    t.set_patch(2);
    t.set_patch(3);
    t.note(quarter(), 55, None);
    assert_eq!(EventStream::from_tracks(&[t]).str_repr(0), "p0:3 v0:100 n55 d1/4 o55");
}

#[test]
fn test_set_patch_between_notes() {
    let mut t = Track::new();
    t.set_patch(2);
    t.note(quarter(), 55, None);
    t.set_patch(3);
    t.note(quarter(), 57, None);
    assert_eq!(
        EventStream::from_tracks(&[t]).str_repr(0),
        "p0:2 p1:3 v0:100 n55 d1/4 o55 v1:100 n57 d1/4 o57"
    );
}

#[test]
fn test_set_volume_between_notes() {
    let mut t = Track::new();
    t.set_volume(98);
    t.note(quarter(), 55, None);
    t.set_volume(99);
    t.note(quarter(), 57, None);
    assert_eq!(
        EventStream::from_tracks(&[t]).str_repr(0),
        "p0:0 p1:0 v0:98 n55 d1/4 o55 v1:99 n57 d1/4 o57"
    );
}

#[test]
fn test_tempo_emitted_before_first_note() {
    let mut t = Track::new();
    t.set_bpm(120, 4);
    t.note(quarter(), 50, None);
    assert_eq!(
        EventStream::from_tracks(&[t]).str_repr(1),
        "t120/4 p0:0 v0:100 n0:50 d1/4 o50"
    );

    let mut t = Track::new();
    t.set_bpm(120, 4);
    t.set_bpm(121, 4);
    t.note(quarter(), 50, None);
    assert_eq!(
        EventStream::from_tracks(&[t]).str_repr(1),
        "t121/4 p0:0 v0:100 n0:50 d1/4 o50"
    );
}

#[test]
fn test_same_tempo_in_two_tracks_emitted_once() {
    let tracks: Vec<Track> = [50, 55]
        .iter()
        .map(|&pitch| {
            let mut t = Track::new();
            t.set_bpm(121, 4);
            t.note(quarter(), pitch, None);
            t
        })
        .collect();
    assert_eq!(
        EventStream::from_tracks(&tracks).str_repr(1),
        "t121/4 p0:0 v0:100 n0:50 n0:55 d1/4 o50 o55"
    );
}

#[test]
fn test_four_instruments_staggered() {
    let tracks: Vec<Track> = (0..4)
        .map(|i| {
            let mut t = Track::new();
            t.set_patch(i as u8 + 1);
            for _ in 0..i {
                t.notelen_time(quarter());
            }
            t.note(quarter(), 60, None);
            t
        })
        .collect();
    assert_eq!(
        EventStream::from_tracks(&tracks).str_repr(1),
        "p0:1 p1:2 p2:3 p3:4 v0:100 n0:60 d1/4 o60 v1:100 n1:60 d1/4 o60 \
         v2:100 n2:60 d1/4 o60 v3:100 n3:60 d1/4 o60"
    );
}

#[test]
fn test_same_pitch_in_two_tracks_needs_second_channel() {
    let mut t1 = Track::new();
    t1.note(quarter(), 62, None);
    t1.note(Rat::note_value(2), 62, None);
    let mut t2 = Track::new();
    t2.note(quarter(), 60, None);
    t2.note(quarter(), 60, None);
    let stream = EventStream::from_tracks(&[t1, t2]);
    assert_eq!(
        stream.str_repr(1),
        "p0:0 v0:100 n0:62 n0:60 d1/4 o62 o60 n0:62 n0:60 d1/4 o60 d1/4 o62"
    );

    let mut t1 = Track::new();
    t1.note(quarter(), 62, None);
    t1.note(Rat::note_value(2), 62, None);
    let mut t2 = Track::new();
    t2.note(quarter(), 60, None);
    t2.note(quarter(), 62, None);
    let stream = EventStream::from_tracks(&[t1, t2]);
    assert_eq!(
        stream.str_repr(1),
        "p0:0 p1:0 v0:100 n0:62 n0:60 d1/4 o62 o60 n0:62 v1:100 n1:62 d1/4 o62 d1/4 o62"
    );
}

#[test]
fn test_out_of_channels_drops_note() {
    let mut t1 = Track::new();
    t1.set_patch(1);
    t1.note(quarter(), 60, None);
    let mut t2 = Track::new();
    t2.set_patch(2);
    t2.note(quarter(), 62, None);
    let stream = EventStream::from_tracks_with_channel_limit(&[t1, t2], 1);
    assert_eq!(stream.str_repr(1), "p0:1 v0:100 n0:60 d1/4 o60");
}

#[test]
fn test_percussion_track_uses_channel_nine() {
    let mut drums = Track::percussion();
    drums.note(quarter(), 38, None);
    let mut melody = Track::new();
    melody.note(quarter(), 60, None);
    let stream = EventStream::from_tracks(&[drums, melody]);
    assert_eq!(stream.str_repr(1), "v9:100 p0:0 P38 v0:100 n0:60 d1/4 o38 o60");
}

#[test]
fn test_note_off_for_silent_pitch_is_ignored() {
    let mut t = Track::new();
    t.stop_note(60, None);
    t.note(quarter(), 62, None);
    assert_eq!(EventStream::from_tracks(&[t]).str_repr(0), "p0:0 v0:100 n62 d1/4 o62");
}

#[test]
fn test_bender_passes_through() {
    let mut t = Track::new();
    t.bender(0, 8192);
    t.note(quarter(), 60, None);
    let stream = EventStream::from_tracks(&[t]);
    assert_eq!(stream.events()[0], Event::Bender { channel: 0, value: 8192 });
}

#[test]
fn test_balanced_note_pairs() {
    let mut t1 = Track::new();
    for pitch in [60, 62, 64, 65, 67] {
        t1.note(eighth(), pitch, None);
    }
    let mut t2 = Track::new();
    t2.set_patch(40);
    for pitch in [48, 48, 55] {
        t2.note(Rat::new(3, 16), pitch, None);
    }
    let stream = EventStream::from_tracks(&[t1, t2]);
    let mut sounding = std::collections::HashSet::new();
    for event in &stream {
        match *event {
            Event::NoteOn { channel, pitch, .. } => assert!(sounding.insert((channel, pitch))),
            Event::NoteOff { channel, pitch, .. } => assert!(sounding.remove(&(channel, pitch))),
            _ => {}
        }
    }
    assert!(sounding.is_empty());
}

#[test]
fn test_stream_is_replayable() {
    let mut t = Track::new();
    t.note(quarter(), 60, None);
    let stream = EventStream::from_tracks(&[t]);
    let first: Vec<_> = stream.iter().copied().collect();
    let second: Vec<_> = stream.iter().copied().collect();
    assert_eq!(first, second);
    assert_eq!(stream.tracks().len(), 1);
}

#[test]
fn test_sorted_events() {
    let stream = EventStream::from_events(vec![
        Event::NoteOn { channel: 0, pitch: 60, velocity: 100 },
        Event::SetPatch { channel: 1, patch: 4 },
        Event::NoteLenTime(quarter()),
        Event::NoteOn { channel: 0, pitch: 62, velocity: 100 },
        Event::Volume { channel: 0, volume: 90 },
        Event::NoteOff { channel: 0, pitch: 60, velocity: 100 },
        Event::Tempo { bpm: 90, beat_unit: 4 },
        Event::NoteLenTime(quarter()),
        Event::NoteOff { channel: 0, pitch: 62, velocity: 100 },
    ]);
    assert_eq!(
        EventStream::from_events(stream.sorted_events()).str_repr(1),
        "p1:4 n0:60 d1/4 o60 t90/4 v0:90 n0:62 d1/4 o62"
    );
}

#[test]
fn test_hoist_orders_adjacent_program_changes_by_channel() {
    let events = vec![
        Event::SetPatch { channel: 0, patch: 1 },
        Event::SetPatch { channel: 2, patch: 3 },
        Event::Volume { channel: 0, volume: 100 },
        Event::NoteOn { channel: 0, pitch: 60, velocity: 100 },
        Event::SetPatch { channel: 1, patch: 2 },
    ];
    let hoisted = hoist_program_changes(events);
    assert_eq!(
        EventStream::from_events(hoisted).str_repr(1),
        "p0:1 p1:2 p2:3 v0:100 n0:60"
    );
}
