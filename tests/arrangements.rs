use std::fs;

use tuner::{Arrangement, EngineConfig, SynthError, render_samples, render_to_wav};

const SONG_TXT: &str = "\
// opening chord
0    E2  1.0  guitar
0    B2  1.0  guitar
0    E3  1.0  guitar

0.5  G#3 0.5  guitar
0.25 Ab3 0.25 guitar
";

const SONG_JSON: &str = r#"[
    {"delay": 0,    "note": "E2",  "duration": 1.0,  "instrument": "guitar"},
    {"delay": 0,    "note": "B2",  "duration": 1.0,  "instrument": "guitar"},
    {"delay": 0,    "note": "E3",  "duration": 1.0,  "instrument": "guitar"},
    {"delay": 0.5,  "note": "Ab3", "duration": 0.5,  "instrument": "guitar"},
    {"delay": 0.25, "note": "G#3", "duration": 0.25, "instrument": "guitar"}
]"#;

#[test]
fn both_file_formats_load_the_same_song() {
    let dir = std::env::temp_dir();
    let txt = dir.join("tuner-it-song.txt");
    let json = dir.join("tuner-it-song.json");
    fs::write(&txt, SONG_TXT).unwrap();
    fs::write(&json, SONG_JSON).unwrap();

    let from_txt = Arrangement::load(&txt).unwrap();
    let from_json = Arrangement::load(&json).unwrap();
    assert_eq!(from_txt, from_json);
    assert_eq!(from_txt.len(), 5);
    assert_eq!(from_txt.duration(), 1.0);

    let _ = fs::remove_file(txt);
    let _ = fs::remove_file(json);
}

#[test]
fn midi_file_loads_as_guitar_notes() {
    use midly::num::{u4, u7, u15, u28};
    use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

    let note_on = |delta: u32, key: u8| TrackEvent {
        delta: u28::from(delta),
        kind: TrackEventKind::Midi {
            channel: u4::from(0),
            message: MidiMessage::NoteOn { key: u7::from(key), vel: u7::from(100) },
        },
    };
    let end = TrackEvent { delta: u28::from(0), kind: TrackEventKind::Meta(MetaMessage::EndOfTrack) };
    let mut smf = Smf::new(Header::new(Format::SingleTrack, Timing::Metrical(u15::from(480))));
    // E2, B2, E3 together, then G#3 a beat later
    smf.tracks.push(vec![note_on(0, 28), note_on(0, 35), note_on(0, 40), note_on(480, 44), end]);
    let path = std::env::temp_dir().join("tuner-it-song.mid");
    smf.save(&path).unwrap();

    let song = Arrangement::load(&path).unwrap();
    let expected = Arrangement::from_text(SONG_TXT).unwrap();
    assert_eq!(song.len(), 4);
    for (got, want) in song.notes().iter().zip(expected.notes()) {
        assert_eq!(got.note().frequency(), want.note().frequency());
        assert_eq!(got.note().duration(), 0.7);
    }
    assert!((song.notes()[3].delay() - 0.5).abs() < 1e-9);
    assert!((song.duration() - 1.2).abs() < 1e-9);

    let _ = fs::remove_file(path);
}

#[test]
fn missing_file_is_a_file_error() {
    let path = std::env::temp_dir().join("tuner-it-does-not-exist.json");
    assert!(matches!(Arrangement::load(path), Err(SynthError::FileError(_))));
}

#[test]
fn one_bad_record_rejects_the_song() {
    let song = SONG_TXT.replace("Ab3", "Ab9");
    let err = Arrangement::from_text(&song).unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(err, SynthError::UnknownNote(_)));
}

#[test]
fn song_renders_for_its_full_length() {
    let config = EngineConfig::default().with_sample_rate(8000).with_channels(1);
    let song = Arrangement::from_json(SONG_JSON).unwrap();
    let samples = render_samples(song, &config, None);
    assert_eq!(samples.len(), 8000);
    assert!(samples.iter().any(|s| *s != 0.0));
}

#[test]
fn song_renders_to_wav() {
    let path = std::env::temp_dir().join("tuner-it-song.wav");
    let config = EngineConfig::default().with_sample_rate(8000);
    let frames = render_to_wav(Arrangement::from_text(SONG_TXT).unwrap(), &config, &path).unwrap();
    assert_eq!(frames, 8000);
    assert_eq!(hound::WavReader::open(&path).unwrap().spec().channels, 2);
    let _ = fs::remove_file(path);
}
