use log::debug;
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use crate::arrangement::{RawNote, DEFAULT_VOLUME};
use crate::error::SynthError;
use crate::pitch::note_name;

/// Every note-on plays for this long; note-offs are ignored.
pub const MIDI_NOTE_DURATION: f64 = 0.7;
pub const MIDI_INSTRUMENT: &str = "guitar";

// Microseconds per quarter note until the file sets a tempo (120 bpm).
const DEFAULT_TEMPO: u32 = 500_000;

/// Ticks to seconds for one file's timing and tempo changes.
struct TempoMap {
    timing: Timing,
    // (tick, microseconds per beat), sorted by tick
    changes: Vec<(u64, u32)>,
}

impl TempoMap {
    fn new(timing: Timing, mut changes: Vec<(u64, u32)>) -> Result<Self, SynthError> {
        let zero = match timing {
            Timing::Metrical(ticks_per_beat) => ticks_per_beat.as_int() == 0,
            Timing::Timecode(_, ticks_per_frame) => ticks_per_frame == 0,
        };
        if zero {
            return Err(SynthError::ParseError("MIDI file has zero ticks per beat".to_string()));
        }
        changes.sort_by_key(|&(tick, _)| tick);
        Ok(TempoMap { timing, changes })
    }

    fn seconds_per_tick(&self, tempo: u32) -> f64 {
        match self.timing {
            Timing::Metrical(ticks_per_beat) => tempo as f64 / 1_000_000.0 / ticks_per_beat.as_int() as f64,
            // timecode files count real time; tempo events don't apply
            Timing::Timecode(fps, ticks_per_frame) => 1.0 / (fps.as_f32() as f64 * ticks_per_frame as f64),
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        let mut seconds = 0.0;
        let mut last_tick = 0;
        let mut tempo = DEFAULT_TEMPO;
        for &(at, next) in self.changes.iter().take_while(|&&(at, _)| at < tick) {
            seconds += (at - last_tick) as f64 * self.seconds_per_tick(tempo);
            last_tick = at;
            tempo = next;
        }
        seconds + (tick - last_tick) as f64 * self.seconds_per_tick(tempo)
    }
}

#[derive(Default)]
struct TrackScan {
    // (tick, key) of each sounding note-on
    notes: Vec<(u64, u8)>,
    tempos: Vec<(u64, u32)>,
    end: u64,
}

fn scan_track(track: &[TrackEvent]) -> TrackScan {
    let mut scan = TrackScan::default();
    let mut tick = 0u64;
    for event in track {
        tick += event.delta.as_int() as u64;
        match event.kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } if vel.as_int() > 0 => scan.notes.push((tick, key.as_int())),
            TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => scan.tempos.push((tick, tempo.as_int())),
            _ => {}
        }
    }
    scan.end = tick;
    scan
}

/// Decodes a Standard MIDI File into note records, one per note-on.
///
/// Format 0 and 1 files play their tracks together, sharing one tempo map.
/// Format 2 files play their tracks one after another.
pub fn read_midi(data: &[u8]) -> Result<Vec<RawNote>, SynthError> {
    let smf = Smf::parse(data).map_err(|e| SynthError::ParseError(format!("Invalid MIDI file: {}", e)))?;
    let scans: Vec<TrackScan> = smf.tracks.iter().map(|track| scan_track(track)).collect();
    debug!("MIDI file: {:?}, {} track(s)", smf.header.format, scans.len());

    // (seconds from start, key)
    let mut timed: Vec<(f64, u8)> = Vec::new();
    match smf.header.format {
        Format::SingleTrack | Format::Parallel => {
            let tempos = scans.iter().flat_map(|s| s.tempos.iter().copied()).collect();
            let map = TempoMap::new(smf.header.timing, tempos)?;
            let mut notes: Vec<(u64, u8)> = scans.iter().flat_map(|s| s.notes.iter().copied()).collect();
            // stable, so simultaneous notes keep track order
            notes.sort_by_key(|&(tick, _)| tick);
            timed.extend(notes.into_iter().map(|(tick, key)| (map.seconds(tick), key)));
        }
        Format::Sequential => {
            let mut offset = 0.0;
            for scan in scans {
                let map = TempoMap::new(smf.header.timing, scan.tempos)?;
                timed.extend(scan.notes.iter().map(|&(tick, key)| (offset + map.seconds(tick), key)));
                offset += map.seconds(scan.end);
            }
        }
    }

    let mut previous = 0.0;
    Ok(timed
        .into_iter()
        .map(|(at, key)| {
            let delay = at - previous;
            previous = at;
            RawNote {
                delay,
                note: note_name(key),
                duration: MIDI_NOTE_DURATION,
                instrument: MIDI_INSTRUMENT.to_string(),
                volume: DEFAULT_VOLUME,
            }
        })
        .collect())
}
