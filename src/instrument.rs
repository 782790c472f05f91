use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

use crate::error::SynthError;

/// Fundamental plus overtones. Voices keep their phases in a fixed array of
/// this size so promoting a note never allocates on the audio thread.
pub const MAX_PARTIALS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Overtone {
    pub relation: f32, // multiplier on the fundamental frequency
    pub volume: f32,   // multiplier on the note volume
}

impl Overtone {
    pub const fn new(relation: f32, volume: f32) -> Self {
        Overtone { relation, volume }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Envelope {
    #[default]
    Linear, // 1 - t/d
}

impl Envelope {
    pub fn evaluate(&self, elapsed: f64, duration: f64) -> f32 {
        match self {
            Envelope::Linear => {
                if duration <= 0.0 {
                    return 0.0;
                }
                (1.0 - elapsed / duration).max(0.0) as f32
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NoteFields")]
pub struct Note {
    duration: f64, // seconds
    volume: f32,
    frequency: f32, // Hz
    envelope: Envelope,
    overtones: Arc<[Overtone]>,
}

// Wire shape of a note; deserializing goes through `Note::new`.
#[derive(Deserialize)]
struct NoteFields {
    duration: f64,
    volume: f32,
    frequency: f32,
    #[serde(default)]
    envelope: Envelope,
    overtones: Arc<[Overtone]>,
}

impl TryFrom<NoteFields> for Note {
    type Error = SynthError;

    fn try_from(fields: NoteFields) -> Result<Self, Self::Error> {
        Note::new(fields.duration, fields.volume, fields.frequency, fields.envelope, fields.overtones)
    }
}

impl Note {
    pub fn new(
        duration: f64,
        volume: f32,
        frequency: f32,
        envelope: Envelope,
        overtones: impl Into<Arc<[Overtone]>>,
    ) -> Result<Self, SynthError> {
        let overtones = overtones.into();

        if !duration.is_finite() || duration < 0.0 {
            return Err(SynthError::InvalidNote(format!("duration must be >= 0, got {}", duration)));
        }
        if !volume.is_finite() {
            return Err(SynthError::InvalidNote(format!("volume must be finite, got {}", volume)));
        }
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(SynthError::InvalidNote(format!("frequency must be > 0, got {}", frequency)));
        }
        if overtones.len() + 1 > MAX_PARTIALS {
            return Err(SynthError::InvalidNote(format!(
                "{} overtones, at most {} supported",
                overtones.len(),
                MAX_PARTIALS - 1
            )));
        }

        Ok(Note { duration, volume, frequency, envelope, overtones })
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    pub fn overtones(&self) -> &[Overtone] {
        &self.overtones
    }

    /// Fundamental first, then each overtone: (frequency, volume).
    pub fn partials(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        std::iter::once((self.frequency, self.volume)).chain(
            self.overtones
                .iter()
                .map(|o| (self.frequency * o.relation, self.volume * o.volume)),
        )
    }

    /// Largest magnitude a single voice of this note can reach.
    pub fn peak(&self) -> f32 {
        self.partials().map(|(_, v)| v.abs()).sum()
    }
}

const GUITAR_OVERTONES: [Overtone; 7] = [
    Overtone::new(2.0, 0.500),
    Overtone::new(3.0, 0.333),
    Overtone::new(4.0, 0.250),
    Overtone::new(5.0, 0.200),
    Overtone::new(6.0, 0.166),
    Overtone::new(7.0, 0.142),
    Overtone::new(8.0, 0.125),
];

#[derive(Debug, Clone)]
pub struct Instrument {
    pub name: &'static str,
    pub envelope: Envelope,
    pub overtones: Arc<[Overtone]>,
}

impl Instrument {
    pub fn build(&self, duration: f64, volume: f32, frequency: f32) -> Result<Note, SynthError> {
        Note::new(duration, volume, frequency, self.envelope, Arc::clone(&self.overtones))
    }
}

/// Constant instrument registry. Built once at first use, read-only after.
pub struct InstrumentTable {
    instruments: HashMap<&'static str, Instrument>,
}

static BUILT_IN: LazyLock<InstrumentTable> = LazyLock::new(InstrumentTable::built_in);

impl InstrumentTable {
    pub fn standard() -> &'static InstrumentTable {
        &BUILT_IN
    }

    fn built_in() -> Self {
        let guitar = Instrument {
            name: "guitar",
            envelope: Envelope::Linear,
            overtones: Arc::from(&GUITAR_OVERTONES[..]),
        };

        let mut instruments = HashMap::new();
        instruments.insert(guitar.name, guitar);
        InstrumentTable { instruments }
    }

    pub fn get(&self, name: &str) -> Result<&Instrument, SynthError> {
        self.instruments
            .get(name.trim())
            .ok_or_else(|| SynthError::UnknownInstrument(name.to_string()))
    }
}

pub fn build_note(instrument: &str, duration: f64, volume: f32, frequency: f32) -> Result<Note, SynthError> {
    InstrumentTable::standard().get(instrument)?.build(duration, volume, frequency)
}
