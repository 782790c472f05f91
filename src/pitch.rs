use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::SynthError;

pub const A4_FREQUENCY: f64 = 440.0;
pub const A4_INDEX: i32 = 57; // octave 4 * 12 + A
pub const OCTAVES: i32 = 9;

// Every accepted spelling within one octave, with its semitone offset from C.
// Sharps and flats of the same key share an offset, which is what makes the
// aliases resolve to the same table entry value.
const SPELLINGS: [(&str, i32); 17] = [
    ("C", 0),
    ("C#", 1),
    ("Db", 1),
    ("D", 2),
    ("D#", 3),
    ("Eb", 3),
    ("E", 4),
    ("F", 5),
    ("F#", 6),
    ("Gb", 6),
    ("G", 7),
    ("G#", 8),
    ("Ab", 8),
    ("A", 9),
    ("A#", 10),
    ("Bb", 10),
    ("B", 11),
];

const SHARP_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Note name to frequency lookup covering octaves 0 through 8.
pub struct PitchTable {
    frequencies: HashMap<String, f32>,
}

static STANDARD: LazyLock<PitchTable> = LazyLock::new(PitchTable::equal_tempered);

impl PitchTable {
    /// The process-wide table, built on first use and never mutated after.
    pub fn standard() -> &'static PitchTable {
        &STANDARD
    }

    fn equal_tempered() -> Self {
        let mut frequencies = HashMap::with_capacity(SPELLINGS.len() * OCTAVES as usize);
        for octave in 0..OCTAVES {
            for (spelling, offset) in SPELLINGS {
                let index = octave * 12 + offset;
                frequencies.insert(format!("{}{}", spelling, octave), frequency_of(index));
            }
        }
        PitchTable { frequencies }
    }

    pub fn resolve(&self, name: &str) -> Result<f32, SynthError> {
        let name = name.trim();
        // Letter case is forgiven, accidentals are not ("b" is the flat sign).
        let mut chars = name.chars();
        let normalized = match chars.next() {
            Some(letter) => format!("{}{}", letter.to_ascii_uppercase(), chars.as_str()),
            None => return Err(SynthError::UnknownNote(name.to_string())),
        };

        self.frequencies
            .get(&normalized)
            .copied()
            .ok_or_else(|| SynthError::UnknownNote(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Equal temperament anchored at A4 = 440 Hz.
pub fn frequency_of(index: i32) -> f32 {
    (A4_FREQUENCY * 2.0_f64.powf((index - A4_INDEX) as f64 / 12.0)) as f32
}

pub fn resolve_frequency(name: &str) -> Result<f32, SynthError> {
    PitchTable::standard().resolve(name)
}

/// Sharp spelling of a semitone index, e.g. 57 -> "A4".
pub fn note_name(index: u8) -> String {
    let octave = index / 12;
    format!("{}{}", SHARP_NAMES[(index % 12) as usize], octave)
}
