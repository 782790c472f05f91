use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SynthError;
use crate::instrument::{InstrumentTable, Note};
use crate::midi;
use crate::pitch::PitchTable;

pub const DEFAULT_VOLUME: f32 = 0.3;

/// A note plus the time to wait, after the previous note in the same queue
/// started, before this one may start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DelayedNoteFields")]
pub struct DelayedNote {
    delay: f64,
    note: Note,
}

#[derive(Deserialize)]
struct DelayedNoteFields {
    delay: f64,
    note: Note,
}

impl TryFrom<DelayedNoteFields> for DelayedNote {
    type Error = SynthError;

    fn try_from(fields: DelayedNoteFields) -> Result<Self, Self::Error> {
        DelayedNote::new(fields.delay, fields.note)
    }
}

impl DelayedNote {
    pub fn new(delay: f64, note: Note) -> Result<Self, SynthError> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(SynthError::InvalidNote(format!("delay must be >= 0, got {}", delay)));
        }
        Ok(DelayedNote { delay, note })
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn note(&self) -> &Note {
        &self.note
    }

    pub fn into_note(self) -> Note {
        self.note
    }
}

/// Note as it appears in arrangement files and network messages, before the
/// names have been looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNote {
    pub delay: f64,
    pub note: String,
    pub duration: f64,
    pub instrument: String,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_volume() -> f32 {
    DEFAULT_VOLUME
}

impl RawNote {
    pub fn resolve(&self) -> Result<DelayedNote, SynthError> {
        let frequency = PitchTable::standard().resolve(&self.note)?;
        let note = InstrumentTable::standard()
            .get(&self.instrument)?
            .build(self.duration, self.volume, frequency)?;
        DelayedNote::new(self.delay, note)
    }

    /// One JSON object, as sent by live clients.
    pub fn from_json_line(line: &str) -> Result<Self, SynthError> {
        serde_json::from_str(line.trim())
            .map_err(|e| SynthError::ParseError(format!("Could not parse note message: {}", e)))
    }

    /// `<delay> <note> <duration> <instrument>`, whitespace separated.
    pub fn from_text_line(line: &str) -> Result<Self, SynthError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 4 {
            return Err(SynthError::ParseError(format!(
                "Expected 4 fields (delay note duration instrument), got {}: '{}'",
                parts.len(),
                line.trim()
            )));
        }

        let delay: f64 = parts[0]
            .parse()
            .map_err(|_| SynthError::ParseError(format!("Invalid delay '{}'", parts[0])))?;
        let duration: f64 = parts[2]
            .parse()
            .map_err(|_| SynthError::ParseError(format!("Invalid duration '{}'", parts[2])))?;

        Ok(RawNote {
            delay,
            note: parts[1].to_string(),
            duration,
            instrument: parts[3].to_string(),
            volume: DEFAULT_VOLUME,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    notes: Vec<DelayedNote>,
}

impl Arrangement {
    pub fn new() -> Self {
        Arrangement::default()
    }

    pub fn push(&mut self, note: DelayedNote) {
        self.notes.push(note);
    }

    pub fn add_note(&mut self, delay: f64, note: Note) -> Result<(), SynthError> {
        self.push(DelayedNote::new(delay, note)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn notes(&self) -> &[DelayedNote] {
        &self.notes
    }

    /// Seconds from the first promotion until the last note stops sounding.
    pub fn duration(&self) -> f64 {
        let mut start = 0.0;
        let mut end: f64 = 0.0;
        for dn in &self.notes {
            start += dn.delay;
            end = end.max(start + dn.note.duration());
        }
        end
    }

    /// All or nothing: one bad record rejects the whole arrangement.
    pub fn from_raw(raw: &[RawNote]) -> Result<Self, SynthError> {
        let notes = raw
            .iter()
            .enumerate()
            .map(|(i, r)| r.resolve().map_err(|e| at_entry(i + 1, e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arrangement { notes })
    }

    pub fn from_json(content: &str) -> Result<Self, SynthError> {
        let raw: Vec<RawNote> = serde_json::from_str(content)?;
        Arrangement::from_raw(&raw)
    }

    pub fn from_text(content: &str) -> Result<Self, SynthError> {
        let mut raw = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            raw.push(RawNote::from_text_line(line).map_err(|e| at_line(i + 1, e))?);
        }
        Arrangement::from_raw(&raw)
    }

    pub fn from_midi(data: &[u8]) -> Result<Self, SynthError> {
        Arrangement::from_raw(&midi::read_midi(data)?)
    }

    /// Picks the decoder from the file extension: `.json`, `.txt`, or
    /// `.mid` / `.midi`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SynthError> {
        let path = path.as_ref();
        let read_error = |e: std::io::Error| SynthError::FileError(format!("{}: {}", path.display(), e));

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Arrangement::from_json(&std::fs::read_to_string(path).map_err(read_error)?),
            Some("txt") => Arrangement::from_text(&std::fs::read_to_string(path).map_err(read_error)?),
            Some("mid" | "midi") => Arrangement::from_midi(&std::fs::read(path).map_err(read_error)?),
            _ => Err(SynthError::FileError(format!(
                "{}: unsupported arrangement format (expected .json, .txt or .mid)",
                path.display()
            ))),
        }
    }
}

impl IntoIterator for Arrangement {
    type Item = DelayedNote;
    type IntoIter = std::vec::IntoIter<DelayedNote>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.into_iter()
    }
}

impl FromIterator<DelayedNote> for Arrangement {
    fn from_iter<I: IntoIterator<Item = DelayedNote>>(iter: I) -> Self {
        Arrangement { notes: iter.into_iter().collect() }
    }
}

fn at_entry(index: usize, e: SynthError) -> SynthError {
    prefix(format!("note {}", index), e)
}

fn at_line(line: usize, e: SynthError) -> SynthError {
    prefix(format!("line {}", line), e)
}

fn prefix(context: String, e: SynthError) -> SynthError {
    match e {
        SynthError::UnknownNote(n) => SynthError::UnknownNote(format!("{} ({})", n, context)),
        SynthError::UnknownInstrument(n) => SynthError::UnknownInstrument(format!("{} ({})", n, context)),
        SynthError::InvalidNote(m) => SynthError::InvalidNote(format!("{}: {}", context, m)),
        SynthError::ParseError(m) => SynthError::ParseError(format!("{}: {}", context, m)),
        other => other,
    }
}
