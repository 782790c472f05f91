use std::f32::consts::TAU;

use crate::instrument::{MAX_PARTIALS, Note};

/// One sounding instance of a note.
#[derive(Debug, Clone)]
pub struct Voice {
    note: Note,
    sample_rate: u32,
    partials: usize,
    phases: [f32; MAX_PARTIALS],
    increments: [f32; MAX_PARTIALS], // phase step per sample, per partial
    volumes: [f32; MAX_PARTIALS],
    start_time: f64,
    ticks: u64, // samples rendered so far
}

impl Voice {
    pub fn new(note: Note, start_time: f64, sample_rate: u32) -> Self {
        let mut increments = [0.0; MAX_PARTIALS];
        let mut volumes = [0.0; MAX_PARTIALS];
        let mut partials = 0;

        for (i, (frequency, volume)) in note.partials().take(MAX_PARTIALS).enumerate() {
            increments[i] = TAU * frequency / sample_rate as f32;
            volumes[i] = volume;
            partials = i + 1;
        }

        Voice {
            note,
            sample_rate,
            partials,
            phases: [0.0; MAX_PARTIALS],
            increments,
            volumes,
            start_time,
            ticks: 0,
        }
    }

    pub fn note(&self) -> &Note {
        &self.note
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn elapsed(&self) -> f64 {
        self.ticks as f64 / self.sample_rate as f64
    }

    pub fn local_time(&self) -> f64 {
        self.start_time + self.elapsed()
    }

    pub fn phases(&self) -> &[f32] {
        &self.phases[..self.partials]
    }

    pub fn sample(&self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }

        let envelope = self.note.envelope().evaluate(self.elapsed(), self.note.duration());
        let mut sum = 0.0;
        for i in 0..self.partials {
            sum += self.phases[i].sin() * self.volumes[i];
        }
        sum * envelope
    }

    pub fn advance(&mut self) {
        for i in 0..self.partials {
            self.phases[i] += self.increments[i];
            if self.phases[i] >= TAU {
                self.phases[i] -= TAU;
            }
        }
        self.ticks += 1;
    }

    /// True once the voice has rendered its whole duration.
    pub fn is_finished(&self) -> bool {
        self.elapsed() >= self.note.duration()
    }
}
