use std::collections::VecDeque;

use crate::arrangement::DelayedNote;
use crate::config::{EngineConfig, ReapPolicy};
use crate::voice::Voice;

/// Owns the render clock, the queue of notes waiting to start, and the
/// voices currently sounding.
///
/// Each call to [`Scheduler::next_sample`] is one tick, run in this order:
/// promote due notes, reap finished voices, sum the voices, then advance
/// every voice and the clock. The output is read before advancing, so a
/// note promoted on a tick contributes its phase-zero sample on that tick.
#[derive(Debug)]
pub struct Scheduler {
    sample_rate: u32,
    reap_policy: ReapPolicy,
    pending: VecDeque<DelayedNote>,
    voices: VecDeque<Voice>, // ascending start time
    ticks: u64,
    last_promotion: u64,
    promoted: u64,
}

impl Scheduler {
    pub fn new(sample_rate: u32) -> Self {
        Scheduler::with_policy(sample_rate, ReapPolicy::default(), 0)
    }

    pub fn with_policy(sample_rate: u32, reap_policy: ReapPolicy, voice_capacity: usize) -> Self {
        Scheduler {
            sample_rate: sample_rate.max(1),
            reap_policy,
            pending: VecDeque::new(),
            voices: VecDeque::with_capacity(voice_capacity),
            ticks: 0,
            last_promotion: 0,
            promoted: 0,
        }
    }

    /// Sizes both queues up front: voices to `voice_capacity`, pending
    /// notes to one full inbox, so a drained inbox doesn't allocate in the
    /// render callback.
    pub fn from_config(config: &EngineConfig, sample_rate: u32) -> Self {
        let mut scheduler = Scheduler::with_policy(sample_rate, config.reap_policy, config.voice_capacity);
        scheduler.pending.reserve(config.inbox_capacity);
        scheduler
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds rendered so far.
    pub fn clock(&self) -> f64 {
        self.ticks as f64 / self.sample_rate as f64
    }

    pub fn last_promotion_time(&self) -> f64 {
        self.last_promotion as f64 / self.sample_rate as f64
    }

    pub fn samples_rendered(&self) -> u64 {
        self.ticks
    }

    pub fn notes_promoted(&self) -> u64 {
        self.promoted
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn voices(&self) -> impl ExactSizeIterator<Item = &Voice> + '_ {
        self.voices.iter()
    }

    /// The delay is measured from the last promotion, which may already lie
    /// in the past; such a note starts on the next tick.
    pub fn enqueue(&mut self, note: DelayedNote) {
        self.pending.push_back(note);
    }

    pub fn extend(&mut self, notes: impl IntoIterator<Item = DelayedNote>) {
        self.pending.extend(notes);
    }

    /// True when nothing is queued and no voice has anything left to play.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.voices.iter().all(Voice::is_finished)
    }

    pub fn next_sample(&mut self) -> f32 {
        self.promote();
        self.reap();

        let output = self.voices.iter().map(Voice::sample).sum();

        for voice in self.voices.iter_mut() {
            voice.advance();
        }
        self.ticks += 1;

        output
    }

    /// One tick, written identically to every channel of `frame`.
    pub fn produce_sample(&mut self, frame: &mut [f32]) {
        let sample = self.next_sample();
        frame.fill(sample);
    }

    fn since_last_promotion(&self) -> f64 {
        (self.ticks - self.last_promotion) as f64 / self.sample_rate as f64
    }

    fn promote(&mut self) {
        while self
            .pending
            .front()
            .is_some_and(|next| self.since_last_promotion() >= next.delay())
        {
            let Some(next) = self.pending.pop_front() else {
                break;
            };
            let start = self.clock();
            self.voices.push_back(Voice::new(next.into_note(), start, self.sample_rate));
            self.last_promotion = self.ticks;
            self.promoted += 1;
        }
    }

    fn reap(&mut self) {
        match self.reap_policy {
            ReapPolicy::LeadingRun => {
                while self.voices.front().is_some_and(Voice::is_finished) {
                    self.voices.pop_front();
                }
            }
            ReapPolicy::All => self.voices.retain(|v| !v.is_finished()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::build_note;

    const SAMPLE_RATE: u32 = 44100;

    fn guitar(delay: f64, duration: f64, frequency: f32) -> DelayedNote {
        DelayedNote::new(delay, build_note("guitar", duration, 1.0, frequency).unwrap()).unwrap()
    }

    #[test]
    fn from_config_presizes_queues() {
        let config = EngineConfig::default().with_inbox_capacity(300);
        let scheduler = Scheduler::from_config(&config, 44100);
        assert!(scheduler.pending.capacity() >= 300);
        assert!(scheduler.voices.capacity() >= config.voice_capacity);
    }

    #[test]
    fn empty_scheduler_is_idle_and_silent() {
        let mut scheduler = Scheduler::new(SAMPLE_RATE);
        assert!(scheduler.is_idle());
        let mut frame = [1.0f32; 2];
        for _ in 0..1000 {
            scheduler.produce_sample(&mut frame);
            assert_eq!(frame, [0.0, 0.0]);
        }
        assert!(scheduler.is_idle());
    }

    #[test]
    fn single_note_goes_idle_after_its_duration() {
        let mut scheduler = Scheduler::new(SAMPLE_RATE);
        scheduler.enqueue(guitar(0.0, 0.5, 440.0));

        let expected = (0.5 * SAMPLE_RATE as f64).ceil() as u64;
        let mut produced = 0u64;
        while !scheduler.is_idle() {
            assert!(produced < expected, "still busy after {} samples", produced);
            scheduler.next_sample();
            produced += 1;
        }
        assert_eq!(produced, expected);
    }

    #[test]
    fn idle_boundary_rounds_up_partial_samples() {
        let sample_rate = 1000;
        let mut scheduler = Scheduler::new(sample_rate);
        scheduler.enqueue(guitar(0.0, 0.0105, 440.0));
        let mut produced = 0;
        while !scheduler.is_idle() {
            scheduler.next_sample();
            produced += 1;
        }
        assert_eq!(produced, 11);
    }

    #[test]
    fn promotion_follows_enqueue_order() {
        let mut scheduler = Scheduler::with_policy(SAMPLE_RATE, ReapPolicy::LeadingRun, 0);
        scheduler.enqueue(guitar(0.1, 5.0, 100.0));
        scheduler.enqueue(guitar(0.0, 5.0, 200.0));
        scheduler.enqueue(guitar(0.2, 5.0, 300.0));

        for _ in 0..(SAMPLE_RATE / 2) {
            scheduler.next_sample();
        }

        let started: Vec<(f32, f64)> = scheduler
            .voices()
            .map(|v| (v.note().frequency(), v.start_time()))
            .collect();
        assert_eq!(started.len(), 3);
        assert_eq!(started[0].0, 100.0);
        assert_eq!(started[1].0, 200.0);
        assert_eq!(started[2].0, 300.0);
        assert!((started[0].1 - 0.1).abs() < 1e-9);
        assert!((started[1].1 - 0.1).abs() < 1e-9);
        assert!((started[2].1 - 0.3).abs() < 1e-9);
        assert!(started.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn first_sample_of_a_promoted_note_is_phase_zero() {
        let mut scheduler = Scheduler::new(SAMPLE_RATE);
        scheduler.enqueue(guitar(0.0, 1.0, 440.0));
        assert_eq!(scheduler.next_sample(), 0.0);
        assert_eq!(scheduler.voices().len(), 1);
        assert!(scheduler.next_sample() > 0.0);
    }

    #[test]
    fn late_enqueue_measures_delay_from_last_promotion() {
        let mut scheduler = Scheduler::new(SAMPLE_RATE);
        scheduler.enqueue(guitar(0.0, 0.1, 440.0));
        for _ in 0..SAMPLE_RATE {
            scheduler.next_sample();
        }
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.last_promotion_time(), 0.0);

        // a second has passed since the last promotion, so half a second of
        // delay is already over
        scheduler.enqueue(guitar(0.5, 0.1, 440.0));
        scheduler.next_sample();
        assert_eq!(scheduler.voices().len(), 1);
        assert_eq!(scheduler.last_promotion_time(), 1.0);
        assert_eq!(scheduler.notes_promoted(), 2);
    }

    #[test]
    fn leading_run_reaping_keeps_short_note_behind_long_one() {
        let mut scheduler = Scheduler::with_policy(SAMPLE_RATE, ReapPolicy::LeadingRun, 0);
        scheduler.enqueue(guitar(0.0, 1.0, 100.0));
        scheduler.enqueue(guitar(0.1, 0.1, 200.0));

        for _ in 0..(SAMPLE_RATE / 2) {
            scheduler.next_sample();
        }

        let voices: Vec<&Voice> = scheduler.voices().collect();
        assert_eq!(voices.len(), 2);
        assert!(!voices[0].is_finished());
        assert!(voices[1].is_finished());
        assert_eq!(voices[1].sample(), 0.0);
        assert!(!scheduler.is_idle());

        for _ in 0..SAMPLE_RATE {
            scheduler.next_sample();
        }
        assert_eq!(scheduler.voices().len(), 0);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn reap_all_removes_every_finished_voice() {
        let mut scheduler = Scheduler::with_policy(SAMPLE_RATE, ReapPolicy::All, 0);
        scheduler.enqueue(guitar(0.0, 1.0, 100.0));
        scheduler.enqueue(guitar(0.1, 0.1, 200.0));

        for _ in 0..(SAMPLE_RATE / 2) {
            scheduler.next_sample();
        }

        let voices: Vec<&Voice> = scheduler.voices().collect();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].note().frequency(), 100.0);
    }

    #[test]
    fn reaping_policy_does_not_change_output() {
        let render = |policy| {
            let mut scheduler = Scheduler::with_policy(SAMPLE_RATE, policy, 0);
            scheduler.enqueue(guitar(0.0, 0.3, 110.0));
            scheduler.enqueue(guitar(0.05, 0.05, 220.0));
            scheduler.enqueue(guitar(0.05, 0.2, 330.0));
            (0..SAMPLE_RATE / 2).map(|_| scheduler.next_sample()).collect::<Vec<f32>>()
        };
        assert_eq!(render(ReapPolicy::LeadingRun), render(ReapPolicy::All));
    }

    #[test]
    fn every_channel_gets_the_same_sample() {
        let mut scheduler = Scheduler::new(SAMPLE_RATE);
        scheduler.enqueue(guitar(0.0, 1.0, 440.0));
        let mut frame = [0.0f32; 4];
        for _ in 0..100 {
            scheduler.produce_sample(&mut frame);
            assert!(frame.iter().all(|s| *s == frame[0]));
        }
        assert_ne!(frame[0], 0.0);
    }

    #[test]
    fn clock_advances_one_sample_per_tick() {
        let mut scheduler = Scheduler::new(100);
        let mut last = scheduler.clock();
        for tick in 1..=250u64 {
            scheduler.next_sample();
            assert!(scheduler.clock() > last);
            last = scheduler.clock();
            assert_eq!(scheduler.samples_rendered(), tick);
        }
        assert_eq!(scheduler.clock(), 2.5);
    }

    #[test]
    fn mixed_output_stays_within_partial_sum() {
        let mut scheduler = Scheduler::new(SAMPLE_RATE);
        scheduler.extend([guitar(0.0, 0.5, 440.0)]);
        let bound = 1.0 + 0.5 + 0.333 + 0.25 + 0.2 + 0.166 + 0.142 + 0.125;
        let mut count = 0;
        while !scheduler.is_idle() {
            assert!(scheduler.next_sample().abs() <= bound);
            count += 1;
        }
        assert_eq!(count, 22050);
    }
}
