use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cpal::{FromSample, Sample};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::Sender;

use crate::arrangement::DelayedNote;
use crate::config::PlaybackMode;
use crate::scheduler::Scheduler;

/// Counters the render side publishes for the control side and for tests.
#[derive(Debug, Default)]
pub struct PlaybackStats {
    samples_rendered: AtomicU64,
    notes_accepted: AtomicU64,
    notes_promoted: AtomicU64,
}

impl PlaybackStats {
    pub fn samples_rendered(&self) -> u64 {
        self.samples_rendered.load(Ordering::Relaxed)
    }

    /// Notes taken out of the inbox by the render side.
    pub fn notes_accepted(&self) -> u64 {
        self.notes_accepted.load(Ordering::Relaxed)
    }

    pub fn notes_promoted(&self) -> u64 {
        self.notes_promoted.load(Ordering::Relaxed)
    }

    /// Seconds of audio rendered at `sample_rate`.
    pub fn elapsed(&self, sample_rate: u32) -> f64 {
        self.samples_rendered() as f64 / sample_rate.max(1) as f64
    }
}

/// The render half of a session. Lives inside the backend callback.
///
/// Owns the [`Scheduler`] outright; the only things it shares are the inbox
/// it pops from, the stop flag, the stats counters and the idle channel.
pub struct Pump {
    scheduler: Scheduler,
    inbox: Arc<ArrayQueue<DelayedNote>>,
    stopped: Arc<AtomicBool>,
    stats: Arc<PlaybackStats>,
    idle: Sender<u64>,
    mode: PlaybackMode,
    accepted: u64,
    idle_reported: bool,
    frame: Vec<f32>,
}

impl Pump {
    pub fn new(
        scheduler: Scheduler,
        inbox: Arc<ArrayQueue<DelayedNote>>,
        stopped: Arc<AtomicBool>,
        stats: Arc<PlaybackStats>,
        idle: Sender<u64>,
        mode: PlaybackMode,
    ) -> Self {
        Pump {
            scheduler,
            inbox,
            stopped,
            stats,
            idle,
            mode,
            accepted: 0,
            idle_reported: false,
            frame: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.scheduler.sample_rate()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Fills one block of interleaved output.
    pub fn fill<T>(&mut self, output: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        if self.is_stopped() {
            output.fill(T::EQUILIBRIUM);
            return;
        }

        self.drain_inbox();

        let channels = channels.max(1);
        if self.frame.len() != channels {
            // first block only; the channel count never changes mid-stream
            self.frame.resize(channels, 0.0);
        }
        let mut frames = 0u64;

        for out in output.chunks_mut(channels) {
            self.scheduler.produce_sample(&mut self.frame);
            for (sample, value) in out.iter_mut().zip(&self.frame) {
                *sample = T::from_sample(*value);
            }
            frames += 1;
        }

        self.stats.samples_rendered.fetch_add(frames, Ordering::Relaxed);
        self.stats
            .notes_promoted
            .store(self.scheduler.notes_promoted(), Ordering::Relaxed);

        self.report_idle();
    }

    fn drain_inbox(&mut self) {
        let mut taken = 0;
        while let Some(note) = self.inbox.pop() {
            self.scheduler.enqueue(note);
            taken += 1;
        }
        if taken > 0 {
            self.accepted += taken;
            self.idle_reported = false;
            self.stats.notes_accepted.fetch_add(taken, Ordering::Relaxed);
        }
    }

    // Once per idle period. The count lets the control side tell a stale
    // signal from a real one when notes are still in flight.
    fn report_idle(&mut self) {
        if self.mode != PlaybackMode::DrainAndQuit || self.idle_reported {
            return;
        }
        if self.scheduler.is_idle() {
            self.idle_reported = true;
            let _ = self.idle.try_send(self.accepted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::build_note;
    use crossbeam_channel::{Receiver, unbounded};

    const SAMPLE_RATE: u32 = 44100;

    struct Harness {
        pump: Pump,
        inbox: Arc<ArrayQueue<DelayedNote>>,
        stopped: Arc<AtomicBool>,
        stats: Arc<PlaybackStats>,
        idle: Receiver<u64>,
    }

    fn harness(mode: PlaybackMode, capacity: usize) -> Harness {
        let inbox = Arc::new(ArrayQueue::new(capacity));
        let stopped = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PlaybackStats::default());
        let (idle_tx, idle_rx) = unbounded();
        let pump = Pump::new(
            Scheduler::new(SAMPLE_RATE),
            Arc::clone(&inbox),
            Arc::clone(&stopped),
            Arc::clone(&stats),
            idle_tx,
            mode,
        );
        Harness { pump, inbox, stopped, stats, idle: idle_rx }
    }

    fn note(delay: f64, duration: f64, frequency: f32) -> DelayedNote {
        DelayedNote::new(delay, build_note("guitar", duration, 1.0, frequency).unwrap()).unwrap()
    }

    #[test]
    fn fills_every_channel_with_the_same_sample() {
        let mut h = harness(PlaybackMode::RunForever, 8);
        h.inbox.push(note(0.0, 1.0, 440.0)).unwrap();
        let mut block = vec![0.0f32; 512 * 2];
        h.pump.fill(&mut block, 2);
        for frame in block.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(block.iter().any(|s| *s != 0.0));
        assert_eq!(h.stats.samples_rendered(), 512);
        assert_eq!(h.stats.notes_accepted(), 1);
        assert_eq!(h.stats.notes_promoted(), 1);
    }

    #[test]
    fn converts_to_integer_device_formats() {
        let mut h = harness(PlaybackMode::RunForever, 8);
        h.inbox.push(note(0.0, 1.0, 440.0)).unwrap();
        let mut block = vec![0i16; 256];
        h.pump.fill(&mut block, 1);
        assert_eq!(block[0], 0);
        assert!(block.iter().any(|s| *s != 0));

        let mut unsigned = vec![0u16; 4];
        h.stopped.store(true, Ordering::Release);
        h.pump.fill(&mut unsigned, 2);
        assert!(unsigned.iter().all(|s| *s == u16::EQUILIBRIUM));
    }

    #[test]
    fn writes_silence_once_stopped() {
        let mut h = harness(PlaybackMode::RunForever, 8);
        h.inbox.push(note(0.0, 1.0, 440.0)).unwrap();
        let mut block = vec![1.0f32; 64];
        h.pump.fill(&mut block, 2);
        h.stopped.store(true, Ordering::Release);

        let mut block = vec![1.0f32; 64];
        h.pump.fill(&mut block, 2);
        assert!(block.iter().all(|s| *s == 0.0));
        assert_eq!(h.stats.samples_rendered(), 32);
    }

    #[test]
    fn reports_idle_once_per_idle_period() {
        let mut h = harness(PlaybackMode::DrainAndQuit, 8);
        h.inbox.push(note(0.0, 0.01, 440.0)).unwrap();

        let mut block = vec![0.0f32; 1024];
        h.pump.fill(&mut block, 1);
        h.pump.fill(&mut block, 1);
        assert_eq!(h.idle.try_iter().collect::<Vec<_>>(), vec![1]);

        h.inbox.push(note(0.0, 0.01, 440.0)).unwrap();
        h.pump.fill(&mut block, 1);
        h.pump.fill(&mut block, 1);
        assert_eq!(h.idle.try_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn run_forever_never_reports_idle() {
        let mut h = harness(PlaybackMode::RunForever, 8);
        let mut block = vec![0.0f32; 128];
        h.pump.fill(&mut block, 1);
        assert!(h.idle.try_recv().is_err());
    }

    #[test]
    fn concurrent_producer_loses_and_duplicates_nothing() {
        let mut h = harness(PlaybackMode::RunForever, 16);
        let total = 500usize;
        let inbox = Arc::clone(&h.inbox);

        let producer = std::thread::spawn(move || {
            for i in 0..total {
                let mut item = note(0.0, 0.001, 20.0 + i as f32);
                loop {
                    match inbox.push(item) {
                        Ok(()) => break,
                        Err(back) => {
                            item = back;
                            std::thread::yield_now();
                        }
                    }
                }
                if fastrand::u8(..) < 32 {
                    std::thread::yield_now();
                }
            }
        });

        // voices outlive a block, so the ones promoted during a block are
        // always the tail of the active list afterwards
        let mut seen = Vec::new();
        let mut block = vec![0.0f32; 8];
        while seen.len() < total {
            let before = h.pump.scheduler().notes_promoted();
            h.pump.fill(&mut block, 1);
            let fresh = (h.pump.scheduler().notes_promoted() - before) as usize;
            let active: Vec<f32> = h.pump.scheduler().voices().map(|v| v.note().frequency()).collect();
            seen.extend_from_slice(&active[active.len() - fresh..]);
        }
        producer.join().unwrap();

        let expected: Vec<f32> = (0..total).map(|i| 20.0 + i as f32).collect();
        assert_eq!(seen, expected);
        assert_eq!(h.stats.notes_accepted(), total as u64);
    }
}
