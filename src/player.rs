use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{Receiver, Select, Sender, bounded, unbounded};
use crossbeam_utils::Backoff;
use log::{debug, error, info};

use crate::arrangement::{Arrangement, DelayedNote};
use crate::backend::{AudioBackend, OutputStream};
use crate::config::{EngineConfig, PlaybackMode};
use crate::error::SynthError;
use crate::pump::{PlaybackStats, Pump};
use crate::scheduler::Scheduler;

// How long the control loop waits before retrying a full inbox.
const BACKLOG_RETRY: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    Stopped,
}

/// Hands notes to a running [`Player`] from any thread.
#[derive(Debug, Clone)]
pub struct NoteSender {
    tx: Sender<DelayedNote>,
}

impl NoteSender {
    pub fn send(&self, note: DelayedNote) -> Result<(), SynthError> {
        self.tx
            .send(note)
            .map_err(|_| SynthError::AudioError("Player is no longer running".to_string()))
    }
}

/// Asks a running [`Player`] to stop. Safe to call from any thread, any
/// number of times.
#[derive(Debug, Clone)]
pub struct QuitHandle {
    tx: Sender<()>,
    requested: Arc<AtomicBool>,
}

impl QuitHandle {
    pub fn quit(&self) {
        self.requested.store(true, Ordering::Release);
        let _ = self.tx.try_send(());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// One playback session: the output stream plus the control side of the
/// channels that feed it.
pub struct Player {
    stream: Option<Box<dyn OutputStream>>,
    state: PlaybackState,
    mode: PlaybackMode,
    sample_rate: u32,
    inbox: Arc<ArrayQueue<DelayedNote>>,
    backlog: VecDeque<DelayedNote>,
    forwarded: u64,
    stopped: Arc<AtomicBool>,
    stats: Arc<PlaybackStats>,
    notes_tx: Sender<DelayedNote>,
    notes_rx: Receiver<DelayedNote>,
    errors_rx: Receiver<SynthError>,
    idle_rx: Receiver<u64>,
    // held so the receivers above never report disconnection
    _errors_tx: Sender<SynthError>,
    _idle_tx: Sender<u64>,
    quit: QuitHandle,
    quit_rx: Receiver<()>,
}

impl Player {
    /// Opens `backend` and starts rendering `arrangement` right away.
    pub fn start<B: AudioBackend>(
        backend: B,
        config: &EngineConfig,
        arrangement: Arrangement,
        mode: PlaybackMode,
    ) -> Result<Player, SynthError> {
        let sample_rate = backend.sample_rate();
        let channels = backend.channels();

        let mut scheduler = Scheduler::from_config(config, sample_rate);
        let preloaded = arrangement.len();
        scheduler.extend(arrangement);

        let inbox = Arc::new(ArrayQueue::new(config.inbox_capacity.max(1)));
        let stopped = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PlaybackStats::default());
        let (notes_tx, notes_rx) = unbounded();
        let (errors_tx, errors_rx) = unbounded();
        let (idle_tx, idle_rx) = unbounded();
        let (quit_tx, quit_rx) = bounded(1);

        let pump = Pump::new(
            scheduler,
            Arc::clone(&inbox),
            Arc::clone(&stopped),
            Arc::clone(&stats),
            idle_tx.clone(),
            mode,
        );
        let stream = backend.open(pump, errors_tx.clone())?;

        info!(
            "Playback started: {} notes, {} Hz, {} channels, {:?}",
            preloaded, sample_rate, channels, mode
        );

        Ok(Player {
            stream: Some(stream),
            state: PlaybackState::Playing,
            mode,
            sample_rate,
            inbox,
            backlog: VecDeque::new(),
            forwarded: 0,
            stopped,
            stats,
            notes_tx,
            notes_rx,
            errors_rx,
            idle_rx,
            _errors_tx: errors_tx,
            _idle_tx: idle_tx,
            quit: QuitHandle {
                tx: quit_tx,
                requested: Arc::new(AtomicBool::new(false)),
            },
            quit_rx,
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        Arc::clone(&self.stats)
    }

    pub fn note_sender(&self) -> NoteSender {
        NoteSender { tx: self.notes_tx.clone() }
    }

    pub fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    /// Queues a note behind everything already sent.
    pub fn enqueue(&mut self, note: DelayedNote) -> Result<(), SynthError> {
        if self.state == PlaybackState::Stopped {
            return Err(SynthError::AudioError("Player is not playing".to_string()));
        }
        debug!("Enqueued note at {} Hz after {}s", note.note().frequency(), note.delay());
        self.forward(note);
        Ok(())
    }

    /// Control loop. Returns when playback stops: on quit, on reaching idle
    /// in [`PlaybackMode::DrainAndQuit`], or with the first fatal error.
    ///
    /// When several signals are waiting they are handled strictly in this
    /// order: error, quit, new notes, idle.
    pub fn run(&mut self) -> Result<(), SynthError> {
        let backoff = Backoff::new();

        while self.state == PlaybackState::Playing {
            let woke = self.wait(&backoff);
            if woke {
                backoff.reset();
            } else {
                backoff.snooze();
            }

            self.flush_backlog();

            if let Ok(err) = self.errors_rx.try_recv() {
                error!("Playback failed: {}", err);
                self.stop();
                return Err(err);
            }

            if self.quit_rx.try_recv().is_ok() || self.quit.is_requested() {
                info!("Quit requested");
                self.stop();
                return Ok(());
            }

            while let Ok(note) = self.notes_rx.try_recv() {
                self.forward(note);
            }

            while let Ok(accepted) = self.idle_rx.try_recv() {
                if self.mode == PlaybackMode::DrainAndQuit && self.is_drained(accepted) {
                    info!("All notes played");
                    self.stop();
                    return Ok(());
                }
                debug!("Ignoring stale idle signal ({} of {} notes)", accepted, self.forwarded);
            }
        }

        Ok(())
    }

    /// Stops output and releases the device. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!(
                "Playback stopped after {:.2}s, {} notes played",
                self.stats.elapsed(self.sample_rate),
                self.stats.notes_promoted()
            );
        }
        self.state = PlaybackState::Stopped;
    }

    // Blocks until some channel has a message. With a backlog it only spins
    // and sleeps briefly, so the backlog keeps being retried.
    fn wait(&self, backoff: &Backoff) -> bool {
        let mut sel = Select::new();
        sel.recv(&self.errors_rx);
        sel.recv(&self.quit_rx);
        sel.recv(&self.notes_rx);
        sel.recv(&self.idle_rx);

        if self.backlog.is_empty() {
            sel.ready();
            true
        } else if backoff.is_completed() {
            sel.ready_timeout(BACKLOG_RETRY).is_ok()
        } else {
            sel.try_ready().is_ok()
        }
    }

    fn is_drained(&self, accepted: u64) -> bool {
        accepted == self.forwarded && self.backlog.is_empty() && self.notes_rx.is_empty()
    }

    fn forward(&mut self, note: DelayedNote) {
        if !self.backlog.is_empty() {
            self.backlog.push_back(note);
            return;
        }
        match self.inbox.push(note) {
            Ok(()) => self.forwarded += 1,
            Err(note) => {
                debug!("Inbox full, holding note back");
                self.backlog.push_back(note);
            }
        }
    }

    fn flush_backlog(&mut self) {
        while let Some(note) = self.backlog.pop_front() {
            if let Err(note) = self.inbox.push(note) {
                self.backlog.push_front(note);
                break;
            }
            self.forwarded += 1;
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
