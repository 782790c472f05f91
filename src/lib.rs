//  _________          _        _______  _______
//  \__   __/|\     /|( (    /|(  ____ \(  ____ )
//     ) (   | )   ( ||  \  ( || (    \/| (    )|
//     | |   | |   | ||   \ | || (__    | (____)|
//     | |   | |   | || (\ \) ||  __)   |     __)
//     | |   | |   | || | \   || (      | (\ (
//     | |   | (___) || )  \  || (____/\| ) \ \__
//     )_(   (_______)|/    )_)(_______/|/   \__/

pub mod error;
pub mod pitch;
pub mod instrument;
pub mod midi;
pub mod arrangement;
pub mod voice;
pub mod config;
pub mod scheduler;
pub mod pump;
pub mod backend;
pub mod player;
pub mod server;
pub mod render;

pub use error::SynthError;
pub use pitch::{PitchTable, A4_FREQUENCY, A4_INDEX};
pub use instrument::{Envelope, Instrument, InstrumentTable, Note, Overtone, build_note};
pub use arrangement::{Arrangement, DelayedNote, RawNote, DEFAULT_VOLUME};
pub use midi::read_midi;
pub use voice::Voice;
pub use config::{EngineConfig, PlaybackMode, ReapPolicy};
pub use scheduler::Scheduler;
pub use pump::{PlaybackStats, Pump};
pub use backend::{AudioBackend, Capture, CpalBackend, HeadlessBackend, OutputStream};
pub use player::{NoteSender, PlaybackState, Player, QuitHandle};
pub use render::{render_samples, render_to_wav};
