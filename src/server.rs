use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::arrangement::{DelayedNote, RawNote};
use crate::error::SynthError;
use crate::player::{NoteSender, QuitHandle};

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";

// How often the accept loop looks at the quit flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Decodes one line of client input.
///
/// Blank lines and lines starting with `/` are comments and yield `None`.
/// Anything else must be a single JSON note record.
pub fn handle_line(line: &str) -> Result<Option<DelayedNote>, SynthError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('/') {
        return Ok(None);
    }
    RawNote::from_json_line(line)?.resolve().map(Some)
}

/// Binds `addr` and serves until `quit` is requested.
pub fn serve(addr: impl ToSocketAddrs, notes: NoteSender, quit: QuitHandle) -> Result<(), SynthError> {
    let listener = TcpListener::bind(addr)
        .map_err(|e| SynthError::AudioError(format!("Could not bind server socket: {}", e)))?;
    serve_on(listener, notes, quit)
}

/// Accepts connections on an already bound listener, one thread each.
pub fn serve_on(listener: TcpListener, notes: NoteSender, quit: QuitHandle) -> Result<(), SynthError> {
    listener.set_nonblocking(true)?;
    if let Ok(addr) = listener.local_addr() {
        info!("Listening for notes on {}", addr);
    }

    while !quit.is_requested() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let notes = notes.clone();
                let spawned = thread::Builder::new()
                    .name(format!("tuner-conn-{}", peer))
                    .spawn(move || handle_connection(stream, peer, notes));
                if let Err(e) = spawned {
                    warn!("Could not start connection thread for {}: {}", peer, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => warn!("Failed to accept connection: {}", e),
        }
    }

    info!("Server shutting down");
    Ok(())
}

fn handle_connection(stream: TcpStream, peer: SocketAddr, notes: NoteSender) {
    debug!("Client connected: {}", peer);
    // accepted sockets can inherit the listener's non-blocking mode
    if let Err(e) = stream.set_nonblocking(false) {
        warn!("Dropping client {}: {}", peer, e);
        return;
    }

    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read from {}: {}", peer, e);
                break;
            }
        };

        match handle_line(&line) {
            Ok(Some(note)) => {
                if notes.send(note).is_err() {
                    debug!("Player gone, closing {}", peer);
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to handle message \"{}\": {}", line.trim(), e),
        }
    }

    debug!("Client disconnected: {}", peer);
}
