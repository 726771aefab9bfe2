//! The pseudo-terminal spawner: forks a child shell attached to a PTY and
//! hands back a bidirectional channel for its master side.
//!
//! This is the one true collaborator the emulator core treats as an
//! external interface — fork/exec and the PTY master fd belong to the
//! operating system, not to the terminal state machine. [`PortablePty`]
//! is the concrete implementation used outside of tests, built on
//! `portable-pty` the same way the session manager in the reference
//! codebase spawns its child processes.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::error::{EmuError, Result};

/// A spawned shell's PTY master side: a writer for keyboard bytes, a
/// channel of output chunks read from the child, and liveness/resize
/// controls. Output is delivered through `output_rx` rather than a
/// blocking read so the caller (the event loop) never stalls on PTY I/O.
pub struct PtyChannel {
    /// Kept alive only to hold the master fd open; dropping it would close
    /// the PTY out from under `writer`/the reader thread.
    _master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    output_rx: Receiver<Vec<u8>>,
    _reader_thread: thread::JoinHandle<()>,
    reader_alive: Arc<AtomicBool>,
}

/// Spawns a child process attached to a PTY. The real implementation lives
/// in [`PortablePty`]; tests substitute a fake to exercise [`crate::session`]
/// without forking anything.
pub trait PtySpawn {
    fn spawn(&self, command_path: &str, rows: u16, cols: u16) -> Result<PtyChannel>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PortablePty;

impl PtySpawn for PortablePty {
    fn spawn(&self, command_path: &str, rows: u16, cols: u16) -> Result<PtyChannel> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| EmuError::SessionSpawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(command_path);
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        cmd.env("ENV", "/etc/profile");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| EmuError::SessionSpawn(e.to_string()))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| EmuError::SessionSpawn(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| EmuError::SessionSpawn(e.to_string()))?;

        let (output_tx, output_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = mpsc::channel();
        let reader_alive = Arc::new(AtomicBool::new(true));
        let alive_clone = Arc::clone(&reader_alive);
        let reader_thread = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            alive_clone.store(false, Ordering::SeqCst);
        });

        Ok(PtyChannel {
            _master: pair.master,
            writer,
            child,
            output_rx,
            _reader_thread: reader_thread,
            reader_alive,
        })
    }
}

impl PtyChannel {
    /// Non-blocking: returns the next chunk of output if one has arrived.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.output_rx.try_recv().ok()
    }

    /// `true` once the reader thread has observed EOF or a read error.
    pub fn reader_closed(&self) -> bool {
        !self.reader_alive.load(Ordering::SeqCst)
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .map_err(EmuError::PtyWriteError)?;
        self.writer.flush().map_err(EmuError::PtyWriteError)
    }

    /// Non-blocking zombie reap; `Ok(Some(_))` once the child has exited.
    pub fn try_wait(&mut self) -> std::io::Result<Option<portable_pty::ExitStatus>> {
        self.child.try_wait()
    }

    pub fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}

/// Resolve `path`'s containing shell binary, defaulting to `$SHELL` or `/bin/sh`.
pub fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
