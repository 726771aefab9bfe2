//! One running shell: its PTY, grid, and in/out byte queues.
//!
//! A session owns everything specific to a single shell. The event loop
//! drives it through [`Session::step_read`]/[`Session::step_write`] each
//! iteration; nothing here blocks.

use std::collections::VecDeque;

use crate::error::Result;
use crate::grid::{Grid, Snapshot};
use crate::parser;
use crate::pty::{PtyChannel, PtySpawn};

const KEY_QUEUE_CAPACITY: usize = 4096;
const PARTIAL_BUF_CAPACITY: usize = 4096;

fn clamp_rows(rows: u16) -> u16 {
    if (4..=80).contains(&rows) {
        rows
    } else {
        25
    }
}

fn clamp_cols(cols: u16) -> u16 {
    if (10..=160).contains(&cols) {
        cols
    } else {
        80
    }
}

/// Rewrites a CSI cursor-key sequence (`ESC [ A/B/C/D`) to its SS3 form
/// (`ESC O A/B/C/D`) when cursor-key application mode is active; otherwise
/// passes the bytes through unchanged.
fn rewrite_for_app_mode(bytes: &[u8], app_mode: bool) -> Vec<u8> {
    if app_mode
        && bytes.len() >= 3
        && bytes[0] == 0x1b
        && bytes[1] == b'['
        && matches!(bytes[2], b'A' | b'B' | b'C' | b'D')
    {
        let mut rewritten = bytes.to_vec();
        rewritten[1] = b'O';
        rewritten
    } else {
        bytes.to_vec()
    }
}

/// Options for [`Session::state`]: whether to consume the dirty flag and
/// fetch a render-ready snapshot in the same call.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateOptions {
    pub reset_modified: bool,
    pub want_snapshot: bool,
}

pub type SessionId = u64;

pub struct Session {
    pub id: SessionId,
    pub name: String,
    grid: Grid,
    pty: PtyChannel,
    key_queue: VecDeque<u8>,
    partial: Vec<u8>,
    modified: bool,
    death_callback: Option<Box<dyn FnMut(SessionId) + Send>>,
}

impl Session {
    /// Spawn `command_path` attached to a new PTY sized `rows`x`cols`
    /// (clamped per [`clamp_rows`]/[`clamp_cols`]), with `sb_lines` of
    /// scrollback. `wide_chars` selects the grid's DEC Special Graphics
    /// table (see [`crate::grid::Grid::with_encoding`]). `death_callback`
    /// runs once, when the session is destroyed, so owners can unlink it
    /// from their session list.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: SessionId,
        command_path: &str,
        name: impl Into<String>,
        rows: u16,
        cols: u16,
        sb_lines: usize,
        wide_chars: bool,
        spawner: &dyn PtySpawn,
        death_callback: Option<Box<dyn FnMut(SessionId) + Send>>,
    ) -> Result<Self> {
        let rows = clamp_rows(rows);
        let cols = clamp_cols(cols);
        let pty = spawner.spawn(command_path, rows, cols)?;
        Ok(Self {
            id,
            name: name.into(),
            grid: Grid::with_encoding(rows as usize, cols as usize, sb_lines, wide_chars),
            pty,
            key_queue: VecDeque::new(),
            partial: Vec::new(),
            modified: false,
            death_callback,
        })
    }

    pub fn rows(&self) -> usize {
        self.grid.rows
    }

    pub fn cols(&self) -> usize {
        self.grid.cols
    }

    pub fn scrollback_top(&self) -> usize {
        self.grid.scrollback_top()
    }

    /// Enqueue bytes for the PTY, silently dropping them if the bounded
    /// queue is full. If cursor-key application mode is active and the
    /// string looks like a CSI cursor-key sequence (`ESC [ A/B/C/D`), it is
    /// rewritten to the SS3 form (`ESC O A/B/C/D`) the shell expects in
    /// that mode.
    pub fn key_in(&mut self, bytes: &[u8]) {
        let bytes = rewrite_for_app_mode(bytes, self.grid.flags.cursor_keys_app);
        if self.key_queue.len() + bytes.len() > KEY_QUEUE_CAPACITY {
            return;
        }
        self.key_queue.extend(bytes);
    }

    /// Returns whether the grid changed since the last reset, optionally
    /// resetting the flag and returning a render snapshot in the same call.
    pub fn state(&mut self, opts: StateOptions) -> (bool, Option<Snapshot<'_>>) {
        let was_modified = self.modified;
        if opts.reset_modified {
            self.modified = false;
        }
        let snap = if opts.want_snapshot {
            Some(self.grid.snapshot())
        } else {
            None
        };
        (was_modified, snap)
    }

    pub fn kill(&mut self) {
        let _ = self.pty.kill();
    }

    /// Drain PTY output, feed it through the parser, and retain any
    /// unconsumed suffix (a partial escape/UTF-8 sequence) for next time.
    /// Returns `true` on fatal I/O error (session should be destroyed).
    pub fn step_read(&mut self) -> bool {
        let mut saw_data = false;
        while let Some(chunk) = self.pty.try_recv() {
            saw_data = true;
            self.partial.extend_from_slice(&chunk);
            if self.partial.len() > PARTIAL_BUF_CAPACITY * 4 {
                // A pathological producer that never completes an escape
                // sequence; drop the oldest bytes rather than grow forever.
                let excess = self.partial.len() - PARTIAL_BUF_CAPACITY;
                self.partial.drain(..excess);
            }
            let consumed = parser::feed(&mut self.grid, &self.partial);
            self.partial.drain(..consumed);
            self.modified = true;
        }
        if !saw_data && self.pty.reader_closed() {
            return true;
        }
        false
    }

    /// Writes as much of the pending key queue as possible; leftover bytes
    /// stay queued for the next call.
    pub fn step_write(&mut self) {
        if self.key_queue.is_empty() {
            return;
        }
        let pending: Vec<u8> = self.key_queue.iter().copied().collect();
        if self.pty.write(&pending).is_ok() {
            self.key_queue.clear();
        }
    }

    /// Reaps the child process non-blockingly; `true` once it has exited.
    pub fn reap(&mut self) -> bool {
        matches!(self.pty.try_wait(), Ok(Some(_)))
    }

}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(cb) = self.death_callback.as_mut() {
            cb(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn clamp_rows_defaults_out_of_range_values() {
        assert_eq!(clamp_rows(2), 25);
        assert_eq!(clamp_rows(200), 25);
        assert_eq!(clamp_rows(40), 40);
    }

    #[test]
    fn clamp_cols_defaults_out_of_range_values() {
        assert_eq!(clamp_cols(5), 80);
        assert_eq!(clamp_cols(200), 80);
        assert_eq!(clamp_cols(100), 100);
    }

    #[test]
    fn rewrite_for_app_mode_rewrites_csi_cursor_keys_when_active() {
        let input = [0x1b, b'[', b'A'];
        assert_eq!(rewrite_for_app_mode(&input, true), vec![0x1b, b'O', b'A']);
        assert_eq!(rewrite_for_app_mode(&input, false), input.to_vec());
    }

    #[test]
    fn rewrite_for_app_mode_leaves_non_cursor_sequences_alone() {
        let input = [0x1b, b'[', b'2', b'J'];
        assert_eq!(rewrite_for_app_mode(&input, true), input.to_vec());
    }

    #[test]
    fn death_callback_fires_once_on_drop() {
        let fired = Arc::new(Mutex::new(false));
        let fired_clone = Arc::clone(&fired);
        let mut cb: Box<dyn FnMut(SessionId) + Send> = Box::new(move |_id| {
            *fired_clone.lock().unwrap() = true;
        });
        cb(1);
        assert!(*fired.lock().unwrap());
    }
}
