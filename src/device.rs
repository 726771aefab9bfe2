//! Raw Linux input-device reading: `EV_KEY` events and the exclusive-grab
//! ioctl used to keep other consumers from seeing the same keypresses while
//! the emulator is in the foreground.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread;

use crate::error::{EmuError, Result};
use crate::input::{EventValue, KeyEvent};

const EV_KEY: u16 = 0x01;
/// Reference device's input-event record: 8 bytes of timestamp, then
/// `type`, `code`, `value`. 16 bytes total, matching the platform's
/// struct layout rather than the host's native `struct input_event`.
const RECORD_LEN: usize = 16;

nix::ioctl_write_int!(eviocgrab, b'E', 0x90);

pub struct InputDevice {
    file: File,
    grabbed: bool,
}

/// A handle to an already-open device's file description, kept after the
/// [`InputDevice`] itself has been consumed by [`InputDevice::spawn_reader`].
/// `EVIOCGRAB` is a property of the open file description, not a single fd,
/// so releasing the grab through a `dup`'d handle affects the reader
/// thread's fd too.
pub struct GrabHandle(File);

impl GrabHandle {
    pub fn set_grab(&mut self, grab: bool) {
        let fd = self.0.as_raw_fd();
        let value: i32 = i32::from(grab);
        let _ = unsafe { eviocgrab(fd, value) };
    }
}

impl InputDevice {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_| EmuError::DeviceUnavailable(path.to_path_buf()))?;
        Ok(Self {
            file,
            grabbed: false,
        })
    }

    /// Acquire (or release) exclusive access via `EVIOCGRAB`. Failures are
    /// tolerated: not every device node supports the ioctl, and losing the
    /// grab is not fatal to reading events.
    pub fn set_grab(&mut self, grab: bool) {
        let fd = self.file.as_raw_fd();
        let value: i32 = i32::from(grab);
        let result = unsafe { eviocgrab(fd, value) };
        if result.is_ok() {
            self.grabbed = grab;
        }
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Duplicates the underlying file description so the caller can keep a
    /// handle capable of releasing the grab after `self` is moved into
    /// [`Self::spawn_reader`].
    pub fn grab_handle(&self) -> Result<GrabHandle> {
        self.file
            .try_clone()
            .map(GrabHandle)
            .map_err(|_| EmuError::DeviceUnavailable(PathBuf::new()))
    }

    /// Parse one 16-byte record into a `(type, code, value)` triple.
    fn parse_record(buf: &[u8; RECORD_LEN]) -> (u16, u16, i32) {
        let kind = u16::from_ne_bytes([buf[8], buf[9]]);
        let code = u16::from_ne_bytes([buf[10], buf[11]]);
        let value = i32::from_ne_bytes([buf[12], buf[13], buf[14], buf[15]]);
        (kind, code, value)
    }

    /// Spawn a background thread that reads event records and forwards
    /// decoded `EV_KEY` events to `tx`. The read itself blocks the spawned
    /// thread only, keeping the event loop's own suspension point singular.
    pub fn spawn_reader(mut self, tx: Sender<KeyEvent>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut buf = [0u8; RECORD_LEN];
            loop {
                match self.file.read_exact(&mut buf) {
                    Ok(()) => {
                        let (kind, code, value) = Self::parse_record(&buf);
                        if kind != EV_KEY {
                            continue;
                        }
                        let value = match value {
                            0 => EventValue::Release,
                            2 => EventValue::Repeat,
                            _ => EventValue::Press,
                        };
                        if tx.send(KeyEvent { value, code }).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })
    }

    /// Spawn a background thread that forwards whatever raw byte chunks
    /// arrive on this device, unparsed, to `tx`. Used for the special
    /// session-selection device, whose packets are decoded by
    /// [`parse_special_packet`] rather than the `EV_KEY` record format.
    pub fn spawn_raw_reader(mut self, tx: Sender<Vec<u8>>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut buf = [0u8; 64];
            loop {
                match self.file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })
    }
}

/// Decode one ASCII session-selection packet from the special input
/// device: a leading `A` followed by a name byte selects (or creates) a
/// session of that name.
pub fn parse_special_packet(bytes: &[u8]) -> Option<char> {
    if bytes.len() >= 2 && bytes[0] == b'A' {
        Some(bytes[1] as char)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_packet_extracts_name_byte() {
        assert_eq!(parse_special_packet(b"Ax"), Some('x'));
        assert_eq!(parse_special_packet(b"B"), None);
        assert_eq!(parse_special_packet(b""), None);
    }

    #[test]
    fn parse_record_reads_native_endian_fields() {
        let mut buf = [0u8; RECORD_LEN];
        buf[8..10].copy_from_slice(&EV_KEY.to_ne_bytes());
        buf[10..12].copy_from_slice(&30u16.to_ne_bytes());
        buf[12..16].copy_from_slice(&1i32.to_ne_bytes());
        let (kind, code, value) = InputDevice::parse_record(&buf);
        assert_eq!(kind, EV_KEY);
        assert_eq!(code, 30);
        assert_eq!(value, 1);
    }
}
