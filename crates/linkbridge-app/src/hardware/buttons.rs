//! Button input from Linux input devices
//!
//! [`InputButtons`] runs one reader task per event device and forwards the
//! key records that match a configured button. [`ButtonTracker`] turns those
//! records into click and long-press events.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use linkbridge_core::prelude::*;
use linkbridge_core::{Button, ButtonEvent, ButtonState};

use crate::config::ButtonSettings;

const EV_KEY: u16 = 0x01;

/// Size of one `struct input_event` on this target
pub const EVENT_SIZE: usize = std::mem::size_of::<libc::input_event>();

/// Key value reported by the kernel: 0 release, 1 press, 2 autorepeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub button: Button,
    pub value: i32,
}

// ─────────────────────────────────────────────────────────────────
// Key-code mapping
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct KeyMap {
    mode: u16,
    power: u16,
}

impl KeyMap {
    fn button_for(&self, code: u16) -> Option<Button> {
        if code == self.mode {
            Some(Button::Mode)
        } else if code == self.power {
            Some(Button::Power)
        } else {
            None
        }
    }
}

/// Decode one raw `input_event`. The timestamp leads the record, so the
/// type/code/value triple sits at the tail on both 32 and 64-bit targets.
fn decode(record: &[u8], keys: &KeyMap) -> Option<KeyInput> {
    if record.len() != EVENT_SIZE {
        return None;
    }
    let tail = &record[EVENT_SIZE - 8..];
    let kind = u16::from_ne_bytes([tail[0], tail[1]]);
    let code = u16::from_ne_bytes([tail[2], tail[3]]);
    let value = i32::from_ne_bytes([tail[4], tail[5], tail[6], tail[7]]);

    if kind != EV_KEY {
        return None;
    }
    keys.button_for(code).map(|button| KeyInput { button, value })
}

// ─────────────────────────────────────────────────────────────────
// Device readers
// ─────────────────────────────────────────────────────────────────

/// Merged key stream from all configured input devices
pub struct InputButtons {
    rx: mpsc::Receiver<KeyInput>,
    readers: Vec<JoinHandle<()>>,
}

impl InputButtons {
    /// Open every configured device. Devices that fail to open are logged
    /// and skipped.
    pub fn open(settings: &ButtonSettings) -> Self {
        let keys = KeyMap {
            mode: settings.mode_key_code,
            power: settings.power_key_code,
        };
        let mut devices = Vec::new();
        for path in &settings.event_paths {
            match open_nonblocking(path) {
                Ok(file) => devices.push((path.clone(), file)),
                Err(e) => error!("open {} error: {}", path.display(), e),
            }
        }
        Self::from_devices(devices, keys.mode, keys.power)
    }

    /// Read from already opened non-blocking descriptors
    pub fn from_devices(devices: Vec<(PathBuf, File)>, mode_code: u16, power_code: u16) -> Self {
        let keys = KeyMap {
            mode: mode_code,
            power: power_code,
        };
        let (tx, rx) = mpsc::channel(64);
        let readers = devices
            .into_iter()
            .map(|(path, file)| tokio::spawn(read_device(path, file, keys, tx.clone())))
            .collect();
        Self { rx, readers }
    }

    /// A stream that never yields
    pub fn none() -> Self {
        Self::from_devices(Vec::new(), 0, 0)
    }

    /// Next key record. Pends forever once every reader has stopped.
    pub async fn next(&mut self) -> KeyInput {
        match self.rx.recv().await {
            Some(input) => input,
            None => std::future::pending().await,
        }
    }
}

impl Drop for InputButtons {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

fn open_nonblocking(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

async fn read_device(path: PathBuf, file: File, keys: KeyMap, tx: mpsc::Sender<KeyInput>) {
    let fd = match AsyncFd::new(file) {
        Ok(fd) => fd,
        Err(e) => {
            error!("poll {} error: {}", path.display(), e);
            return;
        }
    };
    let mut buf = vec![0u8; EVENT_SIZE * 16];
    let mut pending = Vec::with_capacity(EVENT_SIZE);

    loop {
        let mut guard = match fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                error!("wait {} error: {}", path.display(), e);
                return;
            }
        };

        let n = match guard.try_io(|inner| {
            let mut file = inner.get_ref();
            file.read(&mut buf)
        }) {
            Ok(Ok(0)) => {
                debug!("{} closed", path.display());
                return;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => {
                error!("read {} error: {}", path.display(), e);
                return;
            }
            Err(_would_block) => continue,
        };

        // Event devices return whole records, other sources may split them
        pending.extend_from_slice(&buf[..n]);
        let whole = pending.len() - pending.len() % EVENT_SIZE;
        for record in pending[..whole].chunks_exact(EVENT_SIZE) {
            if let Some(input) = decode(record, &keys) {
                if tx.send(input).await.is_err() {
                    return;
                }
            }
        }
        pending.drain(..whole);
    }
}

// ─────────────────────────────────────────────────────────────────
// Click / long-press state machine
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Pending {
    #[default]
    None,
    Ready(ButtonEvent),
    /// Reported once, swallowed until the next press
    Taken,
}

#[derive(Debug, Clone, Copy, Default)]
struct KeyTrack {
    state: ButtonState,
    pressed_at: Option<Instant>,
    pending: Pending,
}

/// Per-button click and long-press detection
#[derive(Debug, Clone)]
pub struct ButtonTracker {
    long_press: Duration,
    mode: KeyTrack,
    power: KeyTrack,
}

impl ButtonTracker {
    pub fn new(long_press: Duration) -> Self {
        Self {
            long_press,
            mode: KeyTrack::default(),
            power: KeyTrack::default(),
        }
    }

    pub fn set_long_press(&mut self, long_press: Duration) {
        self.long_press = long_press;
    }

    pub fn state(&self, button: Button) -> ButtonState {
        self.track(button).state
    }

    /// Feed one key record
    pub fn feed(&mut self, input: KeyInput, now: Instant) {
        let long_press = self.long_press;
        let track = self.track_mut(input.button);

        match (track.state, input.value != 0) {
            (ButtonState::Released, true) => {
                debug!("key {:?} pressed", input.button);
                track.state = ButtonState::Pressed;
                track.pressed_at = Some(now);
                track.pending = Pending::None;
            }
            (ButtonState::Pressed, true) => check_long(input.button, track, long_press, now),
            (ButtonState::Pressed, false) => {
                track.state = ButtonState::Released;
                if track.pending == Pending::None {
                    debug!("key {:?} click", input.button);
                    track.pending = Pending::Ready(ButtonEvent::Click);
                } else {
                    debug!("key {:?} release", input.button);
                }
            }
            (ButtonState::Released, false) => {}
        }
    }

    /// Take the pending event of `button`, if any. A button held past the
    /// threshold reports its long press here even without autorepeat.
    pub fn take(&mut self, button: Button, now: Instant) -> Option<ButtonEvent> {
        let long_press = self.long_press;
        let track = self.track_mut(button);
        if track.state == ButtonState::Pressed {
            check_long(button, track, long_press, now);
        }
        match track.pending {
            Pending::Ready(event) => {
                track.pending = Pending::Taken;
                Some(event)
            }
            _ => None,
        }
    }

    fn track(&self, button: Button) -> &KeyTrack {
        match button {
            Button::Mode => &self.mode,
            Button::Power => &self.power,
        }
    }

    fn track_mut(&mut self, button: Button) -> &mut KeyTrack {
        match button {
            Button::Mode => &mut self.mode,
            Button::Power => &mut self.power,
        }
    }
}

fn check_long(button: Button, track: &mut KeyTrack, long_press: Duration, now: Instant) {
    let held = track
        .pressed_at
        .map(|at| now.saturating_duration_since(at))
        .unwrap_or_default();
    if track.pending == Pending::None && held >= long_press {
        debug!("key {:?} long press", button);
        track.pending = Pending::Ready(ButtonEvent::LongPress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    const LONG: Duration = Duration::from_millis(1000);

    fn press(button: Button) -> KeyInput {
        KeyInput { button, value: 1 }
    }

    fn release(button: Button) -> KeyInput {
        KeyInput { button, value: 0 }
    }

    fn record(kind: u16, code: u16, value: i32) -> Vec<u8> {
        let mut bytes = vec![0u8; EVENT_SIZE];
        let tail = EVENT_SIZE - 8;
        bytes[tail..tail + 2].copy_from_slice(&kind.to_ne_bytes());
        bytes[tail + 2..tail + 4].copy_from_slice(&code.to_ne_bytes());
        bytes[tail + 4..].copy_from_slice(&value.to_ne_bytes());
        bytes
    }

    #[test]
    fn test_short_press_is_click() {
        let start = Instant::now();
        let mut tracker = ButtonTracker::new(LONG);

        tracker.feed(press(Button::Mode), start);
        assert_eq!(tracker.take(Button::Mode, start), None);
        tracker.feed(release(Button::Mode), start + Duration::from_millis(200));

        let later = start + Duration::from_millis(210);
        assert_eq!(tracker.take(Button::Mode, later), Some(ButtonEvent::Click));
        assert_eq!(tracker.take(Button::Mode, later), None);
    }

    #[test]
    fn test_hold_is_long_press_without_click() {
        let start = Instant::now();
        let mut tracker = ButtonTracker::new(LONG);

        tracker.feed(press(Button::Power), start);
        assert_eq!(
            tracker.take(Button::Power, start + Duration::from_millis(999)),
            None
        );
        assert_eq!(
            tracker.take(Button::Power, start + LONG),
            Some(ButtonEvent::LongPress)
        );
        // Still held: no repeat
        assert_eq!(
            tracker.take(Button::Power, start + Duration::from_secs(5)),
            None
        );
        tracker.feed(release(Button::Power), start + Duration::from_secs(6));
        assert_eq!(
            tracker.take(Button::Power, start + Duration::from_secs(6)),
            None
        );
        assert_eq!(tracker.state(Button::Power), ButtonState::Released);
    }

    #[test]
    fn test_autorepeat_fires_long_press() {
        let start = Instant::now();
        let mut tracker = ButtonTracker::new(LONG);

        tracker.feed(press(Button::Mode), start);
        tracker.feed(
            KeyInput {
                button: Button::Mode,
                value: 2,
            },
            start + Duration::from_millis(1100),
        );
        // Released before anyone polled: the long press is still reported once
        tracker.feed(release(Button::Mode), start + Duration::from_millis(1200));
        let later = start + Duration::from_millis(1300);
        assert_eq!(tracker.take(Button::Mode, later), Some(ButtonEvent::LongPress));
        assert_eq!(tracker.take(Button::Mode, later), None);
    }

    #[test]
    fn test_buttons_are_independent() {
        let start = Instant::now();
        let mut tracker = ButtonTracker::new(LONG);

        tracker.feed(press(Button::Mode), start);
        tracker.feed(release(Button::Mode), start);
        assert_eq!(tracker.take(Button::Power, start), None);
        assert_eq!(tracker.take(Button::Mode, start), Some(ButtonEvent::Click));
    }

    #[test]
    fn test_decode_ignores_other_types_and_codes() {
        let keys = KeyMap {
            mode: 59,
            power: 116,
        };
        assert_eq!(
            decode(&record(EV_KEY, 116, 1), &keys),
            Some(press(Button::Power))
        );
        assert_eq!(decode(&record(0x00, 59, 1), &keys), None);
        assert_eq!(decode(&record(EV_KEY, 30, 1), &keys), None);
        assert_eq!(decode(&[0u8; 4], &keys), None);
    }

    #[tokio::test]
    async fn test_reader_forwards_matching_records() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let file = File::from(OwnedFd::from(reader));
        let mut buttons = InputButtons::from_devices(vec![("pair".into(), file)], 59, 116);

        let mut bytes = record(0x00, 0, 0);
        bytes.extend(record(EV_KEY, 59, 1));
        // Split the second record across two writes
        let split = bytes.len() - 5;
        writer.write_all(&bytes[..split]).unwrap();
        writer.write_all(&bytes[split..]).unwrap();

        let input = tokio::time::timeout(Duration::from_secs(2), buttons.next())
            .await
            .unwrap();
        assert_eq!(input, press(Button::Mode));
    }
}
