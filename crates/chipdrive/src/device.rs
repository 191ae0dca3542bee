//! Collaborator interfaces.
//!
//! Everything the playback core touches outside its own memory lives
//! behind one of these traits: removable storage, the chip bus (register
//! latching and clock generation), the analog attenuator and the
//! now-playing display. The frontend wires in real implementations; tests
//! wire in fakes.
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chip::Chip;

/// Byte-addressable storage handle with positioned reads.
///
/// `try_clone` must return an independent handle over the same content so
/// the cache refill worker can read concurrently with the playback driver.
pub trait StorageRead: Send {
    /// Read up to `buf.len()` bytes starting at absolute `offset`.
    /// Returns the number of bytes read; fewer than requested only at
    /// end-of-content.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total content length in bytes.
    fn size(&mut self) -> io::Result<u64>;

    /// Independent handle over the same content.
    fn try_clone(&self) -> io::Result<Box<dyn StorageRead>>;
}

/// Filesystem-backed storage. Clones share one descriptor behind a lock:
/// a plain duplicated `File` would share its seek cursor, letting the
/// refill worker's seeks interleave with the playback driver's.
#[derive(Clone)]
pub struct FsStorage {
    file: Arc<Mutex<std::fs::File>>,
}

impl FsStorage {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(FsStorage::new(std::fs::File::open(path)?))
    }

    pub fn new(file: std::fs::File) -> Self {
        FsStorage {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl StorageRead for FsStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn try_clone(&self) -> io::Result<Box<dyn StorageRead>> {
        Ok(Box::new(self.clone()))
    }
}

/// The hardware bus: register latching plus the programmable clock
/// generator feeding the chip sockets. Implementations are responsible for
/// satisfying each chip's bus settle timing; callers never wait explicitly.
pub trait ChipBus {
    /// Program clock output `channel` (0..=2) to `hz`.
    fn set_clock(&mut self, channel: usize, hz: u32);

    /// Gate all clock outputs.
    fn enable_clocks(&mut self, on: bool);

    /// Hardware reset line plus tone-generator silence commands.
    fn reset(&mut self);

    /// Latch `value` into register `address` (on `port` for multi-port
    /// chips) of the chip in `slot`.
    fn write_register(&mut self, slot: usize, port: u8, address: u8, value: u8);

    /// Write one unsigned 8-bit sample to the DAC register of the chip in
    /// `slot`.
    fn write_dac(&mut self, value: u8, slot: usize);

    /// Latched tone-generator write: the implementation pairs frequency
    /// low/high bytes and applies the zero-frequency fixup before strobing.
    fn write(&mut self, value: u8, slot: usize, clock_hz: u32);

    /// Tone-generator write strobed exactly as given.
    fn write_raw(&mut self, value: u8, slot: usize, clock_hz: u32);
}

/// Fade progress as owned by the attenuator and observed by the playback
/// loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeState {
    NotStarted,
    InProgress,
    Completed,
}

/// Analog volume/fade-out attenuator.
pub trait Attenuator {
    fn mute(&mut self);
    fn unmute(&mut self);

    /// Re-arm for a new track, optionally applying a fixed attenuation in
    /// dB (`None` keeps the current level).
    fn reset(&mut self, attenuation_db: Option<u8>);

    /// Begin the fade-out ramp. Calling again while a fade is in progress
    /// is a no-op. When fading is disabled the state jumps straight to
    /// `Completed`.
    fn start_fade(&mut self);

    /// Abort any fade and return to `NotStarted`.
    fn cancel_fade(&mut self);

    fn fade_state(&self) -> FadeState;
}

/// Now-playing payload pushed to the display collaborator on every
/// successful track load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NowPlaying {
    pub track_en: String,
    pub track_jp: String,
    pub game_en: String,
    pub game_jp: String,
    pub system_en: String,
    pub system_jp: String,
    pub author_en: String,
    pub author_jp: String,
    pub date: String,
    /// Formatted per-channel clock labels, e.g. `"YM2612 @ 7.670 MHz"`.
    pub chip_labels: Vec<String>,
    pub format_label: &'static str,
    /// 1-based track number within the current folder.
    pub track_index: u32,
    pub track_count: u32,
}

/// Display/UI collaborator; fire-and-forget.
pub trait NowPlayingSink {
    fn update(&mut self, info: &NowPlaying);
}

/// Which chip occupies which of the three bus slots.
///
/// Slot index doubles as the clock channel driving that socket; a dual
/// SN76489's second instance is fed from channel 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipSlots {
    slots: [Option<Chip>; 3],
}

impl ChipSlots {
    pub fn new(slots: [Option<Chip>; 3]) -> Self {
        ChipSlots { slots }
    }

    /// The classic Mega Drive pairing, which is also what the frame-driver
    /// containers assume: YM2612 in slot 0, SN76489 in slot 1.
    pub fn mega_drive() -> Self {
        ChipSlots {
            slots: [Some(Chip::Ym2612), Some(Chip::Sn76489), None],
        }
    }

    /// Slot index occupied by `chip`, if installed.
    pub fn slot_of(&self, chip: Chip) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(chip))
    }

    pub fn chip_at(&self, slot: usize) -> Option<Chip> {
        self.slots.get(slot).copied().flatten()
    }
}

impl Default for ChipSlots {
    fn default() -> Self {
        ChipSlots::mega_drive()
    }
}
