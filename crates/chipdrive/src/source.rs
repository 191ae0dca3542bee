//! Dual-mode byte source for the currently loaded track.
//!
//! Small files are loaded whole into a resident buffer. Files past the
//! resident ceiling are streamed through two fixed read-ahead pages: the
//! playback driver reads from the active page while a background worker
//! refills the inactive one. The two sides communicate only through a
//! bounded message channel, and the active-index flag is flipped by the
//! reader alone, at a page boundary, before the refill request for the
//! now-inactive page is issued — so a page is never written and read at
//! the same time.
//!
//! Header bytes (the first 256) are cached separately at open so container
//! parsing never disturbs the playback pages, and the metadata block is
//! fetched on demand into its own vector.
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::binutil::ParseError;
use crate::device::StorageRead;

/// Largest file loaded wholly into memory.
pub const DEFAULT_RESIDENT_CEILING: usize = 8 * 1024 * 1024;

/// Read-ahead page size for streamed mode.
pub const CACHE_PAGE_SIZE: usize = 128 * 1024;

/// Bytes of header cached at open for parsing.
const HEADER_CACHE_SIZE: usize = 256;

/// Outstanding refill requests the channel will hold. The active page's
/// remaining capacity bounds worst-case staleness, so a full channel is
/// benign and the newest request is simply dropped.
const REFILL_QUEUE_DEPTH: usize = 2;

/// Mode-selection and sizing knobs. Defaults match the target hardware;
/// tests shrink them to force streamed mode onto small inputs.
#[derive(Debug, Clone, Copy)]
pub struct SourceOptions {
    pub resident_ceiling: usize,
    pub page_size: usize,
}

impl Default for SourceOptions {
    fn default() -> Self {
        SourceOptions {
            resident_ceiling: DEFAULT_RESIDENT_CEILING,
            page_size: CACHE_PAGE_SIZE,
        }
    }
}

/// Diagnostic counters for the streamed mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub page_flips: u64,
    pub refills_queued: u64,
    pub refills_dropped: u64,
}

/// Byte-addressable view of the loaded track.
pub enum DataSource {
    Resident(ResidentSource),
    Streamed(StreamSource),
}

impl DataSource {
    /// Open `storage`, choosing resident or streamed mode by size.
    pub fn open(storage: Box<dyn StorageRead>, opts: &SourceOptions) -> io::Result<DataSource> {
        let mut storage = storage;
        let size = storage.size()?;
        if size as usize <= opts.resident_ceiling {
            let mut data = vec![0u8; size as usize];
            let got = storage.read_at(0, &mut data)?;
            data.truncate(got);
            Ok(DataSource::Resident(ResidentSource::new(data)))
        } else {
            Ok(DataSource::Streamed(StreamSource::open(
                storage,
                size,
                opts.page_size,
            )?))
        }
    }

    /// Wrap an in-memory payload (decompressed containers, tests).
    pub fn from_bytes(data: Vec<u8>) -> DataSource {
        DataSource::Resident(ResidentSource::new(data))
    }

    /// Force streamed mode regardless of size.
    pub fn open_streamed(
        storage: Box<dyn StorageRead>,
        opts: &SourceOptions,
    ) -> io::Result<DataSource> {
        let mut storage = storage;
        let size = storage.size()?;
        Ok(DataSource::Streamed(StreamSource::open(
            storage,
            size,
            opts.page_size,
        )?))
    }

    /// Total raw size of the underlying content in bytes.
    pub fn len(&self) -> u64 {
        match self {
            DataSource::Resident(s) => s.data.len() as u64,
            DataSource::Streamed(s) => s.size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, DataSource::Streamed(_))
    }

    /// Bound of the playable command data and the absolute loop restart
    /// offset, used by the streamed refill to wrap pages across the loop
    /// boundary. No-op in resident mode.
    pub fn set_stream_window(&mut self, data_end: u64, loop_start: Option<u64>) {
        if let DataSource::Streamed(s) = self {
            s.data_end = data_end.min(s.size);
            s.loop_start = loop_start;
        }
    }

    pub fn stats(&self) -> SourceStats {
        match self {
            DataSource::Resident(_) => SourceStats::default(),
            DataSource::Streamed(s) => s.stats,
        }
    }

    pub fn pos(&self) -> u64 {
        match self {
            DataSource::Resident(s) => s.pos,
            DataSource::Streamed(s) => s.pos(),
        }
    }

    pub fn set_pos(&mut self, pos: u64) {
        match self {
            DataSource::Resident(s) => s.pos = pos,
            DataSource::Streamed(s) => s.set_pos(pos),
        }
    }

    /// Sequential cursor read, auto-advancing.
    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        match self {
            DataSource::Resident(s) => {
                let b = s.byte_at(s.pos)?;
                s.pos += 1;
                Ok(b)
            }
            DataSource::Streamed(s) => s.read_next(),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let lo = self.read_u8()? as u16;
        let hi = self.read_u8()? as u16;
        Ok(lo | (hi << 8))
    }

    pub fn read_u24(&mut self) -> Result<u32, ParseError> {
        let b0 = self.read_u8()? as u32;
        let b1 = self.read_u8()? as u32;
        let b2 = self.read_u8()? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let b0 = self.read_u8()? as u32;
        let b1 = self.read_u8()? as u32;
        let b2 = self.read_u8()? as u32;
        let b3 = self.read_u8()? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24))
    }

    /// Absolute little-endian reads.
    pub fn read_u8_at(&mut self, off: u64) -> Result<u8, ParseError> {
        match self {
            DataSource::Resident(s) => s.byte_at(off),
            DataSource::Streamed(s) => s.byte_at(off),
        }
    }

    pub fn read_u16_at(&mut self, off: u64) -> Result<u16, ParseError> {
        let lo = self.read_u8_at(off)? as u16;
        let hi = self.read_u8_at(off + 1)? as u16;
        Ok(lo | (hi << 8))
    }

    pub fn read_u24_at(&mut self, off: u64) -> Result<u32, ParseError> {
        let b0 = self.read_u8_at(off)? as u32;
        let b1 = self.read_u8_at(off + 1)? as u32;
        let b2 = self.read_u8_at(off + 2)? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16))
    }

    pub fn read_u32_at(&mut self, off: u64) -> Result<u32, ParseError> {
        let b0 = self.read_u8_at(off)? as u32;
        let b1 = self.read_u8_at(off + 1)? as u32;
        let b2 = self.read_u8_at(off + 2)? as u32;
        let b3 = self.read_u8_at(off + 3)? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24))
    }

    /// Fetch an arbitrary block (metadata, sample tables) into its own
    /// vector without touching the playback pages.
    pub fn load_block(&mut self, off: u64, len: usize) -> Result<Vec<u8>, ParseError> {
        match self {
            DataSource::Resident(s) => {
                let end = (off as usize).saturating_add(len).min(s.data.len());
                if (off as usize) >= s.data.len() {
                    return Err(ParseError::OffsetOutOfRange {
                        offset: off as usize,
                        needed: len,
                        available: s.data.len(),
                        context: Some("load_block".into()),
                    });
                }
                Ok(s.data[off as usize..end].to_vec())
            }
            DataSource::Streamed(s) => {
                let want = len.min(s.size.saturating_sub(off) as usize);
                let mut buf = vec![0u8; want];
                let got = s
                    .storage
                    .read_at(off, &mut buf)
                    .map_err(io_to_parse("load_block"))?;
                buf.truncate(got);
                Ok(buf)
            }
        }
    }
}

/// Whole-track in-memory view.
pub struct ResidentSource {
    data: Vec<u8>,
    pos: u64,
}

impl ResidentSource {
    fn new(data: Vec<u8>) -> Self {
        ResidentSource { data, pos: 0 }
    }

    fn byte_at(&self, off: u64) -> Result<u8, ParseError> {
        self.data
            .get(off as usize)
            .copied()
            .ok_or(ParseError::OffsetOutOfRange {
                offset: off as usize,
                needed: 1,
                available: self.data.len(),
                context: None,
            })
    }
}

/// One read-ahead page. `len` is the number of valid bytes; a page ending
/// at end-of-data with no loop is short.
struct Page {
    base: u64,
    len: usize,
    data: Vec<u8>,
}

/// Refill order sent to the background worker. Carries everything the fill
/// needs so the worker holds no mutable configuration of its own, plus the
/// generation at issue time so requests stranded by a seek are discarded.
struct Refill {
    page: usize,
    base: u64,
    page_size: usize,
    data_end: u64,
    loop_start: Option<u64>,
    generation: u64,
}

/// Streamed view: two pages plus a storage handle.
pub struct StreamSource {
    storage: Box<dyn StorageRead>,
    size: u64,
    page_size: usize,
    pages: Arc<[Mutex<Page>; 2]>,
    active: usize,
    pos_in_page: usize,
    header: [u8; HEADER_CACHE_SIZE],
    data_end: u64,
    loop_start: Option<u64>,
    generation: Arc<AtomicU64>,
    stats: SourceStats,
    refill_tx: Option<Sender<Refill>>,
    worker: Option<JoinHandle<()>>,
}

impl StreamSource {
    fn open(mut storage: Box<dyn StorageRead>, size: u64, page_size: usize) -> io::Result<Self> {
        let mut header = [0u8; HEADER_CACHE_SIZE];
        let _ = storage.read_at(0, &mut header)?;

        // Pre-fill both pages before playback starts: page 0 from offset
        // 0, page 1 immediately following.
        let p0 = fill_page(storage.as_mut(), page_size, 0, size, None)?;
        let p1 = fill_page(storage.as_mut(), page_size, page_size as u64, size, None)?;
        let pages = Arc::new([Mutex::new(p0), Mutex::new(p1)]);

        let worker_storage = storage.try_clone()?;
        let generation = Arc::new(AtomicU64::new(0));
        let (tx, rx) = bounded::<Refill>(REFILL_QUEUE_DEPTH);
        let worker = std::thread::Builder::new()
            .name("cache-refill".into())
            .spawn({
                let pages = Arc::clone(&pages);
                let generation = Arc::clone(&generation);
                move || refill_worker(worker_storage, pages, generation, rx)
            })?;

        Ok(StreamSource {
            storage,
            size,
            page_size,
            pages,
            active: 0,
            pos_in_page: 0,
            header,
            data_end: size,
            loop_start: None,
            generation,
            stats: SourceStats::default(),
            refill_tx: Some(tx),
            worker: Some(worker),
        })
    }

    fn pos(&self) -> u64 {
        self.pages[self.active].lock().base + self.pos_in_page as u64
    }

    fn read_next(&mut self) -> Result<u8, ParseError> {
        let (byte, valid) = {
            let page = self.pages[self.active].lock();
            if self.pos_in_page < page.len {
                (page.data[self.pos_in_page], true)
            } else {
                (0, false)
            }
        };
        if !valid {
            return Err(ParseError::UnexpectedEof);
        }
        self.pos_in_page += 1;
        // Flip as soon as the page is consumed so the refill overlaps the
        // whole of the next page's read.
        if self.pos_in_page == self.page_size {
            self.flip();
        }
        Ok(byte)
    }

    /// Flip the active page and queue a refill for the page just consumed,
    /// two page-lengths ahead of its old base.
    fn flip(&mut self) {
        let consumed = self.active;
        let consumed_base = self.pages[consumed].lock().base;
        self.active ^= 1;
        self.pos_in_page = 0;
        self.stats.page_flips += 1;

        // The new active page must continue where the consumed one ended;
        // if a refill was dropped earlier, recover synchronously.
        let expected = consumed_base + self.page_size as u64;
        {
            let mut page = self.pages[self.active].lock();
            if page.base != expected {
                log::warn!(
                    "cache page {} stale (base 0x{:X}, expected 0x{:X}); refilling inline",
                    self.active,
                    page.base,
                    expected
                );
                if let Ok(p) = fill_page(
                    self.storage.as_mut(),
                    self.page_size,
                    expected,
                    self.data_end,
                    self.loop_start,
                ) {
                    *page = p;
                }
            }
        }

        let refill = Refill {
            page: consumed,
            base: consumed_base + 2 * self.page_size as u64,
            page_size: self.page_size,
            data_end: self.data_end,
            loop_start: self.loop_start,
            generation: self.generation.load(Ordering::Acquire),
        };
        if let Some(tx) = &self.refill_tx {
            match tx.try_send(refill) {
                Ok(()) => self.stats.refills_queued += 1,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    // Benign: the inline-recovery path above picks it up.
                    self.stats.refills_dropped += 1;
                    log::debug!("refill queue full; dropping request");
                }
            }
        }
    }

    fn set_pos(&mut self, pos: u64) {
        // Cheap path: the target is inside the active page.
        {
            let page = self.pages[self.active].lock();
            if pos >= page.base && pos < page.base + page.len as u64 {
                self.pos_in_page = (pos - page.base) as usize;
                return;
            }
        }

        // Seek outside the window (loop restart, new parse): invalidate
        // outstanding refills and re-prime both pages from the target.
        self.generation.fetch_add(1, Ordering::AcqRel);
        for (i, page) in self.pages.iter().enumerate() {
            let base = pos + (i * self.page_size) as u64;
            if let Ok(p) = fill_page(
                self.storage.as_mut(),
                self.page_size,
                base,
                self.data_end,
                self.loop_start,
            ) {
                *page.lock() = p;
            }
        }
        self.active = 0;
        self.pos_in_page = 0;
    }

    fn byte_at(&mut self, off: u64) -> Result<u8, ParseError> {
        // Header cache first: parsing never touches the playback pages.
        if (off as usize) < HEADER_CACHE_SIZE {
            return Ok(self.header[off as usize]);
        }
        for page in self.pages.iter() {
            let page = page.lock();
            if off >= page.base && off < page.base + page.len as u64 {
                return Ok(page.data[(off - page.base) as usize]);
            }
        }
        // Outside the window (PCM sample fetches): positioned read on the
        // reader's own handle.
        let mut b = [0u8; 1];
        let got = self
            .storage
            .read_at(off, &mut b)
            .map_err(io_to_parse("byte_at"))?;
        if got == 0 {
            return Err(ParseError::OffsetOutOfRange {
                offset: off as usize,
                needed: 1,
                available: self.size as usize,
                context: None,
            });
        }
        Ok(b[0])
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        // Quiesce the worker before the pages go away: closing the channel
        // ends its loop, joining guarantees no refill outlives this track.
        self.refill_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Fill one page starting at `base`, stopping at `data_end` and padding
/// any shortfall from `loop_start` so a page crossing the loop boundary
/// presents looped content without a visible discontinuity. Without a loop
/// offset the page is left short.
fn fill_page(
    storage: &mut dyn StorageRead,
    page_size: usize,
    base: u64,
    data_end: u64,
    loop_start: Option<u64>,
) -> io::Result<Page> {
    let mut data = vec![0u8; page_size];
    let mut len = 0usize;
    let mut src = base;

    while len < page_size {
        if src >= data_end {
            match loop_start {
                Some(ls) if ls < data_end => src = ls,
                _ => break,
            }
        }
        let want = (page_size - len).min((data_end - src) as usize);
        let got = storage.read_at(src, &mut data[len..len + want])?;
        if got == 0 {
            break;
        }
        len += got;
        src += got as u64;
    }

    Ok(Page { base, len, data })
}

/// Background task servicing refill requests until the channel closes.
fn refill_worker(
    mut storage: Box<dyn StorageRead>,
    pages: Arc<[Mutex<Page>; 2]>,
    generation: Arc<AtomicU64>,
    rx: Receiver<Refill>,
) {
    for req in rx.iter() {
        if req.generation != generation.load(Ordering::Acquire) {
            // A seek happened after this request was queued.
            continue;
        }
        match fill_page(
            storage.as_mut(),
            req.page_size,
            req.base,
            req.data_end,
            req.loop_start,
        ) {
            Ok(page) => {
                let mut slot = pages[req.page].lock();
                // Re-check under the lock so a refill racing a seek can
                // never clobber a freshly primed page.
                if req.generation == generation.load(Ordering::Acquire) {
                    *slot = page;
                }
            }
            Err(e) => log::warn!("cache refill read failed: {}", e),
        }
    }
}

fn io_to_parse(ctx: &'static str) -> impl Fn(io::Error) -> ParseError {
    move |e| ParseError::Other(format!("{}: {}", ctx, e))
}
