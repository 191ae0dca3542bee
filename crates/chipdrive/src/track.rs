//! Container identification and header extraction.
//!
//! Four magics are recognized at offset 0: `"Vgm "`, the gzip pair
//! `1F 8B` (a compressed VGM), `"XGM "` and `"XGM2"`. A parsed `Track` is
//! immutable once built and replaced wholesale on the next load; nothing
//! here mutates interpreter or cache state.
//!
//! Header decoding is deliberately defensive: a field read past the
//! available header is logged and treated as zero instead of failing the
//! load, because slightly truncated rips are common in the wild.
use std::fmt;
use std::io;

use crate::binutil::ParseError;
use crate::chip::Chip;
use crate::clock::{format_clock_label, normalize};
use crate::device::{ChipSlots, StorageRead};
use crate::inflate::{InflateError, gunzip_bounded};
use crate::meta::{TrackMeta, parse_meta};
use crate::source::{DataSource, SourceOptions};

/// Identified container family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Unknown,
    Vgm,
    Vgz,
    Xgm1,
    Xgm2,
}

impl Format {
    pub fn label(self) -> &'static str {
        match self {
            Format::Unknown => "--",
            Format::Vgm => "VGM",
            Format::Vgz => "VGZ",
            Format::Xgm1 => "XGM1",
            Format::Xgm2 => "XGM2",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a track failed to load. Every variant is local to the one load
/// attempt; the caller simply moves on to the next file.
#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    /// The first four bytes match no known container magic.
    UnknownMagic([u8; 4]),
    Inflate(InflateError),
    Parse(ParseError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "storage error: {}", e),
            LoadError::UnknownMagic(m) => write!(f, "unknown container magic: {:02X?}", m),
            LoadError::Inflate(e) => write!(f, "compressed container: {}", e),
            LoadError::Parse(e) => write!(f, "container parse: {}", e),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<InflateError> for LoadError {
    fn from(e: InflateError) -> Self {
        LoadError::Inflate(e)
    }
}

impl From<ParseError> for LoadError {
    fn from(e: ParseError) -> Self {
        LoadError::Parse(e)
    }
}

/// Everything extracted from a container header. Built on successful
/// parse; never partially mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub format: Format,
    /// VGM header version, or 1/2 for the XGM generations.
    pub version: u32,
    /// Absolute offset where the command stream starts (XGM2: FM stream).
    pub data_start: u64,
    /// Raw VGM loop-offset field; 0 means no loop. The absolute restart
    /// position is `loop_offset + 0x1C`.
    pub loop_offset: u32,
    /// Absolute offset of the metadata tag, 0 when absent.
    pub meta_offset: u64,
    /// Normalized clock per output channel.
    pub channel_clocks: [Option<u32>; 3],
    pub raw_size: u64,
    pub decompressed_size: Option<u64>,
    /// SN76489 flag byte bit 0 (v1.51+): tone writes go out raw.
    pub sn_freq0_is_0x400: bool,
    /// Region timing flag from the XGM headers.
    pub is_pal: bool,
    /// XGM sample-id tables: absolute address and byte length per id.
    pub sample_addr: Vec<u32>,
    pub sample_len: Vec<u32>,
    /// XGM sample block length.
    pub slen: u32,
    /// XGM1 music block length.
    pub mlen: u32,
    /// XGM2 sub-stream lengths and absolute starts.
    pub fm_len: u32,
    pub psg_len: u32,
    pub psg_start: u64,
    pub meta: TrackMeta,
}

impl Track {
    /// Formatted clock labels for the display collaborator, in channel
    /// order, skipping empty channels.
    pub fn clock_labels(&self, slots: &ChipSlots) -> Vec<String> {
        let mut out = Vec::new();
        for (ch, clock) in self.channel_clocks.iter().enumerate() {
            if let Some(hz) = clock {
                // Channel 2 carries a dual-chip second instance; label it
                // with the slot-1 chip when slot 2 is unpopulated.
                let chip = slots
                    .chip_at(ch)
                    .or_else(|| slots.chip_at(1))
                    .or_else(|| slots.chip_at(0));
                if let Some(chip) = chip {
                    out.push(format_clock_label(chip, *hz));
                }
            }
        }
        out
    }
}

const VGM_MAGIC: [u8; 4] = *b"Vgm ";
const XGM1_MAGIC: [u8; 4] = *b"XGM ";
const XGM2_MAGIC: [u8; 4] = *b"XGM2";

/// Open `storage`, identify the container and parse its header.
///
/// Returns the immutable `Track` together with the primed `DataSource`
/// (decompressed and resident for VGZ, resident or streamed otherwise).
/// `file_name` feeds the metadata placeholder when the container carries
/// no metadata block.
pub fn open_track(
    storage: Box<dyn StorageRead>,
    opts: &SourceOptions,
    slots: &ChipSlots,
    file_name: &str,
) -> Result<(Track, DataSource), LoadError> {
    let mut storage = storage;
    let size = storage.size()?;

    let mut magic = [0u8; 4];
    let got = storage.read_at(0, &mut magic)?;
    if got < 4 {
        return Err(LoadError::UnknownMagic(magic));
    }

    let (mut src, format, decompressed_size) = if magic[0] == 0x1F && magic[1] == 0x8B {
        // Compressed containers cannot be streamed; inflate into a
        // resident buffer, rejecting anything past the ceiling.
        let payload = gunzip_bounded(storage.as_mut(), size, opts.resident_ceiling, VGM_MAGIC)?;
        let dlen = payload.len() as u64;
        (DataSource::from_bytes(payload), Format::Vgz, Some(dlen))
    } else if magic == VGM_MAGIC {
        (DataSource::open(storage, opts)?, Format::Vgm, None)
    } else if magic == XGM1_MAGIC {
        (DataSource::open(storage, opts)?, Format::Xgm1, None)
    } else if magic == XGM2_MAGIC {
        (DataSource::open(storage, opts)?, Format::Xgm2, None)
    } else {
        return Err(LoadError::UnknownMagic(magic));
    };

    let mut track = match format {
        Format::Vgm | Format::Vgz => parse_vgm(&mut src, slots, file_name)?,
        Format::Xgm1 => parse_xgm1(&mut src, file_name)?,
        Format::Xgm2 => parse_xgm2(&mut src, file_name)?,
        Format::Unknown => unreachable!(),
    };
    track.format = format;
    track.raw_size = size;
    track.decompressed_size = decompressed_size;

    // Give the streamed cache its wrap window: command data ends at the
    // metadata block (or the file), and loops restart at the loop offset.
    let data_end = if track.meta_offset != 0 {
        track.meta_offset
    } else {
        src.len()
    };
    let loop_start = (track.loop_offset != 0).then(|| track.loop_offset as u64 + 0x1C);
    src.set_stream_window(data_end, loop_start);
    src.set_pos(track.data_start);

    Ok((track, src))
}

/// Header-field read that degrades to zero on out-of-range access.
fn u32_field(src: &mut DataSource, off: u64) -> u32 {
    src.read_u32_at(off).unwrap_or_else(|e| {
        log::warn!("header field at 0x{:X} unreadable ({}); using 0", off, e);
        0
    })
}

fn u16_field(src: &mut DataSource, off: u64) -> u16 {
    src.read_u16_at(off).unwrap_or_else(|e| {
        log::warn!("header field at 0x{:X} unreadable ({}); using 0", off, e);
        0
    })
}

fn u8_field(src: &mut DataSource, off: u64) -> u8 {
    src.read_u8_at(off).unwrap_or_else(|e| {
        log::warn!("header field at 0x{:X} unreadable ({}); using 0", off, e);
        0
    })
}

fn parse_vgm(
    src: &mut DataSource,
    slots: &ChipSlots,
    file_name: &str,
) -> Result<Track, LoadError> {
    let mut t = Track::default();

    t.version = u32_field(src, 0x08);
    t.loop_offset = u32_field(src, 0x1C);

    let gd3_field = u32_field(src, 0x14);
    t.meta_offset = if gd3_field != 0 {
        gd3_field as u64 + 0x14
    } else {
        0
    };

    t.data_start = if t.version >= 0x150 {
        match u32_field(src, 0x34) {
            0 => 0x40,
            rel => rel as u64 + 0x34,
        }
    } else {
        0x40
    };

    // Only read extended fields the header actually reaches; the newest
    // revision's field table is authoritative and older layouts simply
    // fall off the end.
    let data_start = t.data_start;
    let version = t.version;
    let reaches = |off: u64, sz: u64| version >= 0x151 && data_start >= off + sz;

    let sn_clock = u32_field(src, 0x0C);
    if sn_clock != 0 {
        if let Some(slot) = slots.slot_of(Chip::Sn76489) {
            t.channel_clocks[slot] = Some(normalize(sn_clock, Chip::Sn76489));
        }

        // Dual-chip marker: the second instance drives clock channel 2.
        // From v1.70 its clock lives in the extension header.
        if sn_clock & (1 << 30) != 0 {
            if t.version < 0x170 {
                t.channel_clocks[2] = Some(normalize(sn_clock, Chip::Sn76489));
            } else {
                let extra_off = u32_field(src, 0xBC);
                if extra_off != 0 {
                    let base = 0xBC + extra_off as u64;
                    let clock_list_off = u32_field(src, base + 4);
                    if clock_list_off != 0 {
                        let list = base + clock_list_off as u64;
                        let _count = u8_field(src, list);
                        let chip_id = u8_field(src, list + 1);
                        let clock = u32_field(src, list + 2);
                        match chip_id {
                            0 => {
                                t.channel_clocks[1] = Some(normalize(sn_clock, Chip::Sn76489));
                                t.channel_clocks[2] = Some(normalize(clock, Chip::Sn76489));
                            }
                            1 => t.channel_clocks[2] = Some(normalize(clock, Chip::Sn76489)),
                            _ => {}
                        }
                    }
                }
            }
        }

        if t.version >= 0x151 {
            t.sn_freq0_is_0x400 = u8_field(src, 0x2B) & 0x01 != 0;
        }
    }

    let ym2413_clock = u32_field(src, 0x10);
    if ym2413_clock != 0
        && let Some(slot) = slots.slot_of(Chip::Ym2413)
    {
        t.channel_clocks[slot] = Some(normalize(ym2413_clock, Chip::Ym2413));
    }

    let ym2612_clock = u32_field(src, 0x2C);
    if ym2612_clock != 0
        && let Some(slot) = slots.slot_of(Chip::Ym2612)
    {
        t.channel_clocks[slot] = Some(normalize(ym2612_clock, Chip::Ym2612));
    }

    let ym2151_clock = u32_field(src, 0x30);
    if ym2151_clock != 0
        && let Some(slot) = slots.slot_of(Chip::Ym2151)
    {
        t.channel_clocks[slot] = Some(normalize(ym2151_clock, Chip::Ym2151));
    }

    let ay8910_clock = if reaches(0x74, 4) {
        u32_field(src, 0x74)
    } else {
        0
    };
    if ay8910_clock != 0 {
        if let Some(slot) = slots.slot_of(Chip::Ay8910) {
            t.channel_clocks[slot] = Some(normalize(ay8910_clock, Chip::Ay8910));
        }
        // An AY log plays on the SSG section of an installed YM2203.
        if let Some(slot) = slots.slot_of(Chip::Ym2203) {
            t.channel_clocks[slot] = Some(normalize(ay8910_clock, Chip::Ay8910));
        }
    }

    let ym2203_clock = if reaches(0x44, 4) {
        u32_field(src, 0x44)
    } else {
        0
    };
    if ym2203_clock != 0 {
        if ym2203_clock & 0x4000_0000 != 0 {
            if let Some(slot) = slots.slot_of(Chip::Ym2203) {
                t.channel_clocks[slot] = Some(normalize(ym2203_clock, Chip::Ym2203));
            }
            if let Some(slot) = slots.slot_of(Chip::Ym2203B) {
                t.channel_clocks[slot] = Some(normalize(ym2203_clock, Chip::Ym2203B));
            }
        } else if let Some(slot) = slots.slot_of(Chip::Ym2203) {
            t.channel_clocks[slot] = Some(normalize(ym2203_clock, Chip::Ym2203));
        } else if let Some(slot) = slots.slot_of(Chip::Ym2612) {
            // Substitution: drive the wider OPN2 at double rate.
            t.channel_clocks[slot] = Some(normalize(ym2203_clock, Chip::Ym2612));
        } else if let Some(slot) = slots.slot_of(Chip::Ym2610) {
            t.channel_clocks[slot] = Some(normalize(ym2203_clock, Chip::Ym2610));
        }
    }

    let ym3812_clock = if reaches(0x50, 4) {
        u32_field(src, 0x50)
    } else {
        0
    };
    if ym3812_clock != 0 {
        if let Some(slot) = slots.slot_of(Chip::Ym3812) {
            t.channel_clocks[slot] = Some(normalize(ym3812_clock, Chip::Ym3812));
        } else if let Some(slot) = slots.slot_of(Chip::Ymf262) {
            t.channel_clocks[slot] = Some(normalize(ym3812_clock, Chip::Ym3812));
        }
    }

    let ymf262_clock = if reaches(0x5C, 4) {
        u32_field(src, 0x5C)
    } else {
        0
    };
    if ymf262_clock != 0
        && let Some(slot) = slots.slot_of(Chip::Ymf262)
    {
        t.channel_clocks[slot] = Some(normalize(ymf262_clock, Chip::Ymf262));
    }

    t.meta = read_meta_block(src, t.meta_offset, file_name);
    Ok(t)
}

fn parse_xgm1(src: &mut DataSource, file_name: &str) -> Result<Track, LoadError> {
    let mut t = Track {
        version: 1,
        ..Track::default()
    };

    // Sample id table: 63 entries of (address/256, length/256), ids 1..=63;
    // id 0 is the stop sentinel.
    t.sample_addr.push(0);
    t.sample_len.push(0);
    for i in 0..63u64 {
        let addr = u16_field(src, 0x04 + i * 4) as u32;
        let len = u16_field(src, 0x06 + i * 4) as u32;
        t.sample_addr.push(addr * 256 + 0x104);
        t.sample_len.push(len * 256);
    }

    t.slen = (u16_field(src, 0x100) as u32) << 8;

    let flags = u8_field(src, 0x103);
    t.is_pal = flags & 0b01 != 0;
    let has_meta = flags & 0b10 != 0;

    t.mlen = u32_field(src, 0x104 + t.slen as u64);
    t.data_start = 0x108 + t.slen as u64;
    t.meta_offset = if has_meta {
        t.data_start + t.mlen as u64
    } else {
        0
    };

    t.channel_clocks = xgm_clocks();
    t.meta = read_meta_block(src, t.meta_offset, file_name);
    Ok(t)
}

fn parse_xgm2(src: &mut DataSource, file_name: &str) -> Result<Track, LoadError> {
    let mut t = Track {
        version: 2,
        ..Track::default()
    };

    let flags = u8_field(src, 0x05);
    t.is_pal = flags & 0b001 == 0;
    let has_meta = flags & 0b100 != 0;

    t.slen = (u16_field(src, 0x06) as u32) << 8;
    t.fm_len = (u16_field(src, 0x08) as u32) << 8;
    t.psg_len = (u16_field(src, 0x0A) as u32) << 8;

    // Sample id table: 124 entries; 0xFFFF marks an absent id. Lengths are
    // derived from the address deltas and clamped to the sample block.
    t.sample_addr.push(0);
    for i in 0..124u64 {
        let value = u16_field(src, 0x0C + i * 2);
        if value == 0xFFFF {
            t.sample_addr.push(0);
        } else {
            t.sample_addr.push(value as u32 * 256 + 0x104);
        }
    }
    t.sample_len.push(0);
    for i in 1..124usize {
        let addr = t.sample_addr[i];
        if addr == 0 {
            t.sample_len.push(0);
            continue;
        }
        let next = t.sample_addr[i + 1];
        let mut len = next.wrapping_sub(addr);
        if len > t.slen.wrapping_sub(0x104) {
            len = (t.slen + 0x104).saturating_sub(addr);
        }
        t.sample_len.push(len);
    }

    t.data_start = 0x104 + t.slen as u64;
    t.psg_start = t.data_start + t.fm_len as u64;
    t.meta_offset = if has_meta {
        t.psg_start + t.psg_len as u64
    } else {
        0
    };

    t.channel_clocks = xgm_clocks();
    t.meta = read_meta_block(src, t.meta_offset, file_name);
    Ok(t)
}

/// Both frame-driver generations target the fixed Mega Drive pairing.
fn xgm_clocks() -> [Option<u32>; 3] {
    [
        Some(normalize(7_670_453, Chip::Ym2612)),
        Some(normalize(3_579_545, Chip::Sn76489)),
        None,
    ]
}

/// Load and decode the metadata block at `offset`, falling back to the
/// filename placeholder when it is absent or unreadable.
fn read_meta_block(src: &mut DataSource, offset: u64, file_name: &str) -> TrackMeta {
    if offset == 0 {
        return TrackMeta::placeholder(file_name);
    }
    let declared = u32_field(src, offset + 8) as usize;
    match src.load_block(offset, 12 + declared) {
        Ok(block) => match parse_meta(&block) {
            Ok(meta) => meta,
            Err(e) => {
                log::warn!("metadata block at 0x{:X} invalid: {}", offset, e);
                TrackMeta::placeholder(file_name)
            }
        },
        Err(e) => {
            log::warn!("metadata block at 0x{:X} unreadable: {}", offset, e);
            TrackMeta::placeholder(file_name)
        }
    }
}
