//! Bounded gzip-member decompression for compressed containers.
//!
//! A `.vgz` file is a single gzip member wrapping a VGM payload. The
//! pipeline validates the member header itself, pre-checks the
//! footer-declared uncompressed size against the destination ceiling, then
//! inflates incrementally over bounded input chunks, re-checking the output
//! bound as it goes — the footer value is untrusted input. Success requires
//! the decompressor to reach stream end and the output to start with the
//! inner container's magic.
use std::fmt;
use std::io;

use flate2::{Decompress, FlushDecompress, Status};

use crate::device::StorageRead;

/// Storage chunk size fed to the decompressor per round.
const INPUT_CHUNK: usize = 16 * 1024;

/// gzip member flags (RFC 1952). FTEXT (bit 0) is a hint only.
const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;

#[derive(Debug)]
pub enum InflateError {
    /// Input too short to hold a gzip member at all.
    TooShort,
    /// First two bytes are not the gzip magic.
    BadMagic([u8; 2]),
    /// Compression method other than deflate.
    BadMethod(u8),
    /// Footer-declared uncompressed size already exceeds the ceiling.
    DeclaredSizeExceeded { declared: u32, ceiling: usize },
    /// Decompressed output hit the ceiling before stream end.
    SizeExceeded { ceiling: usize },
    /// The decompressor reported an error or stopped in a state other
    /// than stream end.
    Corrupt(String),
    /// Decompression succeeded but the payload does not start with the
    /// expected container magic.
    ContentMismatch { found: [u8; 4] },
    Io(io::Error),
}

impl fmt::Display for InflateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InflateError::TooShort => write!(f, "gzip member too short"),
            InflateError::BadMagic(m) => {
                write!(f, "bad gzip magic: {:02X} {:02X}", m[0], m[1])
            }
            InflateError::BadMethod(m) => write!(f, "unsupported gzip method: {}", m),
            InflateError::DeclaredSizeExceeded { declared, ceiling } => write!(
                f,
                "declared uncompressed size {} exceeds ceiling {}",
                declared, ceiling
            ),
            InflateError::SizeExceeded { ceiling } => {
                write!(f, "decompressed output exceeds ceiling {}", ceiling)
            }
            InflateError::Corrupt(s) => write!(f, "corrupt deflate stream: {}", s),
            InflateError::ContentMismatch { found } => {
                write!(f, "decompressed payload has unexpected magic: {:?}", found)
            }
            InflateError::Io(e) => write!(f, "storage read failed: {}", e),
        }
    }
}

impl std::error::Error for InflateError {}

impl From<io::Error> for InflateError {
    fn from(e: io::Error) -> Self {
        InflateError::Io(e)
    }
}

/// Decompress the gzip member in `storage` (length `len`) into a new
/// buffer of at most `ceiling` bytes, requiring the payload to start with
/// `inner_magic`.
pub fn gunzip_bounded(
    storage: &mut dyn StorageRead,
    len: u64,
    ceiling: usize,
    inner_magic: [u8; 4],
) -> Result<Vec<u8>, InflateError> {
    // 10-byte member header + 8-byte footer is the bare minimum.
    if len < 18 {
        return Err(InflateError::TooShort);
    }

    // Footer pre-check: ISIZE is the uncompressed size mod 2^32. It cannot
    // be trusted, but a value already past the ceiling lets us bail before
    // inflating anything.
    let mut footer = [0u8; 4];
    read_exact_at(storage, len - 4, &mut footer)?;
    let declared = u32::from_le_bytes(footer);
    if declared as usize > ceiling {
        return Err(InflateError::DeclaredSizeExceeded { declared, ceiling });
    }

    let data_start = parse_member_header(storage, len)?;

    // One extra byte of capacity so overflow is observable the moment it
    // happens rather than being silently clipped.
    let mut out: Vec<u8> = Vec::with_capacity(ceiling + 1);
    let mut dec = Decompress::new(false);
    let mut chunk = vec![0u8; INPUT_CHUNK];
    let mut pos = data_start;
    let mut finished = false;

    'outer: while pos < len {
        let want = chunk.len().min((len - pos) as usize);
        let got = storage.read_at(pos, &mut chunk[..want])?;
        if got == 0 {
            break;
        }
        pos += got as u64;

        let mut consumed = 0usize;
        while consumed < got {
            if out.len() > ceiling {
                return Err(InflateError::SizeExceeded { ceiling });
            }
            let before_in = dec.total_in();
            let before_out = dec.total_out();
            let status = dec
                .decompress_vec(&chunk[consumed..got], &mut out, FlushDecompress::None)
                .map_err(|e| InflateError::Corrupt(e.to_string()))?;
            consumed += (dec.total_in() - before_in) as usize;

            match status {
                Status::StreamEnd => {
                    finished = true;
                    break 'outer;
                }
                Status::Ok => {
                    // No progress in either direction means the next input
                    // chunk is needed.
                    if dec.total_in() == before_in && dec.total_out() == before_out {
                        break;
                    }
                }
                Status::BufError => {
                    if out.len() > ceiling {
                        return Err(InflateError::SizeExceeded { ceiling });
                    }
                    // Otherwise the decompressor wants the next input chunk.
                    break;
                }
            }
        }
    }

    if out.len() > ceiling {
        return Err(InflateError::SizeExceeded { ceiling });
    }
    if !finished {
        return Err(InflateError::Corrupt("missing stream end".into()));
    }

    if out.len() < 4 || out[0..4] != inner_magic {
        let mut found = [0u8; 4];
        for (i, b) in out.iter().take(4).enumerate() {
            found[i] = *b;
        }
        return Err(InflateError::ContentMismatch { found });
    }

    Ok(out)
}

/// Validate the fixed member header and walk the flag-dependent optional
/// fields; returns the offset of the deflate payload.
fn parse_member_header(storage: &mut dyn StorageRead, len: u64) -> Result<u64, InflateError> {
    let mut head = [0u8; 10];
    read_exact_at(storage, 0, &mut head)?;

    if head[0] != 0x1F || head[1] != 0x8B {
        return Err(InflateError::BadMagic([head[0], head[1]]));
    }
    if head[2] != 8 {
        return Err(InflateError::BadMethod(head[2]));
    }
    let flags = head[3];
    // head[4..8] mtime, head[8] xfl, head[9] os — carried but unused.

    let mut pos: u64 = 10;

    if flags & FEXTRA != 0 {
        let mut xlen = [0u8; 2];
        read_exact_at(storage, pos, &mut xlen)?;
        pos += 2 + u16::from_le_bytes(xlen) as u64;
    }
    if flags & FNAME != 0 {
        pos = skip_cstring(storage, pos, len)?;
    }
    if flags & FCOMMENT != 0 {
        pos = skip_cstring(storage, pos, len)?;
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }

    if pos + 8 > len {
        return Err(InflateError::TooShort);
    }
    Ok(pos)
}

/// Skip a zero-terminated field, scanning in bounded chunks.
fn skip_cstring(storage: &mut dyn StorageRead, mut pos: u64, len: u64) -> Result<u64, InflateError> {
    let mut buf = [0u8; 256];
    while pos < len {
        let want = buf.len().min((len - pos) as usize);
        let got = storage.read_at(pos, &mut buf[..want])?;
        if got == 0 {
            break;
        }
        if let Some(i) = buf[..got].iter().position(|b| *b == 0) {
            return Ok(pos + i as u64 + 1);
        }
        pos += got as u64;
    }
    Err(InflateError::TooShort)
}

fn read_exact_at(
    storage: &mut dyn StorageRead,
    offset: u64,
    buf: &mut [u8],
) -> Result<(), InflateError> {
    let got = storage.read_at(offset, buf)?;
    if got < buf.len() {
        return Err(InflateError::TooShort);
    }
    Ok(())
}
