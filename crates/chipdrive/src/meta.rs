//! Track metadata block parsing.
//!
//! Both container families embed the same metadata layout: a `"Gd3 "` tag,
//! a 12-byte sub-header (tag + version + payload length) and a sequence of
//! UTF-16LE nul-terminated strings in fixed order — track, game, system and
//! author names in two languages, the release date, and one free-form
//! creator field that is consumed and discarded. Absent fields fall back to
//! their other-language counterpart; a missing or invalid block falls back
//! to a filename-derived placeholder.
use crate::binutil::{ParseError, read_slice, read_u16_le_at, read_u32_le_at};

/// Decoded metadata. Fields are plain strings with the language fallback
/// already applied; an empty string means the rip carried nothing at all
/// for that field in either language.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMeta {
    pub track_en: String,
    pub track_jp: String,
    pub game_en: String,
    pub game_jp: String,
    pub system_en: String,
    pub system_jp: String,
    pub author_en: String,
    pub author_jp: String,
    pub date: String,
}

impl TrackMeta {
    /// Placeholder used when a container carries no metadata block: the
    /// filename stands in for the track title.
    pub fn placeholder(file_name: &str) -> Self {
        TrackMeta {
            track_en: file_name.to_string(),
            track_jp: file_name.to_string(),
            game_en: "(no GD3 info)".to_string(),
            game_jp: "(no GD3 info)".to_string(),
            ..TrackMeta::default()
        }
    }
}

/// Parse a metadata block starting at the `"Gd3 "` tag.
pub(crate) fn parse_meta(bytes: &[u8]) -> Result<TrackMeta, ParseError> {
    // tag(4) + version(4) + length(4)
    if bytes.len() < 12 {
        return Err(ParseError::HeaderTooShort("gd3".into()));
    }

    let ident = read_slice(bytes, 0, 4)?;
    if ident != b"Gd3 " {
        let mut id: [u8; 4] = [0; 4];
        id.copy_from_slice(ident);
        return Err(ParseError::InvalidIdent(id));
    }

    let _version = read_u32_le_at(bytes, 4)?;
    let data_len = (read_u32_le_at(bytes, 8)? as usize).min(bytes.len().saturating_sub(12));
    let data = read_slice(bytes, 12, data_len)?;

    // Ten nul-terminated fields; a truncated stream yields empty strings
    // for the current and remaining fields rather than an error, since
    // real-world rips are routinely clipped.
    let mut fields: Vec<String> = Vec::with_capacity(10);
    let mut i = 0usize;
    for _ in 0..10 {
        let mut codes: Vec<u16> = Vec::new();
        let mut truncated = false;
        loop {
            if i + 1 >= data.len() {
                truncated = true;
                break;
            }
            let code = read_u16_le_at(data, i)?;
            i += 2;
            if code == 0 {
                break;
            }
            codes.push(code);
        }
        if truncated {
            break;
        }
        fields.push(String::from_utf16_lossy(&codes));
    }
    fields.resize(10, String::new());

    let mut meta = TrackMeta {
        track_en: fields[0].clone(),
        track_jp: fields[1].clone(),
        game_en: fields[2].clone(),
        game_jp: fields[3].clone(),
        system_en: fields[4].clone(),
        system_jp: fields[5].clone(),
        author_en: fields[6].clone(),
        author_jp: fields[7].clone(),
        date: fields[8].clone(),
        // fields[9] is the free-form creator field, discarded.
    };
    apply_language_fallback(&mut meta);
    Ok(meta)
}

/// Fallible conversion from a raw metadata block starting at the
/// `"Gd3 "` tag.
impl std::convert::TryFrom<&[u8]> for TrackMeta {
    type Error = ParseError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        parse_meta(bytes)
    }
}

fn apply_language_fallback(meta: &mut TrackMeta) {
    fn fill(a: &mut String, b: &mut String) {
        if a.is_empty() && !b.is_empty() {
            *a = b.clone();
        } else if b.is_empty() && !a.is_empty() {
            *b = a.clone();
        }
    }
    fill(&mut meta.track_jp, &mut meta.track_en);
    fill(&mut meta.game_jp, &mut meta.game_en);
    fill(&mut meta.system_jp, &mut meta.system_en);
    fill(&mut meta.author_jp, &mut meta.author_en);
}
