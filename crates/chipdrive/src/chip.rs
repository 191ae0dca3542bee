//! Sound chip identities the player can drive.
//!
//! The variants mirror the physical socket options of the target hardware:
//! dual-socket chips (SN76489, YM2203) get one variant per physical
//! instance because each instance occupies its own bus slot and clock
//! channel.
use std::fmt;

/// A sound chip (or one physical instance of a dual-fit chip).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    Sn76489,
    Sn76489B,
    Ym2413,
    Ym2612,
    Ym2151,
    Ym2203,
    Ym2203B,
    Ym2608,
    Ym2610,
    Ym3812,
    Ay8910,
    Ymf262,
}

impl Chip {
    /// Display label; both instances of a dual-fit chip share one label.
    pub fn label(self) -> &'static str {
        match self {
            Chip::Sn76489 | Chip::Sn76489B => "SN76489",
            Chip::Ym2413 => "YM2413",
            Chip::Ym2612 => "YM2612",
            Chip::Ym2151 => "YM2151",
            Chip::Ym2203 | Chip::Ym2203B => "YM2203",
            Chip::Ym2608 => "YM2608",
            Chip::Ym2610 => "YM2610",
            Chip::Ym3812 => "YM3812",
            Chip::Ay8910 => "AY8910",
            Chip::Ymf262 => "YMF262",
        }
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
