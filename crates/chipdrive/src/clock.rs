//! Clock normalization.
//!
//! Container headers record whatever oscillator frequency the source
//! machine used; the programmable clock generator on the player board can
//! only produce a fixed set of frequencies. `normalize` quantizes a raw
//! header clock to the nearest frequency the attached chip can actually be
//! driven at. This is a deliberately lossy mapping, never an error: values
//! outside the known table resolve to the chip's default.
//!
//! The tables also carry two kinds of historical baggage on purpose:
//!
//! - legacy numeric aliases — several raw constants that rips have used
//!   over the years for the same physical clock, including values with the
//!   dual-chip marker bit (bit 30) already folded in;
//! - substitution entries — a wider chip standing in for a narrower one at
//!   a scaled clock (YM2612/YM2610 driven at twice a recorded YM2203
//!   clock, AY8910 logs played on a YM2203's SSG section at double rate).
use crate::chip::Chip;

/// Frequencies the clock generator can produce, in Hz.
pub const HZ_1500: u32 = 1_500_000;
pub const HZ_1536: u32 = 1_536_000;
pub const HZ_1789: u32 = 1_789_772;
pub const HZ_2000: u32 = 2_000_000;
pub const HZ_2578: u32 = 2_578_000;
pub const HZ_3000: u32 = 3_000_000;
pub const HZ_3072: u32 = 3_072_000;
pub const HZ_3375: u32 = 3_375_000;
pub const HZ_3500: u32 = 3_500_000;
pub const HZ_3579: u32 = 3_579_545;
pub const HZ_4000: u32 = 4_000_000;
pub const HZ_4500: u32 = 4_500_000;
pub const HZ_6000: u32 = 6_000_000;
pub const HZ_7159: u32 = 7_159_090;
pub const HZ_7670: u32 = 7_670_453;
pub const HZ_7987: u32 = 7_987_000;
pub const HZ_8000: u32 = 8_000_000;
pub const HZ_14318: u32 = 14_318_180;

/// Dual-chip marker bit as it appears pre-folded in legacy clock values.
const DUAL: u32 = 0x4000_0000;

/// Quantize a raw header clock to the nearest generatable frequency for
/// `chip`. Pure function over static tables; unknown values yield the
/// chip's documented default.
pub fn normalize(raw: u32, chip: Chip) -> u32 {
    match chip {
        Chip::Ay8910 => match raw {
            1_500_000 => HZ_3000,
            1_536_000 => HZ_3072,
            // NTSC colorburst /2 in all the spellings rips use
            1_789_750 | 1_789_772 | 1_789_773 | 1_789_775 => HZ_3579,
            2_000_000 => HZ_4000,
            _ => HZ_4000,
        },
        Chip::Ym2413 => match raw {
            2_000_000 => HZ_2000,
            3_579_000..=3_580_000 => HZ_3579,
            4_000_000 => HZ_4000,
            _ => HZ_3579,
        },
        Chip::Ym2203 | Chip::Ym2203B => match raw {
            1_500_000 | 1_076_741_824 | 1_075_241_824 => HZ_1500,
            3_000_000 => HZ_3000,
            3_072_000 => HZ_3072,
            3_579_000..=3_580_000 => HZ_3579,
            3_993_600 => HZ_4000,
            4_000_000 | 1_077_741_824 => HZ_4000,
            4_500_000 => HZ_4500,
            _ => HZ_3579,
        },
        Chip::Ym2151 => match raw {
            3_375_000 => HZ_3375,
            3_500_000 => HZ_3500,
            3_579_000..=3_580_000 => HZ_3579,
            4_000_000 => HZ_4000,
            _ => HZ_3579,
        },
        Chip::Ym2608 => match raw {
            7_987_000 => HZ_7987,
            8_000_000 => HZ_8000,
            _ => HZ_8000,
        },
        // YM2612 entries at YM2203 clocks run the chip at double rate so it
        // can substitute for the narrower part.
        Chip::Ym2612 => match raw {
            8_000_000 | 0x807a_1200 => HZ_8000,
            7_670_453 => HZ_7670,
            1_500_000 => HZ_3000,
            3_000_000 => HZ_6000,
            3_579_000..=3_580_000 => HZ_7159,
            3_993_600 => HZ_8000,
            4_000_000 | 1_077_741_824 => HZ_8000,
            _ => HZ_7670,
        },
        Chip::Ym2610 => match raw {
            8_000_000 | 0x807a_1200 => HZ_8000,
            7_670_453 => HZ_7670,
            1_500_000 => HZ_3000,
            3_000_000 => HZ_6000,
            3_579_580 | 3_579_545 => HZ_7159,
            3_993_600 => HZ_8000,
            4_000_000 | 1_077_741_824 => HZ_8000,
            _ => HZ_7670,
        },
        Chip::Sn76489 | Chip::Sn76489B => match raw {
            1_536_000 => HZ_1536,
            1_789_772 => HZ_1789,
            v if v == DUAL + 1_789_772 => HZ_1789,
            3_579_580 | 3_579_545 => HZ_3579,
            v if v == DUAL + 3_579_580 || v == DUAL + 3_579_545 => HZ_3579,
            4_000_000 => HZ_4000,
            v if v == DUAL + 4_000_000 => HZ_4000,
            2_578_000 => HZ_2578,
            2_000_000 => HZ_2000,
            v if v == DUAL + 2_000_000 => HZ_2000,
            _ => HZ_3579,
        },
        Chip::Ym3812 => match raw {
            3_500_000 => HZ_3500,
            3_000_000 => HZ_3000,
            4_000_000 => HZ_4000,
            v if v == DUAL + 4_000_000 => HZ_4000,
            1_789_772 => HZ_1789,
            v if v == DUAL + 1_789_772 => HZ_1789,
            3_579_580 | 3_579_545 => HZ_3579,
            v if v == DUAL + 3_579_580 || v == DUAL + 3_579_545 => HZ_3579,
            2_578_000 => HZ_2578,
            2_000_000 => HZ_2000,
            v if v == DUAL + 2_000_000 => HZ_2000,
            _ => HZ_3579,
        },
        Chip::Ymf262 => match raw {
            0x00da_7a64 => HZ_14318,
            _ => HZ_14318,
        },
    }
}

/// Format the display label for a chip running at `hz`, in the fixed
/// `"YM2612 @ 7.670 MHz"` shape the display collaborator expects.
pub fn format_clock_label(chip: Chip, hz: u32) -> String {
    let mut mhz = format!("{:.4}", hz as f64 / 1_000_000.0);
    mhz.truncate(5);
    format!("{} @ {} MHz", chip.label(), mhz)
}
