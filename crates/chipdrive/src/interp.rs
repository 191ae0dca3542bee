//! Command-stream interpreters.
//!
//! One interpreter per container family, behind a single trait so the
//! playback loop never branches on format: the concrete machine is picked
//! once at load time from the parsed format tag.
//!
//! All three share the same stepping contract: `step` consumes exactly one
//! command's worth of bytes, advances the relevant time counter, and
//! reports whether end-of-track was reached. Unknown opcodes are logged
//! and skipped without advancing time; a truncated stream ends the track.
use crate::device::{Attenuator, ChipBus, ChipSlots};
use crate::player::{LoopFade, Pacer};
use crate::source::DataSource;
use crate::track::Track;

pub mod vgm;
pub mod xgm;
pub mod xgm2;

pub use vgm::VgmInterp;
pub use xgm::Xgm1Interp;
pub use xgm2::Xgm2Interp;

/// Everything a step touches, borrowed for the duration of one call.
pub struct PlaybackCx<'a> {
    pub src: &'a mut DataSource,
    pub track: &'a Track,
    pub slots: &'a ChipSlots,
    pub bus: &'a mut dyn ChipBus,
    pub att: &'a mut dyn Attenuator,
    pub loops: &'a mut LoopFade,
}

/// Outcome of consuming one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Ran,
    EndOfTrack,
}

/// Outcome of one scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    Running,
    EndOfTrack,
}

/// A format family's command-stream state machine.
pub trait Interpreter {
    /// Consume exactly one command.
    fn step(&mut self, cx: &mut PlaybackCx) -> StepResult;

    /// One scheduling cycle: catch the command stream up to the pacing
    /// target, then wait out the wall-clock deadline (delivering PCM on
    /// the way for the frame-driver families).
    fn run_cycle(&mut self, cx: &mut PlaybackCx, pacer: &Pacer) -> CycleResult;

    /// Interpreter time in the 44 100 Hz sample domain.
    fn elapsed_samples(&self) -> u64;
}

/// Clock assigned to an output channel, with the tone-generator default
/// for channels a malformed header left unset.
pub(crate) fn channel_clock(track: &Track, channel: usize) -> u32 {
    track
        .channel_clocks
        .get(channel)
        .copied()
        .flatten()
        .unwrap_or(crate::clock::HZ_3579)
}

/// Cursor read that treats a truncated stream as end-of-track.
pub(crate) fn next8(src: &mut DataSource) -> Option<u8> {
    match src.read_u8() {
        Ok(b) => Some(b),
        Err(e) => {
            log::warn!("command stream truncated: {}", e);
            None
        }
    }
}
