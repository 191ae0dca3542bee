//! Recorded-register-stream interpreter (VGM).
//!
//! Single-byte opcode dispatch driven by a 44 100 Hz sample counter.
//! Register-write opcodes carry the chip and port in the opcode itself and
//! are routed through the slot table; wait opcodes advance the sample
//! counter; the 0x66 marker either ends the track or loops it, feeding the
//! loop/fade controller.
use crate::chip::Chip;
use crate::interp::{CycleResult, Interpreter, PlaybackCx, StepResult, channel_clock, next8};
use crate::player::Pacer;

pub struct VgmInterp {
    samples: u64,
    real_samples: u64,
    /// PCM read cursor for the 0x80-0x8F write-and-wait opcodes.
    pcm_pos: u64,
    /// Start of the first data block's payload; 0xE0 seeks relative to it.
    /// Defaults to 0x47, where the block payload lands in classic rips.
    pcm_bank: u64,
    seen_bank: bool,
}

impl VgmInterp {
    pub fn new() -> Self {
        VgmInterp {
            samples: 0,
            real_samples: 0,
            pcm_pos: 0,
            pcm_bank: 0x47,
            seen_bank: false,
        }
    }
}

impl Default for VgmInterp {
    fn default() -> Self {
        VgmInterp::new()
    }
}

impl Interpreter for VgmInterp {
    fn step(&mut self, cx: &mut PlaybackCx) -> StepResult {
        let at = cx.src.pos();
        let Some(op) = next8(cx.src) else {
            return StepResult::EndOfTrack;
        };

        macro_rules! operand {
            () => {
                match next8(cx.src) {
                    Some(b) => b,
                    None => return StepResult::EndOfTrack,
                }
            };
        }

        match op {
            // AY8910 / YM2149 / OPN SSG section
            0xA0 => {
                let reg = operand!();
                let dat = operand!();
                let slot = cx
                    .slots
                    .slot_of(Chip::Ay8910)
                    .or_else(|| cx.slots.slot_of(Chip::Ym2203));
                if let Some(slot) = slot {
                    cx.bus.write_register(slot, 0, reg, dat);
                }
            }

            // Second SN76489, always on bus slot 2
            0x30 => {
                let dat = operand!();
                let hz = channel_clock(cx.track, 2);
                if cx.track.sn_freq0_is_0x400 {
                    cx.bus.write_raw(dat, 2, hz);
                } else {
                    cx.bus.write(dat, 2, hz);
                }
            }

            // First SN76489. Some rips address an SN chip the header never
            // declared (Sonic & Knuckles track 30); drop those writes.
            0x50 => {
                let dat = operand!();
                if let Some(slot) = cx.slots.slot_of(Chip::Sn76489)
                    && cx.track.channel_clocks[slot].is_some()
                {
                    let hz = channel_clock(cx.track, slot);
                    if cx.track.sn_freq0_is_0x400 {
                        cx.bus.write_raw(dat, slot, hz);
                    } else {
                        cx.bus.write(dat, slot, hz);
                    }
                }
            }

            0x51 => {
                let reg = operand!();
                let dat = operand!();
                if let Some(slot) = cx.slots.slot_of(Chip::Ym2413) {
                    cx.bus.write_register(slot, 0, reg, dat);
                }
            }

            // YM2612 port 0: only registers the chip actually decodes
            0x52 => {
                let reg = operand!();
                let dat = operand!();
                let wanted = (0x30..=0xB6).contains(&reg)
                    || matches!(reg, 0x22 | 0x27 | 0x28 | 0x2A | 0x2B);
                if wanted && let Some(slot) = cx.slots.slot_of(Chip::Ym2612) {
                    cx.bus.write_register(slot, 0, reg, dat);
                }
            }

            // YM2612 port 1
            0x53 => {
                let reg = operand!();
                let dat = operand!();
                if (0x30..=0xB6).contains(&reg)
                    && let Some(slot) = cx.slots.slot_of(Chip::Ym2612)
                {
                    cx.bus.write_register(slot, 1, reg, dat);
                }
            }

            // YM2151; timer registers are not forwarded
            0x54 | 0xA4 => {
                let reg = operand!();
                let dat = operand!();
                if reg != 0x10
                    && reg != 0x11
                    && let Some(slot) = cx.slots.slot_of(Chip::Ym2151)
                {
                    cx.bus.write_register(slot, 0, reg, dat);
                }
            }

            0x55 => {
                let reg = operand!();
                let dat = operand!();
                if let Some(slot) = cx.slots.slot_of(Chip::Ym2203) {
                    cx.bus.write_register(slot, 0, reg, dat);
                }
            }

            0xA5 => {
                let reg = operand!();
                let dat = operand!();
                if let Some(slot) = cx.slots.slot_of(Chip::Ym2203B) {
                    cx.bus.write_register(slot, 0, reg, dat);
                }
            }

            // YM3812, playable on an OPL3 as well
            0x5A => {
                let reg = operand!();
                let dat = operand!();
                let slot = cx
                    .slots
                    .slot_of(Chip::Ym3812)
                    .or_else(|| cx.slots.slot_of(Chip::Ymf262));
                if let Some(slot) = slot {
                    cx.bus.write_register(slot, 0, reg, dat);
                }
            }

            // YMF262 ports 0/1
            0x5E | 0x5F => {
                let reg = operand!();
                let dat = operand!();
                if let Some(slot) = cx.slots.slot_of(Chip::Ymf262) {
                    cx.bus.write_register(slot, (op & 1) as u8, reg, dat);
                }
            }

            // Wait n samples
            0x61 => {
                let lo = operand!() as u64;
                let hi = operand!() as u64;
                self.samples += lo | (hi << 8);
            }

            // Wait one 60 Hz frame
            0x62 => self.samples += 735,

            // Wait one 50 Hz frame
            0x63 => self.samples += 882,

            // End/loop marker
            0x66 => {
                if cx.track.loop_offset == 0 || !cx.loops.fade_enabled() {
                    return StepResult::EndOfTrack;
                }
                cx.loops.completed_loop(cx.att);
                cx.src.set_pos(cx.track.loop_offset as u64 + 0x1C);
            }

            // Data block: remember where the first block's payload starts,
            // then skip over it
            0x67 => {
                let _marker = operand!();
                let _data_type = operand!();
                let size = match cx.src.read_u32() {
                    Ok(v) => v,
                    Err(_) => return StepResult::EndOfTrack,
                };
                if !self.seen_bank {
                    self.pcm_bank = cx.src.pos();
                    self.seen_bank = true;
                }
                cx.src.set_pos(cx.src.pos() + size as u64);
            }

            // Short wait, 1..=16 samples
            0x70..=0x7F => self.samples += (op & 0x0F) as u64 + 1,

            // DAC write from the PCM cursor, then wait 0..=15 samples
            0x80..=0x8F => {
                let sample = cx.src.read_u8_at(self.pcm_pos).unwrap_or(0);
                self.pcm_pos += 1;
                if let Some(slot) = cx.slots.slot_of(Chip::Ym2612) {
                    cx.bus.write_dac(sample, slot);
                }
                self.samples += (op & 0x0F) as u64;
            }

            // DAC stream control: not driven by this player, but the
            // operands must be consumed to stay in sync
            0x90 | 0x91 | 0x95 => {
                for _ in 0..4 {
                    let _ = operand!();
                }
            }
            0x92 => {
                for _ in 0..5 {
                    let _ = operand!();
                }
            }
            0x93 => {
                for _ in 0..10 {
                    let _ = operand!();
                }
            }
            0x94 => {
                let _ = operand!();
            }

            // Seek the PCM cursor within the data bank
            0xE0 => {
                let off = match cx.src.read_u32() {
                    Ok(v) => v,
                    Err(_) => return StepResult::EndOfTrack,
                };
                self.pcm_pos = self.pcm_bank + off as u64;
            }

            _ => {
                log::warn!("unknown VGM command 0x{:02X} at 0x{:X}", op, at);
            }
        }

        StepResult::Ran
    }

    fn run_cycle(&mut self, cx: &mut PlaybackCx, pacer: &Pacer) -> CycleResult {
        while self.samples <= self.real_samples {
            if self.step(cx) == StepResult::EndOfTrack {
                return CycleResult::EndOfTrack;
            }
        }
        self.real_samples = self.samples;
        pacer.wait_for_sample(self.real_samples);
        CycleResult::Running
    }

    fn elapsed_samples(&self) -> u64 {
        self.samples
    }
}
