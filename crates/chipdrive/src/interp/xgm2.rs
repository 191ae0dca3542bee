//! Frame-driver generation 2 interpreter (XGM2).
//!
//! The container carries two independent command streams — one for the FM
//! chip, one for the tone generator — each with its own frame counter and
//! read position. The engine steps whichever stream is behind and takes
//! the minimum of the two counters as the track's nominal frame. Both
//! streams encode deltas against register shadow state, so the interpreter
//! mirrors every write it emits.
//!
//! Opcode ranges are mapped to categories by `FmOp::classify` and
//! `PsgOp::classify` so the classification is testable on its own.
use std::time::Duration;

use crate::chip::Chip;
use crate::interp::{CycleResult, Interpreter, PlaybackCx, StepResult, channel_clock};
use crate::player::Pacer;

/// End-of-track sentinel in the 24-bit loop-offset field.
const LOOP_END: u32 = 0xFF_FFFF;

/// FM sub-stream opcode categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmOp {
    WaitShort,
    WaitLong,
    Pcm,
    LoadInst,
    Freq,
    Key,
    KeySeq,
    Pan0,
    Pan1,
    FreqWait,
    Tl,
    FreqDelta,
    FreqDeltaWait,
    TlDelta,
    TlDeltaWait,
    Write,
    FrameDelay,
    Lfo,
    Ch3SpecialOn,
    Ch3SpecialOff,
    DacOn,
    DacOff,
    Loop,
    Unknown,
}

impl FmOp {
    pub fn classify(op: u8) -> FmOp {
        match op {
            0x00..=0x0E => FmOp::WaitShort,
            0x0F => FmOp::WaitLong,
            0x10..=0x1F => FmOp::Pcm,
            0x20..=0x2F => FmOp::LoadInst,
            0x30..=0x3F => FmOp::Freq,
            0x40..=0x4F => FmOp::Key,
            0x50..=0x5F => FmOp::KeySeq,
            0x60..=0x6F => FmOp::Pan0,
            0x70..=0x7F => FmOp::Pan1,
            0x80..=0x8F => FmOp::FreqWait,
            0x90..=0x9F => FmOp::Tl,
            0xA0..=0xAF => FmOp::FreqDelta,
            0xB0..=0xBF => FmOp::FreqDeltaWait,
            0xC0..=0xCF => FmOp::TlDelta,
            0xD0..=0xDF => FmOp::TlDeltaWait,
            0xE0..=0xEF => FmOp::Write,
            0xF0 => FmOp::FrameDelay,
            0xF9 => FmOp::Lfo,
            0xFA => FmOp::Ch3SpecialOn,
            0xFB => FmOp::Ch3SpecialOff,
            0xFC => FmOp::DacOn,
            0xFD => FmOp::DacOff,
            0xFF => FmOp::Loop,
            _ => FmOp::Unknown,
        }
    }
}

/// FM port encoded in the opcode (or its first operand byte).
pub fn fm_port(op: u8, next: u8) -> usize {
    match FmOp::classify(op) {
        FmOp::Pan0 => 0,
        FmOp::Pan1 => 1,
        FmOp::LoadInst
        | FmOp::Freq
        | FmOp::FreqWait
        | FmOp::FreqDelta
        | FmOp::FreqDeltaWait
        | FmOp::Key
        | FmOp::KeySeq => ((op >> 2) & 1) as usize,
        FmOp::Write => ((op >> 3) & 1) as usize,
        FmOp::Tl | FmOp::TlDelta | FmOp::TlDeltaWait => (next & 1) as usize,
        _ => 0,
    }
}

/// FM channel encoded in the opcode; the frequency forms with bit 3 set
/// address channel 2's special-mode slots.
pub fn fm_channel(op: u8, next: u8) -> u8 {
    match FmOp::classify(op) {
        FmOp::Freq | FmOp::FreqWait | FmOp::FreqDelta | FmOp::FreqDeltaWait => {
            if op & 8 != 0 {
                2
            } else {
                op & 3
            }
        }
        FmOp::LoadInst
        | FmOp::Key
        | FmOp::KeySeq
        | FmOp::Tl
        | FmOp::TlDelta
        | FmOp::TlDeltaWait
        | FmOp::Pan0
        | FmOp::Pan1 => op & 3,
        FmOp::Write => {
            if next & 0xF8 == 0xA8 {
                2
            } else {
                next & 3
            }
        }
        _ => 0,
    }
}

/// Tone sub-stream opcode categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsgOp {
    WaitShort,
    WaitLong,
    Loop,
    FreqLow,
    Freq,
    FreqWait,
    FreqDelta,
    Env,
    EnvDelta,
}

impl PsgOp {
    pub fn classify(op: u8) -> PsgOp {
        match op {
            0x00..=0x0D => PsgOp::WaitShort,
            0x0E => PsgOp::WaitLong,
            0x0F => PsgOp::Loop,
            0x10..=0x1F => PsgOp::FreqLow,
            0x20..=0x2F => PsgOp::Freq,
            0x30..=0x3F => PsgOp::FreqWait,
            0x40..=0x7F => PsgOp::FreqDelta,
            0x80..=0xBF => PsgOp::Env,
            0xC0..=0xFF => PsgOp::EnvDelta,
        }
    }
}

/// Tone channel addressed by a PSG opcode (and, for the low-byte form,
/// its operand byte).
pub fn psg_channel(op: u8, next: u8) -> usize {
    match PsgOp::classify(op) {
        PsgOp::FreqDelta => ((op >> 4) - 4) as usize,
        PsgOp::Env => ((op >> 4) - 8) as usize,
        PsgOp::EnvDelta => ((op >> 4) - 0xC) as usize,
        PsgOp::Freq | PsgOp::FreqWait => ((op >> 2) & 3) as usize,
        PsgOp::FreqLow => ((next >> 5) & 3) as usize,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Pcm2Channel {
    on: bool,
    id: u8,
    pos: u32,
    half_speed: bool,
    half_sent: bool,
}

pub struct Xgm2Interp {
    /// Nominal playback frame: min of the two sub-stream counters.
    frame: u64,
    fm_frame: u64,
    psg_frame: u64,
    fm_pos: u64,
    psg_pos: u64,
    /// Register shadows per FM port, backing the delta opcodes.
    ym_state: [[u8; 0x100]; 2],
    psg_env: [u8; 4],
    psg_freq: [u16; 4],
    pcm: [Pcm2Channel; 4],
    pcm_tick: Duration,
}

impl Xgm2Interp {
    pub fn new(fm_start: u64, psg_start: u64, pcm_tick: Duration) -> Self {
        Xgm2Interp {
            frame: 0,
            fm_frame: 0,
            psg_frame: 0,
            fm_pos: fm_start,
            psg_pos: psg_start,
            ym_state: [[0; 0x100]; 2],
            psg_env: [0; 4],
            psg_freq: [0; 4],
            pcm: [Pcm2Channel::default(); 4],
            pcm_tick,
        }
    }

    fn ym_slot(&self, cx: &PlaybackCx) -> usize {
        cx.slots.slot_of(Chip::Ym2612).unwrap_or(0)
    }

    fn ym_write(&mut self, cx: &mut PlaybackCx, port: usize, reg: u8, value: u8) {
        self.ym_state[port][reg as usize] = value;
        let slot = self.ym_slot(cx);
        cx.bus.write_register(slot, port as u8, reg, value);
    }

    fn psg_write(&mut self, cx: &mut PlaybackCx, value: u8) {
        let slot = cx.slots.slot_of(Chip::Sn76489).unwrap_or(1);
        let hz = channel_clock(cx.track, slot);
        cx.bus.write_raw(value, slot, hz);
    }

    fn fm_byte(&mut self, cx: &mut PlaybackCx) -> u8 {
        let b = cx.src.read_u8_at(self.fm_pos).unwrap_or(0xFF);
        self.fm_pos += 1;
        b
    }

    fn psg_byte(&mut self, cx: &mut PlaybackCx) -> u8 {
        let b = cx.src.read_u8_at(self.psg_pos).unwrap_or(0x0F);
        self.psg_pos += 1;
        b
    }

    /// One FM sub-stream command.
    fn step_fm(&mut self, cx: &mut PlaybackCx) -> StepResult {
        let op = cx.src.read_u8_at(self.fm_pos).unwrap_or(0xFF);
        let next = cx.src.read_u8_at(self.fm_pos + 1).unwrap_or(0);
        let port = fm_port(op, next);
        let mut channel = fm_channel(op, next);
        self.fm_pos += 1;

        match FmOp::classify(op) {
            FmOp::Loop => {
                let target = cx.src.read_u24_at(self.fm_pos).unwrap_or(LOOP_END);
                if target == LOOP_END {
                    return StepResult::EndOfTrack;
                }
                cx.loops.completed_loop(cx.att);
                self.fm_pos = cx.track.data_start + target as u64;
            }

            FmOp::Pcm => {
                let ch = (op & 0b011) as usize;
                let half_speed = op & 0b100 != 0;
                let id = self.fm_byte(cx);
                let pcm = &mut self.pcm[ch];
                pcm.id = id;
                if id == 0 {
                    pcm.on = false;
                } else {
                    pcm.on = true;
                    pcm.pos = 0;
                    pcm.half_speed = half_speed;
                    pcm.half_sent = false;
                }
            }

            FmOp::LoadInst => {
                // 28 operator parameter bytes, then algorithm and pan.
                for base in (0x30u8..=0x9C).step_by(4) {
                    let reg = base + channel;
                    let value = self.fm_byte(cx);
                    self.ym_write(cx, port, reg, value);
                }
                let value = self.fm_byte(cx);
                self.ym_write(cx, port, 0xB0 + channel, value);
                let value = self.fm_byte(cx);
                self.ym_write(cx, port, 0xB4 + channel, value);
            }

            FmOp::Write => {
                let count = (op & 7) + 1;
                for _ in 0..count {
                    let reg = self.fm_byte(cx);
                    let value = self.fm_byte(cx);
                    self.ym_write(cx, port, reg, value);
                }
            }

            FmOp::Pan0 | FmOp::Pan1 => {
                let reg = 0xB4 + channel;
                let value = (self.ym_state[port][reg as usize] & 0x3F) | ((op << 4) & 0xC0);
                self.ym_write(cx, port, reg, value);
            }

            FmOp::Freq | FmOp::FreqWait => {
                if op & 0xF0 == 0x80 {
                    self.fm_frame += 1;
                }
                let data1 = self.fm_byte(cx);
                let data2 = self.fm_byte(cx);

                // Pre key-off, addressed with the channel before any
                // special-mode slot reassignment
                if data1 & 0x40 != 0 {
                    let slot = self.ym_slot(cx);
                    cx.bus
                        .write_register(slot, 0, 0x28, ((port as u8) << 2) + channel);
                }

                let reg: u8 = if op & 8 != 0 { 0xA8 } else { 0xA0 };
                if op & 8 != 0 {
                    // Special mode: the slot lives in the opcode's low bits.
                    channel = op & 3;
                }
                let value = (((data1 & 0x3F) as u16) << 8) | data2 as u16;
                let hi = ((value >> 8) & 0x3F) as u8;
                let lo = (value & 0xFF) as u8;
                self.ym_write(cx, port, reg + channel + 4, hi);
                self.ym_write(cx, port, reg + channel, lo);

                // Post key-on
                if data1 & 0x80 != 0 {
                    let slot = self.ym_slot(cx);
                    cx.bus
                        .write_register(slot, 0, 0x28, 0xF0 + ((port as u8) << 2) + channel);
                }
            }

            FmOp::FreqDelta | FmOp::FreqDeltaWait => {
                if op & 0xF0 == 0xB0 {
                    self.fm_frame += 1;
                }
                let data1 = self.fm_byte(cx);
                let reg: u8 = if op & 8 != 0 { 0xA8 } else { 0xA0 };
                if op & 8 != 0 {
                    channel = op & 3;
                }
                let hi_reg = reg + channel + 4;
                let lo_reg = reg + channel;
                let mut value = (((self.ym_state[port][hi_reg as usize] & 0x3F) as i32) << 8)
                    | self.ym_state[port][lo_reg as usize] as i32;
                let mut delta = (((data1 >> 1) & 0x7F) + 1) as i32;
                if data1 & 1 != 0 {
                    delta = -delta;
                }
                value += delta;
                let hi = ((value >> 8) & 0x3F) as u8;
                let lo = (value & 0xFF) as u8;
                self.ym_write(cx, port, hi_reg, hi);
                self.ym_write(cx, port, lo_reg, lo);
            }

            FmOp::Tl => {
                let data1 = self.fm_byte(cx);
                let slot = (op >> 2) & 3;
                let reg = 0x40 + (slot << 2) + channel;
                let value = (data1 >> 1) & 0x7F;
                self.ym_write(cx, port, reg, value);
            }

            FmOp::TlDelta | FmOp::TlDeltaWait => {
                if op & 0xF0 == 0xD0 {
                    self.fm_frame += 1;
                }
                let data1 = self.fm_byte(cx);
                let slot = (op >> 2) & 3;
                let reg = 0x40 + (slot << 2) + channel;
                let mut delta = (((data1 >> 2) & 0x3F) + 1) as i32;
                if data1 & 2 != 0 {
                    delta = -delta;
                }
                let value = (self.ym_state[port][reg as usize] as i32 + delta) as u8;
                self.ym_write(cx, port, reg, value);
            }

            FmOp::Key => {
                let base: u8 = if op & 8 != 0 { 0xF0 } else { 0x00 };
                let slot = self.ym_slot(cx);
                cx.bus
                    .write_register(slot, 0, 0x28, base + ((port as u8) << 2) + channel);
            }

            FmOp::KeySeq => {
                let slot = self.ym_slot(cx);
                let target = ((port as u8) << 2) + channel;
                if op & 8 != 0 {
                    cx.bus.write_register(slot, 0, 0x28, 0xF0 + target);
                    cx.bus.write_register(slot, 0, 0x28, target);
                } else {
                    cx.bus.write_register(slot, 0, 0x28, target);
                    cx.bus.write_register(slot, 0, 0x28, 0xF0 + target);
                }
            }

            FmOp::DacOn => self.ym_write(cx, 0, 0x2B, 0x80),
            FmOp::DacOff => self.ym_write(cx, 0, 0x2B, 0x00),

            FmOp::Lfo => {
                let value = self.fm_byte(cx);
                self.ym_write(cx, 0, 0x22, value);
            }

            FmOp::Ch3SpecialOn => {
                let value = (self.ym_state[0][0x27] & 0xBF) | 0x40;
                self.ym_write(cx, 0, 0x27, value);
            }
            FmOp::Ch3SpecialOff => {
                let value = self.ym_state[0][0x27] & 0xBF;
                self.ym_write(cx, 0, 0x27, value);
            }

            FmOp::WaitShort => self.fm_frame += op as u64 + 1,
            FmOp::WaitLong => {
                let extra = self.fm_byte(cx);
                self.fm_frame += extra as u64 + 16;
            }

            FmOp::FrameDelay => {}

            FmOp::Unknown => {
                log::warn!("unknown XGM2 FM command 0x{:02X} at 0x{:X}", op, self.fm_pos);
            }
        }

        StepResult::Ran
    }

    /// One tone sub-stream command.
    fn step_psg(&mut self, cx: &mut PlaybackCx) -> StepResult {
        let op = cx.src.read_u8_at(self.psg_pos).unwrap_or(0x0F);
        let next = cx.src.read_u8_at(self.psg_pos + 1).unwrap_or(0);
        let channel = psg_channel(op, next);
        self.psg_pos += 1;

        match PsgOp::classify(op) {
            PsgOp::Loop => {
                let target = cx.src.read_u24_at(self.psg_pos).unwrap_or(LOOP_END);
                if target == LOOP_END {
                    return StepResult::EndOfTrack;
                }
                self.psg_pos = cx.track.psg_start + target as u64;
            }

            PsgOp::Env => {
                self.psg_env[channel] = op & 0x0F;
                let value = (0x90 + ((channel as u8) << 5)) | self.psg_env[channel];
                self.psg_write(cx, value);
            }

            PsgOp::EnvDelta => {
                if op & 0x08 != 0 {
                    self.psg_frame += 1;
                }
                let mut delta = ((op & 3) + 1) as i16;
                if op & 4 != 0 {
                    delta = -delta;
                }
                let env = (self.psg_env[channel] as i16 + delta).clamp(0, 15) as u8;
                self.psg_env[channel] = env;
                let value = (0x90 + ((channel as u8) << 5)) | env;
                self.psg_write(cx, value);
            }

            PsgOp::Freq | PsgOp::FreqWait => {
                if op & 0xF0 == 0x30 {
                    self.psg_frame += 1;
                }
                let data1 = self.psg_byte(cx);
                let value = (((op & 3) as u16) << 8) | data1 as u16;
                self.psg_freq[channel] = value;
                self.psg_write(cx, freq_low_byte(channel, value));
                // The high half always goes out on the three square
                // channels; the noise channel takes a single byte.
                if channel < 3 {
                    self.psg_write(cx, ((value >> 4) & 0x3F) as u8);
                }
            }

            PsgOp::FreqLow => {
                if op & 0x01 != 0 {
                    self.psg_frame += 1;
                }
                let data1 = self.psg_byte(cx);
                let value = (self.psg_freq[channel] & 0x03F0) | (data1 & 0x0F) as u16;
                self.psg_freq[channel] = value;
                self.psg_write(cx, freq_low_byte(channel, value));
            }

            PsgOp::FreqDelta => {
                if op & 0x08 != 0 {
                    self.psg_frame += 1;
                }
                let old_high = self.psg_freq[channel] & 0x03F0;
                let mut delta = ((op & 3) + 1) as i16;
                if op & 4 != 0 {
                    delta = -delta;
                }
                let value = ((self.psg_freq[channel] & 0x03FF) as i16 + delta) as u16 & 0x03FF;
                self.psg_freq[channel] = value;
                self.psg_write(cx, freq_low_byte(channel, value));
                if old_high != value & 0x03F0 && channel < 3 {
                    self.psg_write(cx, ((value >> 4) & 0x3F) as u8);
                }
            }

            PsgOp::WaitShort => self.psg_frame += op as u64 + 1,
            PsgOp::WaitLong => {
                let extra = self.psg_byte(cx);
                self.psg_frame += extra as u64 + 15;
            }
        }

        StepResult::Ran
    }

    /// Deliver one mixed PCM sample across the three channels, honoring
    /// the per-channel half-speed divider.
    fn mix_pcm(&mut self, cx: &mut PlaybackCx) {
        let mut acc: i16 = 0;
        let mut any = false;
        for ch in self.pcm.iter_mut().take(3) {
            if !ch.on {
                continue;
            }
            if !ch.half_sent {
                let id = ch.id as usize;
                let addr = cx.track.sample_addr.get(id).copied().unwrap_or(0);
                let len = cx.track.sample_len.get(id).copied().unwrap_or(0);
                let byte = cx.src.read_u8_at(addr as u64 + ch.pos as u64).unwrap_or(0);
                acc += byte as i8 as i16;
                any = true;
                ch.pos += 1;
                if ch.pos >= len {
                    ch.on = false;
                    ch.id = 0;
                }
            }
            if ch.half_speed {
                ch.half_sent = !ch.half_sent;
            }
        }
        if any {
            let clamped = acc.clamp(i8::MIN as i16, i8::MAX as i16);
            let slot = cx.slots.slot_of(Chip::Ym2612).unwrap_or(0);
            cx.bus.write_dac((clamped + 128) as u8, slot);
        }
    }
}

/// Tone-frequency low-byte write, substituting 1 for a zero period to
/// dodge the chip's zero-frequency quirk.
fn freq_low_byte(channel: usize, value: u16) -> u8 {
    let base = 0x80 + ((channel as u8) << 5);
    if value == 0 {
        base | 1
    } else {
        base | (value & 0x0F) as u8
    }
}

impl Interpreter for Xgm2Interp {
    fn step(&mut self, cx: &mut PlaybackCx) -> StepResult {
        if self.fm_frame <= self.psg_frame {
            self.step_fm(cx)
        } else {
            self.step_psg(cx)
        }
    }

    fn run_cycle(&mut self, cx: &mut PlaybackCx, pacer: &Pacer) -> CycleResult {
        while self.fm_frame <= self.frame {
            if self.step_fm(cx) == StepResult::EndOfTrack {
                return CycleResult::EndOfTrack;
            }
        }
        while self.psg_frame <= self.frame {
            if self.step_psg(cx) == StepResult::EndOfTrack {
                return CycleResult::EndOfTrack;
            }
        }
        self.frame = self.fm_frame.min(self.psg_frame);

        if pacer.throttled() {
            let deadline = pacer.frame_deadline(self.frame);
            while std::time::Instant::now() + self.pcm_tick < deadline {
                self.mix_pcm(cx);
                Pacer::spin_for(self.pcm_tick);
            }
        } else {
            self.mix_pcm(cx);
        }
        CycleResult::Running
    }

    fn elapsed_samples(&self) -> u64 {
        self.frame * 735
    }
}
