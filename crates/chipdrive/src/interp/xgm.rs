//! Frame-driver generation 1 interpreter (XGM).
//!
//! Frame-granular: most opcodes encode a run of sub-writes in their low
//! nibble, a frame-wait opcode advances the frame counter, and up to eight
//! PCM channels are mixed on their own delivery cadence while the engine
//! waits out each frame deadline.
use std::time::Duration;

use crate::chip::Chip;
use crate::interp::{CycleResult, Interpreter, PlaybackCx, StepResult, channel_clock, next8};
use crate::player::Pacer;

pub const XGM1_PCM_CHANNELS: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
struct PcmChannel {
    on: bool,
    id: u8,
    pos: u32,
    priority: u8,
}

pub struct Xgm1Interp {
    /// Paced frame, trailing the command-stream frame.
    frame: u64,
    /// Frame counter advanced by the command stream.
    stream_frame: u64,
    pcm: [PcmChannel; XGM1_PCM_CHANNELS],
    pcm_tick: Duration,
}

impl Xgm1Interp {
    pub fn new(pcm_tick: Duration) -> Self {
        Xgm1Interp {
            frame: 0,
            stream_frame: 0,
            pcm: [PcmChannel::default(); XGM1_PCM_CHANNELS],
            pcm_tick,
        }
    }

    /// Deliver one additively-mixed PCM sample to the DAC register.
    fn mix_pcm(&mut self, cx: &mut PlaybackCx) {
        let mut acc: i16 = 0;
        let mut any = false;
        for ch in self.pcm.iter_mut() {
            if !ch.on {
                continue;
            }
            let id = ch.id as usize;
            let addr = cx.track.sample_addr.get(id).copied().unwrap_or(0);
            let len = cx.track.sample_len.get(id).copied().unwrap_or(0);
            let byte = cx.src.read_u8_at(addr as u64 + ch.pos as u64).unwrap_or(0);
            acc += byte as i8 as i16;
            any = true;
            ch.pos += 1;
            if ch.pos >= len {
                ch.on = false;
            }
        }
        if any {
            let clamped = acc.clamp(i8::MIN as i16, i8::MAX as i16);
            let slot = cx.slots.slot_of(Chip::Ym2612).unwrap_or(0);
            cx.bus.write_dac((clamped + 128) as u8, slot);
        }
    }
}

impl Interpreter for Xgm1Interp {
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

        let burst = (op & 0x0F) as usize + 1;
        match op {
            // Frame wait
            0x00 => self.stream_frame += 1,

            // Tone-generator write burst
            0x10..=0x1F => {
                let slot = cx.slots.slot_of(Chip::Sn76489).unwrap_or(1);
                let hz = channel_clock(cx.track, slot);
                for _ in 0..burst {
                    let dat = operand!();
                    cx.bus.write(dat, slot, hz);
                }
            }

            // FM port 0 / port 1 write bursts
            0x20..=0x2F | 0x30..=0x3F => {
                let port = if op < 0x30 { 0 } else { 1 };
                let slot = cx.slots.slot_of(Chip::Ym2612).unwrap_or(0);
                for _ in 0..burst {
                    let reg = operand!();
                    let dat = operand!();
                    cx.bus.write_register(slot, port, reg, dat);
                }
            }

            // Key on/off broadcast burst (register 0x28)
            0x40..=0x4F => {
                let slot = cx.slots.slot_of(Chip::Ym2612).unwrap_or(0);
                for _ in 0..burst {
                    let dat = operand!();
                    cx.bus.write_register(slot, 0, 0x28, dat);
                }
            }

            // PCM trigger: a new sample only preempts a playing channel of
            // equal or lower priority; sample id 0 stops the channel.
            0x50..=0x5F => {
                let priority = op & 0x0C;
                let channel = (op & 0x03) as usize;
                let id = operand!();
                let ch = &mut self.pcm[channel];
                if !ch.on || ch.priority <= priority {
                    ch.on = id != 0;
                    ch.priority = priority;
                    ch.pos = 0;
                    ch.id = id;
                }
            }

            // Loop marker: 24-bit offset relative to the music block
            0x7E => {
                let target = match cx.src.read_u24() {
                    Ok(v) => v,
                    Err(_) => return StepResult::EndOfTrack,
                };
                cx.loops.completed_loop(cx.att);
                cx.src.set_pos(0x108 + cx.track.slen as u64 + target as u64);
            }

            // End of music data
            0x7F => return StepResult::EndOfTrack,

            _ => {
                log::warn!("unknown XGM command 0x{:02X} at 0x{:X}", op, at);
            }
        }

        StepResult::Ran
    }

    fn run_cycle(&mut self, cx: &mut PlaybackCx, pacer: &Pacer) -> CycleResult {
        while self.stream_frame <= self.frame {
            if self.step(cx) == StepResult::EndOfTrack {
                return CycleResult::EndOfTrack;
            }
        }
        self.frame = self.stream_frame;

        if pacer.throttled() {
            // PCM delivery piggybacks on the frame wait: one mixed sample
            // per delivery tick until the deadline is close.
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
        // 44100 / 60
        self.frame * 735
    }
}
