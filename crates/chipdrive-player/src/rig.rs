//! Console implementations of the hardware collaborators.
//!
//! `ConsoleBus` logs register traffic instead of strobing a physical bus,
//! `SoftAttenuator` models the fade ramp timing of the analog volume
//! controller, and `ConsoleDisplay` prints the now-playing block. Together
//! they let the playback core run end-to-end on a machine with no chips
//! attached.
use std::time::{Duration, Instant};

use chipdrive::device::{Attenuator, ChipBus, FadeState, NowPlaying, NowPlayingSink};

/// Chip bus that prints register writes (unless quiet) and keeps counters.
pub struct ConsoleBus {
    verbose: bool,
    pub register_writes: u64,
    pub dac_writes: u64,
    pub tone_writes: u64,
}

impl ConsoleBus {
    pub fn new(verbose: bool) -> Self {
        ConsoleBus {
            verbose,
            register_writes: 0,
            dac_writes: 0,
            tone_writes: 0,
        }
    }
}

impl ChipBus for ConsoleBus {
    fn set_clock(&mut self, channel: usize, hz: u32) {
        if self.verbose {
            println!("clock[{}] = {} Hz", channel, hz);
        }
    }

    fn enable_clocks(&mut self, on: bool) {
        if self.verbose {
            println!("clocks {}", if on { "on" } else { "off" });
        }
    }

    fn reset(&mut self) {
        if self.verbose {
            println!("bus reset");
        }
    }

    fn write_register(&mut self, slot: usize, port: u8, address: u8, value: u8) {
        self.register_writes += 1;
        if self.verbose {
            println!(
                "slot{} P{}: 0x{:02X} = 0x{:02X}",
                slot, port, address, value
            );
        }
    }

    fn write_dac(&mut self, _value: u8, _slot: usize) {
        // Far too frequent to print; just count.
        self.dac_writes += 1;
    }

    fn write(&mut self, value: u8, slot: usize, _clock_hz: u32) {
        self.tone_writes += 1;
        if self.verbose {
            println!("slot{} tone 0x{:02X}", slot, value);
        }
    }

    fn write_raw(&mut self, value: u8, slot: usize, _clock_hz: u32) {
        self.tone_writes += 1;
        if self.verbose {
            println!("slot{} tone raw 0x{:02X}", slot, value);
        }
    }
}

/// Software stand-in for the analog attenuator: tracks the fade tri-state
/// against wall-clock time. A `None` duration means fading is disabled and
/// `start_fade` completes immediately, which makes looping tracks end on
/// their first pass through the limit.
pub struct SoftAttenuator {
    duration: Option<Duration>,
    state: FadeState,
    started: Option<Instant>,
}

impl SoftAttenuator {
    pub fn new(duration: Option<Duration>) -> Self {
        SoftAttenuator {
            duration,
            state: FadeState::NotStarted,
            started: None,
        }
    }
}

impl Attenuator for SoftAttenuator {
    fn mute(&mut self) {}

    fn unmute(&mut self) {}

    fn reset(&mut self, _attenuation_db: Option<u8>) {
        self.state = FadeState::NotStarted;
        self.started = None;
    }

    fn start_fade(&mut self) {
        if self.state == FadeState::InProgress {
            return;
        }
        match self.duration {
            Some(_) => {
                self.state = FadeState::InProgress;
                self.started = Some(Instant::now());
            }
            None => self.state = FadeState::Completed,
        }
    }

    fn cancel_fade(&mut self) {
        self.state = FadeState::NotStarted;
        self.started = None;
    }

    fn fade_state(&self) -> FadeState {
        if self.state == FadeState::InProgress
            && let (Some(started), Some(duration)) = (self.started, self.duration)
            && started.elapsed() >= duration
        {
            return FadeState::Completed;
        }
        self.state
    }
}

/// Prints the now-playing block once per track.
pub struct ConsoleDisplay;

impl NowPlayingSink for ConsoleDisplay {
    fn update(&mut self, info: &NowPlaying) {
        println!();
        println!(
            "[{}] ({}/{}) {}",
            info.format_label, info.track_index, info.track_count, info.track_en
        );
        if !info.game_en.is_empty() {
            println!("  {} — {}", info.game_en, info.system_en);
        }
        if !info.author_en.is_empty() {
            println!("  {} {}", info.author_en, info.date);
        }
        for label in &info.chip_labels {
            println!("  {}", label);
        }
    }
}
