//! Playback engine: wall-clock pacing, loop/fade control and track
//! sequencing.
//!
//! The engine owns the collaborators and the per-track state. Each call to
//! `advance` runs one scheduling cycle: the interpreter catches up to the
//! pacing target, then the pacer waits out the wall-clock deadline. The
//! deadline is always recomputed from the monotonic start-of-track
//! timestamp and the cumulative sample or frame counter, so sleep jitter
//! never accumulates as drift.
use std::time::{Duration, Instant};

use crate::chip::Chip;
use crate::device::{Attenuator, ChipBus, ChipSlots, FadeState, NowPlaying, NowPlayingSink, StorageRead};
use crate::interp::{CycleResult, Interpreter, PlaybackCx, VgmInterp, Xgm1Interp, Xgm2Interp};
use crate::source::{DataSource, SourceOptions};
use crate::track::{Format, LoadError, Track, open_track};

/// One sample period at 44 100 Hz, in nanoseconds.
pub const VGM_SAMPLE_NANOS: f64 = 22_675.736_961_451_25;

/// One frame period at the fixed 60 Hz frame clock, in microseconds.
pub const FRAME_MICROS: u64 = 16_666;

/// Historical PCM delivery cadences for the two frame-driver generations.
/// Kept as configuration; no derivation is implied.
pub const XGM1_PCM_TICK: Duration = Duration::from_micros(68);
pub const XGM2_PCM_TICK: Duration = Duration::from_micros(72);

/// Wall-clock pacer. In unthrottled mode every wait returns immediately,
/// which is what tests and fast-forward playback want.
pub struct Pacer {
    start: Instant,
    throttle: bool,
}

impl Pacer {
    pub fn new() -> Self {
        Pacer {
            start: Instant::now(),
            throttle: true,
        }
    }

    pub fn unthrottled() -> Self {
        Pacer {
            start: Instant::now(),
            throttle: false,
        }
    }

    /// Re-anchor the start-of-track timestamp.
    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn throttled(&self) -> bool {
        self.throttle
    }

    /// Deadline for the given cumulative frame count.
    pub fn frame_deadline(&self, frame: u64) -> Instant {
        self.start + Duration::from_micros(frame * FRAME_MICROS)
    }

    /// Block until the deadline for the given cumulative sample count:
    /// coarse sleeps while far out, a busy spin for the last stretch.
    pub fn wait_for_sample(&self, samples: u64) {
        if !self.throttle {
            return;
        }
        let deadline = self.start + Duration::from_nanos((samples as f64 * VGM_SAMPLE_NANOS) as u64);
        Self::wait_until(deadline);
    }

    pub fn wait_until(deadline: Instant) {
        const SPIN_WINDOW: Duration = Duration::from_micros(200);
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            if remaining > SPIN_WINDOW {
                std::thread::sleep(remaining - SPIN_WINDOW);
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Busy-wait for a short interval (PCM delivery ticks).
    pub fn spin_for(interval: Duration) {
        let until = Instant::now() + interval;
        while Instant::now() < until {
            std::hint::spin_loop();
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Pacer::new()
    }
}

/// Configured number of loop passes before the fade starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopLimit {
    Infinite,
    Count(u32),
}

/// Counts loop-marker passes and starts the fade-out exactly once, when
/// the counter reaches the configured limit. `Infinite` never triggers.
#[derive(Debug, Clone)]
pub struct LoopFade {
    limit: LoopLimit,
    fade_enabled: bool,
    count: u32,
}

impl LoopFade {
    pub fn new(limit: LoopLimit, fade_enabled: bool) -> Self {
        LoopFade {
            limit,
            fade_enabled,
            count: 0,
        }
    }

    /// Whether looping past the end marker is worthwhile at all: with the
    /// fade disabled a looping track would never end.
    pub fn fade_enabled(&self) -> bool {
        self.fade_enabled
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Record one completed loop pass, starting the fade on the Nth.
    pub fn completed_loop(&mut self, att: &mut dyn Attenuator) {
        self.count += 1;
        log::debug!("loop pass {}", self.count);
        if let LoopLimit::Count(limit) = self.limit
            && self.count == limit
        {
            att.start_fade();
        }
    }
}

/// What to play after the current track ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    All,
    One,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Replay,
    NextTrack,
    NextFolder,
}

/// Map the repeat mode to the next action once a track has ended. The
/// caller supplies `last_in_folder` since folder enumeration lives
/// outside the core.
pub fn next_action(repeat: RepeatMode, last_in_folder: bool) -> NextAction {
    match repeat {
        RepeatMode::One => NextAction::Replay,
        RepeatMode::Folder => NextAction::NextTrack,
        RepeatMode::All => {
            if last_in_folder {
                NextAction::NextFolder
            } else {
                NextAction::NextTrack
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub slots: ChipSlots,
    pub loop_limit: LoopLimit,
    pub fade_enabled: bool,
    pub repeat: RepeatMode,
    pub xgm1_pcm_tick: Duration,
    pub xgm2_pcm_tick: Duration,
    pub source: SourceOptions,
    /// Real-time pacing; off means run as fast as the bus allows.
    pub throttle: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            slots: ChipSlots::default(),
            loop_limit: LoopLimit::Count(2),
            fade_enabled: true,
            repeat: RepeatMode::All,
            xgm1_pcm_tick: XGM1_PCM_TICK,
            xgm2_pcm_tick: XGM2_PCM_TICK,
            source: SourceOptions::default(),
            throttle: true,
        }
    }
}

/// Engine state reported by `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    TrackEnded,
}

struct Loaded {
    track: Track,
    src: DataSource,
    interp: Box<dyn Interpreter>,
    loops: LoopFade,
}

/// The playback engine.
pub struct Player {
    config: PlayerConfig,
    bus: Box<dyn ChipBus>,
    att: Box<dyn Attenuator>,
    display: Box<dyn NowPlayingSink>,
    pacer: Pacer,
    current: Option<Loaded>,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        bus: Box<dyn ChipBus>,
        att: Box<dyn Attenuator>,
        display: Box<dyn NowPlayingSink>,
    ) -> Self {
        let pacer = if config.throttle {
            Pacer::new()
        } else {
            Pacer::unthrottled()
        };
        Player {
            config,
            bus,
            att,
            display,
            pacer,
            current: None,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Load a track and prime it for playback.
    ///
    /// The previous track's state (including any streamed-cache worker) is
    /// torn down first; on failure nothing is playing and the display is
    /// left untouched.
    pub fn load(
        &mut self,
        storage: Box<dyn StorageRead>,
        file_name: &str,
        track_index: u32,
        track_count: u32,
    ) -> Result<(), LoadError> {
        // Dropping the old source quiesces its refill worker before any
        // buffer can be reused for the new track.
        self.current = None;

        self.att.mute();
        self.att.cancel_fade();
        self.bus.reset();

        let (track, src) = open_track(storage, &self.config.source, &self.config.slots, file_name)?;

        for (channel, clock) in track.channel_clocks.iter().enumerate() {
            if let Some(hz) = clock {
                self.bus.set_clock(channel, *hz);
            }
        }
        self.bus.enable_clocks(true);

        let interp: Box<dyn Interpreter> = match track.format {
            Format::Vgm | Format::Vgz => Box::new(VgmInterp::new()),
            Format::Xgm1 => Box::new(Xgm1Interp::new(self.config.xgm1_pcm_tick)),
            Format::Xgm2 => Box::new(Xgm2Interp::new(
                track.data_start,
                track.psg_start,
                self.config.xgm2_pcm_tick,
            )),
            Format::Unknown => return Err(LoadError::UnknownMagic([0; 4])),
        };

        // The frame-driver formats assume the FM chip's DAC is routed in.
        if matches!(track.format, Format::Xgm1 | Format::Xgm2)
            && let Some(slot) = self.config.slots.slot_of(Chip::Ym2612)
        {
            self.bus.write_register(slot, 0, 0x2B, 0x80);
        }

        let info = NowPlaying {
            track_en: track.meta.track_en.clone(),
            track_jp: track.meta.track_jp.clone(),
            game_en: track.meta.game_en.clone(),
            game_jp: track.meta.game_jp.clone(),
            system_en: track.meta.system_en.clone(),
            system_jp: track.meta.system_jp.clone(),
            author_en: track.meta.author_en.clone(),
            author_jp: track.meta.author_jp.clone(),
            date: track.meta.date.clone(),
            chip_labels: track.clock_labels(&self.config.slots),
            format_label: track.format.label(),
            track_index,
            track_count,
        };
        self.display.update(&info);

        self.att.reset(None);
        self.att.unmute();

        log::info!(
            "loaded {} ({}, {} bytes{})",
            file_name,
            track.format,
            track.raw_size,
            track
                .decompressed_size
                .map(|d| format!(", {} inflated", d))
                .unwrap_or_default()
        );

        self.current = Some(Loaded {
            loops: LoopFade::new(self.config.loop_limit, self.config.fade_enabled),
            track,
            src,
            interp,
        });
        self.pacer.restart();
        Ok(())
    }

    /// Run one scheduling cycle.
    pub fn advance(&mut self) -> PlayerState {
        if self.att.fade_state() == FadeState::Completed {
            if self.current.take().is_some() {
                return PlayerState::TrackEnded;
            }
            return PlayerState::Idle;
        }

        let Some(current) = self.current.as_mut() else {
            return PlayerState::Idle;
        };

        let mut cx = PlaybackCx {
            src: &mut current.src,
            track: &current.track,
            slots: &self.config.slots,
            bus: self.bus.as_mut(),
            att: self.att.as_mut(),
            loops: &mut current.loops,
        };
        match current.interp.run_cycle(&mut cx, &self.pacer) {
            CycleResult::Running => PlayerState::Playing,
            CycleResult::EndOfTrack => {
                self.current = None;
                PlayerState::TrackEnded
            }
        }
    }

    /// Drive the current track to its end; returns immediately when
    /// nothing is loaded.
    pub fn play_to_end(&mut self) -> PlayerState {
        loop {
            match self.advance() {
                PlayerState::Playing => {}
                state => return state,
            }
        }
    }

    /// Stop and tear down the current track.
    pub fn stop(&mut self) {
        self.current = None;
        self.att.mute();
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// Elapsed playback time of the current track in whole seconds.
    pub fn elapsed_secs(&self) -> u64 {
        self.current
            .as_ref()
            .map(|c| c.interp.elapsed_samples() / 44_100)
            .unwrap_or(0)
    }

    /// The next action after a track ends, given whether the folder is
    /// exhausted.
    pub fn next_action(&self, last_in_folder: bool) -> NextAction {
        next_action(self.config.repeat, last_in_folder)
    }
}
