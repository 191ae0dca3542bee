//! chipdrive — playback core for retro sound-chip register logs.
//!
//! This crate turns chiptune capture containers into timed register
//! operations on real synthesizer hardware. It understands the VGM
//! recorded-register-stream format (plain and gzip-compressed) and both
//! generations of the XGM frame-driver export format, and replays them
//! sample-accurately against a 44 100 Hz (or 60 Hz frame) clock.
//!
//! The core pieces:
//! - [`track`] identifies the container by magic, extracts header fields
//!   and metadata, and hands back an immutable [`track::Track`].
//! - [`source`] owns the bytes: small files resident in memory, large
//!   files streamed through two read-ahead cache pages refilled by a
//!   background worker.
//! - [`inflate`] feeds a gzip-compressed container through a bounded
//!   decompressor.
//! - [`clock`] quantizes recorded oscillator clocks to the frequencies the
//!   hardware clock generator can actually produce.
//! - [`interp`] holds the three command-stream interpreters, one per
//!   container family, behind a single [`interp::Interpreter`] trait.
//! - [`player`] paces the interpreters against the wall clock, counts
//!   loops, triggers the fade-out and decides what plays next.
//! - [`device`] declares the collaborator traits the host wires in:
//!   storage, the chip bus, the attenuator and the now-playing display.
//!
//! The hardware itself — bus strobes, clock generator programming, the
//! attenuator's fade ramp — lives behind the [`device`] traits; nothing in
//! this crate touches I/O beyond the storage handle it is given.
//!
//! A minimal host looks like:
//!
//! ```no_run
//! use chipdrive::player::{Player, PlayerConfig, PlayerState};
//! # struct Bus; struct Att; struct Disp;
//! # impl chipdrive::device::ChipBus for Bus {
//! #     fn set_clock(&mut self, _: usize, _: u32) {}
//! #     fn enable_clocks(&mut self, _: bool) {}
//! #     fn reset(&mut self) {}
//! #     fn write_register(&mut self, _: usize, _: u8, _: u8, _: u8) {}
//! #     fn write_dac(&mut self, _: u8, _: usize) {}
//! #     fn write(&mut self, _: u8, _: usize, _: u32) {}
//! #     fn write_raw(&mut self, _: u8, _: usize, _: u32) {}
//! # }
//! # impl chipdrive::device::Attenuator for Att {
//! #     fn mute(&mut self) {}
//! #     fn unmute(&mut self) {}
//! #     fn reset(&mut self, _: Option<u8>) {}
//! #     fn start_fade(&mut self) {}
//! #     fn cancel_fade(&mut self) {}
//! #     fn fade_state(&self) -> chipdrive::device::FadeState {
//! #         chipdrive::device::FadeState::NotStarted
//! #     }
//! # }
//! # impl chipdrive::device::NowPlayingSink for Disp {
//! #     fn update(&mut self, _: &chipdrive::device::NowPlaying) {}
//! # }
//! let mut player = Player::new(
//!     PlayerConfig::default(),
//!     Box::new(Bus),
//!     Box::new(Att),
//!     Box::new(Disp),
//! );
//! let storage = chipdrive::device::FsStorage::open("music/title.vgm".as_ref()).unwrap();
//! player.load(Box::new(storage), "title.vgm", 1, 12).unwrap();
//! while player.advance() == PlayerState::Playing {}
//! ```
pub mod binutil;
pub mod chip;
pub mod clock;
pub mod device;
pub mod inflate;
pub mod interp;
pub mod meta;
pub mod player;
pub mod source;
pub mod track;

pub use binutil::ParseError;
pub use chip::Chip;
pub use device::{
    Attenuator, ChipBus, ChipSlots, FadeState, FsStorage, NowPlaying, NowPlayingSink, StorageRead,
};
pub use meta::TrackMeta;
pub use player::{LoopLimit, NextAction, Player, PlayerConfig, PlayerState, RepeatMode};
pub use source::{DataSource, SourceOptions};
pub use track::{Format, LoadError, Track, open_track};
