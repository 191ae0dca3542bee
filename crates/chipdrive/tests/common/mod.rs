//! Shared test fixtures: in-memory storage, recording collaborators and
//! synthetic container builders.
#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use chipdrive::device::{
    Attenuator, ChipBus, FadeState, NowPlaying, NowPlayingSink, StorageRead,
};

/// In-memory storage; clones share the same content.
#[derive(Clone)]
pub struct MemStorage {
    data: Arc<Vec<u8>>,
}

impl MemStorage {
    pub fn new(data: Vec<u8>) -> Self {
        MemStorage {
            data: Arc::new(data),
        }
    }
}

impl StorageRead for MemStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = &self.data[..];
        if offset as usize >= data.len() {
            return Ok(0);
        }
        let avail = &data[offset as usize..];
        let n = buf.len().min(avail.len());
        buf[..n].copy_from_slice(&avail[..n]);
        Ok(n)
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn try_clone(&self) -> io::Result<Box<dyn StorageRead>> {
        Ok(Box::new(self.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Clock { channel: usize, hz: u32 },
    Register { slot: usize, port: u8, address: u8, value: u8 },
    Dac { value: u8, slot: usize },
    Tone { value: u8, slot: usize, raw: bool },
    Reset,
}

/// Chip bus that records every call for later assertions.
#[derive(Default)]
pub struct RecordingBus {
    pub events: Vec<BusEvent>,
}

impl RecordingBus {
    pub fn register_writes(&self) -> Vec<&BusEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, BusEvent::Register { .. }))
            .collect()
    }

    pub fn chip_write_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, BusEvent::Register { .. } | BusEvent::Tone { .. }))
            .count()
    }

    pub fn dac_values(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Dac { value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }
}

impl ChipBus for RecordingBus {
    fn set_clock(&mut self, channel: usize, hz: u32) {
        self.events.push(BusEvent::Clock { channel, hz });
    }

    fn enable_clocks(&mut self, _on: bool) {}

    fn reset(&mut self) {
        self.events.push(BusEvent::Reset);
    }

    fn write_register(&mut self, slot: usize, port: u8, address: u8, value: u8) {
        self.events.push(BusEvent::Register {
            slot,
            port,
            address,
            value,
        });
    }

    fn write_dac(&mut self, value: u8, slot: usize) {
        self.events.push(BusEvent::Dac { value, slot });
    }

    fn write(&mut self, value: u8, slot: usize, _clock_hz: u32) {
        self.events.push(BusEvent::Tone {
            value,
            slot,
            raw: false,
        });
    }

    fn write_raw(&mut self, value: u8, slot: usize, _clock_hz: u32) {
        self.events.push(BusEvent::Tone {
            value,
            slot,
            raw: true,
        });
    }
}

/// Attenuator that counts fade starts and lets tests drive the tri-state.
pub struct TestAttenuator {
    pub state: FadeState,
    pub fades_started: u32,
}

impl TestAttenuator {
    pub fn new() -> Self {
        TestAttenuator {
            state: FadeState::NotStarted,
            fades_started: 0,
        }
    }
}

impl Default for TestAttenuator {
    fn default() -> Self {
        TestAttenuator::new()
    }
}

impl Attenuator for TestAttenuator {
    fn mute(&mut self) {}

    fn unmute(&mut self) {}

    fn reset(&mut self, _attenuation_db: Option<u8>) {
        self.state = FadeState::NotStarted;
        self.fades_started = 0;
    }

    fn start_fade(&mut self) {
        if self.state == FadeState::InProgress {
            return;
        }
        self.fades_started += 1;
        self.state = FadeState::InProgress;
    }

    fn cancel_fade(&mut self) {
        self.state = FadeState::NotStarted;
    }

    fn fade_state(&self) -> FadeState {
        self.state
    }
}

/// Display sink that keeps the last update.
#[derive(Default)]
pub struct RecordingDisplay {
    pub last: Option<NowPlaying>,
}

impl NowPlayingSink for RecordingDisplay {
    fn update(&mut self, info: &NowPlaying) {
        self.last = Some(info.clone());
    }
}

/// Boxed-collaborator wrappers sharing their state with the test body,
/// for tests that go through the engine rather than a bare interpreter.
#[derive(Clone, Default)]
pub struct SharedBus(pub Arc<std::sync::Mutex<RecordingBus>>);

impl ChipBus for SharedBus {
    fn set_clock(&mut self, channel: usize, hz: u32) {
        self.0.lock().unwrap().set_clock(channel, hz);
    }
    fn enable_clocks(&mut self, on: bool) {
        self.0.lock().unwrap().enable_clocks(on);
    }
    fn reset(&mut self) {
        self.0.lock().unwrap().reset();
    }
    fn write_register(&mut self, slot: usize, port: u8, address: u8, value: u8) {
        self.0.lock().unwrap().write_register(slot, port, address, value);
    }
    fn write_dac(&mut self, value: u8, slot: usize) {
        self.0.lock().unwrap().write_dac(value, slot);
    }
    fn write(&mut self, value: u8, slot: usize, clock_hz: u32) {
        self.0.lock().unwrap().write(value, slot, clock_hz);
    }
    fn write_raw(&mut self, value: u8, slot: usize, clock_hz: u32) {
        self.0.lock().unwrap().write_raw(value, slot, clock_hz);
    }
}

#[derive(Clone, Default)]
pub struct SharedDisplay(pub Arc<std::sync::Mutex<RecordingDisplay>>);

impl NowPlayingSink for SharedDisplay {
    fn update(&mut self, info: &NowPlaying) {
        self.0.lock().unwrap().update(info);
    }
}

/// Builder for synthetic VGM containers.
pub struct VgmFile {
    version: u32,
    header_size: usize,
    u32_fields: Vec<(usize, u32)>,
    u8_fields: Vec<(usize, u8)>,
    commands: Vec<u8>,
    gd3: Option<Vec<u8>>,
}

impl VgmFile {
    pub fn new(version: u32) -> Self {
        VgmFile {
            version,
            header_size: 0x100,
            u32_fields: Vec::new(),
            u8_fields: Vec::new(),
            commands: Vec::new(),
            gd3: None,
        }
    }

    pub fn u32_field(mut self, offset: usize, value: u32) -> Self {
        self.u32_fields.push((offset, value));
        self
    }

    pub fn u8_field(mut self, offset: usize, value: u8) -> Self {
        self.u8_fields.push((offset, value));
        self
    }

    /// Point the loop-offset field at the start of the command data.
    pub fn loop_to_start(self) -> Self {
        let target = (self.header_size - 0x1C) as u32;
        self.u32_field(0x1C, target)
    }

    pub fn commands(mut self, bytes: &[u8]) -> Self {
        self.commands.extend_from_slice(bytes);
        self
    }

    pub fn gd3(mut self, fields: &[&str]) -> Self {
        self.gd3 = Some(gd3_block(fields));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buf = vec![0u8; self.header_size];
        buf[0..4].copy_from_slice(b"Vgm ");
        buf[0x08..0x0C].copy_from_slice(&self.version.to_le_bytes());
        if self.version >= 0x150 {
            let rel = (self.header_size - 0x34) as u32;
            buf[0x34..0x38].copy_from_slice(&rel.to_le_bytes());
        }
        for (off, v) in &self.u32_fields {
            buf[*off..off + 4].copy_from_slice(&v.to_le_bytes());
        }
        for (off, v) in &self.u8_fields {
            buf[*off] = *v;
        }
        buf.extend_from_slice(&self.commands);
        if let Some(gd3) = self.gd3 {
            let rel = (buf.len() - 0x14) as u32;
            buf[0x14..0x18].copy_from_slice(&rel.to_le_bytes());
            buf.extend_from_slice(&gd3);
        }
        let eof = (buf.len() - 4) as u32;
        buf[0x04..0x08].copy_from_slice(&eof.to_le_bytes());
        buf
    }
}

/// Serialize a metadata block from up to ten fields, padding the rest
/// with empty strings.
pub fn gd3_block(fields: &[&str]) -> Vec<u8> {
    let mut data: Vec<u8> = Vec::new();
    for i in 0..10 {
        let s = fields.get(i).copied().unwrap_or("");
        for code in s.encode_utf16() {
            data.extend_from_slice(&code.to_le_bytes());
        }
        data.extend_from_slice(&0u16.to_le_bytes());
    }

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"Gd3 ");
    out.extend_from_slice(&0x0100u32.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&data);
    out
}

/// Deterministic pseudo-random filler for buffer-equivalence tests.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2F6E_2B1;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}
