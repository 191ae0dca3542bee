use chipdrive::clock::HZ_3579;
use chipdrive::device::ChipSlots;
use chipdrive::interp::{CycleResult, Interpreter, PlaybackCx, StepResult, VgmInterp, Xgm1Interp, Xgm2Interp};
use chipdrive::player::{LoopFade, LoopLimit, Pacer, XGM1_PCM_TICK, XGM2_PCM_TICK};
use chipdrive::source::SourceOptions;
use chipdrive::track::{Format, open_track};

mod common;
use common::{BusEvent, MemStorage, RecordingBus, TestAttenuator, VgmFile};

fn load(bytes: Vec<u8>) -> (chipdrive::Track, chipdrive::DataSource) {
    open_track(
        Box::new(MemStorage::new(bytes)),
        &SourceOptions::default(),
        &ChipSlots::default(),
        "test.vgm",
    )
    .unwrap()
}

#[test]
fn minimal_vgm_plays_one_write_then_ends() {
    let bytes = VgmFile::new(0x171)
        .u32_field(0x0C, 3_579_545)
        .commands(&[0x50, 0x9F, 0x66])
        .build();
    let (track, mut src) = load(bytes);
    assert_eq!(track.format, Format::Vgm);
    assert_eq!(track.channel_clocks[1], Some(HZ_3579));

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    let mut interp = VgmInterp::new();
    {
        let mut cx = PlaybackCx {
            src: &mut src,
            track: &track,
            slots: &slots,
            bus: &mut bus,
            att: &mut att,
            loops: &mut loops,
        };
        assert_eq!(interp.step(&mut cx), StepResult::Ran);
        assert_eq!(interp.elapsed_samples(), 0);
        assert_eq!(interp.step(&mut cx), StepResult::EndOfTrack);
    }
    // Exactly one chip write, the sample counter untouched by the end marker.
    assert_eq!(bus.chip_write_count(), 1);
    assert_eq!(
        bus.events[0],
        BusEvent::Tone {
            value: 0x9F,
            slot: 1,
            raw: false
        }
    );
    assert_eq!(interp.elapsed_samples(), 0);
}

#[test]
fn wait_commands_sum_into_the_sample_counter() {
    let bytes = VgmFile::new(0x171)
        .commands(&[0x61, 0x64, 0x00, 0x62, 0x63, 0x70, 0x7F, 0x66])
        .build();
    let (track, mut src) = load(bytes);

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    let mut interp = VgmInterp::new();
    let mut cx = PlaybackCx {
        src: &mut src,
        track: &track,
        slots: &slots,
        bus: &mut bus,
        att: &mut att,
        loops: &mut loops,
    };

    let mut last = 0;
    while interp.step(&mut cx) == StepResult::Ran {
        // Monotonic, never decreasing.
        assert!(interp.elapsed_samples() >= last);
        last = interp.elapsed_samples();
    }
    assert_eq!(interp.elapsed_samples(), 100 + 735 + 882 + 1 + 16);
}

#[test]
fn fade_starts_exactly_once_on_the_nth_loop() {
    let bytes = VgmFile::new(0x171)
        .loop_to_start()
        .commands(&[0x62, 0x66])
        .build();
    let (track, mut src) = load(bytes);

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(3), true);
    let mut interp = VgmInterp::new();

    // Each pass is one wait plus the loop marker.
    for pass in 1..=6u32 {
        {
            let mut cx = PlaybackCx {
                src: &mut src,
                track: &track,
                slots: &slots,
                bus: &mut bus,
                att: &mut att,
                loops: &mut loops,
            };
            assert_eq!(interp.step(&mut cx), StepResult::Ran);
            assert_eq!(interp.step(&mut cx), StepResult::Ran);
        }
        assert_eq!(loops.count(), pass);
        let expected = if pass >= 3 { 1 } else { 0 };
        assert_eq!(att.fades_started, expected, "after pass {}", pass);
    }
}

#[test]
fn infinite_loop_limit_never_fades() {
    let bytes = VgmFile::new(0x171)
        .loop_to_start()
        .commands(&[0x62, 0x66])
        .build();
    let (track, mut src) = load(bytes);

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Infinite, true);
    let mut interp = VgmInterp::new();
    {
        let mut cx = PlaybackCx {
            src: &mut src,
            track: &track,
            slots: &slots,
            bus: &mut bus,
            att: &mut att,
            loops: &mut loops,
        };
        for _ in 0..20 {
            assert_eq!(interp.step(&mut cx), StepResult::Ran);
        }
    }
    assert_eq!(att.fades_started, 0);
}

#[test]
fn loop_marker_with_fading_disabled_ends_the_track() {
    let bytes = VgmFile::new(0x171)
        .loop_to_start()
        .commands(&[0x66])
        .build();
    let (track, mut src) = load(bytes);

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), false);
    let mut interp = VgmInterp::new();
    let mut cx = PlaybackCx {
        src: &mut src,
        track: &track,
        slots: &slots,
        bus: &mut bus,
        att: &mut att,
        loops: &mut loops,
    };

    assert_eq!(interp.step(&mut cx), StepResult::EndOfTrack);
}

#[test]
fn pcm_cursor_follows_data_block_and_seek() {
    let bytes = VgmFile::new(0x171)
        .commands(&[
            0x67, 0x66, 0x00, 0x04, 0x00, 0x00, 0x00, // data block, 4 bytes
            0xAA, 0xBB, 0xCC, 0xDD, // block payload
            0x80, // DAC write, wait 0
            0xE0, 0x02, 0x00, 0x00, 0x00, // seek to bank offset 2
            0x81, // DAC write, wait 1
            0x66,
        ])
        .build();
    let (track, mut src) = load(bytes);

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    let mut interp = VgmInterp::new();
    {
        let mut cx = PlaybackCx {
            src: &mut src,
            track: &track,
            slots: &slots,
            bus: &mut bus,
            att: &mut att,
            loops: &mut loops,
        };
        while interp.step(&mut cx) == StepResult::Ran {}
    }
    assert_eq!(bus.dac_values(), vec![0xAA, 0xCC]);
    assert_eq!(interp.elapsed_samples(), 1);
}

#[test]
fn unknown_opcode_is_skipped_without_advancing_time() {
    let bytes = VgmFile::new(0x171).commands(&[0xFD, 0x62, 0x66]).build();
    let (track, mut src) = load(bytes);

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    let mut interp = VgmInterp::new();
    let mut cx = PlaybackCx {
        src: &mut src,
        track: &track,
        slots: &slots,
        bus: &mut bus,
        att: &mut att,
        loops: &mut loops,
    };

    assert_eq!(interp.step(&mut cx), StepResult::Ran);
    assert_eq!(interp.elapsed_samples(), 0);
    assert_eq!(interp.step(&mut cx), StepResult::Ran);
    assert_eq!(interp.elapsed_samples(), 735);
    assert_eq!(interp.step(&mut cx), StepResult::EndOfTrack);
}

fn xgm1_container(slen: u16, samples: &[u8], commands: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x104];
    bytes[0..4].copy_from_slice(b"XGM ");
    // Two 256-byte samples when slen is 2: ids 1 and 2.
    if slen >= 1 {
        bytes[0x04..0x06].copy_from_slice(&0u16.to_le_bytes()); // id 1 addr
        bytes[0x06..0x08].copy_from_slice(&1u16.to_le_bytes()); // id 1 len
    }
    if slen >= 2 {
        bytes[0x08..0x0A].copy_from_slice(&1u16.to_le_bytes()); // id 2 addr
        bytes[0x0A..0x0C].copy_from_slice(&1u16.to_le_bytes()); // id 2 len
    }
    bytes[0x100..0x102].copy_from_slice(&slen.to_le_bytes());
    let mut sample_block = samples.to_vec();
    sample_block.resize(slen as usize * 256, 0);
    bytes.extend_from_slice(&sample_block);
    bytes.extend_from_slice(&(commands.len() as u32).to_le_bytes());
    bytes.extend_from_slice(commands);
    bytes
}

#[test]
fn xgm1_bursts_and_frames() {
    let bytes = xgm1_container(0, &[], &[0x21, 0x30, 0x42, 0xB0, 0x07, 0x00, 0x7F]);
    let (track, mut src) = load(bytes);
    assert_eq!(track.format, Format::Xgm1);

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    let mut interp = Xgm1Interp::new(XGM1_PCM_TICK);
    let pacer = Pacer::unthrottled();
    {
        let mut cx = PlaybackCx {
            src: &mut src,
            track: &track,
            slots: &slots,
            bus: &mut bus,
            att: &mut att,
            loops: &mut loops,
        };
        assert_eq!(interp.run_cycle(&mut cx, &pacer), CycleResult::Running);
        assert_eq!(interp.run_cycle(&mut cx, &pacer), CycleResult::EndOfTrack);
    }

    // The 0x21 burst carries two register writes to FM port 0.
    let writes = bus.register_writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(
        *writes[0],
        BusEvent::Register {
            slot: 0,
            port: 0,
            address: 0x30,
            value: 0x42
        }
    );
    assert_eq!(interp.elapsed_samples(), 735);
}

#[test]
fn xgm1_pcm_priority_preemption() {
    let mut samples = vec![0x10u8; 256]; // id 1
    samples.extend_from_slice(&[0x20u8; 256]); // id 2
    let bytes = xgm1_container(
        2,
        &samples,
        &[
            0x50, 0x01, // ch 0, priority 0, sample 1
            0x5C, 0x02, // ch 0, priority 12: preempts
            0x50, 0x01, // ch 0, priority 0: must not preempt
            0x00, 0x7F,
        ],
    );
    let (track, mut src) = load(bytes);
    assert_eq!(track.sample_addr[2], 0x204);

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    let mut interp = Xgm1Interp::new(XGM1_PCM_TICK);
    let pacer = Pacer::unthrottled();
    {
        let mut cx = PlaybackCx {
            src: &mut src,
            track: &track,
            slots: &slots,
            bus: &mut bus,
            att: &mut att,
            loops: &mut loops,
        };
        assert_eq!(interp.run_cycle(&mut cx, &pacer), CycleResult::Running);
    }

    // The mixed sample comes from sample 2 (0x20 = 32, biased by 128):
    // the high-priority trigger stuck.
    assert_eq!(bus.dac_values(), vec![160]);
}

fn xgm2_container(fm: &[u8], psg: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x104];
    bytes[0..4].copy_from_slice(b"XGM2");
    bytes[0x05] = 0b001;
    bytes[0x08..0x0A].copy_from_slice(&1u16.to_le_bytes());
    bytes[0x0A..0x0C].copy_from_slice(&1u16.to_le_bytes());
    for i in 0..124 {
        bytes[0x0C + i * 2..0x0E + i * 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
    }
    let mut fm_block = fm.to_vec();
    fm_block.resize(256, 0xF0);
    let mut psg_block = psg.to_vec();
    psg_block.resize(256, 0x0C); // harmless short waits
    bytes.extend_from_slice(&fm_block);
    bytes.extend_from_slice(&psg_block);
    bytes
}

fn xgm2_setup(
    bytes: Vec<u8>,
) -> (
    chipdrive::Track,
    chipdrive::DataSource,
    Xgm2Interp,
) {
    let (track, src) = load(bytes);
    let interp = Xgm2Interp::new(track.data_start, track.psg_start, XGM2_PCM_TICK);
    (track, src, interp)
}

#[test]
fn xgm2_fm_key_then_end() {
    let (track, mut src, mut interp) =
        xgm2_setup(xgm2_container(&[0x40, 0xFF, 0xFF, 0xFF, 0xFF], &[0x0D]));

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    {
        let mut cx = PlaybackCx {
            src: &mut src,
            track: &track,
            slots: &slots,
            bus: &mut bus,
            att: &mut att,
            loops: &mut loops,
        };
        assert_eq!(interp.step(&mut cx), StepResult::Ran);
        assert_eq!(interp.step(&mut cx), StepResult::EndOfTrack);
    }
    assert_eq!(
        bus.events,
        vec![BusEvent::Register {
            slot: 0,
            port: 0,
            address: 0x28,
            value: 0x00
        }]
    );
}

#[test]
fn xgm2_psg_frequency_uses_shadow_state_for_deltas() {
    // FM stream waits so the tone stream gets stepped.
    let fm = &[0x00, 0xFF, 0xFF, 0xFF, 0xFF];
    // Set channel 0 to 0x034, then delta +1.
    let psg = &[0x20, 0x34, 0x40, 0x0F, 0xFF, 0xFF, 0xFF];
    let (track, mut src, mut interp) = xgm2_setup(xgm2_container(fm, psg));

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    {
        let mut cx = PlaybackCx {
            src: &mut src,
            track: &track,
            slots: &slots,
            bus: &mut bus,
            att: &mut att,
            loops: &mut loops,
        };
        // wait, freq set, freq delta, end marker
        assert_eq!(interp.step(&mut cx), StepResult::Ran);
        assert_eq!(interp.step(&mut cx), StepResult::Ran);
        assert_eq!(interp.step(&mut cx), StepResult::Ran);
        assert_eq!(interp.step(&mut cx), StepResult::EndOfTrack);
    }

    let tones: Vec<u8> = bus
        .events
        .iter()
        .filter_map(|e| match e {
            BusEvent::Tone { value, raw: true, .. } => Some(*value),
            _ => None,
        })
        .collect();
    // Freq set: low nibble then high byte; delta to 0x035 re-sends only
    // the low byte since the high half did not change.
    assert_eq!(tones, vec![0x84, 0x03, 0x85]);
}

#[test]
fn xgm2_nominal_frame_is_the_minimum_of_the_substreams() {
    // FM waits 3 frames; the tone stream waits 1 per step.
    let fm = &[0x02, 0xFF, 0xFF, 0xFF, 0xFF];
    let psg = &[0x00, 0x00, 0x00, 0x0F, 0xFF, 0xFF, 0xFF];
    let (track, mut src, mut interp) = xgm2_setup(xgm2_container(fm, psg));

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    let pacer = Pacer::unthrottled();
    let mut cx = PlaybackCx {
        src: &mut src,
        track: &track,
        slots: &slots,
        bus: &mut bus,
        att: &mut att,
        loops: &mut loops,
    };

    assert_eq!(interp.run_cycle(&mut cx, &pacer), CycleResult::Running);
    assert_eq!(interp.elapsed_samples(), 735);
    assert_eq!(interp.run_cycle(&mut cx, &pacer), CycleResult::Running);
    assert_eq!(interp.elapsed_samples(), 2 * 735);
}

#[test]
fn xgm2_fm_loop_counts_toward_the_fade() {
    // FM: wait one frame, then loop back to the stream start.
    let fm = &[0x00, 0xFF, 0x00, 0x00, 0x00];
    let psg = &[0x0D, 0x0D, 0x0D, 0x0D];
    let (track, mut src, mut interp) = xgm2_setup(xgm2_container(fm, psg));

    let slots = ChipSlots::default();
    let mut bus = RecordingBus::default();
    let mut att = TestAttenuator::new();
    let mut loops = LoopFade::new(LoopLimit::Count(2), true);
    {
        let mut cx = PlaybackCx {
            src: &mut src,
            track: &track,
            slots: &slots,
            bus: &mut bus,
            att: &mut att,
            loops: &mut loops,
        };
        for _ in 0..12 {
            assert_eq!(interp.step(&mut cx), StepResult::Ran);
        }
    }
    assert!(loops.count() >= 2);
    assert_eq!(att.fades_started, 1);
}
