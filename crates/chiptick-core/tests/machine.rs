mod common;

use std::io::Write;

use chiptick_core::{FrameOutcome, GbsError, Machine, MachineConfig, machine::lock};
use common::{GbsBuilder, LOAD, RET, ldh};

fn init_code(parts: &[&[u8]]) -> Vec<u8> {
    let mut code: Vec<u8> = parts.concat();
    code.push(RET);
    code
}

/// init programs square 1 to period 1750 (439.8 Hz) and triggers it.
fn a440() -> GbsBuilder {
    let init = init_code(&[
        &ldh(0x11, 0x80),
        &ldh(0x12, 0xF0),
        &ldh(0x13, 0xD6),
        &ldh(0x14, 0x86),
    ]);
    GbsBuilder::new()
        .songs(3, 1)
        .entry(LOAD, LOAD + 0x40)
        .code(LOAD, &init)
        .code(LOAD + 0x40, &[RET])
}

#[test]
fn square_at_440_reports_note_48() {
    let mut m = a440().machine();
    for _ in 0..3 {
        assert!(m.produce_tick().is_some());
    }
    assert_eq!(m.notes(), [Some(48), None, None, None]);
    let out = m.render_period(256);
    assert!(out.iter().any(|&s| s != 0.0));
}

#[test]
fn timer_writes_change_tick_length() {
    let init = init_code(&[&ldh(0x06, 0xC0), &ldh(0x07, 0x04)]);
    let mut m = GbsBuilder::new()
        .entry(LOAD, LOAD + 0x20)
        .code(LOAD, &init)
        .code(LOAD + 0x20, &[RET])
        .machine();
    assert_eq!(m.frames_per_tick(), (48_000.0 / 59.7) as usize);
    m.run_one_frame();
    assert_eq!(m.tick_hz(), 64.0);
    assert_eq!(m.frames_per_tick(), 750);
}

#[test]
fn header_timer_sets_initial_rate() {
    let mut m = GbsBuilder::new().timer(0xC0, 0x84).machine();
    assert_eq!(m.tick_hz(), 128.0);
    assert_eq!(m.produce_tick().map(|s| s.len()), Some(375 * 2));
}

#[test]
fn ticks_shorter_than_a_frame_are_batched() {
    // play: LD HL,C000 ; INC (HL) ; RET
    let mut m = GbsBuilder::new()
        .timer(0xFF, 0x05)
        .entry(LOAD, LOAD + 0x20)
        .code(LOAD, &[RET])
        .code(LOAD + 0x20, &[0x21, 0x00, 0xC0, 0x34, RET])
        .machine();
    assert_eq!(m.tick_hz(), 262_144.0);
    assert_eq!(m.frames_per_tick(), 0);

    // 48000 / 262144 frames per tick: six ticks fill one frame. The first
    // call spends one of them finishing init.
    assert_eq!(m.produce_tick().map(|s| s.len()), Some(2));
    assert_eq!(m.mmu.read_byte(0xC000), 5);
    assert_eq!(m.produce_tick().map(|s| s.len()), Some(2));
    assert_eq!(m.mmu.read_byte(0xC000), 11);
}

#[test]
fn speed_changes_tick_length_not_pitch() {
    let mut m = a440().machine();
    m.produce_tick();
    m.set_speed(0.5);
    assert_eq!(m.frames_per_tick(), (48_000.0 / (59.7 * 0.5)) as usize);
    m.produce_tick();
    assert_eq!(m.notes()[0], Some(48));
    assert_eq!(m.adjust_speed(5.0), 2.0);
    assert_eq!(m.adjust_speed(-5.0), 0.1);
}

#[test]
fn driver_bank_switch_maps_window() {
    let init = [
        0x3E, 0x02, // LD A,2
        0xEA, 0x00, 0x20, // LD (2000),A
        0xFA, 0x00, 0x40, // LD A,(4000)
        0xEA, 0x00, 0xC0, // LD (C000),A
        RET,
    ];
    let mut m = GbsBuilder::new()
        .entry(LOAD, LOAD + 0x20)
        .code(LOAD, &init)
        .code(LOAD + 0x20, &[RET])
        .bank_data(1, 0, &[0x11])
        .bank_data(2, 0, &[0x5A])
        .machine();
    assert_eq!(m.mmu.read_byte(0x4000), 0x11);
    m.run_one_frame();
    assert_eq!(m.mmu.current_bank(), 2);
    assert_eq!(m.mmu.read_byte(0xC000), 0x5A);

    m.restart();
    assert_eq!(m.mmu.read_byte(0x4000), 0x11);
    assert_eq!(m.mmu.read_byte(0xC000), 0x00);
}

#[test]
fn rst_targets_load_address() {
    let mut m = GbsBuilder::new()
        .entry(LOAD, LOAD + 0x20)
        .code(LOAD, &[0xCF, RET]) // RST 08 ; RET
        .code(LOAD + 0x08, &[0x3E, 0x99, 0xEA, 0x00, 0xC0, RET])
        .code(LOAD + 0x20, &[RET])
        .machine();
    assert_eq!(m.mmu.read_byte(0x0008), 0x3E);
    assert_eq!(m.run_one_frame(), FrameOutcome::Completed { steps: 5 });
    assert_eq!(m.mmu.read_byte(0xC000), 0x99);
}

#[test]
fn runaway_driver_hits_step_budget() {
    let config = MachineConfig {
        max_steps_per_frame: 1000,
        ..MachineConfig::default()
    };
    let mut m = GbsBuilder::new()
        .code(LOAD, &[0x18, 0xFE]) // JR -2
        .machine_with(config);
    assert_eq!(m.run_one_frame(), FrameOutcome::Incomplete);
    assert_eq!(m.cpu.regs.pc, LOAD);
    assert_eq!(m.run_one_frame(), FrameOutcome::Incomplete);
    assert!(m.produce_tick().is_some());
}

#[test]
fn track_selection_is_checked() {
    let mut m = a440().machine();
    assert!(matches!(
        m.select_track(5),
        Err(GbsError::TrackOutOfRange { track: 5, count: 3 })
    ));
    m.select_track(2).unwrap();
    assert_eq!(m.track(), 2);
    assert_eq!(m.cpu.regs.a, 2);
}

#[test]
fn user_settings_survive_track_change() {
    let mut m = a440().machine();
    m.toggle_mute(0);
    m.set_volume(0.25);
    m.set_speed(1.5);
    m.next_track();
    assert!(m.is_muted(0));
    assert_eq!(m.volume(), 0.25);
    assert_eq!(m.speed(), 1.5);
    m.produce_tick();
    assert_eq!(m.notes()[0], None);
}

#[test]
fn header_strings_are_exposed() {
    let m = GbsBuilder::new().title("Test Tune").machine();
    assert_eq!(m.header().title, "Test Tune");
    assert_eq!(m.header().author, "");
}

fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn loads_from_disk() {
    let f = write_temp(&a440().bytes());
    let m = Machine::from_file(f.path(), MachineConfig::default()).unwrap();
    assert_eq!(m.track_count(), 3);
}

#[test]
fn bad_files_are_rejected() {
    let good = a440().bytes();

    let f = write_temp(&good[..0x20]);
    assert!(matches!(
        Machine::from_file(f.path(), MachineConfig::default()),
        Err(GbsError::TooShort { len: 0x20 })
    ));

    let mut bad_magic = good.clone();
    bad_magic[0] = b'X';
    let f = write_temp(&bad_magic);
    assert!(matches!(
        Machine::from_file(f.path(), MachineConfig::default()),
        Err(GbsError::BadMagic)
    ));

    let mut bad_version = good;
    bad_version[3] = 2;
    let f = write_temp(&bad_version);
    assert!(matches!(
        Machine::from_file(f.path(), MachineConfig::default()),
        Err(GbsError::UnsupportedVersion(2))
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Machine::from_file(dir.path().join("missing.gbs"), MachineConfig::default()),
        Err(GbsError::Io(_))
    ));
}

#[test]
fn shared_machine_serializes_control_and_render() {
    let shared = a440().machine().into_shared();
    let renderer = {
        let shared = shared.clone();
        std::thread::spawn(move || {
            for _ in 0..50 {
                let mut m = lock(&shared);
                m.produce_tick();
            }
        })
    };
    for _ in 0..50 {
        let mut m = lock(&shared);
        m.toggle_mute(1);
        m.restart();
    }
    renderer.join().unwrap();
    assert!(!lock(&shared).is_muted(1));
}
