use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace, warn};

use crate::{
    apu::DEFAULT_SAMPLE_RATE,
    cpu::Cpu,
    gbs::{GbsError, GbsFile, GbsHeader},
    mmu::Mmu,
};

/// NR10-NR52 as left by the boot ROM (gbdev.io/pandocs/Power_Up_State.html).
/// Written through the normal register path so channel state follows.
const POWER_ON_REGS: [u8; 0x17] = [
    0x80, 0xBF, 0xF3, 0xFF, 0x3F, 0xFF, 0x3F, 0x00, 0xFF, 0x3F, 0x7F, 0xFF, 0x9F, 0xFF, 0x3F,
    0xFF, 0xFF, 0x00, 0x00, 0x3F, 0x77, 0xF3, 0xF1,
];

/// Wave RAM contents observed on DMG hardware after power-on.
const POWER_ON_WAVE: [u8; 0x10] = [
    0xAC, 0xDD, 0xDA, 0x48, 0x36, 0x02, 0xCF, 0x16, 0x2C, 0x04, 0xE5, 0x2C, 0xAC, 0xDD, 0xDA,
    0x48,
];

pub const DEFAULT_STEP_BUDGET: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineConfig {
    pub sample_rate: u32,
    /// Master output gain, 0.0..=1.0.
    pub volume: f32,
    /// Playback speed multiplier, clamped to 0.1..=2.0.
    pub speed: f32,
    /// Instructions one driver tick may execute before it is abandoned.
    pub max_steps_per_frame: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            volume: 1.0,
            speed: 1.0,
            max_steps_per_frame: DEFAULT_STEP_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The driver routine returned to the resting stack depth.
    Completed { steps: usize },
    /// The step budget ran out first. The CPU stays where it stopped and the
    /// next frame resumes from there.
    Incomplete,
}

/// A loaded GBS file wired to a CPU, memory image and sound unit.
///
/// One call to [`Machine::produce_tick`] runs the driver's play routine once
/// and renders the audio that corresponds to that tick. Ticks shorter than
/// one output frame are batched until a whole frame has elapsed.
pub struct Machine {
    file: GbsFile,
    pub cpu: Cpu,
    pub mmu: Mmu,
    config: MachineConfig,
    track: usize,
    paused: bool,
}

pub type SharedMachine = Arc<Mutex<Machine>>;

/// Lock a shared machine. A panic on another thread leaves the state usable,
/// so poisoning is ignored.
pub fn lock(machine: &Mutex<Machine>) -> MutexGuard<'_, Machine> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Machine {
    /// Build a machine and start the file's default track.
    pub fn new(file: GbsFile, config: MachineConfig) -> Result<Self, GbsError> {
        let mut mmu = Mmu::new(&file, config.sample_rate);
        mmu.apu.set_master_volume(config.volume);
        mmu.rate.set_speed(config.speed);

        let mut track = file.header.default_track();
        if file.header.check_track(track).is_err() {
            warn!(
                "Start track {} out of range, starting at track 1",
                file.header.start_song
            );
            track = 0;
        }
        file.header.check_track(track)?;

        let mut machine = Self {
            file,
            cpu: Cpu::new(),
            mmu,
            config,
            track,
            paused: false,
        };
        machine.restart();
        Ok(machine)
    }

    pub fn from_file<P: AsRef<Path>>(path: P, config: MachineConfig) -> Result<Self, GbsError> {
        Self::new(GbsFile::from_file(path)?, config)
    }

    pub fn into_shared(self) -> SharedMachine {
        Arc::new(Mutex::new(self))
    }

    pub fn header(&self) -> &GbsHeader {
        &self.file.header
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Zero-based index of the current track.
    pub fn track(&self) -> usize {
        self.track
    }

    pub fn track_count(&self) -> usize {
        self.file.header.track_count()
    }

    /// Switch to `track` (zero-based) and restart from its init routine.
    pub fn select_track(&mut self, track: usize) -> Result<(), GbsError> {
        self.file.header.check_track(track)?;
        self.track = track;
        self.restart();
        Ok(())
    }

    pub fn next_track(&mut self) -> usize {
        self.track = (self.track + 1) % self.track_count();
        self.restart();
        self.track
    }

    pub fn prev_track(&mut self) -> usize {
        let count = self.track_count();
        self.track = (self.track + count - 1) % count;
        self.restart();
        self.track
    }

    /// Reset CPU, memory and sound to power-on state and set the CPU up to
    /// call the init routine for the current track. Mute toggles, volume and
    /// speed are kept.
    pub fn restart(&mut self) {
        let h = &self.file.header;
        info!("Starting track {}/{}", self.track + 1, h.song_count);

        self.mmu.apu.reset();
        self.mmu.reset_memory();
        self.mmu.mirror_vectors(h.load_addr);

        self.cpu = Cpu::new();
        self.cpu.rst_base = h.load_addr;
        // The init routine "returns" to a zeroed slot just below the resting
        // stack pointer; run_one_frame stops when SP climbs back up to it.
        self.cpu.regs.sp = h.sp.wrapping_sub(2);
        self.cpu.regs.pc = h.init_addr;
        self.cpu.regs.a = self.track as u8;

        self.mmu.write_byte(0xFFFF, 0x01);
        self.mmu.rate.set_timer(h.tma, h.tac);

        for (i, &val) in POWER_ON_REGS.iter().enumerate() {
            self.mmu.write_byte(0xFF10 + i as u16, val);
        }
        for (i, &val) in POWER_ON_WAVE.iter().enumerate() {
            self.mmu.write_byte(0xFF30 + i as u16, val);
        }
        debug!("CPU ready: {}", self.cpu.regs.debug_state());
    }

    /// Run the CPU until the current driver routine returns, then arm the
    /// play routine for the next call.
    pub fn run_one_frame(&mut self) -> FrameOutcome {
        let resting_sp = self.file.header.sp;
        let mut steps = 0;
        while self.cpu.regs.sp != resting_sp {
            if steps >= self.config.max_steps_per_frame {
                warn!(
                    "Driver tick exceeded {} instructions at {}",
                    steps,
                    self.cpu.regs.debug_state()
                );
                return FrameOutcome::Incomplete;
            }
            self.cpu.step(&mut self.mmu);
            steps += 1;
        }

        self.cpu.regs.pc = self.file.header.play_addr;
        self.cpu.regs.sp = resting_sp.wrapping_sub(2);
        FrameOutcome::Completed { steps }
    }

    /// Render `frames` stereo frames from the current channel state.
    pub fn render_period(&mut self, frames: usize) -> &[f32] {
        self.mmu.apu.render_period(frames)
    }

    /// Run one driver tick and render its audio. Returns `None` while paused;
    /// otherwise the block always holds at least one frame.
    pub fn produce_tick(&mut self) -> Option<&[f32]> {
        if self.paused {
            return None;
        }
        self.run_one_frame();
        let mut frames = self.mmu.rate.frames_per_tick();
        if frames == 0 {
            let per_tick = self.mmu.rate.sample_rate() as f32 / self.mmu.rate.tick_hz();
            let mut elapsed = per_tick;
            let mut ticks = 1;
            while elapsed < 1.0 && self.mmu.rate.frames_per_tick() == 0 {
                self.run_one_frame();
                elapsed += per_tick;
                ticks += 1;
            }
            trace!("{ticks} driver ticks batched into one frame");
            frames = 1;
        }
        Some(self.mmu.apu.render_period(frames))
    }

    pub fn frames_per_tick(&self) -> usize {
        self.mmu.rate.frames_per_tick()
    }

    pub fn tick_hz(&self) -> f32 {
        self.mmu.rate.tick_hz()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn is_muted(&self, ch: usize) -> bool {
        self.mmu.apu.is_muted(ch)
    }

    pub fn set_muted(&mut self, ch: usize, muted: bool) {
        self.mmu.apu.set_muted(ch, muted);
    }

    pub fn toggle_mute(&mut self, ch: usize) -> bool {
        self.mmu.apu.toggle_mute(ch)
    }

    pub fn volume(&self) -> f32 {
        self.mmu.apu.master_volume()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.mmu.apu.set_master_volume(volume);
    }

    pub fn speed(&self) -> f32 {
        self.mmu.rate.speed()
    }

    /// Set the speed multiplier. Takes effect from the next tick; the pitch
    /// of held notes does not change.
    pub fn set_speed(&mut self, speed: f32) {
        self.mmu.rate.set_speed(speed);
    }

    pub fn adjust_speed(&mut self, delta: f32) -> f32 {
        self.set_speed(self.speed() + delta);
        self.speed()
    }

    pub fn notes(&self) -> [Option<u8>; 4] {
        self.mmu.apu.notes()
    }

    pub fn levels(&self) -> [u8; 8] {
        self.mmu.apu.levels()
    }

    pub fn scope(&self, ch: usize) -> &[f32] {
        self.mmu.apu.scope(ch)
    }
}
