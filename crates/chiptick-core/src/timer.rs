use log::debug;

// Input clocks selected by TAC bits 0-1 (gbdev.io/pandocs/Timer_and_Divider_Registers.html)
const TIMER_CLOCKS_HZ: [f32; 4] = [4096.0, 262_144.0, 65_536.0, 16_384.0];
/// Driver call rate when the timer is disabled: the LCD's vertical blank.
pub const VBLANK_HZ: f32 = 59.7;

pub const MIN_SPEED: f32 = 0.1;
pub const MAX_SPEED: f32 = 2.0;

/// Derives how often the music driver's play routine runs, and therefore how
/// many output samples make up one driver tick, from TMA/TAC.
///
/// Only buffer sizing depends on this; oscillator phase lives in the APU and
/// is untouched by a recompute.
#[derive(Debug, Clone)]
pub struct TickRate {
    pub tma: u8,
    pub tac: u8,
    speed: f32,
    sample_rate: u32,
    tick_hz: f32,
    samples_per_tick: usize,
}

impl TickRate {
    pub fn new(sample_rate: u32) -> Self {
        let mut rate = Self {
            tma: 0,
            tac: 0,
            speed: 1.0,
            sample_rate,
            tick_hz: VBLANK_HZ,
            samples_per_tick: 0,
        };
        rate.recompute();
        rate
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF06 => self.tma,
            0xFF07 => self.tac,
            _ => 0xFF,
        }
    }

    /// Store a TMA/TAC write. Returns true if the tick rate was recomputed.
    pub fn write(&mut self, addr: u16, val: u8) -> bool {
        let slot = match addr {
            0xFF06 => &mut self.tma,
            0xFF07 => &mut self.tac,
            _ => return false,
        };
        if *slot == val {
            return false;
        }
        *slot = val;
        self.recompute();
        true
    }

    pub fn set_timer(&mut self, tma: u8, tac: u8) {
        self.tma = tma;
        self.tac = tac;
        self.recompute();
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Set the user speed multiplier, clamped to [`MIN_SPEED`]..=[`MAX_SPEED`].
    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.recompute();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn tick_hz(&self) -> f32 {
        self.tick_hz
    }

    /// Interleaved stereo samples (2 per frame) produced per driver tick.
    pub fn samples_per_tick(&self) -> usize {
        self.samples_per_tick
    }

    pub fn frames_per_tick(&self) -> usize {
        self.samples_per_tick / 2
    }

    pub fn recompute(&mut self) {
        let mut hz = VBLANK_HZ;
        if self.tac & 0x04 != 0 {
            hz = TIMER_CLOCKS_HZ[(self.tac & 0x03) as usize] / (256 - self.tma as u32) as f32;
            // GBS extension: bit 7 requests the CGB double-speed clock.
            if self.tac & 0x80 != 0 {
                hz *= 2.0;
            }
        }
        hz *= self.speed;

        self.tick_hz = hz;
        self.samples_per_tick = (self.sample_rate as f32 / hz) as usize * 2;
        debug!(
            "Tick rate {:.4} Hz ({} samples per tick)",
            hz, self.samples_per_tick
        );
    }
}
