use log::{debug, trace};

pub const CPU_CLOCK_HZ: f32 = 4_194_304.0;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
/// Each channel's share of the mix, so four full-scale channels sum to 1.0.
const CHANNEL_GAIN: f32 = 0.25;

pub const CHANNEL_NAMES: [&str; 4] = ["sq1", "sq2", "wave", "noise"];

// Duty table for pulse channels (CH1, CH2). Each entry is an 8-step
// waveform. Index (0..3) corresponds to duty selector in NRx1:
// 0 -> 00000001 (12.5%)
// 1 -> 10000001 (25%)
// 2 -> 10000111 (50%)
// 3 -> 01111110 (75%)
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1], // 12.5% -> 00000001
    [1, 0, 0, 0, 0, 0, 0, 1], // 25%   -> 10000001
    [1, 0, 0, 0, 0, 1, 1, 1], // 50%   -> 10000111
    [0, 1, 1, 1, 1, 1, 1, 0], // 75%   -> 01111110
];

// NR43 divisor codes, in CPU clocks before the clock shift is applied.
const NOISE_DIVISORS: [u32; 8] = [8, 16, 32, 48, 64, 80, 96, 112];

// Mean level of a wave nibble after the NR32 shift, removed before scaling.
const WAVE_DC_OFFSET: [f32; 3] = [7.5, 3.75, 1.5];

/// Ratio between adjacent equal-tempered semitones.
const SEMITONE: f32 = 1.059_463_1;
/// Note index assigned to A4 (440 Hz).
const A4_NOTE: i32 = 48;

/// Decay factor of the per-channel DC-blocking filter at `rate`.
pub fn calc_hp_coef(rate: u32) -> f32 {
    0.999_958_f32.powf(CPU_CLOCK_HZ / rate as f32)
}

/// Nearest equal-tempered note index for `hz`, with 440 Hz at 48.
pub fn note_from_hz(hz: f32) -> u8 {
    let n = ((hz / 440.0).ln() / SEMITONE.ln()).round() as i32 + A4_NOTE;
    n.clamp(0, u8::MAX as i32) as u8
}

#[derive(Default, Clone, Copy, Debug)]
struct LengthCounter {
    load: u16,
    enabled: bool,
    counter: f32,
    inc: f32,
}

impl LengthCounter {
    /// Restart the countdown: `max - load` ticks of the 256 Hz length clock.
    fn reload(&mut self, max: u16, sample_rate: f32) {
        self.inc = (256.0 / (max - self.load.min(max - 1)) as f32) / sample_rate;
        self.counter = 0.0;
    }

    /// Returns true when the counter expires on this sample.
    fn clock(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.counter += self.inc;
        if self.counter > 1.0 {
            self.counter = 0.0;
            return true;
        }
        false
    }
}

#[derive(Default, Clone, Copy, Debug)]
struct Envelope {
    period: u8,
    add: bool,
    counter: f32,
    inc: f32,
}

impl Envelope {
    fn rate(period: u8, sample_rate: f32) -> f32 {
        // 64 Hz envelope clock; period 0 still runs the timer at 1/8 rate.
        if period == 0 {
            8.0 / sample_rate
        } else {
            (64.0 / period as f32) / sample_rate
        }
    }

    fn reset(&mut self, val: u8, sample_rate: f32) {
        self.period = val & 0x07;
        self.add = val & 0x08 != 0;
        self.inc = Self::rate(self.period, sample_rate);
        self.counter = 0.0;
    }

    fn running(&self) -> bool {
        self.inc != 0.0
    }

    fn clock(&mut self, volume: &mut u8) {
        self.counter += self.inc;
        while self.counter > 1.0 {
            if self.period != 0 {
                if self.add && *volume < 15 {
                    *volume += 1;
                } else if !self.add && *volume > 0 {
                    *volume -= 1;
                }
                if *volume == 0 || *volume == 15 {
                    self.inc = 0.0;
                }
            }
            self.counter -= 1.0;
        }
    }

    /// NRx2 rewrite while the channel is playing ("zombie mode").
    fn zombie_update(&mut self, volume: u8, old_val: u8, new_val: u8, sample_rate: f32) -> u8 {
        let old_period = old_val & 0x07;
        let old_add = old_val & 0x08 != 0;
        let new_add = new_val & 0x08 != 0;
        let mut vol = volume;
        let automatic = if old_add { vol < 15 } else { vol > 0 };
        if old_period == 0 && automatic {
            debug!("(zombie vol++)");
            vol = vol.wrapping_add(1);
        } else if !old_add {
            debug!("(zombie vol+=2)");
            vol = vol.wrapping_add(2);
        }
        if old_add != new_add {
            debug!("(zombie swap)");
            vol = 16u8.wrapping_sub(vol);
        }

        self.period = new_val & 0x07;
        self.add = new_add;
        if self.running() {
            self.inc = Self::rate(self.period, sample_rate);
        }
        vol & 0x0F
    }
}

/// Channel 1 frequency sweep.
#[derive(Default, Clone, Copy, Debug)]
struct Sweep {
    shadow: u16,
    period: u8,
    negate: bool,
    shift: u8,
    counter: f32,
    inc: f32,
}

enum SweepEvent {
    Idle,
    Frequency(u16),
    Overflow,
}

impl Sweep {
    fn reload(&mut self, val: u8, freq: u16, sample_rate: f32) {
        self.shadow = freq;
        self.period = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
        // 128 Hz sweep clock divided by the period; period 0 never fires.
        // Otherwise the first tick lands on the first sample after a trigger.
        if self.period != 0 {
            self.inc = (128.0 / self.period as f32) / sample_rate;
            self.counter = 1.0f32.next_up();
        } else {
            self.inc = 0.0;
            self.counter = 0.0;
        }
    }

    fn calculate(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow.wrapping_add(delta)
        }
    }

    fn clock(&mut self) -> SweepEvent {
        let mut event = SweepEvent::Idle;
        self.counter += self.inc;
        while self.counter > 1.0 {
            self.counter -= 1.0;
            if self.shift != 0 {
                let new_freq = self.calculate();
                if new_freq > 2047 {
                    return SweepEvent::Overflow;
                }
                self.shadow = new_freq;
                event = SweepEvent::Frequency(new_freq);
            } else if self.period != 0 {
                return SweepEvent::Overflow;
            }
        }
        event
    }
}

#[derive(Clone, Copy, Debug)]
enum Oscillator {
    Square {
        duty: u8,
        duty_pos: u8,
        sweep: Option<Sweep>,
    },
    Wave {
        position: u8,
    },
    Noise {
        lfsr: u16,
        width7: bool,
        divisor: u8,
    },
}

/// One of the four sound generators.
///
/// `freq` is the 11-bit period value for the square and wave channels and the
/// NR43 clock shift for the noise channel.
#[derive(Clone, Debug)]
struct Channel {
    enabled: bool,
    powered: bool,
    left: bool,
    right: bool,
    volume: u8,
    volume_init: u8,
    /// Last NRx2 value; the trigger reloads the envelope from it.
    env_reg: u8,
    /// Last NR10 value (channel 1 only).
    sweep_reg: u8,
    freq: u16,
    phase: f32,
    phase_inc: f32,
    note: u8,
    length: LengthCounter,
    envelope: Envelope,
    capacitor: f32,
    osc: Oscillator,
}

impl Channel {
    fn new(index: usize) -> Self {
        let osc = match index {
            0 => Oscillator::Square {
                duty: 0,
                duty_pos: 0,
                sweep: Some(Sweep::default()),
            },
            1 => Oscillator::Square {
                duty: 0,
                duty_pos: 0,
                sweep: None,
            },
            2 => Oscillator::Wave { position: 0 },
            _ => Oscillator::Noise {
                lfsr: 0,
                width7: false,
                divisor: 0,
            },
        };
        Self {
            enabled: false,
            powered: false,
            left: false,
            right: false,
            volume: 0,
            volume_init: 0,
            env_reg: 0,
            sweep_reg: 0,
            freq: 0,
            phase: 0.0,
            phase_inc: 0.0,
            note: 0,
            length: LengthCounter::default(),
            envelope: Envelope::default(),
            capacitor: 0.0,
            osc,
        }
    }

    fn length_max(&self) -> u16 {
        match self.osc {
            Oscillator::Wave { .. } => 256,
            _ => 64,
        }
    }

    /// Recompute the per-sample phase increment and displayed note from `freq`.
    fn refresh_pitch(&mut self, sample_rate: f32) {
        let (cell_hz, tone_hz) = match self.osc {
            Oscillator::Square { .. } => {
                let tone = 131_072.0 / (2048 - (self.freq & 0x7FF)) as f32;
                (tone * 8.0, tone)
            }
            Oscillator::Wave { .. } => {
                let tone = 65_536.0 / (2048 - (self.freq & 0x7FF)) as f32;
                (tone * 32.0, tone)
            }
            Oscillator::Noise { divisor, .. } => {
                let hz = CPU_CLOCK_HZ / (NOISE_DIVISORS[divisor as usize] << self.freq.min(15)) as f32;
                (hz, hz)
            }
        };
        self.phase_inc = cell_hz / sample_rate;
        self.note = note_from_hz(tone_hz);
    }

    fn write(&mut self, reg: u16, val: u8, sample_rate: f32) {
        let is_wave = matches!(self.osc, Oscillator::Wave { .. });
        let is_noise = matches!(self.osc, Oscillator::Noise { .. });
        match reg {
            0 => match self.osc {
                Oscillator::Square { .. } => self.sweep_reg = val,
                Oscillator::Wave { .. } => {
                    self.powered = val & 0x80 != 0;
                    if !self.powered {
                        self.enabled = false;
                    }
                }
                Oscillator::Noise { .. } => {}
            },
            1 => {
                if let Oscillator::Square { duty, .. } = &mut self.osc {
                    *duty = val >> 6;
                }
                self.length.load = if is_wave { val as u16 } else { (val & 0x3F) as u16 };
            }
            2 if is_wave => {
                self.volume_init = (val >> 5) & 0x03;
                self.volume = self.volume_init;
            }
            2 => self.write_envelope(val, sample_rate),
            3 => {
                if let Oscillator::Noise { width7, divisor, .. } = &mut self.osc {
                    *width7 = val & 0x08 != 0;
                    *divisor = val & 0x07;
                    self.freq = (val >> 4) as u16;
                } else {
                    self.freq = (self.freq & 0x0700) | val as u16;
                }
            }
            4 => {
                if !is_noise {
                    self.freq = (self.freq & 0x00FF) | (((val & 0x07) as u16) << 8);
                }
                self.length.enabled = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.trigger(sample_rate);
                }
            }
            _ => {}
        }
    }

    fn write_envelope(&mut self, val: u8, sample_rate: f32) {
        let old_val = self.env_reg;
        self.env_reg = val;
        self.volume_init = val >> 4;
        self.powered = val & 0xF8 != 0;

        if !self.powered {
            self.enabled = false;
        } else if self.enabled {
            self.volume = self
                .envelope
                .zombie_update(self.volume, old_val, val, sample_rate);
        }
    }

    fn trigger(&mut self, sample_rate: f32) {
        self.enabled = self.powered;
        self.volume = self.volume_init;

        let env_reg = self.env_reg;
        let sweep_reg = self.sweep_reg;
        let freq = self.freq;
        match &mut self.osc {
            Oscillator::Square { sweep, .. } => {
                self.envelope.reset(env_reg, sample_rate);
                if let Some(sweep) = sweep {
                    sweep.reload(sweep_reg, freq, sample_rate);
                }
            }
            Oscillator::Wave { position } => *position = 0,
            Oscillator::Noise { lfsr, .. } => {
                self.envelope.reset(env_reg, sample_rate);
                *lfsr = 0;
            }
        }

        let max = self.length_max();
        self.length.reload(max, sample_rate);
    }

    /// Current cell level before volume scaling.
    fn level(&self, wave_ram: &[u8; 0x10]) -> f32 {
        match self.osc {
            Oscillator::Square { duty, duty_pos, .. } => {
                if DUTY_TABLE[duty as usize][duty_pos as usize] != 0 {
                    1.0
                } else {
                    -1.0
                }
            }
            Oscillator::Wave { position } => {
                if self.volume == 0 {
                    return 0.0;
                }
                let byte = wave_ram[(position / 2) as usize];
                let nibble = if position & 1 == 0 { byte >> 4 } else { byte & 0x0F };
                (nibble >> (self.volume - 1)) as f32
            }
            Oscillator::Noise { lfsr, .. } => {
                if lfsr & 1 != 0 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }

    /// Step the oscillator by one cell: duty step, wave nibble or LFSR shift.
    fn advance_cell(&mut self) {
        match &mut self.osc {
            Oscillator::Square { duty_pos, .. } => *duty_pos = (*duty_pos + 1) & 7,
            Oscillator::Wave { position } => *position = (*position + 1) & 0x1F,
            Oscillator::Noise { lfsr, width7, .. } => {
                let (hi, lo) = if *width7 { (6, 5) } else { (14, 13) };
                let bit = !((*lfsr >> hi) ^ (*lfsr >> lo)) & 1;
                *lfsr = ((*lfsr << 1) | bit) & 0x7FFF;
            }
        }
    }

    /// Advance the oscillator by one output sample and return the
    /// time-weighted average level over that sample.
    fn integrate(&mut self, wave_ram: &[u8; 0x10]) -> f32 {
        let inc = self.phase_inc;
        if inc <= 0.0 {
            return self.level(wave_ram);
        }
        let mut remaining = inc;
        let mut acc = 0.0;
        while self.phase + remaining > 1.0 {
            let step = 1.0 - self.phase;
            acc += step * self.level(wave_ram);
            remaining -= step;
            self.phase = 0.0;
            self.advance_cell();
        }
        self.phase += remaining;
        acc += remaining * self.level(wave_ram);
        acc / inc
    }

    fn clock_sweep(&mut self, sample_rate: f32) {
        let Oscillator::Square {
            sweep: Some(sweep), ..
        } = &mut self.osc
        else {
            return;
        };
        match sweep.clock() {
            SweepEvent::Idle => {}
            SweepEvent::Frequency(freq) => {
                self.freq = freq;
                self.refresh_pitch(sample_rate);
            }
            SweepEvent::Overflow => self.enabled = false,
        }
    }

    fn dc_block(&mut self, sample: f32, coef: f32) -> f32 {
        let out = sample - self.capacitor;
        self.capacitor = sample - out * coef;
        out
    }

    /// Render `out.len()` mono samples. Disabled samples are written as 0.0.
    fn render(&mut self, out: &mut [f32], wave_ram: &[u8; 0x10], sample_rate: f32, coef: f32) {
        self.refresh_pitch(sample_rate);
        if let Oscillator::Noise { .. } = self.osc
            && self.freq >= 14
        {
            // Clock shifts 14 and 15 stop the LFSR.
            self.enabled = false;
        }

        for sample in out.iter_mut() {
            *sample = 0.0;
            if self.length.clock() {
                self.enabled = false;
            }
            if !self.enabled {
                continue;
            }

            match self.osc {
                Oscillator::Square { .. } => {
                    self.envelope.clock(&mut self.volume);
                    self.clock_sweep(sample_rate);
                    if !self.enabled {
                        continue;
                    }
                    let level = self.integrate(wave_ram);
                    *sample = self.dc_block(level * (self.volume as f32 / 15.0), coef);
                }
                Oscillator::Wave { .. } => {
                    let level = self.integrate(wave_ram);
                    if self.volume > 0 {
                        let centered = level - WAVE_DC_OFFSET[self.volume as usize - 1];
                        *sample = self.dc_block(centered / 7.5, coef);
                    }
                }
                Oscillator::Noise { .. } => {
                    self.envelope.clock(&mut self.volume);
                    let level = self.integrate(wave_ram);
                    *sample = self.dc_block(level * (self.volume as f32 / 15.0), coef);
                }
            }
        }
    }
}

/// The four channels plus the stereo mixer.
pub struct Apu {
    channels: [Channel; 4],
    wave_ram: [u8; 0x10],
    regs: [u8; 0x17],
    master_on: bool,
    vol_left: f32,
    vol_right: f32,
    muted: [bool; 4],
    master_volume: f32,
    sample_rate: u32,
    hp_coef: f32,
    scope: [Vec<f32>; 4],
    buffer: Vec<f32>,
}

impl Apu {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            channels: std::array::from_fn(Channel::new),
            wave_ram: [0; 0x10],
            regs: [0; 0x17],
            master_on: false,
            vol_left: 0.0,
            vol_right: 0.0,
            muted: [false; 4],
            master_volume: 1.0,
            sample_rate,
            hp_coef: calc_hp_coef(sample_rate),
            scope: Default::default(),
            buffer: Vec::new(),
        }
    }

    /// Return every channel to its power-on state. Mute toggles and the
    /// master volume are user settings and survive.
    pub fn reset(&mut self) {
        self.channels = std::array::from_fn(Channel::new);
        self.wave_ram = [0; 0x10];
        self.regs = [0; 0x17];
        self.master_on = false;
        self.vol_left = 0.0;
        self.vol_right = 0.0;
        for s in &mut self.scope {
            s.clear();
        }
        self.buffer.fill(0.0);
    }

    /// Unused bits of each register read back as 1.
    pub fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 => 0x3F,
            0xFF12 => 0x00,
            0xFF13 => 0xFF,
            0xFF14 => 0xBF,
            0xFF16 => 0x3F,
            0xFF17 => 0x00,
            0xFF18 => 0xFF,
            0xFF19 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1B => 0xFF,
            0xFF1C => 0x9F,
            0xFF1D => 0xFF,
            0xFF1E => 0xBF,
            0xFF20 => 0xFF,
            0xFF21 => 0x00,
            0xFF22 => 0x00,
            0xFF23 => 0xBF,
            0xFF24 => 0x00,
            0xFF25 => 0x00,
            0xFF26 => 0x70,
            0xFF15 | 0xFF1F => 0xFF,
            0xFF30..=0xFF3F => 0x00,
            _ => 0xFF,
        }
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF26 => {
                let mut val = if self.master_on { 0x80 } else { 0x00 };
                for (i, ch) in self.channels.iter().enumerate() {
                    if ch.enabled {
                        val |= 1 << i;
                    }
                }
                val | Apu::read_mask(addr)
            }
            0xFF10..=0xFF25 => self.regs[(addr - 0xFF10) as usize] | Apu::read_mask(addr),
            0xFF30..=0xFF3F => self.wave_ram[(addr - 0xFF30) as usize],
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        trace!("Audio write: {addr:04X} <- {val:02X}");
        let rate = self.sample_rate as f32;
        match addr {
            0xFF10..=0xFF23 => {
                let offset = addr - 0xFF10;
                self.regs[offset as usize] = val;
                let index = (offset / 5) as usize;
                let ch = &mut self.channels[index];
                let was_enabled = ch.enabled;
                ch.write(offset % 5, val, rate);
                if offset % 5 == 4 && val & 0x80 != 0 {
                    debug!(
                        "(trigger {}{})",
                        CHANNEL_NAMES[index],
                        if was_enabled { ", retrigger" } else { "" }
                    );
                }
            }
            0xFF24 => {
                self.regs[0x14] = val;
                self.vol_left = ((val >> 4) & 0x07) as f32 / 7.0;
                self.vol_right = (val & 0x07) as f32 / 7.0;
            }
            0xFF25 => {
                self.regs[0x15] = val;
                for (i, ch) in self.channels.iter_mut().enumerate() {
                    ch.left = (val >> (4 + i)) & 1 != 0;
                    ch.right = (val >> i) & 1 != 0;
                }
            }
            0xFF26 => {
                self.master_on = val & 0x80 != 0;
                if !self.master_on {
                    for ch in &mut self.channels {
                        ch.enabled = false;
                    }
                }
            }
            0xFF30..=0xFF3F => self.wave_ram[(addr - 0xFF30) as usize] = val,
            _ => {}
        }
    }

    /// Render one period of `frames` stereo frames and return the
    /// interleaved buffer (`2 * frames` samples).
    pub fn render_period(&mut self, frames: usize) -> &[f32] {
        self.buffer.clear();
        self.buffer.resize(frames * 2, 0.0);
        let rate = self.sample_rate as f32;
        let coef = self.hp_coef;

        for (i, ch) in self.channels.iter_mut().enumerate() {
            let scope = &mut self.scope[i];
            scope.clear();
            scope.resize(frames, 0.0);
            ch.render(scope, &self.wave_ram, rate, coef);

            if self.muted[i] {
                continue;
            }
            let left = if ch.left { CHANNEL_GAIN * self.vol_left } else { 0.0 };
            let right = if ch.right { CHANNEL_GAIN * self.vol_right } else { 0.0 };
            for (frame, &s) in self.buffer.chunks_exact_mut(2).zip(scope.iter()) {
                frame[0] += s * left;
                frame[1] += s * right;
            }
        }

        for s in &mut self.buffer {
            *s *= self.master_volume;
        }
        &self.buffer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn is_muted(&self, ch: usize) -> bool {
        self.muted[ch]
    }

    pub fn set_muted(&mut self, ch: usize, muted: bool) {
        self.muted[ch] = muted;
    }

    /// Flip the mute toggle of `ch`; returns the new state.
    pub fn toggle_mute(&mut self, ch: usize) -> bool {
        self.muted[ch] = !self.muted[ch];
        self.muted[ch]
    }

    fn silent(&self, i: usize) -> bool {
        let ch = &self.channels[i];
        self.muted[i] || !ch.enabled || !ch.powered || !(ch.left || ch.right) || ch.volume == 0
    }

    /// Current note per channel, `None` while the channel is inaudible.
    pub fn notes(&self) -> [Option<u8>; 4] {
        std::array::from_fn(|i| (!self.silent(i)).then_some(self.channels[i].note))
    }

    /// Instantaneous level per channel and side: `[ch1 L, ch1 R, ch2 L, ...]`.
    ///
    /// The wave channel's level is scaled by the dynamic range of the wave
    /// table, since its volume code alone says little about loudness.
    pub fn levels(&self) -> [u8; 8] {
        let mut vol = [0u8; 8];
        for (i, ch) in self.channels.iter().enumerate() {
            vol[i * 2] = ch.volume * ch.left as u8;
            vol[i * 2 + 1] = ch.volume * ch.right as u8;
        }

        let (lo, hi) = self
            .wave_ram
            .iter()
            .flat_map(|&b| [b >> 4, b & 0x0F])
            .fold((0x0F, 0x00), |(lo, hi), n| (n.min(lo), n.max(hi)));
        let range = hi.saturating_sub(lo) as f32 / 15.0;
        for v in &mut vol[4..6] {
            if *v != 0 {
                *v = (5.0 * (4 - *v) as f32 * range) as u8;
            }
        }
        vol
    }

    /// Mono contribution of each channel during the last rendered period.
    pub fn scope(&self, ch: usize) -> &[f32] {
        &self.scope[ch]
    }

    pub fn channel_enabled(&self, ch: usize) -> bool {
        self.channels[ch].enabled
    }

    pub fn channel_volume(&self, ch: usize) -> u8 {
        self.channels[ch].volume
    }

    pub fn channel_frequency(&self, ch: usize) -> u16 {
        self.channels[ch].freq
    }

    /// Current LFSR state of the noise channel.
    pub fn noise_lfsr(&self) -> u16 {
        match self.channels[3].osc {
            Oscillator::Noise { lfsr, .. } => lfsr,
            _ => 0,
        }
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}
