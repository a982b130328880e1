use log::{trace, warn};

use crate::{
    apu::Apu,
    gbs::{BANK_SIZE, Bank, GbsFile, MAX_BANKS},
    timer::TickRate,
};

/// Bytes starting at the load address that are mirrored to 0x0000 on restart,
/// covering the RST and interrupt vectors.
pub const VECTOR_AREA: usize = 0x62;

/// Flat 64KB address space seen by the CPU.
///
/// The switchable window 0x4000-0x7FFF is a copy of the selected bank, not a
/// pointer into it: writes to the bank-select range copy the whole bank in.
pub struct Mmu {
    mem: Box<[u8; 0x10000]>,
    banks: Vec<Option<Bank>>,
    current_bank: usize,
    pub apu: Apu,
    pub rate: TickRate,
}

impl Mmu {
    pub fn new(file: &GbsFile, sample_rate: u32) -> Self {
        Self {
            mem: Box::new([0; 0x10000]),
            banks: file.banks().to_vec(),
            current_bank: 1,
            apu: Apu::new(sample_rate),
            rate: TickRate::new(sample_rate),
        }
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0xFF06 | 0xFF07 => self.rate.read(addr),
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            _ => self.mem[addr as usize],
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x2000..=0x3FFF => self.switch_bank(val as usize),
            0x0000..=0x7FFF => trace!("Ignored ROM write: {addr:04X} <- {val:02X}"),
            0xFF06 | 0xFF07 => {
                trace!("Timer write: {addr:04X} <- {val:02X}");
                self.rate.write(addr, val);
            }
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF0F | 0xFFFF => {
                trace!("Interrupt register write: {addr:04X} <- {val:02X}");
                self.mem[addr as usize] = val;
            }
            _ => self.mem[addr as usize] = val,
        }
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }

    pub fn write_word(&mut self, addr: u16, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    /// Copy bank `n` into the switchable window. Requests for bank 0, banks
    /// past the end of the image and absent banks are ignored.
    pub fn switch_bank(&mut self, n: usize) {
        if n == 0 || n >= MAX_BANKS {
            trace!("Ignored bank switch to {n}");
            return;
        }
        let Some(Some(bank)) = self.banks.get(n) else {
            warn!("Ignored bank switch to unmapped bank {n}");
            return;
        };
        self.mem[BANK_SIZE..BANK_SIZE * 2].copy_from_slice(&bank[..]);
        self.current_bank = n;
        trace!("Bank {n} mapped");
    }

    pub fn current_bank(&self) -> usize {
        self.current_bank
    }

    /// Rebuild the address space for a fresh track: banks 0 and 1 mapped,
    /// everything from 0x8000 up cleared.
    pub fn reset_memory(&mut self) {
        for (slot, window) in [(0, 0..BANK_SIZE), (1, BANK_SIZE..BANK_SIZE * 2)] {
            match self.banks.get(slot).and_then(|b| b.as_deref()) {
                Some(bank) => self.mem[window].copy_from_slice(bank),
                None => self.mem[window].fill(0),
            }
        }
        self.current_bank = 1;
        self.mem[0x8000..].fill(0);
    }

    /// Mirror the first [`VECTOR_AREA`] bytes at `load_addr` down to 0x0000,
    /// so drivers that call the fixed vectors land in their own code.
    pub fn mirror_vectors(&mut self, load_addr: u16) {
        let start = load_addr as usize;
        let end = (start + VECTOR_AREA).min(self.mem.len());
        self.mem.copy_within(start..end, 0);
    }

    /// Raw view of the address space, bypassing I/O redirection.
    pub fn memory(&self) -> &[u8; 0x10000] {
        &self.mem
    }
}
