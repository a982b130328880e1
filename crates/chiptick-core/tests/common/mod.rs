#![allow(dead_code)]

use chiptick_core::{
    GbsFile, Machine, MachineConfig,
    cpu::Cpu,
    gbs::{BANK_SIZE, HEADER_SIZE},
    mmu::Mmu,
};

pub const LOAD: u16 = 0x0400;
pub const STACK: u16 = 0xDFFF;
/// Scratch code area used by the CPU tests.
pub const CODE: u16 = 0xC000;

pub const RET: u8 = 0xC9;

/// `LD A,val` / `LDH (reg),A`: write `val` to an I/O register.
pub fn ldh(reg: u8, val: u8) -> [u8; 4] {
    [0x3E, val, 0xE0, reg]
}

/// Assembles a GBS file in memory. By default both init and play are a bare
/// RET at the load address.
#[derive(Clone)]
pub struct GbsBuilder {
    song_count: u8,
    start_song: u8,
    load: u16,
    init: u16,
    play: u16,
    sp: u16,
    tma: u8,
    tac: u8,
    title: String,
    image: Vec<u8>,
}

impl GbsBuilder {
    pub fn new() -> Self {
        Self {
            song_count: 1,
            start_song: 1,
            load: LOAD,
            init: LOAD,
            play: LOAD + 1,
            sp: STACK,
            tma: 0,
            tac: 0,
            title: String::new(),
            image: vec![RET, RET],
        }
    }

    pub fn songs(mut self, count: u8, start: u8) -> Self {
        self.song_count = count;
        self.start_song = start;
        self
    }

    pub fn timer(mut self, tma: u8, tac: u8) -> Self {
        self.tma = tma;
        self.tac = tac;
        self
    }

    pub fn entry(mut self, init: u16, play: u16) -> Self {
        self.init = init;
        self.play = play;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Place `bytes` at absolute address `addr` in the 0x0000-0x7FFF view
    /// (banks 0 and 1).
    pub fn code(self, addr: u16, bytes: &[u8]) -> Self {
        let index = (addr - self.load) as usize;
        self.place(index, bytes)
    }

    /// Place `bytes` at `offset` into ROM bank `bank`.
    pub fn bank_data(self, bank: usize, offset: usize, bytes: &[u8]) -> Self {
        let index = bank * BANK_SIZE + offset - self.load as usize;
        self.place(index, bytes)
    }

    fn place(mut self, index: usize, bytes: &[u8]) -> Self {
        if self.image.len() < index + bytes.len() {
            self.image.resize(index + bytes.len(), 0);
        }
        self.image[index..index + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..3].copy_from_slice(b"GBS");
        data[0x03] = 1;
        data[0x04] = self.song_count;
        data[0x05] = self.start_song;
        data[0x06..0x08].copy_from_slice(&self.load.to_le_bytes());
        data[0x08..0x0A].copy_from_slice(&self.init.to_le_bytes());
        data[0x0A..0x0C].copy_from_slice(&self.play.to_le_bytes());
        data[0x0C..0x0E].copy_from_slice(&self.sp.to_le_bytes());
        data[0x0E] = self.tma;
        data[0x0F] = self.tac;
        let title = self.title.as_bytes();
        data[0x10..0x10 + title.len()].copy_from_slice(title);
        data.extend_from_slice(&self.image);
        data
    }

    pub fn file(&self) -> GbsFile {
        GbsFile::load(&self.bytes()).unwrap()
    }

    pub fn machine(&self) -> Machine {
        self.machine_with(MachineConfig::default())
    }

    pub fn machine_with(&self, config: MachineConfig) -> Machine {
        Machine::new(self.file(), config).unwrap()
    }
}

/// A CPU about to execute `code` from RAM.
pub fn cpu_with_code(code: &[u8]) -> (Cpu, Mmu) {
    let mut mmu = Mmu::new(&GbsBuilder::new().file(), 48_000);
    mmu.reset_memory();
    for (i, &b) in code.iter().enumerate() {
        mmu.write_byte(CODE + i as u16, b);
    }
    let mut cpu = Cpu::new();
    cpu.regs.pc = CODE;
    cpu.regs.sp = 0xDFF0;
    (cpu, mmu)
}
