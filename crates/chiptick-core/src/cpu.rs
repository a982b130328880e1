#[cfg(feature = "cpu-trace")]
use log::trace;

use crate::mmu::Mmu;
use crate::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z, Registers};

/// 8-bit operand selected by a 3-bit opcode field. `HlInd` is the byte at (HL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg8 {
    B,
    C,
    D,
    E,
    H,
    L,
    HlInd,
    A,
}

impl Reg8 {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Reg8::B,
            1 => Reg8::C,
            2 => Reg8::D,
            3 => Reg8::E,
            4 => Reg8::H,
            5 => Reg8::L,
            6 => Reg8::HlInd,
            _ => Reg8::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
    BC,
    DE,
    HL,
    SP,
}

impl Reg16 {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Reg16::BC,
            1 => Reg16::DE,
            2 => Reg16::HL,
            _ => Reg16::SP,
        }
    }
}

/// Register pairs addressable by PUSH/POP, where AF replaces SP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPair {
    BC,
    DE,
    HL,
    AF,
}

impl StackPair {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => StackPair::BC,
            1 => StackPair::DE,
            2 => StackPair::HL,
            _ => StackPair::AF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    NZ,
    Z,
    NC,
    C,
}

impl Cond {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Cond::NZ,
            1 => Cond::Z,
            2 => Cond::NC,
            _ => Cond::C,
        }
    }
}

/// Accumulator operations of the 0x80-0xBF block and their immediate forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

impl AluOp {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => AluOp::Add,
            1 => AluOp::Adc,
            2 => AluOp::Sub,
            3 => AluOp::Sbc,
            4 => AluOp::And,
            5 => AluOp::Xor,
            6 => AluOp::Or,
            _ => AluOp::Cp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotOp {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
}

impl RotOp {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => RotOp::Rlc,
            1 => RotOp::Rrc,
            2 => RotOp::Rl,
            3 => RotOp::Rr,
            4 => RotOp::Sla,
            5 => RotOp::Sra,
            6 => RotOp::Swap,
            _ => RotOp::Srl,
        }
    }
}

/// Operation of a CB-prefixed opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbOp {
    Rot(RotOp),
    Bit(u8),
    Res(u8),
    Set(u8),
}

/// Memory operand of the `LD (rr),A` / `LD A,(rr)` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indirect {
    BC,
    DE,
    HLInc,
    HLDec,
}

/// One decoded instruction with its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,
    /// Opcodes with no defined behavior; executed as a one-byte no-op.
    Undefined(u8),
    Ld(Reg8, Reg8),
    LdImm(Reg8, u8),
    LdImm16(Reg16, u16),
    StoreA(Indirect),
    LoadA(Indirect),
    StoreSp(u16),
    StoreAAbs(u16),
    LoadAAbs(u16),
    /// `LDH (n),A`
    StoreHigh(u8),
    /// `LDH A,(n)`
    LoadHigh(u8),
    /// `LD (C),A`
    StoreHighC,
    /// `LD A,(C)`
    LoadHighC,
    LdSpHl,
    LdHlSpOffset(i8),
    AddSp(i8),
    Inc(Reg8),
    Dec(Reg8),
    Inc16(Reg16),
    Dec16(Reg16),
    AddHl(Reg16),
    Alu(AluOp, Reg8),
    AluImm(AluOp, u8),
    Rlca,
    Rrca,
    Rla,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,
    Cb(CbOp, Reg8),
    Jp(Option<Cond>, u16),
    JpHl,
    Jr(Option<Cond>, i8),
    Call(Option<Cond>, u16),
    Ret(Option<Cond>),
    Reti,
    Push(StackPair),
    Pop(StackPair),
    /// Restart to vector `n * 8`, relative to the CPU's vector base.
    Rst(u8),
}

/// Decode the instruction at `pc`. Returns it with its encoded length.
pub fn decode(mmu: &Mmu, pc: u16) -> (Instruction, u16) {
    use Instruction::*;

    let op = mmu.read_byte(pc);
    let n8 = || mmu.read_byte(pc.wrapping_add(1));
    let n16 = || mmu.read_word(pc.wrapping_add(1));

    let x = op >> 6;
    let y = (op >> 3) & 0x07;
    let z = op & 0x07;
    let p = y >> 1;
    let q = y & 1;

    match (x, z) {
        (0, 0) => match y {
            0 => (Nop, 1),
            1 => (StoreSp(n16()), 3),
            2 => (Stop, 2),
            3 => (Jr(None, n8() as i8), 2),
            _ => (Jr(Some(Cond::from_bits(y - 4)), n8() as i8), 2),
        },
        (0, 1) if q == 0 => (LdImm16(Reg16::from_bits(p), n16()), 3),
        (0, 1) => (AddHl(Reg16::from_bits(p)), 1),
        (0, 2) => {
            let ind = match p {
                0 => Indirect::BC,
                1 => Indirect::DE,
                2 => Indirect::HLInc,
                _ => Indirect::HLDec,
            };
            if q == 0 { (StoreA(ind), 1) } else { (LoadA(ind), 1) }
        }
        (0, 3) if q == 0 => (Inc16(Reg16::from_bits(p)), 1),
        (0, 3) => (Dec16(Reg16::from_bits(p)), 1),
        (0, 4) => (Inc(Reg8::from_bits(y)), 1),
        (0, 5) => (Dec(Reg8::from_bits(y)), 1),
        (0, 6) => (LdImm(Reg8::from_bits(y), n8()), 2),
        (0, _) => {
            let ins = match y {
                0 => Rlca,
                1 => Rrca,
                2 => Rla,
                3 => Rra,
                4 => Daa,
                5 => Cpl,
                6 => Scf,
                _ => Ccf,
            };
            (ins, 1)
        }
        (1, 6) if y == 6 => (Halt, 1),
        (1, _) => (Ld(Reg8::from_bits(y), Reg8::from_bits(z)), 1),
        (2, _) => (Alu(AluOp::from_bits(y), Reg8::from_bits(z)), 1),
        (_, 0) => match y {
            0..=3 => (Ret(Some(Cond::from_bits(y))), 1),
            4 => (StoreHigh(n8()), 2),
            5 => (AddSp(n8() as i8), 2),
            6 => (LoadHigh(n8()), 2),
            _ => (LdHlSpOffset(n8() as i8), 2),
        },
        (_, 1) if q == 0 => (Pop(StackPair::from_bits(p)), 1),
        (_, 1) => match p {
            0 => (Ret(None), 1),
            1 => (Reti, 1),
            2 => (JpHl, 1),
            _ => (LdSpHl, 1),
        },
        (_, 2) => match y {
            0..=3 => (Jp(Some(Cond::from_bits(y)), n16()), 3),
            4 => (StoreHighC, 1),
            5 => (StoreAAbs(n16()), 3),
            6 => (LoadHighC, 1),
            _ => (LoadAAbs(n16()), 3),
        },
        (_, 3) => match y {
            0 => (Jp(None, n16()), 3),
            1 => (decode_cb(n8()), 2),
            6 => (Di, 1),
            7 => (Ei, 1),
            _ => (Undefined(op), 1),
        },
        (_, 4) if y < 4 => (Call(Some(Cond::from_bits(y)), n16()), 3),
        (_, 4) => (Undefined(op), 1),
        (_, 5) if q == 0 => (Push(StackPair::from_bits(p)), 1),
        (_, 5) if p == 0 => (Call(None, n16()), 3),
        (_, 5) => (Undefined(op), 1),
        (_, 6) => (AluImm(AluOp::from_bits(y), n8()), 2),
        (_, _) => (Rst(y), 1),
    }
}

fn decode_cb(op: u8) -> Instruction {
    let r = Reg8::from_bits(op);
    let y = (op >> 3) & 0x07;
    let cb = match op >> 6 {
        0 => CbOp::Rot(RotOp::from_bits(y)),
        1 => CbOp::Bit(y),
        2 => CbOp::Res(y),
        _ => CbOp::Set(y),
    };
    Instruction::Cb(cb, r)
}

/// Interpreter for the music driver's code.
///
/// There is no interrupt dispatch and no cycle counting: DI/EI/HALT are
/// no-ops and the frame driver decides when the CPU runs.
#[derive(Debug, Default, Clone)]
pub struct Cpu {
    pub regs: Registers,
    /// Base of the RST vectors. GBS images relocate them to the load address.
    pub rst_base: u16,
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one instruction. Returns true if it was a return that was taken.
    pub fn step(&mut self, mmu: &mut Mmu) -> bool {
        let (ins, len) = decode(mmu, self.regs.pc);
        #[cfg(feature = "cpu-trace")]
        trace!("{:04X}: {:?}  {}", self.regs.pc, ins, self.regs.debug_state());
        self.regs.pc = self.regs.pc.wrapping_add(len);
        self.execute(mmu, ins)
    }

    fn read_r8(&self, mmu: &Mmu, r: Reg8) -> u8 {
        match r {
            Reg8::B => self.regs.b,
            Reg8::C => self.regs.c,
            Reg8::D => self.regs.d,
            Reg8::E => self.regs.e,
            Reg8::H => self.regs.h,
            Reg8::L => self.regs.l,
            Reg8::HlInd => mmu.read_byte(self.regs.hl()),
            Reg8::A => self.regs.a,
        }
    }

    fn write_r8(&mut self, mmu: &mut Mmu, r: Reg8, val: u8) {
        match r {
            Reg8::B => self.regs.b = val,
            Reg8::C => self.regs.c = val,
            Reg8::D => self.regs.d = val,
            Reg8::E => self.regs.e = val,
            Reg8::H => self.regs.h = val,
            Reg8::L => self.regs.l = val,
            Reg8::HlInd => mmu.write_byte(self.regs.hl(), val),
            Reg8::A => self.regs.a = val,
        }
    }

    fn read_r16(&self, r: Reg16) -> u16 {
        match r {
            Reg16::BC => self.regs.bc(),
            Reg16::DE => self.regs.de(),
            Reg16::HL => self.regs.hl(),
            Reg16::SP => self.regs.sp,
        }
    }

    fn write_r16(&mut self, r: Reg16, val: u16) {
        match r {
            Reg16::BC => self.regs.set_bc(val),
            Reg16::DE => self.regs.set_de(val),
            Reg16::HL => self.regs.set_hl(val),
            Reg16::SP => self.regs.sp = val,
        }
    }

    fn indirect_addr(&mut self, ind: Indirect) -> u16 {
        match ind {
            Indirect::BC => self.regs.bc(),
            Indirect::DE => self.regs.de(),
            Indirect::HLInc => {
                let hl = self.regs.hl();
                self.regs.set_hl(hl.wrapping_add(1));
                hl
            }
            Indirect::HLDec => {
                let hl = self.regs.hl();
                self.regs.set_hl(hl.wrapping_sub(1));
                hl
            }
        }
    }

    fn condition(&self, cond: Option<Cond>) -> bool {
        match cond {
            None => true,
            Some(Cond::NZ) => !self.regs.flag(FLAG_Z),
            Some(Cond::Z) => self.regs.flag(FLAG_Z),
            Some(Cond::NC) => !self.regs.flag(FLAG_C),
            Some(Cond::C) => self.regs.flag(FLAG_C),
        }
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        mmu.write_word(self.regs.sp, val);
    }

    fn pop_stack(&mut self, mmu: &Mmu) -> u16 {
        let val = mmu.read_word(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        val
    }

    fn alu(&mut self, op: AluOp, val: u8) {
        let a = self.regs.a;
        match op {
            AluOp::Add | AluOp::Adc => {
                let carry = if op == AluOp::Adc { self.regs.carry() } else { 0 };
                let sum = a as u16 + val as u16 + carry as u16;
                let res = sum as u8;
                self.regs.f = if res == 0 { FLAG_Z } else { 0 }
                    | if (a & 0x0F) + (val & 0x0F) + carry > 0x0F {
                        FLAG_H
                    } else {
                        0
                    }
                    | if sum > 0xFF { FLAG_C } else { 0 };
                self.regs.a = res;
            }
            AluOp::Sub | AluOp::Sbc | AluOp::Cp => {
                let carry = if op == AluOp::Sbc { self.regs.carry() } else { 0 };
                let res = a.wrapping_sub(val).wrapping_sub(carry);
                self.regs.f = if res == 0 { FLAG_Z } else { 0 }
                    | FLAG_N
                    | if (a & 0x0F) < (val & 0x0F) + carry {
                        FLAG_H
                    } else {
                        0
                    }
                    | if (a as u16) < val as u16 + carry as u16 {
                        FLAG_C
                    } else {
                        0
                    };
                if op != AluOp::Cp {
                    self.regs.a = res;
                }
            }
            AluOp::And => {
                self.regs.a &= val;
                self.regs.f = if self.regs.a == 0 { FLAG_Z } else { 0 } | FLAG_H;
            }
            AluOp::Xor => {
                self.regs.a ^= val;
                self.regs.f = if self.regs.a == 0 { FLAG_Z } else { 0 };
            }
            AluOp::Or => {
                self.regs.a |= val;
                self.regs.f = if self.regs.a == 0 { FLAG_Z } else { 0 };
            }
        }
    }

    /// Shared by `ADD SP,e` and `LD HL,SP+e`: flags come from the unsigned
    /// low byte addition and Z/N are cleared.
    fn sp_offset(&mut self, offset: i8) -> u16 {
        let sp = self.regs.sp;
        let val = offset as i16 as u16;
        self.regs.f = if (sp & 0x0F) + (val & 0x0F) > 0x0F {
            FLAG_H
        } else {
            0
        } | if (sp & 0xFF) + (val & 0xFF) > 0xFF {
            FLAG_C
        } else {
            0
        };
        sp.wrapping_add(val)
    }

    fn rotate(&mut self, op: RotOp, val: u8) -> u8 {
        let carry_in = self.regs.carry();
        let (res, carry_out) = match op {
            RotOp::Rlc => (val.rotate_left(1), val & 0x80 != 0),
            RotOp::Rrc => (val.rotate_right(1), val & 0x01 != 0),
            RotOp::Rl => ((val << 1) | carry_in, val & 0x80 != 0),
            RotOp::Rr => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
            RotOp::Sla => (val << 1, val & 0x80 != 0),
            RotOp::Sra => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            RotOp::Swap => (val.rotate_left(4), false),
            RotOp::Srl => (val >> 1, val & 0x01 != 0),
        };
        self.regs.f = if res == 0 { FLAG_Z } else { 0 } | if carry_out { FLAG_C } else { 0 };
        res
    }

    fn daa(&mut self) {
        let mut correction = 0u8;
        let mut carry = false;
        let f = self.regs.f;
        if f & FLAG_H != 0 || (f & FLAG_N == 0 && (self.regs.a & 0x0F) > 9) {
            correction |= 0x06;
        }
        if f & FLAG_C != 0 || (f & FLAG_N == 0 && self.regs.a > 0x99) {
            correction |= 0x60;
            carry = true;
        }
        if f & FLAG_N == 0 {
            self.regs.a = self.regs.a.wrapping_add(correction);
        } else {
            self.regs.a = self.regs.a.wrapping_sub(correction);
        }
        self.regs.f = if self.regs.a == 0 { FLAG_Z } else { 0 }
            | (f & FLAG_N)
            | if carry { FLAG_C } else { 0 };
    }

    fn execute(&mut self, mmu: &mut Mmu, ins: Instruction) -> bool {
        use Instruction::*;

        match ins {
            Nop | Stop | Halt | Di | Ei | Undefined(_) => {}
            Ld(dst, src) => {
                let val = self.read_r8(mmu, src);
                self.write_r8(mmu, dst, val);
            }
            LdImm(dst, val) => self.write_r8(mmu, dst, val),
            LdImm16(dst, val) => self.write_r16(dst, val),
            StoreA(ind) => {
                let addr = self.indirect_addr(ind);
                mmu.write_byte(addr, self.regs.a);
            }
            LoadA(ind) => {
                let addr = self.indirect_addr(ind);
                self.regs.a = mmu.read_byte(addr);
            }
            StoreSp(addr) => mmu.write_word(addr, self.regs.sp),
            StoreAAbs(addr) => mmu.write_byte(addr, self.regs.a),
            LoadAAbs(addr) => self.regs.a = mmu.read_byte(addr),
            StoreHigh(n) => mmu.write_byte(0xFF00 | n as u16, self.regs.a),
            LoadHigh(n) => self.regs.a = mmu.read_byte(0xFF00 | n as u16),
            StoreHighC => mmu.write_byte(0xFF00 | self.regs.c as u16, self.regs.a),
            LoadHighC => self.regs.a = mmu.read_byte(0xFF00 | self.regs.c as u16),
            LdSpHl => self.regs.sp = self.regs.hl(),
            LdHlSpOffset(offset) => {
                let res = self.sp_offset(offset);
                self.regs.set_hl(res);
            }
            AddSp(offset) => self.regs.sp = self.sp_offset(offset),
            Inc(r) => {
                let val = self.read_r8(mmu, r);
                let res = val.wrapping_add(1);
                self.regs.f = (self.regs.f & FLAG_C)
                    | if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x0F == 0x0F { FLAG_H } else { 0 };
                self.write_r8(mmu, r, res);
            }
            Dec(r) => {
                let val = self.read_r8(mmu, r);
                let res = val.wrapping_sub(1);
                self.regs.f = (self.regs.f & FLAG_C)
                    | FLAG_N
                    | if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x0F == 0 { FLAG_H } else { 0 };
                self.write_r8(mmu, r, res);
            }
            Inc16(r) => self.write_r16(r, self.read_r16(r).wrapping_add(1)),
            Dec16(r) => self.write_r16(r, self.read_r16(r).wrapping_sub(1)),
            AddHl(r) => {
                let hl = self.regs.hl();
                let val = self.read_r16(r);
                self.regs.f = (self.regs.f & FLAG_Z)
                    | if (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF {
                        FLAG_H
                    } else {
                        0
                    }
                    | if hl as u32 + val as u32 > 0xFFFF {
                        FLAG_C
                    } else {
                        0
                    };
                self.regs.set_hl(hl.wrapping_add(val));
            }
            Alu(op, r) => {
                let val = self.read_r8(mmu, r);
                self.alu(op, val);
            }
            AluImm(op, val) => self.alu(op, val),
            Rlca | Rrca | Rla | Rra => {
                let op = match ins {
                    Rlca => RotOp::Rlc,
                    Rrca => RotOp::Rrc,
                    Rla => RotOp::Rl,
                    _ => RotOp::Rr,
                };
                self.regs.a = self.rotate(op, self.regs.a);
                // The accumulator forms always clear Z.
                self.regs.f &= FLAG_C;
            }
            Daa => self.daa(),
            Cpl => {
                self.regs.a = !self.regs.a;
                self.regs.f |= FLAG_N | FLAG_H;
            }
            Scf => self.regs.f = (self.regs.f & FLAG_Z) | FLAG_C,
            Ccf => self.regs.f = (self.regs.f & FLAG_Z) | ((self.regs.f & FLAG_C) ^ FLAG_C),
            Cb(op, r) => {
                let val = self.read_r8(mmu, r);
                match op {
                    CbOp::Rot(rot) => {
                        let res = self.rotate(rot, val);
                        self.write_r8(mmu, r, res);
                    }
                    CbOp::Bit(bit) => {
                        self.regs.f = (self.regs.f & FLAG_C)
                            | FLAG_H
                            | if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
                    }
                    CbOp::Res(bit) => self.write_r8(mmu, r, val & !(1 << bit)),
                    CbOp::Set(bit) => self.write_r8(mmu, r, val | (1 << bit)),
                }
            }
            Jp(cond, addr) => {
                if self.condition(cond) {
                    self.regs.pc = addr;
                }
            }
            JpHl => self.regs.pc = self.regs.hl(),
            Jr(cond, offset) => {
                if self.condition(cond) {
                    self.regs.pc = self.regs.pc.wrapping_add(offset as i16 as u16);
                }
            }
            Call(cond, addr) => {
                if self.condition(cond) {
                    self.push_stack(mmu, self.regs.pc);
                    self.regs.pc = addr;
                }
            }
            Ret(cond) => {
                if self.condition(cond) {
                    self.regs.pc = self.pop_stack(mmu);
                    return true;
                }
            }
            Reti => {
                self.regs.pc = self.pop_stack(mmu);
                return true;
            }
            Push(pair) => {
                let val = match pair {
                    StackPair::BC => self.regs.bc(),
                    StackPair::DE => self.regs.de(),
                    StackPair::HL => self.regs.hl(),
                    StackPair::AF => self.regs.af(),
                };
                self.push_stack(mmu, val);
            }
            Pop(pair) => {
                let val = self.pop_stack(mmu);
                match pair {
                    StackPair::BC => self.regs.set_bc(val),
                    StackPair::DE => self.regs.set_de(val),
                    StackPair::HL => self.regs.set_hl(val),
                    StackPair::AF => self.regs.set_af(val),
                }
            }
            Rst(n) => {
                self.push_stack(mmu, self.regs.pc);
                self.regs.pc = self.rst_base.wrapping_add(n as u16 * 8);
            }
        }
        false
    }
}
