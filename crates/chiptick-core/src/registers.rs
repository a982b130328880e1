// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
pub const FLAG_Z: u8 = 0x80; // Zero
pub const FLAG_N: u8 = 0x40; // Subtract
pub const FLAG_H: u8 = 0x20; // Half Carry
pub const FLAG_C: u8 = 0x10; // Carry

/// Eight 8-bit registers plus SP and PC. The 8-bit registers pair up into
/// AF, BC, DE and HL with the first register as the high byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    pub fn af(&self) -> u16 {
        ((self.a as u16) << 8) | self.f as u16
    }

    /// The low nibble of F does not exist in hardware and always reads 0.
    pub fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = (val as u8) & 0xF0;
    }

    pub fn bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    pub fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    pub fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    pub fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    #[inline]
    pub fn flag(&self, mask: u8) -> bool {
        self.f & mask != 0
    }

    #[inline]
    pub fn carry(&self) -> u8 {
        (self.f & FLAG_C != 0) as u8
    }

    /// Formatted register state for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X}",
            self.af(),
            self.bc(),
            self.de(),
            self.hl(),
            self.pc,
            self.sp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_views_share_storage() {
        let mut r = Registers::default();
        r.set_bc(0x1234);
        assert_eq!((r.b, r.c), (0x12, 0x34));
        r.e = 0xCD;
        r.d = 0xAB;
        assert_eq!(r.de(), 0xABCD);
        r.set_hl(0xFFEE);
        r.l = 0x00;
        assert_eq!(r.hl(), 0xFF00);
    }

    #[test]
    fn af_masks_low_flag_bits() {
        let mut r = Registers::default();
        r.set_af(0x12FF);
        assert_eq!(r.a, 0x12);
        assert_eq!(r.f, 0xF0);
        assert_eq!(r.af(), 0x12F0);
        assert!(r.flag(FLAG_Z) && r.flag(FLAG_C));
        assert_eq!(r.carry(), 1);
    }
}
