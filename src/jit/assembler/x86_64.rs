//! x86-64 (System V) back-end.
//!
//! The first six helper arguments travel in `rdi, rsi, rdx, rcx, r8, r9`.
//! `r14` holds the execution context and `r10` is the scratch register; both
//! survive the standard prologue without explicit saves (`r14` is
//! callee-saved, `r10` is only live between two instructions).

use super::{CodeBuffer, FpReg, Mem, PatchSite, Reg, TargetAssembler};

pub const RAX: Reg = Reg(0);
pub const RCX: Reg = Reg(1);
pub const RDX: Reg = Reg(2);
pub const RSP: Reg = Reg(4);
pub const RBP: Reg = Reg(5);
pub const RSI: Reg = Reg(6);
pub const RDI: Reg = Reg(7);
pub const R8: Reg = Reg(8);
pub const R9: Reg = Reg(9);
pub const R10: Reg = Reg(10);
pub const R14: Reg = Reg(14);
pub const XMM0: FpReg = FpReg(0);

pub struct X86_64Assembler {
    buffer: CodeBuffer,
}

impl X86_64Assembler {
    /// REX prefix. `w` selects 64-bit operand size; `r` and `b` extend the
    /// ModRM reg and r/m fields.
    fn rex(&mut self, w: bool, r: Reg, b: Reg) {
        let mut rex = 0x40u8;
        if w {
            rex |= 0x08;
        }
        if r.0 >= 8 {
            rex |= 0x04;
        }
        if b.0 >= 8 {
            rex |= 0x01;
        }
        if rex != 0x40 || w {
            self.buffer.emit_u8(rex);
        }
    }

    fn rex_opt(&mut self, w: bool, r: Reg, b: Reg) {
        // Emit only when needed for 32-bit forms.
        let mut rex = 0x40u8;
        if w {
            rex |= 0x08;
        }
        if r.0 >= 8 {
            rex |= 0x04;
        }
        if b.0 >= 8 {
            rex |= 0x01;
        }
        if rex != 0x40 {
            self.buffer.emit_u8(rex);
        }
    }

    fn modrm(&mut self, md: u8, reg: Reg, rm: Reg) {
        self.buffer
            .emit_u8(md << 6 | (reg.0 & 7) << 3 | (rm.0 & 7));
    }

    /// ModRM + SIB + displacement for a base+offset operand.
    fn mem_operand(&mut self, reg: Reg, mem: Mem) {
        let base = mem.base;
        let needs_disp8 = (-128..=127).contains(&mem.offset);
        // rbp/r13 as base always needs a displacement; rsp/r12 needs a SIB.
        let md = if mem.offset == 0 && (base.0 & 7) != 5 {
            0
        } else if needs_disp8 {
            1
        } else {
            2
        };
        self.modrm(md, reg, base);
        if (base.0 & 7) == 4 {
            // SIB: scale 0, no index (0b100), base.
            self.buffer.emit_u8(0x24);
        }
        if md == 1 {
            self.buffer.emit_u8(mem.offset as i8 as u8);
        } else if md == 2 {
            self.buffer.emit_u32(mem.offset as u32);
        }
    }
}

impl TargetAssembler for X86_64Assembler {
    const REGISTER_SIZE: usize = 8;
    const REGISTER_ARGUMENT_COUNT: usize = 6;
    const VALUE_FITS_IN_REGISTER: bool = true;

    const STACK_FRAME_REGISTER: Reg = RBP;
    const STACK_POINTER_REGISTER: Reg = RSP;
    const CONTEXT_REGISTER: Reg = R14;
    const RETURN_VALUE_REGISTER: Reg = RAX;
    const SCRATCH_REGISTER: Reg = R10;
    const FP_SCRATCH: FpReg = XMM0;
    const CALLEE_SAVED: &'static [Reg] = &[];

    fn register_for_argument(index: usize) -> Reg {
        const REGS: [Reg; 6] = [RDI, RSI, RDX, RCX, R8, R9];
        REGS[index]
    }

    fn new() -> Self {
        X86_64Assembler {
            buffer: CodeBuffer::new(),
        }
    }

    fn buffer(&self) -> &CodeBuffer {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buffer
    }

    fn finalize(self) -> Vec<u8> {
        self.buffer.into_bytes()
    }

    fn move_reg(&mut self, src: Reg, dst: Reg) {
        self.rex(true, src, dst);
        self.buffer.emit_u8(0x89);
        self.modrm(3, src, dst);
    }

    fn move_imm32(&mut self, imm: i32, dst: Reg) {
        // movl: zero-extends into the full register.
        self.rex_opt(false, Reg(0), dst);
        self.buffer.emit_u8(0xB8 | (dst.0 & 7));
        self.buffer.emit_u32(imm as u32);
    }

    fn move_imm_ptr(&mut self, imm: usize, dst: Reg) {
        self.rex(true, Reg(0), dst);
        self.buffer.emit_u8(0xB8 | (dst.0 & 7));
        self.buffer.emit_u64(imm as u64);
    }

    fn load_ptr(&mut self, src: Mem, dst: Reg) {
        self.load64(src, dst);
    }

    fn store_ptr(&mut self, src: Reg, dst: Mem) {
        self.store64(src, dst);
    }

    fn load32(&mut self, src: Mem, dst: Reg) {
        self.rex_opt(false, dst, src.base);
        self.buffer.emit_u8(0x8B);
        self.mem_operand(dst, src);
    }

    fn store32(&mut self, src: Reg, dst: Mem) {
        self.rex_opt(false, src, dst.base);
        self.buffer.emit_u8(0x89);
        self.mem_operand(src, dst);
    }

    fn load64(&mut self, src: Mem, dst: Reg) {
        self.rex(true, dst, src.base);
        self.buffer.emit_u8(0x8B);
        self.mem_operand(dst, src);
    }

    fn store64(&mut self, src: Reg, dst: Mem) {
        self.rex(true, src, dst.base);
        self.buffer.emit_u8(0x89);
        self.mem_operand(src, dst);
    }

    fn load_double(&mut self, src: Mem, dst: FpReg) {
        self.buffer.emit_u8(0xF2);
        self.rex_opt(false, Reg(dst.0), src.base);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x10);
        self.mem_operand(Reg(dst.0), src);
    }

    fn store_double(&mut self, src: FpReg, dst: Mem) {
        self.buffer.emit_u8(0xF2);
        self.rex_opt(false, Reg(src.0), dst.base);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x11);
        self.mem_operand(Reg(src.0), dst);
    }

    fn lea(&mut self, src: Mem, dst: Reg) {
        self.rex(true, dst, src.base);
        self.buffer.emit_u8(0x8D);
        self.mem_operand(dst, src);
    }

    fn add_ptr_imm(&mut self, imm: i32, reg: Reg) {
        self.rex(true, Reg(0), reg);
        if (-128..=127).contains(&imm) {
            self.buffer.emit_u8(0x83);
            self.modrm(3, Reg(0), reg);
            self.buffer.emit_u8(imm as i8 as u8);
        } else {
            self.buffer.emit_u8(0x81);
            self.modrm(3, Reg(0), reg);
            self.buffer.emit_u32(imm as u32);
        }
    }

    fn sub_ptr_imm(&mut self, imm: i32, reg: Reg) {
        self.rex(true, Reg(5), reg);
        if (-128..=127).contains(&imm) {
            self.buffer.emit_u8(0x83);
            self.modrm(3, Reg(5), reg);
            self.buffer.emit_u8(imm as i8 as u8);
        } else {
            self.buffer.emit_u8(0x81);
            self.modrm(3, Reg(5), reg);
            self.buffer.emit_u32(imm as u32);
        }
    }

    fn zero_reg(&mut self, reg: Reg) {
        // xorl reg, reg also clears the high half.
        self.rex_opt(false, reg, reg);
        self.buffer.emit_u8(0x31);
        self.modrm(3, reg, reg);
    }

    fn push_reg(&mut self, reg: Reg) {
        self.rex_opt(false, Reg(0), reg);
        self.buffer.emit_u8(0x50 | (reg.0 & 7));
    }

    fn pop_reg(&mut self, reg: Reg) {
        self.rex_opt(false, Reg(0), reg);
        self.buffer.emit_u8(0x58 | (reg.0 & 7));
    }

    fn call_reg(&mut self, reg: Reg) {
        self.rex_opt(false, Reg(0), reg);
        self.buffer.emit_u8(0xFF);
        self.modrm(3, Reg(2), reg);
    }

    fn ret(&mut self) {
        self.buffer.emit_u8(0xC3);
    }

    fn jump(&mut self) -> PatchSite {
        self.buffer.emit_u8(0xE9);
        let pos = self.buffer.offset();
        self.buffer.emit_u32(0);
        PatchSite { pos }
    }

    fn jump_to(&mut self, target: usize) {
        let site = self.jump();
        self.patch_jump(site, target);
    }

    fn branch_nonzero32(&mut self, reg: Reg) -> PatchSite {
        // testl reg, reg; jnz rel32
        self.rex_opt(false, reg, reg);
        self.buffer.emit_u8(0x85);
        self.modrm(3, reg, reg);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x85);
        let pos = self.buffer.offset();
        self.buffer.emit_u32(0);
        PatchSite { pos }
    }

    fn patch_jump(&mut self, site: PatchSite, target: usize) {
        let rel = target as i64 - (site.pos as i64 + 4);
        self.buffer.patch_u32(site.pos, rel as i32 as u32);
    }
}
