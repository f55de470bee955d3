//! x86-32 (cdecl) back-end.
//!
//! No helper arguments travel in registers: everything is pushed
//! right-to-left. Values do not fit a register, so they move as two 32-bit
//! words or through addresses. The context lives in `esi` (callee-saved by
//! the ABI); the scratch register `ecx` is preserved across JS frames by the
//! standard prologue.

use super::{CodeBuffer, FpReg, Mem, PatchSite, Reg, TargetAssembler};

pub const EAX: Reg = Reg(0);
pub const ECX: Reg = Reg(1);
pub const ESP: Reg = Reg(4);
pub const EBP: Reg = Reg(5);
pub const ESI: Reg = Reg(6);
pub const XMM0: FpReg = FpReg(0);

pub struct X86Assembler {
    buffer: CodeBuffer,
}

impl X86Assembler {
    fn modrm(&mut self, md: u8, reg: u8, rm: u8) {
        self.buffer.emit_u8(md << 6 | (reg & 7) << 3 | (rm & 7));
    }

    fn mem_operand(&mut self, reg: u8, mem: Mem) {
        let base = mem.base.0;
        let needs_disp8 = (-128..=127).contains(&mem.offset);
        let md = if mem.offset == 0 && base != 5 {
            0
        } else if needs_disp8 {
            1
        } else {
            2
        };
        self.modrm(md, reg, base);
        if base == 4 {
            self.buffer.emit_u8(0x24);
        }
        if md == 1 {
            self.buffer.emit_u8(mem.offset as i8 as u8);
        } else if md == 2 {
            self.buffer.emit_u32(mem.offset as u32);
        }
    }
}

impl TargetAssembler for X86Assembler {
    const REGISTER_SIZE: usize = 4;
    const REGISTER_ARGUMENT_COUNT: usize = 0;
    const VALUE_FITS_IN_REGISTER: bool = false;

    const STACK_FRAME_REGISTER: Reg = EBP;
    const STACK_POINTER_REGISTER: Reg = ESP;
    const CONTEXT_REGISTER: Reg = ESI;
    const RETURN_VALUE_REGISTER: Reg = EAX;
    const SCRATCH_REGISTER: Reg = ECX;
    const FP_SCRATCH: FpReg = XMM0;
    const CALLEE_SAVED: &'static [Reg] = &[ECX];
    const CONTEXT_NEEDS_SAVE_AROUND_CALLS: bool = true;

    fn register_for_argument(_index: usize) -> Reg {
        unreachable!("x86-32 passes no helper arguments in registers")
    }

    fn new() -> Self {
        X86Assembler {
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
        self.buffer.emit_u8(0x89);
        self.modrm(3, src.0, dst.0);
    }

    fn move_imm32(&mut self, imm: i32, dst: Reg) {
        self.buffer.emit_u8(0xB8 | dst.0);
        self.buffer.emit_u32(imm as u32);
    }

    fn move_imm_ptr(&mut self, imm: usize, dst: Reg) {
        self.move_imm32(imm as i32, dst);
    }

    fn load_ptr(&mut self, src: Mem, dst: Reg) {
        self.load32(src, dst);
    }

    fn store_ptr(&mut self, src: Reg, dst: Mem) {
        self.store32(src, dst);
    }

    fn load32(&mut self, src: Mem, dst: Reg) {
        self.buffer.emit_u8(0x8B);
        self.mem_operand(dst.0, src);
    }

    fn store32(&mut self, src: Reg, dst: Mem) {
        self.buffer.emit_u8(0x89);
        self.mem_operand(src.0, dst);
    }

    fn load64(&mut self, _src: Mem, _dst: Reg) {
        unreachable!("values do not fit a register on x86-32");
    }

    fn store64(&mut self, _src: Reg, _dst: Mem) {
        unreachable!("values do not fit a register on x86-32");
    }

    fn load_double(&mut self, src: Mem, dst: FpReg) {
        self.buffer.emit_u8(0xF2);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x10);
        self.mem_operand(dst.0, src);
    }

    fn store_double(&mut self, src: FpReg, dst: Mem) {
        self.buffer.emit_u8(0xF2);
        self.buffer.emit_u8(0x0F);
        self.buffer.emit_u8(0x11);
        self.mem_operand(src.0, dst);
    }

    fn lea(&mut self, src: Mem, dst: Reg) {
        self.buffer.emit_u8(0x8D);
        self.mem_operand(dst.0, src);
    }

    fn add_ptr_imm(&mut self, imm: i32, reg: Reg) {
        if (-128..=127).contains(&imm) {
            self.buffer.emit_u8(0x83);
            self.modrm(3, 0, reg.0);
            self.buffer.emit_u8(imm as i8 as u8);
        } else {
            self.buffer.emit_u8(0x81);
            self.modrm(3, 0, reg.0);
            self.buffer.emit_u32(imm as u32);
        }
    }

    fn sub_ptr_imm(&mut self, imm: i32, reg: Reg) {
        if (-128..=127).contains(&imm) {
            self.buffer.emit_u8(0x83);
            self.modrm(3, 5, reg.0);
            self.buffer.emit_u8(imm as i8 as u8);
        } else {
            self.buffer.emit_u8(0x81);
            self.modrm(3, 5, reg.0);
            self.buffer.emit_u32(imm as u32);
        }
    }

    fn zero_reg(&mut self, reg: Reg) {
        self.buffer.emit_u8(0x31);
        self.modrm(3, reg.0, reg.0);
    }

    fn push_reg(&mut self, reg: Reg) {
        self.buffer.emit_u8(0x50 | reg.0);
    }

    fn pop_reg(&mut self, reg: Reg) {
        self.buffer.emit_u8(0x58 | reg.0);
    }

    fn call_reg(&mut self, reg: Reg) {
        self.buffer.emit_u8(0xFF);
        self.modrm(3, 2, reg.0);
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
        self.buffer.emit_u8(0x85);
        self.modrm(3, reg.0, reg.0);
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
