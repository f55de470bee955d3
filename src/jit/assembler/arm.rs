//! ARM32 (AAPCS, ARM mode) back-end.
//!
//! The first four helper arguments travel in `r0..r3`. `r4` is the frame
//! register, `r5` the context and `r6` the scratch; `r4..r11` are saved by
//! the standard prologue. `r12` (ip) is used as an assembler-internal
//! temporary for immediates that do not fit an operand2 encoding; it is
//! never live across instruction-selector operations.

use super::{CodeBuffer, FpReg, Mem, PatchSite, Reg, TargetAssembler};

pub const R0: Reg = Reg(0);
pub const R4: Reg = Reg(4);
pub const R5: Reg = Reg(5);
pub const R6: Reg = Reg(6);
pub const R11: Reg = Reg(11);
pub const IP: Reg = Reg(12);
pub const SP: Reg = Reg(13);
pub const LR: Reg = Reg(14);
pub const D0: FpReg = FpReg(0);

/// Condition codes (top nibble of every instruction word).
const COND_AL: u32 = 0xE << 28;
const COND_NE: u32 = 0x1 << 28;

pub struct ArmAssembler {
    buffer: CodeBuffer,
}

impl ArmAssembler {
    fn emit(&mut self, word: u32) {
        self.buffer.emit_u32(word);
    }

    /// Encode a value as an operand2 immediate (8 bits rotated right by an
    /// even amount), if possible.
    fn encode_imm(value: u32) -> Option<u32> {
        for rot in 0..16u32 {
            let v = value.rotate_left(rot * 2);
            if v < 256 {
                return Some(rot << 8 | v);
            }
        }
        None
    }

    /// movw/movt a full 32-bit immediate.
    fn mov_imm32(&mut self, imm: u32, dst: Reg) {
        let lo = imm & 0xFFFF;
        self.emit(COND_AL | 0x0300_0000 | (lo >> 12) << 16 | (dst.0 as u32) << 12 | (lo & 0xFFF));
        let hi = imm >> 16;
        if hi != 0 {
            self.emit(
                COND_AL | 0x0340_0000 | (hi >> 12) << 16 | (dst.0 as u32) << 12 | (hi & 0xFFF),
            );
        }
    }

    /// Data-processing with immediate, falling back to ip for wide values.
    /// `op` is the opcode field (ADD = 0x4, SUB = 0x2).
    fn alu_imm(&mut self, op: u32, imm: i32, reg: Reg) {
        let (op, value) = if imm >= 0 {
            (op, imm as u32)
        } else {
            // ADD by a negative is SUB by its magnitude and vice versa.
            (if op == 0x4 { 0x2 } else { 0x4 }, (-imm) as u32)
        };
        let rn = (reg.0 as u32) << 16;
        let rd = (reg.0 as u32) << 12;
        if let Some(enc) = Self::encode_imm(value) {
            self.emit(COND_AL | 0x0200_0000 | op << 21 | rn | rd | enc);
        } else {
            self.mov_imm32(value, IP);
            // Register form: op rd, rn, ip
            self.emit(COND_AL | op << 21 | rn | rd | IP.0 as u32);
        }
    }

    /// LDR/STR word with signed immediate offset, via ip when out of range.
    fn mem_word(&mut self, load: bool, reg: Reg, mem: Mem) {
        let (u, off) = if mem.offset >= 0 {
            (1u32, mem.offset as u32)
        } else {
            (0u32, (-mem.offset) as u32)
        };
        let l = if load { 1u32 << 20 } else { 0 };
        if off < 4096 {
            self.emit(
                COND_AL
                    | 0x0400_0000
                    | 1 << 24
                    | u << 23
                    | l
                    | (mem.base.0 as u32) << 16
                    | (reg.0 as u32) << 12
                    | off,
            );
        } else {
            self.mov_imm32(mem.offset as u32, IP);
            // LDR/STR reg, [base, ip]
            self.emit(
                COND_AL
                    | 0x0600_0000
                    | 1 << 24
                    | 1 << 23
                    | l
                    | (mem.base.0 as u32) << 16
                    | (reg.0 as u32) << 12
                    | IP.0 as u32,
            );
        }
    }

    /// VLDR/VSTR a double. The offset must be a multiple of four.
    fn mem_double(&mut self, load: bool, reg: FpReg, mem: Mem) {
        debug_assert!(mem.offset % 4 == 0);
        let (u, off) = if mem.offset >= 0 {
            (1u32, (mem.offset / 4) as u32)
        } else {
            (0u32, (-mem.offset / 4) as u32)
        };
        debug_assert!(off < 256);
        let l = if load { 1u32 << 20 } else { 0 };
        self.emit(
            COND_AL
                | 0x0D00_0B00
                | u << 23
                | l
                | (mem.base.0 as u32) << 16
                | (reg.0 as u32) << 12
                | off,
        );
    }

    fn branch_word(&mut self, cond: u32) -> PatchSite {
        let pos = self.buffer.offset();
        self.emit(cond | 0x0A00_0000);
        PatchSite { pos }
    }
}

impl TargetAssembler for ArmAssembler {
    const REGISTER_SIZE: usize = 4;
    const REGISTER_ARGUMENT_COUNT: usize = 4;
    const VALUE_FITS_IN_REGISTER: bool = false;

    const STACK_FRAME_REGISTER: Reg = R4;
    const STACK_POINTER_REGISTER: Reg = SP;
    const CONTEXT_REGISTER: Reg = R5;
    const RETURN_VALUE_REGISTER: Reg = R0;
    const SCRATCH_REGISTER: Reg = R6;
    const FP_SCRATCH: FpReg = D0;
    const CALLEE_SAVED: &'static [Reg] = &[
        R4,
        R5,
        R6,
        Reg(7),
        Reg(8),
        Reg(9),
        Reg(10),
        R11,
    ];

    fn register_for_argument(index: usize) -> Reg {
        debug_assert!(index < Self::REGISTER_ARGUMENT_COUNT);
        Reg(index as u8)
    }

    fn new() -> Self {
        ArmAssembler {
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
        // mov dst, src
        self.emit(COND_AL | 0x01A0_0000 | (dst.0 as u32) << 12 | src.0 as u32);
    }

    fn move_imm32(&mut self, imm: i32, dst: Reg) {
        self.mov_imm32(imm as u32, dst);
    }

    fn move_imm_ptr(&mut self, imm: usize, dst: Reg) {
        self.mov_imm32(imm as u32, dst);
    }

    fn load_ptr(&mut self, src: Mem, dst: Reg) {
        self.mem_word(true, dst, src);
    }

    fn store_ptr(&mut self, src: Reg, dst: Mem) {
        self.mem_word(false, src, dst);
    }

    fn load32(&mut self, src: Mem, dst: Reg) {
        self.mem_word(true, dst, src);
    }

    fn store32(&mut self, src: Reg, dst: Mem) {
        self.mem_word(false, src, dst);
    }

    fn load64(&mut self, _src: Mem, _dst: Reg) {
        unreachable!("values do not fit a register on ARM32");
    }

    fn store64(&mut self, _src: Reg, _dst: Mem) {
        unreachable!("values do not fit a register on ARM32");
    }

    fn load_double(&mut self, src: Mem, dst: FpReg) {
        self.mem_double(true, dst, src);
    }

    fn store_double(&mut self, src: FpReg, dst: Mem) {
        self.mem_double(false, src, dst);
    }

    fn lea(&mut self, src: Mem, dst: Reg) {
        self.move_reg(src.base, dst);
        if src.offset != 0 {
            self.add_ptr_imm(src.offset, dst);
        }
    }

    fn add_ptr_imm(&mut self, imm: i32, reg: Reg) {
        self.alu_imm(0x4, imm, reg);
    }

    fn sub_ptr_imm(&mut self, imm: i32, reg: Reg) {
        self.alu_imm(0x2, imm, reg);
    }

    fn zero_reg(&mut self, reg: Reg) {
        // eor reg, reg, reg
        self.emit(
            COND_AL | 0x0020_0000 | (reg.0 as u32) << 16 | (reg.0 as u32) << 12 | reg.0 as u32,
        );
    }

    fn push_reg(&mut self, reg: Reg) {
        // str reg, [sp, #-4]!
        self.emit(COND_AL | 0x052D_0004 | (reg.0 as u32) << 12);
    }

    fn pop_reg(&mut self, reg: Reg) {
        // ldr reg, [sp], #4
        self.emit(COND_AL | 0x049D_0004 | (reg.0 as u32) << 12);
    }

    fn call_reg(&mut self, reg: Reg) {
        // blx reg
        self.emit(COND_AL | 0x012F_FF30 | reg.0 as u32);
    }

    fn ret(&mut self) {
        // bx lr
        self.emit(COND_AL | 0x012F_FF10 | LR.0 as u32);
    }

    fn jump(&mut self) -> PatchSite {
        self.branch_word(COND_AL)
    }

    fn jump_to(&mut self, target: usize) {
        let site = self.branch_word(COND_AL);
        self.patch_jump(site, target);
    }

    fn branch_nonzero32(&mut self, reg: Reg) -> PatchSite {
        // cmp reg, #0; bne target
        self.emit(COND_AL | 0x0350_0000 | (reg.0 as u32) << 16);
        self.branch_word(COND_NE)
    }

    fn patch_jump(&mut self, site: PatchSite, target: usize) {
        // The branch offset is relative to the pc, which reads two
        // instructions ahead in ARM mode.
        let rel = (target as i64 - (site.pos as i64 + 8)) / 4;
        let word = self.buffer.read_u32(site.pos);
        self.buffer
            .patch_u32(site.pos, word | (rel as u32 & 0x00FF_FFFF));
    }

    /// ARM frames additionally save the link register first.
    fn enter_standard_stack_frame(&mut self, frame_bytes: i32) {
        self.push_reg(LR);
        self.push_reg(Self::STACK_FRAME_REGISTER);
        self.move_reg(Self::STACK_POINTER_REGISTER, Self::STACK_FRAME_REGISTER);
        self.sub_ptr_imm(frame_bytes, Self::STACK_POINTER_REGISTER);
        for &reg in Self::CALLEE_SAVED {
            self.push_reg(reg);
        }
    }

    fn leave_standard_stack_frame(&mut self, frame_bytes: i32) {
        for &reg in Self::CALLEE_SAVED.iter().rev() {
            self.pop_reg(reg);
        }
        self.add_ptr_imm(frame_bytes, Self::STACK_POINTER_REGISTER);
        self.pop_reg(Self::STACK_FRAME_REGISTER);
        self.pop_reg(LR);
    }
}
