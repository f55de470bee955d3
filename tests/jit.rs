//! Instruction-selector and assembler integration tests.
//!
//! The ABI tests compare emitted machine code against reference byte
//! sequences assembled by hand for each architecture, so a regression in
//! either the encoders or the call lowering shows up as a byte diff.

use kite::jit::assembler::{ArmAssembler, TargetAssembler, X86Assembler, X86_64Assembler};
use kite::jit::ir::*;
use kite::jit::isel::{IdentifierTable, InstructionSelection};
use kite::jit::runtime::{RuntimeFunction, RuntimeHelpers};
use std::collections::HashMap;

const HELPER_ADDR: usize = 0x6666_0000_2000;
const HELPER_ADDR32: usize = 0x4000_2000;
const NAME_ADDR: usize = 0x7777_0000_1000;
const NAME_ADDR32: usize = 0x5000_1000;

struct TestIdentifiers {
    base: usize,
    known: HashMap<String, usize>,
}

impl TestIdentifiers {
    fn at(base: usize) -> Self {
        TestIdentifiers {
            base,
            known: HashMap::new(),
        }
    }
}

impl IdentifierTable for TestIdentifiers {
    fn identifier(&mut self, name: &str) -> usize {
        let next = self.base + self.known.len() * 0x10;
        *self.known.entry(name.to_owned()).or_insert(next)
    }
}

fn helpers(addr: usize) -> RuntimeHelpers {
    let mut helpers = RuntimeHelpers::new();
    for f in [
        RuntimeFunction::GetProperty,
        RuntimeFunction::CallActivationProperty,
        RuntimeFunction::ToBoolean,
        RuntimeFunction::PopScope,
        RuntimeFunction::Add,
    ] {
        helpers.register(f, addr);
    }
    helpers
}

fn one_block_function(temp_count: usize, max_call_args: usize, statements: Vec<Stmt>) -> Function {
    let mut f = Function::new("test");
    f.temp_count = temp_count;
    f.max_call_args = max_call_args;
    f.basic_blocks = vec![BasicBlock { statements }];
    f
}

#[test]
fn register_argument_maps() {
    // x86-64 SysV: rdi, rsi, rdx, rcx, r8, r9.
    let expected = [7u8, 6, 2, 1, 8, 9];
    for (i, enc) in expected.iter().enumerate() {
        assert_eq!(X86_64Assembler::register_for_argument(i).0, *enc);
    }
    assert_eq!(X86_64Assembler::REGISTER_ARGUMENT_COUNT, 6);
    assert!(X86_64Assembler::VALUE_FITS_IN_REGISTER);

    // ARM AAPCS: r0..r3.
    for i in 0..4 {
        assert_eq!(ArmAssembler::register_for_argument(i).0, i as u8);
    }
    assert_eq!(ArmAssembler::REGISTER_ARGUMENT_COUNT, 4);
    assert!(!ArmAssembler::VALUE_FITS_IN_REGISTER);

    // x86-32 cdecl: everything on the stack.
    assert_eq!(X86Assembler::REGISTER_ARGUMENT_COUNT, 0);
    assert!(!X86Assembler::VALUE_FITS_IN_REGISTER);
}

/// A three-argument helper call on x86-64: context, base temp and name land
/// in rdi, rsi and rdx; the result is copied into the destination temp.
#[test]
fn call_lowering_x86_64() {
    let function = one_block_function(
        2,
        0,
        vec![
            Stmt::Move {
                target: MoveTarget::Temp(Temp::value(0)),
                source: Expr::Member {
                    base: Temp::value(1),
                    name: "x".to_owned(),
                },
            },
            Stmt::Ret {
                value: Some(Temp::value(0)),
            },
        ],
    );
    let helpers = helpers(HELPER_ADDR);
    let mut idents = TestIdentifiers::at(NAME_ADDR);
    let isel: InstructionSelection<X86_64Assembler> =
        InstructionSelection::new(&helpers, &mut idents, &function);
    let compiled = isel.run();

    let mut expected: Vec<u8> = Vec::new();
    // push rbp; mov rbp, rsp; sub rsp, 32
    expected.extend_from_slice(&[0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x20]);
    // mov rdx, NAME_ADDR (identifier "x")
    expected.extend_from_slice(&[0x48, 0xBA]);
    expected.extend_from_slice(&(NAME_ADDR as u64).to_le_bytes());
    // mov rsi, [rbp - 24] (temp 1)
    expected.extend_from_slice(&[0x48, 0x8B, 0x75, 0xE8]);
    // mov rdi, r14 (context)
    expected.extend_from_slice(&[0x4C, 0x89, 0xF7]);
    // mov r10, helper; call r10
    expected.extend_from_slice(&[0x49, 0xBA]);
    expected.extend_from_slice(&(HELPER_ADDR as u64).to_le_bytes());
    expected.extend_from_slice(&[0x41, 0xFF, 0xD2]);
    // mov [rbp - 16], rax (temp 0)
    expected.extend_from_slice(&[0x48, 0x89, 0x45, 0xF0]);
    // ret: mov rax, [rbp - 16]; add rsp, 32; pop rbp; ret
    expected.extend_from_slice(&[0x48, 0x8B, 0x45, 0xF0]);
    expected.extend_from_slice(&[0x48, 0x83, 0xC4, 0x20, 0x5D, 0xC3]);

    assert_eq!(compiled.code, expected);
    assert_eq!(compiled.calls.len(), 1);
    assert_eq!(compiled.calls[0].function, RuntimeFunction::GetProperty);
}

/// TrustedImm32(0) is materialized as a bare self-xor with no following
/// move; non-zero immediates get the move.
#[test]
fn trusted_imm32_zero_extends() {
    let function = one_block_function(
        0,
        0,
        vec![
            Stmt::Exp(Expr::Call {
                target: CallTarget::ActivationProperty("f".to_owned()),
                args: vec![],
            }),
            Stmt::Ret { value: None },
        ],
    );
    let helpers = helpers(HELPER_ADDR);
    let mut idents = TestIdentifiers::at(NAME_ADDR);
    let isel: InstructionSelection<X86_64Assembler> =
        InstructionSelection::new(&helpers, &mut idents, &function);
    let compiled = isel.run();

    let mut expected: Vec<u8> = Vec::new();
    // push rbp; mov rbp, rsp; sub rsp, 16
    expected.extend_from_slice(&[0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x10]);
    // argc = TrustedImm32(0): xor ecx, ecx and nothing else
    expected.extend_from_slice(&[0x31, 0xC9]);
    // argv: lea rdx, [rbp - 8]
    expected.extend_from_slice(&[0x48, 0x8D, 0x55, 0xF8]);
    // name: mov rsi, NAME_ADDR
    expected.extend_from_slice(&[0x48, 0xBE]);
    expected.extend_from_slice(&(NAME_ADDR as u64).to_le_bytes());
    // context: mov rdi, r14
    expected.extend_from_slice(&[0x4C, 0x89, 0xF7]);
    // mov r10, helper; call r10
    expected.extend_from_slice(&[0x49, 0xBA]);
    expected.extend_from_slice(&(HELPER_ADDR as u64).to_le_bytes());
    expected.extend_from_slice(&[0x41, 0xFF, 0xD2]);
    // ret: add rsp, 16; pop rbp; ret
    expected.extend_from_slice(&[0x48, 0x83, 0xC4, 0x10, 0x5D, 0xC3]);

    assert_eq!(compiled.code, expected);
}

/// x86-32 reference for a scope pop: the context is pushed as the only
/// argument, the helper is called absolutely, and the returned context is
/// moved back without the save/restore that an ordinary call gets.
#[test]
fn call_lowering_x86_32_scope_pop() {
    let function = one_block_function(0, 0, vec![Stmt::Leave, Stmt::Ret { value: None }]);
    let helpers = helpers(HELPER_ADDR32);
    let mut idents = TestIdentifiers::at(NAME_ADDR32);
    let isel: InstructionSelection<X86Assembler> =
        InstructionSelection::new(&helpers, &mut idents, &function);
    let compiled = isel.run();

    let mut expected: Vec<u8> = Vec::new();
    // push ebp; mov ebp, esp; sub esp, 16; push ecx
    expected.extend_from_slice(&[0x55, 0x89, 0xE5, 0x83, 0xEC, 0x10, 0x51]);
    // stash the caller's return-slot pointer: mov ecx, [ebp+8]; mov [ebp-4], ecx
    expected.extend_from_slice(&[0x8B, 0x4D, 0x08, 0x89, 0x4D, 0xFC]);
    // push esi (context argument)
    expected.push(0x56);
    // mov ecx, helper; call ecx
    expected.push(0xB9);
    expected.extend_from_slice(&(HELPER_ADDR32 as u32).to_le_bytes());
    expected.extend_from_slice(&[0xFF, 0xD1]);
    // mov esi, eax (the new context)
    expected.extend_from_slice(&[0x89, 0xC6]);
    // add esp, 4 (pop the argument)
    expected.extend_from_slice(&[0x83, 0xC4, 0x04]);
    // ret: pop ecx; add esp, 16; pop ebp; ret
    expected.extend_from_slice(&[0x59, 0x83, 0xC4, 0x10, 0x5D, 0xC3]);

    assert_eq!(compiled.code, expected);
}

/// ARM frame shape: lr and the callee-saved range are pushed and restored
/// in the documented order.
#[test]
fn arm_frame_shape() {
    let function = one_block_function(0, 0, vec![Stmt::Ret { value: None }]);
    let helpers = helpers(HELPER_ADDR32);
    let mut idents = TestIdentifiers::at(NAME_ADDR32);
    let isel: InstructionSelection<ArmAssembler> =
        InstructionSelection::new(&helpers, &mut idents, &function);
    let compiled = isel.run();

    let words: [u32; 24] = [
        0xE52D_E004, // push lr
        0xE52D_4004, // push r4
        0xE1A0_400D, // mov r4, sp
        0xE24D_D010, // sub sp, sp, #16
        0xE52D_4004, // push r4..r11
        0xE52D_5004,
        0xE52D_6004,
        0xE52D_7004,
        0xE52D_8004,
        0xE52D_9004,
        0xE52D_A004,
        0xE52D_B004,
        0xE504_0004, // str r0, [r4, #-4] (return-slot pointer)
        0xE49D_B004, // pop r11..r4
        0xE49D_A004,
        0xE49D_9004,
        0xE49D_8004,
        0xE49D_7004,
        0xE49D_6004,
        0xE49D_5004,
        0xE49D_4004,
        0xE28D_D010, // add sp, sp, #16
        0xE49D_4004, // pop r4
        0xE49D_E004, // pop lr
    ];
    let mut expected: Vec<u8> = Vec::new();
    for w in words {
        expected.extend_from_slice(&w.to_le_bytes());
    }
    expected.extend_from_slice(&0xE12F_FF1Eu32.to_le_bytes()); // bx lr

    assert_eq!(compiled.code, expected);
}

/// Cross-block jumps resolve to in-bounds offsets; conditional jumps point
/// at their target block and the fall-through edge emits no jump.
#[test]
fn jump_patching() {
    let mut function = Function::new("branches");
    function.temp_count = 1;
    function.basic_blocks = vec![
        BasicBlock {
            statements: vec![Stmt::CJump {
                cond: Temp::value(0),
                iftrue: 2,
                iffalse: 1,
            }],
        },
        BasicBlock {
            statements: vec![Stmt::Jump { target: 2 }],
        },
        BasicBlock {
            statements: vec![Stmt::Ret { value: None }],
        },
    ];

    let helpers = helpers(HELPER_ADDR);
    let mut idents = TestIdentifiers::at(NAME_ADDR);
    let isel: InstructionSelection<X86_64Assembler> =
        InstructionSelection::new(&helpers, &mut idents, &function);
    let compiled = isel.run();

    assert_eq!(compiled.block_offsets.len(), 3);
    for offset in &compiled.block_offsets {
        assert!(*offset <= compiled.code.len());
    }
    assert!(compiled.block_offsets[0] < compiled.block_offsets[1]);
    assert!(compiled.block_offsets[1] < compiled.block_offsets[2]);

    // Block 1 is a single unconditional jump to block 2.
    let b1 = compiled.block_offsets[1];
    assert_eq!(compiled.code[b1], 0xE9);
    let rel = i32::from_le_bytes(compiled.code[b1 + 1..b1 + 5].try_into().unwrap());
    assert_eq!(
        (b1 as i64 + 5 + rel as i64) as usize,
        compiled.block_offsets[2]
    );

    // Block 0 ends in jnz to block 2 and falls through to block 1.
    let jnz = compiled.block_offsets[1] - 6;
    assert_eq!(&compiled.code[jnz..jnz + 2], &[0x0F, 0x85]);
    let rel = i32::from_le_bytes(compiled.code[jnz + 2..jnz + 6].try_into().unwrap());
    assert_eq!(
        (jnz as i64 + 6 + rel as i64) as usize,
        compiled.block_offsets[2]
    );
}

/// Known-double temps move through the FP scratch register.
#[test]
fn double_temp_moves() {
    let function = one_block_function(
        2,
        0,
        vec![
            Stmt::Move {
                target: MoveTarget::Temp(Temp::double(0)),
                source: Expr::Temp(Temp::double(1)),
            },
            Stmt::Ret { value: None },
        ],
    );
    let helpers = helpers(HELPER_ADDR);
    let mut idents = TestIdentifiers::at(NAME_ADDR);
    let isel: InstructionSelection<X86_64Assembler> =
        InstructionSelection::new(&helpers, &mut idents, &function);
    let compiled = isel.run();

    // movsd xmm0, [rbp-24]; movsd [rbp-16], xmm0
    let movsd_load: &[u8] = &[0xF2, 0x0F, 0x10, 0x45, 0xE8];
    let movsd_store: &[u8] = &[0xF2, 0x0F, 0x11, 0x45, 0xF0];
    let code = &compiled.code;
    assert!(code.windows(movsd_load.len()).any(|w| w == movsd_load));
    assert!(code.windows(movsd_store.len()).any(|w| w == movsd_store));
}

/// Calls land in the diagnostics list with their helper and offset.
#[test]
fn calls_to_link_recorded() {
    let function = one_block_function(
        3,
        0,
        vec![
            Stmt::Move {
                target: MoveTarget::Temp(Temp::value(0)),
                source: Expr::Binop {
                    op: BinaryOp::Add,
                    left: Temp::value(1),
                    right: Temp::value(2),
                },
            },
            Stmt::Ret {
                value: Some(Temp::value(0)),
            },
        ],
    );
    let helpers = helpers(HELPER_ADDR);
    let mut idents = TestIdentifiers::at(NAME_ADDR);
    let isel: InstructionSelection<X86_64Assembler> =
        InstructionSelection::new(&helpers, &mut idents, &function);
    let compiled = isel.run();

    assert_eq!(compiled.calls.len(), 1);
    assert_eq!(compiled.calls[0].function, RuntimeFunction::Add);
    assert!(compiled.calls[0].offset < compiled.code.len());
}
