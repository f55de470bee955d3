//! The instruction selector: lowers IR statements to native code.
//!
//! Every temp lives at a fixed stack-frame offset. The frame, below the
//! frame pointer, is laid out as one reserved pointer slot (the caller's
//! return-value slot address on targets where values do not fit a register),
//! then the outgoing argument area of `max_call_args` value slots, then the
//! temps. Calls into the runtime are emitted through a uniform argument
//! loader that fills the ABI argument registers right-to-left and pushes the
//! rest, so the leftmost stack-passed argument ends up topmost.

use crate::jit::assembler::{Mem, PatchSite, Reg, TargetAssembler};
use crate::jit::ir::{
    BinaryOp, BlockIndex, CallTarget, ConstValue, Expr, Function, MoveTarget, ScopeKind, Stmt,
    Temp, TempKind, UnaryOp,
};
use crate::jit::runtime::{RuntimeFunction, RuntimeHelpers, CONTEXT_EXCEPTION_FLAG_OFFSET};
use crate::vm::Value;
use std::collections::HashMap;

/// Bytes in a tagged value, on every target.
const VALUE_BYTES: usize = std::mem::size_of::<Value>();

/// Interning of identifier strings into engine string pointers. The engine
/// guarantees the returned addresses stay valid for the life of the code.
pub trait IdentifierTable {
    fn identifier(&mut self, name: &str) -> usize;
}

/// A helper-call argument.
#[derive(Copy, Clone, Debug)]
enum Arg<'s> {
    /// Consumes no register and no stack space, but still steps the register
    /// index.
    Void,
    Reg(Reg),
    TrustedImmPtr(usize),
    TrustedImm32(i32),
    /// A temp: passed by 64-bit value where values fit a register, by
    /// slot address elsewhere.
    Temp(Temp),
    /// An address computed as base+offset, passed as a pointer.
    Pointer(Mem),
    /// A constant tagged value.
    Value(Value),
    /// An interned identifier.
    Identifier(&'s str),
}

/// Where a helper's return value goes.
#[derive(Copy, Clone, Debug)]
enum CallDest {
    Ignore,
    Temp(Temp),
    Reg(Reg),
}

/// A helper call site, for diagnostics.
#[derive(Clone, Debug)]
pub struct CallToLink {
    pub offset: usize,
    pub function: RuntimeFunction,
}

/// The finished unit: machine code plus the per-block offsets the patcher
/// resolved jumps against.
pub struct CompiledFunction {
    pub code: Vec<u8>,
    pub block_offsets: Vec<usize>,
    pub calls: Vec<CallToLink>,
}

pub struct InstructionSelection<'a, A: TargetAssembler> {
    asm: A,
    helpers: &'a RuntimeHelpers,
    identifiers: &'a mut dyn IdentifierTable,
    function: &'a Function,
    current_block: BlockIndex,
    /// Offsets of blocks already emitted.
    addrs: HashMap<BlockIndex, usize>,
    /// Branches waiting for their target block to be emitted.
    patches: HashMap<BlockIndex, Vec<PatchSite>>,
    calls_to_link: Vec<CallToLink>,
}

impl<'a, A: TargetAssembler> InstructionSelection<'a, A> {
    pub fn new(
        helpers: &'a RuntimeHelpers,
        identifiers: &'a mut dyn IdentifierTable,
        function: &'a Function,
    ) -> Self {
        InstructionSelection {
            asm: A::new(),
            helpers,
            identifiers,
            function,
            current_block: 0,
            addrs: HashMap::new(),
            patches: HashMap::new(),
            calls_to_link: Vec::new(),
        }
    }

    /// Lower the whole function and resolve every pending jump.
    pub fn run(mut self) -> CompiledFunction {
        self.asm.enter_standard_stack_frame(self.frame_bytes());
        if !A::VALUE_FITS_IN_REGISTER {
            // Stash the caller-supplied return-slot address in the reserved
            // frame slot; visitRet copies the result through it.
            self.save_return_slot_pointer();
        }

        let function: &'a Function = self.function;
        for (index, block) in function.basic_blocks.iter().enumerate() {
            self.current_block = index;
            self.addrs.insert(index, self.asm.current_offset());
            if let Some(sites) = self.patches.remove(&index) {
                let target = self.asm.current_offset();
                for site in sites {
                    self.asm.patch_jump(site, target);
                }
            }
            for stmt in &block.statements {
                self.visit_stmt(stmt);
            }
        }

        assert!(
            self.patches.is_empty(),
            "unresolved jump patches to blocks {:?}",
            self.patches.keys().collect::<Vec<_>>()
        );

        let mut block_offsets = vec![0; self.function.basic_blocks.len()];
        for (block, offset) in &self.addrs {
            block_offsets[*block] = *offset;
        }
        CompiledFunction {
            code: self.asm.finalize(),
            block_offsets,
            calls: self.calls_to_link,
        }
    }

    // ----- frame layout -----

    fn frame_bytes(&self) -> i32 {
        let raw = A::REGISTER_SIZE
            + (self.function.max_call_args + self.function.temp_count) * VALUE_BYTES;
        crate::util::conversions::raw_align_up(raw, 16) as i32
    }

    /// The stack slot of a temp.
    fn temp_address(&self, t: Temp) -> Mem {
        debug_assert!((t.index as usize) < self.function.temp_count);
        let offset = A::REGISTER_SIZE
            + self.function.max_call_args * VALUE_BYTES
            + (t.index as usize + 1) * VALUE_BYTES;
        Mem::new(A::STACK_FRAME_REGISTER, -(offset as i32))
    }

    /// The outgoing argument slot `argument` of a variable-argument call.
    fn argument_address_for_call(&self, argument: usize) -> Mem {
        let index = self.function.max_call_args - argument;
        Mem::new(
            A::STACK_FRAME_REGISTER,
            -((index * VALUE_BYTES) as i32) - A::REGISTER_SIZE as i32,
        )
    }

    fn base_address_for_call_arguments(&self) -> Mem {
        self.argument_address_for_call(0)
    }

    fn save_return_slot_pointer(&mut self) {
        let slot = Mem::new(A::STACK_FRAME_REGISTER, -(A::REGISTER_SIZE as i32));
        if A::REGISTER_ARGUMENT_COUNT > 0 {
            // AAPCS: the hidden pointer arrives in the first argument register.
            self.asm.store_ptr(A::register_for_argument(0), slot);
        } else {
            // cdecl: above the return address and the saved frame pointer.
            let incoming = Mem::new(A::STACK_FRAME_REGISTER, 2 * A::REGISTER_SIZE as i32);
            self.asm.load_ptr(incoming, A::SCRATCH_REGISTER);
            self.asm.store_ptr(A::SCRATCH_REGISTER, slot);
        }
    }

    // ----- statements -----

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Exp(expr) => self.visit_exp(expr),
            Stmt::Move { target, source } => self.visit_move(target, source),
            Stmt::Jump { target } => self.jump_to_block(*target),
            Stmt::CJump {
                cond,
                iftrue,
                iffalse,
            } => self.visit_cjump(*cond, *iftrue, *iffalse),
            Stmt::Ret { value } => self.visit_ret(*value),
            Stmt::Enter { scope } => self.visit_enter(scope),
            Stmt::Leave => self.visit_leave(),
        }
    }

    fn visit_exp(&mut self, expr: &Expr) {
        match expr {
            Expr::Call { target, args } => self.emit_call(target, args, false, CallDest::Ignore),
            Expr::New { target, args } => self.emit_call(target, args, true, CallDest::Ignore),
            _ => {
                // Other expressions have no side effects; nothing to emit.
            }
        }
    }

    fn visit_move(&mut self, target: &MoveTarget, source: &Expr) {
        match target {
            MoveTarget::Temp(t) => self.move_into_temp(*t, source),
            MoveTarget::Name(name) => {
                let value = self.source_as_arg(source);
                self.generate_function_call(
                    CallDest::Ignore,
                    RuntimeFunction::SetActivationProperty,
                    &[Arg::Reg(A::CONTEXT_REGISTER), Arg::Identifier(name.as_str()), value],
                );
            }
            MoveTarget::Member { base, name } => {
                let value = self.source_as_arg(source);
                self.generate_function_call(
                    CallDest::Ignore,
                    RuntimeFunction::SetProperty,
                    &[
                        Arg::Reg(A::CONTEXT_REGISTER),
                        Arg::Temp(*base),
                        Arg::Identifier(name.as_str()),
                        value,
                    ],
                );
            }
            MoveTarget::Subscript { base, index } => {
                let value = self.source_as_arg(source);
                self.generate_function_call(
                    CallDest::Ignore,
                    RuntimeFunction::SetElement,
                    &[
                        Arg::Reg(A::CONTEXT_REGISTER),
                        Arg::Temp(*base),
                        Arg::Temp(*index),
                        value,
                    ],
                );
            }
        }
    }

    /// A store source that is already a plain operand.
    fn source_as_arg<'s>(&mut self, source: &'s Expr) -> Arg<'s> {
        match source {
            Expr::Temp(t) => Arg::Temp(*t),
            Expr::Const(c) => Arg::Value(Self::const_value(*c)),
            _ => panic!("store source must be a temp or a constant"),
        }
    }

    fn const_value(c: ConstValue) -> Value {
        match c {
            ConstValue::Undefined => Value::undefined(),
            ConstValue::Null => Value::null(),
            ConstValue::Bool(b) => Value::from_bool(b),
            ConstValue::Int(i) => Value::from_int32(i),
            ConstValue::Double(d) => Value::from_double(d),
        }
    }

    fn move_into_temp(&mut self, t: Temp, source: &Expr) {
        match source {
            Expr::Const(c) => {
                if t.kind == TempKind::Double {
                    let bits = match c {
                        ConstValue::Double(d) => d.to_bits(),
                        ConstValue::Int(i) => f64::from(*i).to_bits(),
                        _ => panic!("non-numeric constant moved into a double temp"),
                    };
                    self.store_raw64(bits, self.temp_address(t));
                } else {
                    self.store_raw64(Self::const_value(*c).raw(), self.temp_address(t));
                }
            }
            Expr::Temp(s) => {
                if t.kind == TempKind::Double && s.kind == TempKind::Double {
                    let src = self.temp_address(*s);
                    let dst = self.temp_address(t);
                    self.asm.load_double(src, A::FP_SCRATCH);
                    self.asm.store_double(A::FP_SCRATCH, dst);
                } else {
                    let src = self.temp_address(*s);
                    let dst = self.temp_address(t);
                    self.copy_value(dst, src);
                }
            }
            Expr::Name(name) => {
                self.generate_function_call(
                    CallDest::Temp(t),
                    RuntimeFunction::GetActivationProperty,
                    &[Arg::Reg(A::CONTEXT_REGISTER), Arg::Identifier(name.as_str())],
                );
            }
            Expr::Member { base, name } => {
                self.generate_function_call(
                    CallDest::Temp(t),
                    RuntimeFunction::GetProperty,
                    &[
                        Arg::Reg(A::CONTEXT_REGISTER),
                        Arg::Temp(*base),
                        Arg::Identifier(name.as_str()),
                    ],
                );
            }
            Expr::Subscript { base, index } => {
                self.generate_function_call(
                    CallDest::Temp(t),
                    RuntimeFunction::GetElement,
                    &[
                        Arg::Reg(A::CONTEXT_REGISTER),
                        Arg::Temp(*base),
                        Arg::Temp(*index),
                    ],
                );
            }
            Expr::Unop { op, expr } => {
                let helper = Self::unop_helper(*op);
                self.generate_function_call(
                    CallDest::Temp(t),
                    helper,
                    &[Arg::Reg(A::CONTEXT_REGISTER), Arg::Temp(*expr)],
                );
            }
            Expr::Binop { op, left, right } => {
                let helper = Self::binop_helper(*op);
                self.generate_function_call(
                    CallDest::Temp(t),
                    helper,
                    &[
                        Arg::Reg(A::CONTEXT_REGISTER),
                        Arg::Temp(*left),
                        Arg::Temp(*right),
                    ],
                );
            }
            Expr::Call { target, args } => {
                self.emit_call(target, args, false, CallDest::Temp(t))
            }
            Expr::New { target, args } => self.emit_call(target, args, true, CallDest::Temp(t)),
        }
    }

    fn unop_helper(op: UnaryOp) -> RuntimeFunction {
        match op {
            UnaryOp::Not => RuntimeFunction::Not,
            UnaryOp::UMinus => RuntimeFunction::UMinus,
            UnaryOp::UPlus => RuntimeFunction::UPlus,
            UnaryOp::Compl => RuntimeFunction::Compl,
        }
    }

    fn binop_helper(op: BinaryOp) -> RuntimeFunction {
        match op {
            BinaryOp::Add => RuntimeFunction::Add,
            BinaryOp::Sub => RuntimeFunction::Sub,
            BinaryOp::Mul => RuntimeFunction::Mul,
            BinaryOp::Div => RuntimeFunction::Div,
            BinaryOp::Mod => RuntimeFunction::Mod,
            BinaryOp::Shl => RuntimeFunction::Shl,
            BinaryOp::Shr => RuntimeFunction::Shr,
            BinaryOp::UShr => RuntimeFunction::UShr,
            BinaryOp::BitAnd => RuntimeFunction::BitAnd,
            BinaryOp::BitOr => RuntimeFunction::BitOr,
            BinaryOp::BitXor => RuntimeFunction::BitXor,
            BinaryOp::Gt => RuntimeFunction::Gt,
            BinaryOp::Lt => RuntimeFunction::Lt,
            BinaryOp::Ge => RuntimeFunction::Ge,
            BinaryOp::Le => RuntimeFunction::Le,
            BinaryOp::Eq => RuntimeFunction::Eq,
            BinaryOp::Ne => RuntimeFunction::Ne,
            BinaryOp::StrictEq => RuntimeFunction::StrictEq,
            BinaryOp::StrictNe => RuntimeFunction::StrictNe,
            BinaryOp::InstanceOf => RuntimeFunction::InstanceOf,
            BinaryOp::In => RuntimeFunction::In,
        }
    }

    fn visit_cjump(&mut self, cond: Temp, iftrue: BlockIndex, iffalse: BlockIndex) {
        self.generate_function_call(
            CallDest::Reg(A::RETURN_VALUE_REGISTER),
            RuntimeFunction::ToBoolean,
            &[Arg::Reg(A::CONTEXT_REGISTER), Arg::Temp(cond)],
        );
        let site = self.asm.branch_nonzero32(A::RETURN_VALUE_REGISTER);
        self.record_branch(iftrue, site);
        if iffalse != self.current_block + 1 {
            self.jump_to_block(iffalse);
        }
    }

    fn visit_ret(&mut self, value: Option<Temp>) {
        if let Some(t) = value {
            if A::VALUE_FITS_IN_REGISTER {
                let src = self.temp_address(t);
                self.asm.load64(src, A::RETURN_VALUE_REGISTER);
            } else {
                // Copy through the caller-supplied return slot; its address
                // also becomes the return value.
                let slot = Mem::new(A::STACK_FRAME_REGISTER, -(A::REGISTER_SIZE as i32));
                self.asm.load_ptr(slot, A::RETURN_VALUE_REGISTER);
                let src = self.temp_address(t);
                self.copy_value(Mem::new(A::RETURN_VALUE_REGISTER, 0), src);
            }
        }
        self.asm.leave_standard_stack_frame(self.frame_bytes());
        self.asm.ret();
    }

    fn visit_enter(&mut self, scope: &ScopeKind) {
        match scope {
            ScopeKind::With(obj) => {
                self.generate_function_call(
                    CallDest::Reg(A::CONTEXT_REGISTER),
                    RuntimeFunction::PushWithScope,
                    &[Arg::Reg(A::CONTEXT_REGISTER), Arg::Temp(*obj)],
                );
            }
            ScopeKind::Catch(name) => {
                self.generate_function_call(
                    CallDest::Reg(A::CONTEXT_REGISTER),
                    RuntimeFunction::PushCatchScope,
                    &[Arg::Reg(A::CONTEXT_REGISTER), Arg::Identifier(name.as_str())],
                );
            }
        }
    }

    fn visit_leave(&mut self) {
        self.generate_function_call(
            CallDest::Reg(A::CONTEXT_REGISTER),
            RuntimeFunction::PopScope,
            &[Arg::Reg(A::CONTEXT_REGISTER)],
        );
    }

    // ----- calls -----

    /// Materialize each actual into the contiguous outgoing argument area
    /// and return (argv, argc) operands.
    fn prepare_variable_arguments(&mut self, args: &[Expr]) -> (Mem, i32) {
        debug_assert!(args.len() <= self.function.max_call_args);
        for (i, arg) in args.iter().enumerate() {
            let dst = self.argument_address_for_call(i);
            match arg {
                Expr::Temp(t) => {
                    let src = self.temp_address(*t);
                    self.copy_value(dst, src);
                }
                Expr::Const(c) => {
                    self.store_raw64(Self::const_value(*c).raw(), dst);
                }
                _ => panic!("call arguments must be temps or constants"),
            }
        }
        (self.base_address_for_call_arguments(), args.len() as i32)
    }

    fn emit_call(&mut self, target: &CallTarget, args: &[Expr], construct: bool, dest: CallDest) {
        let (argv, argc) = self.prepare_variable_arguments(args);
        match target {
            CallTarget::ActivationProperty(name) => {
                let helper = if construct {
                    RuntimeFunction::ConstructActivationProperty
                } else {
                    RuntimeFunction::CallActivationProperty
                };
                self.generate_function_call(
                    dest,
                    helper,
                    &[
                        Arg::Reg(A::CONTEXT_REGISTER),
                        Arg::Identifier(name.as_str()),
                        Arg::Pointer(argv),
                        Arg::TrustedImm32(argc),
                    ],
                );
            }
            CallTarget::Property { base, name } => {
                let helper = if construct {
                    RuntimeFunction::ConstructProperty
                } else {
                    RuntimeFunction::CallProperty
                };
                self.generate_function_call(
                    dest,
                    helper,
                    &[
                        Arg::Reg(A::CONTEXT_REGISTER),
                        Arg::Temp(*base),
                        Arg::Identifier(name.as_str()),
                        Arg::Pointer(argv),
                        Arg::TrustedImm32(argc),
                    ],
                );
            }
            CallTarget::Value(callee) => {
                let helper = if construct {
                    RuntimeFunction::ConstructValue
                } else {
                    RuntimeFunction::CallValue
                };
                if construct {
                    // The construct family creates its own `this`.
                    self.generate_function_call(
                        dest,
                        helper,
                        &[
                            Arg::Reg(A::CONTEXT_REGISTER),
                            Arg::Temp(*callee),
                            Arg::Pointer(argv),
                            Arg::TrustedImm32(argc),
                        ],
                    );
                } else {
                    let this_arg = if A::VALUE_FITS_IN_REGISTER {
                        Arg::Value(Value::undefined())
                    } else {
                        // No `this`: a null value pointer.
                        Arg::TrustedImmPtr(0)
                    };
                    self.generate_function_call(
                        dest,
                        helper,
                        &[
                            Arg::Reg(A::CONTEXT_REGISTER),
                            this_arg,
                            Arg::Temp(*callee),
                            Arg::Pointer(argv),
                            Arg::TrustedImm32(argc),
                        ],
                    );
                }
            }
            CallTarget::Element { base, index } => {
                debug_assert!(!construct, "no construct form for element calls");
                self.generate_function_call(
                    dest,
                    RuntimeFunction::CallElement,
                    &[
                        Arg::Reg(A::CONTEXT_REGISTER),
                        Arg::Temp(*base),
                        Arg::Temp(*index),
                        Arg::Pointer(argv),
                        Arg::TrustedImm32(argc),
                    ],
                );
            }
        }
        self.check_exceptions();
    }

    /// Branch to the enclosing exception handler if the engine's exception
    /// slot is set. Elided for functions without a handler; the exception
    /// then unwinds through the helper's own longjmp path.
    fn check_exceptions(&mut self) {
        let Some(handler) = self.function.exception_handler else {
            return;
        };
        self.asm.load32(
            Mem::new(A::CONTEXT_REGISTER, CONTEXT_EXCEPTION_FLAG_OFFSET),
            A::SCRATCH_REGISTER,
        );
        let site = self.asm.branch_nonzero32(A::SCRATCH_REGISTER);
        self.record_branch(handler, site);
    }

    // ----- call lowering -----

    fn arg_stack_size(arg: &Arg) -> usize {
        match arg {
            Arg::Void => 0,
            Arg::Reg(_) => A::REGISTER_SIZE,
            Arg::TrustedImmPtr(_) | Arg::Pointer(_) | Arg::Identifier(_) => A::REGISTER_SIZE,
            Arg::TrustedImm32(_) => 4,
            Arg::Temp(_) => {
                if A::VALUE_FITS_IN_REGISTER {
                    VALUE_BYTES
                } else {
                    A::REGISTER_SIZE
                }
            }
            Arg::Value(_) => VALUE_BYTES,
        }
    }

    fn dest_size(dest: CallDest) -> usize {
        match dest {
            CallDest::Ignore => 0,
            CallDest::Reg(_) => A::REGISTER_SIZE,
            CallDest::Temp(_) => VALUE_BYTES,
        }
    }

    /// Emit one runtime-helper call: argument marshalling, the absolute
    /// call, return-value placement, and stack correction.
    fn generate_function_call(&mut self, dest: CallDest, f: RuntimeFunction, args: &[Arg]) {
        debug_assert!(args.len() <= 6);
        // When the call's purpose is to produce a new context (scope push and
        // pop), the saved context must not be restored over it.
        let save_context = A::CONTEXT_NEEDS_SAVE_AROUND_CALLS
            && !matches!(dest, CallDest::Reg(r) if r == A::CONTEXT_REGISTER);
        if save_context {
            self.asm.push_reg(A::CONTEXT_REGISTER);
        }

        // If necessary reserve space for the return value on the stack and
        // pass the pointer to it as a hidden first argument.
        let size_of_return_value = Self::dest_size(dest);
        let return_value_on_stack = size_of_return_value > A::REGISTER_SIZE;
        let mut total_args = args.len();
        if return_value_on_stack {
            self.asm
                .sub_ptr_imm(size_of_return_value as i32, A::STACK_POINTER_REGISTER);
            total_args += 1;
        }

        let mut register_index =
            (total_args as isize - 1).min(A::REGISTER_ARGUMENT_COUNT as isize - 1);
        let mut stack_space = 0usize;

        for arg in args.iter().rev() {
            if register_index >= 0 {
                if !matches!(arg, Arg::Void) {
                    let reg = A::register_for_argument(register_index as usize);
                    self.load_argument(arg, reg);
                }
                register_index -= 1;
            } else if !matches!(arg, Arg::Void) {
                self.push_argument(arg);
                stack_space += Self::arg_stack_size(arg);
            }
        }

        if return_value_on_stack {
            // Load the address of the return-value slot as the hidden first
            // argument.
            let slot = Mem::new(A::STACK_POINTER_REGISTER, stack_space as i32);
            if register_index >= 0 {
                let reg = A::register_for_argument(register_index as usize);
                self.asm.lea(slot, reg);
            } else {
                self.push_argument(&Arg::Pointer(slot));
                stack_space += A::REGISTER_SIZE;
            }
        }

        let address = self.helpers.address(f);
        self.calls_to_link.push(CallToLink {
            offset: self.asm.current_offset(),
            function: f,
        });
        self.asm.call_absolute(address);

        let mut stack_to_correct = stack_space as i32;
        if return_value_on_stack {
            // The callee pops the hidden argument; the slot itself is ours.
            stack_to_correct -= A::REGISTER_SIZE as i32;
            stack_to_correct += size_of_return_value as i32;
        }

        self.store_return_value(dest, return_value_on_stack);

        if stack_to_correct != 0 {
            self.asm
                .add_ptr_imm(stack_to_correct, A::STACK_POINTER_REGISTER);
        }

        if save_context {
            self.asm.pop_reg(A::CONTEXT_REGISTER);
        }
    }

    fn load_argument(&mut self, arg: &Arg, dest: Reg) {
        match arg {
            Arg::Void => unreachable!(),
            Arg::Reg(src) => {
                if *src != dest {
                    self.asm.move_reg(*src, dest);
                }
            }
            Arg::TrustedImmPtr(p) => self.asm.move_imm_ptr(*p, dest),
            Arg::TrustedImm32(imm) => {
                self.asm.zero_reg(dest);
                if *imm != 0 {
                    self.asm.move_imm32(*imm, dest);
                }
            }
            Arg::Temp(t) => {
                let addr = self.temp_address(*t);
                if A::VALUE_FITS_IN_REGISTER {
                    self.asm.load64(addr, dest);
                } else {
                    self.asm.lea(addr, dest);
                }
            }
            Arg::Pointer(mem) => self.asm.lea(*mem, dest),
            Arg::Value(v) => {
                debug_assert!(A::VALUE_FITS_IN_REGISTER);
                self.asm.move_imm_ptr(v.raw() as usize, dest);
            }
            Arg::Identifier(name) => {
                let ptr = self.identifiers.identifier(name);
                self.asm.move_imm_ptr(ptr, dest);
            }
        }
    }

    fn push_argument(&mut self, arg: &Arg) {
        match arg {
            Arg::Void => unreachable!(),
            Arg::Reg(src) => self.asm.push_reg(*src),
            Arg::TrustedImmPtr(p) => {
                self.asm.move_imm_ptr(*p, A::SCRATCH_REGISTER);
                self.asm.push_reg(A::SCRATCH_REGISTER);
            }
            Arg::TrustedImm32(imm) => {
                self.asm.zero_reg(A::SCRATCH_REGISTER);
                if *imm != 0 {
                    self.asm.move_imm32(*imm, A::SCRATCH_REGISTER);
                }
                self.asm.push_reg(A::SCRATCH_REGISTER);
            }
            Arg::Temp(t) => {
                let addr = self.temp_address(*t);
                if A::VALUE_FITS_IN_REGISTER {
                    self.asm.load64(addr, A::SCRATCH_REGISTER);
                    self.asm.push_reg(A::SCRATCH_REGISTER);
                } else {
                    self.asm.lea(addr, A::SCRATCH_REGISTER);
                    self.asm.push_reg(A::SCRATCH_REGISTER);
                }
            }
            Arg::Pointer(mem) => {
                self.asm.lea(*mem, A::SCRATCH_REGISTER);
                self.asm.push_reg(A::SCRATCH_REGISTER);
            }
            Arg::Value(v) => {
                // Two words, high first, so the value sits little-end-first
                // in memory.
                self.asm
                    .move_imm32((v.raw() >> 32) as i32, A::SCRATCH_REGISTER);
                self.asm.push_reg(A::SCRATCH_REGISTER);
                self.asm.move_imm32(v.raw() as i32, A::SCRATCH_REGISTER);
                self.asm.push_reg(A::SCRATCH_REGISTER);
            }
            Arg::Identifier(name) => {
                let ptr = self.identifiers.identifier(name);
                self.asm.move_imm_ptr(ptr, A::SCRATCH_REGISTER);
                self.asm.push_reg(A::SCRATCH_REGISTER);
            }
        }
    }

    fn store_return_value(&mut self, dest: CallDest, return_value_on_stack: bool) {
        match dest {
            CallDest::Ignore => {}
            CallDest::Reg(reg) => {
                if reg != A::RETURN_VALUE_REGISTER {
                    self.asm.move_reg(A::RETURN_VALUE_REGISTER, reg);
                }
            }
            CallDest::Temp(t) => {
                let dst = self.temp_address(t);
                if A::VALUE_FITS_IN_REGISTER {
                    self.asm.store64(A::RETURN_VALUE_REGISTER, dst);
                } else {
                    debug_assert!(return_value_on_stack);
                    // The return register holds the address of the value.
                    self.copy_value(dst, Mem::new(A::RETURN_VALUE_REGISTER, 0));
                }
            }
        }
    }

    // ----- data movement -----

    /// Copy one tagged value between two memory locations.
    fn copy_value(&mut self, dst: Mem, src: Mem) {
        if A::VALUE_FITS_IN_REGISTER {
            self.asm.load64(src, A::SCRATCH_REGISTER);
            self.asm.store64(A::SCRATCH_REGISTER, dst);
        } else {
            self.asm.load32(src, A::SCRATCH_REGISTER);
            self.asm.store32(A::SCRATCH_REGISTER, dst);
            self.asm
                .load32(Mem::new(src.base, src.offset + 4), A::SCRATCH_REGISTER);
            self.asm
                .store32(A::SCRATCH_REGISTER, Mem::new(dst.base, dst.offset + 4));
        }
    }

    /// Store a 64-bit bit pattern to memory.
    fn store_raw64(&mut self, bits: u64, dst: Mem) {
        if A::VALUE_FITS_IN_REGISTER {
            self.asm.move_imm_ptr(bits as usize, A::SCRATCH_REGISTER);
            self.asm.store64(A::SCRATCH_REGISTER, dst);
        } else {
            self.asm.move_imm32(bits as i32, A::SCRATCH_REGISTER);
            self.asm.store32(A::SCRATCH_REGISTER, dst);
            self.asm
                .move_imm32((bits >> 32) as i32, A::SCRATCH_REGISTER);
            self.asm
                .store32(A::SCRATCH_REGISTER, Mem::new(dst.base, dst.offset + 4));
        }
    }

    // ----- jumps -----

    fn jump_to_block(&mut self, target: BlockIndex) {
        if let Some(&offset) = self.addrs.get(&target) {
            self.asm.jump_to(offset);
        } else {
            let site = self.asm.jump();
            self.record_branch(target, site);
        }
    }

    fn record_branch(&mut self, target: BlockIndex, site: PatchSite) {
        if let Some(&offset) = self.addrs.get(&target) {
            self.asm.patch_jump(site, offset);
        } else {
            self.patches.entry(target).or_default().push(site);
        }
    }
}
