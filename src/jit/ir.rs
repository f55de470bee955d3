//! The three-address intermediate representation the instruction selector
//! consumes. The front end (parser + scope analysis) produces one
//! [`Function`] per JS function; each basic block is a statement sequence
//! ending in a jump or return.

/// A pseudo-register. Every temp is materialized at a fixed offset in the
/// JIT-managed stack frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Temp {
    pub index: u32,
    pub kind: TempKind,
}

impl Temp {
    pub fn value(index: u32) -> Temp {
        Temp {
            index,
            kind: TempKind::Value,
        }
    }

    pub fn double(index: u32) -> Temp {
        Temp {
            index,
            kind: TempKind::Double,
        }
    }
}

/// Statically known type of a temp. Known-double temps are moved through the
/// FP scratch register instead of a value load.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TempKind {
    Value,
    Double,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ConstValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Double(f64),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    UMinus,
    UPlus,
    Compl,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    InstanceOf,
    In,
}

/// What a call invokes. The four shapes lower to different runtime helpers
/// with different signatures.
#[derive(Clone, Debug)]
pub enum CallTarget {
    /// A name looked up in the scope chain: `f(...)`.
    ActivationProperty(String),
    /// A property of a base object: `o.f(...)`.
    Property { base: Temp, name: String },
    /// An arbitrary callee value: `t(...)`.
    Value(Temp),
    /// An indexed element: `o[i](...)`.
    Element { base: Temp, index: Temp },
}

#[derive(Clone, Debug)]
pub enum Expr {
    Const(ConstValue),
    Temp(Temp),
    /// A name resolved through the scope chain.
    Name(String),
    /// A named property of a base object.
    Member { base: Temp, name: String },
    /// An indexed element of a base object.
    Subscript { base: Temp, index: Temp },
    Unop { op: UnaryOp, expr: Temp },
    Binop { op: BinaryOp, left: Temp, right: Temp },
    Call { target: CallTarget, args: Vec<Expr> },
    New { target: CallTarget, args: Vec<Expr> },
}

/// The writable locations a `Move` can target.
#[derive(Clone, Debug)]
pub enum MoveTarget {
    Temp(Temp),
    Name(String),
    Member { base: Temp, name: String },
    Subscript { base: Temp, index: Temp },
}

/// A scope pushed by an `Enter` statement.
#[derive(Clone, Debug)]
pub enum ScopeKind {
    /// `with (obj)`: the object to push is in a temp.
    With(Temp),
    /// `catch (name)`: binds the exception to `name`.
    Catch(String),
}

#[derive(Clone, Debug)]
pub enum Stmt {
    /// Evaluate for side effects only.
    Exp(Expr),
    Move { target: MoveTarget, source: Expr },
    Jump { target: BlockIndex },
    CJump {
        cond: Temp,
        iftrue: BlockIndex,
        iffalse: BlockIndex,
    },
    Ret { value: Option<Temp> },
    Enter { scope: ScopeKind },
    Leave,
}

pub type BlockIndex = usize;

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub statements: Vec<Stmt>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct FunctionFlags {
    pub has_direct_eval: bool,
    pub uses_arguments_object: bool,
    pub is_strict: bool,
    pub has_nested_functions: bool,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub formals: Vec<String>,
    pub locals: Vec<String>,
    /// Number of stack temps (includes locals).
    pub temp_count: usize,
    /// The widest argument list of any call in the body; sizes the per-frame
    /// outgoing argument area.
    pub max_call_args: usize,
    pub basic_blocks: Vec<BasicBlock>,
    /// Block receiving control when a helper raised an exception, if any.
    pub exception_handler: Option<BlockIndex>,
    pub flags: FunctionFlags,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Function {
        Function {
            name: name.into(),
            formals: Vec::new(),
            locals: Vec::new(),
            temp_count: 0,
            max_call_args: 0,
            basic_blocks: Vec::new(),
            exception_handler: None,
            flags: FunctionFlags::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}
