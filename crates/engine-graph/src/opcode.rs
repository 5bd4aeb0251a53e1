/// The engine's closed instruction set. Dispatch is a single match in
/// [`crate::vm`]; adding a variant here is the only way to extend what a
/// `Program` can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Noop,
    End,
    Copy,
    Clear,
    Mix,
    Mul,
    SetFloat,
    FetchControlValue,
    PostRms,
    Noise,
    Sine,
    MidiMonkey,
    ConnectPort,
    Call,
    CallChildRealm,
    LogRms,
    LogAtom,
}

impl OpCode {
    /// `true` for opcodes whose handler only needs to run once per Program
    /// version rather than on every block.
    pub fn is_init_only(&self) -> bool {
        matches!(self, OpCode::ConnectPort)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpArg {
    Int(i64),
    Float(f32),
    Str(String),
}

impl OpArg {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            OpArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            OpArg::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OpArg::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: OpCode,
    pub args: Vec<OpArg>,
}

impl Instruction {
    pub fn new(op: OpCode, args: Vec<OpArg>) -> Self {
        Instruction { op, args }
    }
}
