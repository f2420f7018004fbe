/// Complete instruction set for the unit-script VM.
///
/// Stack-based: every instruction pops its operands off and pushes its
/// result back on, rather than addressing registers. Jump targets are
/// absolute instruction indices, not relative offsets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OpCode {
    // =====================================================================
    // CONTROL
    // =====================================================================
    /// No operation; used to keep line-number mapping aligned.
    Nop = 0x00,
    /// Terminate the program. Idempotent: stepping a halted VM is a no-op.
    Halt = 0x01,

    // =====================================================================
    // LOAD / STORE
    // =====================================================================
    /// push constants\[arg\]
    LoadConst = 0x10,
    /// push vars\[arg\]; NameError if unbound
    LoadVar = 0x11,
    /// pop -> vars\[arg\]
    StoreVar = 0x12,
    /// pop obj -> push obj.arg
    LoadAttr = 0x13,

    // =====================================================================
    // COLLECTIONS
    // =====================================================================
    /// pop arg values -> push list
    BuildList = 0x18,
    /// pop key, pop container -> push container\[key\]
    GetIndex = 0x19,

    // =====================================================================
    // ARITHMETIC
    // =====================================================================
    BinaryAdd = 0x20,
    BinarySub = 0x21,
    BinaryMul = 0x22,
    BinaryDiv = 0x23,
    BinaryFloorDiv = 0x24,
    BinaryMod = 0x25,
    BinaryPow = 0x26,

    // =====================================================================
    // COMPARISON
    // =====================================================================
    CompareEq = 0x28,
    CompareNe = 0x29,
    CompareLt = 0x2A,
    CompareGt = 0x2B,
    CompareLe = 0x2C,
    CompareGe = 0x2D,

    // =====================================================================
    // UNARY
    // =====================================================================
    UnaryNeg = 0x30,
    UnaryNot = 0x31,

    // =====================================================================
    // CONTROL FLOW
    // =====================================================================
    /// Unconditional jump to an absolute instruction index.
    Jump = 0x38,
    /// Pop; if falsy, jump.
    PopJumpIfFalse = 0x39,
    /// Non-popping; jump if top-of-stack is falsy (short-circuit AND).
    JumpIfFalse = 0x3A,
    /// Non-popping; jump if top-of-stack is truthy (short-circuit OR).
    JumpIfTrue = 0x3B,

    // =====================================================================
    // ITERATION
    // =====================================================================
    /// pop iterable -> push iterator state
    GetIter = 0x40,
    /// if exhausted: pop iterator, jump to target; else push next value
    ForIter = 0x41,

    // =====================================================================
    // FUNCTIONS
    // =====================================================================
    /// pop arity args, pop callee -> push result
    Call = 0x48,
    /// push Function value built from the nested program at the given index
    MakeFunction = 0x49,
    /// pop -> return from current frame
    ReturnValue = 0x4A,
}

impl OpCode {
    /// Decode a u8 into an OpCode, returning None for invalid values.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Halt),

            0x10 => Some(Self::LoadConst),
            0x11 => Some(Self::LoadVar),
            0x12 => Some(Self::StoreVar),
            0x13 => Some(Self::LoadAttr),

            0x18 => Some(Self::BuildList),
            0x19 => Some(Self::GetIndex),

            0x20 => Some(Self::BinaryAdd),
            0x21 => Some(Self::BinarySub),
            0x22 => Some(Self::BinaryMul),
            0x23 => Some(Self::BinaryDiv),
            0x24 => Some(Self::BinaryFloorDiv),
            0x25 => Some(Self::BinaryMod),
            0x26 => Some(Self::BinaryPow),

            0x28 => Some(Self::CompareEq),
            0x29 => Some(Self::CompareNe),
            0x2A => Some(Self::CompareLt),
            0x2B => Some(Self::CompareGt),
            0x2C => Some(Self::CompareLe),
            0x2D => Some(Self::CompareGe),

            0x30 => Some(Self::UnaryNeg),
            0x31 => Some(Self::UnaryNot),

            0x38 => Some(Self::Jump),
            0x39 => Some(Self::PopJumpIfFalse),
            0x3A => Some(Self::JumpIfFalse),
            0x3B => Some(Self::JumpIfTrue),

            0x40 => Some(Self::GetIter),
            0x41 => Some(Self::ForIter),

            0x48 => Some(Self::Call),
            0x49 => Some(Self::MakeFunction),
            0x4A => Some(Self::ReturnValue),

            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
