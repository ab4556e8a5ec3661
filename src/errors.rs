use thiserror::Error;

/// Errors that can occur during assembly, module loading, or VM execution.
#[derive(Debug, Error)]
pub enum VMError {
    /// Unrecognized instruction mnemonic; no group claimed it.
    #[error("unknown instruction: {mnemonic}")]
    UnknownInstruction { mnemonic: String },
    /// Expected a register operand (e.g., `%S0`) but got something else.
    #[error("expected register, got {token}")]
    ExpectedRegister { token: String },
    /// Register name names no bank, has no index, or the index is out of range.
    #[error("invalid register {token}")]
    InvalidRegister { token: String },
    /// Float literal failed to parse.
    #[error("invalid float literal {token}")]
    InvalidFloatLiteral { token: String },
    /// Hex address literal failed to parse.
    #[error("invalid hex literal {token}")]
    InvalidHexLiteral { token: String },
    /// Unrecognized ALU sub-operation keyword.
    #[error("unknown ALU sub-operation {token}")]
    UnknownAluOp { token: String },
    /// Wrong number of operands for an instruction.
    #[error("{instruction} expects {expected} operand(s), got {actual}")]
    ArityMismatch {
        instruction: String,
        expected: usize,
        actual: usize,
    },
    /// Unrecognized `.` directive.
    #[error("unknown directive {directive}")]
    UnknownDirective { directive: String },
    /// Directive appeared after the first instruction.
    #[error("directive {directive} must precede all instructions")]
    MisplacedDirective { directive: String },
    /// Assembly error with source location context.
    #[error("line {line}: {message}")]
    AssemblyError {
        line: usize,
        offset: usize,
        message: String,
    },

    /// Undecodable instruction word encountered in the code stream.
    #[error("invalid instruction word {word:#010x} at offset {offset}")]
    InvalidInstruction { word: u32, offset: u32 },
    /// Decoded register id resolves to neither a real register nor a virtual alias.
    #[error("register id {index:#04x} out of bounds")]
    InvalidRegisterIndex { index: u8 },
    /// Read past the end of module code or VM memory.
    #[error("read of {len} byte(s) at offset {offset} out of bounds (available {available})")]
    ReadOutOfBounds {
        offset: u32,
        len: usize,
        available: usize,
    },
    /// Push onto a full operand stack.
    #[error("stack overflow")]
    StackOverflow,
    /// Pop from an empty operand stack.
    #[error("stack underflow")]
    StackUnderflow,

    /// Module file does not exist.
    #[error("module file not found: {path}")]
    FileNotFound { path: String },
    /// Module file has a bad magic, bad header, or inconsistent length.
    #[error("module file corrupt: {reason}")]
    FileCorrupt { reason: &'static str },
    /// File I/O error during assembly or module loading.
    #[error("io error on {path}: {reason}")]
    IoError { path: String, reason: String },
}
