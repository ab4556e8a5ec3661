//! Assembly language parser and bytecode compiler.
//!
//! Converts `.scsa` shader assembly source into module code bytes.
//!
//! # Syntax
//!
//! ```text
//! ; full-line comment
//! .fragment                  ; optional module-type directive, before any code
//! SET_F32 %FB0 1.0           ; mnemonic + whitespace-separated operands
//! ALU_F32_F32 MUL %S0 %S1
//! LD_F32 %S2 1C              ; memory addresses are unprefixed hex
//! EXIT
//! ```
//!
//! - Mnemonics and register names are case-insensitive (normalized to upper)
//! - Registers use `%` plus a bank letter and index: `%FB0..3`, `%S0..31`,
//!   `%V0..7`, `%M0..1`
//! - Float literals are any decimal-double form, narrowed to f32
//! - `;` starts a comment, whole-line or trailing
//!
//! Each line dispatches to the group assemblers in order; a mnemonic is
//! unknown only if no group claims it. The first error aborts the compile and
//! is rendered as a compiler-style diagnostic on stderr.

use crate::errors::VMError;
use crate::isa::{
    AluOp, Instruction, REG_FB0, REG_M0, REG_S0, REG_V0,
};
use crate::module::{Module, ModuleType};
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = ';';
const REGISTER_PREFIX: char = '%';
const DIRECTIVE_PREFIX: char = '.';

/// Output of a successful compile: code bytes plus the header fields the
/// module file needs.
#[derive(Debug, Clone)]
pub struct AssembledProgram {
    /// Module type for the header. Defaults to [`ModuleType::Fragment`]
    /// unless a `.vertex` directive says otherwise.
    pub module_type: ModuleType,
    /// Emitted code bytes: 32-bit little-endian words plus literal tails.
    pub binary: Vec<u8>,
}

impl AssembledProgram {
    /// Code section length for the module header.
    pub fn code_len(&self) -> u32 {
        self.binary.len() as u32
    }

    /// Converts into a loadable [`Module`], transferring the code bytes.
    pub fn into_module(self) -> Module {
        Module::new(self.module_type, self.binary)
    }

    /// Writes magic + header + code in the `.scsm` on-disk layout.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), VMError> {
        Module::new(self.module_type, self.binary.clone()).write_to_file(path)
    }
}

#[derive(Debug, Clone)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column offset in the line.
    offset: usize,
}

/// Splits one (already upper-cased) line into whitespace-separated tokens,
/// dropping everything from the first `;` on.
fn tokenize(line: &str) -> Vec<Token<'_>> {
    let body = line.split(COMMENT_CHAR).next().unwrap_or("");
    let mut out = Vec::new();
    let mut start: Option<usize> = None;

    for (i, ch) in body.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                out.push(Token {
                    text: &body[s..i],
                    offset: s + 1,
                });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push(Token {
            text: &body[s..],
            offset: s + 1,
        });
    }

    out
}

/// Parses a register token like `%FB0`, `%S31`, `%V3`, `%M1` into its 8-bit
/// register id. Virtual banks map to their alias ids (`0xF0+`, `0xF8+`).
///
/// Expects the token already normalized to upper case.
pub(crate) fn parse_register(tok: &str) -> Result<u8, VMError> {
    let body = tok
        .strip_prefix(REGISTER_PREFIX)
        .ok_or_else(|| VMError::ExpectedRegister {
            token: tok.to_string(),
        })?;

    let invalid = || VMError::InvalidRegister {
        token: tok.to_string(),
    };

    let digits_at = body
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (bank, digits) = body.split_at(digits_at);
    let index: u8 = digits.parse().map_err(|_| invalid())?;

    match bank {
        "FB" if index < 4 => Ok(REG_FB0 + index),
        "S" if index < 32 => Ok(REG_S0 + index),
        "V" if index < 8 => Ok(REG_V0 + index),
        "M" if index < 2 => Ok(REG_M0 + index),
        _ => Err(invalid()),
    }
}

/// Parses a float literal (any decimal-double form, narrowed to f32).
pub(crate) fn parse_f32(tok: &str) -> Result<f32, VMError> {
    tok.parse::<f64>()
        .map(|v| v as f32)
        .map_err(|_| VMError::InvalidFloatLiteral {
            token: tok.to_string(),
        })
}

/// Parses an unprefixed hexadecimal u32 memory address.
pub(crate) fn parse_hex_u32(tok: &str) -> Result<u32, VMError> {
    u32::from_str_radix(tok, 16).map_err(|_| VMError::InvalidHexLiteral {
        token: tok.to_string(),
    })
}

fn expect_arity(tokens: &[Token], expected: usize) -> Result<(), VMError> {
    let actual = tokens.len() - 1;
    if actual != expected {
        return Err(VMError::ArityMismatch {
            instruction: tokens[0].text.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn emit_word(out: &mut Vec<u8>, word: u32) {
    out.extend_from_slice(&word.to_le_bytes());
}

/// Group 0 (control). Returns `Ok(false)` when the mnemonic is not in this
/// group, so the dispatcher can fall through to the next one.
fn assemble_control(tokens: &[Token], out: &mut Vec<u8>) -> Result<bool, VMError> {
    match tokens[0].text {
        "EXIT" => {
            expect_arity(tokens, 0)?;
            emit_word(out, Instruction::Exit.encode());
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Group 1 (ALU): `MOV` and `ALU_F32_F32`.
fn assemble_alu(tokens: &[Token], out: &mut Vec<u8>) -> Result<bool, VMError> {
    match tokens[0].text {
        "MOV" => {
            expect_arity(tokens, 2)?;
            let dst = parse_register(tokens[1].text)?;
            let src = parse_register(tokens[2].text)?;
            emit_word(out, Instruction::Mov { dst, src }.encode());
            Ok(true)
        }
        "ALU_F32_F32" => {
            expect_arity(tokens, 3)?;
            let op = AluOp::from_mnemonic(tokens[1].text).ok_or_else(|| VMError::UnknownAluOp {
                token: tokens[1].text.to_string(),
            })?;
            let dst = parse_register(tokens[2].text)?;
            let src = parse_register(tokens[3].text)?;
            emit_word(out, Instruction::Alu { op, dst, src }.encode());
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Group 2 (immediate/memory): `SET_F32`, `LD_F32`, `ABS_F32`.
fn assemble_imm_mem(tokens: &[Token], out: &mut Vec<u8>) -> Result<bool, VMError> {
    match tokens[0].text {
        "SET_F32" => {
            expect_arity(tokens, 2)?;
            let dst = parse_register(tokens[1].text)?;
            let literal = parse_f32(tokens[2].text)?;
            emit_word(out, Instruction::SetF32 { dst }.encode());
            out.extend_from_slice(&literal.to_le_bytes());
            Ok(true)
        }
        "LD_F32" => {
            expect_arity(tokens, 2)?;
            let dst = parse_register(tokens[1].text)?;
            let address = parse_hex_u32(tokens[2].text)?;
            emit_word(out, Instruction::LdF32 { dst }.encode());
            out.extend_from_slice(&address.to_le_bytes());
            Ok(true)
        }
        "ABS_F32" => {
            expect_arity(tokens, 1)?;
            let dst = parse_register(tokens[1].text)?;
            emit_word(out, Instruction::AbsF32 { dst }.encode());
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Dispatches one instruction line to the group assemblers in order.
fn assemble_line(tokens: &[Token], out: &mut Vec<u8>) -> Result<(), VMError> {
    if assemble_control(tokens, out)? {
        return Ok(());
    }
    if assemble_alu(tokens, out)? {
        return Ok(());
    }
    if assemble_imm_mem(tokens, out)? {
        return Ok(());
    }
    Err(VMError::UnknownInstruction {
        mnemonic: tokens[0].text.to_string(),
    })
}

/// Applies a `.vertex` / `.fragment` module-type directive.
fn apply_directive(
    tokens: &[Token],
    saw_instruction: bool,
    module_type: &mut ModuleType,
) -> Result<(), VMError> {
    expect_arity(tokens, 0)?;
    let directive = tokens[0].text;
    if saw_instruction {
        return Err(VMError::MisplacedDirective {
            directive: directive.to_string(),
        });
    }
    match directive {
        ".VERTEX" => *module_type = ModuleType::Vertex,
        ".FRAGMENT" => *module_type = ModuleType::Fragment,
        _ => {
            return Err(VMError::UnknownDirective {
                directive: directive.to_string(),
            });
        }
    }
    Ok(())
}

fn compile_internal(source: &str) -> Result<AssembledProgram, VMError> {
    let mut binary = Vec::new();
    let mut module_type = ModuleType::Fragment;
    let mut saw_instruction = false;

    for (idx, raw_line) in source.lines().enumerate() {
        let line = raw_line.to_ascii_uppercase();
        let tokens = tokenize(&line);
        let Some(first) = tokens.first() else {
            continue;
        };
        let offset = first.offset;

        let result = if first.text.starts_with(DIRECTIVE_PREFIX) {
            apply_directive(&tokens, saw_instruction, &mut module_type)
        } else {
            saw_instruction = true;
            assemble_line(&tokens, &mut binary)
        };
        result.map_err(|e| VMError::AssemblyError {
            line: idx + 1,
            offset,
            message: e.to_string(),
        })?;
    }

    Ok(AssembledProgram {
        module_type,
        binary,
    })
}

/// Return the line/column/message triple carried by assembly errors.
fn assembly_error_location(err: &VMError) -> Option<(usize, usize, String)> {
    match err {
        VMError::AssemblyError {
            line,
            offset,
            message,
        } => Some((*line, *offset, message.clone())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for assembly failures.
fn render_diagnostic(file: &str, source: &str, line: usize, offset: usize, message: &str) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

/// Emits a helpful diagnostic to stderr for assembly errors.
fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    if let Some((line, offset, message)) = assembly_error_location(err) {
        eprintln!("{}", render_diagnostic(file, source, line, offset, &message));
    } else {
        eprintln!("error: {err}");
    }
}

fn compile_named(source: &str, source_name: &str) -> Result<AssembledProgram, VMError> {
    let result = compile_internal(source);
    if let Err(err) = &result {
        log_assembly_error(source_name, source, err);
    }
    result
}

/// Compiles assembly source text into an [`AssembledProgram`].
///
/// Compilation stops at the first error, which is surfaced to the caller and
/// rendered as a diagnostic on stderr.
pub fn compile_source(source: &str) -> Result<AssembledProgram, VMError> {
    compile_named(source, "<source>")
}

/// Convenience: compile directly from a `.scsa` file path.
pub fn compile_file<P: AsRef<Path>>(path: P) -> Result<AssembledProgram, VMError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|e| VMError::IoError {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    compile_named(&source, &path.display().to_string())
}
