//! Core virtual machine implementation.
//!
//! The VM executes one shader module to completion per invocation, typically
//! once per pixel of an output surface. It owns a 38-register file, a
//! 256-slot typed operand stack, and a linear byte memory the host pokes
//! per-pixel inputs into. After [`run_to_end`](VM::run_to_end) the host reads
//! the framebuffer registers `FB0..FB3` as normalized RGBA.
//!
//! # Execution model
//!
//! Each step fetches a 32-bit little-endian word at `IP`, advances `IP` by 4,
//! decodes, and dispatches by exhaustive match on the decoded
//! [`Instruction`]. Any fault (out-of-bounds fetch, undecodable word,
//! unresolvable register id) halts the step: [`step`](VM::step) returns
//! `false` and the reason is recorded for [`fault`](VM::fault). Arithmetic
//! never faults.
//!
//! A VM instance is not internally synchronized; hosts that rasterize in
//! parallel run one VM per worker thread over a shared module.

mod registers;
mod stack;

pub use stack::STACK_CAPACITY;

use crate::errors::VMError;
use crate::isa::{
    AluOp, Instruction, REG_IP, REG_SP, REGISTER_COUNT, expand_register, register_name,
};
use crate::module::Module;
use crate::value::{Scalar, Value, ValueType, Variable, read_scalar, write_scalar};
use crate::vm::registers::RegisterFile;
use crate::vm::stack::Stack;
use std::fmt::Write as _;

/// Register-based shader virtual machine.
pub struct VM {
    memory: Vec<u8>,
    registers: RegisterFile,
    stack: Stack,
    program: Option<Module>,
    fault: Option<VMError>,
}

impl VM {
    /// Creates a VM with `mem_size` bytes of zeroed memory and zeroed
    /// registers. No program is loaded.
    pub fn new(mem_size: usize) -> Self {
        Self {
            memory: vec![0; mem_size],
            registers: RegisterFile::new(),
            stack: Stack::new(),
            program: None,
            fault: None,
        }
    }

    // =========================
    // Program manipulation
    // =========================

    /// Loads a module and resets all registers.
    ///
    /// The module's code buffer is shared, not copied; the caller keeps its
    /// own handle for introspection.
    pub fn load_program(&mut self, module: Module) {
        self.reset_registers();
        self.program = Some(module);
    }

    /// Returns the loaded module, if any.
    pub fn get_program(&self) -> Option<&Module> {
        self.program.as_ref()
    }

    // =========================
    // Register manipulation
    // =========================

    /// Reads a real register (`id < 38`). Virtual aliases are a decode-time
    /// concept and are not looked up here.
    pub fn get_register(&self, id: u8) -> Result<Value, VMError> {
        self.registers.get(id)
    }

    /// Writes a real register.
    pub fn set_register(&mut self, id: u8, value: Value) -> Result<(), VMError> {
        self.registers.set(id, value)
    }

    /// Zeros every real register and clears any recorded fault.
    pub fn reset_registers(&mut self) {
        self.registers.reset();
        self.fault = None;
    }

    /// Returns the fault that halted the last step, if the halt was not a
    /// clean `EXIT`.
    pub fn fault(&self) -> Option<&VMError> {
        self.fault.as_ref()
    }

    // =========================
    // Memory manipulation
    // =========================

    /// Little-endian typed write into VM memory.
    pub fn poke<T: Scalar>(&mut self, offset: u32, value: T) -> Result<(), VMError> {
        write_scalar(&mut self.memory, offset, value)
    }

    /// Little-endian typed read from VM memory.
    pub fn read<T: Scalar>(&self, offset: u32) -> Result<T, VMError> {
        read_scalar(&self.memory, offset)
    }

    /// Raw byte write into VM memory.
    pub fn poke_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), VMError> {
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|&end| end <= self.memory.len())
            .ok_or(VMError::ReadOutOfBounds {
                offset,
                len: bytes.len(),
                available: self.memory.len(),
            })?;
        self.memory[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Raw byte read from VM memory.
    pub fn peek(&self, offset: u32, len: usize) -> Result<&[u8], VMError> {
        let start = offset as usize;
        start
            .checked_add(len)
            .and_then(|end| self.memory.get(start..end))
            .ok_or(VMError::ReadOutOfBounds {
                offset,
                len,
                available: self.memory.len(),
            })
    }

    /// Size of VM memory in bytes.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    // =========================
    // Stack manipulation
    // =========================

    /// Pushes a typed value. `SP` (register 0) counts live entries; pushing
    /// past capacity is [`VMError::StackOverflow`].
    pub fn push(&mut self, value: Value, ty: ValueType) -> Result<(), VMError> {
        let sp = self.registers.get(REG_SP)?.as_u32();
        let sp = self.stack.push(sp, Variable { value, ty })?;
        self.registers.set(REG_SP, Value::from_u32(sp))
    }

    /// Pops the top entry. Popping an empty stack is
    /// [`VMError::StackUnderflow`].
    pub fn pop(&mut self) -> Result<Variable, VMError> {
        let sp = self.registers.get(REG_SP)?.as_u32();
        let (sp, var) = self.stack.pop(sp)?;
        self.registers.set(REG_SP, Value::from_u32(sp))?;
        Ok(var)
    }

    // =========================
    // Program execution
    // =========================

    /// Executes one instruction.
    ///
    /// Returns `false` when the program exits, when any fault halts
    /// execution (the reason is recorded for [`fault`](VM::fault)), or when
    /// no program is loaded.
    pub fn step(&mut self) -> bool {
        match self.try_step() {
            Ok(alive) => alive,
            Err(e) => {
                self.fault = Some(e);
                false
            }
        }
    }

    /// Runs [`step`](VM::step) until the program halts.
    pub fn run_to_end(&mut self) {
        while self.step() {}
    }

    fn try_step(&mut self) -> Result<bool, VMError> {
        // Cheap handle clone: the module buffer is shared, not copied.
        let Some(program) = self.program.clone() else {
            return Ok(false);
        };

        let ip = self.registers.get(REG_IP)?.as_u32();
        let word: u32 = program.read_value(ip)?;
        self.registers.set(REG_IP, Value::from_u32(ip + 4))?;

        let instr = Instruction::decode(word).map_err(|e| match e {
            VMError::InvalidInstruction { word, .. } => {
                VMError::InvalidInstruction { word, offset: ip }
            }
            other => other,
        })?;

        self.exec(&program, instr)
    }

    fn exec(&mut self, program: &Module, instr: Instruction) -> Result<bool, VMError> {
        match instr {
            Instruction::Exit => return Ok(false),
            Instruction::Mov { dst, src } => self.op_mov(dst, src)?,
            Instruction::Alu { op, dst, src } => self.op_alu(op, dst, src)?,
            Instruction::SetF32 { dst } => self.op_set_f32(program, dst)?,
            Instruction::LdF32 { dst } => self.op_ld_f32(program, dst)?,
            Instruction::AbsF32 { dst } => self.op_abs_f32(dst)?,
        }
        Ok(true)
    }

    /// Reads a 4-byte instruction tail at `IP` and advances past it.
    fn fetch_tail<T: Scalar>(&mut self, program: &Module) -> Result<T, VMError> {
        let ip = self.registers.get(REG_IP)?.as_u32();
        let value = program.read_value::<T>(ip)?;
        self.registers
            .set(REG_IP, Value::from_u32(ip + T::SIZE as u32))?;
        Ok(value)
    }

    /// Requires `id` to be a real register; group-2 targets cannot be
    /// virtual.
    fn real_register(id: u8) -> Result<u8, VMError> {
        if (id as usize) < REGISTER_COUNT {
            Ok(id)
        } else {
            Err(VMError::InvalidRegisterIndex { index: id })
        }
    }

    /// `MOV` is a single-slot raw copy with no lane expansion; a virtual
    /// operand rebases to its first scalar.
    fn op_mov(&mut self, dst: u8, src: u8) -> Result<(), VMError> {
        let (dst, _) = expand_register(dst).ok_or(VMError::InvalidRegisterIndex { index: dst })?;
        let (src, _) = expand_register(src).ok_or(VMError::InvalidRegisterIndex { index: src })?;
        let value = self.registers.get(src)?;
        self.registers.set(dst, value)
    }

    /// Per-lane `dst = op(dst, src)` on the f32 views.
    ///
    /// A virtual operand sets the lane count (4 for vectors, 16 for
    /// matrices) and steps one scalar per lane; a scalar operand beside a
    /// virtual one is broadcast, reading the same slot every lane.
    fn op_alu(&mut self, op: AluOp, dst: u8, src: u8) -> Result<(), VMError> {
        let (dst_base, dst_lanes) =
            expand_register(dst).ok_or(VMError::InvalidRegisterIndex { index: dst })?;
        let (src_base, src_lanes) =
            expand_register(src).ok_or(VMError::InvalidRegisterIndex { index: src })?;

        let lanes = dst_lanes.max(src_lanes) as u8;
        let dst_stride = (dst_lanes > 1) as u8;
        let src_stride = (src_lanes > 1) as u8;

        for lane in 0..lanes {
            let dst_reg = dst_base + lane * dst_stride;
            let a = self.registers.get(dst_reg)?.as_f32();
            let b = self.registers.get(src_base + lane * src_stride)?.as_f32();
            self.registers.set(dst_reg, Value::from_f32(op.apply(a, b)))?;
        }
        Ok(())
    }

    fn op_set_f32(&mut self, program: &Module, dst: u8) -> Result<(), VMError> {
        let dst = Self::real_register(dst)?;
        let literal: f32 = self.fetch_tail(program)?;
        self.registers.set(dst, Value::from_f32(literal))
    }

    fn op_ld_f32(&mut self, program: &Module, dst: u8) -> Result<(), VMError> {
        let dst = Self::real_register(dst)?;
        let address: u32 = self.fetch_tail(program)?;
        let value: f32 = self.read(address)?;
        self.registers.set(dst, Value::from_f32(value))
    }

    fn op_abs_f32(&mut self, dst: u8) -> Result<(), VMError> {
        let dst = Self::real_register(dst)?;
        let value = self.registers.get(dst)?.as_f32();
        self.registers.set(dst, Value::from_f32(value.abs()))
    }

    // =========================
    // Debugging
    // =========================

    /// Renders every real register, one per line. `SP`/`IP` print as
    /// integers, everything else as its f32 view.
    pub fn dump_registers(&self) -> String {
        let mut out = String::new();
        for id in 0..REGISTER_COUNT as u8 {
            let name = register_name(id).unwrap_or("?");
            let value = self.registers.get(id).unwrap_or(Value::ZERO);
            if id <= REG_IP {
                let _ = writeln!(out, "{name} = {}", value.as_u32());
            } else {
                let _ = writeln!(out, "{name} = {}", value.as_f32());
            }
        }
        out
    }

    /// Renders the live stack entries, newest first.
    pub fn dump_stack(&self) -> String {
        let sp = self
            .registers
            .get(REG_SP)
            .unwrap_or(Value::ZERO)
            .as_u32();
        let mut out = String::new();
        for (slot, var) in self.stack.live(sp).iter().enumerate().rev() {
            let value = match var.ty {
                ValueType::F32 | ValueType::F64 => format!("{}", var.value.as_f32()),
                ValueType::I16 => format!("{:#x}", var.value.as_i16()),
                ValueType::I32 => format!("{:#x}", var.value.as_i32()),
            };
            let _ = writeln!(out, "{slot} : ({}) = {value}", var.ty.name());
        }
        out
    }
}
