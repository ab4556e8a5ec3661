//! The flat register file backing the VM.

use crate::errors::VMError;
use crate::isa::REGISTER_COUNT;
use crate::value::Value;

/// Register file holding the 38 real registers.
///
/// Virtual aliases are a decode-time concept and never index this storage;
/// callers resolve them with [`expand_register`](crate::isa::expand_register)
/// first.
pub(super) struct RegisterFile {
    regs: [Value; REGISTER_COUNT],
}

impl RegisterFile {
    /// Creates a zeroed register file.
    pub(super) fn new() -> Self {
        Self {
            regs: [Value::ZERO; REGISTER_COUNT],
        }
    }

    /// Returns the value in register `idx`.
    ///
    /// Returns [`VMError::InvalidRegisterIndex`] if `idx` is not a real
    /// register.
    pub(super) fn get(&self, idx: u8) -> Result<Value, VMError> {
        self.regs
            .get(idx as usize)
            .copied()
            .ok_or(VMError::InvalidRegisterIndex { index: idx })
    }

    /// Stores a value into register `idx`.
    pub(super) fn set(&mut self, idx: u8, value: Value) -> Result<(), VMError> {
        let slot = self
            .regs
            .get_mut(idx as usize)
            .ok_or(VMError::InvalidRegisterIndex { index: idx })?;
        *slot = value;
        Ok(())
    }

    /// Zeros every real register.
    pub(super) fn reset(&mut self) {
        self.regs = [Value::ZERO; REGISTER_COUNT];
    }
}
