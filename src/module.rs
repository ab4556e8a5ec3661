//! Shader module representation and on-disk format.
//!
//! A module is an immutable code byte sequence tagged with a 16-bit type. On
//! disk it is preceded by a 4-byte magic and a packed header:
//!
//! ```text
//! offset  size  meaning
//! 0       4     magic     = 0x4D534353 ("SCSM", little-endian)
//! 4       2     type      = 0 (Vertex) | 1 (Fragment)
//! 6       4     code_len  (bytes)
//! 10      N     code bytes (code_len == N)
//! ```
//!
//! Fields are packed with no padding. Magic mismatch or any length
//! inconsistency is a load-time failure.

use crate::errors::VMError;
use crate::value::{Scalar, read_scalar};
use bytes::Bytes;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Magic bytes identifying a module file ("SCSM", little-endian).
pub const MODULE_MAGIC: u32 = 0x4D53_4353;

/// Byte length of magic + header preceding the code section.
pub const FILE_HEADER_LEN: usize = 10;

/// Kind of program a module holds.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ModuleType {
    /// Outputs clip-space XYZW per vertex.
    Vertex = 0x0000,
    /// Outputs framebuffer RGBA per pixel.
    #[default]
    Fragment = 0x0001,
}

impl ModuleType {
    fn from_bits(bits: u16) -> Option<ModuleType> {
        match bits {
            0x0000 => Some(ModuleType::Vertex),
            0x0001 => Some(ModuleType::Fragment),
            _ => None,
        }
    }
}

/// A compiled shader module.
///
/// The code buffer is shared and immutable; cloning a module bumps a
/// reference count rather than copying bytes, so a VM can hold one while the
/// host keeps another for introspection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Module {
    ty: ModuleType,
    code: Bytes,
}

impl Module {
    /// Creates a module from raw code bytes.
    pub fn new(ty: ModuleType, code: impl Into<Bytes>) -> Self {
        Self {
            ty,
            code: code.into(),
        }
    }

    pub fn module_type(&self) -> ModuleType {
        self.ty
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Bounds-checked little-endian read from the code section.
    ///
    /// Returns [`VMError::ReadOutOfBounds`] when `offset + size_of::<T>()`
    /// exceeds the code length; this is what halts the VM on a truncated
    /// fetch.
    pub fn read_value<T: Scalar>(&self, offset: u32) -> Result<T, VMError> {
        read_scalar(&self.code, offset)
    }

    /// Parses a serialized module (magic + header + code).
    pub fn from_bytes(input: &[u8]) -> Result<Module, VMError> {
        if input.len() < FILE_HEADER_LEN {
            return Err(VMError::FileCorrupt {
                reason: "truncated header",
            });
        }

        let magic = u32::from_le_bytes(input[0..4].try_into().unwrap());
        if magic != MODULE_MAGIC {
            return Err(VMError::FileCorrupt { reason: "bad magic" });
        }

        let ty_bits = u16::from_le_bytes(input[4..6].try_into().unwrap());
        let ty = ModuleType::from_bits(ty_bits).ok_or(VMError::FileCorrupt {
            reason: "unknown module type",
        })?;

        let code_len = u32::from_le_bytes(input[6..10].try_into().unwrap()) as usize;
        let code = &input[FILE_HEADER_LEN..];
        if code.len() != code_len {
            return Err(VMError::FileCorrupt {
                reason: "code length mismatch",
            });
        }

        Ok(Module {
            ty,
            code: Bytes::copy_from_slice(code),
        })
    }

    /// Serializes to the on-disk layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FILE_HEADER_LEN + self.code.len());
        out.extend_from_slice(&MODULE_MAGIC.to_le_bytes());
        out.extend_from_slice(&(self.ty as u16).to_le_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.code);
        out
    }

    /// Loads a module from a `.scsm` file.
    ///
    /// The file is read fully and closed within this call. A missing file is
    /// [`VMError::FileNotFound`]; any layout violation is
    /// [`VMError::FileCorrupt`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Module, VMError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                VMError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VMError::IoError {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        Module::from_bytes(&bytes)
    }

    /// Writes the module to a `.scsm` file in the on-disk layout.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), VMError> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes()).map_err(|e| VMError::IoError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Module {
        Module::new(ModuleType::Fragment, vec![0x00, 0x01, 0x02, 0x03])
    }

    #[test]
    fn round_trip() {
        let bytes = sample().to_bytes();
        let decoded = Module::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn layout_is_packed() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..4], b"SCSM");
        assert_eq!(u16::from_le_bytes(bytes[4..6].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[6..10].try_into().unwrap()), 4);
        assert_eq!(bytes.len(), FILE_HEADER_LEN + 4);
    }

    #[test]
    fn empty_code_round_trip() {
        let module = Module::new(ModuleType::Vertex, Vec::new());
        let decoded = Module::from_bytes(&module.to_bytes()).unwrap();
        assert_eq!(decoded.module_type(), ModuleType::Vertex);
        assert!(decoded.code().is_empty());
    }

    #[test]
    fn from_bytes_truncated_header() {
        let err = Module::from_bytes(&[0x53, 0x43]).unwrap_err();
        assert!(matches!(
            err,
            VMError::FileCorrupt {
                reason: "truncated header"
            }
        ));
    }

    #[test]
    fn from_bytes_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        let err = Module::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, VMError::FileCorrupt { reason: "bad magic" }));
    }

    #[test]
    fn from_bytes_unknown_type() {
        let mut bytes = sample().to_bytes();
        bytes[4] = 0x02;
        let err = Module::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            VMError::FileCorrupt {
                reason: "unknown module type"
            }
        ));
    }

    #[test]
    fn from_bytes_truncated_code() {
        let mut bytes = sample().to_bytes();
        bytes.truncate(bytes.len() - 1);
        let err = Module::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            VMError::FileCorrupt {
                reason: "code length mismatch"
            }
        ));
    }

    #[test]
    fn from_bytes_trailing_bytes() {
        let mut bytes = sample().to_bytes();
        bytes.push(0xFF);
        let err = Module::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            VMError::FileCorrupt {
                reason: "code length mismatch"
            }
        ));
    }

    #[test]
    fn read_value_bounds() {
        let module = sample();
        assert_eq!(module.read_value::<u32>(0).unwrap(), 0x03020100);
        assert!(matches!(
            module.read_value::<u32>(1),
            Err(VMError::ReadOutOfBounds { .. })
        ));
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join("scrim_module_round_trip.scsm");
        sample().write_to_file(&path).unwrap();
        let loaded = Module::load_from_file(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, sample());
    }

    #[test]
    fn load_missing_file() {
        let err = Module::load_from_file("/nonexistent/nowhere.scsm").unwrap_err();
        assert!(matches!(err, VMError::FileNotFound { .. }));
    }
}
