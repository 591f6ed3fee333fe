//! エラー型の定義

use thiserror::Error;

/// エミュレータコアのエラー型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NesError {
    #[error("Invalid iNES header")]
    InvalidHeader,

    #[error("ROM image truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unsupported mapper: {0}")]
    UnsupportedMapper(u8),

    #[error("CHR address out of range: {0:#06X}")]
    InvalidChrAddress(u16),

    #[error("Unimplemented opcode {opcode:#04X} at PC {pc:#06X}")]
    UnimplementedOpcode { opcode: u8, pc: u16 },
}

/// Result型のエイリアス
pub type Result<T> = std::result::Result<T, NesError>;
