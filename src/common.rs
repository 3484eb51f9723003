//! 全局基础类型与错误定义

use std::path::PathBuf;
use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

/// 分区内的行号（从 0 开始）
pub type RowId     = i64;
/// 字典编码后的整数键
pub type SymbolKey = i32;

// ── 常量 ──────────────────────────────────────────────────────────────────────

/// 文件头：前 8 字节保存逻辑追加偏移（LE i64），数据区从这里开始
pub const HEADER_SIZE: u64 = 8;

/// `get_quick` 未找到
pub const VALUE_NOT_FOUND: SymbolKey = -2;
/// 值为 null
pub const VALUE_IS_NULL:   SymbolKey = -1;

pub const MIN_BIT_HINT: u32 = 8;
pub const MAX_BIT_HINT: u32 = 30;

/// 按记录大小与数量估算窗口大小的指数，结果限制在 [MIN_BIT_HINT, MAX_BIT_HINT]
pub fn bit_hint(record_size: usize, record_count: usize) -> u32 {
    let want = (record_size as u64)
        .saturating_mul(record_count as u64)
        .max(1)
        .checked_next_power_of_two()
        .unwrap_or(1 << 63);
    want.trailing_zeros().clamp(MIN_BIT_HINT, MAX_BIT_HINT)
}

// ── 枚举 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Read,
    Append,
    /// 批量读：映射方式同 Read
    BulkRead,
    /// 批量写：映射方式同 Append
    BulkAppend,
}

impl JournalMode {
    /// 文件映射层只区分读 / 写
    pub fn base(self) -> Self {
        match self {
            Self::BulkRead   => Self::Read,
            Self::BulkAppend => Self::Append,
            m                => m,
        }
    }

    pub fn is_writable(self) -> bool { self.base() == Self::Append }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("no such file: {0}")]
    NoSuchFile(PathBuf),
    #[error("I/O failure during {op} on {path}: {source}")]
    Io {
        path:   PathBuf,
        op:     String,
        #[source]
        source: std::io::Error,
    },
    #[error("file is read-only: {0}")]
    ReadOnly(PathBuf),
    #[error("span [{offset}, +{size}) is past end of {path} ({file_size} bytes)")]
    OutOfBounds {
        path:      PathBuf,
        offset:    u64,
        size:      usize,
        file_size: u64,
    },
    #[error("file is closed: {0}")]
    Closed(PathBuf),
    #[error("invalid value {value:?} for symbol {column}")]
    InvalidSymbolValue { column: String, value: String },
    #[error("invalid symbol key {key} for {column} (size={size})")]
    InvalidSymbolKey { column: String, key: SymbolKey, size: i32 },
    #[error("column {column} is not a {expected} column")]
    InvalidColumnType { column: String, expected: &'static str },
    #[error("row {row} out of range (size={size})")]
    InvalidRow { row: RowId, size: i64 },
    #[error("corrupt structure: {0}")]
    Corrupt(String),
    #[error("protocol desync: {0}")]
    ProtocolDesync(String),
    #[error("network error: {0}")]
    Network(#[source] std::io::Error),
}

impl JournalError {
    pub(crate) fn io(path: impl Into<PathBuf>, op: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), op: op.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, JournalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_hint_is_clamped() {
        assert_eq!(bit_hint(1, 1), MIN_BIT_HINT);
        assert_eq!(bit_hint(8, 1 << 20), 23);
        assert_eq!(bit_hint(3, 1000), 12);
        assert_eq!(bit_hint(usize::MAX, usize::MAX), MAX_BIT_HINT);
    }

    #[test]
    fn bulk_modes_map_to_base() {
        assert_eq!(JournalMode::BulkRead.base(), JournalMode::Read);
        assert_eq!(JournalMode::BulkAppend.base(), JournalMode::Append);
        assert!(JournalMode::BulkAppend.is_writable());
        assert!(!JournalMode::Read.is_writable());
    }
}
