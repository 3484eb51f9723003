//! 列元数据：决定每列用哪种存储

use crate::common::bit_hint;
use crate::symbol_table::SymbolTableOptions;

// ── 列类型 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// 定长列，width 为每行字节数
    Fixed { width: usize },
    /// 变长字符串 / 二进制
    Variable,
    /// 字典编码字符串：i32 key 列 + SymbolTable
    Symbol,
}

impl ColumnKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Fixed { .. } => "fixed",
            Self::Variable     => "variable",
            Self::Symbol       => "symbol",
        }
    }
}

// ── 列定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    pub name:     String,
    pub kind:     ColumnKind,
    /// 变长 / 字典列的平均值字节数
    pub avg_size: usize,
    /// 预估行数（字典列为预估的不同值个数）
    pub capacity: usize,
}

impl ColumnMetadata {
    pub fn fixed(name: &str, width: usize, capacity: usize) -> Self {
        Self { name: name.into(), kind: ColumnKind::Fixed { width }, avg_size: width, capacity }
    }

    pub fn int(name: &str, capacity: usize) -> Self    { Self::fixed(name, 4, capacity) }
    pub fn long(name: &str, capacity: usize) -> Self   { Self::fixed(name, 8, capacity) }
    pub fn double(name: &str, capacity: usize) -> Self { Self::fixed(name, 8, capacity) }

    pub fn string(name: &str, avg_size: usize, capacity: usize) -> Self {
        Self { name: name.into(), kind: ColumnKind::Variable, avg_size, capacity }
    }

    pub fn symbol(name: &str, avg_size: usize, distinct: usize) -> Self {
        Self { name: name.into(), kind: ColumnKind::Symbol, avg_size, capacity: distinct }
    }

    /// 定长部分的宽度（字典列是 4 字节 key）
    pub fn width(&self) -> usize {
        match self.kind {
            ColumnKind::Fixed { width } => width,
            ColumnKind::Variable        => 8,
            ColumnKind::Symbol          => 4,
        }
    }

    pub fn bit_hint(&self) -> u32 {
        match self.kind {
            ColumnKind::Variable => bit_hint(self.avg_size + 4, self.capacity),
            _                    => bit_hint(self.width(), self.capacity),
        }
    }

    pub fn symbol_options(&self) -> SymbolTableOptions {
        SymbolTableOptions { capacity: self.capacity, avg_string_size: self.avg_size }
    }
}
