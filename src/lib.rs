//! # journal-store
//!
//! 基于内存映射的列式 journal 存储，以及字典表的增量复制协议。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Partition                             │
//! │   ColumnMetadata × N  →  FixedColumn / VariableColumn / Symbol │
//! │                                                               │
//! │   Symbol 列                                                   │
//! │   ┌──────────────┐   ┌──────────────────────────────────┐     │
//! │   │ FixedColumn  │   │ SymbolTable                      │     │
//! │   │ (i32 key)    │──▶│  ├─ VariableColumn  (.symd/.symi) │     │
//! │   └──────────────┘   │  ├─ HashIndex       (.symr)       │     │
//! │                      │  └─ value / key 缓存              │     │
//! │                      └──────────────────────────────────┘     │
//! │                                                               │
//! │   每个文件 = MappedFile                                        │
//! │   [8B header: append offset][window 0][window 1] ...           │
//! │   跨窗口访问由 stitch window 拼接                               │
//! └──────────────────────────────────────────────────────────────┘
//!
//!   net: [i32 len][payload] 帧
//!   slave ── ClientState ──▶ master ── SymbolTableDelta ──▶ slave
//! ```

// ── 存储层 ────────────────────────────────────────────────────────────────────
pub mod common;
pub mod mapped_file;
pub mod column;
pub mod fixed_column;
pub mod variable_column;
pub mod index;
pub mod symbol_table;

// ── 元数据 / 分区 ─────────────────────────────────────────────────────────────
pub mod meta;
pub mod partition;

// ── 复制 ──────────────────────────────────────────────────────────────────────
pub mod net;

pub use common::{JournalError, JournalMode, Result};
pub use partition::Partition;
pub use symbol_table::{SymbolTable, SymbolTableOptions};
