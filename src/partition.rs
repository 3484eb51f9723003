//! 分区：一个目录下按元数据打开的一组列
//!
//! 文件命名：
//! - 定长列      `name.d`
//! - 变长列      `name.d` + `name.i`
//! - 字典列      `name.d`（i32 key）+ `name.symd` / `name.symi` / `name.symr`

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::column::Column;
use crate::common::{JournalError, JournalMode, Result, RowId, SymbolKey, VALUE_IS_NULL};
use crate::fixed_column::FixedColumn;
use crate::meta::{ColumnKind, ColumnMetadata};
use crate::symbol_table::SymbolTable;
use crate::variable_column::VariableColumn;

pub enum ColumnStore {
    Fixed(FixedColumn),
    Variable(VariableColumn),
    Symbol { keys: FixedColumn, table: SymbolTable },
}

fn wrong_type(metadata: &[ColumnMetadata], column: usize, expected: &'static str) -> JournalError {
    JournalError::InvalidColumnType {
        column: metadata.get(column).map_or_else(|| format!("#{column}"), |m| m.name.clone()),
        expected,
    }
}

impl ColumnStore {
    fn as_column(&mut self) -> &mut dyn Column {
        match self {
            Self::Fixed(c)            => c,
            Self::Variable(c)         => c,
            Self::Symbol { keys, .. } => keys,
        }
    }

    fn size(&self) -> i64 {
        match self {
            Self::Fixed(c)            => c.size(),
            Self::Variable(c)         => c.size(),
            Self::Symbol { keys, .. } => keys.size(),
        }
    }
}

pub struct Partition {
    directory: PathBuf,
    mode:      JournalMode,
    metadata:  Vec<ColumnMetadata>,
    columns:   Vec<ColumnStore>,
}

impl Partition {
    pub fn open(directory: impl AsRef<Path>, metadata: &[ColumnMetadata], mode: JournalMode) -> Result<Self> {
        let dir = directory.as_ref();
        let mut columns = Vec::with_capacity(metadata.len());
        for m in metadata {
            let path = |ext: &str| dir.join(format!("{}.{ext}", m.name));
            let store = match m.kind {
                ColumnKind::Fixed { width } =>
                    ColumnStore::Fixed(FixedColumn::open(path("d"), m.bit_hint(), mode.base(), width)?),
                ColumnKind::Variable =>
                    ColumnStore::Variable(VariableColumn::open(
                        path("d"), m.bit_hint(), path("i"), crate::common::bit_hint(8, m.capacity), mode.base(),
                    )?),
                ColumnKind::Symbol => {
                    let keys = FixedColumn::open(path("d"), m.bit_hint(), mode.base(), 4)?;
                    let table = SymbolTable::open(dir, &m.name, mode, m.symbol_options(), None, -1)?;
                    ColumnStore::Symbol { keys, table }
                }
            };
            debug!(dir = %dir.display(), column = %m.name, kind = m.kind.name(), "partition.open_column");
            columns.push(store);
        }
        Ok(Self { directory: dir.to_path_buf(), mode, metadata: metadata.to_vec(), columns })
    }

    // ── 类型化访问 ────────────────────────────────────────────────────────────

    pub fn fixed_column(&mut self, column: usize) -> Result<&mut FixedColumn> {
        match self.columns.get_mut(column) {
            Some(ColumnStore::Fixed(c)) => Ok(c),
            _                           => Err(wrong_type(&self.metadata, column, "fixed")),
        }
    }

    pub fn variable_column(&mut self, column: usize) -> Result<&mut VariableColumn> {
        match self.columns.get_mut(column) {
            Some(ColumnStore::Variable(c)) => Ok(c),
            _                              => Err(wrong_type(&self.metadata, column, "variable")),
        }
    }

    pub fn symbol_table(&mut self, column: usize) -> Result<&mut SymbolTable> {
        match self.columns.get_mut(column) {
            Some(ColumnStore::Symbol { table, .. }) => Ok(table),
            _ => Err(wrong_type(&self.metadata, column, "symbol")),
        }
    }

    /// 字典编码并追加 key，返回行号
    pub fn put_symbol<'a>(&mut self, column: usize, value: impl Into<Option<&'a str>>) -> Result<RowId> {
        match self.columns.get_mut(column) {
            Some(ColumnStore::Symbol { keys, table }) => {
                let key = table.put(value)?;
                keys.put_i32(key)
            }
            _ => Err(wrong_type(&self.metadata, column, "symbol")),
        }
    }

    pub fn get_symbol(&mut self, column: usize, row: RowId) -> Result<Option<String>> {
        match self.columns.get_mut(column) {
            Some(ColumnStore::Symbol { keys, table }) => {
                let key: SymbolKey = keys.get_i32(row)?;
                if key == VALUE_IS_NULL {
                    return Ok(None);
                }
                table.value(key).map(Some)
            }
            _ => Err(wrong_type(&self.metadata, column, "symbol")),
        }
    }

    /// 按列序排列的字典列下标
    pub fn symbol_columns(&self) -> Vec<usize> {
        self.columns.iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, ColumnStore::Symbol { .. }))
            .map(|(i, _)| i)
            .collect()
    }

    /// 各字典列当前的 size，顺序同 symbol_columns()
    pub fn symbol_table_sizes(&self) -> Vec<i32> {
        self.columns.iter()
            .filter_map(|c| match c {
                ColumnStore::Symbol { table, .. } => Some(table.size()),
                _                                 => None,
            })
            .collect()
    }

    // ── 生命周期 ──────────────────────────────────────────────────────────────

    /// 以第一列为准的行数
    pub fn row_count(&self) -> i64 {
        self.columns.first().map_or(0, ColumnStore::size)
    }

    pub fn commit(&mut self) -> Result<()> {
        for store in &mut self.columns {
            store.as_column().commit()?;
            if let ColumnStore::Symbol { table, .. } = store {
                table.commit()?;
            }
        }
        Ok(())
    }

    pub fn force(&mut self) -> Result<()> {
        for store in &mut self.columns {
            store.as_column().force()?;
            if let ColumnStore::Symbol { table, .. } = store {
                table.force()?;
            }
        }
        Ok(())
    }

    pub fn close(&mut self) {
        for store in &mut self.columns {
            store.as_column().close();
            if let ColumnStore::Symbol { table, .. } = store {
                table.close();
            }
        }
    }

    pub fn directory(&self) -> &Path { &self.directory }

    pub fn mode(&self) -> JournalMode { self.mode }

    pub fn metadata(&self) -> &[ColumnMetadata] { &self.metadata }
}
