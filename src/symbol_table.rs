//! 字典编码：string ↔ i32 key
//!
//! 每个列 `C` 在分区目录下对应三个文件：
//! - `C.symd`：字符串数据（VariableColumn 的 data）
//! - `C.symi`：字符串索引（VariableColumn 的 index）
//! - `C.symr`：哈希索引 hash(value) mod hash_key_count → key
//!
//! key 按首次插入顺序从 0 递增分配；同一字符串只存一份。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::column::Column;
use crate::common::{
    bit_hint, JournalError, JournalMode, Result, SymbolKey, VALUE_IS_NULL, VALUE_NOT_FOUND,
};
use crate::index::HashIndex;
use crate::variable_column::VariableColumn;

const DATA_FILE_SUFFIX:       &str = "symd";
const INDEX_FILE_SUFFIX:      &str = "symi";
const HASH_INDEX_FILE_SUFFIX: &str = "symr";

/// 哈希桶数 = 预估容量 × 0.2
const HASH_KEY_LOAD_FACTOR: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct SymbolTableOptions {
    /// 预估的不同值个数，决定哈希桶数与窗口大小
    pub capacity:        usize,
    /// 平均字符串字节数
    pub avg_string_size: usize,
}

impl Default for SymbolTableOptions {
    fn default() -> Self {
        Self { capacity: 1024, avg_string_size: 12 }
    }
}

impl SymbolTableOptions {
    pub fn hash_key_count(&self) -> usize {
        ((self.capacity as f64 * HASH_KEY_LOAD_FACTOR) as usize).max(1)
    }
}

fn closed(data_path: &Path) -> JournalError {
    JournalError::Closed(data_path.to_path_buf())
}

pub struct SymbolTable {
    column:         String,
    data_path:      PathBuf,
    hash_key_count: usize,
    data:           Option<VariableColumn>,
    index:          Option<HashIndex>,
    value_cache:    HashMap<String, SymbolKey>,
    key_cache:      Vec<Option<String>>,
    size:           i32,
}

impl SymbolTable {
    /// `size` 为 None 时以 data 文件中的行数为准；`index_tx_address < 0` 表示沿用文件中的值
    pub fn open(
        directory:        impl AsRef<Path>,
        column:           &str,
        mode:             JournalMode,
        options:          SymbolTableOptions,
        size:             Option<i32>,
        index_tx_address: i64,
    ) -> Result<Self> {
        let dir = directory.as_ref();
        let file = |suffix: &str| -> PathBuf { dir.join(format!("{column}.{suffix}")) };
        let capacity = options.capacity.max(1);
        let hash_key_count = options.hash_key_count();

        let data = VariableColumn::open(
            file(DATA_FILE_SUFFIX),
            bit_hint(options.avg_string_size + 4, capacity),
            file(INDEX_FILE_SUFFIX),
            bit_hint(8, capacity),
            mode.base(),
        )?;
        let index = HashIndex::open(
            file(HASH_INDEX_FILE_SUFFIX), hash_key_count, capacity, mode, index_tx_address,
        )?;
        let size = size.unwrap_or(data.size() as i32);
        // 已持久化的桶数优先于 options
        let hash_key_count = index.key_count();

        Ok(Self {
            column: column.to_string(),
            data_path: file(DATA_FILE_SUFFIX),
            hash_key_count,
            data: Some(data),
            index: Some(index),
            value_cache: HashMap::with_capacity(capacity.min(1 << 16)),
            key_cache: Vec::new(),
            size,
        })
    }

    fn data_mut(&mut self) -> Result<&mut VariableColumn> {
        match self.data.as_mut() {
            Some(d) => Ok(d),
            None    => Err(closed(&self.data_path)),
        }
    }

    fn hash_key(&self, value: &str) -> usize {
        crc32fast::hash(value.as_bytes()) as usize % self.hash_key_count
    }

    fn cache(&mut self, key: SymbolKey, value: &str) {
        self.value_cache.insert(value.to_string(), key);
        let slot = key as usize;
        if self.key_cache.len() <= slot {
            self.key_cache.resize_with(slot + 1, || None);
        }
        self.key_cache[slot] = Some(value.to_string());
    }

    fn clear_cache(&mut self) {
        self.value_cache.clear();
        self.key_cache.clear();
    }

    // ── 编码 ──────────────────────────────────────────────────────────────────

    /// 返回已有 key，或追加新值并分配 key；null 返回 VALUE_IS_NULL
    pub fn put<'a>(&mut self, value: impl Into<Option<&'a str>>) -> Result<SymbolKey> {
        let value = value.into();
        let key = self.get_quick(value)?;
        let Some(v) = value else { return Ok(key) };
        if key != VALUE_NOT_FOUND {
            return Ok(key);
        }

        let hash = self.hash_key(v);
        let (Some(data), Some(index)) = (self.data.as_mut(), self.index.as_mut()) else {
            return Err(closed(&self.data_path));
        };
        data.put_string(Some(v))?;
        data.commit()?;
        let key = (data.size() - 1) as SymbolKey;
        index.add(hash, key as i64)?;
        self.size += 1;
        self.cache(key, v);
        Ok(key)
    }

    /// 缓存 → 哈希桶扫描；未找到返回 VALUE_NOT_FOUND
    pub fn get_quick<'a>(&mut self, value: impl Into<Option<&'a str>>) -> Result<SymbolKey> {
        let Some(v) = value.into() else { return Ok(VALUE_IS_NULL) };
        if let Some(&key) = self.value_cache.get(v) {
            return Ok(key);
        }

        let hash = self.hash_key(v);
        let (Some(data), Some(index)) = (self.data.as_mut(), self.index.as_mut()) else {
            return Err(closed(&self.data_path));
        };
        if !index.contains(hash)? {
            return Ok(VALUE_NOT_FOUND);
        }
        let mut found = None;
        for row in index.cursor(hash)? {
            let row = row?;
            if data.equals_string(row, Some(v))? {
                found = Some(row as SymbolKey);
                break;
            }
        }
        match found {
            Some(key) => {
                self.cache(key, v);
                Ok(key)
            }
            None => Ok(VALUE_NOT_FOUND),
        }
    }

    /// 同 get_quick，但未知值报错
    pub fn get<'a>(&mut self, value: impl Into<Option<&'a str>>) -> Result<SymbolKey> {
        let value = value.into();
        match self.get_quick(value)? {
            VALUE_NOT_FOUND => Err(JournalError::InvalidSymbolValue {
                column: self.column.clone(),
                value:  value.unwrap_or_default().to_string(),
            }),
            key => Ok(key),
        }
    }

    pub fn value_exists<'a>(&mut self, value: impl Into<Option<&'a str>>) -> Result<bool> {
        Ok(self.get_quick(value)? != VALUE_NOT_FOUND)
    }

    // ── 解码 ──────────────────────────────────────────────────────────────────

    pub fn value(&mut self, key: SymbolKey) -> Result<String> {
        if key < 0 || key >= self.size {
            return Err(JournalError::InvalidSymbolKey {
                column: self.column.clone(), key, size: self.size,
            });
        }
        if let Some(Some(v)) = self.key_cache.get(key as usize) {
            return Ok(v.clone());
        }
        let value = self.data_mut()?
            .get_string(key as i64)?
            .ok_or_else(|| JournalError::Corrupt(format!("null stored for key {key}")))?;
        self.cache(key, &value);
        Ok(value)
    }

    /// 按 key 顺序遍历当前的全部值，每次调用都从 data 重新读取
    pub fn values(&mut self) -> Values<'_> {
        Values { data: self.data.as_mut(), current: 0, size: self.size as i64 }
    }

    /// 将全部值解码进缓存
    pub fn pre_load(&mut self) -> Result<&mut Self> {
        let rows = self.data_mut()?.size();
        for key in 0..rows {
            let value = self.data_mut()?
                .get_string(key)?
                .ok_or_else(|| JournalError::Corrupt(format!("null stored for key {key}")))?;
            self.value_cache.entry(value.clone()).or_insert(key as SymbolKey);
            let slot = key as usize;
            if self.key_cache.len() <= slot {
                self.key_cache.resize_with(slot + 1, || None);
            }
            self.key_cache[slot] = Some(value);
        }
        Ok(self)
    }

    // ── 事务 / 生命周期 ───────────────────────────────────────────────────────

    pub fn size(&self) -> i32 { self.size }

    pub fn column(&self) -> &str { &self.column }

    pub fn hash_key_count(&self) -> usize { self.hash_key_count }

    pub fn apply_tx(&mut self, size: i32, index_tx_address: i64) -> Result<()> {
        self.size = size;
        match self.index.as_mut() {
            Some(index) => index.set_tx_address(index_tx_address),
            None        => Err(closed(&self.data_path)),
        }
    }

    pub fn align_size(&mut self) -> Result<()> {
        self.size = self.data_mut()?.size() as i32;
        Ok(())
    }

    pub fn index_tx_address(&self) -> i64 {
        self.index.as_ref().map_or(-1, HashIndex::tx_address)
    }

    pub fn data_column(&mut self) -> Result<&mut VariableColumn> { self.data_mut() }

    pub fn truncate_all(&mut self) -> Result<()> { self.truncate(0) }

    /// 仅当 size() > size 时生效
    pub fn truncate(&mut self, size: i32) -> Result<()> {
        let size = size.max(0);
        if self.size <= size {
            return Ok(());
        }
        let (Some(data), Some(index)) = (self.data.as_mut(), self.index.as_mut()) else {
            return Err(closed(&self.data_path));
        };
        data.truncate(size as i64)?;
        index.truncate(size as i64)?;
        data.commit()?;
        info!(column = %self.column, from = self.size, to = size, "symbol_table.truncate");
        self.clear_cache();
        self.size = size;
        Ok(())
    }

    /// 为 [old_size, new_size) 的 key 补建哈希索引（批量追加绕过了 put 时使用）
    pub fn update_index(&mut self, old_size: i32, new_size: i32) -> Result<()> {
        let hash_key_count = self.hash_key_count;
        let (Some(data), Some(index)) = (self.data.as_mut(), self.index.as_mut()) else {
            return Err(closed(&self.data_path));
        };
        for key in old_size.max(0)..new_size {
            let value = data
                .get_string(key as i64)?
                .ok_or_else(|| JournalError::Corrupt(format!("null stored for key {key}")))?;
            let hash = crc32fast::hash(value.as_bytes()) as usize % hash_key_count;
            index.add(hash, key as i64)?;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        let (Some(data), Some(index)) = (self.data.as_mut(), self.index.as_mut()) else {
            return Err(closed(&self.data_path));
        };
        data.commit()?;
        index.commit()
    }

    pub fn force(&self) -> Result<()> {
        let (Some(data), Some(index)) = (self.data.as_ref(), self.index.as_ref()) else {
            return Err(closed(&self.data_path));
        };
        data.force()?;
        index.force()
    }

    /// 可重复调用
    pub fn close(&mut self) {
        if let Some(mut data) = self.data.take() {
            data.close();
        }
        if let Some(mut index) = self.index.take() {
            index.close();
        }
        self.clear_cache();
    }

    pub fn is_open(&self) -> bool { self.data.is_some() }
}

// ── Values ────────────────────────────────────────────────────────────────────

pub struct Values<'a> {
    data:    Option<&'a mut VariableColumn>,
    current: i64,
    size:    i64,
}

impl Iterator for Values<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.size {
            return None;
        }
        let key = self.current;
        self.current += 1;
        let Some(data) = self.data.as_deref_mut() else {
            self.current = self.size;
            return Some(Err(JournalError::Corrupt("symbol table is closed".into())));
        };
        Some(data.get_string(key).and_then(|v| {
            v.ok_or_else(|| JournalError::Corrupt(format!("null stored for key {key}")))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path, mode: JournalMode) -> Result<SymbolTable> {
        let options = SymbolTableOptions { capacity: 50, avg_string_size: 4 };
        SymbolTable::open(dir, "sym", mode, options, None, -1)
    }

    #[test]
    fn put_dedups_and_assigns_sequential_keys() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut st = open(dir.path(), JournalMode::Append)?;
        assert_eq!(st.put("AB")?, 0);
        assert_eq!(st.put("CD")?, 1);
        assert_eq!(st.put("AB")?, 0);
        assert_eq!(st.put(None)?, VALUE_IS_NULL);
        assert_eq!(st.size(), 2);
        assert_eq!(st.value(1)?, "CD");
        Ok(())
    }

    #[test]
    fn sentinels() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut st = open(dir.path(), JournalMode::Append)?;
        st.put("x")?;
        assert_eq!(st.get_quick(None)?, VALUE_IS_NULL);
        assert_eq!(st.get_quick("y")?, VALUE_NOT_FOUND);
        assert!(matches!(st.get("y"), Err(JournalError::InvalidSymbolValue { .. })));
        assert!(matches!(st.value(1), Err(JournalError::InvalidSymbolKey { key: 1, .. })));
        assert!(matches!(st.value(-1), Err(JournalError::InvalidSymbolKey { .. })));
        assert!(st.value_exists("x")?);
        Ok(())
    }

    #[test]
    fn truncate_invalidates_cache() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut st = open(dir.path(), JournalMode::Append)?;
        for v in ["a", "b", "c", "d"] {
            st.put(v)?;
        }
        st.truncate(2)?;
        st.truncate(2)?;
        assert_eq!(st.size(), 2);
        assert_eq!(st.get_quick("c")?, VALUE_NOT_FOUND);
        assert!(st.value(2).is_err());
        assert_eq!(st.get("b")?, 1);
        assert_eq!(st.put("e")?, 2);
        assert_eq!(st.value(2)?, "e");
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut st = open(dir.path(), JournalMode::Append)?;
        st.put("a")?;
        st.close();
        st.close();
        assert!(!st.is_open());
        match st.put("b") {
            Err(JournalError::Closed(path)) => assert!(path.ends_with("sym.symd")),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }
}
