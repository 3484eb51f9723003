//! 持久化多值哈希索引（hash bucket → 行号序列）
//!
//! 单个 MappedFile，数据区布局：
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ key_count     (i64)                          │
//! │ row_block_len (i64)                          │
//! │ tx_address    (i64)                          │
//! ├──────────────────────────────────────────────┤
//! │ key entry × key_count                        │
//! │   [last_block_offset i64][value_count i64]   │
//! ├──────────────────────────────────────────────┤
//! │ row block ...                                │ ← appendOffset = 分配前沿
//! │   [prev_block_offset i64][row id i64 × len]  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! 桶数在创建时固定，没有 rehash：实际基数远超创建时的预估容量时，
//! 每个桶的链会持续变长。调用方需按预期基数给出 capacity。
//! 游标从最后加入的行号开始倒序遍历（LIFO）。

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::common::{bit_hint, JournalError, JournalMode, Result, RowId};
use crate::mapped_file::MappedFile;

const KEY_COUNT_OFFSET:     u64 = 0;
const ROW_BLOCK_LEN_OFFSET: u64 = 8;
const TX_ADDRESS_OFFSET:    u64 = 16;
const KEYS_OFFSET:          u64 = 24;
const ENTRY_SIZE:           u64 = 16;

const MIN_ROW_BLOCK_LEN: usize = 4;
const MAX_ROW_BLOCK_LEN: usize = 256;

/// 每块容纳的行号数：约等于满载时的平均链长
pub fn row_block_len(capacity: usize, key_count: usize) -> usize {
    (capacity / key_count.max(1))
        .max(1)
        .next_power_of_two()
        .clamp(MIN_ROW_BLOCK_LEN, MAX_ROW_BLOCK_LEN)
}

fn read_i64(file: &mut MappedFile, offset: u64) -> Result<i64> {
    Ok(LittleEndian::read_i64(file.region(offset, 8)?))
}

fn write_i64(file: &mut MappedFile, offset: u64, value: i64) -> Result<()> {
    LittleEndian::write_i64(file.region_mut(offset, 8)?, value);
    Ok(())
}

pub struct HashIndex {
    file:          MappedFile,
    key_count:     usize,
    row_block_len: usize,
    tx_address:    i64,
    /// 只读打开一个尚未初始化的文件时为 false，此时索引视为空
    initialized:   bool,
}

impl HashIndex {
    pub fn open(
        path:       impl AsRef<Path>,
        key_count:  usize,
        capacity:   usize,
        mode:       JournalMode,
        tx_address: i64,
    ) -> Result<Self> {
        let key_count = key_count.max(1);
        let rbl = row_block_len(capacity, key_count);
        let hint = bit_hint(8 * (rbl + 1), (capacity / rbl).max(1)).max(bit_hint(ENTRY_SIZE as usize, key_count));
        let file = MappedFile::open(path, hint, mode)?;

        let mut index = Self {
            file, key_count, row_block_len: rbl, tx_address: 0, initialized: false,
        };
        if index.file.append_offset() > 0 {
            index.load_header()?;
        } else if mode.is_writable() {
            index.init_header()?;
        }
        if tx_address >= 0 {
            index.set_tx_address(tx_address)?;
        }
        Ok(index)
    }

    fn init_header(&mut self) -> Result<()> {
        let keys_end = KEYS_OFFSET + self.key_count as u64 * ENTRY_SIZE;
        write_i64(&mut self.file, KEY_COUNT_OFFSET, self.key_count as i64)?;
        write_i64(&mut self.file, ROW_BLOCK_LEN_OFFSET, self.row_block_len as i64)?;
        write_i64(&mut self.file, TX_ADDRESS_OFFSET, 0)?;
        // 逐窗口清零键表
        let step = self.file.window_size();
        let mut offset = KEYS_OFFSET;
        while offset < keys_end {
            let len = (step - offset % step).min(keys_end - offset);
            self.file.region_mut(offset, len as usize)?.fill(0);
            offset += len;
        }
        self.file.set_append_offset(keys_end)?;
        self.tx_address = keys_end as i64;
        self.initialized = true;
        Ok(())
    }

    fn load_header(&mut self) -> Result<()> {
        let key_count = read_i64(&mut self.file, KEY_COUNT_OFFSET)?;
        let rbl = read_i64(&mut self.file, ROW_BLOCK_LEN_OFFSET)?;
        if key_count <= 0 || rbl <= 0 {
            return Err(JournalError::Corrupt(format!(
                "hash index header key_count={key_count} row_block_len={rbl} in {}",
                self.file.path().display()
            )));
        }
        if key_count as usize != self.key_count || rbl as usize != self.row_block_len {
            warn!(
                path = %self.file.path().display(),
                requested_keys = self.key_count,
                stored_keys = key_count,
                stored_block_len = rbl,
                "hash_index.geometry_mismatch"
            );
        }
        self.key_count = key_count as usize;
        self.row_block_len = rbl as usize;
        self.tx_address = read_i64(&mut self.file, TX_ADDRESS_OFFSET)?;
        self.initialized = true;
        Ok(())
    }

    // ── 键表 ──────────────────────────────────────────────────────────────────

    fn entry_offset(&self, key: usize) -> Result<u64> {
        if key >= self.key_count {
            return Err(JournalError::Corrupt(format!(
                "hash key {key} outside [0, {})", self.key_count
            )));
        }
        Ok(KEYS_OFFSET + key as u64 * ENTRY_SIZE)
    }

    /// (last_block_offset, value_count)
    fn entry(&mut self, key: usize) -> Result<(i64, i64)> {
        let offset = self.entry_offset(key)?;
        let bytes = self.file.region(offset, ENTRY_SIZE as usize)?;
        Ok((LittleEndian::read_i64(&bytes[..8]), LittleEndian::read_i64(&bytes[8..])))
    }

    fn write_entry(&mut self, key: usize, last_block: i64, count: i64) -> Result<()> {
        let offset = self.entry_offset(key)?;
        let bytes = self.file.region_mut(offset, ENTRY_SIZE as usize)?;
        LittleEndian::write_i64(&mut bytes[..8], last_block);
        LittleEndian::write_i64(&mut bytes[8..], count);
        Ok(())
    }

    fn block_size(&self) -> u64 { 8 * (self.row_block_len as u64 + 1) }

    fn row_offset(&self, block: i64, slot: usize) -> u64 {
        block as u64 + 8 + slot as u64 * 8
    }

    // ── 操作 ──────────────────────────────────────────────────────────────────

    pub fn add(&mut self, key: usize, row: RowId) -> Result<()> {
        if !self.initialized {
            return Err(JournalError::ReadOnly(self.file.path().to_path_buf()));
        }
        let (last, count) = self.entry(key)?;
        let slot = count as usize % self.row_block_len;
        let block = if slot == 0 {
            let block = self.file.append_offset();
            let prev = if count == 0 { -1 } else { last };
            write_i64(&mut self.file, block as u64, prev)?;
            self.file.set_append_offset(block as u64 + self.block_size())?;
            block
        } else {
            last
        };
        let offset = self.row_offset(block, slot);
        write_i64(&mut self.file, offset, row)?;
        self.write_entry(key, block, count + 1)
    }

    /// 桶是否收到过值
    pub fn contains(&mut self, key: usize) -> Result<bool> {
        if !self.initialized {
            return Ok(false);
        }
        Ok(self.entry(key)?.1 > 0)
    }

    pub fn value_count(&mut self, key: usize) -> Result<i64> {
        if !self.initialized {
            return Ok(0);
        }
        Ok(self.entry(key)?.1)
    }

    /// 每次调用返回新的游标，倒序产出该桶的行号
    pub fn cursor(&mut self, key: usize) -> Result<IndexCursor<'_>> {
        let (block, remaining) = if self.initialized { self.entry(key)? } else { (-1, 0) };
        let slot = if remaining > 0 { (remaining as usize - 1) % self.row_block_len } else { 0 };
        Ok(IndexCursor {
            file: &mut self.file,
            block,
            slot,
            remaining,
            row_block_len: self.row_block_len,
        })
    }

    /// 删除所有 `row >= max_row` 的条目
    pub fn truncate(&mut self, max_row: RowId) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        for key in 0..self.key_count {
            let (mut last, mut count) = self.entry(key)?;
            let before = count;
            while count > 0 {
                let slot = (count as usize - 1) % self.row_block_len;
                let offset = self.row_offset(last, slot);
                if read_i64(&mut self.file, offset)? < max_row {
                    break;
                }
                count -= 1;
                if count > 0 && slot == 0 {
                    last = read_i64(&mut self.file, last as u64)?;
                }
            }
            if count != before {
                self.write_entry(key, last, count)?;
            }
        }
        Ok(())
    }

    // ── 事务地址 ──────────────────────────────────────────────────────────────

    pub fn tx_address(&self) -> i64 { self.tx_address }

    pub fn set_tx_address(&mut self, address: i64) -> Result<()> {
        self.tx_address = address;
        if self.initialized && self.file.mode().is_writable() {
            write_i64(&mut self.file, TX_ADDRESS_OFFSET, address)?;
        }
        Ok(())
    }

    /// 记录当前分配前沿为事务地址
    pub fn commit(&mut self) -> Result<()> {
        if self.initialized && self.file.mode().is_writable() {
            let frontier = self.file.append_offset();
            self.set_tx_address(frontier)?;
        }
        Ok(())
    }

    pub fn force(&self) -> Result<()> { self.file.force() }

    pub fn close(&mut self) { self.file.close() }

    pub fn key_count(&self) -> usize { self.key_count }

    pub fn row_block_len(&self) -> usize { self.row_block_len }
}

// ── IndexCursor ───────────────────────────────────────────────────────────────

pub struct IndexCursor<'a> {
    file:          &'a mut MappedFile,
    block:         i64,
    slot:          usize,
    remaining:     i64,
    row_block_len: usize,
}

impl IndexCursor<'_> {
    fn step(&mut self) -> Result<RowId> {
        let row = read_i64(self.file, self.block as u64 + 8 + self.slot as u64 * 8)?;
        self.remaining -= 1;
        if self.remaining > 0 {
            if self.slot == 0 {
                self.block = read_i64(self.file, self.block as u64)?;
                self.slot = self.row_block_len - 1;
            } else {
                self.slot -= 1;
            }
        }
        Ok(row)
    }
}

impl Iterator for IndexCursor<'_> {
    type Item = Result<RowId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining <= 0 {
            return None;
        }
        let row = self.step();
        if row.is_err() {
            self.remaining = 0;
        }
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(index: &mut HashIndex, key: usize) -> Result<Vec<RowId>> {
        index.cursor(key)?.collect()
    }

    #[test]
    fn cursor_is_lifo_across_blocks() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index = HashIndex::open(dir.path().join("h.symr"), 3, 12, JournalMode::Append, -1)?;
        assert_eq!(index.row_block_len(), 4);
        for row in 0..30 {
            index.add(row as usize % 3, row)?;
        }
        assert_eq!(rows(&mut index, 1)?, vec![28, 25, 22, 19, 16, 13, 10, 7, 4, 1]);
        assert!(index.contains(2)?);
        assert_eq!(index.value_count(0)?, 10);
        Ok(())
    }

    #[test]
    fn truncate_drops_high_rows() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut index = HashIndex::open(dir.path().join("h.symr"), 2, 8, JournalMode::Append, -1)?;
        for row in 0..20 {
            index.add(row as usize % 2, row)?;
        }
        index.truncate(9)?;
        assert_eq!(rows(&mut index, 0)?, vec![8, 6, 4, 2, 0]);
        assert_eq!(rows(&mut index, 1)?, vec![7, 5, 3, 1]);
        index.truncate(9)?;
        assert_eq!(index.value_count(1)?, 4);

        index.truncate(0)?;
        assert!(!index.contains(0)?);
        index.add(0, 42)?;
        assert_eq!(rows(&mut index, 0)?, vec![42]);
        Ok(())
    }

    #[test]
    fn reopen_keeps_geometry_and_tx_address() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("h.symr");
        let tx = {
            let mut index = HashIndex::open(&path, 5, 25, JournalMode::Append, -1)?;
            for row in 0..12 {
                index.add(4, row)?;
            }
            index.commit()?;
            index.tx_address()
        };
        let mut index = HashIndex::open(&path, 7, 100, JournalMode::Read, -1)?;
        assert_eq!(index.key_count(), 5);
        assert_eq!(index.tx_address(), tx);
        assert_eq!(rows(&mut index, 4)?.len(), 12);
        assert!(index.add(4, 12).is_err());
        Ok(())
    }

    #[test]
    fn empty_read_only_index() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("h.symr");
        std::fs::File::create(&path).expect("create");
        let mut index = HashIndex::open(&path, 5, 25, JournalMode::Read, -1)?;
        assert!(!index.contains(3)?);
        assert_eq!(rows(&mut index, 3)?, Vec::<RowId>::new());
        Ok(())
    }
}
