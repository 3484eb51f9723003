//! 变长列（字符串 / 二进制）
//!
//! ```text
//! index 文件: FixedColumn(width = 8)，第 r 行 = data 文件中的字节偏移
//! data  文件: [len (i32 LE, null = -1)][bytes ...] [len][bytes ...] ...
//! ```
//!
//! 行数以 index 文件为准。截断只回退两个文件的追加偏移，
//! data 尾部的旧字节在 compact 之前一直占用空间。

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::column::{Column, ColumnCore};
use crate::common::{JournalError, JournalMode, Result, RowId};
use crate::fixed_column::FixedColumn;
use crate::mapped_file::MappedFile;

const NULL_LEN: i32 = -1;

pub struct VariableColumn {
    data:  ColumnCore,
    index: FixedColumn,
}

impl VariableColumn {
    pub fn new(data: MappedFile, index: MappedFile) -> Self {
        Self { data: ColumnCore::new(data), index: FixedColumn::new(index, 8) }
    }

    pub fn open(
        data_path:      impl AsRef<Path>,
        data_bit_hint:  u32,
        index_path:     impl AsRef<Path>,
        index_bit_hint: u32,
        mode:           JournalMode,
    ) -> Result<Self> {
        Ok(Self::new(
            MappedFile::open(data_path, data_bit_hint, mode)?,
            MappedFile::open(index_path, index_bit_hint, mode)?,
        ))
    }

    // ── 写 ────────────────────────────────────────────────────────────────────

    pub fn put_string(&mut self, value: Option<&str>) -> Result<RowId> {
        self.put_bytes(value.map(str::as_bytes))
    }

    pub fn put_null(&mut self) -> Result<RowId> { self.put_bytes(None) }

    /// 写入一行，返回行号
    pub fn put_bytes(&mut self, value: Option<&[u8]>) -> Result<RowId> {
        let offset = self.data.offset();
        let len = value.map_or(NULL_LEN, |b| b.len() as i32);
        LittleEndian::write_i32(self.data.file.region_mut(offset, 4)?, len);
        let mut end = offset + 4;
        if let Some(bytes) = value {
            self.data.file.region_mut(end, bytes.len())?.copy_from_slice(bytes);
            end += bytes.len() as u64;
        }
        let row = self.index.put_i64(offset as i64)?;
        self.data.pre_commit(end);
        Ok(row)
    }

    // ── 读 ────────────────────────────────────────────────────────────────────

    /// (payload 偏移, 长度)；null 行长度为 -1
    fn locate(&mut self, row: RowId) -> Result<(u64, i32)> {
        let offset = self.index.get_i64(row)?;
        if offset < 0 {
            return Err(JournalError::Corrupt(format!(
                "negative data offset {offset} for row {row} in {}",
                self.data.file.path().display()
            )));
        }
        let offset = offset as u64;
        let len = LittleEndian::read_i32(self.data.file.region(offset, 4)?);
        if len < NULL_LEN {
            return Err(JournalError::Corrupt(format!(
                "invalid length {len} for row {row} in {}",
                self.data.file.path().display()
            )));
        }
        Ok((offset + 4, len))
    }

    pub fn get_bytes(&mut self, row: RowId) -> Result<Option<Vec<u8>>> {
        let (offset, len) = self.locate(row)?;
        if len == NULL_LEN {
            return Ok(None);
        }
        Ok(Some(self.data.file.region(offset, len as usize)?.to_vec()))
    }

    pub fn get_string(&mut self, row: RowId) -> Result<Option<String>> {
        match self.get_bytes(row)? {
            None        => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| JournalError::Corrupt(format!("row {row} is not UTF-8: {e}"))),
        }
    }

    pub fn is_null(&mut self, row: RowId) -> Result<bool> {
        Ok(self.locate(row)?.1 == NULL_LEN)
    }

    /// 逐字节比较，不解码
    pub fn equals_string(&mut self, row: RowId, value: Option<&str>) -> Result<bool> {
        let (offset, len) = self.locate(row)?;
        match value {
            None    => Ok(len == NULL_LEN),
            Some(v) => {
                if len != v.len() as i32 {
                    return Ok(false);
                }
                Ok(self.data.file.region(offset, v.len())? == v.as_bytes())
            }
        }
    }

    pub fn data_file(&self) -> &MappedFile { &self.data.file }

    pub fn index_file(&self) -> &MappedFile { self.index.mapped_file() }
}

impl Column for VariableColumn {
    fn size(&self) -> i64 { self.index.size() }

    fn truncate(&mut self, size: i64) -> Result<()> {
        let size = size.max(0);
        if size < self.size() {
            let offset = self.index.get_i64(size)?;
            self.data.pre_commit(offset.max(0) as u64);
            self.index.truncate(size)?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.data.commit()?;
        self.index.commit()
    }

    fn force(&self) -> Result<()> {
        self.data.file.force()?;
        self.index.force()
    }

    fn close(&mut self) {
        self.data.close();
        self.index.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path, mode: JournalMode) -> Result<VariableColumn> {
        VariableColumn::open(dir.join("s.d"), 4, dir.join("s.i"), 4, mode)
    }

    #[test]
    fn strings_and_nulls_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut col = open(dir.path(), JournalMode::Append)?;
        assert_eq!(col.put_string(Some("hello, mapped world"))?, 0);
        assert_eq!(col.put_null()?, 1);
        assert_eq!(col.put_string(Some(""))?, 2);
        col.commit()?;

        assert_eq!(col.get_string(0)?.as_deref(), Some("hello, mapped world"));
        assert_eq!(col.get_string(1)?, None);
        assert!(col.is_null(1)?);
        assert_eq!(col.get_string(2)?.as_deref(), Some(""));
        assert!(col.equals_string(0, Some("hello, mapped world"))?);
        assert!(!col.equals_string(0, Some("hello, mapped worlD"))?);
        assert!(col.equals_string(1, None)?);
        assert!(!col.equals_string(2, None)?);
        Ok(())
    }

    #[test]
    fn truncate_rewinds_data_offset() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut col = open(dir.path(), JournalMode::Append)?;
        for v in ["a", "bb", "ccc"] {
            col.put_string(Some(v))?;
        }
        col.commit()?;
        let end_of_a = col.data_file().append_offset();

        col.truncate(1)?;
        col.commit()?;
        assert_eq!(col.size(), 1);
        assert_eq!(col.data_file().append_offset(), 5);
        assert!(end_of_a > 5);

        col.put_string(Some("dddd"))?;
        assert_eq!(col.get_string(1)?.as_deref(), Some("dddd"));
        assert!(col.get_string(2).is_err());
        Ok(())
    }

    #[test]
    fn reopen_read_only() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut col = open(dir.path(), JournalMode::Append)?;
            col.put_bytes(Some(&[0xff, 0x00, 0x10]))?;
            col.commit()?;
        }
        let mut col = open(dir.path(), JournalMode::BulkRead)?;
        assert_eq!(col.size(), 1);
        assert_eq!(col.get_bytes(0)?, Some(vec![0xff, 0x00, 0x10]));
        assert!(col.put_null().is_err());
        Ok(())
    }
}
