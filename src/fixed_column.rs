//! 定长列：第 r 行位于字节偏移 `r × width`

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::column::{Column, ColumnCore};
use crate::common::{JournalError, JournalMode, Result, RowId};
use crate::mapped_file::MappedFile;

pub struct FixedColumn {
    core:  ColumnCore,
    width: usize,
}

impl FixedColumn {
    pub fn new(file: MappedFile, width: usize) -> Self {
        Self { core: ColumnCore::new(file), width: width.max(1) }
    }

    pub fn open(path: impl AsRef<Path>, bit_hint: u32, mode: JournalMode, width: usize) -> Result<Self> {
        Ok(Self::new(MappedFile::open(path, bit_hint, mode)?, width))
    }

    pub fn width(&self) -> usize { self.width }

    pub fn mapped_file(&self) -> &MappedFile { &self.core.file }

    // ── 读 ────────────────────────────────────────────────────────────────────

    fn read(&mut self, row: RowId, size: usize) -> Result<&[u8]> {
        self.check_width(size)?;
        let rows = self.size();
        if row < 0 || row >= rows {
            return Err(JournalError::InvalidRow { row, size: rows });
        }
        self.core.file.region(row as u64 * self.width as u64, size)
    }

    pub fn get_bool(&mut self, row: RowId) -> Result<bool> { Ok(self.read(row, 1)?[0] == 1) }
    pub fn get_byte(&mut self, row: RowId) -> Result<u8>   { Ok(self.read(row, 1)?[0]) }
    pub fn get_i16(&mut self, row: RowId) -> Result<i16>   { Ok(LittleEndian::read_i16(self.read(row, 2)?)) }
    pub fn get_i32(&mut self, row: RowId) -> Result<i32>   { Ok(LittleEndian::read_i32(self.read(row, 4)?)) }
    pub fn get_i64(&mut self, row: RowId) -> Result<i64>   { Ok(LittleEndian::read_i64(self.read(row, 8)?)) }
    pub fn get_f32(&mut self, row: RowId) -> Result<f32>   { Ok(LittleEndian::read_f32(self.read(row, 4)?)) }
    pub fn get_f64(&mut self, row: RowId) -> Result<f64>   { Ok(LittleEndian::read_f64(self.read(row, 8)?)) }

    // ── 写 ────────────────────────────────────────────────────────────────────

    /// 在挂起偏移处分配一行，返回该行前 `size` 字节
    fn append(&mut self, size: usize) -> Result<&mut [u8]> {
        self.check_width(size)?;
        let offset = self.core.offset();
        // 先映射整行，失败时挂起偏移不变
        self.core.file.region_mut(offset, self.width)?;
        self.core.pre_commit(offset + self.width as u64);
        self.core.file.region_mut(offset, size)
    }

    fn last_row(&self) -> RowId { self.size() - 1 }

    pub fn put_bool(&mut self, value: bool) -> Result<RowId> {
        self.append(1)?[0] = value as u8;
        Ok(self.last_row())
    }

    pub fn put_byte(&mut self, value: u8) -> Result<RowId> {
        self.append(1)?[0] = value;
        Ok(self.last_row())
    }

    pub fn put_i16(&mut self, value: i16) -> Result<RowId> {
        LittleEndian::write_i16(self.append(2)?, value);
        Ok(self.last_row())
    }

    pub fn put_i32(&mut self, value: i32) -> Result<RowId> {
        LittleEndian::write_i32(self.append(4)?, value);
        Ok(self.last_row())
    }

    pub fn put_i64(&mut self, value: i64) -> Result<RowId> {
        LittleEndian::write_i64(self.append(8)?, value);
        Ok(self.last_row())
    }

    pub fn put_f32(&mut self, value: f32) -> Result<RowId> {
        LittleEndian::write_f32(self.append(4)?, value);
        Ok(self.last_row())
    }

    pub fn put_f64(&mut self, value: f64) -> Result<RowId> {
        LittleEndian::write_f64(self.append(8)?, value);
        Ok(self.last_row())
    }

    /// 原样拷贝一行（长度不超过 width）
    pub fn put_bytes(&mut self, value: &[u8]) -> Result<RowId> {
        self.append(value.len())?.copy_from_slice(value);
        Ok(self.last_row())
    }

    /// 跳过一行不写，返回被跳过行的字节偏移
    pub fn put_null(&mut self) -> Result<u64> {
        let offset = self.core.offset();
        self.core.file.region_mut(offset, self.width)?;
        self.core.pre_commit(offset + self.width as u64);
        Ok(offset)
    }

    fn check_width(&self, size: usize) -> Result<()> {
        if size > self.width {
            return Err(JournalError::InvalidColumnType {
                column:   self.core.file.path().display().to_string(),
                expected: match size {
                    1 => "1-byte",
                    2 => "2-byte",
                    4 => "4-byte",
                    8 => "8-byte",
                    _ => "wider",
                },
            });
        }
        Ok(())
    }
}

impl Column for FixedColumn {
    fn size(&self) -> i64 { (self.core.offset() / self.width as u64) as i64 }

    fn truncate(&mut self, size: i64) -> Result<()> {
        self.core.pre_commit(size.max(0) as u64 * self.width as u64);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> { self.core.commit() }

    fn force(&self) -> Result<()> { self.core.file.force() }

    fn close(&mut self) { self.core.close() }
}
