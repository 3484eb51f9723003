//! 列的公共部分：挂起的事务追加偏移
//!
//! put 只推进内存中的 tx 偏移，`commit()` 时才写入文件头；
//! 读取 `size()` 时优先看挂起的偏移。

use crate::common::Result;
use crate::mapped_file::MappedFile;

/// 所有列共享的生命周期接口
pub trait Column {
    /// 行数
    fn size(&self) -> i64;
    fn truncate(&mut self, size: i64) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn force(&self) -> Result<()>;
    fn close(&mut self);
}

pub(crate) struct ColumnCore {
    pub(crate) file:  MappedFile,
    tx_append_offset: Option<u64>,
}

impl ColumnCore {
    pub(crate) fn new(file: MappedFile) -> Self {
        Self { file, tx_append_offset: None }
    }

    /// 当前（含未提交）追加偏移
    pub(crate) fn offset(&self) -> u64 {
        self.tx_append_offset
            .unwrap_or_else(|| self.file.append_offset().max(0) as u64)
    }

    pub(crate) fn pre_commit(&mut self, offset: u64) {
        self.tx_append_offset = Some(offset);
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        if let Some(offset) = self.tx_append_offset {
            self.file.set_append_offset(offset)?;
            self.tx_append_offset = None;
        }
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.tx_append_offset = None;
        self.file.close();
    }
}
