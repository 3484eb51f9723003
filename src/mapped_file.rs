//! 内存映射文件
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  HEADER (8 bytes)                  │ ← 逻辑追加偏移 appendOffset (LE i64)
//! ├────────────────────────────────────┤
//! │  DATA REGION                       │
//! │    [window 0] 1 << bit_hint bytes  │
//! │    [window 1]                      │
//! │    ...                             │
//! └────────────────────────────────────┘
//! ```
//!
//! 数据区按 `1 << bit_hint` 字节切成窗口，首次访问时才映射。
//! 若请求的 `(offset, size)` 跨越窗口边界，则在绝对偏移处额外映射一个
//! stitch 窗口，调用方无需关心窗口粒度。每个窗口槽位最多一个主窗口、
//! 一个 stitch 窗口；stitch 只服务于该槽位最近一次跨界请求。

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{debug, info};

use crate::common::{JournalError, JournalMode, Result, HEADER_SIZE, MAX_BIT_HINT};

// ── MappedRegion ──────────────────────────────────────────────────────────────

enum Mapping {
    Read(Mmap),
    Write(MmapMut),
}

/// 一个驻留的映射窗口；drop 时解除映射
pub struct MappedRegion {
    /// 数据区内的逻辑偏移（不含文件头）
    offset:  u64,
    mapping: Mapping,
}

impl MappedRegion {
    pub fn offset(&self) -> u64 { self.offset }

    pub fn len(&self) -> usize { self.as_slice().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            Mapping::Read(m)  => &m[..],
            Mapping::Write(m) => &m[..],
        }
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.mapping {
            Mapping::Read(_)  => None,
            Mapping::Write(m) => Some(&mut m[..]),
        }
    }

    fn flush(&self) -> std::io::Result<()> {
        match &self.mapping {
            Mapping::Read(_)  => Ok(()),
            Mapping::Write(m) => m.flush(),
        }
    }
}

/// 唯一的 unsafe 映射入口。`absolute` 为文件内绝对偏移。
fn map_region(
    file:     &File,
    path:     &Path,
    writable: bool,
    offset:   u64,
    absolute: u64,
    len:      usize,
) -> Result<MappedRegion> {
    let mut opts = MmapOptions::new();
    opts.offset(absolute).len(len);
    // SAFETY: the file handle is owned exclusively by its MappedFile and the
    // caller has already checked (read) or extended (append) the file so that
    // [absolute, absolute + len) lies within it. Slices handed out borrow the
    // MappedFile, so no window is unmapped while referenced.
    let mapping = if writable {
        unsafe { opts.map_mut(file) }.map(Mapping::Write)
    } else {
        unsafe { opts.map(file) }.map(Mapping::Read)
    };
    let mapping = mapping.map_err(|e| {
        JournalError::io(path, format!("map offset={absolute} size={len}"), e)
    })?;
    Ok(MappedRegion { offset, mapping })
}

fn file_len(file: &File, path: &Path) -> Result<u64> {
    file.metadata()
        .map(|m| m.len())
        .map_err(|e| JournalError::io(path, "stat", e))
}

/// 追加模式下保证文件至少 `want` 字节
fn ensure_len(file: &File, path: &Path, want: u64) -> Result<()> {
    if file_len(file, path)? < want {
        file.set_len(want)
            .map_err(|e| JournalError::io(path, format!("grow to {want} bytes"), e))?;
    }
    Ok(())
}

/// 将 `slots` 扩展到至少 `index + 1` 个（空位为 None）
fn advance<T>(slots: &mut Vec<Option<T>>, index: usize) {
    if slots.len() <= index {
        slots.resize_with(index + 1, || None);
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Window(usize),
    Stitch(usize),
}

// ── MappedFile ────────────────────────────────────────────────────────────────

pub struct MappedFile {
    path:     PathBuf,
    mode:     JournalMode,
    bit_hint: u32,
    file:     Option<File>,
    /// 只读打开空文件时为 None
    header:   Option<MappedRegion>,
    windows:  Vec<Option<MappedRegion>>,
    stitches: Vec<Option<MappedRegion>>,
}

impl MappedFile {
    /// 打开文件。`bit_hint` 为窗口大小指数（限制在 [2, MAX_BIT_HINT]）。
    pub fn open(path: impl AsRef<Path>, bit_hint: u32, mode: JournalMode) -> Result<Self> {
        let mut mf = Self {
            path:     path.as_ref().to_path_buf(),
            mode:     mode.base(),
            bit_hint: bit_hint.clamp(2, MAX_BIT_HINT),
            file:     None,
            header:   None,
            windows:  Vec::new(),
            stitches: Vec::new(),
        };
        mf.open_internal(mf.mode.is_writable())?;
        let resident = (mf.file_size()?.saturating_sub(HEADER_SIZE) >> mf.bit_hint) as usize + 1;
        mf.windows.reserve(resident);
        mf.stitches.reserve(resident);
        Ok(mf)
    }

    fn open_internal(&mut self, writable: bool) -> Result<()> {
        if writable {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .map_err(|e| JournalError::io(parent, "create directories", e))?;
                }
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => JournalError::NoSuchFile(self.path.clone()),
                _                   => JournalError::io(&self.path, "open", e),
            })?;

        let header_len = if writable {
            ensure_len(&file, &self.path, HEADER_SIZE)?;
            HEADER_SIZE
        } else {
            file_len(&file, &self.path)?.min(HEADER_SIZE)
        };
        self.header = if header_len > 0 {
            Some(map_region(&file, &self.path, writable, 0, 0, header_len as usize)?)
        } else {
            None
        };
        self.file = Some(file);
        Ok(())
    }

    // ── 窗口 ──────────────────────────────────────────────────────────────────

    /// 返回 `[offset, offset + size)` 的只读视图
    pub fn region(&mut self, offset: u64, size: usize) -> Result<&[u8]> {
        if size == 0 {
            return Ok(&[]);
        }
        let (slot, pos) = self.locate(offset, size)?;
        let region = self.slot(slot)?;
        Ok(&region.as_slice()[pos..pos + size])
    }

    /// 返回 `[offset, offset + size)` 的可写视图；只读文件返回 ReadOnly
    pub fn region_mut(&mut self, offset: u64, size: usize) -> Result<&mut [u8]> {
        if !self.mode.is_writable() {
            return Err(JournalError::ReadOnly(self.path.clone()));
        }
        if size == 0 {
            return Ok(&mut []);
        }
        let (slot, pos) = self.locate(offset, size)?;
        let path = self.path.clone();
        let region = match slot {
            Slot::Window(i) => self.windows.get_mut(i),
            Slot::Stitch(i) => self.stitches.get_mut(i),
        }
        .and_then(Option::as_mut)
        .ok_or_else(|| JournalError::Closed(path.clone()))?;
        let slice = region.as_mut_slice().ok_or(JournalError::ReadOnly(path))?;
        Ok(&mut slice[pos..pos + size])
    }

    fn slot(&self, slot: Slot) -> Result<&MappedRegion> {
        match slot {
            Slot::Window(i) => self.windows.get(i),
            Slot::Stitch(i) => self.stitches.get(i),
        }
        .and_then(Option::as_ref)
        .ok_or_else(|| JournalError::Closed(self.path.clone()))
    }

    /// 确保覆盖请求的窗口已驻留，返回 (槽位, 窗口内位置)
    fn locate(&mut self, offset: u64, size: usize) -> Result<(Slot, usize)> {
        let file = self.file.as_ref().ok_or_else(|| JournalError::Closed(self.path.clone()))?;
        let writable      = self.mode.is_writable();
        let window_size   = 1u64 << self.bit_hint;
        let index         = (offset >> self.bit_hint) as usize;
        let window_offset = (index as u64) << self.bit_hint;
        let pos           = (offset - window_offset) as usize;

        advance(&mut self.windows, index);

        // 只读窗口可能被当时较短的文件截断，文件增长后需重新映射
        if let Some(w) = &self.windows[index] {
            if w.len() < pos + size && (w.len() as u64) < window_size {
                self.windows[index] = None;
            }
        }

        if self.windows[index].is_none() {
            let absolute = HEADER_SIZE + window_offset;
            let len = if writable {
                ensure_len(file, &self.path, absolute + window_size)?;
                window_size
            } else {
                let file_size = file_len(file, &self.path)?;
                let avail = file_size.saturating_sub(absolute).min(window_size);
                if avail == 0 {
                    return Err(JournalError::OutOfBounds {
                        path: self.path.clone(), offset, size, file_size,
                    });
                }
                avail
            };
            debug!(path = %self.path.display(), index, len, "mapped_file.map");
            let region = map_region(file, &self.path, writable, window_offset, absolute, len as usize)?;
            self.windows[index] = Some(region);
        }

        let primary_len = self.windows[index].as_ref().map_or(0, MappedRegion::len);
        if primary_len.saturating_sub(pos) >= size {
            return Ok((Slot::Window(index), pos));
        }

        // 跨越窗口边界：在绝对偏移处映射 stitch
        advance(&mut self.stitches, index);
        if let Some(s) = &self.stitches[index] {
            if s.offset() != offset || s.len() < size {
                self.stitches[index] = None;
            }
        }
        if self.stitches[index].is_none() {
            let absolute = HEADER_SIZE + offset;
            let end = absolute + size as u64;
            if writable {
                ensure_len(file, &self.path, end)?;
            } else {
                let file_size = file_len(file, &self.path)?;
                if end > file_size {
                    return Err(JournalError::OutOfBounds {
                        path: self.path.clone(), offset, size, file_size,
                    });
                }
            }
            debug!(path = %self.path.display(), index, offset, size, "mapped_file.stitch");
            let region = map_region(file, &self.path, writable, offset, absolute, size)?;
            self.stitches[index] = Some(region);
        }
        Ok((Slot::Stitch(index), 0))
    }

    // ── 追加偏移 ──────────────────────────────────────────────────────────────

    /// 持久化的逻辑追加偏移；未打开时为 -1
    pub fn append_offset(&self) -> i64 {
        match &self.header {
            Some(h) if h.len() >= HEADER_SIZE as usize => LittleEndian::read_i64(h.as_slice()),
            Some(_)                                    => 0,
            None if self.file.is_some()                => 0,
            None                                       => -1,
        }
    }

    pub fn set_append_offset(&mut self, offset: u64) -> Result<()> {
        if self.file.is_none() {
            return Err(JournalError::Closed(self.path.clone()));
        }
        let slice = self.header.as_mut()
            .and_then(MappedRegion::as_mut_slice)
            .ok_or_else(|| JournalError::ReadOnly(self.path.clone()))?;
        LittleEndian::write_i64(slice, offset as i64);
        Ok(())
    }

    // ── 生命周期 ──────────────────────────────────────────────────────────────

    /// 将文件截断到 `HEADER_SIZE + appendOffset`，释放尾部空间
    pub fn compact(&mut self) -> Result<()> {
        self.close();
        let result = self.compact_internal();
        let reopened = self.open_internal(self.mode.is_writable());
        result.and(reopened)
    }

    fn compact_internal(&mut self) -> Result<()> {
        self.open_internal(true)?;
        let new_size = HEADER_SIZE + self.append_offset().max(0) as u64;
        self.header = None;
        info!(path = %self.path.display(), new_size, "mapped_file.compact");
        let result = match &self.file {
            Some(f) => f.set_len(new_size)
                .map_err(|e| JournalError::io(&self.path, format!("truncate to {new_size} bytes"), e)),
            None => Err(JournalError::Closed(self.path.clone())),
        };
        self.close();
        result
    }

    /// 刷盘所有可写窗口与文件头
    pub fn force(&self) -> Result<()> {
        let regions = self.header.iter()
            .chain(self.windows.iter().flatten())
            .chain(self.stitches.iter().flatten());
        for r in regions {
            r.flush().map_err(|e| JournalError::io(&self.path, "flush", e))?;
        }
        Ok(())
    }

    /// 释放所有窗口并关闭文件，可重复调用
    pub fn close(&mut self) {
        self.windows.clear();
        self.stitches.clear();
        self.header = None;
        self.file = None;
    }

    pub fn delete(&mut self) -> Result<()> {
        self.close();
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound =>
                Err(JournalError::io(&self.path, "delete", e)),
            _ => Ok(()),
        }
    }

    // ── 辅助 ─────────────────────────────────────────────────────────────────

    pub fn is_open(&self) -> bool { self.file.is_some() }

    pub fn mode(&self) -> JournalMode { self.mode }

    pub fn bit_hint(&self) -> u32 { self.bit_hint }

    pub fn window_size(&self) -> u64 { 1u64 << self.bit_hint }

    pub fn path(&self) -> &Path { &self.path }

    pub fn full_file_name(&self) -> String {
        fs::canonicalize(&self.path)
            .unwrap_or_else(|_| self.path.clone())
            .display()
            .to_string()
    }

    /// (驻留主窗口数, 驻留 stitch 数)
    pub fn resident_count(&self) -> (usize, usize) {
        (
            self.windows.iter().flatten().count(),
            self.stitches.iter().flatten().count(),
        )
    }

    fn file_size(&self) -> Result<u64> {
        match &self.file {
            Some(f) => file_len(f, &self.path),
            None    => Err(JournalError::Closed(self.path.clone())),
        }
    }
}

impl fmt::Display for MappedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MappedFile[file={}, appendOffset={}]", self.path.display(), self.append_offset())
    }
}

impl fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("bit_hint", &self.bit_hint)
            .field("append_offset", &self.append_offset())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_file_has_zero_offset() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| JournalError::io("tmp", "tempdir", e))?;
        let mut mf = MappedFile::open(dir.path().join("a/b/c.d"), 4, JournalMode::Append)?;
        assert_eq!(mf.append_offset(), 0);
        mf.set_append_offset(42)?;
        assert_eq!(mf.append_offset(), 42);
        mf.close();
        assert_eq!(mf.append_offset(), -1);
        mf.close();
        Ok(())
    }

    #[test]
    fn missing_file_in_read_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = MappedFile::open(dir.path().join("nope.d"), 4, JournalMode::Read).unwrap_err();
        assert!(matches!(err, JournalError::NoSuchFile(_)));
    }

    #[test]
    fn stitch_spans_window_boundary() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| JournalError::io("tmp", "tempdir", e))?;
        let mut mf = MappedFile::open(dir.path().join("s.d"), 4, JournalMode::Append)?;
        let payload: Vec<u8> = (0u8..40).collect();
        mf.region_mut(10, payload.len())?.copy_from_slice(&payload);
        assert_eq!(mf.resident_count(), (1, 1));

        // 同一槽位上更小的跨界请求复用 stitch
        assert_eq!(mf.region(10, 8)?, &payload[..8]);
        assert_eq!(mf.resident_count(), (1, 1));

        // 逐窗口读回
        for (i, b) in payload.iter().enumerate() {
            assert_eq!(mf.region(10 + i as u64, 1)?, &[*b]);
        }
        Ok(())
    }

    #[test]
    fn read_mode_rejects_writes_and_past_eof() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| JournalError::io("tmp", "tempdir", e))?;
        let path = dir.path().join("r.d");
        {
            let mut mf = MappedFile::open(&path, 4, JournalMode::Append)?;
            mf.region_mut(0, 4)?.copy_from_slice(b"abcd");
            mf.set_append_offset(4)?;
            mf.compact()?;
        }
        let mut mf = MappedFile::open(&path, 4, JournalMode::Read)?;
        assert_eq!(mf.append_offset(), 4);
        assert_eq!(mf.region(0, 4)?, b"abcd");
        assert!(matches!(mf.region_mut(0, 1), Err(JournalError::ReadOnly(_))));
        assert!(matches!(mf.set_append_offset(0), Err(JournalError::ReadOnly(_))));
        assert!(matches!(mf.region(2, 8), Err(JournalError::OutOfBounds { .. })));
        Ok(())
    }
}
