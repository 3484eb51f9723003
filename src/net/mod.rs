//! 复制协议的帧层
//!
//! ```text
//! ┌──────────────┬─────────────────────────┐
//! │ len (i32 LE) │ payload (len bytes)     │   重复，无 magic / 校验 / 消息类型
//! └──────────────┴─────────────────────────┘
//! ```
//!
//! 消息身份完全由收发双方的轮次状态决定（见 [`symbol::ReplicationRound`]）。
//! 发送端用 [`ObjectProducer`] + 可插拔的 [`PayloadEncoder`] 组帧，
//! 接收端用 [`FrameReader`] 取出 payload，再用 [`PayloadReader`] 解码。

pub mod state;
pub mod symbol;

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{JournalError, Result};

const LENGTH_PREFIX: usize = 4;

fn desync(msg: impl Into<String>) -> JournalError {
    JournalError::ProtocolDesync(msg.into())
}

// ── 编码 ──────────────────────────────────────────────────────────────────────

/// 一种消息的 payload 编码：先估算大小，再写入
pub trait PayloadEncoder {
    type Value: ?Sized;

    fn payload_size(&self, value: &Self::Value) -> usize;

    fn encode(&self, value: &Self::Value, out: &mut Vec<u8>);
}

/// 帧缓冲：一次 set_value 组一帧，write 把未发送部分写到通道
///
/// 缓冲按历史最大帧扩容，不收缩。
pub struct ObjectProducer<E> {
    encoder:  E,
    buffer:   Vec<u8>,
    position: usize,
}

impl<E: PayloadEncoder + Default> Default for ObjectProducer<E> {
    fn default() -> Self { Self::new(E::default()) }
}

impl<E: PayloadEncoder> ObjectProducer<E> {
    pub fn new(encoder: E) -> Self {
        Self { encoder, buffer: Vec::new(), position: 0 }
    }

    pub fn set_value(&mut self, value: &E::Value) -> Result<()> {
        let size = self.encoder.payload_size(value);
        self.buffer.clear();
        self.buffer.reserve(LENGTH_PREFIX + size);
        self.buffer.extend_from_slice(&[0; LENGTH_PREFIX]);
        self.encoder.encode(value, &mut self.buffer);

        let written = self.buffer.len() - LENGTH_PREFIX;
        debug_assert_eq!(written, size, "payload size estimate is off");
        let len = i32::try_from(written)
            .map_err(|_| desync(format!("payload of {written} bytes does not fit a frame")))?;
        LittleEndian::write_i32(&mut self.buffer[..LENGTH_PREFIX], len);
        self.position = 0;
        Ok(())
    }

    pub fn has_content(&self) -> bool { self.position < self.buffer.len() }

    pub fn write<W: Write + ?Sized>(&mut self, channel: &mut W) -> Result<()> {
        channel.write_all(&self.buffer[self.position..]).map_err(JournalError::Network)?;
        channel.flush().map_err(JournalError::Network)?;
        self.position = self.buffer.len();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }

    pub fn capacity(&self) -> usize { self.buffer.capacity() }
}

/// 写 `[len | -1][utf8]`
pub(crate) fn write_str(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(v) => {
            let _ = out.write_i32::<LittleEndian>(v.len() as i32);
            out.extend_from_slice(v.as_bytes());
        }
        None => {
            let _ = out.write_i32::<LittleEndian>(-1);
        }
    }
}

pub(crate) fn str_size(value: &str) -> usize { 4 + value.len() }

// ── 解码 ──────────────────────────────────────────────────────────────────────

/// 从通道读出一帧，复用内部缓冲
#[derive(Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self { Self::default() }

    pub fn read_frame<R: Read + ?Sized>(&mut self, channel: &mut R) -> Result<&[u8]> {
        let len = channel.read_i32::<LittleEndian>().map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => desync("channel closed before frame header"),
            _                            => JournalError::Network(e),
        })?;
        if len < 0 {
            return Err(desync(format!("negative frame length {len}")));
        }
        // 随数据到达增长，不按对端声明的长度预分配
        self.buffer.clear();
        let read = (&mut *channel)
            .take(len as u64)
            .read_to_end(&mut self.buffer)
            .map_err(JournalError::Network)?;
        if read != len as usize {
            return Err(desync(format!("frame truncated, expected {len} bytes, got {read}")));
        }
        Ok(&self.buffer)
    }
}

/// payload 游标；任何越界都视为协议失步
pub struct PayloadReader<'a> {
    input: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(input: &'a [u8]) -> Self { Self { input } }

    pub fn read_i32(&mut self, what: &str) -> Result<i32> {
        self.input.read_i32::<LittleEndian>().map_err(|_| desync(format!("payload ends before {what}")))
    }

    pub fn read_i64(&mut self, what: &str) -> Result<i64> {
        self.input.read_i64::<LittleEndian>().map_err(|_| desync(format!("payload ends before {what}")))
    }

    /// 非负计数，且不超过剩余字节按 `min_item` 能容纳的数量
    pub fn read_count(&mut self, what: &str, min_item: usize) -> Result<usize> {
        let n = self.read_i32(what)?;
        if n < 0 || (n as usize).saturating_mul(min_item) > self.input.len() {
            return Err(desync(format!("{what} {n} does not fit in {} remaining bytes", self.input.len())));
        }
        Ok(n as usize)
    }

    pub fn read_str(&mut self, what: &str) -> Result<Option<String>> {
        let len = self.read_i32(what)?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 || len as usize > self.input.len() {
            return Err(desync(format!("{what} length {len} exceeds payload")));
        }
        let (bytes, rest) = self.input.split_at(len as usize);
        self.input = rest;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| desync(format!("{what} is not UTF-8: {e}")))
    }

    pub fn finish(self) -> Result<()> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(desync(format!("{} trailing bytes after payload", self.input.len())))
        }
    }
}

// ── 内存通道 ──────────────────────────────────────────────────────────────────

/// 进程内回环通道：写入的字节按序可读，读空返回 0（EOF）
#[derive(Debug, Default)]
pub struct MemoryChannel {
    bytes: VecDeque<u8>,
}

impl MemoryChannel {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.bytes.len() }

    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }
}

impl Read for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.bytes.len());
        for (dst, src) in buf.iter_mut().zip(self.bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MemoryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StrEncoder;

    impl PayloadEncoder for StrEncoder {
        type Value = str;

        fn payload_size(&self, value: &str) -> usize { str_size(value) }

        fn encode(&self, value: &str, out: &mut Vec<u8>) { write_str(out, Some(value)) }
    }

    #[test]
    fn frame_roundtrip_and_buffer_never_shrinks() -> Result<()> {
        let mut producer = ObjectProducer::<StrEncoder>::default();
        let mut channel = MemoryChannel::new();

        producer.set_value("a much longer value to grow the buffer")?;
        let grown = producer.capacity();
        assert!(producer.has_content());
        producer.write(&mut channel)?;
        assert!(!producer.has_content());

        producer.set_value("short")?;
        assert_eq!(producer.capacity(), grown);
        producer.write(&mut channel)?;

        let mut reader = FrameReader::new();
        let mut payload = PayloadReader::new(reader.read_frame(&mut channel)?);
        assert_eq!(payload.read_str("value")?.as_deref(), Some("a much longer value to grow the buffer"));
        payload.finish()?;
        let mut payload = PayloadReader::new(reader.read_frame(&mut channel)?);
        assert_eq!(payload.read_str("value")?.as_deref(), Some("short"));
        payload.finish()?;
        assert!(channel.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_frames_desync() {
        let mut reader = FrameReader::new();

        let mut empty = MemoryChannel::new();
        assert!(matches!(reader.read_frame(&mut empty), Err(JournalError::ProtocolDesync(_))));

        let mut negative = MemoryChannel::new();
        negative.write_all(&(-5i32).to_le_bytes()).expect("write");
        assert!(matches!(reader.read_frame(&mut negative), Err(JournalError::ProtocolDesync(_))));

        let mut truncated = MemoryChannel::new();
        truncated.write_all(&10i32.to_le_bytes()).expect("write");
        truncated.write_all(b"abc").expect("write");
        assert!(matches!(reader.read_frame(&mut truncated), Err(JournalError::ProtocolDesync(_))));
    }

    #[test]
    fn oversized_length_does_not_preallocate() {
        let mut channel = MemoryChannel::new();
        channel.write_all(&i32::MAX.to_le_bytes()).expect("write");
        channel.write_all(b"abc").expect("write");

        let mut reader = FrameReader::new();
        assert!(matches!(reader.read_frame(&mut channel), Err(JournalError::ProtocolDesync(_))));
        assert!(reader.buffer.capacity() < 1 << 20);
    }

    #[test]
    fn payload_reader_rejects_overlong_counts() {
        let bytes = 1000i32.to_le_bytes();
        let mut payload = PayloadReader::new(&bytes);
        assert!(payload.read_count("value count", 4).is_err());
    }
}
