//! 字典表增量复制
//!
//! 一轮同步：
//!
//! ```text
//!   slave                                  master
//!     │  ClientState (各字典表 size)            │
//!     │ ─────────────────────────────────────▶ │  configure: master.size > reported ?
//!     │                                        │
//!     │  SymbolTableDelta（仅在有内容时发送）    │
//!     │ ◀───────────────────────────────────── │
//!   追加 values → update_index → align_size
//! ```
//!
//! delta payload:
//! `[i32 table_count]` 然后每张表 `[i32 column_index][i32 start_key][i32 value_count][value_count × (i32 len, utf8)]`
//!
//! 只扩展双方一致的前缀，从不回滚或修复分歧的 key。

use std::io::{Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info};

use super::state::{ClientState, ClientStateConsumer, ClientStateProducer};
use super::{str_size, write_str, FrameReader, ObjectProducer, PayloadEncoder, PayloadReader};
use crate::column::Column;
use crate::common::{JournalError, Result, SymbolKey};
use crate::partition::Partition;

fn desync(msg: impl Into<String>) -> JournalError {
    JournalError::ProtocolDesync(msg.into())
}

// ── Delta ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDelta {
    pub column_index: i32,
    pub start_key:    SymbolKey,
    pub values:       Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTableDelta {
    pub tables: Vec<TableDelta>,
}

impl SymbolTableDelta {
    pub fn value_count(&self) -> usize {
        self.tables.iter().map(|t| t.values.len()).sum()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let table_count = r.read_count("table count", 12)?;
        let mut tables = Vec::with_capacity(table_count);
        for _ in 0..table_count {
            let column_index = r.read_i32("column index")?;
            let start_key = r.read_i32("start key")?;
            let n = r.read_count("value count", 4)?;
            let mut values = Vec::with_capacity(n);
            for _ in 0..n {
                let value = r
                    .read_str("symbol value")?
                    .ok_or_else(|| desync(format!("null symbol value for column {column_index}")))?;
                values.push(value);
            }
            tables.push(TableDelta { column_index, start_key, values });
        }
        r.finish()?;
        Ok(Self { tables })
    }
}

#[derive(Debug, Default)]
pub struct SymbolTableDeltaEncoder;

impl PayloadEncoder for SymbolTableDeltaEncoder {
    type Value = SymbolTableDelta;

    fn payload_size(&self, value: &SymbolTableDelta) -> usize {
        4 + value.tables.iter()
            .map(|t| 12 + t.values.iter().map(|v| str_size(v.as_str())).sum::<usize>())
            .sum::<usize>()
    }

    fn encode(&self, value: &SymbolTableDelta, out: &mut Vec<u8>) {
        let _ = out.write_i32::<LittleEndian>(value.tables.len() as i32);
        for t in &value.tables {
            let _ = out.write_i32::<LittleEndian>(t.column_index);
            let _ = out.write_i32::<LittleEndian>(t.start_key);
            let _ = out.write_i32::<LittleEndian>(t.values.len() as i32);
            for v in &t.values {
                write_str(out, Some(v.as_str()));
            }
        }
    }
}

// ── Producer（master 侧） ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct SymbolTableProducer {
    frame: ObjectProducer<SymbolTableDeltaEncoder>,
}

impl SymbolTableProducer {
    pub fn new() -> Self { Self::default() }

    /// 对比从库上报的大小，收集 `[reported, master.size())` 的值
    pub fn configure(&mut self, master: &mut Partition, state: &ClientState) -> Result<()> {
        self.frame.clear();
        let columns = master.symbol_columns();
        if state.symbol_table_sizes.len() > columns.len() {
            return Err(desync(format!(
                "client reports {} symbol tables, journal has {}",
                state.symbol_table_sizes.len(),
                columns.len()
            )));
        }

        let mut delta = SymbolTableDelta::default();
        for (ordinal, &column) in columns.iter().enumerate() {
            let reported = state.symbol_table_size(ordinal);
            if reported < 0 {
                return Err(desync(format!("negative symbol table size {reported} for column {column}")));
            }
            let table = master.symbol_table(column)?;
            if table.size() <= reported {
                continue;
            }
            let values = (reported..table.size())
                .map(|key| table.value(key))
                .collect::<Result<Vec<_>>>()?;
            debug!(column = %table.column(), from = reported, to = table.size(), "replication.delta");
            delta.tables.push(TableDelta { column_index: column as i32, start_key: reported, values });
        }

        if !delta.tables.is_empty() {
            self.frame.set_value(&delta)?;
        }
        Ok(())
    }

    pub fn has_content(&self) -> bool { self.frame.has_content() }

    pub fn write<W: Write + ?Sized>(&mut self, channel: &mut W) -> Result<()> {
        self.frame.write(channel)
    }
}

// ── Consumer（slave 侧） ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct SymbolTableConsumer {
    reader:   FrameReader,
    complete: bool,
}

impl SymbolTableConsumer {
    pub fn new() -> Self { Self::default() }

    /// 整帧校验通过后才开始追加；校验失败时从库不变
    pub fn read<R: Read + ?Sized>(&mut self, channel: &mut R, slave: &mut Partition) -> Result<usize> {
        let delta = SymbolTableDelta::decode(self.reader.read_frame(channel)?)?;

        let mut last_column = -1;
        for t in &delta.tables {
            if t.column_index <= last_column {
                return Err(desync(format!("column {} out of order in delta", t.column_index)));
            }
            last_column = t.column_index;
            let table = slave
                .symbol_table(t.column_index as usize)
                .map_err(|_| desync(format!("column {} is not a symbol column", t.column_index)))?;
            if table.size() != t.start_key {
                return Err(desync(format!(
                    "delta for {} starts at key {}, local size is {}",
                    table.column(),
                    t.start_key,
                    table.size()
                )));
            }
        }

        for t in &delta.tables {
            let table = slave.symbol_table(t.column_index as usize)?;
            let old_size = table.size();
            let data = table.data_column()?;
            for v in &t.values {
                data.put_string(Some(v.as_str()))?;
            }
            data.commit()?;
            table.update_index(old_size, old_size + t.values.len() as i32)?;
            table.align_size()?;
            table.commit()?;
            info!(column = %table.column(), from = old_size, to = table.size(), "replication.apply");
        }

        self.complete = true;
        Ok(delta.value_count())
    }

    pub fn is_complete(&self) -> bool { self.complete }

    pub fn reset(&mut self) { self.complete = false }
}

// ── 一轮同步 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    AwaitingState,
    StateSent,
    /// 终态：主库没有新值
    NoContent,
    ContentSent,
    /// 终态：增量已应用
    Complete,
}

impl RoundState {
    pub fn is_terminal(self) -> bool { matches!(self, Self::NoContent | Self::Complete) }
}

/// 驱动一轮同步的状态机；步骤顺序错误即为协议失步
pub struct ReplicationRound {
    journal_index:   i32,
    state:           RoundState,
    state_producer:  ClientStateProducer,
    state_consumer:  ClientStateConsumer,
    symbol_producer: SymbolTableProducer,
    symbol_consumer: SymbolTableConsumer,
}

impl ReplicationRound {
    pub fn new(journal_index: i32) -> Self {
        Self {
            journal_index,
            state:           RoundState::AwaitingState,
            state_producer:  ClientStateProducer::default(),
            state_consumer:  ClientStateConsumer::new(),
            symbol_producer: SymbolTableProducer::new(),
            symbol_consumer: SymbolTableConsumer::new(),
        }
    }

    pub fn state(&self) -> RoundState { self.state }

    fn require(&self, expected: RoundState, step: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(desync(format!("{step} in state {:?}, expected {expected:?}", self.state)))
        }
    }

    /// slave：上报当前进度
    pub fn send_state<W: Write + ?Sized>(&mut self, slave: &Partition, to_master: &mut W) -> Result<()> {
        self.require(RoundState::AwaitingState, "send_state")?;
        let state = ClientState::from_partition(self.journal_index, slave);
        self.state_producer.set_value(&state)?;
        self.state_producer.write(to_master)?;
        self.state = RoundState::StateSent;
        Ok(())
    }

    /// master：读进度，有内容则发送增量；返回是否发送
    pub fn serve<C: Read + Write + ?Sized>(&mut self, master: &mut Partition, slave_channel: &mut C) -> Result<bool> {
        self.require(RoundState::StateSent, "serve")?;
        let state = self.state_consumer.read(slave_channel)?;
        self.symbol_producer.configure(master, state)?;
        if !self.symbol_producer.has_content() {
            self.state = RoundState::NoContent;
            return Ok(false);
        }
        self.symbol_producer.write(slave_channel)?;
        self.state = RoundState::ContentSent;
        Ok(true)
    }

    /// slave：应用增量，返回追加的值个数
    pub fn receive<R: Read + ?Sized>(&mut self, slave: &mut Partition, from_master: &mut R) -> Result<usize> {
        self.require(RoundState::ContentSent, "receive")?;
        let applied = self.symbol_consumer.read(from_master, slave)?;
        self.state = RoundState::Complete;
        Ok(applied)
    }

    /// 在同一条回环通道上跑完整一轮；上一轮已结束或中途失败时先重置
    pub fn run<C: Read + Write + ?Sized>(
        &mut self,
        master:  &mut Partition,
        slave:   &mut Partition,
        channel: &mut C,
    ) -> Result<RoundState> {
        if self.state != RoundState::AwaitingState {
            self.reset();
        }
        self.send_state(slave, channel)?;
        let mut applied = 0;
        if self.serve(master, channel)? {
            applied = self.receive(slave, channel)?;
        }
        info!(journal = self.journal_index, state = ?self.state, applied, "replication.round");
        Ok(self.state)
    }

    pub fn reset(&mut self) {
        self.state = RoundState::AwaitingState;
        self.state_consumer.reset();
        self.symbol_consumer.reset();
    }

    pub fn is_complete(&self) -> bool { self.symbol_consumer.is_complete() }
}
