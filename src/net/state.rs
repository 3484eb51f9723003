//! 从库上报的消费进度
//!
//! payload: `[i32 journal_index][i64 max_row_id][i32 n][n × i32 symbol_table_size]`
//! 其中字典表大小按分区内字典列的列序排列。

use std::io::Read;

use byteorder::{LittleEndian, WriteBytesExt};

use super::{FrameReader, ObjectProducer, PayloadEncoder, PayloadReader};
use crate::common::Result;
use crate::partition::Partition;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientState {
    pub journal_index:      i32,
    /// 最后一行的行号，空分区为 -1
    pub max_row_id:         i64,
    pub symbol_table_sizes: Vec<i32>,
}

impl ClientState {
    pub fn from_partition(journal_index: i32, partition: &Partition) -> Self {
        Self {
            journal_index,
            max_row_id: partition.row_count() - 1,
            symbol_table_sizes: partition.symbol_table_sizes(),
        }
    }

    /// 第 ordinal 个字典列上报的大小；未上报视为 0
    pub fn symbol_table_size(&self, ordinal: usize) -> i32 {
        self.symbol_table_sizes.get(ordinal).copied().unwrap_or(0)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let journal_index = r.read_i32("journal index")?;
        let max_row_id = r.read_i64("max row id")?;
        let n = r.read_count("symbol table count", 4)?;
        let symbol_table_sizes = (0..n)
            .map(|_| r.read_i32("symbol table size"))
            .collect::<Result<Vec<_>>>()?;
        r.finish()?;
        Ok(Self { journal_index, max_row_id, symbol_table_sizes })
    }
}

#[derive(Debug, Default)]
pub struct ClientStateEncoder;

impl PayloadEncoder for ClientStateEncoder {
    type Value = ClientState;

    fn payload_size(&self, value: &ClientState) -> usize {
        4 + 8 + 4 + 4 * value.symbol_table_sizes.len()
    }

    fn encode(&self, value: &ClientState, out: &mut Vec<u8>) {
        let _ = out.write_i32::<LittleEndian>(value.journal_index);
        let _ = out.write_i64::<LittleEndian>(value.max_row_id);
        let _ = out.write_i32::<LittleEndian>(value.symbol_table_sizes.len() as i32);
        for &size in &value.symbol_table_sizes {
            let _ = out.write_i32::<LittleEndian>(size);
        }
    }
}

pub type ClientStateProducer = ObjectProducer<ClientStateEncoder>;

#[derive(Default)]
pub struct ClientStateConsumer {
    reader: FrameReader,
    value:  Option<ClientState>,
}

impl ClientStateConsumer {
    pub fn new() -> Self { Self::default() }

    pub fn read<R: Read + ?Sized>(&mut self, channel: &mut R) -> Result<&ClientState> {
        let state = ClientState::decode(self.reader.read_frame(channel)?)?;
        Ok(self.value.insert(state))
    }

    pub fn value(&self) -> Option<&ClientState> { self.value.as_ref() }

    pub fn is_complete(&self) -> bool { self.value.is_some() }

    pub fn reset(&mut self) { self.value = None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::JournalError;
    use crate::net::MemoryChannel;

    #[test]
    fn state_crosses_the_channel() -> Result<()> {
        let state = ClientState { journal_index: 3, max_row_id: 41, symbol_table_sizes: vec![2, 0, 7] };
        let mut producer = ClientStateProducer::default();
        let mut channel = MemoryChannel::new();
        producer.set_value(&state)?;
        producer.write(&mut channel)?;
        assert_eq!(channel.len(), 4 + 4 + 8 + 4 + 12);

        let mut consumer = ClientStateConsumer::new();
        assert!(!consumer.is_complete());
        assert_eq!(consumer.read(&mut channel)?, &state);
        assert!(consumer.is_complete());
        assert_eq!(consumer.value().map(|s| s.symbol_table_size(5)), Some(0));
        consumer.reset();
        assert!(consumer.value().is_none());
        Ok(())
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut payload = Vec::new();
        ClientStateEncoder.encode(&ClientState::default(), &mut payload);
        payload.push(0);
        assert!(matches!(ClientState::decode(&payload), Err(JournalError::ProtocolDesync(_))));
    }
}
