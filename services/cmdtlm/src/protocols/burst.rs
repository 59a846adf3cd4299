//! Burst framing: every read is one packet, optionally behind a sync pattern

use super::{Protocol, ProtocolResult};
use crate::error::Result;
use common::hex::encode_upper;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Searching,
    Found,
}

#[derive(Debug)]
pub struct BurstProtocol {
    discard_leading_bytes: usize,
    sync_pattern: Option<Vec<u8>>,
    fill_fields: bool,
    buffer: Vec<u8>,
    sync_state: SyncState,
}

impl BurstProtocol {
    pub fn new(discard_leading_bytes: usize, sync_pattern: Option<Vec<u8>>, fill_fields: bool) -> Self {
        Self {
            discard_leading_bytes,
            sync_pattern: sync_pattern.filter(|p| !p.is_empty()),
            fill_fields,
            buffer: Vec::new(),
            sync_state: SyncState::Searching,
        }
    }

    pub fn discard_leading_bytes(&self) -> usize {
        self.discard_leading_bytes
    }

    pub fn fill_fields(&self) -> bool {
        self.fill_fields
    }

    /// Bytes held back waiting for the rest of a packet
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Shared read path; `reduce` cuts one packet off the front of the buffer
    pub(crate) fn read_with<F>(&mut self, data: &[u8], reduce: F) -> Result<ProtocolResult>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<Option<Vec<u8>>>,
    {
        self.buffer.extend_from_slice(data);
        if self.handle_sync_pattern() {
            return Ok(ProtocolResult::Stop);
        }
        let Some(mut packet) = reduce(&mut self.buffer)? else {
            return Ok(ProtocolResult::Stop);
        };
        self.sync_state = SyncState::Searching;
        if self.discard_leading_bytes > 0 {
            let n = self.discard_leading_bytes.min(packet.len());
            packet.drain(..n);
        }
        Ok(ProtocolResult::Data(packet))
    }

    /// Align the buffer on the sync pattern; true when more data is needed
    fn handle_sync_pattern(&mut self) -> bool {
        let Some(sync) = self.sync_pattern.clone() else {
            return false;
        };
        if self.sync_state == SyncState::Found {
            return false;
        }
        loop {
            if self.buffer.len() < sync.len() {
                return true;
            }
            let Some(index) = self.buffer.iter().position(|b| *b == sync[0]) else {
                self.log_discard(self.buffer.len(), false);
                self.buffer.clear();
                return true;
            };
            if self.buffer.len() < index + sync.len() {
                return true;
            }
            if self.buffer[index..index + sync.len()] == sync[..] {
                if index != 0 {
                    self.log_discard(index, true);
                    self.buffer.drain(..index);
                }
                self.sync_state = SyncState::Found;
                return false;
            }
            self.log_discard(index + 1, false);
            self.buffer.drain(..=index);
        }
    }

    fn log_discard(&self, length: usize, found: bool) {
        error!(
            "Sync {}found. Discarding {} bytes of data.",
            if found { "" } else { "not " },
            length
        );
        let start = &self.buffer[..self.buffer.len().min(6)];
        error!("Starting: {}", encode_upper(start));
    }

    /// Leading bytes and sync pattern for an outgoing packet
    pub(crate) fn frame(&self, mut data: Vec<u8>) -> Vec<u8> {
        if !self.fill_fields {
            return data;
        }
        if self.discard_leading_bytes > 0 {
            let mut framed = vec![0u8; self.discard_leading_bytes];
            framed.append(&mut data);
            data = framed;
        }
        if let Some(sync) = &self.sync_pattern {
            let n = sync.len().min(data.len());
            data[..n].copy_from_slice(&sync[..n]);
        }
        data
    }
}

fn reduce_to_single_packet(buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
    if buffer.is_empty() {
        return Ok(None);
    }
    Ok(Some(std::mem::take(buffer)))
}

impl Protocol for BurstProtocol {
    fn name(&self) -> &'static str {
        "burst"
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.sync_state = SyncState::Searching;
    }

    fn read_data(&mut self, data: &[u8]) -> Result<ProtocolResult> {
        self.read_with(data, reduce_to_single_packet)
    }

    fn write_data(&mut self, data: Vec<u8>) -> Result<ProtocolResult> {
        Ok(ProtocolResult::Data(self.frame(data)))
    }
}
