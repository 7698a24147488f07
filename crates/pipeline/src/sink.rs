//! Emission sink backed by an in-process queue.
//!
//! [`ChannelSink`] hands each record to an unbounded tokio channel. The
//! receiving half belongs to whatever forwards records to the ingestion
//! destination, so a slow destination never stalls a cycle's continuations.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::errors::SinkError;
use crate::ports::EventSink;
use crate::types::ChangeRecord;

/// An [`EventSink`] that forwards records into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<ChangeRecord>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    pub fn new() -> (Self, UnboundedReceiver<ChangeRecord>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, record: ChangeRecord) -> Result<(), SinkError> {
        self.sender.send(record).map_err(|_| SinkError::Closed)
    }
}
