use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;

/// One recorded channel of a bag file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub topic: String,
    /// Schema name, e.g. `sensor_msgs/msg/Image`. Empty for schemaless channels.
    pub msgtype: String,
    pub message_encoding: String,
    pub msgcount: u64,
    /// Position of the owning file within a split bag.
    pub file_index: usize,
    pub channel_id: u16,
}

impl Connection {
    pub fn from_channel(channel: &mcap::Channel<'_>, file_index: usize, msgcount: u64) -> Self {
        Self {
            topic: channel.topic.clone(),
            msgtype: channel
                .schema
                .as_ref()
                .map(|schema| schema.name.clone())
                .unwrap_or_default(),
            message_encoding: channel.message_encoding.clone(),
            msgcount,
            file_index,
            channel_id: channel.id,
        }
    }
}

/// A single message as stored in the bag.
#[derive(Debug, Clone)]
pub struct Record<'a> {
    pub connection: Arc<Connection>,
    /// Log time in nanoseconds.
    pub timestamp: u64,
    pub data: Cow<'a, [u8]>,
}
