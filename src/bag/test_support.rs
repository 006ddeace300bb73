use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::decoder::cdr;
use crate::decoder::messages::{CompressedImage, Header, Image, Time};

pub struct FixtureMessage {
    pub topic: String,
    pub msgtype: String,
    pub log_time: u64,
    pub data: Vec<u8>,
    pub message_encoding: String,
}

impl FixtureMessage {
    pub fn raw(topic: &str, msgtype: &str, log_time: u64, data: Vec<u8>) -> Self {
        Self {
            topic: topic.to_string(),
            msgtype: msgtype.to_string(),
            log_time,
            data,
            message_encoding: "cdr".to_string(),
        }
    }

    pub fn with_encoding(mut self, message_encoding: &str) -> Self {
        self.message_encoding = message_encoding.to_string();
        self
    }

    pub fn mono8(topic: &str, log_time: u64, stamp: Time, width: u32, height: u32) -> Self {
        let msg = Image {
            header: Header {
                stamp,
                frame_id: "camera".to_string(),
            },
            height,
            width,
            encoding: "mono8".to_string(),
            is_bigendian: 0,
            step: width,
            data: (0..width * height).map(|i| (i % 256) as u8).collect(),
        };
        Self::raw(topic, "sensor_msgs/msg/Image", log_time, cdr::serialize(&msg).unwrap())
    }

    pub fn compressed(topic: &str, log_time: u64, format: &str, data: Vec<u8>) -> Self {
        let msg = CompressedImage {
            header: Header::default(),
            format: format.to_string(),
            data,
        };
        Self::raw(
            topic,
            "sensor_msgs/msg/CompressedImage",
            log_time,
            cdr::serialize(&msg).unwrap(),
        )
    }
}

/// Footer record (opcode, length, two offsets, crc) plus the closing magic.
const FOOTER_AND_MAGIC_LEN: u64 = 1 + 8 + 8 + 8 + 4 + 8;

/// Writes an MCAP file; `with_statistics = false` leaves readers to count messages themselves.
pub fn write_bag(path: &Path, messages: &[FixtureMessage], with_statistics: bool) {
    write_bag_with(path, messages, mcap::WriteOptions::new().emit_statistics(with_statistics));
}

/// Messages are written in slice order, whatever their log times.
pub fn write_bag_with(path: &Path, messages: &[FixtureMessage], options: mcap::WriteOptions) {
    let file = BufWriter::new(File::create(path).unwrap());
    let mut writer = options.create(file).unwrap();

    let mut channels: HashMap<String, u16> = HashMap::new();
    for (sequence, message) in messages.iter().enumerate() {
        let channel_id = match channels.get(&message.topic) {
            Some(id) => *id,
            None => {
                let schema_id = writer.add_schema(&message.msgtype, "ros2msg", b"").unwrap();
                let id = writer
                    .add_channel(schema_id, &message.topic, &message.message_encoding, &BTreeMap::new())
                    .unwrap();
                channels.insert(message.topic.clone(), id);
                id
            }
        };

        writer
            .write_to_known_channel(
                &mcap::records::MessageHeader {
                    channel_id,
                    sequence: sequence as u32,
                    log_time: message.log_time,
                    publish_time: message.log_time,
                },
                &message.data,
            )
            .unwrap();
    }
    writer.finish().unwrap();
}

/// Drops the footer and closing magic, as left behind by a recorder that died.
pub fn strip_footer(path: &Path) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - FOOTER_AND_MAGIC_LEN).unwrap();
}

/// Keeps only the first `len` bytes of the file.
pub fn cut_to(path: &Path, len: u64) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len).unwrap();
}
