use serde::{Deserialize, Serialize};

use crate::shared::constants;

/// builtin_interfaces/msg/Time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Time {
    pub sec: i32,
    pub nanosec: u32,
}

/// std_msgs/msg/Header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

/// sensor_msgs/msg/Image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    pub is_bigendian: u8,
    /// Full row length in bytes.
    pub step: u32,
    pub data: Vec<u8>,
}

/// sensor_msgs/msg/CompressedImage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressedImage {
    pub header: Header,
    /// `jpeg`, `png`, or `<encoding>; compressedDepth ...` for depth streams
    pub format: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Image,
    CompressedImage,
    Other,
}

impl MessageKind {
    /// Accepts both `sensor_msgs/msg/Image` and the ROS 1 style `sensor_msgs/Image`.
    pub fn from_msgtype(msgtype: &str) -> Self {
        match normalize_msgtype(msgtype).as_str() {
            constants::IMAGE_MSGTYPE => MessageKind::Image,
            constants::COMPRESSED_IMAGE_MSGTYPE => MessageKind::CompressedImage,
            _ => MessageKind::Other,
        }
    }

    pub fn is_image(self) -> bool {
        self != MessageKind::Other
    }
}

fn normalize_msgtype(msgtype: &str) -> String {
    let parts: Vec<&str> = msgtype.split('/').collect();
    match parts.as_slice() {
        [package, name] => format!("{}/msg/{}", package, name),
        _ => msgtype.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind() {
        assert_eq!(MessageKind::from_msgtype("sensor_msgs/msg/Image"), MessageKind::Image);
        assert_eq!(MessageKind::from_msgtype("sensor_msgs/Image"), MessageKind::Image);
        assert_eq!(
            MessageKind::from_msgtype("sensor_msgs/msg/CompressedImage"),
            MessageKind::CompressedImage
        );
        assert_eq!(MessageKind::from_msgtype("sensor_msgs/msg/Imu"), MessageKind::Other);
        assert_eq!(MessageKind::from_msgtype(""), MessageKind::Other);
        assert!(!MessageKind::Other.is_image());
    }
}
