pub const APP_NAME: &str = "bagframes";

pub const ERROR_LOG_FILE: &str = "bagframes-error.log";
pub const DEBUG_LOG_FILE: &str = "bagframes-debug.log";

pub const MCAP_EXTENSION: &str = "mcap";
pub const IMAGE_EXTENSION: &str = "png";

pub const CDR_ENCODING: &str = "cdr";
pub const CDR_HEADER_LEN: usize = 4;

pub const IMAGE_MSGTYPE: &str = "sensor_msgs/msg/Image";
pub const COMPRESSED_IMAGE_MSGTYPE: &str = "sensor_msgs/msg/CompressedImage";

/// compressed_depth_image_transport prepends this many bytes of config before the PNG.
pub const COMPRESSED_DEPTH_HEADER_LEN: usize = 12;

/// Frames buffered per worker between the bag reader and the writers.
pub const QUEUE_DEPTH_PER_WORKER: usize = 4;
/// Records held in memory at once by `BaseExtractor::loop_parallel`.
pub const PARALLEL_BATCH_SIZE: usize = 256;
