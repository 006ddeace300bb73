use anyhow::{bail, Context, Result};
use opencv::{core, imgproc};

use crate::shared::constants::COMPRESSED_DEPTH_HEADER_LEN;

/// What has to happen to a raw buffer before it can be handed to the PNG writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    None,
    /// OpenCV colour conversion code into BGR/BGRA order.
    Color(i32),
    /// 32-bit float metres to 16-bit millimetres.
    DepthToMillimeters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingInfo {
    pub channels: usize,
    pub bytes_per_channel: usize,
    pub mat_type: i32,
    pub conversion: Conversion,
}

impl EncodingInfo {
    pub fn bytes_per_pixel(&self) -> usize {
        self.channels * self.bytes_per_channel
    }
}

pub fn encoding_info(encoding: &str) -> Result<EncodingInfo> {
    let info = |channels, bytes_per_channel, mat_type, conversion| EncodingInfo {
        channels,
        bytes_per_channel,
        mat_type,
        conversion,
    };

    Ok(match encoding {
        "mono8" | "8UC1" => info(1, 1, core::CV_8UC1, Conversion::None),
        "mono16" | "16UC1" => info(1, 2, core::CV_16UC1, Conversion::None),
        "bgr8" | "8UC3" => info(3, 1, core::CV_8UC3, Conversion::None),
        "rgb8" => info(3, 1, core::CV_8UC3, Conversion::Color(imgproc::COLOR_RGB2BGR)),
        "bgra8" | "8UC4" => info(4, 1, core::CV_8UC4, Conversion::None),
        "rgba8" => info(4, 1, core::CV_8UC4, Conversion::Color(imgproc::COLOR_RGBA2BGRA)),
        "bgr16" | "16UC3" => info(3, 2, core::CV_16UC3, Conversion::None),
        "rgb16" => info(3, 2, core::CV_16UC3, Conversion::Color(imgproc::COLOR_RGB2BGR)),
        "32FC1" => info(1, 4, core::CV_32FC1, Conversion::DepthToMillimeters),
        // ROS names the pattern by its first row, OpenCV by the second
        "bayer_rggb8" => info(1, 1, core::CV_8UC1, Conversion::Color(imgproc::COLOR_BayerBG2BGR)),
        "bayer_bggr8" => info(1, 1, core::CV_8UC1, Conversion::Color(imgproc::COLOR_BayerRG2BGR)),
        "bayer_gbrg8" => info(1, 1, core::CV_8UC1, Conversion::Color(imgproc::COLOR_BayerGR2BGR)),
        "bayer_grbg8" => info(1, 1, core::CV_8UC1, Conversion::Color(imgproc::COLOR_BayerGB2BGR)),
        "yuv422" | "uyvy" => info(2, 1, core::CV_8UC2, Conversion::Color(imgproc::COLOR_YUV2BGR_UYVY)),
        "yuv422_yuy2" | "yuyv" => {
            info(2, 1, core::CV_8UC2, Conversion::Color(imgproc::COLOR_YUV2BGR_YUYV))
        }
        other => bail!("unsupported image encoding '{}'", other),
    })
}

/// Copies `height` rows of `width * bytes_per_pixel` bytes out of a buffer with `step`-byte rows.
pub fn compact_rows(
    data: &[u8],
    width: usize,
    height: usize,
    step: usize,
    bytes_per_pixel: usize,
) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        bail!("empty image ({}x{})", width, height);
    }
    let row_len = width * bytes_per_pixel;
    if step < row_len {
        bail!("step {} is shorter than a row of {} bytes", step, row_len);
    }
    let needed = step * (height - 1) + row_len;
    if data.len() < needed {
        bail!("image data has {} bytes, expected at least {}", data.len(), needed);
    }

    if step == row_len {
        return Ok(data[..row_len * height].to_vec());
    }

    let mut out = Vec::with_capacity(row_len * height);
    for row in data.chunks(step).take(height) {
        out.extend_from_slice(&row[..row_len]);
    }
    Ok(out)
}

pub fn needs_byte_swap(is_bigendian: bool) -> bool {
    is_bigendian != cfg!(target_endian = "big")
}

pub fn swap_bytes(data: &mut [u8], bytes_per_channel: usize) {
    if bytes_per_channel < 2 {
        return;
    }
    for chunk in data.chunks_exact_mut(bytes_per_channel) {
        chunk.reverse();
    }
}

fn meters_to_millimeters(meters: f32) -> u16 {
    if !meters.is_finite() || meters <= 0.0 {
        return 0;
    }
    (meters * 1000.0).round().min(u16::MAX as f32) as u16
}

/// Native-endian f32 metres to native-endian u16 millimetres.
pub fn depth_to_millimeters(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .flat_map(|m| meters_to_millimeters(m).to_ne_bytes())
        .collect()
}

/// Configuration prepended by compressed_depth_image_transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressedDepthConfig {
    pub format: u32,
    pub depth_quant_a: f32,
    pub depth_quant_b: f32,
}

pub fn split_compressed_depth(data: &[u8]) -> Result<(CompressedDepthConfig, &[u8])> {
    let header = data
        .get(..COMPRESSED_DEPTH_HEADER_LEN)
        .context("compressed depth payload shorter than its header")?;
    let word = |i: usize| [header[i], header[i + 1], header[i + 2], header[i + 3]];
    let config = CompressedDepthConfig {
        format: u32::from_le_bytes(word(0)),
        depth_quant_a: f32::from_le_bytes(word(4)),
        depth_quant_b: f32::from_le_bytes(word(8)),
    };
    Ok((config, &data[COMPRESSED_DEPTH_HEADER_LEN..]))
}

/// Quantized inverse depth back to millimetres; 0 marks a missing reading.
pub fn inverse_depth_to_millimeters(values: &[u16], config: &CompressedDepthConfig) -> Vec<u8> {
    values
        .iter()
        .flat_map(|&v| {
            let mm = if v == 0 {
                0
            } else {
                meters_to_millimeters(config.depth_quant_a / (v as f32 - config.depth_quant_b))
            };
            mm.to_ne_bytes()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_table() {
        let rgb = encoding_info("rgb8").unwrap();
        assert_eq!(rgb.bytes_per_pixel(), 3);
        assert_eq!(rgb.conversion, Conversion::Color(imgproc::COLOR_RGB2BGR));

        let depth = encoding_info("16UC1").unwrap();
        assert_eq!(depth.bytes_per_pixel(), 2);
        assert_eq!(depth.conversion, Conversion::None);

        assert_eq!(
            encoding_info("32FC1").unwrap().conversion,
            Conversion::DepthToMillimeters
        );
        assert!(encoding_info("64FC4").is_err());
    }

    #[test]
    fn test_compact_rows_drops_padding() {
        // 2x2 mono8 with one padding byte per row
        let data = [1, 2, 0xee, 3, 4, 0xee];
        assert_eq!(compact_rows(&data, 2, 2, 3, 1).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_compact_rows_accepts_missing_trailing_padding() {
        let data = [1, 2, 0xee, 3, 4];
        assert_eq!(compact_rows(&data, 2, 2, 3, 1).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_compact_rows_validates_geometry() {
        assert!(compact_rows(&[1, 2, 3], 2, 2, 2, 1).is_err());
        assert!(compact_rows(&[1, 2, 3, 4], 2, 2, 1, 1).is_err());
        assert!(compact_rows(&[], 0, 2, 0, 1).is_err());
    }

    #[test]
    fn test_swap_bytes() {
        let mut data = [0x01, 0x02, 0x03, 0x04];
        swap_bytes(&mut data, 2);
        assert_eq!(data, [0x02, 0x01, 0x04, 0x03]);

        let mut mono = [1, 2];
        swap_bytes(&mut mono, 1);
        assert_eq!(mono, [1, 2]);
    }

    #[test]
    fn test_depth_to_millimeters() {
        let data: Vec<u8> = [1.2345f32, f32::NAN, -1.0, 100.0]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let out = depth_to_millimeters(&data);
        let mm: Vec<u16> = out
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(mm, vec![1235, 0, 0, u16::MAX]);
    }

    #[test]
    fn test_compressed_depth_roundtrip_of_quantization() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&100.0f32.to_le_bytes());
        payload.extend_from_slice(&(-10.0f32).to_le_bytes());
        payload.extend_from_slice(&[0x89, b'P', b'N', b'G']);

        let (config, png) = split_compressed_depth(&payload).unwrap();
        assert_eq!(config.depth_quant_a, 100.0);
        assert_eq!(config.depth_quant_b, -10.0);
        assert_eq!(png, &[0x89, b'P', b'N', b'G']);

        // v = A / d - B  =>  d = 2m gives v = 60
        let out = inverse_depth_to_millimeters(&[60, 0], &config);
        assert_eq!(out, [2000u16.to_ne_bytes(), 0u16.to_ne_bytes()].concat());

        assert!(split_compressed_depth(&payload[..8]).is_err());
    }
}
