use anyhow::{anyhow, bail, Context, Result};
use opencv::{core, imgcodecs, imgproc, prelude::*};
use std::path::Path;

use super::cdr;
use super::messages::{CompressedImage, Header, Image, MessageKind};
use super::pixels::{self, Conversion};
use crate::utils::time_utils;

/// A deserialized image-bearing message.
#[derive(Debug, Clone)]
pub enum ImageMessage {
    Raw(Image),
    Compressed(CompressedImage),
}

impl ImageMessage {
    pub fn from_cdr(raw: &[u8], msgtype: &str) -> Result<Self> {
        match MessageKind::from_msgtype(msgtype) {
            MessageKind::Image => Ok(Self::Raw(cdr::deserialize(raw)?)),
            MessageKind::CompressedImage => Ok(Self::Compressed(cdr::deserialize(raw)?)),
            MessageKind::Other => bail!("'{}' is not an image message type", msgtype),
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Self::Raw(msg) => &msg.header,
            Self::Compressed(msg) => &msg.header,
        }
    }

    pub fn header_stamp_ns(&self) -> u64 {
        let stamp = &self.header().stamp;
        time_utils::stamp_to_ns(stamp.sec, stamp.nanosec)
    }

    /// Pixels ready for `write_png`.
    pub fn to_mat(&self) -> Result<Mat> {
        match self {
            Self::Raw(msg) => raw_to_mat(msg),
            Self::Compressed(msg) => compressed_to_mat(msg),
        }
    }
}

pub fn decode(raw: &[u8], msgtype: &str) -> Result<Mat> {
    ImageMessage::from_cdr(raw, msgtype)?.to_mat()
}

fn raw_to_mat(msg: &Image) -> Result<Mat> {
    let info = pixels::encoding_info(&msg.encoding)?;
    let width = msg.width as usize;
    let height = msg.height as usize;

    let mut data = pixels::compact_rows(
        &msg.data,
        width,
        height,
        msg.step as usize,
        info.bytes_per_pixel(),
    )
    .with_context(|| format!("invalid {} image", msg.encoding))?;

    if pixels::needs_byte_swap(msg.is_bigendian != 0) {
        pixels::swap_bytes(&mut data, info.bytes_per_channel);
    }

    match info.conversion {
        Conversion::None => mat_from_bytes(height, width, info.mat_type, &data),
        Conversion::DepthToMillimeters => {
            let mm = pixels::depth_to_millimeters(&data);
            mat_from_bytes(height, width, core::CV_16UC1, &mm)
        }
        Conversion::Color(code) => {
            let mat = mat_from_bytes(height, width, info.mat_type, &data)?;
            let mut converted = Mat::default();
            imgproc::cvt_color_def(&mat, &mut converted, code)?;
            Ok(converted)
        }
    }
}

fn compressed_to_mat(msg: &CompressedImage) -> Result<Mat> {
    if !msg.format.contains("compressedDepth") {
        return imdecode(&msg.data).with_context(|| format!("failed to decode '{}' image", msg.format));
    }

    let (config, png) = pixels::split_compressed_depth(&msg.data)?;
    let decoded = imdecode(png).context("failed to decode compressed depth image")?;

    let depth_encoding = msg.format.split(';').next().unwrap_or_default().trim();
    if depth_encoding != "32FC1" {
        return Ok(decoded);
    }

    if decoded.typ() != core::CV_16UC1 {
        bail!("compressed 32FC1 depth must hold a 16-bit single channel PNG");
    }
    let mm = pixels::inverse_depth_to_millimeters(decoded.data_typed::<u16>()?, &config);
    mat_from_bytes(decoded.rows() as usize, decoded.cols() as usize, core::CV_16UC1, &mm)
}

fn imdecode(data: &[u8]) -> Result<Mat> {
    let buffer = core::Vector::<u8>::from_slice(data);
    let mat = imgcodecs::imdecode(&buffer, imgcodecs::IMREAD_UNCHANGED)?;
    if mat.empty() {
        bail!("image codec could not decode {} bytes", data.len());
    }
    Ok(mat)
}

fn mat_from_bytes(rows: usize, cols: usize, typ: i32, data: &[u8]) -> Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(rows as i32, cols as i32, typ, core::Scalar::all(0.0))?;
    let dst = mat.data_bytes_mut()?;
    if dst.len() != data.len() {
        bail!("pixel buffer has {} bytes, matrix needs {}", data.len(), dst.len());
    }
    dst.copy_from_slice(data);
    Ok(mat)
}

pub fn write_png(path: &Path, mat: &Mat) -> Result<()> {
    let file_name = path
        .to_str()
        .ok_or_else(|| anyhow!("output path is not valid UTF-8: {:?}", path))?;
    if !imgcodecs::imwrite(file_name, mat, &core::Vector::<i32>::new())? {
        bail!("image writer refused {}", file_name);
    }
    Ok(())
}

/// One-line description of a record for `messages`.
pub fn summarize(raw: &[u8], msgtype: &str) -> Result<String> {
    Ok(match MessageKind::from_msgtype(msgtype) {
        MessageKind::Other => format!("{} ({} bytes)", msgtype, raw.len()),
        _ => match ImageMessage::from_cdr(raw, msgtype)? {
            ImageMessage::Raw(msg) => format!(
                "Image {}x{} encoding={} step={} frame_id={} stamp={}",
                msg.width,
                msg.height,
                msg.encoding,
                msg.step,
                msg.header.frame_id,
                time_utils::stamp_to_ns(msg.header.stamp.sec, msg.header.stamp.nanosec)
            ),
            ImageMessage::Compressed(msg) => format!(
                "CompressedImage format={} bytes={} frame_id={} stamp={}",
                msg.format,
                msg.data.len(),
                msg.header.frame_id,
                time_utils::stamp_to_ns(msg.header.stamp.sec, msg.header.stamp.nanosec)
            ),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::messages::Time;

    fn raw_image(encoding: &str, width: u32, height: u32, step: u32, data: Vec<u8>) -> Vec<u8> {
        cdr::serialize(&image(encoding, width, height, step, data)).unwrap()
    }

    fn image(encoding: &str, width: u32, height: u32, step: u32, data: Vec<u8>) -> Image {
        Image {
            header: Header {
                stamp: Time { sec: 5, nanosec: 6 },
                frame_id: "cam".to_string(),
            },
            height,
            width,
            encoding: encoding.to_string(),
            is_bigendian: 0,
            step,
            data,
        }
    }

    fn png(mat: &Mat) -> Vec<u8> {
        let mut buf = core::Vector::<u8>::new();
        imgcodecs::imencode(".png", mat, &mut buf, &core::Vector::<i32>::new()).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_rgb8_becomes_bgr() {
        let payload = raw_image("rgb8", 1, 1, 3, vec![10, 20, 30]);
        let mat = decode(&payload, "sensor_msgs/msg/Image").unwrap();
        assert_eq!(mat.typ(), core::CV_8UC3);
        assert_eq!(mat.data_bytes().unwrap(), &[30, 20, 10]);
    }

    #[test]
    fn test_mono16_with_padding() {
        let mut data = Vec::new();
        data.extend_from_slice(&500u16.to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&700u16.to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        let payload = raw_image("16UC1", 1, 2, 4, data);

        let mat = decode(&payload, "sensor_msgs/msg/Image").unwrap();
        assert_eq!((mat.rows(), mat.cols()), (2, 1));
        assert_eq!(mat.data_typed::<u16>().unwrap(), &[500, 700]);
    }

    #[test]
    fn test_float_depth_written_as_millimeters() {
        let data: Vec<u8> = [0.5f32, f32::NAN].iter().flat_map(|v| v.to_le_bytes()).collect();
        let payload = raw_image("32FC1", 2, 1, 8, data);
        let mat = decode(&payload, "sensor_msgs/msg/Image").unwrap();
        assert_eq!(mat.typ(), core::CV_16UC1);
        assert_eq!(mat.data_typed::<u16>().unwrap(), &[500, 0]);
    }

    #[test]
    fn test_big_endian_samples_are_swapped() {
        let mut msg = image("mono16", 2, 1, 4, vec![0x01, 0xF4, 0x02, 0xBC]);
        msg.is_bigendian = 1;
        let payload = cdr::serialize(&msg).unwrap();

        let mat = decode(&payload, "sensor_msgs/msg/Image").unwrap();
        assert_eq!(mat.typ(), core::CV_16UC1);
        assert_eq!(mat.data_typed::<u16>().unwrap(), &[500, 700]);
    }

    #[test]
    fn test_bayer_is_demosaiced_to_bgr() {
        let payload = raw_image("bayer_rggb8", 4, 4, 4, vec![100; 16]);
        let mat = decode(&payload, "sensor_msgs/msg/Image").unwrap();
        assert_eq!((mat.rows(), mat.cols(), mat.typ()), (4, 4, core::CV_8UC3));
        assert!(mat.data_bytes().unwrap().iter().all(|&v| v == 100));
    }

    #[test]
    fn test_uyvy_is_converted_to_bgr() {
        // two grey pixels: U, Y0, V, Y1
        let payload = raw_image("yuv422", 2, 1, 4, vec![128, 90, 128, 90]);
        let mat = decode(&payload, "sensor_msgs/msg/Image").unwrap();
        assert_eq!((mat.rows(), mat.cols(), mat.typ()), (1, 2, core::CV_8UC3));
        for pixel in mat.data_bytes().unwrap().chunks(3) {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }

    fn compressed_depth(format: &str, quant_a: f32, quant_b: f32, depth_png: Vec<u8>) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&quant_a.to_le_bytes());
        data.extend_from_slice(&quant_b.to_le_bytes());
        data.extend_from_slice(&depth_png);
        let msg = CompressedImage {
            header: Header::default(),
            format: format.to_string(),
            data,
        };
        cdr::serialize(&msg).unwrap()
    }

    #[test]
    fn test_compressed_float_depth_is_inverted_to_millimeters() {
        let inverse = mat_from_bytes(1, 3, core::CV_16UC1, &[4, 0, 1, 0, 0, 0]).unwrap();
        let payload = compressed_depth("32FC1; compressedDepth png", 2.0, 0.0, png(&inverse));

        let mat = decode(&payload, "sensor_msgs/msg/CompressedImage").unwrap();
        assert_eq!(mat.typ(), core::CV_16UC1);
        assert_eq!(mat.data_typed::<u16>().unwrap(), &[500, 2000, 0]);
    }

    #[test]
    fn test_compressed_integer_depth_keeps_png_values() {
        let depth = mat_from_bytes(1, 2, core::CV_16UC1, &[0xE8, 0x03, 0x10, 0x27]).unwrap();
        let payload = compressed_depth("16UC1; compressedDepth", 0.0, 0.0, png(&depth));

        let mat = decode(&payload, "sensor_msgs/msg/CompressedImage").unwrap();
        assert_eq!(mat.data_typed::<u16>().unwrap(), &[1000, 10000]);
    }

    #[test]
    fn test_compressed_png_roundtrip() {
        let source = mat_from_bytes(2, 2, core::CV_8UC1, &[0, 64, 128, 255]).unwrap();
        let msg = CompressedImage {
            header: Header::default(),
            format: "png".to_string(),
            data: png(&source),
        };
        let payload = cdr::serialize(&msg).unwrap();
        let mat = decode(&payload, "sensor_msgs/msg/CompressedImage").unwrap();
        assert_eq!(mat.data_bytes().unwrap(), &[0, 64, 128, 255]);
    }

    #[test]
    fn test_garbage_compressed_payload_fails() {
        let msg = CompressedImage {
            header: Header::default(),
            format: "jpeg".to_string(),
            data: vec![1, 2, 3],
        };
        let payload = cdr::serialize(&msg).unwrap();
        assert!(decode(&payload, "sensor_msgs/msg/CompressedImage").is_err());
    }

    #[test]
    fn test_summarize() {
        let payload = raw_image("mono8", 1, 1, 1, vec![9]);
        let line = summarize(&payload, "sensor_msgs/msg/Image").unwrap();
        assert_eq!(line, "Image 1x1 encoding=mono8 step=1 frame_id=cam stamp=5000000006");

        let other = summarize(&[0, 1, 0, 0, 1, 2], "sensor_msgs/msg/Imu").unwrap();
        assert_eq!(other, "sensor_msgs/msg/Imu (6 bytes)");
    }

    #[test]
    fn test_header_stamp() {
        let payload = raw_image("mono8", 1, 1, 1, vec![9]);
        let msg = ImageMessage::from_cdr(&payload, "sensor_msgs/msg/Image").unwrap();
        assert_eq!(msg.header_stamp_ns(), 5_000_000_006);
        assert!(ImageMessage::from_cdr(&payload, "std_msgs/msg/String").is_err());
    }

    #[test]
    fn test_write_png() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.png");
        let mat = mat_from_bytes(1, 2, core::CV_16UC1, &[1, 0, 2, 0]).unwrap();
        write_png(&path, &mat).unwrap();

        let back = imgcodecs::imread(path.to_str().unwrap(), imgcodecs::IMREAD_UNCHANGED).unwrap();
        assert_eq!(back.typ(), core::CV_16UC1);
        assert_eq!(back.cols(), 2);
    }
}
