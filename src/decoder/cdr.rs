//! CDR payloads as recorded by rosbag2: a 4-byte encapsulation header followed by the body.

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, LittleEndian};
use cdr_encoding::from_bytes;
use serde::de::DeserializeOwned;

use crate::shared::constants::CDR_HEADER_LEN;

pub fn deserialize<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    if payload.len() < CDR_HEADER_LEN {
        bail!("CDR payload too short: {} bytes", payload.len());
    }

    let body = &payload[CDR_HEADER_LEN..];
    let decoded = match (payload[0], payload[1]) {
        // CDR_BE, PL_CDR_BE
        (0x00, 0x00) | (0x00, 0x02) => from_bytes::<T, BigEndian>(body),
        // CDR_LE, PL_CDR_LE
        (0x00, 0x01) | (0x00, 0x03) => from_bytes::<T, LittleEndian>(body),
        (hi, lo) => bail!("unsupported CDR representation 0x{:02x}{:02x}", hi, lo),
    };

    let (value, _consumed_byte_count) = decoded.context("CDR deserialization failed")?;
    Ok(value)
}

#[cfg(test)]
pub fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut payload = vec![0x00, 0x01, 0x00, 0x00];
    payload.extend(cdr_encoding::to_vec::<T, LittleEndian>(value)?);
    Ok(payload)
}
