use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::ReadMemory;

/// Bytes read per step while scanning a module image
const SCAN_CHUNK_SIZE: usize = 0x10_0000;

/// Byte pattern locating a function in the target's code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Hex bytes separated by spaces, `??` for wildcards
    pub pattern: String,
    /// Added to the match address to reach the function start
    #[serde(default)]
    pub offset: i64,
}

impl FunctionSignature {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            offset: 0,
        }
    }

    pub fn pattern_bytes(&self) -> Result<Vec<Option<u8>>> {
        parse_pattern(&self.pattern)
    }
}

/// A RIP-relative operand inside a located function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RipReference {
    /// Offset of the 32-bit displacement from the function start
    pub disp_offset: u64,
    /// Offset of the next instruction from the function start
    pub instr_end: u64,
}

impl RipReference {
    /// Absolute address the operand refers to
    pub fn resolve<R: ReadMemory + ?Sized>(&self, reader: &R, function: u64) -> Result<u64> {
        let disp = reader.read_u32(function + self.disp_offset)? as i32;
        Ok((function + self.instr_end).wrapping_add_signed(i64::from(disp)))
    }
}

pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        let value = u8::from_str_radix(token, 16).map_err(|e| {
            Error::InvalidSignature(format!("Invalid signature token '{}': {}", token, e))
        })?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(Error::InvalidSignature(
            "Signature pattern is empty".to_string(),
        ));
    }
    if bytes.iter().all(Option::is_none) {
        return Err(Error::InvalidSignature(
            "Signature pattern has no fixed bytes".to_string(),
        ));
    }

    Ok(bytes)
}

/// First position in `buffer` matching `pattern`.
///
/// Candidates are located with `memchr` on the first fixed byte and then
/// verified byte by byte.
pub fn find_pattern(buffer: &[u8], pattern: &[Option<u8>]) -> Option<usize> {
    let (anchor_index, anchor) = pattern
        .iter()
        .enumerate()
        .find_map(|(i, b)| b.map(|value| (i, value)))?;
    if buffer.len() < pattern.len() {
        return None;
    }
    let last = buffer.len() - pattern.len();

    memchr::memchr_iter(anchor, buffer)
        .filter_map(|pos| pos.checked_sub(anchor_index))
        .take_while(|&start| start <= last)
        .find(|&start| {
            pattern.iter().enumerate().all(|(j, byte)| match byte {
                Some(value) => buffer[start + j] == *value,
                None => true,
            })
        })
}

/// Scan `size` bytes of the image at `base` for `pattern`.
///
/// Returns the absolute address of the first match.
pub fn scan_image<R: ReadMemory + ?Sized>(
    reader: &R,
    base: u64,
    size: usize,
    pattern: &[Option<u8>],
) -> Result<Option<u64>> {
    let mut offset = 0usize;
    let mut tail: Vec<u8> = Vec::new();

    while offset < size {
        let read_size = (size - offset).min(SCAN_CHUNK_SIZE);
        let addr = base + offset as u64;

        let chunk = match reader.read_bytes(addr, read_size) {
            Ok(bytes) => bytes,
            Err(e) if offset == 0 => return Err(e),
            Err(e) => {
                debug!("Image scan stopped at offset {:#x}: {}", offset, e);
                break;
            }
        };

        let mut data = Vec::with_capacity(tail.len() + chunk.len());
        data.extend_from_slice(&tail);
        data.extend_from_slice(&chunk);
        let data_base = addr - tail.len() as u64;

        if let Some(pos) = find_pattern(&data, pattern) {
            return Ok(Some(data_base + pos as u64));
        }

        let keep = pattern.len().saturating_sub(1).min(data.len());
        tail = data[data.len() - keep..].to_vec();
        offset += read_size;
    }

    Ok(None)
}
