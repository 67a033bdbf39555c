//! Text encoding for receipt printers
//!
//! Printers interpret text bytes in their active code page. This module
//! provides:
//! - Width calculation/truncation/padding in printer columns (GBK widths)
//! - Conversion of mixed UTF-8 + ESC/POS streams into the printer code page

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::instrument;

/// Code page the printer expects for text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// Send UTF-8 untouched (modern firmware)
    Utf8,
    /// GBK with Chinese mode enabled (most CJK thermal printers)
    #[default]
    Gbk,
    /// Windows-1252 (Western printers, PC1252 code page)
    Latin1,
}

impl TextEncoding {
    /// Convert a stream built from UTF-8 text and ESC/POS commands
    ///
    /// ASCII bytes (0x00-0x7F) are copied as is so commands stay intact.
    pub fn encode_stream(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::Utf8 => bytes.to_vec(),
            Self::Gbk => convert_to_gbk(bytes),
            Self::Latin1 => convert_to_latin1(bytes),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8 => write!(f, "utf8"),
            Self::Gbk => write!(f, "gbk"),
            Self::Latin1 => write!(f, "latin1"),
        }
    }
}

impl std::str::FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "gbk" | "gb2312" => Ok(Self::Gbk),
            "latin1" | "cp1252" | "windows-1252" => Ok(Self::Latin1),
            other => Err(format!("Unknown text encoding: {}", other)),
        }
    }
}

/// Get the printed column width of a string
///
/// Full-width characters take 2 columns, ASCII takes 1. GBK byte length
/// matches this for the characters receipt printers can render.
pub fn gbk_width(s: &str) -> usize {
    let (cow, _, _) = encoding_rs::GBK.encode(s);
    cow.len()
}

/// Truncate a string to fit within a column width
pub fn truncate_gbk(s: &str, max_width: usize) -> String {
    let mut width = 0;
    let mut result = String::new();
    let mut tmp = [0u8; 4];
    for c in s.chars() {
        let (cow, _, _) = encoding_rs::GBK.encode(c.encode_utf8(&mut tmp));
        let char_len = cow.len();

        if width + char_len > max_width {
            break;
        }
        result.push(c);
        width += char_len;
    }
    result
}

/// Pad a string to a column width, truncating when longer
pub fn pad_gbk(s: &str, width: usize, align_right: bool) -> String {
    let current_width = gbk_width(s);
    if current_width >= width {
        return truncate_gbk(s, width);
    }
    let spaces = width - current_width;
    if align_right {
        format!("{}{}", " ".repeat(spaces), s)
    } else {
        format!("{}{}", s, " ".repeat(spaces))
    }
}

/// Convert mixed UTF-8 content (with ESC/POS commands) to GBK
///
/// Also handles:
/// - Re-enabling Chinese mode after INIT command (ESC @)
/// - Euro symbol (€), which GBK lacks, via a PC858 detour
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn convert_to_gbk(bytes: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(bytes.len() * 2);

    // FS & + FS C 1: Chinese mode, GBK code page
    result.extend_from_slice(&[0x1C, 0x26, 0x1C, 0x43, 0x01]);

    transcode(bytes, &mut result, |pending, out| {
        let s = String::from_utf8_lossy(pending);
        let parts: Vec<&str> = s.split('€').collect();

        for (idx, part) in parts.iter().enumerate() {
            if !part.is_empty() {
                let (gbk, _, _) = encoding_rs::GBK.encode(part);
                out.extend_from_slice(&gbk);
            }
            if idx < parts.len() - 1 {
                // Exit Chinese -> PC858 -> Euro -> Enter Chinese
                out.extend_from_slice(&[0x1C, 0x2E, 0x1B, 0x74, 19, 0xD5, 0x1C, 0x26]);
            }
        }
    }, Some(&[0x1C, 0x26]));

    // FS . - exit Chinese mode
    result.extend_from_slice(&[0x1C, 0x2E]);

    result
}

/// Convert mixed UTF-8 content (with ESC/POS commands) to Windows-1252
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn convert_to_latin1(bytes: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(bytes.len());

    // ESC t 16 - WPC1252
    result.extend_from_slice(&[0x1B, 0x74, 16]);

    transcode(bytes, &mut result, |pending, out| {
        let s = String::from_utf8_lossy(pending);
        let (latin, _, _) = encoding_rs::WINDOWS_1252.encode(&s);
        out.extend_from_slice(&latin);
    }, Some(&[0x1B, 0x74, 16]));

    result
}

/// Walk a stream, passing ASCII through and handing each run of
/// non-ASCII bytes to `flush`. `after_init` is re-emitted after every ESC @.
fn transcode(
    bytes: &[u8],
    result: &mut Vec<u8>,
    flush: impl Fn(&[u8], &mut Vec<u8>),
    after_init: Option<&[u8]>,
) {
    let mut pending = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        // ESC @ resets the code page
        if b == 0x1B && i + 1 < bytes.len() && bytes[i + 1] == 0x40 {
            drain(&mut pending, result, &flush);
            result.extend_from_slice(&[0x1B, 0x40]);
            if let Some(seq) = after_init {
                result.extend_from_slice(seq);
            }
            i += 2;
            continue;
        }

        if b < 128 {
            drain(&mut pending, result, &flush);
            result.push(b);
        } else {
            pending.push(b);
        }
        i += 1;
    }

    drain(&mut pending, result, &flush);
}

fn drain(pending: &mut Vec<u8>, result: &mut Vec<u8>, flush: &impl Fn(&[u8], &mut Vec<u8>)) {
    if pending.is_empty() {
        return;
    }
    flush(pending, result);
    pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gbk_width() {
        assert_eq!(gbk_width("hello"), 5);
        assert_eq!(gbk_width("你好"), 4);
        assert_eq!(gbk_width("AB中文CD"), 8);
    }

    #[test]
    fn test_truncate_gbk() {
        assert_eq!(truncate_gbk("hello world", 5), "hello");
        assert_eq!(truncate_gbk("你好世界", 4), "你好");
        assert_eq!(truncate_gbk("AB中文", 4), "AB中");
    }

    #[test]
    fn test_pad_gbk() {
        assert_eq!(pad_gbk("hi", 5, false), "hi   ");
        assert_eq!(pad_gbk("hi", 5, true), "   hi");
        assert_eq!(pad_gbk("hello world", 5, false), "hello");
    }

    #[test]
    fn test_gbk_keeps_commands_and_reenables_after_init() {
        let input = [&[0x1B, 0x40][..], "中".as_bytes(), &[0x1D, 0x56, 0x00]].concat();
        let out = convert_to_gbk(&input);

        assert_eq!(&out[..5], &[0x1C, 0x26, 0x1C, 0x43, 0x01]);
        assert_eq!(&out[5..9], &[0x1B, 0x40, 0x1C, 0x26]);
        // 中 in GBK
        assert_eq!(&out[9..11], &[0xD6, 0xD0]);
        assert_eq!(&out[11..14], &[0x1D, 0x56, 0x00]);
        assert_eq!(&out[14..], &[0x1C, 0x2E]);
    }

    #[test]
    fn test_latin1_conversion() {
        let out = convert_to_latin1("Café €".as_bytes());
        assert_eq!(&out[..3], &[0x1B, 0x74, 16]);
        assert_eq!(&out[3..], &[b'C', b'a', b'f', 0xE9, b' ', 0x80]);
    }

    #[test]
    fn test_utf8_passthrough() {
        let input = "Grüße".as_bytes();
        assert_eq!(TextEncoding::Utf8.encode_stream(input), input);
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("GBK".parse::<TextEncoding>().unwrap(), TextEncoding::Gbk);
        assert_eq!("cp1252".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert!("ebcdic".parse::<TextEncoding>().is_err());
    }
}
