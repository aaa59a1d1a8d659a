//! Charset registry and codecs.
//!
//! Covers the charsets native clipboard formats actually use: the Unicode
//! family, US-ASCII, ISO-8859-1 and the two Windows codepages synthesized for
//! `CF_TEXT` / `CF_OEMTEXT`. Names outside this set are "unsupported": they
//! rank in their own bucket and fail when used for encoding or decoding.
//!
//! Encoding replaces unmappable characters with `?`; decoding replaces
//! malformed input with U+FFFD.

use std::io::{self, Read};

use crate::error::{DataTransferError, Result};

/// Charset used when neither the format nor the flavor names one.
pub const DEFAULT_CHARSET: &str = "UTF-8";

const REPLACEMENT_BYTE: u8 = b'?';

/// A supported charset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    /// UTF-8
    Utf8,
    /// UTF-16 with byte order mark (big endian when unmarked)
    Utf16,
    /// UTF-16 little endian, no byte order mark
    Utf16Le,
    /// UTF-16 big endian, no byte order mark
    Utf16Be,
    /// 7-bit ASCII
    UsAscii,
    /// Latin-1
    Iso8859_1,
    /// Windows Western European codepage (CF_TEXT)
    Windows1252,
    /// DOS codepage (CF_OEMTEXT)
    Ibm437,
}

impl Charset {
    /// Look up a charset by name or alias, case-insensitively
    pub fn for_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let charset = match lower.as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => Self::Utf8,
            "utf-16" | "utf16" | "utf_16" | "unicode" | "unicodebig" => Self::Utf16,
            "utf-16le" | "utf_16le" | "x-utf-16le" | "unicodelittleunmarked" => Self::Utf16Le,
            "utf-16be" | "utf_16be" | "x-utf-16be" | "unicodebigunmarked" => Self::Utf16Be,
            "us-ascii" | "ascii" | "us" | "iso646-us" | "ansi_x3.4-1968" | "646" | "cp367" => {
                Self::UsAscii
            }
            "iso-8859-1" | "iso8859-1" | "iso8859_1" | "iso_8859-1" | "8859_1" | "latin1" | "l1"
            | "cp819" => Self::Iso8859_1,
            "windows-1252" | "cp1252" => Self::Windows1252,
            "ibm437" | "ibm-437" | "cp437" | "437" => Self::Ibm437,
            _ => return None,
        };
        Some(charset)
    }

    /// Look up a charset, failing for unsupported names
    pub fn lookup(name: &str) -> Result<Self> {
        Self::for_name(name).ok_or_else(|| DataTransferError::EncodingUnsupported(name.to_string()))
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16 => "UTF-16",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
            Self::UsAscii => "US-ASCII",
            Self::Iso8859_1 => "ISO-8859-1",
            Self::Windows1252 => "windows-1252",
            Self::Ibm437 => "IBM437",
        }
    }

    /// Upper bound of bytes produced for one character
    pub fn max_bytes_per_char(self) -> usize {
        match self {
            Self::Utf8 => 4,
            // BOM plus a surrogate pair
            Self::Utf16 => 6,
            Self::Utf16Le | Self::Utf16Be => 4,
            Self::UsAscii | Self::Iso8859_1 | Self::Windows1252 | Self::Ibm437 => 1,
        }
    }

    /// Encode a whole string
    pub fn encode(self, text: &str) -> Vec<u8> {
        let mut encoder = self.encoder();
        let mut out = Vec::with_capacity(text.len() * self.max_bytes_per_char().min(2));
        for c in text.chars() {
            encoder.encode_char(c, &mut out);
        }
        out
    }

    /// Decode a whole buffer
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Utf16 => {
                let (big_endian, body) = match bytes {
                    [0xFE, 0xFF, rest @ ..] => (true, rest),
                    [0xFF, 0xFE, rest @ ..] => (false, rest),
                    _ => (true, bytes),
                };
                decode_utf16_bytes(body, big_endian)
            }
            Self::Utf16Le => decode_utf16_bytes(bytes, false),
            Self::Utf16Be => decode_utf16_bytes(bytes, true),
            Self::UsAscii => bytes
                .iter()
                .map(|&b| if b < 0x80 { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect(),
            Self::Iso8859_1 => bytes.iter().map(|&b| b as char).collect(),
            Self::Windows1252 => bytes.iter().map(|&b| windows1252_to_char(b)).collect(),
            Self::Ibm437 => bytes.iter().map(|&b| cp437_to_char(b)).collect(),
        }
    }

    /// Incremental encoder
    pub fn encoder(self) -> CharEncoder {
        CharEncoder {
            charset: self,
            wrote_bom: false,
        }
    }

    /// Incremental decoder
    pub fn decoder(self) -> CharDecoder {
        CharDecoder {
            charset: self,
            big_endian: !matches!(self, Self::Utf16Le),
            bom_checked: !matches!(self, Self::Utf16),
            pending_unit: None,
        }
    }
}

impl std::fmt::Display for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical name for `name` if supported, otherwise `name` unchanged
pub fn canonical_name(name: &str) -> String {
    match Charset::for_name(name) {
        Some(charset) => charset.name().to_string(),
        None => name.to_string(),
    }
}

/// Whether `name` denotes a supported charset
pub fn is_encoding_supported(name: &str) -> bool {
    Charset::for_name(name).is_some()
}

/// Encode `text` using the charset called `name`
pub fn encode_with(name: &str, text: &str) -> Result<Vec<u8>> {
    Ok(Charset::lookup(name)?.encode(text))
}

/// Decode `bytes` using the charset called `name`
pub fn decode_with(name: &str, bytes: &[u8]) -> Result<String> {
    Ok(Charset::lookup(name)?.decode(bytes))
}

fn decode_utf16_bytes(bytes: &[u8], big_endian: bool) -> String {
    let units = bytes.chunks_exact(2).map(|pair| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    });

    let mut text: String = char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if bytes.len() % 2 != 0 {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

// =============================================================================
// Incremental codecs
// =============================================================================

/// Stateful single-character encoder
///
/// Only UTF-16 carries state: the byte order mark is written before the
/// first character.
#[derive(Debug, Clone)]
pub struct CharEncoder {
    charset: Charset,
    wrote_bom: bool,
}

impl CharEncoder {
    /// Charset this encoder writes
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Append the encoding of `c` to `out`
    pub fn encode_char(&mut self, c: char, out: &mut Vec<u8>) {
        match self.charset {
            Charset::Utf8 => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            Charset::Utf16 => {
                if !self.wrote_bom {
                    out.extend_from_slice(&[0xFE, 0xFF]);
                    self.wrote_bom = true;
                }
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
            Charset::Utf16Be => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
            Charset::Utf16Le => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            Charset::UsAscii => {
                out.push(if c.is_ascii() { c as u8 } else { REPLACEMENT_BYTE });
            }
            Charset::Iso8859_1 => {
                let cp = c as u32;
                out.push(if cp <= 0xFF { cp as u8 } else { REPLACEMENT_BYTE });
            }
            Charset::Windows1252 => out.push(char_to_windows1252(c)),
            Charset::Ibm437 => out.push(char_to_cp437(c)),
        }
    }
}

/// Stateful single-character decoder pulling bytes from a reader
#[derive(Debug, Clone)]
pub struct CharDecoder {
    charset: Charset,
    big_endian: bool,
    bom_checked: bool,
    pending_unit: Option<u16>,
}

impl CharDecoder {
    /// Read the next character, `None` at end of stream
    pub fn read_char<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<char>> {
        match self.charset {
            Charset::Utf8 => self.read_utf8(reader),
            Charset::Utf16 | Charset::Utf16Le | Charset::Utf16Be => self.read_utf16(reader),
            Charset::UsAscii => Ok(read_byte(reader)?
                .map(|b| if b < 0x80 { b as char } else { char::REPLACEMENT_CHARACTER })),
            Charset::Iso8859_1 => Ok(read_byte(reader)?.map(|b| b as char)),
            Charset::Windows1252 => Ok(read_byte(reader)?.map(windows1252_to_char)),
            Charset::Ibm437 => Ok(read_byte(reader)?.map(cp437_to_char)),
        }
    }

    fn read_utf8<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<char>> {
        let Some(lead) = read_byte(reader)? else {
            return Ok(None);
        };
        let len = match lead {
            0x00..=0x7F => return Ok(Some(lead as char)),
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return Ok(Some(char::REPLACEMENT_CHARACTER)),
        };

        let mut buf = [lead, 0, 0, 0];
        for slot in buf.iter_mut().take(len).skip(1) {
            match read_byte(reader)? {
                Some(b) => *slot = b,
                None => return Ok(Some(char::REPLACEMENT_CHARACTER)),
            }
        }

        Ok(Some(
            std::str::from_utf8(&buf[..len])
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(char::REPLACEMENT_CHARACTER),
        ))
    }

    fn read_unit<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<u16>> {
        if let Some(unit) = self.pending_unit.take() {
            return Ok(Some(unit));
        }
        let Some(b0) = read_byte(reader)? else {
            return Ok(None);
        };
        let Some(b1) = read_byte(reader)? else {
            // Dangling half unit
            return Ok(Some(0xFFFD));
        };
        Ok(Some(if self.big_endian {
            u16::from_be_bytes([b0, b1])
        } else {
            u16::from_le_bytes([b0, b1])
        }))
    }

    fn read_utf16<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<char>> {
        let Some(mut unit) = self.read_unit(reader)? else {
            return Ok(None);
        };

        if !self.bom_checked {
            self.bom_checked = true;
            match unit {
                0xFEFF => {}
                0xFFFE => self.big_endian = false,
                _ => {
                    self.pending_unit = Some(unit);
                }
            }
            unit = match self.read_unit(reader)? {
                Some(u) => u,
                None => return Ok(None),
            };
        }

        match unit {
            0xD800..=0xDBFF => {
                let Some(low) = self.read_unit(reader)? else {
                    return Ok(Some(char::REPLACEMENT_CHARACTER));
                };
                if (0xDC00..=0xDFFF).contains(&low) {
                    let cp = 0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
                    Ok(Some(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER)))
                } else {
                    self.pending_unit = Some(low);
                    Ok(Some(char::REPLACEMENT_CHARACTER))
                }
            }
            0xDC00..=0xDFFF => Ok(Some(char::REPLACEMENT_CHARACTER)),
            _ => Ok(Some(char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER))),
        }
    }
}

fn read_byte<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

// =============================================================================
// Codepage tables
// =============================================================================

/// Windows-1252 characters for bytes 128-159; U+FFFD marks the five undefined slots
const WINDOWS1252_HIGH: [char; 32] = [
    '€', '\u{FFFD}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{FFFD}', 'Ž', '\u{FFFD}',
    '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '•', '–', '—', '˜', '™', 'š', '›', 'œ',
    '\u{FFFD}', 'ž', 'Ÿ',
];

/// Convert a Unicode character to Windows-1252
fn char_to_windows1252(c: char) -> u8 {
    match c as u32 {
        cp @ (0..=127 | 160..=255) => cp as u8,
        _ if c == char::REPLACEMENT_CHARACTER => REPLACEMENT_BYTE,
        _ => WINDOWS1252_HIGH
            .iter()
            .position(|&h| h == c)
            .map(|i| 128 + i as u8)
            .unwrap_or(REPLACEMENT_BYTE),
    }
}

/// Convert a Windows-1252 byte to a Unicode character
fn windows1252_to_char(b: u8) -> char {
    match b {
        128..=159 => WINDOWS1252_HIGH[(b - 128) as usize],
        _ => b as char,
    }
}

/// CP437 characters for bytes 128-255
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', 'É', 'æ', 'Æ', 'ô', 'ö', 'ò',
    'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', 'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½',
    '¼', '¡', '«', '»', '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', '└', '┴',
    '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫',
    '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', 'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ',
    'ε', '∩', '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{A0}',
];

/// Convert a Unicode character to CP437
fn char_to_cp437(c: char) -> u8 {
    if c.is_ascii() {
        return c as u8;
    }
    if c == '⌂' {
        return 127;
    }
    CP437_HIGH
        .iter()
        .position(|&h| h == c)
        .map(|i| 128 + i as u8)
        .unwrap_or(REPLACEMENT_BYTE)
}

/// Convert a CP437 byte to a Unicode character
fn cp437_to_char(b: u8) -> char {
    match b {
        0..=126 => b as char,
        127 => '⌂',
        _ => CP437_HIGH[(b - 128) as usize],
    }
}
