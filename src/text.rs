//! Text transcoding for native text formats.
//!
//! Native text formats differ from in-process strings in three ways: the
//! charset, the end-of-line marker and a run of trailing zero bytes. This
//! module converts between the two, either materialized ([`encode_text`],
//! [`decode_text`]) or lazily over a stream ([`ReencodingReader`]).

use std::collections::VecDeque;
use std::io::{self, BufReader, Read};

use tracing::trace;

use crate::charset::{CharDecoder, CharEncoder, Charset};
use crate::error::Result;
use crate::format::TextFormatProperties;

/// Replace every `'\n'` with `eoln`.
///
/// Occurrences of `eoln` already present are copied through untouched, so
/// text that was normalized once is not normalized twice.
pub fn normalize_eoln_for_native(text: &str, eoln: &str) -> String {
    if eoln.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() * 2);
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with(eoln) {
            out.push_str(eoln);
            rest = &rest[eoln.len()..];
            continue;
        }
        if c == '\n' {
            out.push_str(eoln);
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Replace every exact occurrence of `eoln` with `'\n'`, scanning left to
/// right without overlapping matches.
pub fn restore_eoln(text: &str, eoln: &str) -> String {
    if eoln.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with(eoln) {
            out.push('\n');
            rest = &rest[eoln.len()..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

/// Length of `bytes` before the terminator run.
///
/// Scans `terminators`-aligned offsets for a run of that many zero bytes.
/// Without a run the length is rounded down to the alignment, dropping a
/// trailing partial unit. Zero terminators means no truncation.
pub fn terminated_len(bytes: &[u8], terminators: usize) -> usize {
    if terminators == 0 {
        return bytes.len();
    }

    let mut count = 0;
    while count + terminators <= bytes.len() {
        if bytes[count..count + terminators].iter().all(|&b| b == 0) {
            return count;
        }
        count += terminators;
    }
    count
}

/// Encode `text` for a native text format: EOLN replacement, charset
/// encoding, then the terminator run.
pub fn encode_text(text: &str, props: &TextFormatProperties) -> Result<Vec<u8>> {
    let charset = Charset::lookup(&props.charset)?;

    let mut bytes = match props.eoln.as_deref() {
        Some(eoln) => charset.encode(&normalize_eoln_for_native(text, eoln)),
        None => charset.encode(text),
    };
    bytes.resize(bytes.len() + props.terminators, 0);

    trace!(charset = %charset, len = bytes.len(), "Encoded native text");
    Ok(bytes)
}

/// Decode native text bytes. `charset_override` replaces the format's charset
/// when the data source supplied one out of band.
pub fn decode_text(
    bytes: &[u8],
    props: &TextFormatProperties,
    charset_override: Option<&str>,
) -> Result<String> {
    let charset = Charset::lookup(charset_override.unwrap_or(&props.charset))?;

    let len = terminated_len(bytes, props.terminators);
    let decoded = charset.decode(&bytes[..len]);

    Ok(match props.eoln.as_deref() {
        Some(eoln) => restore_eoln(&decoded, eoln),
        None => decoded,
    })
}

// =============================================================================
// Streaming
// =============================================================================

/// Re-encodes a native text stream on demand.
///
/// Characters are decoded from the source one at a time. A NUL character
/// ends the stream when the format has terminators, and EOLN markers become
/// `'\n'`. Each character is then encoded into the target charset and the
/// bytes are handed out through [`Read`].
pub struct ReencodingReader<R: Read> {
    source: BufReader<R>,
    decoder: CharDecoder,
    encoder: CharEncoder,
    eoln: Option<Vec<char>>,
    terminators: usize,
    pushback: VecDeque<char>,
    out: Vec<u8>,
    index: usize,
    eos: bool,
}

impl<R: Read> ReencodingReader<R> {
    /// Wrap `source`, decoding with `source_charset` and re-encoding into
    /// `target_charset`
    pub fn new(
        source: R,
        source_charset: Charset,
        target_charset: Charset,
        props: &TextFormatProperties,
    ) -> Self {
        Self {
            source: BufReader::new(source),
            decoder: source_charset.decoder(),
            encoder: target_charset.encoder(),
            eoln: props.eoln.as_ref().map(|e| e.chars().collect()),
            terminators: props.terminators,
            pushback: VecDeque::new(),
            out: Vec::with_capacity(target_charset.max_bytes_per_char() * 2),
            index: 0,
            eos: false,
        }
    }

    /// Bytes already encoded and not yet read
    pub fn available(&self) -> usize {
        if self.eos && self.index >= self.out.len() {
            0
        } else {
            self.out.len() - self.index
        }
    }

    fn next_source_char(&mut self) -> io::Result<Option<char>> {
        if let Some(c) = self.pushback.pop_front() {
            return Ok(Some(c));
        }
        self.decoder.read_char(&mut self.source)
    }

    fn read_char(&mut self) -> io::Result<Option<char>> {
        let Some(c) = self.next_source_char()? else {
            self.eos = true;
            return Ok(None);
        };

        if self.terminators > 0 && c == '\0' {
            self.eos = true;
            return Ok(None);
        }

        if let Some(eoln) = self.eoln.clone() {
            if self.match_eoln(&eoln, c)? {
                return Ok(Some('\n'));
            }
        }
        Ok(Some(c))
    }

    /// Check whether `first` and the following characters spell `eoln`.
    /// Consumed characters are pushed back when they do not.
    fn match_eoln(&mut self, eoln: &[char], first: char) -> io::Result<bool> {
        if eoln.first() != Some(&first) {
            return Ok(false);
        }

        let mut taken = Vec::with_capacity(eoln.len());
        for &expected in &eoln[1..] {
            match self.next_source_char()? {
                Some(c) => {
                    taken.push(c);
                    if c != expected {
                        break;
                    }
                }
                None => break,
            }
        }

        if taken.len() == eoln.len() - 1 && taken.iter().eq(eoln[1..].iter()) {
            return Ok(true);
        }
        for c in taken.into_iter().rev() {
            self.pushback.push_front(c);
        }
        Ok(false)
    }
}

impl<R: Read> Read for ReencodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;

        while written < buf.len() {
            if self.index >= self.out.len() {
                if self.eos {
                    break;
                }
                let Some(c) = self.read_char()? else {
                    break;
                };
                self.out.clear();
                self.index = 0;
                self.encoder.encode_char(c, &mut self.out);
            }

            let n = (self.out.len() - self.index).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&self.out[self.index..self.index + n]);
            self.index += n;
            written += n;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows_text() -> TextFormatProperties {
        TextFormatProperties::register(Some("UTF-16LE"), Some("\r\n"), 2, "UTF-8")
    }

    #[test]
    fn test_normalize_eoln() {
        assert_eq!(normalize_eoln_for_native("a\nb", "\r\n"), "a\r\nb");
        // Existing markers are not doubled
        assert_eq!(normalize_eoln_for_native("a\r\nb\n", "\r\n"), "a\r\nb\r\n");
        assert_eq!(normalize_eoln_for_native("a\rb", "\r\n"), "a\rb");
    }

    #[test]
    fn test_restore_eoln() {
        assert_eq!(restore_eoln("a\r\nb\r\n", "\r\n"), "a\nb\n");
        assert_eq!(restore_eoln("a\r\r\nb", "\r\n"), "a\r\nb");
        assert_eq!(restore_eoln("a\rb\r", "\r\n"), "a\rb\r");
        // Non-overlapping: "aaa" against "aa" yields one match
        assert_eq!(restore_eoln("aaa", "aa"), "\na");
    }

    #[test]
    fn test_terminated_len() {
        assert_eq!(terminated_len(b"abc\0", 1), 3);
        assert_eq!(terminated_len(b"abc", 0), 3);
        assert_eq!(terminated_len(b"abc", 1), 3);
        // Aligned scan: the zero at offset 1 is not a terminator run
        assert_eq!(terminated_len(&[b'a', 0, b'b', 0, 0, 0], 2), 4);
        // No run found: trailing partial unit dropped
        assert_eq!(terminated_len(&[b'a', 0, b'b'], 2), 2);
        assert_eq!(terminated_len(&[b'a'], 2), 0);
    }

    #[test]
    fn test_encode_lf_with_terminator() {
        let props = TextFormatProperties::register(Some("US-ASCII"), Some("\r\n"), 1, "UTF-8");
        let bytes = encode_text("a\nb", &props).unwrap();
        assert_eq!(bytes, b"a\r\nb\0");
        assert_eq!(decode_text(&bytes, &props, None).unwrap(), "a\nb");
    }

    #[test]
    fn test_utf16le_roundtrip() {
        let props = windows_text();
        let bytes = encode_text("héllo\nworld", &props).unwrap();
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);
        assert_eq!(decode_text(&bytes, &props, None).unwrap(), "héllo\nworld");
    }

    #[test]
    fn test_decode_with_override() {
        let props = TextFormatProperties::register(Some("US-ASCII"), None, 1, "UTF-8");
        let bytes = [0xE9, 0x00];
        assert_eq!(decode_text(&bytes, &props, Some("ISO-8859-1")).unwrap(), "é");
        assert!(decode_text(&bytes, &props, Some("X-NOPE")).is_err());
    }

    #[test]
    fn test_encode_unsupported_charset() {
        let props = TextFormatProperties::register(Some("X-NOPE"), None, 0, "UTF-8");
        assert!(encode_text("a", &props).is_err());
    }

    #[test]
    fn test_reencoding_reader() {
        let props = windows_text();
        let native = encode_text("one\ntwo", &props).unwrap();
        let mut with_tail = native.clone();
        with_tail.extend_from_slice(&[b'x', 0]);

        let mut reader = ReencodingReader::new(
            with_tail.as_slice(),
            Charset::Utf16Le,
            Charset::Utf8,
            &props,
        );
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "one\ntwo");
        assert_eq!(reader.available(), 0);
    }

    #[test]
    fn test_reencoding_reader_partial_marker() {
        let props = TextFormatProperties::register(Some("UTF-8"), Some("\r\n"), 0, "UTF-8");
        let mut reader = ReencodingReader::new(&b"a\rb\r\n\r"[..], Charset::Utf8, Charset::Utf8, &props);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "a\rb\n\r");
    }

    #[test]
    fn test_reencoding_reader_utf16_bom_once() {
        let props = TextFormatProperties::register(Some("UTF-8"), None, 0, "UTF-8");
        let mut reader = ReencodingReader::new(&b"ab"[..], Charset::Utf8, Charset::Utf16, &props);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![0xFE, 0xFF, 0, b'a', 0, b'b']);
    }

    #[test]
    fn test_reencoding_reader_small_reads() {
        let props = TextFormatProperties::register(Some("UTF-8"), None, 0, "UTF-8");
        let mut reader = ReencodingReader::new("né".as_bytes(), Charset::Utf8, Charset::Utf16Be, &props);
        let mut byte = [0u8; 1];
        let mut out = Vec::new();
        while reader.read(&mut byte).unwrap() == 1 {
            out.push(byte[0]);
        }
        assert_eq!(out, vec![0, b'n', 0, 0xE9]);
    }
}
