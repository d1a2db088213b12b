//! Per-packet maybe-compressed framing.
//!
//! Compression applies to one packet body at a time, never to the stream
//! as a whole, so the threshold can change at a packet boundary.

use super::{DecodeError, Decoder, Encoder, BUFFER_LIMIT};
use flate2::Compression;
use std::{
    borrow::Cow,
    io::{Read, Write},
};

/// The proxy rarely carries large amounts of data on the compressed leg
/// during login, so we avoid spending too much time on compression here.
const COMPRESSION_LEVEL: Compression = Compression::fast();

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("failed to process zlib stream: {0}")]
    Zlib(#[from] std::io::Error),
    #[error("declared uncompressed size {declared} does not match inflated size {actual}")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("uncompressed size {0} exceeds maximum allowed")]
    TooLarge(usize),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Frames a packet body (`varint(packetId) ++ payload`, `size` bytes long)
/// per the maybe-compressed convention and appends it to `out`, including
/// the outer packet-length prefix.
///
/// Bodies at or above `threshold` bytes are deflated and prefixed with
/// their uncompressed size; smaller bodies are written literally behind
/// the `varint(0)` sentinel.
pub fn compress(
    threshold: i32,
    size: i32,
    body: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), CompressionError> {
    debug_assert_eq!(body.len(), size as usize);

    if size >= threshold {
        let mut inner = Vec::new();
        Encoder::new(&mut inner).write_var_int(size);
        let mut deflater = flate2::write::ZlibEncoder::new(inner, COMPRESSION_LEVEL);
        deflater.write_all(body)?;
        let inner = deflater.finish()?;

        let mut encoder = Encoder::new(out);
        encoder.write_var_int(inner.len().try_into().map_err(|_| {
            CompressionError::TooLarge(inner.len())
        })?);
        encoder.write_slice(&inner);
    } else {
        let mut encoder = Encoder::new(out);
        encoder.write_var_int(size + 1);
        encoder.write_var_int(0);
        encoder.write_slice(body);
    }
    Ok(())
}

/// Unframes a packet's contents (everything after the outer length
/// prefix), returning the logical `varint(packetId) ++ payload` bytes.
///
/// A leading `varint(0)` means the remainder is the literal body;
/// anything else declares the inflated size of the deflate stream that
/// follows.
pub fn decompress(contents: &[u8]) -> Result<Cow<'_, [u8]>, CompressionError> {
    let mut decoder = Decoder::new(contents);
    let declared = decoder.read_chunk_size()?;

    if declared == 0 {
        return Ok(Cow::Borrowed(decoder.buffer()));
    }
    if declared > BUFFER_LIMIT {
        return Err(CompressionError::TooLarge(declared));
    }

    let mut body = Vec::with_capacity(declared);
    flate2::read::ZlibDecoder::new(decoder.buffer())
        .take(declared as u64 + 1)
        .read_to_end(&mut body)?;
    if body.len() != declared {
        return Err(CompressionError::SizeMismatch {
            declared,
            actual: body.len(),
        });
    }
    Ok(Cow::Owned(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(id: u8, payload_len: usize) -> Vec<u8> {
        let mut body = vec![id];
        body.extend((0..payload_len).map(|i| (i % 251) as u8));
        body
    }

    fn unframe(framed: &[u8]) -> (usize, Vec<u8>) {
        let mut decoder = Decoder::new(framed);
        let outer = decoder.read_chunk_size().unwrap();
        assert_eq!(decoder.buffer().len(), outer);
        (outer, decoder.buffer().to_vec())
    }

    #[test]
    fn small_body_uses_uncompressed_sentinel() {
        let body = body_of(0x03, 9);
        let mut out = Vec::new();
        compress(256, body.len() as i32, &body, &mut out).unwrap();

        let (outer, contents) = unframe(&out);
        assert_eq!(outer, body.len() + 1);
        assert_eq!(contents[0], 0);
        assert_eq!(&contents[1..], &body[..]);

        assert_eq!(&*decompress(&contents).unwrap(), &body[..]);
    }

    #[test]
    fn large_body_is_deflated() {
        let body = body_of(0x02, 299);
        let mut out = Vec::new();
        compress(256, body.len() as i32, &body, &mut out).unwrap();

        let (_, contents) = unframe(&out);
        let mut decoder = Decoder::new(&contents);
        assert_eq!(decoder.read_var_int().unwrap() as usize, body.len());

        assert_eq!(&*decompress(&contents).unwrap(), &body[..]);
    }

    #[test]
    fn roundtrip_at_exact_threshold() {
        let body = body_of(0x01, 255);
        assert_eq!(body.len(), 256);
        let mut out = Vec::new();
        compress(256, 256, &body, &mut out).unwrap();

        let (_, contents) = unframe(&out);
        let mut decoder = Decoder::new(&contents);
        assert_ne!(decoder.read_var_int().unwrap(), 0);
        assert_eq!(&*decompress(&contents).unwrap(), &body[..]);
    }

    #[test]
    fn malformed_deflate_stream_fails() {
        let mut contents = Vec::new();
        Encoder::new(&mut contents).write_var_int(64);
        contents.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(
            decompress(&contents),
            Err(CompressionError::Zlib(_) | CompressionError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn declared_size_mismatch_fails() {
        let body = body_of(0x05, 300);
        let mut framed = Vec::new();
        compress(0, body.len() as i32, &body, &mut framed).unwrap();
        let (_, mut contents) = unframe(&framed);

        // Corrupt the declared uncompressed size.
        let mut tampered = Vec::new();
        let mut decoder = Decoder::new(&contents);
        let declared = decoder.read_var_int().unwrap();
        Encoder::new(&mut tampered).write_var_int(declared + 1);
        tampered.extend_from_slice(decoder.buffer());
        contents = tampered;

        assert!(matches!(
            decompress(&contents),
            Err(CompressionError::SizeMismatch { .. })
        ));
    }
}
