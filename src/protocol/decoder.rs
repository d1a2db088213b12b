use super::VARINT_MAX_SIZE;
use std::str::Utf8Error;

/// An error while decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("need at least {0} more bytes")]
    EndOfStream(usize),
    #[error("invalid varint: fifth byte still has the continuation bit set")]
    InvalidVarint,
    #[error("invalid buffer chunk size (less than 0): {0}")]
    InvalidChunkSize(i32),
    #[error("string exceeds max allowed length")]
    StringTooLong,
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

const MAX_STRING_LENGTH: usize = i16::MAX as usize;

/// A raw decoder for a Minecraft bitstream.
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder from the buffer it will read from.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Gets the remaining buffer.
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Returns if there is no data left in the buffer.
    pub fn is_finished(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes `n` bytes from the buffer, returning them as a slice.
    pub fn consume_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if n <= self.buffer.len() {
            let (data, buffer) = self.buffer.split_at(n);
            self.buffer = buffer;
            Ok(data)
        } else {
            Err(DecodeError::EndOfStream(n - self.buffer.len()))
        }
    }

    /// Consumes `N` bytes into an array.
    pub fn consume<const N: usize>(&mut self) -> Result<[u8; N]> {
        let data = self.consume_slice(N)?;
        Ok(<[u8; N]>::try_from(data).unwrap())
    }

    /// Reads an unsigned byte from the stream.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.consume::<1>().map(|[x]| x)
    }

    /// Reads an unsigned short from the stream.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.consume().map(u16::from_be_bytes)
    }

    /// Reads an unsigned long from the stream.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.consume().map(u64::from_be_bytes)
    }

    /// Reads a VarInt from the stream.
    pub fn read_var_int(&mut self) -> Result<i32> {
        self.read_var_int_with_size().map(|(x, _)| x)
    }

    /// Reads a VarInt from the stream, additionally
    /// returning the number of bytes read.
    pub fn read_var_int_with_size(&mut self) -> Result<(i32, usize)> {
        let mut result: i32 = 0;

        for count in 0..VARINT_MAX_SIZE {
            let byte = self.read_u8()?;
            let value = i32::from(byte & 0b0111_1111);
            result |= value.overflowing_shl(7 * count as u32).0;

            if byte & 0b1000_0000 == 0 {
                return Ok((result, count + 1));
            }
        }
        Err(DecodeError::InvalidVarint)
    }

    /// Reads a VarInt used as a length prefix, rejecting negative values.
    pub fn read_chunk_size(&mut self) -> Result<usize> {
        check_chunk_size(self.read_var_int()?)
    }

    /// Reads a varint-length-prefixed byte array from the stream.
    pub fn read_byte_array(&mut self) -> Result<&'a [u8]> {
        let size = self.read_chunk_size()?;
        self.consume_slice(size)
    }

    /// Skips a varint-length-prefixed chunk of bytes.
    pub fn skip_chunk(&mut self) -> Result<()> {
        self.read_byte_array().map(|_| ())
    }

    /// Reads a varint-length-prefixed UTF-8 string from the stream.
    pub fn read_string(&mut self) -> Result<&'a str> {
        let length = self.read_chunk_size()?;

        if length > MAX_STRING_LENGTH {
            return Err(DecodeError::StringTooLong);
        }

        let bytes = std::str::from_utf8(self.consume_slice(length)?)?;
        Ok(bytes)
    }

    /// Reads a UUID as two big-endian 64-bit halves.
    pub fn read_uuid(&mut self) -> Result<u128> {
        self.consume::<16>().map(u128::from_be_bytes)
    }
}

/// Validates a decoded length prefix, which must never be negative.
pub fn check_chunk_size(size: i32) -> Result<usize> {
    usize::try_from(size).map_err(|_| DecodeError::InvalidChunkSize(size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{var_int_size, Encoder};

    #[test]
    fn varint_known_encodings() {
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (255, &[0xff, 0x01]),
            (25565, &[0xdd, 0xc7, 0x01]),
            (2097151, &[0xff, 0xff, 0x7f]),
            (i32::MAX, &[0xff, 0xff, 0xff, 0xff, 0x07]),
            (-1, &[0xff, 0xff, 0xff, 0xff, 0x0f]),
            (i32::MIN, &[0x80, 0x80, 0x80, 0x80, 0x08]),
        ];

        for &(value, encoding) in cases {
            let mut buf = Vec::new();
            let written = Encoder::new(&mut buf).write_var_int(value);
            assert_eq!(buf, encoding, "encoding of {value}");
            assert_eq!(written, encoding.len());
            assert_eq!(var_int_size(value), encoding.len(), "size of {value}");

            let mut decoder = Decoder::new(&buf);
            assert_eq!(
                decoder.read_var_int_with_size().unwrap(),
                (value, encoding.len())
            );
            assert!(decoder.is_finished());
        }
    }

    #[test]
    fn varint_with_sixth_continuation_byte_fails() {
        let buf = [0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert!(matches!(
            Decoder::new(&buf).read_var_int(),
            Err(DecodeError::InvalidVarint)
        ));
    }

    #[test]
    fn varint_truncated_reports_end_of_stream() {
        let buf = [0x80];
        assert!(matches!(
            Decoder::new(&buf).read_var_int(),
            Err(DecodeError::EndOfStream(_))
        ));
    }

    #[test]
    fn negative_chunk_size_rejected() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_var_int(-5);
        assert!(matches!(
            Decoder::new(&buf).read_byte_array(),
            Err(DecodeError::InvalidChunkSize(-5))
        ));
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_string("play.example.org");
        let mut decoder = Decoder::new(&buf);
        assert_eq!(decoder.read_string().unwrap(), "play.example.org");
        assert!(decoder.is_finished());
    }

    #[test]
    fn byte_array_roundtrip() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_byte_array(&[1, 2, 3, 4]);
        assert_eq!(Decoder::new(&buf).read_byte_array().unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn uuid_roundtrip() {
        let uuid = 0x069a79f4_44e9_4726_a5be_fca90e38aaf5u128;
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_uuid(uuid);
        assert_eq!(buf.len(), 16);
        assert_eq!(Decoder::new(&buf).read_uuid().unwrap(), uuid);
    }
}
