use super::VARINT_MAX_SIZE;

/// A raw encoder for a Minecraft bitstream.
#[derive(Debug)]
pub struct Encoder<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder that will append to the provided
    /// byte buffer.
    ///
    /// Any existing contents of `buffer` are left untouched.
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self { buffer }
    }

    /// Writes an unsigned byte to the stream.
    pub fn write_u8(&mut self, x: u8) {
        self.buffer.push(x);
    }

    /// Writes an unsigned short to the stream.
    pub fn write_u16(&mut self, x: u16) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes an unsigned long to the stream.
    pub fn write_u64(&mut self, x: u64) {
        self.buffer.extend(x.to_be_bytes());
    }

    /// Writes a series of bytes to the stream. Does not write
    /// any sort of length prefix.
    pub fn write_slice(&mut self, slice: &[u8]) {
        self.buffer.extend_from_slice(slice);
    }

    /// Writes a VarInt to the stream, always using the minimal
    /// encoding. Returns the number of bytes written.
    pub fn write_var_int(&mut self, x: i32) -> usize {
        let mut x = x as u32;
        let mut bytes_written = 0;
        loop {
            let mut temp = (x & 0b0111_1111) as u8;
            x >>= 7;
            if x != 0 {
                temp |= 0b1000_0000;
            }

            self.buffer.push(temp);
            bytes_written += 1;

            if x == 0 {
                break bytes_written;
            }
        }
    }

    /// Writes a varint-length-prefixed byte array to the stream.
    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_var_int(bytes.len().try_into().unwrap_or(i32::MAX));
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a varint-prefixed string to the stream.
    pub fn write_string(&mut self, x: &str) {
        self.write_byte_array(x.as_bytes());
    }

    /// Writes a UUID as two big-endian 64-bit halves.
    pub fn write_uuid(&mut self, x: u128) {
        self.buffer.extend(x.to_be_bytes());
    }
}

/// Computes the encoded length of a VarInt without writing it.
pub fn var_int_size(x: i32) -> usize {
    let x = x as u32;
    let mut shift = 7;
    for size in 1..VARINT_MAX_SIZE {
        if x >> shift == 0 {
            return size;
        }
        shift += 7;
    }
    VARINT_MAX_SIZE
}
