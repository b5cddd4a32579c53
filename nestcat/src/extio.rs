//! Extend Read and Write with some convenience methods for binary i/o
//!
use std::io::{self, Read, Write};

use crate::errors::{Error, Result};

pub(crate) trait Serialize: Sized {
    /// Write self to a stream
    fn write_to(&self, stream: &mut impl Write) -> Result<()>;

    /// Read Self from a stream
    fn read_from(stream: &mut impl Read) -> Result<Self>;
}

pub(crate) trait ExtendedRead: Read {
    /// Read a byte from a stream
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Read a Big Endian encoded 16 bit unsigned integer from a stream
    fn read_u16(&mut self) -> io::Result<u16>;

    /// Read a Big Endian encoded 32 bit unsigned integer from a stream
    fn read_u32(&mut self) -> io::Result<u32>;

    /// Read a Big Endian encoded 64 bit unsigned integer from a stream
    fn read_u64(&mut self) -> io::Result<u64>;

    /// Read a length prefixed UTF-8 string from a stream
    fn read_str(&mut self) -> Result<String>;

    /// Read a length prefixed byte buffer from a stream
    fn read_bytes(&mut self) -> io::Result<Vec<u8>>;
}

impl<R: Read> ExtendedRead for R {
    /// Read a byte from a stream
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buffer = [0; 1];
        self.read_exact(&mut buffer)?;

        Ok(buffer[0])
    }

    /// Read a Big Endian encoded 16 bit unsigned integer from a stream
    fn read_u16(&mut self) -> io::Result<u16> {
        let mut buffer = [0; 2];
        self.read_exact(&mut buffer)?;

        Ok(u16::from_be_bytes(buffer))
    }

    /// Read a Big Endian encoded 32 bit unsigned integer from a stream
    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer)?;

        Ok(u32::from_be_bytes(buffer))
    }

    /// Read a Big Endian encoded 64 bit unsigned integer from a stream
    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer)?;

        Ok(u64::from_be_bytes(buffer))
    }

    fn read_str(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;

        String::from_utf8(bytes).map_err(|err| Error::Corrupt(err.to_string()))
    }

    fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_u64()?;
        let mut bytes = vec![];
        self.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated byte buffer",
            ));
        }

        Ok(bytes)
    }
}

pub(crate) trait ExtendedWrite: Write {
    /// Write a byte to a stream
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Write a Big Endian encoded 16 bit unsigned integer to a stream
    fn write_u16(&mut self, word: u16) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit unsigned integer to a stream
    fn write_u32(&mut self, word: u32) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit unsigned integer to a stream
    fn write_u64(&mut self, word: u64) -> io::Result<()>;

    /// Write a length prefixed UTF-8 string to a stream
    fn write_str(&mut self, text: &str) -> io::Result<()>;

    /// Write a length prefixed byte buffer to a stream
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<W: Write> ExtendedWrite for W {
    /// Write a byte to a stream
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }

    /// Write a Big Endian encoded 16 bit unsigned integer to a stream
    fn write_u16(&mut self, word: u16) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    /// Write a Big Endian encoded 32 bit unsigned integer to a stream
    fn write_u32(&mut self, word: u32) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    /// Write a Big Endian encoded 64 bit unsigned integer to a stream
    fn write_u64(&mut self, word: u64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.write_bytes(text.as_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_u64(bytes.len() as u64)?;
        self.write_all(bytes)
    }
}

/// Fixed width numeric elements with a Big Endian byte representation
pub(crate) trait Element: Copy {
    const WIDTH: usize;

    fn put(self, buffer: &mut Vec<u8>);

    /// Decode from the first WIDTH bytes of `bytes`
    fn take(bytes: &[u8]) -> Self;
}

macro_rules! Element {
    ($type:ty) => {
        impl Element for $type {
            const WIDTH: usize = std::mem::size_of::<$type>();

            fn put(self, buffer: &mut Vec<u8>) {
                buffer.extend_from_slice(&self.to_be_bytes());
            }

            fn take(bytes: &[u8]) -> Self {
                let mut raw = [0; std::mem::size_of::<$type>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);

                <$type>::from_be_bytes(raw)
            }
        }
    };
}

Element!(i8);
Element!(u8);
Element!(i16);
Element!(u16);
Element!(i32);
Element!(u32);
Element!(i64);
Element!(u64);
Element!(f32);
Element!(f64);
