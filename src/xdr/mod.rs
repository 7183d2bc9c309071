//! XDR (External Data Representation) primitives.
//!
//! Decoding reads from any [`std::io::Read`]; encoding writes to any
//! [`std::io::Write`]. XDR enforces big-endian byte order and 4-byte
//! alignment with zero padding, per RFC 4506.


use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};

/// All serialized data is aligned to [`ALIGNMENT`] (4 bytes) boundaries.
pub const ALIGNMENT: usize = 4;

/// Result of XDR decode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// XDR decode errors.
#[derive(Debug)]
pub enum Error {
    /// Underlying reader failed or ran out of bytes.
    IO(io::Error),
    /// An enum discriminant did not match any known variant.
    EnumDiscMismatch,
    /// A counted element exceeded its maximum allowed size.
    MaxElemLimit,
    /// A string field held invalid UTF-8.
    IncorrectString,
    /// Padding bytes were missing or the stream was misaligned.
    IncorrectPadding,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IO(err)
    }
}

// --- decode ---

/// Reads and discards padding bytes to restore XDR alignment after a
/// field of `n` bytes.
pub fn read_padding(src: &mut impl Read, n: usize) -> Result<()> {
    let mut buf = [0u8; ALIGNMENT];
    let padding = (ALIGNMENT - n % ALIGNMENT) % ALIGNMENT;
    src.read_exact(&mut buf[..padding]).map_err(|_| Error::IncorrectPadding)
}

/// Parses an XDR `unsigned int` (32-bit, big-endian).
pub fn read_u32(src: &mut impl Read) -> Result<u32> {
    src.read_u32::<BigEndian>().map_err(Error::IO)
}

/// Parses an XDR `unsigned hyper` (64-bit, big-endian).
pub fn read_u64(src: &mut impl Read) -> Result<u64> {
    src.read_u64::<BigEndian>().map_err(Error::IO)
}

/// Parses an XDR boolean (encoded as a `u32` that must be 0 or 1).
pub fn read_bool(src: &mut impl Read) -> Result<bool> {
    match read_u32(src)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::EnumDiscMismatch),
    }
}

/// Parses an XDR optional value: boolean discriminator then the value.
pub fn read_option<T, S: Read>(
    src: &mut S,
    cont: impl FnOnce(&mut S) -> Result<T>,
) -> Result<Option<T>> {
    match read_bool(src)? {
        true => Ok(Some(cont(src)?)),
        false => Ok(None),
    }
}

/// Parses a fixed-size opaque `[u8; N]` including alignment padding.
pub fn read_array<const N: usize>(src: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    src.read_exact(&mut buf).map_err(Error::IO)?;
    read_padding(src, N)?;
    Ok(buf)
}

/// Parses a variable-length opaque (`opaque<>`) with a maximum size check.
pub fn read_vec_max(src: &mut impl Read, max_size: usize) -> Result<Vec<u8>> {
    let size = read_u32(src)? as usize;
    if size > max_size {
        return Err(Error::MaxElemLimit);
    }
    let mut vec = vec![0u8; size];
    src.read_exact(vec.as_mut_slice()).map_err(Error::IO)?;
    read_padding(src, size)?;
    Ok(vec)
}

/// Parses an XDR `string<max_size>` (UTF-8 checked).
pub fn read_string_max(src: &mut impl Read, max_size: usize) -> Result<String> {
    let vec = read_vec_max(src, max_size)?;
    String::from_utf8(vec).map_err(|_| Error::IncorrectString)
}

/// Parses an XDR enum discriminant into a `FromPrimitive` type.
pub fn read_variant<T: FromPrimitive>(src: &mut impl Read) -> Result<T> {
    FromPrimitive::from_u32(read_u32(src)?).ok_or(Error::EnumDiscMismatch)
}

// --- encode ---

/// Writes XDR alignment padding for an already-written field of `n` bytes.
pub fn write_padding(dest: &mut dyn Write, n: usize) -> io::Result<()> {
    let padding = (ALIGNMENT - n % ALIGNMENT) % ALIGNMENT;
    let zeros = [0u8; ALIGNMENT];
    dest.write_all(&zeros[..padding])
}

/// Serializes an XDR `unsigned int` (32-bit, big-endian).
pub fn write_u32(dest: &mut dyn Write, n: u32) -> io::Result<()> {
    dest.write_u32::<BigEndian>(n)
}

/// Serializes an XDR `unsigned hyper` (64-bit, big-endian).
pub fn write_u64(dest: &mut dyn Write, n: u64) -> io::Result<()> {
    dest.write_u64::<BigEndian>(n)
}

/// Serializes an XDR `bool` as `0`/`1`.
pub fn write_bool(dest: &mut dyn Write, b: bool) -> io::Result<()> {
    write_u32(dest, if b { 1 } else { 0 })
}

/// Serializes a fixed-length opaque (`opaque[N]`) with alignment padding.
pub fn write_array<const N: usize>(dest: &mut dyn Write, slice: [u8; N]) -> io::Result<()> {
    dest.write_all(&slice).and_then(|_| write_padding(dest, N))
}

/// Serializes a variable-length opaque (`opaque<>`): length + bytes + padding.
pub fn write_vec(dest: &mut dyn Write, vec: &[u8]) -> io::Result<()> {
    let len = vec
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "vector length exceeds u32"))?;
    dest.write_u32::<BigEndian>(len)
        .and_then(|_| dest.write_all(vec))
        .and_then(|_| write_padding(dest, vec.len()))
}

/// Serializes an XDR `string<>` (UTF-8 bytes as counted opaque).
pub fn write_string(dest: &mut dyn Write, string: &str) -> io::Result<()> {
    write_vec(dest, string.as_bytes())
}

/// Serializes an enum discriminant / union tag as a 32-bit integer.
pub fn write_variant<T: ToPrimitive>(dest: &mut impl Write, val: T) -> io::Result<()> {
    dest.write_u32::<BigEndian>(
        ToPrimitive::to_u32(&val)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cannot convert to u32"))?,
    )
}

/// Cursor over the raw XDR tail of a COMPOUND request.
///
/// Operation handlers decode their arguments lazily from this reader; a
/// handler that fails mid-decode leaves the stream position defined, which
/// is why even unsupported operations must consume their arguments.
pub struct XdrReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> XdrReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        XdrReader { data, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

impl Read for XdrReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(self.remaining());
        buf[..len].copy_from_slice(&self.data[self.position..self.position + len]);
        self.position += len;
        Ok(len)
    }
}
