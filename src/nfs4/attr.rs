//! bitmap4 and fattr4 attribute encoding.
//!
//! A bitmap4 is a variable-length array of 32-bit words; bit `n` lives in
//! word `n / 32` at position `n % 32`. fattr4 values are encoded in
//! ascending bit order, so attribute writers must follow bit numbering
//! exactly.

use std::io::{Read, Write};

use crate::xdr;

/// Decode cap: 8 words cover attribute bits 0..=255, far beyond any
/// attribute RFC 7530 defines. Longer bitmaps are a memory-exhaustion
/// vector and are rejected.
pub const MAX_BITMAP_WORDS: usize = 8;

// Attribute bit numbers (RFC 7530 §5).
pub const FATTR4_SUPPORTED_ATTRS: u32 = 0;
pub const FATTR4_TYPE: u32 = 1;
pub const FATTR4_FH_EXPIRE_TYPE: u32 = 2;
pub const FATTR4_CHANGE: u32 = 3;
pub const FATTR4_SIZE: u32 = 4;
pub const FATTR4_LINK_SUPPORT: u32 = 5;
pub const FATTR4_SYMLINK_SUPPORT: u32 = 6;
pub const FATTR4_NAMED_ATTR: u32 = 7;
pub const FATTR4_FSID: u32 = 8;
pub const FATTR4_LEASE_TIME: u32 = 10;
pub const FATTR4_FILEHANDLE: u32 = 19;
pub const FATTR4_FILEID: u32 = 20;
pub const FATTR4_MODE: u32 = 33;
pub const FATTR4_NUMLINKS: u32 = 35;
pub const FATTR4_OWNER: u32 = 36;
pub const FATTR4_OWNER_GROUP: u32 = 37;
pub const FATTR4_SPACE_USED: u32 = 45;
pub const FATTR4_TIME_ACCESS: u32 = 47;
pub const FATTR4_TIME_METADATA: u32 = 52;
pub const FATTR4_TIME_MODIFY: u32 = 53;
pub const FATTR4_MOUNTED_ON_FILEID: u32 = 55;

/// Variable-length attribute bitmap (`bitmap4`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmap4 {
    words: Vec<u32>,
}

impl Bitmap4 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bits(bits: &[u32]) -> Self {
        let mut bitmap = Self::new();
        for &bit in bits {
            bitmap.set_bit(bit);
        }
        bitmap
    }

    pub fn is_bit_set(&self, bit: u32) -> bool {
        let word = (bit / 32) as usize;
        self.words.get(word).map(|w| w & (1 << (bit % 32)) != 0).unwrap_or(false)
    }

    pub fn set_bit(&mut self, bit: u32) {
        let word = (bit / 32) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (bit % 32);
    }

    pub fn clear_bit(&mut self, bit: u32) {
        let word = (bit / 32) as usize;
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1 << (bit % 32));
        }
    }

    /// Attribute-negotiation primitive: `requested ∩ supported`.
    pub fn intersect(&self, other: &Bitmap4) -> Bitmap4 {
        let len = self.words.len().min(other.words.len());
        let words = (0..len).map(|i| self.words[i] & other.words[i]).collect();
        Bitmap4 { words }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Set bits in ascending order.
    pub fn bits(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for (word, &value) in self.words.iter().enumerate() {
            for bit in 0..32 {
                if value & (1 << bit) != 0 {
                    out.push(word as u32 * 32 + bit);
                }
            }
        }
        out
    }

    pub fn decode(src: &mut impl Read) -> xdr::Result<Self> {
        let len = xdr::read_u32(src)? as usize;
        if len > MAX_BITMAP_WORDS {
            return Err(xdr::Error::MaxElemLimit);
        }
        let mut words = Vec::with_capacity(len);
        for _ in 0..len {
            words.push(xdr::read_u32(src)?);
        }
        Ok(Bitmap4 { words })
    }

    pub fn encode(&self, dest: &mut dyn Write) -> std::io::Result<()> {
        xdr::write_u32(dest, self.words.len() as u32)?;
        for &word in &self.words {
            xdr::write_u32(dest, word)?;
        }
        Ok(())
    }
}

// NFSv4 object types (nfs_ftype4).
pub const NF4REG: u32 = 1;
pub const NF4DIR: u32 = 2;
pub const NF4LNK: u32 = 5;

/// Flat value source for fattr4 encoding. The op handlers fill one of
/// these from pseudo-node or metadata attributes.
#[derive(Debug, Clone)]
pub struct AttrSource {
    pub file_type: u32,
    pub change: u64,
    pub size: u64,
    pub fsid: (u64, u64),
    pub fileid: u64,
    pub mode: u32,
    pub numlinks: u32,
    pub owner: String,
    pub owner_group: String,
    pub space_used: u64,
    pub time_access: (i64, u32),
    pub time_metadata: (i64, u32),
    pub time_modify: (i64, u32),
    pub lease_time: u32,
    pub filehandle: Vec<u8>,
    pub mounted_on_fileid: u64,
}

/// The attribute set this server can encode.
pub fn supported_attrs() -> Bitmap4 {
    Bitmap4::from_bits(&[
        FATTR4_SUPPORTED_ATTRS,
        FATTR4_TYPE,
        FATTR4_FH_EXPIRE_TYPE,
        FATTR4_CHANGE,
        FATTR4_SIZE,
        FATTR4_LINK_SUPPORT,
        FATTR4_SYMLINK_SUPPORT,
        FATTR4_NAMED_ATTR,
        FATTR4_FSID,
        FATTR4_LEASE_TIME,
        FATTR4_FILEHANDLE,
        FATTR4_FILEID,
        FATTR4_MODE,
        FATTR4_NUMLINKS,
        FATTR4_OWNER,
        FATTR4_OWNER_GROUP,
        FATTR4_SPACE_USED,
        FATTR4_TIME_ACCESS,
        FATTR4_TIME_METADATA,
        FATTR4_TIME_MODIFY,
        FATTR4_MOUNTED_ON_FILEID,
    ])
}

fn write_time(dest: &mut dyn Write, time: (i64, u32)) -> std::io::Result<()> {
    xdr::write_u64(dest, time.0 as u64)?;
    xdr::write_u32(dest, time.1)
}

/// Encodes `requested ∩ supported` as `(bitmap, attrlist bytes)`, values
/// in ascending bit order.
pub fn encode_fattr4(
    requested: &Bitmap4,
    source: &AttrSource,
) -> std::io::Result<(Bitmap4, Vec<u8>)> {
    let present = requested.intersect(&supported_attrs());
    let mut data = Vec::new();
    for bit in present.bits() {
        match bit {
            FATTR4_SUPPORTED_ATTRS => supported_attrs().encode(&mut data)?,
            FATTR4_TYPE => xdr::write_u32(&mut data, source.file_type)?,
            FATTR4_FH_EXPIRE_TYPE => {
                xdr::write_u32(&mut data, crate::nfs4::FH4_PERSISTENT)?
            }
            FATTR4_CHANGE => xdr::write_u64(&mut data, source.change)?,
            FATTR4_SIZE => xdr::write_u64(&mut data, source.size)?,
            FATTR4_LINK_SUPPORT => xdr::write_bool(&mut data, true)?,
            FATTR4_SYMLINK_SUPPORT => xdr::write_bool(&mut data, true)?,
            FATTR4_NAMED_ATTR => xdr::write_bool(&mut data, false)?,
            FATTR4_FSID => {
                xdr::write_u64(&mut data, source.fsid.0)?;
                xdr::write_u64(&mut data, source.fsid.1)?;
            }
            FATTR4_LEASE_TIME => xdr::write_u32(&mut data, source.lease_time)?,
            FATTR4_FILEHANDLE => xdr::write_vec(&mut data, &source.filehandle)?,
            FATTR4_FILEID => xdr::write_u64(&mut data, source.fileid)?,
            FATTR4_MODE => xdr::write_u32(&mut data, source.mode)?,
            FATTR4_NUMLINKS => xdr::write_u32(&mut data, source.numlinks)?,
            FATTR4_OWNER => xdr::write_string(&mut data, &source.owner)?,
            FATTR4_OWNER_GROUP => xdr::write_string(&mut data, &source.owner_group)?,
            FATTR4_SPACE_USED => xdr::write_u64(&mut data, source.space_used)?,
            FATTR4_TIME_ACCESS => write_time(&mut data, source.time_access)?,
            FATTR4_TIME_METADATA => write_time(&mut data, source.time_metadata)?,
            FATTR4_TIME_MODIFY => write_time(&mut data, source.time_modify)?,
            FATTR4_MOUNTED_ON_FILEID => xdr::write_u64(&mut data, source.mounted_on_fileid)?,
            _ => unreachable!("bit {bit} is not in supported_attrs"),
        }
    }
    Ok((present, data))
}
