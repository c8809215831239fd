#![forbid(unsafe_code)]
//! Page header shared by every page the pool caches.

use core::convert::{TryFrom, TryInto};

use super::{Lsn, PageId, PoolError, Result, StoreId};

/// Magic bytes at the start of every formatted page.
pub const PAGE_MAGIC: [u8; 4] = *b"SWZP";
/// Current header layout version.
pub const PAGE_FORMAT_VERSION: u16 = 1;
/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 8192;
/// Smallest supported page size.
pub const MIN_PAGE_SIZE: u32 = 4096;
/// Largest supported page size.
pub const MAX_PAGE_SIZE: u32 = 65536;
/// Header length in bytes.
pub const PAGE_HDR_LEN: usize = 32;

pub mod header {
    //! Byte offsets for fixed header fields.
    use core::ops::Range;

    /// Magic bytes.
    pub const MAGIC: Range<usize> = 0..4;
    /// Layout version.
    pub const FORMAT_VERSION: Range<usize> = 4..6;
    /// [`super::PageTag`] byte.
    pub const PAGE_TAG: usize = 6;
    /// Must be zero.
    pub const RESERVED: usize = 7;
    /// Page number.
    pub const PAGE_ID: Range<usize> = 8..12;
    /// Owning store.
    pub const STORE: Range<usize> = 12..16;
    /// LSN of the last logged update.
    pub const LSN: Range<usize> = 16..24;
    /// Page size the image was written with.
    pub const PAGE_SIZE: Range<usize> = 24..28;
    /// Checksum over the whole image with this field zeroed.
    pub const CRC32: Range<usize> = 28..32;
}

/// Logical page type.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageTag {
    /// B-tree node; these pages form trees and may hold child slots.
    BTree = 1,
    /// Allocation bitmap page.
    Alloc = 2,
    /// Store directory page.
    StoreNode = 3,
}

impl PageTag {
    /// Raw tag byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PageTag {
    type Error = PoolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageTag::BTree),
            2 => Ok(PageTag::Alloc),
            3 => Ok(PageTag::StoreNode),
            _ => Err(PoolError::Corruption("unknown page tag")),
        }
    }
}

/// Decoded page header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// Layout version.
    pub format_version: u16,
    /// Page type.
    pub tag: PageTag,
    /// Page number.
    pub page_id: PageId,
    /// Owning store.
    pub store: StoreId,
    /// LSN of the last logged update.
    pub lsn: Lsn,
    /// Page size in bytes.
    pub page_size: u32,
    /// Stored checksum.
    pub crc32: u32,
}

impl PageHeader {
    /// Header for a freshly formatted page.
    pub fn new(page_id: PageId, store: StoreId, tag: PageTag, page_size: u32) -> Result<Self> {
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(PoolError::Invalid("page size smaller than header"));
        }
        Ok(Self {
            format_version: PAGE_FORMAT_VERSION,
            tag,
            page_id,
            store,
            lsn: Lsn::NULL,
            page_size,
            crc32: 0,
        })
    }

    /// Sets the header LSN.
    pub fn with_lsn(mut self, lsn: Lsn) -> Self {
        self.lsn = lsn;
        self
    }

    /// Writes the header into the first [`PAGE_HDR_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < PAGE_HDR_LEN {
            return Err(PoolError::Invalid("page header buffer too small"));
        }
        let hdr = &mut dst[..PAGE_HDR_LEN];
        hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
        hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
        hdr[header::PAGE_TAG] = self.tag.as_u8();
        hdr[header::RESERVED] = 0;
        hdr[header::PAGE_ID].copy_from_slice(&self.page_id.0.to_be_bytes());
        hdr[header::STORE].copy_from_slice(&self.store.0.to_be_bytes());
        hdr[header::LSN].copy_from_slice(&self.lsn.0.to_be_bytes());
        hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
        Ok(())
    }

    /// Parses and validates a header.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < PAGE_HDR_LEN {
            return Err(PoolError::Corruption("page header truncated"));
        }
        let hdr = &src[..PAGE_HDR_LEN];
        let magic: [u8; 4] = hdr[header::MAGIC].try_into().unwrap();
        if magic != PAGE_MAGIC {
            return Err(PoolError::Corruption("invalid page magic"));
        }
        let format_version = u16::from_be_bytes(hdr[header::FORMAT_VERSION].try_into().unwrap());
        if format_version != PAGE_FORMAT_VERSION {
            return Err(PoolError::Corruption("unsupported page format version"));
        }
        if hdr[header::RESERVED] != 0 {
            return Err(PoolError::Corruption("page header reserved byte not zero"));
        }
        let tag = PageTag::try_from(hdr[header::PAGE_TAG])?;
        let page_size = u32::from_be_bytes(hdr[header::PAGE_SIZE].try_into().unwrap());
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(PoolError::Corruption("page size smaller than header"));
        }
        Ok(Self {
            format_version,
            tag,
            page_id: read_page_id(hdr),
            store: StoreId(u32::from_be_bytes(hdr[header::STORE].try_into().unwrap())),
            lsn: read_lsn(hdr),
            page_size,
            crc32: u32::from_be_bytes(hdr[header::CRC32].try_into().unwrap()),
        })
    }
}

/// Zeroes `buf` and writes a fresh header for `page_id`.
pub fn format(buf: &mut [u8], page_id: PageId, store: StoreId, tag: PageTag) -> Result<()> {
    let page_size = u32::try_from(buf.len()).map_err(|_| PoolError::Invalid("page too large"))?;
    buf.fill(0);
    PageHeader::new(page_id, store, tag, page_size)?.encode(buf)
}

/// Reads the header LSN without validating the rest of the header.
pub fn read_lsn(buf: &[u8]) -> Lsn {
    Lsn(u64::from_be_bytes(buf[header::LSN].try_into().unwrap()))
}

/// Overwrites the header LSN.
pub fn write_lsn(buf: &mut [u8], lsn: Lsn) {
    buf[header::LSN].copy_from_slice(&lsn.0.to_be_bytes());
}

/// Reads the header page number.
pub fn read_page_id(buf: &[u8]) -> PageId {
    PageId(u32::from_be_bytes(buf[header::PAGE_ID].try_into().unwrap()))
}

/// Reads the header tag.
pub fn read_tag(buf: &[u8]) -> Result<PageTag> {
    PageTag::try_from(buf[header::PAGE_TAG])
}

/// Zeroes the stored checksum.
pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
    if buf.len() < header::CRC32.end {
        return Err(PoolError::Invalid("page header buffer too small"));
    }
    buf[header::CRC32].fill(0);
    Ok(())
}

/// CRC32 of the image around the checksum field, salted with the page id so
/// that a valid image written to the wrong location fails verification.
fn image_crc32(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&read_page_id(buf).0.to_be_bytes());
    hasher.update(&buf[..header::CRC32.start]);
    hasher.update(&buf[header::CRC32.end..]);
    hasher.finalize()
}

/// Computes and stores the checksum of a full page image.
pub fn stamp_crc32(buf: &mut [u8]) {
    let crc = image_crc32(buf);
    buf[header::CRC32].copy_from_slice(&crc.to_be_bytes());
}

/// Checks the stored checksum of a full page image.
pub fn verify_crc32(buf: &[u8]) -> Result<()> {
    let stored = u32::from_be_bytes(buf[header::CRC32].try_into().unwrap());
    if stored != image_crc32(buf) {
        return Err(PoolError::Corruption("page crc mismatch"));
    }
    Ok(())
}
