//! Fixed-size sector blocks
//!
//! Every logical file is stored as a chain of 520-byte sectors in the data
//! container. Each sector carries a small header naming its owner, so reads
//! verify themselves against the caller's expectation:
//!
//! ```text
//! Regular  (file id <= 65535): [file_id:u16][chunk:u16][next:u24][category:u8][data: 512]
//! Extended (file id >  65535): [file_id:u32][chunk:u16][next:u24][category:u8][data: 510]
//! ```
//!
//! All integers are big-endian. A raw `next` of zero marks the end of a chain;
//! sector 0 of the container is reserved and never holds data.

use crate::core::error::{CacheError, Result};

/// Size of one sector on disk
pub const SECTOR_SIZE: usize = 520;

/// Raw `next` value that terminates a chain
pub const END_OF_CHAIN: u32 = 0;

/// Largest sector number expressible in the 24-bit `next` field
pub const MAX_SECTOR: u32 = 0x00FF_FFFF;

/// Largest file id that still uses the regular header
pub const MAX_REGULAR_FILE_ID: u32 = u16::MAX as u32;

/// Sector header layout, chosen by file id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    /// 2-byte file id, 512-byte payload
    Regular,
    /// 4-byte file id, 510-byte payload
    Extended,
}

impl HeaderLayout {
    pub fn for_file_id(file_id: u32) -> Self {
        if file_id > MAX_REGULAR_FILE_ID {
            HeaderLayout::Extended
        } else {
            HeaderLayout::Regular
        }
    }

    pub const fn header_len(self) -> usize {
        match self {
            HeaderLayout::Regular => 8,
            HeaderLayout::Extended => 10,
        }
    }

    pub const fn data_len(self) -> usize {
        SECTOR_SIZE - self.header_len()
    }
}

/// Link from one sector to the next in its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorLink {
    Next(u32),
    End,
}

impl SectorLink {
    fn from_raw(raw: u32) -> Self {
        if raw == END_OF_CHAIN {
            SectorLink::End
        } else {
            SectorLink::Next(raw)
        }
    }

    fn to_raw(self) -> Result<u32> {
        match self {
            SectorLink::End => Ok(END_OF_CHAIN),
            SectorLink::Next(END_OF_CHAIN) => Err(CacheError::InvalidInput(
                "sector 0 is reserved and cannot be linked to".into(),
            )),
            SectorLink::Next(n) if n > MAX_SECTOR => Err(CacheError::ContainerFull),
            SectorLink::Next(n) => Ok(n),
        }
    }
}

/// One decoded sector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    /// Sector number in the data container (0 until placed)
    pub position: u32,

    /// Owning category
    pub category: u8,

    /// Owning file id
    pub file_id: u32,

    /// Index of this sector within the file's chain
    pub chunk: u16,

    /// Next sector; `None` until the store has placed the chain
    pub next: Option<SectorLink>,

    /// Payload, at most `layout().data_len()` bytes
    pub data: Vec<u8>,
}

impl Sector {
    pub fn layout(&self) -> HeaderLayout {
        HeaderLayout::for_file_id(self.file_id)
    }

    /// Decode a block read from `position`, checking it belongs to the
    /// expected `(category, file_id, chunk)`.
    pub fn decode(
        position: u32,
        block: &[u8; SECTOR_SIZE],
        expected_category: u8,
        expected_file_id: u32,
        expected_chunk: u16,
    ) -> Result<Self> {
        let layout = HeaderLayout::for_file_id(expected_file_id);

        let (file_id, rest) = match layout {
            HeaderLayout::Regular => (u16::from_be_bytes([block[0], block[1]]) as u32, 2),
            HeaderLayout::Extended => (
                u32::from_be_bytes([block[0], block[1], block[2], block[3]]),
                4,
            ),
        };
        let chunk = u16::from_be_bytes([block[rest], block[rest + 1]]);
        let next = u32::from_be_bytes([0, block[rest + 2], block[rest + 3], block[rest + 4]]);
        let category = block[rest + 5];

        if file_id != expected_file_id {
            return Err(CacheError::Corruption(format!(
                "sector {}: file id mismatch (expected {}, found {})",
                position, expected_file_id, file_id
            )));
        }
        if chunk != expected_chunk {
            return Err(CacheError::Corruption(format!(
                "sector {}: chunk mismatch (expected {}, found {})",
                position, expected_chunk, chunk
            )));
        }
        if category != expected_category {
            return Err(CacheError::Corruption(format!(
                "sector {}: category mismatch (expected {}, found {})",
                position, expected_category, category
            )));
        }
        if next != END_OF_CHAIN && next == position {
            return Err(CacheError::Corruption(format!(
                "sector {} links to itself",
                position
            )));
        }

        Ok(Sector {
            position,
            category,
            file_id,
            chunk,
            next: Some(SectorLink::from_raw(next)),
            data: block[layout.header_len()..].to_vec(),
        })
    }

    /// Encode to a full on-disk block. The chain link must already be set.
    pub fn encode(&self) -> Result<[u8; SECTOR_SIZE]> {
        let next = self
            .next
            .ok_or_else(|| {
                CacheError::InvalidInput(format!(
                    "sector {} of file {} has no next link assigned",
                    self.chunk, self.file_id
                ))
            })?
            .to_raw()?;

        let layout = self.layout();
        if self.data.len() > layout.data_len() {
            return Err(CacheError::InvalidInput(format!(
                "sector payload too large: {} bytes (max: {})",
                self.data.len(),
                layout.data_len()
            )));
        }

        let mut block = [0u8; SECTOR_SIZE];
        let rest = match layout {
            HeaderLayout::Regular => {
                block[0..2].copy_from_slice(&(self.file_id as u16).to_be_bytes());
                2
            }
            HeaderLayout::Extended => {
                block[0..4].copy_from_slice(&self.file_id.to_be_bytes());
                4
            }
        };
        block[rest..rest + 2].copy_from_slice(&self.chunk.to_be_bytes());
        block[rest + 2..rest + 5].copy_from_slice(&next.to_be_bytes()[1..]);
        block[rest + 5] = self.category;

        let start = layout.header_len();
        block[start..start + self.data.len()].copy_from_slice(&self.data);
        Ok(block)
    }
}

/// Split a payload into unplaced sectors for `(category, file_id)`.
///
/// The final chunk is zero-padded to the full payload width. Positions and
/// links are assigned later by the store.
pub fn split_payload(bytes: &[u8], category: u8, file_id: u32) -> Result<Vec<Sector>> {
    let data_len = HeaderLayout::for_file_id(file_id).data_len();
    let count = bytes.len().div_ceil(data_len);
    if count > u16::MAX as usize + 1 {
        return Err(CacheError::InvalidInput(format!(
            "payload of {} bytes needs {} sectors (max: {})",
            bytes.len(),
            count,
            u16::MAX as usize + 1
        )));
    }

    Ok(bytes
        .chunks(data_len)
        .enumerate()
        .map(|(chunk, part)| {
            let mut data = part.to_vec();
            data.resize(data_len, 0);
            Sector {
                position: 0,
                category,
                file_id,
                chunk: chunk as u16,
                next: None,
                data,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed(file_id: u32, chunk: u16, next: SectorLink) -> Sector {
        let layout = HeaderLayout::for_file_id(file_id);
        Sector {
            position: 7,
            category: 3,
            file_id,
            chunk,
            next: Some(next),
            data: (0..layout.data_len()).map(|i| i as u8).collect(),
        }
    }

    #[test]
    fn test_layout_selection() {
        assert_eq!(HeaderLayout::for_file_id(0), HeaderLayout::Regular);
        assert_eq!(HeaderLayout::for_file_id(65535), HeaderLayout::Regular);
        assert_eq!(HeaderLayout::for_file_id(65536), HeaderLayout::Extended);
        assert_eq!(HeaderLayout::Regular.data_len(), 512);
        assert_eq!(HeaderLayout::Extended.data_len(), 510);
    }

    #[test]
    fn test_regular_header_bytes() {
        let sector = placed(0x1234, 2, SectorLink::Next(0x010203));
        let block = sector.encode().unwrap();
        assert_eq!(&block[..8], &[0x12, 0x34, 0x00, 0x02, 0x01, 0x02, 0x03, 3]);
        assert_eq!(block[8], 0);
        assert_eq!(block[9], 1);
    }

    #[test]
    fn test_extended_header_bytes() {
        let sector = placed(70_000, 1, SectorLink::End);
        let block = sector.encode().unwrap();
        assert_eq!(&block[..4], &70_000u32.to_be_bytes());
        assert_eq!(&block[4..10], &[0x00, 0x01, 0x00, 0x00, 0x00, 3]);
    }

    #[test]
    fn test_decode_regular_and_extended() {
        for file_id in [5u32, 65535, 65536, 1_000_000] {
            let sector = placed(file_id, 4, SectorLink::Next(99));
            let block = sector.encode().unwrap();
            let decoded = Sector::decode(7, &block, 3, file_id, 4).unwrap();
            assert_eq!(decoded, sector);
        }
    }

    #[test]
    fn test_encode_requires_link() {
        let mut sector = placed(1, 0, SectorLink::End);
        sector.next = None;
        assert!(matches!(sector.encode(), Err(CacheError::InvalidInput(_))));

        sector.next = Some(SectorLink::Next(0));
        assert!(matches!(sector.encode(), Err(CacheError::InvalidInput(_))));

        sector.next = Some(SectorLink::Next(MAX_SECTOR + 1));
        assert!(matches!(sector.encode(), Err(CacheError::ContainerFull)));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut sector = placed(1, 0, SectorLink::End);
        sector.data.push(0);
        assert!(matches!(sector.encode(), Err(CacheError::InvalidInput(_))));
    }

    #[test]
    fn test_wrong_chunk_is_corruption() {
        let block = placed(12, 3, SectorLink::End).encode().unwrap();
        let result = Sector::decode(7, &block, 3, 12, 2);
        assert!(matches!(result, Err(CacheError::Corruption(_))));
    }

    #[test]
    fn test_wrong_category_or_id_is_corruption() {
        let block = placed(12, 0, SectorLink::End).encode().unwrap();
        assert!(matches!(
            Sector::decode(7, &block, 4, 12, 0),
            Err(CacheError::Corruption(_))
        ));
        assert!(matches!(
            Sector::decode(7, &block, 3, 13, 0),
            Err(CacheError::Corruption(_))
        ));
    }

    #[test]
    fn test_layout_mismatch_is_corruption() {
        // Written with the extended layout, read back expecting a regular id
        let block = placed(70_000, 0, SectorLink::End).encode().unwrap();
        assert!(matches!(
            Sector::decode(7, &block, 3, 70_000 & 0xFFFF, 0),
            Err(CacheError::Corruption(_))
        ));

        // Written regular, read back expecting an extended id
        let block = placed(4, 0, SectorLink::End).encode().unwrap();
        assert!(matches!(
            Sector::decode(7, &block, 3, 4 + 65536, 0),
            Err(CacheError::Corruption(_))
        ));
    }

    #[test]
    fn test_self_link_is_corruption() {
        let block = placed(1, 0, SectorLink::Next(7)).encode().unwrap();
        assert!(matches!(
            Sector::decode(7, &block, 3, 1, 0),
            Err(CacheError::Corruption(_))
        ));
    }

    #[test]
    fn test_split_payload_chunks() {
        let data: Vec<u8> = (0..1100u32).map(|i| i as u8).collect();
        let sectors = split_payload(&data, 2, 9).unwrap();
        assert_eq!(sectors.len(), 3);
        for (i, sector) in sectors.iter().enumerate() {
            assert_eq!(sector.chunk as usize, i);
            assert_eq!(sector.data.len(), 512);
            assert!(sector.next.is_none());
        }
        assert_eq!(&sectors[2].data[..76], &data[1024..]);
        assert!(sectors[2].data[76..].iter().all(|&b| b == 0));

        let extended = split_payload(&data, 2, 100_000).unwrap();
        assert_eq!(extended.len(), 3);
        assert_eq!(extended[0].data.len(), 510);
    }

    #[test]
    fn test_split_empty_payload() {
        assert!(split_payload(&[], 0, 0).unwrap().is_empty());
    }
}
