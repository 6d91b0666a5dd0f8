//! On-disk headers of backing binary files.
//!
//! Every backing file starts with a 10-word file header followed by a
//! block-header table of `num_fields × blocks_per_file` entries, laid out
//! field-major:
//!
//! ```text
//! bytes 0..40     file header            (10 x u32, big endian)
//! bytes 40..      block header table     (field f, block i at
//!                                         40 + (f*blocks_per_file + i)*40)
//! payload regions pointed to by each block header's offset
//! ```
//!
//! All header words are big endian on disk.

use crate::compression::Compression;
use crate::dataset::Layout;
use crate::error::{Result, VolumeError};

/// Number of 32-bit words in the file header and in each block header.
pub const HEADER_WORDS: usize = 10;

/// Byte size of the file header and of each block header.
pub const HEADER_BYTES: usize = HEADER_WORDS * 4;

const COMPRESSION_MASK: u32 = 0xf;
const LAYOUT_BIT: u32 = 0x10;

/// The informational file header at the start of every backing file. Its
/// words are reserved; the engine writes zeros and ignores the contents on
/// read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileHeader {
    /// Reserved words.
    pub words: [u32; HEADER_WORDS],
}

/// One block's header: payload offset, payload byte count, and flags.
///
/// Words 2 and 3 hold the low and high halves of the payload offset,
/// word 4 the payload byte count, and word 5 the flags (low four bits the
/// compression code, bit 4 the layout). The remaining words are reserved.
/// A zero offset or zero byte count marks a block that was never written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHeader {
    words: [u32; HEADER_WORDS],
}

impl BlockHeader {
    /// Payload offset from the start of the file.
    pub fn offset(&self) -> u64 {
        self.words[2] as u64 | (self.words[3] as u64) << 32
    }

    /// Sets the payload offset.
    pub fn set_offset(&mut self, offset: u64) {
        self.words[2] = offset as u32;
        self.words[3] = (offset >> 32) as u32;
    }

    /// Payload byte count. Smaller than the uncompressed block size when
    /// the payload is compressed.
    pub fn bytes(&self) -> u32 {
        self.words[4]
    }

    /// Sets the payload byte count.
    pub fn set_bytes(&mut self, bytes: u32) {
        self.words[4] = bytes;
    }

    /// Decodes the compression code, failing on codes outside the known
    /// set.
    pub fn compression(&self) -> Result<Compression> {
        let code = self.words[5] & COMPRESSION_MASK;
        Compression::from_header_code(code).ok_or(VolumeError::InvalidCompression(code))
    }

    /// Sets the compression code. Codecs without an on-disk code store as
    /// uncompressed.
    pub fn set_compression(&mut self, compression: Compression) {
        let code = compression.header_code().unwrap_or(0);
        self.words[5] = (self.words[5] & !COMPRESSION_MASK) | code;
    }

    /// Decodes the payload layout bit.
    pub fn layout(&self) -> Layout {
        if self.words[5] & LAYOUT_BIT != 0 {
            Layout::RowMajor
        } else {
            Layout::Hz
        }
    }

    /// Sets the payload layout bit.
    pub fn set_layout(&mut self, layout: Layout) {
        match layout {
            Layout::RowMajor => self.words[5] |= LAYOUT_BIT,
            Layout::Hz => self.words[5] &= !LAYOUT_BIT,
        }
    }

    /// Returns true if the header records a written payload.
    pub fn is_present(&self) -> bool {
        self.offset() != 0 && self.bytes() != 0
    }

    /// Resets the header to the never-written state.
    pub fn clear(&mut self) {
        self.words = [0; HEADER_WORDS];
    }

    /// Decodes a header from its big-endian on-disk form.
    pub fn decode(buf: &[u8; HEADER_BYTES]) -> Self {
        let mut words = [0u32; HEADER_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = u32::from_be_bytes(buf[i * 4..i * 4 + 4].try_into().expect("4-byte chunk"));
        }
        Self { words }
    }

    /// Encodes the header into its big-endian on-disk form.
    pub fn encode(&self, buf: &mut [u8; HEADER_BYTES]) {
        for (i, word) in self.words.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
    }
}

/// Byte offset of field `field`'s block-header table within a backing
/// file.
pub fn table_offset(field: usize, blocks_per_file: u32) -> u64 {
    HEADER_BYTES as u64 + (field as u64 * blocks_per_file as u64) * HEADER_BYTES as u64
}

/// Byte size of the full header region: the file header plus every field's
/// block-header table.
pub fn header_region_bytes(num_fields: usize, blocks_per_file: u32) -> u64 {
    HEADER_BYTES as u64 + (num_fields as u64 * blocks_per_file as u64) * HEADER_BYTES as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_roundtrip_through_encoding() {
        let mut header = BlockHeader::default();
        header.set_offset(0x1_2345_6789);
        header.set_bytes(0x40_000);
        header.set_compression(Compression::Zip);
        header.set_layout(Layout::RowMajor);

        let mut buf = [0u8; HEADER_BYTES];
        header.encode(&mut buf);
        let back = BlockHeader::decode(&buf);

        assert_eq!(back.offset(), 0x1_2345_6789);
        assert_eq!(back.bytes(), 0x40_000);
        assert_eq!(back.compression().unwrap(), Compression::Zip);
        assert_eq!(back.layout(), Layout::RowMajor);
        assert_eq!(back, header);
    }

    #[test]
    fn words_are_big_endian_on_disk() {
        let mut header = BlockHeader::default();
        header.set_bytes(0x0102_0304);
        let mut buf = [0u8; HEADER_BYTES];
        header.encode(&mut buf);
        assert_eq!(&buf[16..20], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn presence_needs_offset_and_bytes() {
        let mut header = BlockHeader::default();
        assert!(!header.is_present());
        header.set_offset(4096);
        assert!(!header.is_present());
        header.set_bytes(128);
        assert!(header.is_present());
        header.clear();
        assert!(!header.is_present());
    }

    #[test]
    fn bad_compression_code_is_fatal() {
        let mut buf = [0u8; HEADER_BYTES];
        buf[23] = 7; // word 5, low bits
        let header = BlockHeader::decode(&buf);
        assert!(matches!(
            header.compression(),
            Err(VolumeError::InvalidCompression(7))
        ));
    }

    #[test]
    fn table_offsets_are_field_major() {
        assert_eq!(table_offset(0, 256), 40);
        assert_eq!(table_offset(1, 256), 40 + 256 * 40);
        assert_eq!(table_offset(3, 4), 40 + 12 * 40);
        assert_eq!(header_region_bytes(2, 4), 40 + 8 * 40);
    }
}
