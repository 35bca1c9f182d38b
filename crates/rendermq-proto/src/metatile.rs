//! On-wire metatile container: a fixed 8x8 block of tiles at one zoom,
//! packed as one or more format-headers followed by the concatenated tile
//! bytes for each header.
//!
//! Layout (all integers little-endian, matching the renderer's native x86
//! byte order — see DESIGN NOTES in SPEC_FULL.md for why this isn't
//! parameterised):
//!
//! ```text
//! [ header(format_0) ][ header(format_1) ]...  -- one per requested format
//! [ tile(0,0) tile(1,0) ... tile(7,7) for format_0 ]
//! [ tile(0,0) tile(1,0) ... tile(7,7) for format_1 ]
//! ```
//!
//! Each header is `magic(4) count(i32) x(i32) y(i32) z(i32) fmt(i32)` followed
//! by 64 `(offset: i32, size: i32)` entries, index `y*8 + x`, where offsets
//! are relative to the start of the whole buffer (not the header) and a
//! `size` of 0 marks an absent tile.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Cursor, Write};

use crate::{Format, ProtoError, METATILE};

const MAGIC: &[u8; 4] = b"META";
const ENTRY_COUNT: usize = (METATILE * METATILE) as usize;
const HEADER_SIZE: usize = 4 + 4 * 5 + ENTRY_COUNT * 8;

/// One format's worth of tile data to pack into a metatile: 64 entries,
/// indexed `y * 8 + x`, `None` for tiles absent from this metatile (e.g. a
/// shallow zoom level that doesn't cover a full 8x8 block).
#[derive(Debug, Clone)]
pub struct Section {
    pub format: Format,
    pub tiles: Vec<Option<Vec<u8>>>,
}

impl Section {
    pub fn new(format: Format) -> Section {
        Section {
            format,
            tiles: vec![None; ENTRY_COUNT],
        }
    }

    pub fn set(&mut self, x: i32, y: i32, bytes: Vec<u8>) {
        self.tiles[tile_index(x, y)] = Some(bytes);
    }
}

fn tile_index(x: i32, y: i32) -> usize {
    ((y & (METATILE - 1)) * METATILE + (x & (METATILE - 1))) as usize
}

/// Packs one or more format sections into a metatile buffer.
pub fn pack(base_x: i32, base_y: i32, z: i32, sections: &[Section]) -> Vec<u8> {
    let mut offsets = Vec::with_capacity(sections.len());
    let mut offset = (HEADER_SIZE * sections.len()) as i32;
    for section in sections {
        let mut entries = Vec::with_capacity(ENTRY_COUNT);
        for tile in &section.tiles {
            match tile {
                Some(bytes) => {
                    entries.push((offset, bytes.len() as i32));
                    offset += bytes.len() as i32;
                }
                None => entries.push((0, 0)),
            }
        }
        offsets.push(entries);
    }

    let mut buf = Vec::with_capacity(offset as usize);
    for (section, entries) in sections.iter().zip(&offsets) {
        write_header(&mut buf, base_x, base_y, z, section.format, entries);
    }
    for section in sections {
        for tile in &section.tiles {
            if let Some(bytes) = tile {
                buf.write_all(bytes).unwrap();
            }
        }
    }
    buf
}

fn write_header(buf: &mut Vec<u8>, x: i32, y: i32, z: i32, format: Format, entries: &[(i32, i32)]) {
    buf.write_all(MAGIC).unwrap();
    buf.write_i32::<LE>(ENTRY_COUNT as i32).unwrap();
    buf.write_i32::<LE>(x).unwrap();
    buf.write_i32::<LE>(y).unwrap();
    buf.write_i32::<LE>(z).unwrap();
    buf.write_i32::<LE>(format.bits() as i32).unwrap();
    for (off, size) in entries {
        buf.write_i32::<LE>(*off).unwrap();
        buf.write_i32::<LE>(*size).unwrap();
    }
}

/// A parsed metatile header: its tile coordinates, format, and the
/// buffer-relative `(offset, size)` table for each of the 64 tiles.
#[derive(Debug, Clone)]
pub struct Header {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub format: Format,
    pub entries: Vec<(i32, i32)>,
}

/// Scans consecutive header-sized blocks from the start of `bytes`, the way
/// the original reader does: stop at the first block that doesn't start
/// with the magic bytes (which is either corrupt input or the start of tile
/// data).
pub fn scan_headers(bytes: &[u8]) -> impl Iterator<Item = Header> + '_ {
    let header_count = if bytes.len() < HEADER_SIZE {
        0
    } else {
        bytes.len() / HEADER_SIZE
    };
    (0..header_count)
        .map(move |i| parse_header(&bytes[i * HEADER_SIZE..(i + 1) * HEADER_SIZE]))
        .take_while(|h| h.is_some())
        .flatten()
}

fn parse_header(block: &[u8]) -> Option<Header> {
    if &block[0..4] != MAGIC {
        return None;
    }
    let mut cur = Cursor::new(&block[4..]);
    let count = cur.read_i32::<LE>().ok()? as usize;
    let x = cur.read_i32::<LE>().ok()?;
    let y = cur.read_i32::<LE>().ok()?;
    let z = cur.read_i32::<LE>().ok()?;
    let fmt = cur.read_i32::<LE>().ok()?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let off = cur.read_i32::<LE>().ok()?;
        let size = cur.read_i32::<LE>().ok()?;
        entries.push((off, size));
    }
    Some(Header {
        x,
        y,
        z,
        format: Format::from_bits(fmt as u8),
        entries,
    })
}

/// Finds the header for `format` among `bytes`'s contiguous headers.
pub fn unpack(bytes: &[u8], format: Format) -> Result<Header, ProtoError> {
    let mut seen_any = false;
    for header in scan_headers(bytes) {
        seen_any = true;
        if header.format == format {
            return Ok(header);
        }
    }
    if !seen_any {
        Err(ProtoError::CorruptMetatile)
    } else {
        Err(ProtoError::FormatMissing)
    }
}

/// Returns the byte range of tile `(sub_x, sub_y)` for `format` within
/// `bytes`. A zero-size entry (absent tile) is reported as [`ProtoError::FormatMissing`].
pub fn slice(bytes: &[u8], sub_x: i32, sub_y: i32, format: Format) -> Result<&[u8], ProtoError> {
    let header = unpack(bytes, format)?;
    let idx = tile_index(sub_x, sub_y);
    let (offset, size) = header.entries[idx];
    if size == 0 {
        return Err(ProtoError::FormatMissing);
    }
    let (offset, size) = (offset as usize, size as usize);
    bytes
        .get(offset..offset + size)
        .ok_or(ProtoError::TruncatedMetatile)
}
