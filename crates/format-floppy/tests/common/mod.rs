//! Image and stream builders shared by the integration tests.

#![allow(dead_code)]

use format_floppy::Density;
use format_floppy::jv3::{JV3_FREE, JV3_HEADER_LEN, entry_size};
use format_floppy::track::{WT_CRC, WT_SYNC_A1};

/// A JV3 image holding `entries` in table order, every data byte `fill`.
pub fn jv3_image(entries: &[(u8, u8, u8)], fill: u8) -> Vec<u8> {
    let mut img = vec![JV3_FREE; JV3_HEADER_LEN];
    let mut data = Vec::new();
    for (i, &(track, sector, flags)) in entries.iter().enumerate() {
        img[i * 3..i * 3 + 3].copy_from_slice(&[track, sector, flags]);
        data.resize(data.len() + entry_size(track, flags), fill);
    }
    img.extend_from_slice(&data);
    img
}

/// The byte stream a formatter hands to Write Track for one IBM track.
pub fn format_stream(
    density: Density,
    cylinder: u8,
    head: u8,
    records: impl IntoIterator<Item = u8>,
    size_code: u8,
    fill: u8,
) -> Vec<u8> {
    let dd = density.is_double();
    let gap = density.gap_byte();
    let (gap4a, sync, gap2, gap3) = if dd { (80, 12, 22, 54) } else { (40, 6, 11, 27) };
    let mark_sync = |s: &mut Vec<u8>| {
        s.extend(std::iter::repeat_n(0x00, sync));
        if dd {
            s.extend_from_slice(&[WT_SYNC_A1; 3]);
        }
    };

    let mut s = vec![gap; gap4a];
    for r in records {
        mark_sync(&mut s);
        s.extend_from_slice(&[0xFE, cylinder, head, r, size_code, WT_CRC]);
        s.extend(std::iter::repeat_n(gap, gap2));
        mark_sync(&mut s);
        s.push(0xFB);
        s.extend(std::iter::repeat_n(fill, 128 << size_code));
        s.push(WT_CRC);
        s.extend(std::iter::repeat_n(gap, gap3));
    }
    s.extend(std::iter::repeat_n(gap, 200));
    s
}
