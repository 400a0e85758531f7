//! Format detection from the first bytes of an image.

use crate::dmk::{DMK_HEADER_LEN, DmkHeader};
use crate::image::{FormatTag, Geometry};
use crate::jv3;
use crate::{Error, Result};

/// How much of the image detection looks at.
pub const DETECT_WINDOW: usize = 64 * 1024;

/// Decide which driver serves an image.
///
/// JV3 wins when its sector table accounts for the file size exactly. A DMK
/// header is accepted when its track length is in range and divides the
/// data area. Anything else is a headerless image if the host supplied
/// usable geometry.
pub fn detect_format(head: &[u8], file_size: u64, geometry: Option<&Geometry>) -> Result<FormatTag> {
    if let Some(expected) = jv3::expected_size(head) {
        if expected == file_size {
            return Ok(FormatTag::Jv3);
        }
    }

    if let Some(raw) = head.first_chunk::<DMK_HEADER_LEN>() {
        if DmkHeader::parse(raw).plausible(file_size) {
            return Ok(FormatTag::Dmk);
        }
    }

    match geometry {
        Some(g) if g.is_usable() => Ok(FormatTag::Raw),
        _ => Err(Error::FormatUnrecognized),
    }
}
