//! Floppy disk images for FM/MFM controllers.
//!
//! Three on-disk formats are served through one [`DiskImage`] handle:
//!
//! - **JV3**: fixed sector table plus data, see [`jv3`].
//! - **DMK**: one raw encoded track per block with an IDAM table, see [`dmk`].
//! - **Raw**: headerless sectors laid out by host [`Geometry`].
//!
//! The format is detected on first access and a per-image cache is built
//! lazily. All sector operations act on the image's current physical
//! cylinder, which the controller moves as it steps the head.
//!
//! Corrupt images never panic: bad CRCs and missing address marks are
//! reported through [`IdFlags`] or an [`Error`] the controller turns into
//! status bits.

#![allow(clippy::cast_possible_truncation)]

pub mod chrn;
pub mod crc;
pub mod detect;
pub mod dmk;
mod error;
mod floppy;
pub mod image;
pub mod jv3;
mod raw;
pub mod registry;
pub mod store;
pub mod track;

pub use chrn::{ChrnId, Density, IdFlags};
pub use error::{CrcField, Error, Result};
pub use image::{DiskImage, FormatTag, Geometry};
pub use registry::{ImageId, ImageKey, ImageRegistry};
pub use store::{FileStore, ImageStore, MemStore};
