//! # IDC Container
//!
//! The self-describing binary interchange used for features, matches,
//! vocabularies, and VLAD vectors: a magic-prefixed fixed header, a JSON
//! descriptor, and an 8-byte-aligned payload of named typed blobs.
//!
//! ```text
//! offset  size           field
//! 0       4              magic = 0x54415349 ("ISAT", LE u32)
//! 4       4              format version (LE u32)
//! 8       8              json_size (LE u64)
//! 16      json_size      JSON descriptor (UTF-8)
//! 16+js   0..=7          zero padding to an 8-byte boundary
//! ...     payload        concatenated blobs, offsets relative to here
//! ```

pub mod reader;
pub mod schema;
pub mod writer;

pub use reader::ContainerReader;
pub use schema::{feature_metadata, match_metadata, DescriptorSchema};
pub use writer::ContainerWriter;

/// "ISAT" as a little-endian u32.
pub const MAGIC: u32 = 0x5441_5349;
pub const FORMAT_VERSION: u32 = 1;
pub const ALIGNMENT: usize = 8;
/// magic + version + json_size
pub const HEADER_SIZE: usize = 16;

/// Zero bytes needed after `offset` to reach the next 8-byte boundary.
pub fn padding_for(offset: usize) -> usize {
	(ALIGNMENT - (offset % ALIGNMENT)) % ALIGNMENT
}

/// One entry of the `blobs` table in the JSON descriptor. Offsets are
/// relative to the payload start, not to the file start.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlobDescriptor {
	pub name: String,
	pub dtype: String,
	pub shape: Vec<usize>,
	pub offset: u64,
	pub size: u64,
}
