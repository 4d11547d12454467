//! IDC file reading

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::ui;

use super::{padding_for, BlobDescriptor, FORMAT_VERSION, HEADER_SIZE, MAGIC};

/// Parses the header and blob table up front; blob payloads are read on
/// demand, each read opening its own file handle.
pub struct ContainerReader {
	path: PathBuf,
	metadata: serde_json::Value,
	blobs: Vec<BlobDescriptor>,
	payload_offset: u64,
}

impl ContainerReader {
	pub fn open(path: &Path) -> Result<Self> {
		let mut file =
			File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;

		let mut prefix = [0u8; HEADER_SIZE];
		file.read_exact(&mut prefix)
			.with_context(|| format!("Truncated header in {}", path.display()))?;

		let magic = u32::from_le_bytes(prefix[0..4].try_into().unwrap());
		if magic != MAGIC {
			bail!("Invalid magic number {:#010x} in {}", magic, path.display());
		}

		let version = u32::from_le_bytes(prefix[4..8].try_into().unwrap());
		if version != FORMAT_VERSION {
			// Might still be compatible, so only warn.
			ui::warn(&format!(
				"Format version mismatch in {}: {} (expected {})",
				path.display(),
				version,
				FORMAT_VERSION
			));
		}

		let json_size = u64::from_le_bytes(prefix[8..16].try_into().unwrap());
		let mut json_bytes = vec![0u8; json_size as usize];
		file.read_exact(&mut json_bytes)
			.with_context(|| format!("Truncated JSON descriptor in {}", path.display()))?;

		let metadata: serde_json::Value = serde_json::from_slice(&json_bytes)
			.with_context(|| format!("Invalid JSON descriptor in {}", path.display()))?;

		let blobs: Vec<BlobDescriptor> = match metadata.get("blobs") {
			Some(value) => serde_json::from_value(value.clone())
				.with_context(|| format!("Invalid blob table in {}", path.display()))?,
			None => Vec::new(),
		};

		let header_size = HEADER_SIZE + json_size as usize;
		let payload_offset = (header_size + padding_for(header_size)) as u64;

		ui::debug(&format!(
			"Parsed {} (payload at {}, {} blobs)",
			path.display(),
			payload_offset,
			blobs.len()
		));

		Ok(Self {
			path: path.to_path_buf(),
			metadata,
			blobs,
			payload_offset,
		})
	}

	pub fn metadata(&self) -> &serde_json::Value {
		&self.metadata
	}

	pub fn blob_descriptor(&self, name: &str) -> Option<&BlobDescriptor> {
		self.blobs.iter().find(|blob| blob.name == name)
	}

	/// Raw bytes of a named blob. A missing name reads as empty; a short
	/// payload is an error.
	pub fn read_bytes(&self, name: &str) -> Result<Vec<u8>> {
		let Some(desc) = self.blob_descriptor(name) else {
			return Ok(Vec::new());
		};
		let mut file = File::open(&self.path)
			.with_context(|| format!("Cannot open {}", self.path.display()))?;
		file.seek(SeekFrom::Start(self.payload_offset + desc.offset))?;
		let mut data = vec![0u8; desc.size as usize];
		file.read_exact(&mut data).with_context(|| {
			format!("Truncated blob '{}' in {}", name, self.path.display())
		})?;
		Ok(data)
	}

	pub fn read_f32(&self, name: &str) -> Result<Vec<f32>> {
		let bytes = self.read_bytes(name)?;
		if bytes.len() % 4 != 0 {
			bail!(
				"Blob '{}' in {} has size {} not divisible by 4",
				name,
				self.path.display(),
				bytes.len()
			);
		}
		Ok(bytes
			.chunks_exact(4)
			.map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
			.collect())
	}

	pub fn read_u16(&self, name: &str) -> Result<Vec<u16>> {
		let bytes = self.read_bytes(name)?;
		if bytes.len() % 2 != 0 {
			bail!(
				"Blob '{}' in {} has size {} not divisible by 2",
				name,
				self.path.display(),
				bytes.len()
			);
		}
		Ok(bytes
			.chunks_exact(2)
			.map(|chunk| u16::from_le_bytes(chunk.try_into().unwrap()))
			.collect())
	}
}
