//! IDC file writing

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::ui;

use super::{padding_for, BlobDescriptor, FORMAT_VERSION, HEADER_SIZE, MAGIC};

/// Accumulates metadata and payload blobs in memory, then emits the
/// container in one pass. Blob offsets are assigned in append order.
pub struct ContainerWriter {
	path: PathBuf,
	metadata: serde_json::Value,
	blobs: Vec<BlobDescriptor>,
	payload: Vec<u8>,
}

impl ContainerWriter {
	pub fn new(path: &Path) -> Self {
		Self {
			path: path.to_path_buf(),
			metadata: serde_json::json!({}),
			blobs: Vec::new(),
			payload: Vec::new(),
		}
	}

	/// Replace the free-form metadata tree. The `blobs` table is managed by
	/// the writer and overwrites any same-named key at write time.
	pub fn set_metadata(&mut self, metadata: serde_json::Value) {
		self.metadata = metadata;
	}

	/// Append raw bytes as a named blob.
	pub fn add_blob(&mut self, name: &str, data: &[u8], dtype: &str, shape: &[usize]) {
		self.blobs.push(BlobDescriptor {
			name: name.to_string(),
			dtype: dtype.to_string(),
			shape: shape.to_vec(),
			offset: self.payload.len() as u64,
			size: data.len() as u64,
		});
		self.payload.extend_from_slice(data);
	}

	/// Append a float32 blob.
	pub fn add_blob_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
		let mut bytes = Vec::with_capacity(data.len() * 4);
		for value in data {
			bytes.extend_from_slice(&value.to_le_bytes());
		}
		self.add_blob(name, &bytes, "float32", shape);
	}

	/// Append a uint16 blob.
	pub fn add_blob_u16(&mut self, name: &str, data: &[u16], shape: &[usize]) {
		let mut bytes = Vec::with_capacity(data.len() * 2);
		for value in data {
			bytes.extend_from_slice(&value.to_le_bytes());
		}
		self.add_blob(name, &bytes, "uint16", shape);
	}

	/// Emit header, JSON descriptor, alignment padding, and payload.
	pub fn write(&self) -> Result<()> {
		let mut metadata = self.metadata.clone();
		if !metadata.is_object() {
			metadata = serde_json::json!({});
		}
		metadata["blobs"] = serde_json::to_value(&self.blobs)?;

		let json_bytes = serde_json::to_string(&metadata)?.into_bytes();
		let json_size = json_bytes.len() as u64;
		let padding = padding_for(HEADER_SIZE + json_bytes.len());

		let file = File::create(&self.path)
			.with_context(|| format!("Failed to create {}", self.path.display()))?;
		let mut out = BufWriter::new(file);

		out.write_all(&MAGIC.to_le_bytes())?;
		out.write_all(&FORMAT_VERSION.to_le_bytes())?;
		out.write_all(&json_size.to_le_bytes())?;
		out.write_all(&json_bytes)?;
		out.write_all(&vec![0u8; padding])?;
		out.write_all(&self.payload)?;
		out.flush()
			.with_context(|| format!("Failed to write {}", self.path.display()))?;

		ui::debug(&format!(
			"Wrote {} (json {} B, pad {} B, payload {} B)",
			self.path.display(),
			json_size,
			padding,
			self.payload.len()
		));
		Ok(())
	}
}
