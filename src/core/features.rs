//! Keypoints and descriptor sets

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::{DESCRIPTOR_DIM, QUANTIZATION_SCALE};
use crate::container::{ContainerReader, DescriptorSchema};

/// A detected feature: position, scale, and orientation (radians).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Keypoint {
	pub x: f32,
	pub y: f32,
	pub scale: f32,
	pub orientation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
	U8,
	F32,
}

impl DescriptorType {
	pub fn dtype_str(&self) -> &'static str {
		match self {
			DescriptorType::U8 => "uint8",
			DescriptorType::F32 => "float32",
		}
	}
}

/// Descriptor payload: exactly one representation is held at a time, and
/// dropping the other releases its memory (no dual buffers).
#[derive(Debug, Clone)]
pub enum Descriptors {
	U8(Vec<u8>),
	F32(Vec<f32>),
}

impl Descriptors {
	pub fn len(&self) -> usize {
		match self {
			Descriptors::U8(data) => data.len(),
			Descriptors::F32(data) => data.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn descriptor_type(&self) -> DescriptorType {
		match self {
			Descriptors::U8(_) => DescriptorType::U8,
			Descriptors::F32(_) => DescriptorType::F32,
		}
	}
}

/// An image's extracted features, in memory and on disk (`.isat_feat`).
#[derive(Debug, Clone)]
pub struct FeatureSet {
	pub keypoints: Vec<Keypoint>,
	pub descriptors: Descriptors,
	/// Scale used when descriptors were quantized to uint8 (1.0 for float).
	pub quantization_scale: f32,
}

impl Default for FeatureSet {
	fn default() -> Self {
		Self {
			keypoints: Vec::new(),
			descriptors: Descriptors::F32(Vec::new()),
			quantization_scale: 1.0,
		}
	}
}

impl FeatureSet {
	pub fn len(&self) -> usize {
		self.keypoints.len()
	}

	pub fn is_empty(&self) -> bool {
		self.keypoints.is_empty()
	}

	pub fn descriptor_type(&self) -> DescriptorType {
		self.descriptors.descriptor_type()
	}

	/// Descriptors as floats, undoing uint8 quantization.
	pub fn descriptors_f32(&self) -> Vec<f32> {
		match &self.descriptors {
			Descriptors::F32(data) => data.clone(),
			Descriptors::U8(data) => {
				let scale = self.quantization_scale;
				data.iter().map(|&v| v as f32 / scale).collect()
			}
		}
	}

	/// Load a feature set from an IDC feature file. The descriptor dtype is
	/// detected from the blob table; the quantization scale comes from the
	/// v1.1 descriptor schema when present.
	pub fn load(path: &Path) -> Result<Self> {
		let reader = ContainerReader::open(path)?;

		let keypoints_raw = reader.read_f32("keypoints")?;
		if keypoints_raw.len() % 4 != 0 {
			bail!("Malformed keypoints blob in {}", path.display());
		}
		let keypoints: Vec<Keypoint> = keypoints_raw
			.chunks_exact(4)
			.map(|kp| Keypoint { x: kp[0], y: kp[1], scale: kp[2], orientation: kp[3] })
			.collect();

		let Some(desc_blob) = reader.blob_descriptor("descriptors") else {
			bail!("No descriptors blob in {}", path.display());
		};

		let schema = DescriptorSchema::from_metadata(reader.metadata());
		let descriptors = match desc_blob.dtype.as_str() {
			"uint8" => Descriptors::U8(reader.read_bytes("descriptors")?),
			"float32" => Descriptors::F32(reader.read_f32("descriptors")?),
			other => bail!("Unsupported descriptor dtype '{}' in {}", other, path.display()),
		};

		let quantization_scale = match &descriptors {
			Descriptors::U8(_) => schema
				.as_ref()
				.map(|s| s.quantization_scale)
				.unwrap_or(QUANTIZATION_SCALE),
			Descriptors::F32(_) => 1.0,
		};

		let set = Self { keypoints, descriptors, quantization_scale };
		if set.descriptors.len() != set.keypoints.len() * DESCRIPTOR_DIM {
			bail!(
				"Keypoint/descriptor count mismatch in {}: {} keypoints, {} descriptor values",
				path.display(),
				set.keypoints.len(),
				set.descriptors.len()
			);
		}
		Ok(set)
	}
}
