//! Descriptor normalization and quantization

use std::str::FromStr;

use crate::config::{DESCRIPTOR_DIM, QUANTIZATION_SCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
	/// RootSIFT: L1-normalize then element-wise square root.
	L1Root,
	/// Plain L2 normalization.
	L2,
}

impl Normalization {
	pub fn name(&self) -> &'static str {
		match self {
			Normalization::L1Root => "l1root",
			Normalization::L2 => "l2",
		}
	}
}

impl FromStr for Normalization {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"l1root" => Ok(Normalization::L1Root),
			"l2" => Ok(Normalization::L2),
			other => Err(format!("Unknown normalization '{}' (expected l1root or l2)", other)),
		}
	}
}

/// Normalize each 128-d descriptor in place.
pub fn normalize_descriptors(descriptors: &mut [f32], normalization: Normalization) {
	for desc in descriptors.chunks_exact_mut(DESCRIPTOR_DIM) {
		match normalization {
			Normalization::L1Root => {
				let l1: f32 = desc.iter().map(|v| v.abs()).sum();
				if l1 > 0.0 {
					for value in desc.iter_mut() {
						*value = (*value / l1).sqrt();
					}
				}
			}
			Normalization::L2 => {
				let l2: f32 = desc.iter().map(|v| v * v).sum::<f32>().sqrt();
				if l2 > 0.0 {
					for value in desc.iter_mut() {
						*value /= l2;
					}
				}
			}
		}
	}
}

/// Quantize normalized float descriptors to uint8 with the fixed scale 512.
/// The scale is recorded in the descriptor schema so readers can undo it.
pub fn quantize_descriptors(descriptors: &[f32]) -> Vec<u8> {
	descriptors
		.iter()
		.map(|&v| (v * QUANTIZATION_SCALE).round().clamp(0.0, 255.0) as u8)
		.collect()
}
