//! Container metadata schemas
//!
//! Schema version 1.0 carries task and algorithm descriptors; 1.1 adds the
//! `descriptor_schema` block for feature files so readers can distinguish
//! quantized SIFT from RootSIFT floats without guesswork.

use serde::{Deserialize, Serialize};

/// Explicit descriptor metadata (schema v1.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorSchema {
	pub feature_type: String,
	pub descriptor_dim: usize,
	pub descriptor_dtype: String,
	pub normalization: String,
	pub quantization_scale: f32,
}

impl DescriptorSchema {
	pub fn from_metadata(metadata: &serde_json::Value) -> Option<Self> {
		serde_json::from_value(metadata.get("descriptor_schema")?.clone()).ok()
	}
}

/// Metadata tree for a feature extraction output. Emits schema 1.1 when a
/// descriptor schema is provided, 1.0 otherwise.
pub fn feature_metadata(
	image_path: &str,
	algorithm_name: &str,
	algorithm_version: &str,
	parameters: serde_json::Value,
	descriptor_schema: Option<&DescriptorSchema>,
	execution_time_ms: u64,
) -> serde_json::Value {
	let mut meta = serde_json::json!({
		"schema_version": if descriptor_schema.is_some() { "1.1" } else { "1.0" },
		"task_type": "feature_extraction",
		"algorithm": {
			"name": algorithm_name,
			"version": algorithm_version,
			"parameters": parameters,
		},
		"metadata": {
			"image_path": image_path,
			"execution_time_ms": execution_time_ms,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		},
	});
	if let Some(schema) = descriptor_schema {
		meta["descriptor_schema"] = serde_json::to_value(schema).unwrap_or_default();
	}
	meta
}

/// Metadata tree for a feature matching output.
pub fn match_metadata(
	image1_id: &str,
	image2_id: &str,
	algorithm_name: &str,
	algorithm_version: &str,
	num_matches: usize,
) -> serde_json::Value {
	serde_json::json!({
		"schema_version": "1.0",
		"task_type": "feature_matching",
		"algorithm": {
			"name": algorithm_name,
			"version": algorithm_version,
		},
		"image_pair": {
			"image1_id": image1_id,
			"image2_id": image2_id,
		},
		"metadata": {
			"num_matches": num_matches,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		},
	})
}
