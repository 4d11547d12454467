//! Candidate image pairs and the pair-list JSON interchange

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::ImageInfo;
use crate::ui;

/// A candidate pair in canonical form: `image1_idx < image2_idx`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePair {
	pub image1_idx: usize,
	pub image2_idx: usize,
	pub score: f64,
	pub method: String,
	pub spatial_distance: Option<f64>,
	pub visual_similarity: Option<f64>,
	pub angle_difference: Option<f64>,
}

impl ImagePair {
	/// Construct with canonical index ordering.
	pub fn new(i: usize, j: usize, score: f64, method: &str) -> Self {
		Self {
			image1_idx: i.min(j),
			image2_idx: i.max(j),
			score,
			method: method.to_string(),
			spatial_distance: None,
			visual_similarity: None,
			angle_difference: None,
		}
	}

	pub fn key(&self) -> (usize, usize) {
		(self.image1_idx, self.image2_idx)
	}

	pub fn is_valid(&self) -> bool {
		self.image1_idx != self.image2_idx
	}
}

/// One row of the pair-list JSON, as consumed by the matching tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairEntry {
	pub image1_id: String,
	pub image2_id: String,
	pub feature1_file: String,
	pub feature2_file: String,
	pub score: f64,
	pub method: String,
	pub priority: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub spatial_distance: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub visual_similarity: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub angle_difference: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct PairListJson {
	schema_version: String,
	retrieval_method: String,
	pairs: Vec<PairEntry>,
}

/// Write a pair list, resolving indices to image ids and feature paths.
/// Pairs referencing out-of-range indices are dropped.
pub fn write_pair_list(
	images: &[ImageInfo],
	pairs: &[ImagePair],
	output_path: &Path,
	retrieval_method: &str,
) -> Result<()> {
	let entries: Vec<PairEntry> = pairs
		.iter()
		.filter(|p| p.is_valid() && p.image1_idx < images.len() && p.image2_idx < images.len())
		.map(|p| {
			let img1 = &images[p.image1_idx];
			let img2 = &images[p.image2_idx];
			PairEntry {
				image1_id: img1.image_id.clone(),
				image2_id: img2.image_id.clone(),
				feature1_file: img1.feature_file.to_string_lossy().to_string(),
				feature2_file: img2.feature_file.to_string_lossy().to_string(),
				score: p.score,
				method: p.method.clone(),
				priority: 1.0 + p.score,
				spatial_distance: p.spatial_distance,
				visual_similarity: p.visual_similarity,
				angle_difference: p.angle_difference,
			}
		})
		.collect();

	let list = PairListJson {
		schema_version: "1.0".to_string(),
		retrieval_method: retrieval_method.to_string(),
		pairs: entries,
	};

	let text = serde_json::to_string_pretty(&list)?;
	fs::write(output_path, text)
		.with_context(|| format!("Failed to write {}", output_path.display()))?;

	ui::info(&format!(
		"Wrote {} pairs to {}",
		pairs.len(),
		output_path.display()
	));
	Ok(())
}

/// Read a pair list produced by the retrieval tool.
pub fn read_pair_list(path: &Path) -> Result<Vec<PairEntry>> {
	let text = fs::read_to_string(path)
		.with_context(|| format!("Failed to open pairs file {}", path.display()))?;
	let list: PairListJson = serde_json::from_str(&text)
		.with_context(|| format!("Invalid pairs file {}", path.display()))?;
	ui::info(&format!(
		"Loaded {} pairs from {}",
		list.pairs.len(),
		path.display()
	));
	Ok(list.pairs)
}
