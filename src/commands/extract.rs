//! Extract command - SIFT features from an image list

use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::Instant;

use crate::core::imagery;
use crate::extract::{
	run_extraction, DogExtractor, ExtractionParams, NmsParams, Normalization, SiftParams,
};
use crate::ui;

#[allow(clippy::too_many_arguments)]
pub fn run(
	input: &Path,
	output: &Path,
	nfeatures: usize,
	threshold: f32,
	octaves: i32,
	levels: usize,
	no_adapt: bool,
	norm: &str,
	uint8: bool,
	nms: bool,
	nms_radius: f32,
	nms_no_orient: bool,
) -> Result<()> {
	let start = Instant::now();
	let normalization: Normalization = norm.parse().map_err(|e: String| anyhow!(e))?;

	ui::header(&format!("Parallax v{} - feature extraction", env!("CARGO_PKG_VERSION")));
	ui::info(&format!("Max features: {}, threshold: {}", nfeatures, threshold));
	ui::info(&format!(
		"Normalization: {}, uint8: {}, NMS: {}",
		normalization.name(),
		uint8,
		nms
	));
	if nms {
		ui::debug(&format!(
			"  NMS radius: {}, keep orientations: {}",
			nms_radius, !nms_no_orient
		));
	}

	let images = imagery::load_image_list(input, None)?;

	let sift = SiftParams {
		max_features: nfeatures,
		peak_threshold: threshold,
		octaves,
		levels,
		adapt_darkness: !no_adapt,
	};
	let params = ExtractionParams {
		sift,
		normalization,
		use_uint8: uint8,
		nms: nms.then_some(NmsParams {
			radius: nms_radius,
			keep_orientation: !nms_no_orient,
		}),
		..ExtractionParams::default()
	};

	let stats = run_extraction(&images, DogExtractor::new(sift), output, &params)?;

	let elapsed = start.elapsed().as_secs_f32();
	ui::success(&format!(
		"Extracted features for {} images ({} total features) in {:.1}s",
		stats.processed, stats.total_features, elapsed
	));
	if stats.failed > 0 {
		ui::warn(&format!("{} images produced no output", stats.failed));
	}
	Ok(())
}
