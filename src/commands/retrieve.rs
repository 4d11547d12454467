//! Retrieve command - candidate pair generation

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::{imagery, pairs};
use crate::retrieval::{self, RetrievalOptions, StrategyResources};
use crate::ui;

#[allow(clippy::too_many_arguments)]
pub fn run(
	features: &Path,
	output: &Path,
	input: Option<&Path>,
	strategy_spec: &str,
	max_pairs: i64,
	window: usize,
	distance_threshold: f64,
	angle_threshold_deg: f64,
	max_neighbors: usize,
	top_k: usize,
	vlad_codebook: Option<PathBuf>,
	vlad_cache: Option<PathBuf>,
	pca_model: Option<PathBuf>,
	vocab_file: Option<PathBuf>,
) -> Result<()> {
	let start = Instant::now();

	ui::header(&format!("Parallax v{} - pair retrieval", env!("CARGO_PKG_VERSION")));
	ui::info(&format!("Strategy: {}", strategy_spec));
	ui::debug(&format!(
		"Max pairs: {}",
		if max_pairs > 0 { max_pairs.to_string() } else { "unlimited".to_string() }
	));

	let images = match input {
		Some(list) => imagery::load_image_list(list, Some(features))?,
		None => imagery::discover_from_features(features)?,
	};
	if images.is_empty() {
		bail!("No images found");
	}

	let resources = StrategyResources {
		window: Some(window),
		vlad_codebook,
		vlad_cache_dir: vlad_cache,
		pca_model,
		vocabulary: vocab_file,
	};
	let strategies = retrieval::parse_strategy_spec(strategy_spec, &resources)?;

	let options = RetrievalOptions {
		distance_threshold,
		// Degrees on the CLI, radians inside.
		angle_threshold: angle_threshold_deg.to_radians(),
		max_neighbors,
		top_k,
		max_pairs: (max_pairs > 0).then_some(max_pairs as usize),
		..RetrievalOptions::default()
	};

	let mut all_pairs = Vec::with_capacity(strategies.len());
	for strategy in &strategies {
		ui::info(&format!("Executing strategy: {}", strategy.name()));
		let strategy_pairs = strategy.run(&images, &options)?;
		ui::info(&format!("  Generated {} pairs", strategy_pairs.len()));
		all_pairs.push(strategy_pairs);
	}

	let merged = retrieval::combine(all_pairs);
	let ranked = retrieval::finalize(merged, options.max_pairs);

	let total_possible = images.len() * (images.len() - 1) / 2;
	if total_possible > 0 {
		ui::info(&format!(
			"Coverage: {}/{} ({:.1}%)",
			ranked.len(),
			total_possible,
			100.0 * ranked.len() as f64 / total_possible as f64
		));
	}

	pairs::write_pair_list(&images, &ranked, output, strategy_spec)?;

	ui::success(&format!(
		"Retrieved {} pairs from {} images in {:.1}s",
		ranked.len(),
		images.len(),
		start.elapsed().as_secs_f32()
	));
	Ok(())
}
