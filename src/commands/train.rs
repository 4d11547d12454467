//! Train command - k-means codebook and optional PCA model

use anyhow::{bail, Result};
use ndarray::Array2;
use rand::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use crate::config::{DESCRIPTOR_DIM, FEATURE_EXT};
use crate::core::FeatureSet;
use crate::retrieval::codebook::save_codebook;
use crate::retrieval::kmeans::kmeans;
use crate::retrieval::pca::PcaModel;
use crate::retrieval::vlad;
use crate::ui;

const SAMPLING_SEED: u64 = 0x5eed;

#[allow(clippy::too_many_arguments)]
pub fn run(
	features: &Path,
	output: &Path,
	clusters: usize,
	max_descriptors: usize,
	max_per_image: usize,
	iterations: usize,
	pca_output: Option<&Path>,
	pca_dims: usize,
	whiten: bool,
) -> Result<()> {
	let start = Instant::now();

	ui::header(&format!("Parallax v{} - codebook training", env!("CARGO_PKG_VERSION")));
	ui::info(&format!(
		"Clusters: {}, max descriptors: {}, max per image: {}",
		clusters, max_descriptors, max_per_image
	));

	let feature_files = collect_feature_files(features);
	if feature_files.is_empty() {
		bail!("No feature files found in {}", features.display());
	}
	ui::info(&format!("Found {} feature files", feature_files.len()));

	let samples = sample_descriptors(&feature_files, max_per_image, max_descriptors)?;
	let num_samples = samples.nrows();
	ui::info(&format!("Sampled {} descriptors for training", num_samples));

	let centroids = kmeans(&samples, clusters, iterations, SAMPLING_SEED)?;
	save_codebook(output, &centroids)?;

	if let Some(pca_path) = pca_output {
		ui::info(&format!("Training PCA: {} -> {} dims", clusters * DESCRIPTOR_DIM, pca_dims));
		// PCA is fit on the training images' own VLAD vectors.
		let mut vlad_vectors: Vec<f32> = Vec::new();
		let mut count = 0usize;
		for file in &feature_files {
			let Ok(features) = FeatureSet::load(file) else {
				continue;
			};
			if features.is_empty() {
				continue;
			}
			vlad_vectors.extend(vlad::encode(&features.descriptors_f32(), &centroids));
			count += 1;
		}
		if count < 2 {
			bail!("Not enough images with descriptors to train PCA: {}", count);
		}
		let matrix = Array2::from_shape_vec((count, clusters * DESCRIPTOR_DIM), vlad_vectors)?;
		let model = PcaModel::train(&matrix, pca_dims, whiten)?;
		model.save(pca_path)?;
	}

	ui::success(&format!(
		"Trained {}-cluster codebook from {} descriptors in {:.1}s",
		clusters,
		num_samples,
		start.elapsed().as_secs_f32()
	));
	Ok(())
}

fn collect_feature_files(dir: &Path) -> Vec<PathBuf> {
	let mut files: Vec<PathBuf> = WalkDir::new(dir)
		.max_depth(1)
		.into_iter()
		.filter_map(|e| e.ok())
		.filter(|e| {
			e.file_type().is_file()
				&& e.path().extension().and_then(|x| x.to_str()) == Some(FEATURE_EXT)
		})
		.map(|e| e.path().to_path_buf())
		.collect();
	files.sort();
	files
}

/// Pull up to `max_per_image` descriptors per file (uniform sample) until
/// `max_descriptors` in total.
fn sample_descriptors(
	files: &[PathBuf],
	max_per_image: usize,
	max_descriptors: usize,
) -> Result<Array2<f32>> {
	let mut rng = StdRng::seed_from_u64(SAMPLING_SEED);
	let mut samples: Vec<f32> = Vec::new();
	let mut total = 0usize;

	for file in files {
		if total >= max_descriptors {
			ui::warn(&format!("Reached descriptor budget of {}", max_descriptors));
			break;
		}
		let features = match FeatureSet::load(file) {
			Ok(features) => features,
			Err(e) => {
				ui::warn(&format!("Skipping invalid file {}: {}", file.display(), e));
				continue;
			}
		};
		if features.is_empty() {
			continue;
		}

		let descriptors = features.descriptors_f32();
		let available = features.len();
		let budget = max_per_image.min(max_descriptors - total);

		if available <= budget {
			samples.extend_from_slice(&descriptors);
			total += available;
		} else {
			let mut indices: Vec<usize> = (0..available).collect();
			indices.shuffle(&mut rng);
			for &idx in indices.iter().take(budget) {
				samples.extend_from_slice(
					&descriptors[idx * DESCRIPTOR_DIM..(idx + 1) * DESCRIPTOR_DIM],
				);
			}
			total += budget;
		}
	}

	if total == 0 {
		bail!("No descriptors available for training");
	}
	Ok(Array2::from_shape_vec((total, DESCRIPTOR_DIM), samples)?)
}
