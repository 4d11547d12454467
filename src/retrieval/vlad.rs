//! VLAD visual retrieval
//!
//! Each image's descriptors are aggregated into one fixed-size vector:
//! residuals against the nearest codebook centroid, accumulated per
//! cluster, intra-normalized per block, concatenated, and L2-normalized.
//! Encoded vectors may be cached as `.isat_vlad` containers keyed by a
//! fingerprint of the feature file.

use anyhow::{bail, Result};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

use crate::config::{DESCRIPTOR_DIM, VLAD_EXT};
use crate::container::{ContainerReader, ContainerWriter};
use crate::core::{FeatureSet, ImageInfo, ImagePair};
use crate::ui;

use super::codebook::load_codebook;
use super::kmeans::nearest_centroid;
use super::pca::PcaModel;
use super::RetrievalOptions;

/// Distance-decay score: `exp(-d / sigma)`.
pub fn vlad_score(distance: f64, sigma: f64) -> f64 {
	if sigma <= 0.0 {
		return 0.0;
	}
	(-distance / sigma).exp()
}

/// Encode descriptors (`n * 128` floats) into a `K * 128` VLAD vector.
pub fn encode(descriptors: &[f32], centroids: &Array2<f32>) -> Vec<f32> {
	let k = centroids.nrows();
	let mut vlad = vec![0.0f32; k * DESCRIPTOR_DIM];

	let desc_matrix = ndarray::ArrayView2::from_shape(
		(descriptors.len() / DESCRIPTOR_DIM, DESCRIPTOR_DIM),
		descriptors,
	)
	.expect("descriptor buffer length is a multiple of the descriptor dim");

	// Accumulate residuals against the assigned centroid.
	for descriptor in desc_matrix.rows() {
		let (cluster, _) = nearest_centroid(descriptor, centroids);
		let block = &mut vlad[cluster * DESCRIPTOR_DIM..(cluster + 1) * DESCRIPTOR_DIM];
		for d in 0..DESCRIPTOR_DIM {
			block[d] += descriptor[d] - centroids[[cluster, d]];
		}
	}

	// Intra-normalization per cluster block damps bursty visual words.
	for block in vlad.chunks_exact_mut(DESCRIPTOR_DIM) {
		let norm: f32 = block.iter().map(|v| v * v).sum::<f32>().sqrt();
		if norm > 0.0 {
			for value in block.iter_mut() {
				*value /= norm;
			}
		}
	}

	let norm: f32 = vlad.iter().map(|v| v * v).sum::<f32>().sqrt();
	if norm > 0.0 {
		for value in &mut vlad {
			*value /= norm;
		}
	}
	vlad
}

fn cache_path(cache_dir: &Path, image_id: &str) -> std::path::PathBuf {
	cache_dir.join(format!("{}.{}", image_id, VLAD_EXT))
}

/// Fingerprint a feature container for cache invalidation: a streaming
/// xxh3 digest over the whole file. A regenerated container differs at
/// minimum in its JSON descriptor (timestamp, parameters, blob table), so
/// stale cache entries never survive re-extraction.
fn feature_fingerprint(path: &Path) -> std::io::Result<String> {
	let mut file = File::open(path)?;
	let mut hasher = Xxh3::new();
	let mut chunk = [0u8; 8192];
	loop {
		let read = file.read(&mut chunk)?;
		if read == 0 {
			break;
		}
		hasher.update(&chunk[..read]);
	}
	Ok(format!("{:016x}", hasher.digest()))
}

fn load_cached(cache_dir: &Path, image: &ImageInfo, fingerprint: &str, k: usize) -> Option<Vec<f32>> {
	let path = cache_path(cache_dir, &image.image_id);
	if !path.exists() {
		return None;
	}
	let reader = ContainerReader::open(&path).ok()?;
	let meta = &reader.metadata()["metadata"];
	if meta["feature_fingerprint"].as_str() != Some(fingerprint)
		|| meta["num_clusters"].as_u64() != Some(k as u64)
	{
		return None;
	}
	let vlad = reader.read_f32("vlad").ok()?;
	if vlad.len() != k * DESCRIPTOR_DIM {
		return None;
	}
	Some(vlad)
}

fn store_cached(cache_dir: &Path, image: &ImageInfo, fingerprint: &str, k: usize, vlad: &[f32]) {
	let path = cache_path(cache_dir, &image.image_id);
	let mut writer = ContainerWriter::new(&path);
	writer.set_metadata(serde_json::json!({
		"schema_version": "1.0",
		"task_type": "vlad_encoding",
		"metadata": {
			"image_id": image.image_id,
			"feature_fingerprint": fingerprint,
			"num_clusters": k,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		},
	}));
	writer.add_blob_f32("vlad", vlad, &[vlad.len()]);
	if let Err(e) = writer.write() {
		// A cold cache is only a performance problem.
		ui::warn(&format!("Failed to cache VLAD vector {}: {}", path.display(), e));
	}
}

fn encode_image(
	image: &ImageInfo,
	centroids: &Array2<f32>,
	cache_dir: Option<&Path>,
) -> Result<Vec<f32>> {
	let k = centroids.nrows();
	let fingerprint = feature_fingerprint(&image.feature_file)?;

	if let Some(dir) = cache_dir {
		if let Some(vlad) = load_cached(dir, image, &fingerprint, k) {
			return Ok(vlad);
		}
	}

	let features = FeatureSet::load(&image.feature_file)?;
	if features.is_empty() {
		bail!("no descriptors in {}", image.feature_file.display());
	}
	let vlad = encode(&features.descriptors_f32(), centroids);

	if let Some(dir) = cache_dir {
		store_cached(dir, image, &fingerprint, k, &vlad);
	}
	Ok(vlad)
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
	a.iter()
		.zip(b.iter())
		.map(|(x, y)| {
			let d = (x - y) as f64;
			d * d
		})
		.sum::<f64>()
		.sqrt()
}

/// Per-query nearest neighbors over the encoded vectors, as
/// `(query, other, distance)` with `other` ordered by ascending distance.
pub fn top_k_similar(vectors: &[Option<Vec<f32>>], top_k: usize) -> Vec<(usize, usize, f64)> {
	let mut results = Vec::new();
	for (i, query) in vectors.iter().enumerate() {
		let Some(query) = query else {
			continue;
		};
		let mut distances: Vec<(usize, f64)> = vectors
			.iter()
			.enumerate()
			.filter(|(j, other)| *j != i && other.is_some())
			.map(|(j, other)| (j, l2_distance(query, other.as_ref().unwrap())))
			.collect();
		distances.sort_by(|a, b| {
			a.1.partial_cmp(&b.1)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then(a.0.cmp(&b.0))
		});
		distances.truncate(top_k);
		for (j, distance) in distances {
			results.push((i, j, distance));
		}
	}
	results
}

pub fn retrieve_by_vlad(
	images: &[ImageInfo],
	options: &RetrievalOptions,
	codebook_path: &Path,
	cache_dir: Option<&Path>,
	pca_path: Option<&Path>,
) -> Result<Vec<ImagePair>> {
	let centroids = load_codebook(codebook_path)?;
	let pca = match pca_path {
		Some(path) => Some(PcaModel::load(path)?),
		None => None,
	};
	if let Some(dir) = cache_dir {
		std::fs::create_dir_all(dir)?;
	}

	// Raw VLAD vectors are cached; PCA projection applies afterwards so
	// the cache stays valid when the projection model changes.
	let vectors: Vec<Option<Vec<f32>>> = images
		.par_iter()
		.map(|image| match encode_image(image, &centroids, cache_dir) {
			Ok(vlad) => match &pca {
				Some(model) => match model.apply(&vlad) {
					Ok(projected) => Some(projected),
					Err(e) => {
						ui::warn(&format!("PCA projection failed for {}: {}", image.image_id, e));
						None
					}
				},
				None => Some(vlad),
			},
			Err(e) => {
				ui::warn(&format!("VLAD encoding failed for {}: {}", image.image_id, e));
				None
			}
		})
		.collect();

	let encoded = vectors.iter().filter(|v| v.is_some()).count();
	ui::info(&format!("Encoded {}/{} VLAD vectors", encoded, images.len()));
	if encoded < 2 {
		return Ok(Vec::new());
	}

	let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();
	let mut pairs = Vec::new();
	for (i, j, distance) in top_k_similar(&vectors, options.top_k) {
		let key = (i.min(j), i.max(j));
		if !seen.insert(key) {
			continue;
		}
		let score = vlad_score(distance, options.vlad_sigma);
		let mut pair = ImagePair::new(key.0, key.1, score, "vlad");
		pair.visual_similarity = Some(score);
		pairs.push(pair);
	}
	Ok(pairs)
}
