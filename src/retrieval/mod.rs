//! # Retrieval Engine
//!
//! Candidate-pair generation. Four pluggable strategies (plus the trivial
//! exhaustive baseline) produce scored pairs; the combiner deduplicates,
//! merges scores, and ranks. Strategies are pure: the same inputs always
//! produce the same pair list.

pub mod codebook;
pub mod combine;
pub mod kmeans;
pub mod pca;
pub mod spatial;
pub mod vlad;
pub mod vocab;

pub use combine::{combine, deduplicate_and_merge, finalize};

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::{
	DEFAULT_GPS_DISTANCE, DEFAULT_MAX_NEIGHBORS, DEFAULT_SEQUENTIAL_WINDOW, DEFAULT_TOP_K,
	VLAD_SIGMA,
};
use crate::core::{ImageInfo, ImagePair};
use crate::ui;

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
	/// GPS search radius in meters.
	pub distance_threshold: f64,
	/// IMU attitude cap in radians; 0 disables the filter.
	pub angle_threshold: f64,
	/// Per-image neighbor cap for spatial retrieval.
	pub max_neighbors: usize,
	/// Per-query result cap for visual retrieval.
	pub top_k: usize,
	/// Decay parameter for VLAD distance scores.
	pub vlad_sigma: f64,
	/// Global pair cap applied after merging; `None` = unlimited.
	pub max_pairs: Option<usize>,
}

impl Default for RetrievalOptions {
	fn default() -> Self {
		Self {
			distance_threshold: DEFAULT_GPS_DISTANCE,
			angle_threshold: 0.0,
			max_neighbors: DEFAULT_MAX_NEIGHBORS,
			top_k: DEFAULT_TOP_K,
			vlad_sigma: VLAD_SIGMA,
			max_pairs: None,
		}
	}
}

/// One candidate-generation strategy. The `"a+b"` CLI syntax parses into a
/// list of these, run independently and merged by the combiner.
#[derive(Debug, Clone)]
pub enum Strategy {
	Exhaustive,
	Sequential {
		window: usize,
	},
	Gps,
	Vlad {
		codebook: PathBuf,
		cache_dir: Option<PathBuf>,
		pca_model: Option<PathBuf>,
	},
	Vocab {
		vocabulary: PathBuf,
	},
}

impl Strategy {
	pub fn name(&self) -> &'static str {
		match self {
			Strategy::Exhaustive => "exhaustive",
			Strategy::Sequential { .. } => "sequential",
			Strategy::Gps => "gps",
			Strategy::Vlad { .. } => "vlad",
			Strategy::Vocab { .. } => "vocab",
		}
	}

	pub fn run(&self, images: &[ImageInfo], options: &RetrievalOptions) -> Result<Vec<ImagePair>> {
		match self {
			Strategy::Exhaustive => Ok(retrieve_exhaustive(images, options)),
			Strategy::Sequential { window } => Ok(retrieve_sequential(images, *window)),
			Strategy::Gps => Ok(spatial::retrieve_by_gps(images, options)),
			Strategy::Vlad { codebook, cache_dir, pca_model } => {
				vlad::retrieve_by_vlad(images, options, codebook, cache_dir.as_deref(), pca_model.as_deref())
			}
			Strategy::Vocab { vocabulary } => vocab::retrieve_by_vocab(images, options, vocabulary),
		}
	}
}

/// Resources that strategy tokens may require from the command line.
#[derive(Debug, Clone, Default)]
pub struct StrategyResources {
	pub window: Option<usize>,
	pub vlad_codebook: Option<PathBuf>,
	pub vlad_cache_dir: Option<PathBuf>,
	pub pca_model: Option<PathBuf>,
	pub vocabulary: Option<PathBuf>,
}

/// Parse a strategy spec such as `"gps+sequential"` into strategies.
/// Each token registers exactly once; duplicates are rejected.
pub fn parse_strategy_spec(spec: &str, resources: &StrategyResources) -> Result<Vec<Strategy>> {
	let mut strategies: Vec<Strategy> = Vec::new();
	for token in spec.split('+') {
		let token = token.trim();
		if strategies.iter().any(|s| s.name() == token) {
			bail!("Strategy '{}' listed more than once", token);
		}
		let strategy = match token {
			"exhaustive" => Strategy::Exhaustive,
			"sequential" => Strategy::Sequential {
				window: resources.window.unwrap_or(DEFAULT_SEQUENTIAL_WINDOW),
			},
			"gps" => Strategy::Gps,
			"vlad" => {
				let Some(codebook) = resources.vlad_codebook.clone() else {
					bail!("Strategy 'vlad' requires --vlad-codebook");
				};
				Strategy::Vlad {
					codebook,
					cache_dir: resources.vlad_cache_dir.clone(),
					pca_model: resources.pca_model.clone(),
				}
			}
			"vocab" => {
				let Some(vocabulary) = resources.vocabulary.clone() else {
					bail!("Strategy 'vocab' requires --vocab-file");
				};
				Strategy::Vocab { vocabulary }
			}
			other => bail!(
				"Unknown strategy '{}' (available: exhaustive, sequential, gps, vlad, vocab)",
				other
			),
		};
		strategies.push(strategy);
	}
	if strategies.is_empty() {
		bail!("Empty strategy spec");
	}
	Ok(strategies)
}

/// All C(N, 2) pairs with a uniform score.
fn retrieve_exhaustive(images: &[ImageInfo], options: &RetrievalOptions) -> Vec<ImagePair> {
	let n = images.len();
	let mut pairs = Vec::new();
	for i in 0..n {
		for j in i + 1..n {
			pairs.push(ImagePair::new(i, j, 1.0, "exhaustive"));
			if let Some(max_pairs) = options.max_pairs {
				if pairs.len() >= max_pairs {
					ui::warn(&format!("Reached max_pairs limit: {}", max_pairs));
					return pairs;
				}
			}
		}
	}
	pairs
}

/// Windowed pairs for ordered input; score decays with sequence distance.
fn retrieve_sequential(images: &[ImageInfo], window: usize) -> Vec<ImagePair> {
	let n = images.len();
	let window = window.max(1);
	let mut pairs = Vec::new();
	for i in 0..n {
		for j in i + 1..(i + window + 1).min(n) {
			let score = 1.0 - (j - i) as f64 / window as f64;
			pairs.push(ImagePair::new(i, j, score, "sequential"));
		}
	}
	pairs
}
