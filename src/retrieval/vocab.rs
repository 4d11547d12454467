//! Vocabulary-tree (bag-of-words) visual retrieval
//!
//! The facade contract is load / add / query: a vocabulary of visual
//! words turns an image's descriptors into a sparse TF-IDF vector; a
//! session database holds one vector per image and answers top-k
//! similarity queries with the standard L1 score
//! `1 - 0.5 * ||v1 - v2||_1` over normalized vectors.

use anyhow::Result;
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::DESCRIPTOR_DIM;
use crate::core::{FeatureSet, ImageInfo, ImagePair};
use crate::ui;

use super::codebook::load_codebook;
use super::kmeans::nearest_centroid;
use super::RetrievalOptions;

/// Visual vocabulary: one word per codebook centroid.
pub struct Vocabulary {
	words: Array2<f32>,
}

impl Vocabulary {
	pub fn load(path: &Path) -> Result<Self> {
		Ok(Self { words: load_codebook(path)? })
	}

	pub fn len(&self) -> usize {
		self.words.nrows()
	}

	pub fn is_empty(&self) -> bool {
		self.words.nrows() == 0
	}

	pub fn word_of(&self, descriptor: ArrayView1<f32>) -> usize {
		nearest_centroid(descriptor, &self.words).0
	}

	/// Term frequencies of an image's descriptors, as `word -> count`.
	pub fn term_frequencies(&self, descriptors: &[f32]) -> BTreeMap<usize, f64> {
		let matrix = ndarray::ArrayView2::from_shape(
			(descriptors.len() / DESCRIPTOR_DIM, DESCRIPTOR_DIM),
			descriptors,
		)
		.expect("descriptor buffer length is a multiple of the descriptor dim");

		let mut frequencies = BTreeMap::new();
		for descriptor in matrix.rows() {
			*frequencies.entry(self.word_of(descriptor)).or_insert(0.0) += 1.0;
		}
		frequencies
	}
}

/// In-memory image database over one vocabulary.
pub struct VocabDatabase<'a> {
	vocabulary: &'a Vocabulary,
	entries: Vec<(usize, BTreeMap<usize, f64>)>,
	finalized: bool,
}

impl<'a> VocabDatabase<'a> {
	pub fn new(vocabulary: &'a Vocabulary) -> Self {
		Self { vocabulary, entries: Vec::new(), finalized: false }
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Add an image; returns its database entry id.
	pub fn add_image(&mut self, image_idx: usize, descriptors: &[f32]) -> usize {
		debug_assert!(!self.finalized, "database already finalized");
		let frequencies = self.vocabulary.term_frequencies(descriptors);
		self.entries.push((image_idx, frequencies));
		self.entries.len() - 1
	}

	/// Weight term frequencies by inverse document frequency and
	/// L1-normalize each vector. Must run before querying.
	pub fn finalize(&mut self) {
		let n = self.entries.len() as f64;
		let mut document_frequency: BTreeMap<usize, f64> = BTreeMap::new();
		for (_, tf) in &self.entries {
			for &word in tf.keys() {
				*document_frequency.entry(word).or_insert(0.0) += 1.0;
			}
		}

		for (_, vector) in &mut self.entries {
			for (word, value) in vector.iter_mut() {
				let idf = (n / document_frequency[word]).ln();
				*value *= idf;
			}
			let l1: f64 = vector.values().sum();
			if l1 > 0.0 {
				for value in vector.values_mut() {
					*value /= l1;
				}
			}
		}
		self.finalized = true;
	}

	/// Top scoring entries against entry `query_id`, excluding itself.
	/// Returns `(image_idx, score)` sorted by score descending.
	pub fn query(&self, query_id: usize, max_results: usize) -> Vec<(usize, f64)> {
		debug_assert!(self.finalized, "database not finalized");
		let (_, query_vector) = &self.entries[query_id];

		let mut scored: Vec<(usize, f64)> = self
			.entries
			.iter()
			.enumerate()
			.filter(|(entry_id, _)| *entry_id != query_id)
			.map(|(_, (image_idx, vector))| (*image_idx, bow_similarity(query_vector, vector)))
			.collect();

		scored.sort_by(|a, b| {
			b.1.partial_cmp(&a.1)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then(a.0.cmp(&b.0))
		});
		scored.truncate(max_results);
		scored
	}
}

/// `1 - 0.5 * ||a - b||_1` over sparse L1-normalized vectors, in [0, 1].
fn bow_similarity(a: &BTreeMap<usize, f64>, b: &BTreeMap<usize, f64>) -> f64 {
	let mut l1 = 0.0;
	for (word, value) in a {
		l1 += (value - b.get(word).copied().unwrap_or(0.0)).abs();
	}
	for (word, value) in b {
		if !a.contains_key(word) {
			l1 += value.abs();
		}
	}
	1.0 - 0.5 * l1
}

pub fn retrieve_by_vocab(
	images: &[ImageInfo],
	options: &RetrievalOptions,
	vocabulary_path: &Path,
) -> Result<Vec<ImagePair>> {
	let vocabulary = Vocabulary::load(vocabulary_path)?;
	ui::debug(&format!("Vocabulary loaded: {} words", vocabulary.len()));

	// Descriptor loading is the expensive part; parallelize it, then fill
	// the database in image order so results stay deterministic.
	let descriptor_sets: Vec<Option<Vec<f32>>> = images
		.par_iter()
		.map(|image| match FeatureSet::load(&image.feature_file) {
			Ok(features) if !features.is_empty() => Some(features.descriptors_f32()),
			Ok(_) => {
				ui::warn(&format!("No descriptors for {}", image.image_id));
				None
			}
			Err(e) => {
				ui::warn(&format!("Failed to load features for {}: {}", image.image_id, e));
				None
			}
		})
		.collect();

	let mut database = VocabDatabase::new(&vocabulary);
	for (image_idx, descriptors) in descriptor_sets.iter().enumerate() {
		if let Some(descriptors) = descriptors {
			database.add_image(image_idx, descriptors);
		}
	}
	if database.len() < 2 {
		ui::warn("Vocabulary retrieval: fewer than two images with descriptors");
		return Ok(Vec::new());
	}
	database.finalize();
	ui::info(&format!("Vocabulary database: {} images", database.len()));

	let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();
	let mut pairs = Vec::new();
	for query_id in 0..database.len() {
		let query_image = database.entries[query_id].0;
		for (other_image, score) in database.query(query_id, options.top_k) {
			let key = (query_image.min(other_image), query_image.max(other_image));
			if !seen.insert(key) {
				continue;
			}
			let mut pair = ImagePair::new(key.0, key.1, score, "vocab");
			pair.visual_similarity = Some(score);
			pairs.push(pair);
		}
	}
	Ok(pairs)
}
