//! Pair deduplication, score merging, and ranking

use std::collections::BTreeMap;

use crate::config::SCORE_FLOOR;
use crate::core::ImagePair;

/// Concatenate strategy outputs and merge duplicates.
pub fn combine(all_pairs: Vec<Vec<ImagePair>>) -> Vec<ImagePair> {
	let total: usize = all_pairs.iter().map(|p| p.len()).sum();
	let mut combined = Vec::with_capacity(total);
	for pairs in all_pairs {
		combined.extend(pairs);
	}
	deduplicate_and_merge(combined)
}

/// Canonicalize and merge pairs sharing the same `(min, max)` key. Scores
/// add up; the method string gains a `+method` suffix only when the
/// incoming contribution is at least half the score accumulated so far.
/// Optional metadata fields are unioned, first writer wins.
pub fn deduplicate_and_merge(pairs: Vec<ImagePair>) -> Vec<ImagePair> {
	let mut unique: BTreeMap<(usize, usize), ImagePair> = BTreeMap::new();

	for pair in pairs {
		if !pair.is_valid() {
			continue;
		}
		let key = pair.key();
		match unique.get_mut(&key) {
			None => {
				let mut canonical = pair.clone();
				canonical.image1_idx = key.0;
				canonical.image2_idx = key.1;
				unique.insert(key, canonical);
			}
			Some(existing) => {
				if pair.score >= existing.score * 0.5 && !existing.method.contains(&pair.method) {
					existing.method = format!("{}+{}", existing.method, pair.method);
				}
				existing.score += pair.score;

				if existing.spatial_distance.is_none() {
					existing.spatial_distance = pair.spatial_distance;
				}
				if existing.visual_similarity.is_none() {
					existing.visual_similarity = pair.visual_similarity;
				}
				if existing.angle_difference.is_none() {
					existing.angle_difference = pair.angle_difference;
				}
			}
		}
	}

	unique.into_values().collect()
}

/// Post-filter: drop sub-floor scores, rank by score descending (index
/// order breaks ties, keeping the output bit-stable), truncate.
pub fn finalize(mut pairs: Vec<ImagePair>, max_pairs: Option<usize>) -> Vec<ImagePair> {
	pairs.retain(|p| p.score >= SCORE_FLOOR);
	pairs.sort_by(|a, b| {
		b.score
			.partial_cmp(&a.score)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| a.key().cmp(&b.key()))
	});
	if let Some(max_pairs) = max_pairs {
		pairs.truncate(max_pairs);
	}
	pairs
}
