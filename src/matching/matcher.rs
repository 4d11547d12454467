//! Descriptor matching core
//!
//! [`DescriptorMatcher`] is the seam for the matching service; GPU
//! implementations own a thread-affine context, so the match stage of the
//! pipeline is pinned. The bundled CPU matcher runs the full contract:
//! Lowe's ratio test, a distance cap, mutual-best-match consistency, and
//! optional geometry-guided matching against fundamental / homography
//! matrices.

use anyhow::Result;
use rayon::prelude::*;

use crate::config::{
	DEFAULT_DISTANCE_MAX, DEFAULT_FUNDAMENTAL_THRESHOLD, DEFAULT_HOMOGRAPHY_THRESHOLD,
	DEFAULT_RATIO_TEST, DESCRIPTOR_DIM,
};
use crate::core::{DescriptorType, Descriptors, FeatureSet};
use crate::ui;

/// Distance reported when descriptor sets cannot be compared.
pub const MISMATCH_DISTANCE: f32 = 1e6;

#[derive(Debug, Clone)]
pub struct MatchOptions {
	/// Lowe's ratio: accept only if best <= ratio * second-best.
	pub ratio_test: f32,
	/// Maximum descriptor distance, in normalized-float space. Scaled by
	/// the quantization scale for uint8 descriptor pairs.
	pub distance_max: f32,
	/// Cap on matches per pair; `None` = unlimited.
	pub max_matches: Option<usize>,
	/// Require two-way nearest-neighbor consistency.
	pub mutual_best_match: bool,
	/// Guided matching: fundamental matrix, gated on squared Sampson error.
	pub fundamental: Option<[[f32; 3]; 3]>,
	pub fundamental_threshold: f32,
	/// Guided matching: homography, gated on squared reprojection error.
	pub homography: Option<[[f32; 3]; 3]>,
	pub homography_threshold: f32,
}

impl Default for MatchOptions {
	fn default() -> Self {
		Self {
			ratio_test: DEFAULT_RATIO_TEST,
			distance_max: DEFAULT_DISTANCE_MAX,
			max_matches: None,
			mutual_best_match: true,
			fundamental: None,
			fundamental_threshold: DEFAULT_FUNDAMENTAL_THRESHOLD,
			homography: None,
			homography_threshold: DEFAULT_HOMOGRAPHY_THRESHOLD,
		}
	}
}

/// The matching service contract: two descriptor sets in, accepted
/// feature-index pairs out.
pub trait DescriptorMatcher {
	fn matches(
		&mut self,
		features1: &FeatureSet,
		features2: &FeatureSet,
		options: &MatchOptions,
	) -> Result<Vec<(u32, u32)>>;
}

/// L2 distance between two descriptors in their native dtype. Mismatched
/// dtypes compare as [`MISMATCH_DISTANCE`].
pub fn descriptor_distance(f1: &FeatureSet, f2: &FeatureSet, idx1: usize, idx2: usize) -> f32 {
	match (&f1.descriptors, &f2.descriptors) {
		(Descriptors::U8(a), Descriptors::U8(b)) => {
			let a = &a[idx1 * DESCRIPTOR_DIM..(idx1 + 1) * DESCRIPTOR_DIM];
			let b = &b[idx2 * DESCRIPTOR_DIM..(idx2 + 1) * DESCRIPTOR_DIM];
			a.iter()
				.zip(b.iter())
				.map(|(&x, &y)| {
					let d = x as f32 - y as f32;
					d * d
				})
				.sum::<f32>()
				.sqrt()
		}
		(Descriptors::F32(a), Descriptors::F32(b)) => {
			let a = &a[idx1 * DESCRIPTOR_DIM..(idx1 + 1) * DESCRIPTOR_DIM];
			let b = &b[idx2 * DESCRIPTOR_DIM..(idx2 + 1) * DESCRIPTOR_DIM];
			a.iter()
				.zip(b.iter())
				.map(|(x, y)| {
					let d = x - y;
					d * d
				})
				.sum::<f32>()
				.sqrt()
		}
		_ => MISMATCH_DISTANCE,
	}
}

/// Exhaustive CPU nearest-neighbor matcher.
pub struct CpuMatcher;

impl CpuMatcher {
	pub fn new() -> Self {
		Self
	}
}

impl Default for CpuMatcher {
	fn default() -> Self {
		Self::new()
	}
}

impl DescriptorMatcher for CpuMatcher {
	fn matches(
		&mut self,
		features1: &FeatureSet,
		features2: &FeatureSet,
		options: &MatchOptions,
	) -> Result<Vec<(u32, u32)>> {
		let n1 = features1.len();
		let n2 = features2.len();
		if n1 == 0 || n2 == 0 {
			ui::warn(&format!("Empty feature set: {} vs {}", n1, n2));
			return Ok(Vec::new());
		}
		if features1.descriptor_type() != features2.descriptor_type() {
			ui::warn("Descriptor type mismatch, pair not matchable");
			return Ok(Vec::new());
		}

		// The default cap is calibrated for normalized float descriptors;
		// quantized descriptors live in a space scaled by the recorded
		// quantization factor.
		let distance_cap = match features1.descriptor_type() {
			DescriptorType::U8 => options.distance_max * features1.quantization_scale,
			DescriptorType::F32 => options.distance_max,
		};

		let guided = options.fundamental.is_some() || options.homography.is_some();
		let allowed = |i: usize, j: usize| -> bool {
			if !guided {
				return true;
			}
			let kp1 = &features1.keypoints[i];
			let kp2 = &features2.keypoints[j];
			if let Some(f) = &options.fundamental {
				if sampson_error_sq(f, (kp1.x, kp1.y), (kp2.x, kp2.y))
					> options.fundamental_threshold
				{
					return false;
				}
			}
			if let Some(h) = &options.homography {
				if reprojection_error_sq(h, (kp1.x, kp1.y), (kp2.x, kp2.y))
					> options.homography_threshold
				{
					return false;
				}
			}
			true
		};

		// Forward pass: best and second-best neighbor per query row.
		let forward: Vec<Option<(usize, f32, f32)>> = (0..n1)
			.into_par_iter()
			.map(|i| {
				let mut best: Option<(usize, f32)> = None;
				let mut second = f32::INFINITY;
				for j in 0..n2 {
					if !allowed(i, j) {
						continue;
					}
					let d = descriptor_distance(features1, features2, i, j);
					match best {
						Some((_, d1)) if d < d1 => {
							second = d1;
							best = Some((j, d));
						}
						Some(_) => {
							if d < second {
								second = d;
							}
						}
						None => best = Some((j, d)),
					}
				}
				best.map(|(j, d1)| (j, d1, second))
			})
			.collect();

		// Reverse pass for mutual-best consistency.
		let reverse: Vec<Option<usize>> = if options.mutual_best_match {
			(0..n2)
				.into_par_iter()
				.map(|j| {
					let mut best: Option<(usize, f32)> = None;
					for i in 0..n1 {
						if !allowed(i, j) {
							continue;
						}
						let d = descriptor_distance(features1, features2, i, j);
						if best.map(|(_, bd)| d < bd).unwrap_or(true) {
							best = Some((i, d));
						}
					}
					best.map(|(i, _)| i)
				})
				.collect()
		} else {
			Vec::new()
		};

		let mut accepted: Vec<(u32, u32, f32)> = Vec::new();
		for (i, entry) in forward.iter().enumerate() {
			let Some((j, d1, d2)) = *entry else {
				continue;
			};
			if d1 > distance_cap {
				continue;
			}
			if d2.is_finite() && d1 > options.ratio_test * d2 {
				continue;
			}
			if options.mutual_best_match && reverse[j] != Some(i) {
				continue;
			}
			accepted.push((i as u32, j as u32, d1));
		}

		if let Some(max_matches) = options.max_matches {
			if accepted.len() > max_matches {
				accepted.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
				accepted.truncate(max_matches);
			}
		}

		Ok(accepted.into_iter().map(|(i, j, _)| (i, j)).collect())
	}
}

/// Squared Sampson error of a correspondence under a fundamental matrix.
fn sampson_error_sq(f: &[[f32; 3]; 3], p1: (f32, f32), p2: (f32, f32)) -> f32 {
	let fp1 = [
		f[0][0] * p1.0 + f[0][1] * p1.1 + f[0][2],
		f[1][0] * p1.0 + f[1][1] * p1.1 + f[1][2],
		f[2][0] * p1.0 + f[2][1] * p1.1 + f[2][2],
	];
	let ftp2 = [
		f[0][0] * p2.0 + f[1][0] * p2.1 + f[2][0],
		f[0][1] * p2.0 + f[1][1] * p2.1 + f[2][1],
		f[0][2] * p2.0 + f[1][2] * p2.1 + f[2][2],
	];
	let residual = p2.0 * fp1[0] + p2.1 * fp1[1] + fp1[2];
	let denom = fp1[0] * fp1[0] + fp1[1] * fp1[1] + ftp2[0] * ftp2[0] + ftp2[1] * ftp2[1];
	if denom <= f32::EPSILON {
		return f32::INFINITY;
	}
	residual * residual / denom
}

/// Squared reprojection error of a correspondence under a homography.
fn reprojection_error_sq(h: &[[f32; 3]; 3], p1: (f32, f32), p2: (f32, f32)) -> f32 {
	let w = h[2][0] * p1.0 + h[2][1] * p1.1 + h[2][2];
	if w.abs() <= f32::EPSILON {
		return f32::INFINITY;
	}
	let x = (h[0][0] * p1.0 + h[0][1] * p1.1 + h[0][2]) / w;
	let y = (h[1][0] * p1.0 + h[1][1] * p1.1 + h[1][2]) / w;
	let dx = x - p2.0;
	let dy = y - p2.1;
	dx * dx + dy * dy
}
