//! Spatial feature distribution
//!
//! Keypoints cluster on texture; for reconstruction a spread-out subset
//! usually beats a dense clump. The image is cut into a regular grid with
//! cell side ~10x the suppression radius and only the strongest keypoints
//! per cell survive. Deterministic: ranking is by scale descending with
//! ties broken by lower original index.

use std::collections::HashMap;

use crate::config::{DESCRIPTOR_DIM, NMS_CELL_FACTOR, NMS_MAX_PER_CELL};
use crate::core::Keypoint;

#[derive(Debug, Clone, Copy)]
pub struct NmsParams {
	pub radius: f32,
	/// Keep multiple orientations at one (x, y) location.
	pub keep_orientation: bool,
}

/// Filter keypoints (and their descriptors) down to the strongest few per
/// grid cell. Returns new, index-aligned vectors; original relative order
/// is preserved among survivors.
pub fn spatial_filter(
	keypoints: &[Keypoint],
	descriptors: &[f32],
	width: u32,
	height: u32,
	params: &NmsParams,
) -> (Vec<Keypoint>, Vec<f32>) {
	if keypoints.is_empty() {
		return (Vec::new(), Vec::new());
	}

	let cell = ((params.radius * NMS_CELL_FACTOR) as usize).max(1);
	let cols = (width as usize).div_ceil(cell).max(1);
	let rows = (height as usize).div_ceil(cell).max(1);

	let mut grid: HashMap<usize, Vec<usize>> = HashMap::new();
	for (idx, kp) in keypoints.iter().enumerate() {
		let cx = ((kp.x.max(0.0) as usize) / cell).min(cols - 1);
		let cy = ((kp.y.max(0.0) as usize) / cell).min(rows - 1);
		grid.entry(cy * cols + cx).or_default().push(idx);
	}

	let mut kept: Vec<usize> = Vec::new();
	for indices in grid.values() {
		let mut ranked = indices.clone();
		// Scale stands in for response; ties keep the earlier detection.
		ranked.sort_by(|&a, &b| {
			keypoints[b]
				.scale
				.partial_cmp(&keypoints[a].scale)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then(a.cmp(&b))
		});

		let mut taken = 0;
		let mut seen_positions: Vec<(f32, f32)> = Vec::new();
		for &idx in &ranked {
			if taken >= NMS_MAX_PER_CELL {
				break;
			}
			let kp = &keypoints[idx];
			if !params.keep_orientation
				&& seen_positions.iter().any(|&(x, y)| x == kp.x && y == kp.y)
			{
				continue;
			}
			seen_positions.push((kp.x, kp.y));
			kept.push(idx);
			taken += 1;
		}
	}

	kept.sort_unstable();

	let mut out_keypoints = Vec::with_capacity(kept.len());
	let mut out_descriptors = Vec::with_capacity(kept.len() * DESCRIPTOR_DIM);
	for idx in kept {
		out_keypoints.push(keypoints[idx]);
		out_descriptors
			.extend_from_slice(&descriptors[idx * DESCRIPTOR_DIM..(idx + 1) * DESCRIPTOR_DIM]);
	}
	(out_keypoints, out_descriptors)
}
