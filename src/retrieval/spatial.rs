//! GPS-based spatial retrieval
//!
//! Images with valid GNSS positions go into a 3-D k-d tree; each position
//! is radius-queried and capped to its nearest neighbors. Scores decay
//! exponentially with distance, and an optional IMU filter drops pairs
//! whose viewing directions diverge too far.

use std::collections::BTreeSet;

use crate::core::{ImageInfo, ImagePair, ImuData};
use crate::ui;

use super::RetrievalOptions;

/// Static 3-D k-d tree: median split on the widest axis.
pub struct KdTree {
	points: Vec<[f64; 3]>,
	nodes: Vec<KdNode>,
	root: Option<usize>,
}

struct KdNode {
	point: usize,
	axis: usize,
	left: Option<usize>,
	right: Option<usize>,
}

impl KdTree {
	pub fn build(points: Vec<[f64; 3]>) -> Self {
		let mut tree = Self {
			nodes: Vec::with_capacity(points.len()),
			points,
			root: None,
		};
		let mut order: Vec<usize> = (0..tree.points.len()).collect();
		tree.root = tree.build_node(&mut order);
		tree
	}

	fn build_node(&mut self, order: &mut [usize]) -> Option<usize> {
		if order.is_empty() {
			return None;
		}

		// Split along the axis with the widest extent.
		let mut low = [f64::INFINITY; 3];
		let mut high = [f64::NEG_INFINITY; 3];
		for &idx in order.iter() {
			for axis in 0..3 {
				low[axis] = low[axis].min(self.points[idx][axis]);
				high[axis] = high[axis].max(self.points[idx][axis]);
			}
		}
		let axis = (0..3)
			.max_by(|&a, &b| {
				(high[a] - low[a])
					.partial_cmp(&(high[b] - low[b]))
					.unwrap_or(std::cmp::Ordering::Equal)
			})
			.unwrap_or(0);

		order.sort_by(|&a, &b| {
			self.points[a][axis]
				.partial_cmp(&self.points[b][axis])
				.unwrap_or(std::cmp::Ordering::Equal)
		});
		let median = order.len() / 2;
		let point = order[median];

		let node_index = self.nodes.len();
		self.nodes.push(KdNode { point, axis, left: None, right: None });

		let (left_half, rest) = order.split_at_mut(median);
		let left = self.build_node(left_half);
		let right = self.build_node(&mut rest[1..]);
		self.nodes[node_index].left = left;
		self.nodes[node_index].right = right;
		Some(node_index)
	}

	/// All points within `radius` of `center`, as `(point_index, distance)`.
	pub fn radius_query(&self, center: &[f64; 3], radius: f64) -> Vec<(usize, f64)> {
		let mut hits = Vec::new();
		self.query_node(self.root, center, radius, &mut hits);
		hits
	}

	fn query_node(
		&self,
		node: Option<usize>,
		center: &[f64; 3],
		radius: f64,
		hits: &mut Vec<(usize, f64)>,
	) {
		let Some(node_index) = node else {
			return;
		};
		let node = &self.nodes[node_index];
		let point = &self.points[node.point];

		let distance = euclidean(point, center);
		if distance <= radius {
			hits.push((node.point, distance));
		}

		let delta = center[node.axis] - point[node.axis];
		let (near, far) = if delta < 0.0 {
			(node.left, node.right)
		} else {
			(node.right, node.left)
		};
		self.query_node(near, center, radius, hits);
		if delta.abs() <= radius {
			self.query_node(far, center, radius, hits);
		}
	}
}

fn euclidean(a: &[f64; 3], b: &[f64; 3]) -> f64 {
	let dx = a[0] - b[0];
	let dy = a[1] - b[1];
	let dz = a[2] - b[2];
	(dx * dx + dy * dy + dz * dz).sqrt()
}

/// Camera forward direction from attitude: the yaw/pitch-rotated +Y axis
/// in an ENU frame (yaw clockwise from north, pitch up positive).
fn forward_vector(imu: &ImuData) -> [f64; 3] {
	let cos_pitch = imu.pitch.cos();
	[
		imu.yaw.sin() * cos_pitch,
		imu.yaw.cos() * cos_pitch,
		-imu.pitch.sin(),
	]
}

/// Angle in radians between two attitudes' forward directions.
pub fn angle_difference(a: &ImuData, b: &ImuData) -> f64 {
	let fa = forward_vector(a);
	let fb = forward_vector(b);
	let dot = fa[0] * fb[0] + fa[1] * fb[1] + fa[2] * fb[2];
	dot.clamp(-1.0, 1.0).acos()
}

/// Distance-decay score: `exp(-d / threshold)`.
pub fn spatial_score(distance: f64, threshold: f64) -> f64 {
	if threshold <= 0.0 {
		return 0.0;
	}
	(-distance / threshold).exp()
}

pub fn retrieve_by_gps(images: &[ImageInfo], options: &RetrievalOptions) -> Vec<ImagePair> {
	// Only images with a GNSS fix participate; indices map back to the
	// full image list.
	let located: Vec<usize> = (0..images.len()).filter(|&i| images[i].has_gnss()).collect();
	if located.len() < 2 {
		ui::warn(&format!(
			"GPS retrieval: only {}/{} images have GNSS data",
			located.len(),
			images.len()
		));
		return Vec::new();
	}
	ui::debug(&format!(
		"GPS retrieval over {}/{} images, radius {}m",
		located.len(),
		images.len(),
		options.distance_threshold
	));

	let positions: Vec<[f64; 3]> = located
		.iter()
		.map(|&i| images[i].gnss.as_ref().unwrap().position())
		.collect();
	let tree = KdTree::build(positions.clone());

	let use_imu_filter = options.angle_threshold > 0.0;
	let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();
	let mut pairs = Vec::new();

	for (query, &image_idx) in located.iter().enumerate() {
		let mut neighbors = tree.radius_query(&positions[query], options.distance_threshold);
		neighbors.retain(|&(other, _)| other != query);
		neighbors.sort_by(|a, b| {
			a.1.partial_cmp(&b.1)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then(a.0.cmp(&b.0))
		});
		neighbors.truncate(options.max_neighbors);

		for (other, distance) in neighbors {
			let other_idx = located[other];
			let key = (image_idx.min(other_idx), image_idx.max(other_idx));
			if !seen.insert(key) {
				continue;
			}

			let angle = match (&images[image_idx].imu, &images[other_idx].imu) {
				(Some(a), Some(b)) => Some(angle_difference(a, b)),
				_ => None,
			};
			if use_imu_filter {
				if let Some(angle) = angle {
					if angle > options.angle_threshold {
						continue;
					}
				}
			}

			let mut pair = ImagePair::new(
				key.0,
				key.1,
				spatial_score(distance, options.distance_threshold),
				"gps",
			);
			pair.spatial_distance = Some(distance);
			pair.angle_difference = angle;
			pairs.push(pair);
		}
	}

	pairs
}
