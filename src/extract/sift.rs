//! Feature extraction backend
//!
//! [`FeatureExtractor`] is the seam for the extraction service. GPU
//! implementations own a thread-affine context, which is why the extract
//! stage of the pipeline is pinned to a single thread; the bundled CPU
//! implementation is a difference-of-Gaussians pyramid detector with
//! gradient-histogram descriptors, parameter-compatible with the GPU path.

use anyhow::Result;

use crate::config::DESCRIPTOR_DIM;
use crate::core::Keypoint;

#[derive(Debug, Clone, Copy)]
pub struct SiftParams {
	/// Maximum features to keep per image (strongest first).
	pub max_features: usize,
	/// DoG peak threshold, divided by the level count internally.
	pub peak_threshold: f32,
	/// Number of octaves, -1 = derived from image size.
	pub octaves: i32,
	/// Levels per octave.
	pub levels: usize,
	/// Apply a luminance gain to dark images before detection.
	pub adapt_darkness: bool,
}

impl Default for SiftParams {
	fn default() -> Self {
		Self {
			max_features: crate::config::DEFAULT_MAX_FEATURES,
			peak_threshold: crate::config::DEFAULT_PEAK_THRESHOLD,
			octaves: -1,
			levels: crate::config::DEFAULT_LEVELS,
			adapt_darkness: true,
		}
	}
}

/// The extraction service contract: grayscale pixels in, keypoints plus
/// raw float descriptors (128 per keypoint) out. Implementations may hold
/// thread-affine state; callers must drive a given instance from a single
/// thread.
pub trait FeatureExtractor {
	fn extract(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<(Vec<Keypoint>, Vec<f32>)>;
}

const SIGMA_BASE: f32 = 1.6;
const ORIENTATION_BINS: usize = 36;
const DARK_MEAN_LIMIT: f32 = 90.0;
const BORDER: usize = 8;

/// CPU difference-of-Gaussians extractor.
pub struct DogExtractor {
	params: SiftParams,
}

impl DogExtractor {
	pub fn new(params: SiftParams) -> Self {
		Self { params }
	}
}

impl FeatureExtractor for DogExtractor {
	fn extract(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<(Vec<Keypoint>, Vec<f32>)> {
		let mut base = Plane::from_u8(width as usize, height as usize, pixels);

		if self.params.adapt_darkness {
			let mean = base.mean();
			if mean > 0.0 && mean < DARK_MEAN_LIMIT / 255.0 {
				let gain = ((128.0 / 255.0) / mean).min(3.0);
				base.scale_values(gain);
			}
		}

		let octaves = if self.params.octaves > 0 {
			self.params.octaves as usize
		} else {
			auto_octaves(width as usize, height as usize)
		};
		let levels = self.params.levels.max(1);
		let threshold = self.params.peak_threshold / levels as f32;

		let mut candidates: Vec<Candidate> = Vec::new();
		let mut current = base;

		for octave in 0..octaves {
			if current.width < 2 * BORDER + 2 || current.height < 2 * BORDER + 2 {
				break;
			}
			let gaussians = build_gaussians(&current, levels);
			let dogs = build_dogs(&gaussians);
			detect_octave(&gaussians, &dogs, octave, levels, threshold, &mut candidates);
			current = gaussians[levels].downsample();
		}

		// Strongest responses first; stable under equal response.
		candidates.sort_by(|a, b| {
			b.response
				.partial_cmp(&a.response)
				.unwrap_or(std::cmp::Ordering::Equal)
		});
		candidates.truncate(self.params.max_features);

		let mut keypoints = Vec::with_capacity(candidates.len());
		let mut descriptors = Vec::with_capacity(candidates.len() * DESCRIPTOR_DIM);
		for candidate in candidates {
			keypoints.push(candidate.keypoint);
			descriptors.extend_from_slice(&candidate.descriptor);
		}
		Ok((keypoints, descriptors))
	}
}

struct Candidate {
	keypoint: Keypoint,
	descriptor: [f32; DESCRIPTOR_DIM],
	response: f32,
}

fn auto_octaves(width: usize, height: usize) -> usize {
	let min_dim = width.min(height).max(1) as f32;
	((min_dim / 16.0).log2().floor() as i64).clamp(1, 6) as usize
}

struct Plane {
	width: usize,
	height: usize,
	data: Vec<f32>,
}

impl Plane {
	fn from_u8(width: usize, height: usize, pixels: &[u8]) -> Self {
		let data = pixels.iter().map(|&p| p as f32 / 255.0).collect();
		Self { width, height, data }
	}

	#[inline]
	fn at(&self, x: usize, y: usize) -> f32 {
		self.data[y * self.width + x]
	}

	fn mean(&self) -> f32 {
		if self.data.is_empty() {
			return 0.0;
		}
		self.data.iter().sum::<f32>() / self.data.len() as f32
	}

	fn scale_values(&mut self, gain: f32) {
		for value in &mut self.data {
			*value = (*value * gain).min(1.0);
		}
	}

	fn blur(&self, sigma: f32) -> Plane {
		let radius = (3.0 * sigma).ceil() as i64;
		let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
		let denom = 2.0 * sigma * sigma;
		for i in -radius..=radius {
			kernel.push((-(i * i) as f32 / denom).exp());
		}
		let sum: f32 = kernel.iter().sum();
		for k in &mut kernel {
			*k /= sum;
		}

		let clamp_x = |x: i64| x.clamp(0, self.width as i64 - 1) as usize;
		let clamp_y = |y: i64| y.clamp(0, self.height as i64 - 1) as usize;

		// Separable: horizontal pass then vertical pass.
		let mut horizontal = vec![0.0f32; self.data.len()];
		for y in 0..self.height {
			for x in 0..self.width {
				let mut acc = 0.0;
				for (ki, k) in kernel.iter().enumerate() {
					let sx = clamp_x(x as i64 + ki as i64 - radius);
					acc += self.at(sx, y) * k;
				}
				horizontal[y * self.width + x] = acc;
			}
		}

		let mut out = vec![0.0f32; self.data.len()];
		for y in 0..self.height {
			for x in 0..self.width {
				let mut acc = 0.0;
				for (ki, k) in kernel.iter().enumerate() {
					let sy = clamp_y(y as i64 + ki as i64 - radius);
					acc += horizontal[sy * self.width + x] * k;
				}
				out[y * self.width + x] = acc;
			}
		}

		Plane { width: self.width, height: self.height, data: out }
	}

	fn downsample(&self) -> Plane {
		let width = (self.width / 2).max(1);
		let height = (self.height / 2).max(1);
		let mut data = Vec::with_capacity(width * height);
		for y in 0..height {
			for x in 0..width {
				data.push(self.at(x * 2, y * 2));
			}
		}
		Plane { width, height, data }
	}

	fn gradient(&self, x: usize, y: usize) -> (f32, f32) {
		let dx = self.at(x + 1, y) - self.at(x - 1, y);
		let dy = self.at(x, y + 1) - self.at(x, y - 1);
		let magnitude = (dx * dx + dy * dy).sqrt();
		let angle = dy.atan2(dx);
		(magnitude, angle)
	}
}

fn build_gaussians(base: &Plane, levels: usize) -> Vec<Plane> {
	let k = 2.0f32.powf(1.0 / levels as f32);
	let mut gaussians = Vec::with_capacity(levels + 3);
	gaussians.push(base.blur(SIGMA_BASE));
	for s in 1..levels + 3 {
		let sigma_prev = SIGMA_BASE * k.powi(s as i32 - 1);
		let sigma_next = sigma_prev * k;
		// Incremental blur: the difference sigma takes the previous level
		// to the next one.
		let sigma_diff = (sigma_next * sigma_next - sigma_prev * sigma_prev).sqrt();
		let blurred = gaussians[s - 1].blur(sigma_diff);
		gaussians.push(blurred);
	}
	gaussians
}

fn build_dogs(gaussians: &[Plane]) -> Vec<Plane> {
	gaussians
		.windows(2)
		.map(|pair| {
			let data = pair[1]
				.data
				.iter()
				.zip(pair[0].data.iter())
				.map(|(a, b)| a - b)
				.collect();
			Plane { width: pair[0].width, height: pair[0].height, data }
		})
		.collect()
}

fn detect_octave(
	gaussians: &[Plane],
	dogs: &[Plane],
	octave: usize,
	levels: usize,
	threshold: f32,
	out: &mut Vec<Candidate>,
) {
	let k = 2.0f32.powf(1.0 / levels as f32);
	let octave_scale = (1usize << octave) as f32;

	for s in 1..=levels {
		let (below, here, above) = (&dogs[s - 1], &dogs[s], &dogs[s + 1]);
		for y in BORDER..here.height - BORDER {
			for x in BORDER..here.width - BORDER {
				let value = here.at(x, y);
				if value.abs() < threshold {
					continue;
				}
				if !is_extremum(below, here, above, x, y, value) {
					continue;
				}

				let level_sigma = SIGMA_BASE * k.powi(s as i32);
				let orientation = dominant_orientation(&gaussians[s], x, y, level_sigma);
				let descriptor = describe(&gaussians[s], x, y, orientation, level_sigma);

				out.push(Candidate {
					keypoint: Keypoint {
						x: x as f32 * octave_scale,
						y: y as f32 * octave_scale,
						scale: level_sigma * octave_scale,
						orientation,
					},
					descriptor,
					response: value.abs(),
				});
			}
		}
	}
}

/// True if `value` is a strict extremum over its 26 scale-space neighbors.
fn is_extremum(below: &Plane, here: &Plane, above: &Plane, x: usize, y: usize, value: f32) -> bool {
	let maximum = value > 0.0;
	for plane in [below, here, above] {
		for dy in -1i64..=1 {
			for dx in -1i64..=1 {
				let nx = (x as i64 + dx) as usize;
				let ny = (y as i64 + dy) as usize;
				if std::ptr::eq(plane, here) && dx == 0 && dy == 0 {
					continue;
				}
				let neighbor = plane.at(nx, ny);
				if (maximum && neighbor >= value) || (!maximum && neighbor <= value) {
					return false;
				}
			}
		}
	}
	true
}

fn dominant_orientation(plane: &Plane, x: usize, y: usize, sigma: f32) -> f32 {
	let radius = (4.5 * sigma).round().max(1.0) as i64;
	let weight_denom = 2.0 * (1.5 * sigma) * (1.5 * sigma);
	let mut histogram = [0.0f32; ORIENTATION_BINS];

	for dy in -radius..=radius {
		for dx in -radius..=radius {
			let px = x as i64 + dx;
			let py = y as i64 + dy;
			if px < 1 || py < 1 || px >= plane.width as i64 - 1 || py >= plane.height as i64 - 1 {
				continue;
			}
			let (magnitude, angle) = plane.gradient(px as usize, py as usize);
			let weight = (-((dx * dx + dy * dy) as f32) / weight_denom).exp();
			let normalized = (angle + std::f32::consts::PI) / std::f32::consts::TAU;
			let bin = ((normalized * ORIENTATION_BINS as f32) as usize).min(ORIENTATION_BINS - 1);
			histogram[bin] += magnitude * weight;
		}
	}

	let best = histogram
		.iter()
		.enumerate()
		.max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
		.map(|(bin, _)| bin)
		.unwrap_or(0);

	(best as f32 + 0.5) / ORIENTATION_BINS as f32 * std::f32::consts::TAU - std::f32::consts::PI
}

/// 4x4 spatial cells x 8 orientation bins over a rotated sampling window.
fn describe(plane: &Plane, x: usize, y: usize, orientation: f32, sigma: f32) -> [f32; DESCRIPTOR_DIM] {
	let mut descriptor = [0.0f32; DESCRIPTOR_DIM];
	let cos_o = orientation.cos();
	let sin_o = orientation.sin();
	let step = (sigma * 0.75).max(0.5);

	for sample_y in 0..16 {
		for sample_x in 0..16 {
			// Window coordinates in [-8, 8), rotated into the keypoint frame.
			let wx = (sample_x as f32 - 7.5) * step;
			let wy = (sample_y as f32 - 7.5) * step;
			let px = x as f32 + wx * cos_o - wy * sin_o;
			let py = y as f32 + wx * sin_o + wy * cos_o;

			let ix = px.round() as i64;
			let iy = py.round() as i64;
			if ix < 1 || iy < 1 || ix >= plane.width as i64 - 1 || iy >= plane.height as i64 - 1 {
				continue;
			}

			let (magnitude, angle) = plane.gradient(ix as usize, iy as usize);
			let relative = angle - orientation;
			let normalized = (relative.rem_euclid(std::f32::consts::TAU)) / std::f32::consts::TAU;
			let orientation_bin = ((normalized * 8.0) as usize).min(7);

			let cell = (sample_y / 4) * 4 + (sample_x / 4);
			descriptor[cell * 8 + orientation_bin] += magnitude;
		}
	}

	descriptor
}
