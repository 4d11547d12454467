//! # Extraction Driver
//!
//! Four chained stages turn an image list into `.isat_feat` containers:
//! decode (worker pool) → extract (pinned thread) → post-process (worker
//! pool) → write (worker pool). The extract stage runs on the thread that
//! calls the driver because the extraction backend may own a thread-affine
//! GPU context; its short queue throttles the loaders so pipeline memory
//! stays bounded.

pub mod nms;
pub mod normalize;
pub mod sift;

pub use nms::{spatial_filter, NmsParams};
pub use normalize::{normalize_descriptors, quantize_descriptors, Normalization};
pub use sift::{DogExtractor, FeatureExtractor, SiftParams};

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use crate::config::{
	self, DESCRIPTOR_DIM, EXTRACT_GPU_QUEUE_CAPACITY, IO_QUEUE_CAPACITY, NUM_IO_THREADS,
	QUANTIZATION_SCALE,
};
use crate::container::{feature_metadata, ContainerWriter, DescriptorSchema};
use crate::core::{ImageInfo, Keypoint};
use crate::pipeline::{chain, PinnedStage, PipelineStage, Stage};
use crate::ui;

#[derive(Debug, Clone)]
pub struct ExtractionParams {
	pub sift: SiftParams,
	pub normalization: Normalization,
	pub use_uint8: bool,
	pub nms: Option<NmsParams>,
	pub num_io_threads: usize,
	pub io_queue_capacity: usize,
	pub extract_queue_capacity: usize,
}

impl Default for ExtractionParams {
	fn default() -> Self {
		Self {
			sift: SiftParams::default(),
			normalization: Normalization::L1Root,
			use_uint8: false,
			nms: None,
			num_io_threads: NUM_IO_THREADS,
			io_queue_capacity: IO_QUEUE_CAPACITY,
			extract_queue_capacity: EXTRACT_GPU_QUEUE_CAPACITY,
		}
	}
}

#[derive(Debug, Default)]
pub struct ExtractionStats {
	pub processed: usize,
	pub failed: usize,
	pub total_features: usize,
}

/// Per-image work record. One slot per input index lives in a shared array;
/// the pipeline topology guarantees a single writer at a time, the mutex
/// makes that guarantee checkable.
#[derive(Default)]
struct ImageTask {
	image_path: String,
	camera_id: i32,
	width: u32,
	height: u32,
	pixels: Option<Vec<u8>>,
	keypoints: Vec<Keypoint>,
	descriptors_f32: Vec<f32>,
	descriptors_u8: Vec<u8>,
	extract_ms: u64,
	failed: bool,
}

/// Run the extraction pipeline over `images`, writing one `.isat_feat` per
/// image into `output_dir`. The calling thread drives the pinned extract
/// stage and only returns once every stage has drained.
pub fn run_extraction<E>(
	images: &[ImageInfo],
	extractor: E,
	output_dir: &Path,
	params: &ExtractionParams,
) -> Result<ExtractionStats>
where
	E: FeatureExtractor + Send + 'static,
{
	let total = images.len();
	if total == 0 {
		bail!("No images to process");
	}
	std::fs::create_dir_all(output_dir)?;

	let slots: Arc<Vec<Mutex<ImageTask>>> = Arc::new(
		images
			.iter()
			.map(|image| {
				Mutex::new(ImageTask {
					image_path: image.image_path.clone(),
					camera_id: image.camera_id,
					..ImageTask::default()
				})
			})
			.collect(),
	);

	let fatal = Arc::new(AtomicBool::new(false));
	let processed = Arc::new(AtomicUsize::new(0));
	let failed = Arc::new(AtomicUsize::new(0));
	let total_features = Arc::new(AtomicUsize::new(0));
	let completed = Arc::new(AtomicUsize::new(0));

	let load_stage = {
		let slots = Arc::clone(&slots);
		Stage::new("load", params.num_io_threads, params.io_queue_capacity, move |index| {
			let mut task = slots[index].lock().unwrap();
			match image::open(&task.image_path) {
				Ok(img) => {
					let gray = img.to_luma8();
					task.width = gray.width();
					task.height = gray.height();
					ui::debug(&format!(
						"Loaded image [{}]: {} ({}x{})",
						index, task.image_path, task.width, task.height
					));
					task.pixels = Some(gray.into_raw());
				}
				Err(e) => {
					ui::error(&format!("Failed to load image {}: {}", task.image_path, e));
					task.failed = true;
				}
			}
		})
	};

	let extract_stage = {
		let slots = Arc::clone(&slots);
		let fatal = Arc::clone(&fatal);
		let extractor = Mutex::new(extractor);
		PinnedStage::new("extract", params.extract_queue_capacity, move |index| {
			if fatal.load(Ordering::Acquire) {
				return;
			}
			let mut task = slots[index].lock().unwrap();
			// Decode failures skip the remaining stages for this index.
			let Some(pixels) = task.pixels.take() else {
				return;
			};

			let start = Instant::now();
			let result = extractor
				.lock()
				.unwrap()
				.extract(task.width, task.height, &pixels);
			task.extract_ms = start.elapsed().as_millis() as u64;
			// `pixels` drops here: the image buffer is not needed past
			// this stage.

			match result {
				Ok((keypoints, descriptors)) => {
					if keypoints.is_empty() {
						ui::warn(&format!(
							"No features extracted from [{}] - {}",
							index, task.image_path
						));
					} else {
						ui::debug(&format!(
							"Extracted {} features from [{}] in {}ms",
							keypoints.len(),
							index,
							task.extract_ms
						));
					}
					task.keypoints = keypoints;
					task.descriptors_f32 = descriptors;
				}
				Err(e) => {
					// Losing the extraction backend is not recoverable.
					ui::error(&format!("Feature extractor failed on [{}]: {}", index, e));
					fatal.store(true, Ordering::Release);
				}
			}
		})
	};

	let post_stage = {
		let slots = Arc::clone(&slots);
		let normalization = params.normalization;
		let use_uint8 = params.use_uint8;
		let nms = params.nms;
		Stage::new("post", params.num_io_threads, params.io_queue_capacity, move |index| {
			let mut task = slots[index].lock().unwrap();
			if task.keypoints.is_empty() {
				return;
			}

			normalize_descriptors(&mut task.descriptors_f32, normalization);

			if let Some(nms_params) = &nms {
				let (keypoints, descriptors) = spatial_filter(
					&task.keypoints,
					&task.descriptors_f32,
					task.width,
					task.height,
					nms_params,
				);
				task.keypoints = keypoints;
				task.descriptors_f32 = descriptors;
			}

			if use_uint8 {
				task.descriptors_u8 = quantize_descriptors(&task.descriptors_f32);
				// Quantized copy replaces the float buffer.
				task.descriptors_f32 = Vec::new();
			}
		})
	};

	let write_stage = {
		let slots = Arc::clone(&slots);
		let output_dir = output_dir.to_path_buf();
		let sift = params.sift;
		let normalization = params.normalization;
		let use_uint8 = params.use_uint8;
		let nms = params.nms;
		let processed = Arc::clone(&processed);
		let failed = Arc::clone(&failed);
		let total_features = Arc::clone(&total_features);
		let completed = Arc::clone(&completed);
		Stage::new("write", params.num_io_threads, params.io_queue_capacity, move |index| {
			let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
			let mut task = slots[index].lock().unwrap();

			if task.failed {
				failed.fetch_add(1, Ordering::Relaxed);
				ui::progress(done as f32 / total as f32);
				return;
			}
			if task.keypoints.is_empty() {
				// Zero features is degenerate, not an error: no output file.
				failed.fetch_add(1, Ordering::Relaxed);
				ui::progress(done as f32 / total as f32);
				return;
			}

			match write_feature_file(&output_dir, &task, sift, normalization, use_uint8, &nms) {
				Ok(path) => {
					ui::debug(&format!("Written features [{}]: {}", index, path.display()));
					processed.fetch_add(1, Ordering::Relaxed);
					total_features.fetch_add(task.keypoints.len(), Ordering::Relaxed);
				}
				Err(e) => {
					ui::error(&format!("Failed to write features for [{}]: {}", index, e));
					failed.fetch_add(1, Ordering::Relaxed);
				}
			}

			// Release all task memory.
			*task = ImageTask::default();
			ui::progress(done as f32 / total as f32);
		})
	};

	chain(&load_stage, &extract_stage);
	chain(&extract_stage, &post_stage);
	chain(&post_stage, &write_stage);

	load_stage.set_task_count(total);
	extract_stage.set_task_count(total);
	post_stage.set_task_count(total);
	write_stage.set_task_count(total);

	thread::scope(|scope| {
		scope.spawn(|| {
			for index in 0..total {
				if load_stage.is_stopped() {
					break;
				}
				load_stage.push(index);
			}
		});
		// The extraction backend lives on this thread.
		extract_stage.run();
	});

	load_stage.wait();
	post_stage.wait();
	write_stage.wait();

	if fatal.load(Ordering::Acquire) {
		bail!("Feature extractor failed; output is partial");
	}

	Ok(ExtractionStats {
		processed: processed.load(Ordering::Relaxed),
		failed: failed.load(Ordering::Relaxed),
		total_features: total_features.load(Ordering::Relaxed),
	})
}

fn write_feature_file(
	output_dir: &Path,
	task: &ImageTask,
	sift: SiftParams,
	normalization: Normalization,
	use_uint8: bool,
	nms: &Option<NmsParams>,
) -> Result<PathBuf> {
	let stem = Path::new(&task.image_path)
		.file_stem()
		.map(|s| s.to_string_lossy().to_string())
		.unwrap_or_else(|| task.image_path.clone());
	let output_path = output_dir.join(format!("{}.{}", stem, config::FEATURE_EXT));

	let mut parameters = serde_json::json!({
		"nfeatures": sift.max_features,
		"threshold": sift.peak_threshold,
		"octaves": sift.octaves,
		"levels": sift.levels,
		"adapt_darkness": sift.adapt_darkness,
		"normalization": normalization.name(),
		"uint8": use_uint8,
		"nms_enabled": nms.is_some(),
	});
	if let Some(nms_params) = nms {
		parameters["nms_radius"] = serde_json::json!(nms_params.radius);
		parameters["nms_keep_orientation"] = serde_json::json!(nms_params.keep_orientation);
	}

	let schema = DescriptorSchema {
		feature_type: "sift".to_string(),
		descriptor_dim: DESCRIPTOR_DIM,
		descriptor_dtype: if use_uint8 { "uint8" } else { "float32" }.to_string(),
		normalization: normalization.name().to_string(),
		quantization_scale: if use_uint8 { QUANTIZATION_SCALE } else { 1.0 },
	};

	let mut metadata = feature_metadata(
		&task.image_path,
		"SIFT_DOG",
		env!("CARGO_PKG_VERSION"),
		parameters,
		Some(&schema),
		task.extract_ms,
	);
	metadata["metadata"]["camera_id"] = serde_json::json!(task.camera_id);

	let mut writer = ContainerWriter::new(&output_path);
	writer.set_metadata(metadata);

	let keypoint_data: Vec<f32> = task
		.keypoints
		.iter()
		.flat_map(|kp| [kp.x, kp.y, kp.scale, kp.orientation])
		.collect();
	writer.add_blob_f32("keypoints", &keypoint_data, &[task.keypoints.len(), 4]);

	if use_uint8 {
		writer.add_blob(
			"descriptors",
			&task.descriptors_u8,
			"uint8",
			&[task.keypoints.len(), DESCRIPTOR_DIM],
		);
	} else {
		writer.add_blob_f32(
			"descriptors",
			&task.descriptors_f32,
			&[task.keypoints.len(), DESCRIPTOR_DIM],
		);
	}

	writer.write()?;
	Ok(output_path)
}
