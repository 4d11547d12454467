//! # Matching Driver
//!
//! Three chained stages turn a pair list into `.isat_match` containers:
//! load features (worker pool) → match (pinned thread) → write (worker
//! pool). Feature buffers stay on the task until the writer has derived
//! coordinates and distances from them, then the whole slot is released.

pub mod matcher;

pub use matcher::{descriptor_distance, CpuMatcher, DescriptorMatcher, MatchOptions};

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::{self, IO_QUEUE_CAPACITY, MATCH_GPU_QUEUE_CAPACITY, NUM_IO_THREADS};
use crate::container::{match_metadata, ContainerWriter};
use crate::core::{FeatureSet, PairEntry};
use crate::pipeline::{chain, PinnedStage, PipelineStage, Stage};
use crate::ui;

#[derive(Debug, Clone)]
pub struct MatchingParams {
	pub options: MatchOptions,
	pub num_io_threads: usize,
	pub io_queue_capacity: usize,
	pub match_queue_capacity: usize,
}

impl Default for MatchingParams {
	fn default() -> Self {
		Self {
			options: MatchOptions::default(),
			num_io_threads: NUM_IO_THREADS,
			io_queue_capacity: IO_QUEUE_CAPACITY,
			match_queue_capacity: MATCH_GPU_QUEUE_CAPACITY,
		}
	}
}

#[derive(Debug, Default)]
pub struct MatchingStats {
	pub total_pairs: usize,
	pub pairs_with_matches: usize,
	pub total_matches: usize,
}

/// Per-pair work record in the shared slot array.
#[derive(Default)]
struct PairTask {
	image1_id: String,
	image2_id: String,
	feature1_file: String,
	feature2_file: String,
	features1: Option<FeatureSet>,
	features2: Option<FeatureSet>,
	matches: Vec<(u32, u32)>,
}

/// Run the matching pipeline over `pairs`, writing one `.isat_match` per
/// pair with a non-zero match count. The calling thread drives the pinned
/// match stage.
pub fn run_matching<M>(
	pairs: &[PairEntry],
	matcher: M,
	output_dir: &Path,
	params: &MatchingParams,
) -> Result<MatchingStats>
where
	M: DescriptorMatcher + Send + 'static,
{
	let total = pairs.len();
	if total == 0 {
		bail!("No pairs to process");
	}
	std::fs::create_dir_all(output_dir)?;

	let slots: Arc<Vec<Mutex<PairTask>>> = Arc::new(
		pairs
			.iter()
			.map(|entry| {
				Mutex::new(PairTask {
					image1_id: entry.image1_id.clone(),
					image2_id: entry.image2_id.clone(),
					feature1_file: entry.feature1_file.clone(),
					feature2_file: entry.feature2_file.clone(),
					..PairTask::default()
				})
			})
			.collect(),
	);

	let pairs_with_matches = Arc::new(AtomicUsize::new(0));
	let total_matches = Arc::new(AtomicUsize::new(0));
	let completed = Arc::new(AtomicUsize::new(0));

	let load_stage = {
		let slots = Arc::clone(&slots);
		Stage::new("load", params.num_io_threads, params.io_queue_capacity, move |index| {
			let mut task = slots[index].lock().unwrap();

			task.features1 = load_features(&task.feature1_file);
			task.features2 = load_features(&task.feature2_file);

			if let (Some(f1), Some(f2)) = (&task.features1, &task.features2) {
				if f1.descriptor_type() != f2.descriptor_type() {
					ui::warn(&format!(
						"Skipping pair [{}] {} - {}: descriptor dtype mismatch",
						index, task.image1_id, task.image2_id
					));
					task.features1 = None;
					task.features2 = None;
				} else {
					ui::debug(&format!(
						"Loaded pair [{}]: {} ({}) vs {} ({})",
						index,
						task.image1_id,
						f1.len(),
						task.image2_id,
						f2.len()
					));
				}
			}
		})
	};

	let match_stage = {
		let slots = Arc::clone(&slots);
		let options = params.options.clone();
		let matcher = Mutex::new(matcher);
		PinnedStage::new("match", params.match_queue_capacity, move |index| {
			let mut task = slots[index].lock().unwrap();
			let (Some(f1), Some(f2)) = (&task.features1, &task.features2) else {
				return;
			};
			if f1.is_empty() || f2.is_empty() {
				ui::warn(&format!("Skipping pair [{}] - empty features", index));
				return;
			}

			match matcher.lock().unwrap().matches(f1, f2, &options) {
				Ok(matches) => {
					ui::debug(&format!("Matched pair [{}]: {} matches", index, matches.len()));
					task.matches = matches;
				}
				Err(e) => {
					// A failed pair does not stop the run.
					ui::warn(&format!("Matcher failed on pair [{}]: {}", index, e));
				}
			}
		})
	};

	let write_stage = {
		let slots = Arc::clone(&slots);
		let output_dir = output_dir.to_path_buf();
		let pairs_with_matches = Arc::clone(&pairs_with_matches);
		let total_matches = Arc::clone(&total_matches);
		let completed = Arc::clone(&completed);
		Stage::new("write", params.num_io_threads, params.io_queue_capacity, move |index| {
			let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
			let mut task = slots[index].lock().unwrap();

			if task.matches.is_empty() {
				ui::warn(&format!(
					"No matches for pair {} - {}",
					task.image1_id, task.image2_id
				));
			} else {
				match write_match_file(&output_dir, &task) {
					Ok(count) => {
						pairs_with_matches.fetch_add(1, Ordering::Relaxed);
						total_matches.fetch_add(count, Ordering::Relaxed);
					}
					Err(e) => {
						ui::error(&format!("Failed to write pair [{}]: {}", index, e));
					}
				}
			}

			// Release features and matches together.
			*task = PairTask::default();
			ui::progress(done as f32 / total as f32);
		})
	};

	chain(&load_stage, &match_stage);
	chain(&match_stage, &write_stage);

	load_stage.set_task_count(total);
	match_stage.set_task_count(total);
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
		// The matching backend lives on this thread.
		match_stage.run();
	});

	load_stage.wait();
	write_stage.wait();

	Ok(MatchingStats {
		total_pairs: total,
		pairs_with_matches: pairs_with_matches.load(Ordering::Relaxed),
		total_matches: total_matches.load(Ordering::Relaxed),
	})
}

fn load_features(path: &str) -> Option<FeatureSet> {
	match FeatureSet::load(Path::new(path)) {
		Ok(features) => Some(features),
		Err(e) => {
			ui::warn(&format!("Failed to load features {}: {}", path, e));
			None
		}
	}
}

/// Synthesize the on-disk match result: u16 index pairs, pixel coordinate
/// quadruples, and native-dtype L2 distances. Out-of-range indices from
/// the matching backend are dropped with a warning.
fn write_match_file(output_dir: &Path, task: &PairTask) -> Result<usize> {
	let (Some(f1), Some(f2)) = (&task.features1, &task.features2) else {
		bail!("features released before write");
	};

	let mut indices: Vec<u16> = Vec::with_capacity(task.matches.len() * 2);
	let mut coords: Vec<f32> = Vec::with_capacity(task.matches.len() * 4);
	let mut distances: Vec<f32> = Vec::with_capacity(task.matches.len());

	for &(idx1, idx2) in &task.matches {
		let (i, j) = (idx1 as usize, idx2 as usize);
		if i >= f1.len() || j >= f2.len() {
			ui::warn(&format!("Invalid match index: {} vs {}", idx1, idx2));
			continue;
		}
		indices.push(idx1 as u16);
		indices.push(idx2 as u16);

		let kp1 = &f1.keypoints[i];
		let kp2 = &f2.keypoints[j];
		coords.extend_from_slice(&[kp1.x, kp1.y, kp2.x, kp2.y]);
		distances.push(descriptor_distance(f1, f2, i, j));
	}

	let num_matches = distances.len();
	if num_matches == 0 {
		bail!("all matches had invalid indices");
	}

	let output_path = output_dir.join(format!(
		"{}_{}.{}",
		task.image1_id,
		task.image2_id,
		config::MATCH_EXT
	));

	let mut writer = ContainerWriter::new(&output_path);
	writer.set_metadata(match_metadata(
		&task.image1_id,
		&task.image2_id,
		"SIFT_DOG",
		env!("CARGO_PKG_VERSION"),
		num_matches,
	));
	writer.add_blob_u16("indices", &indices, &[num_matches, 2]);
	writer.add_blob_f32("coords_pixel", &coords, &[num_matches, 4]);
	writer.add_blob_f32("distances", &distances, &[num_matches]);
	writer.write()?;

	ui::debug(&format!(
		"Wrote {} matches to {}",
		num_matches,
		output_path.display()
	));
	Ok(num_matches)
}
