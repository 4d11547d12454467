//! Match command - descriptor matching over a pair list

use anyhow::{bail, Result};
use std::path::Path;
use std::time::Instant;

use crate::core::pairs;
use crate::matching::{run_matching, CpuMatcher, MatchOptions, MatchingParams};
use crate::ui;

pub fn run(
	input: &Path,
	output: &Path,
	ratio: f32,
	distance_max: f32,
	max_matches: i64,
	no_mutual: bool,
	threads: usize,
) -> Result<()> {
	let start = Instant::now();

	ui::header(&format!("Parallax v{} - feature matching", env!("CARGO_PKG_VERSION")));
	ui::info(&format!("Ratio test: {}, distance max: {}", ratio, distance_max));
	ui::debug(&format!(
		"Max matches: {}, mutual best: {}, I/O threads: {}",
		if max_matches > 0 { max_matches.to_string() } else { "unlimited".to_string() },
		!no_mutual,
		threads
	));

	let pair_entries = pairs::read_pair_list(input)?;
	if pair_entries.is_empty() {
		bail!("No pairs to process");
	}

	let options = MatchOptions {
		ratio_test: ratio,
		distance_max,
		max_matches: (max_matches > 0).then_some(max_matches as usize),
		mutual_best_match: !no_mutual,
		..MatchOptions::default()
	};
	let params = MatchingParams {
		options,
		num_io_threads: threads.max(1),
		..MatchingParams::default()
	};

	let stats = run_matching(&pair_entries, CpuMatcher::new(), output, &params)?;

	let elapsed = start.elapsed().as_secs_f32();
	ui::success(&format!(
		"Matched {}/{} pairs ({} total matches) in {:.1}s",
		stats.pairs_with_matches, stats.total_pairs, stats.total_matches, elapsed
	));
	if stats.pairs_with_matches > 0 {
		ui::info(&format!(
			"Average matches/pair: {}",
			stats.total_matches / stats.pairs_with_matches
		));
	}
	Ok(())
}
