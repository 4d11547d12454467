// Parallax - Structure-from-Motion preprocessing toolchain
//
// Three pipeline tools plus codebook training:
// - extract: image list -> .isat_feat feature containers
// - retrieve: feature directory -> scored candidate pair list
// - match: pair list -> .isat_match containers
// - train-vlad: feature directory -> .vcbt codebook (+ optional .pca)

use anyhow::Result;
use clap::Parser;

use parallax::cli::{Cli, Command};
use parallax::commands;
use parallax::ui::{self, Log};

fn main() {
	let cli = Cli::parse();
	if let Err(e) = dispatch(cli.command) {
		ui::error(&format!("{:#}", e));
		std::process::exit(1);
	}
}

fn dispatch(command: Command) -> Result<()> {
	match command {
		Command::Extract {
			input,
			output,
			nfeatures,
			threshold,
			octaves,
			levels,
			no_adapt,
			norm,
			uint8,
			nms,
			nms_radius,
			nms_no_orient,
			verbose,
			quiet,
		} => {
			Log::set_verbose(verbose);
			Log::set_quiet(quiet);
			commands::extract::run(
				&input,
				&output,
				nfeatures,
				threshold,
				octaves,
				levels,
				no_adapt,
				&norm,
				uint8,
				nms,
				nms_radius,
				nms_no_orient,
			)
		}
		Command::Retrieve {
			features,
			output,
			input,
			strategy,
			max_pairs,
			window,
			distance_threshold,
			angle_threshold,
			max_neighbors,
			top_k,
			vlad_codebook,
			vlad_cache,
			pca_model,
			vocab_file,
			verbose,
			quiet,
		} => {
			Log::set_verbose(verbose);
			Log::set_quiet(quiet);
			commands::retrieve::run(
				&features,
				&output,
				input.as_deref(),
				&strategy,
				max_pairs,
				window,
				distance_threshold,
				angle_threshold,
				max_neighbors,
				top_k,
				vlad_codebook,
				vlad_cache,
				pca_model,
				vocab_file,
			)
		}
		Command::Match {
			input,
			output,
			ratio,
			distance_max,
			max_matches,
			no_mutual,
			threads,
			verbose,
			quiet,
		} => {
			Log::set_verbose(verbose);
			Log::set_quiet(quiet);
			commands::matching::run(
				&input,
				&output,
				ratio,
				distance_max,
				max_matches,
				no_mutual,
				threads,
			)
		}
		Command::TrainVlad {
			features,
			output,
			clusters,
			max_descriptors,
			max_per_image,
			iterations,
			pca_output,
			pca_dims,
			whiten,
			verbose,
			quiet,
		} => {
			Log::set_verbose(verbose);
			Log::set_quiet(quiet);
			commands::train::run(
				&features,
				&output,
				clusters,
				max_descriptors,
				max_per_image,
				iterations,
				pca_output.as_deref(),
				pca_dims,
				whiten,
			)
		}
	}
}
