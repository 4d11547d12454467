// CLI - Command-line interface with one subcommand per tool

use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::{
	DEFAULT_GPS_DISTANCE, DEFAULT_KMEANS_ITERATIONS, DEFAULT_LEVELS, DEFAULT_MAX_FEATURES,
	DEFAULT_MAX_NEIGHBORS, DEFAULT_NMS_RADIUS, DEFAULT_PCA_DIMS, DEFAULT_PEAK_THRESHOLD,
	DEFAULT_RATIO_TEST, DEFAULT_SEQUENTIAL_WINDOW, DEFAULT_TOP_K, DEFAULT_TRAIN_MAX_DESCRIPTORS,
	DEFAULT_TRAIN_MAX_PER_IMAGE, DEFAULT_VLAD_CLUSTERS, NUM_IO_THREADS,
};

fn styles() -> Styles {
	Styles::styled()
		.header(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
		.usage(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
		.literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
		.placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
		.valid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
		.invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))))
}

#[derive(Parser, Debug)]
#[command(
	name = "parallax",
	author,
	version,
	about = "Structure-from-Motion preprocessing toolchain",
	styles = styles(),
	after_help = format!(
		"{}\n  {} {} -i images.json -o feats/          {}\n  {} {} -f feats/ -s gps+sequential -o p.json  {}\n  {} {} -i p.json -o matches/             {}",
		"Examples:".cyan().bold(),
		"parallax".green(), "extract".yellow(),  "Extract SIFT features".dimmed(),
		"parallax".green(), "retrieve".yellow(), "Generate candidate pairs".dimmed(),
		"parallax".green(), "match".yellow(),    "Match feature pairs".dimmed(),
	),
)]
pub struct Cli {
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Extract SIFT features into .isat_feat containers
	Extract {
		/// Input image list (JSON format)
		#[arg(short = 'i', long = "input")]
		input: PathBuf,

		/// Output directory for .isat_feat files
		#[arg(short = 'o', long = "output")]
		output: PathBuf,

		/// Maximum features per image
		#[arg(short = 'n', long = "nfeatures", default_value_t = DEFAULT_MAX_FEATURES)]
		nfeatures: usize,

		/// Peak threshold
		#[arg(short = 't', long = "threshold", default_value_t = DEFAULT_PEAK_THRESHOLD)]
		threshold: f32,

		/// Number of octaves, -1 = auto
		#[arg(long = "octaves", default_value_t = -1)]
		octaves: i32,

		/// Levels per octave
		#[arg(long = "levels", default_value_t = DEFAULT_LEVELS)]
		levels: usize,

		/// Disable dark image adaptation
		#[arg(long = "no-adapt")]
		no_adapt: bool,

		/// Normalization: l1root (RootSIFT) or l2
		#[arg(long = "norm", default_value = "l1root")]
		norm: String,

		/// Quantize descriptors to uint8 (saves memory)
		#[arg(long = "uint8")]
		uint8: bool,

		/// Enable spatial non-maximum suppression
		#[arg(long = "nms")]
		nms: bool,

		/// NMS radius in pixels
		#[arg(long = "nms-radius", default_value_t = DEFAULT_NMS_RADIUS)]
		nms_radius: f32,

		/// NMS ignores orientation (removes multi-orientation keypoints)
		#[arg(long = "nms-no-orient")]
		nms_no_orient: bool,

		/// Verbose logging
		#[arg(short = 'v', long = "verbose")]
		verbose: bool,

		/// Quiet mode (errors only)
		#[arg(short = 'q', long = "quiet")]
		quiet: bool,
	},

	/// Generate candidate image pairs for matching
	#[command(after_help = format!(
		"{}\n  {} : all C(N,2) pairs\n  {} : windowed, for ordered input\n  {} : GNSS radius search\n  {} : VLAD visual similarity\n  {} : bag-of-words similarity\n  {} : run both and merge",
		"Strategies:".cyan().bold(),
		"exhaustive".green(),
		"sequential".green(),
		"gps".green(),
		"vlad".green(),
		"vocab".green(),
		"gps+sequential".yellow(),
	))]
	Retrieve {
		/// Feature directory containing .isat_feat files
		#[arg(short = 'f', long = "features")]
		features: PathBuf,

		/// Output pairs file (JSON format)
		#[arg(short = 'o', long = "output")]
		output: PathBuf,

		/// Input image list (JSON, with optional GNSS/IMU blocks)
		#[arg(short = 'i', long = "input")]
		input: Option<PathBuf>,

		/// Strategy spec, e.g. gps, vlad, gps+sequential
		#[arg(short = 's', long = "strategy", default_value = "exhaustive")]
		strategy: String,

		/// Maximum number of pairs, -1 = unlimited
		#[arg(short = 'm', long = "max-pairs", default_value_t = -1)]
		max_pairs: i64,

		/// Window size for the sequential strategy
		#[arg(short = 'w', long = "window", default_value_t = DEFAULT_SEQUENTIAL_WINDOW)]
		window: usize,

		/// GPS distance threshold in meters
		#[arg(short = 'd', long = "distance-threshold", default_value_t = DEFAULT_GPS_DISTANCE)]
		distance_threshold: f64,

		/// IMU angle threshold in degrees, 0 = disabled
		#[arg(short = 'a', long = "angle-threshold", default_value_t = 0.0)]
		angle_threshold: f64,

		/// Max neighbors per image for GPS retrieval
		#[arg(long = "max-neighbors", default_value_t = DEFAULT_MAX_NEIGHBORS)]
		max_neighbors: usize,

		/// Top-k most similar images per query for visual retrieval
		#[arg(short = 'k', long = "top-k", default_value_t = DEFAULT_TOP_K)]
		top_k: usize,

		/// VLAD codebook file (.vcbt)
		#[arg(long = "vlad-codebook")]
		vlad_codebook: Option<PathBuf>,

		/// Directory for VLAD vector cache (.isat_vlad files)
		#[arg(long = "vlad-cache")]
		vlad_cache: Option<PathBuf>,

		/// PCA model file (.pca) applied to VLAD vectors
		#[arg(long = "pca-model")]
		pca_model: Option<PathBuf>,

		/// Vocabulary file (.vcbt) for bag-of-words retrieval
		#[arg(long = "vocab-file")]
		vocab_file: Option<PathBuf>,

		/// Verbose logging
		#[arg(short = 'v', long = "verbose")]
		verbose: bool,

		/// Quiet mode (errors only)
		#[arg(short = 'q', long = "quiet")]
		quiet: bool,
	},

	/// Match feature pairs into .isat_match containers
	Match {
		/// Input pairs list (JSON, from parallax retrieve)
		#[arg(short = 'i', long = "input")]
		input: PathBuf,

		/// Output directory for .isat_match files
		#[arg(short = 'o', long = "output")]
		output: PathBuf,

		/// Lowe ratio test threshold
		#[arg(short = 'r', long = "ratio", default_value_t = DEFAULT_RATIO_TEST)]
		ratio: f32,

		/// Maximum descriptor distance (normalized-float space)
		#[arg(long = "distance-max", default_value_t = crate::config::DEFAULT_DISTANCE_MAX)]
		distance_max: f32,

		/// Max matches per pair, -1 = unlimited
		#[arg(long = "max-matches", default_value_t = -1)]
		max_matches: i64,

		/// Disable mutual best match consistency
		#[arg(long = "no-mutual")]
		no_mutual: bool,

		/// Number of CPU threads for I/O
		#[arg(short = 'j', long = "threads", default_value_t = NUM_IO_THREADS)]
		threads: usize,

		/// Verbose logging
		#[arg(short = 'v', long = "verbose")]
		verbose: bool,

		/// Quiet mode (errors only)
		#[arg(short = 'q', long = "quiet")]
		quiet: bool,
	},

	/// Train a k-means visual codebook (and optional PCA model)
	TrainVlad {
		/// Feature directory containing .isat_feat files
		#[arg(short = 'f', long = "features")]
		features: PathBuf,

		/// Output codebook file (.vcbt format)
		#[arg(short = 'o', long = "output")]
		output: PathBuf,

		/// Number of k-means clusters
		#[arg(short = 'k', long = "clusters", default_value_t = DEFAULT_VLAD_CLUSTERS)]
		clusters: usize,

		/// Maximum total descriptors for training
		#[arg(short = 'n', long = "max-descriptors", default_value_t = DEFAULT_TRAIN_MAX_DESCRIPTORS)]
		max_descriptors: usize,

		/// Maximum descriptors sampled per image
		#[arg(short = 'p', long = "max-per-image", default_value_t = DEFAULT_TRAIN_MAX_PER_IMAGE)]
		max_per_image: usize,

		/// k-means max iterations
		#[arg(long = "iterations", default_value_t = DEFAULT_KMEANS_ITERATIONS)]
		iterations: usize,

		/// Output PCA model file (.pca format, optional)
		#[arg(short = 'P', long = "pca-output")]
		pca_output: Option<PathBuf>,

		/// PCA output dimensions
		#[arg(long = "pca-dims", default_value_t = DEFAULT_PCA_DIMS)]
		pca_dims: usize,

		/// Enable PCA whitening (variance normalization)
		#[arg(short = 'W', long = "whiten")]
		whiten: bool,

		/// Verbose logging
		#[arg(short = 'v', long = "verbose")]
		verbose: bool,

		/// Quiet mode (errors only)
		#[arg(short = 'q', long = "quiet")]
		quiet: bool,
	},
}
