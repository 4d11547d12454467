//! Image metadata and input-list parsing
//!
//! Images arrive either as a JSON list (with optional GNSS/IMU blocks) or
//! by scanning a feature directory. Angles are degrees at the JSON
//! boundary and radians everywhere inside.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::FEATURE_EXT;
use crate::ui;

#[derive(Debug, Clone, Copy)]
pub struct GnssData {
	pub x: f64,
	pub y: f64,
	pub z: f64,
	pub cov_xx: f64,
	pub cov_yy: f64,
	pub cov_zz: f64,
	pub cov_xy: f64,
	pub cov_xz: f64,
	pub cov_yz: f64,
	pub num_satellites: u32,
	pub hdop: f64,
	pub vdop: f64,
}

impl GnssData {
	pub fn position(&self) -> [f64; 3] {
		[self.x, self.y, self.z]
	}
}

/// Attitude in radians.
#[derive(Debug, Clone, Copy)]
pub struct ImuData {
	pub roll: f64,
	pub pitch: f64,
	pub yaw: f64,
	pub cov_att_xx: f64,
	pub cov_att_yy: f64,
	pub cov_att_zz: f64,
}

#[derive(Debug, Clone)]
pub struct ImageInfo {
	pub image_id: String,
	pub image_path: String,
	pub feature_file: PathBuf,
	pub camera_id: i32,
	pub gnss: Option<GnssData>,
	pub imu: Option<ImuData>,
}

impl ImageInfo {
	pub fn has_gnss(&self) -> bool {
		self.gnss.is_some()
	}

	pub fn has_imu(&self) -> bool {
		self.imu.is_some()
	}
}

#[derive(Deserialize)]
struct ImageListJson {
	images: Vec<ImageEntryJson>,
}

#[derive(Deserialize)]
struct ImageEntryJson {
	path: String,
	camera_id: Option<i32>,
	gnss: Option<GnssJson>,
	imu: Option<ImuJson>,
}

#[derive(Deserialize)]
struct GnssJson {
	#[serde(default)]
	x: f64,
	#[serde(default)]
	y: f64,
	#[serde(default)]
	z: f64,
	#[serde(default = "one")]
	cov_xx: f64,
	#[serde(default = "one")]
	cov_yy: f64,
	#[serde(default = "one")]
	cov_zz: f64,
	#[serde(default)]
	cov_xy: f64,
	#[serde(default)]
	cov_xz: f64,
	#[serde(default)]
	cov_yz: f64,
	#[serde(default)]
	num_satellites: u32,
	#[serde(default)]
	hdop: f64,
	#[serde(default)]
	vdop: f64,
}

/// Angles in degrees, as serialized.
#[derive(Deserialize)]
struct ImuJson {
	#[serde(default)]
	roll: f64,
	#[serde(default)]
	pitch: f64,
	#[serde(default)]
	yaw: f64,
	#[serde(default = "attitude_cov")]
	cov_att_xx: f64,
	#[serde(default = "attitude_cov")]
	cov_att_yy: f64,
	#[serde(default = "attitude_cov")]
	cov_att_zz: f64,
}

fn one() -> f64 {
	1.0
}

fn attitude_cov() -> f64 {
	0.1
}

fn stem_of(path: &str) -> String {
	Path::new(path)
		.file_stem()
		.map(|s| s.to_string_lossy().to_string())
		.unwrap_or_else(|| path.to_string())
}

/// Load an image list from JSON. When `feature_dir` is given, each entry's
/// feature file path is derived from the image stem and entries without an
/// existing feature file are skipped with a warning.
pub fn load_image_list(json_path: &Path, feature_dir: Option<&Path>) -> Result<Vec<ImageInfo>> {
	let text = fs::read_to_string(json_path)
		.with_context(|| format!("Failed to open image list {}", json_path.display()))?;
	let list: ImageListJson = serde_json::from_str(&text)
		.with_context(|| format!("Invalid image list {}", json_path.display()))?;

	let mut images = Vec::with_capacity(list.images.len());
	for entry in list.images {
		let image_id = stem_of(&entry.path);

		let feature_file = match feature_dir {
			Some(dir) => {
				let file = dir.join(format!("{}.{}", image_id, FEATURE_EXT));
				if !file.exists() {
					ui::warn(&format!("Feature file not found: {}", file.display()));
					continue;
				}
				file
			}
			None => PathBuf::new(),
		};

		let gnss = entry.gnss.map(|g| GnssData {
			x: g.x,
			y: g.y,
			z: g.z,
			cov_xx: g.cov_xx,
			cov_yy: g.cov_yy,
			cov_zz: g.cov_zz,
			cov_xy: g.cov_xy,
			cov_xz: g.cov_xz,
			cov_yz: g.cov_yz,
			num_satellites: g.num_satellites,
			hdop: g.hdop,
			vdop: g.vdop,
		});

		// Degrees in, radians from here on.
		let imu = entry.imu.map(|m| ImuData {
			roll: m.roll.to_radians(),
			pitch: m.pitch.to_radians(),
			yaw: m.yaw.to_radians(),
			cov_att_xx: m.cov_att_xx,
			cov_att_yy: m.cov_att_yy,
			cov_att_zz: m.cov_att_zz,
		});

		images.push(ImageInfo {
			image_id,
			image_path: entry.path,
			feature_file,
			camera_id: entry.camera_id.unwrap_or(1),
			gnss,
			imu,
		});
	}

	ui::info(&format!(
		"Loaded {} images from {}",
		images.len(),
		json_path.display()
	));
	let gnss_count = images.iter().filter(|i| i.has_gnss()).count();
	let imu_count = images.iter().filter(|i| i.has_imu()).count();
	ui::debug(&format!("  GNSS data: {}/{}", gnss_count, images.len()));
	ui::debug(&format!("  IMU data: {}/{}", imu_count, images.len()));

	Ok(images)
}

/// Build an image list by scanning a feature directory, sorted by stem.
pub fn discover_from_features(feature_dir: &Path) -> Result<Vec<ImageInfo>> {
	let mut images = Vec::new();

	for entry in WalkDir::new(feature_dir)
		.max_depth(1)
		.into_iter()
		.filter_map(|e| e.ok())
	{
		let path = entry.path();
		if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(FEATURE_EXT) {
			continue;
		}
		let image_id = path
			.file_stem()
			.map(|s| s.to_string_lossy().to_string())
			.unwrap_or_default();
		images.push(ImageInfo {
			image_id,
			image_path: String::new(),
			feature_file: path.to_path_buf(),
			camera_id: 1,
			gnss: None,
			imu: None,
		});
	}

	images.sort_by(|a, b| a.image_id.cmp(&b.image_id));
	ui::info(&format!(
		"Found {} feature files in {}",
		images.len(),
		feature_dir.display()
	));
	Ok(images)
}
