// Integration tests for the retrieval engine

use std::path::{Path, PathBuf};

use ndarray::Array2;
use parallax::container::ContainerWriter;
use parallax::core::{GnssData, ImageInfo, ImagePair, ImuData};
use parallax::retrieval::codebook::save_codebook;
use parallax::retrieval::spatial::retrieve_by_gps;
use parallax::retrieval::vlad::retrieve_by_vlad;
use parallax::retrieval::vocab::{retrieve_by_vocab, VocabDatabase, Vocabulary};
use parallax::retrieval::{
	combine, deduplicate_and_merge, finalize, parse_strategy_spec, RetrievalOptions, Strategy,
	StrategyResources,
};

const DIM: usize = 128;

fn plain_image(id: &str) -> ImageInfo {
	ImageInfo {
		image_id: id.to_string(),
		image_path: String::new(),
		feature_file: PathBuf::new(),
		camera_id: 1,
		gnss: None,
		imu: None,
	}
}

fn gnss_image(id: &str, x: f64, y: f64, z: f64) -> ImageInfo {
	let mut image = plain_image(id);
	image.gnss = Some(GnssData {
		x,
		y,
		z,
		cov_xx: 1.0,
		cov_yy: 1.0,
		cov_zz: 1.0,
		cov_xy: 0.0,
		cov_xz: 0.0,
		cov_yz: 0.0,
		num_satellites: 12,
		hdop: 0.8,
		vdop: 1.1,
	});
	image
}

fn imu(yaw_deg: f64) -> ImuData {
	ImuData {
		roll: 0.0,
		pitch: 0.0,
		yaw: yaw_deg.to_radians(),
		cov_att_xx: 0.1,
		cov_att_yy: 0.1,
		cov_att_zz: 0.1,
	}
}

fn images(n: usize) -> Vec<ImageInfo> {
	(0..n).map(|i| plain_image(&format!("img{:03}", i))).collect()
}

fn axis_vector(axis: usize, value: f32) -> Vec<f32> {
	let mut v = vec![0.0; DIM];
	v[axis] = value;
	v
}

fn write_feature_file(path: &Path, descriptors: &[Vec<f32>]) {
	let n = descriptors.len();
	let keypoints: Vec<f32> = (0..n)
		.flat_map(|i| [i as f32 * 3.0, i as f32 * 2.0, 1.0, 0.0])
		.collect();
	let flat: Vec<f32> = descriptors.concat();

	let mut writer = ContainerWriter::new(path);
	writer.set_metadata(serde_json::json!({
		"schema_version": "1.0",
		"task_type": "feature_extraction",
	}));
	writer.add_blob_f32("keypoints", &keypoints, &[n, 4]);
	writer.add_blob_f32("descriptors", &flat, &[n, DIM]);
	writer.write().unwrap();
}

fn keys(pairs: &[ImagePair]) -> Vec<(usize, usize)> {
	pairs.iter().map(|p| p.key()).collect()
}

#[test]
fn sequential_window_scores() {
	let strategy = Strategy::Sequential { window: 2 };
	let pairs = strategy.run(&images(5), &RetrievalOptions::default()).unwrap();

	assert_eq!(
		keys(&pairs),
		vec![(0, 1), (0, 2), (1, 2), (1, 3), (2, 3), (2, 4), (3, 4)]
	);
	for pair in &pairs {
		let expected = 1.0 - (pair.image2_idx - pair.image1_idx) as f64 / 2.0;
		assert!((pair.score - expected).abs() < 1e-12);
	}

	// The score floor strips the window-edge pairs (score 0).
	let kept = finalize(deduplicate_and_merge(pairs), None);
	assert_eq!(keys(&kept), vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
	assert!(kept.iter().all(|p| (p.score - 0.5).abs() < 1e-12));
}

#[test]
fn exhaustive_generates_all_canonical_pairs() {
	let pairs = Strategy::Exhaustive
		.run(&images(4), &RetrievalOptions::default())
		.unwrap();
	assert_eq!(keys(&pairs), vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
	assert!(pairs.iter().all(|p| p.score == 1.0));
	assert!(pairs.iter().all(|p| p.image1_idx < p.image2_idx));
}

#[test]
fn gps_radius_query() {
	let images = vec![
		gnss_image("a", 0.0, 0.0, 0.0),
		gnss_image("b", 10.0, 0.0, 0.0),
		gnss_image("c", 100.0, 0.0, 0.0),
		gnss_image("d", 5.0, 0.0, 0.0),
	];
	let options = RetrievalOptions {
		distance_threshold: 50.0,
		max_neighbors: 10,
		..RetrievalOptions::default()
	};

	let mut pairs = retrieve_by_gps(&images, &options);
	pairs.sort_by_key(|p| p.key());

	assert_eq!(keys(&pairs), vec![(0, 1), (0, 3), (1, 3)]);

	let score_of = |key: (usize, usize)| pairs.iter().find(|p| p.key() == key).unwrap().score;
	assert!((score_of((0, 1)) - (-10.0f64 / 50.0).exp()).abs() < 1e-9);
	assert!((score_of((0, 3)) - (-5.0f64 / 50.0).exp()).abs() < 1e-9);
	assert!((score_of((1, 3)) - (-5.0f64 / 50.0).exp()).abs() < 1e-9);

	for pair in &pairs {
		assert!(pair.spatial_distance.unwrap() <= 50.0);
	}
}

#[test]
fn gps_imu_filter_drops_divergent_orientations() {
	let mut looking_north = gnss_image("n", 0.0, 0.0, 0.0);
	looking_north.imu = Some(imu(0.0));
	let mut looking_east = gnss_image("e", 5.0, 0.0, 0.0);
	looking_east.imu = Some(imu(90.0));

	let mut options = RetrievalOptions {
		distance_threshold: 50.0,
		..RetrievalOptions::default()
	};

	options.angle_threshold = 30.0f64.to_radians();
	let filtered = retrieve_by_gps(&[looking_north.clone(), looking_east.clone()], &options);
	assert!(filtered.is_empty());

	options.angle_threshold = 120.0f64.to_radians();
	let kept = retrieve_by_gps(&[looking_north, looking_east], &options);
	assert_eq!(kept.len(), 1);
	let angle = kept[0].angle_difference.unwrap();
	assert!((angle - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
}

#[test]
fn gps_is_deterministic() {
	let images: Vec<ImageInfo> = (0..20)
		.map(|i| gnss_image(&format!("i{}", i), (i as f64 * 7.3) % 40.0, (i as f64 * 3.1) % 25.0, 0.0))
		.collect();
	let options = RetrievalOptions {
		distance_threshold: 30.0,
		max_neighbors: 5,
		..RetrievalOptions::default()
	};

	let first = retrieve_by_gps(&images, &options);
	let second = retrieve_by_gps(&images, &options);
	assert_eq!(first, second);

	// Canonical, duplicate-free output.
	let mut seen = std::collections::BTreeSet::new();
	for pair in &first {
		assert!(pair.image1_idx < pair.image2_idx);
		assert!(seen.insert(pair.key()), "duplicate pair {:?}", pair.key());
	}
}

#[test]
fn combiner_merges_and_canonicalizes() {
	let a = vec![{
		let mut p = ImagePair::new(0, 1, 0.8, "gps");
		p.spatial_distance = Some(12.0);
		p
	}];
	// Reversed indices on purpose; contribution above half the existing.
	let b = vec![{
		let mut p = ImagePair::new(1, 0, 0.5, "vlad");
		p.visual_similarity = Some(0.5);
		p
	}];

	let merged = combine(vec![a, b]);
	assert_eq!(merged.len(), 1);
	let pair = &merged[0];
	assert_eq!(pair.key(), (0, 1));
	assert!((pair.score - 1.3).abs() < 1e-12);
	assert_eq!(pair.method, "gps+vlad");
	assert_eq!(pair.spatial_distance, Some(12.0));
	assert_eq!(pair.visual_similarity, Some(0.5));
}

#[test]
fn combiner_keeps_method_for_minor_contribution() {
	let a = vec![ImagePair::new(0, 1, 0.8, "gps")];
	let b = vec![ImagePair::new(1, 0, 0.3, "vlad")];

	let merged = combine(vec![a, b]);
	assert_eq!(merged.len(), 1);
	// Score always accumulates; the method label only records strategies
	// that contributed at least half the running score.
	assert!((merged[0].score - 1.1).abs() < 1e-12);
	assert_eq!(merged[0].method, "gps");
}

#[test]
fn combiner_is_order_independent() {
	let a: Vec<ImagePair> = (0..5).map(|i| ImagePair::new(i, i + 1, 0.4, "gps")).collect();
	let b: Vec<ImagePair> = (0..5).map(|i| ImagePair::new(i + 1, i, 0.6, "vlad")).collect();

	let ab = finalize(combine(vec![a.clone(), b.clone()]), None);
	let ba = finalize(combine(vec![b, a]), None);

	assert_eq!(keys(&ab), keys(&ba));
	for (x, y) in ab.iter().zip(ba.iter()) {
		assert!((x.score - y.score).abs() < 1e-12);
		assert!(x.score >= 0.6, "merged score below max contribution");
	}
}

#[test]
fn finalize_floors_sorts_and_truncates() {
	let pairs = vec![
		ImagePair::new(0, 1, 0.005, "gps"),
		ImagePair::new(1, 2, 0.9, "gps"),
		ImagePair::new(2, 3, 0.3, "gps"),
		ImagePair::new(3, 4, 0.6, "gps"),
	];

	let ranked = finalize(pairs.clone(), None);
	assert_eq!(keys(&ranked), vec![(1, 2), (3, 4), (2, 3)]);

	let capped = finalize(pairs, Some(2));
	assert_eq!(keys(&capped), vec![(1, 2), (3, 4)]);
}

#[test]
fn strategy_spec_parsing() {
	let resources = StrategyResources {
		window: Some(4),
		..StrategyResources::default()
	};

	let parsed = parse_strategy_spec("gps+sequential", &resources).unwrap();
	assert_eq!(parsed.len(), 2);
	assert_eq!(parsed[0].name(), "gps");
	assert_eq!(parsed[1].name(), "sequential");

	assert!(parse_strategy_spec("warp", &resources).is_err());
	assert!(parse_strategy_spec("gps+gps", &resources).is_err());
	// vlad and vocab need their model files.
	assert!(parse_strategy_spec("vlad", &resources).is_err());
	assert!(parse_strategy_spec("vocab", &resources).is_err());
}

#[test]
fn vlad_retrieval_ranks_similar_images_first() {
	let dir = tempfile::tempdir().unwrap();

	// Two words: the e0 axis and the e1 axis.
	let mut centroids = Array2::<f32>::zeros((2, DIM));
	centroids[[0, 0]] = 1.0;
	centroids[[1, 1]] = 1.0;
	let codebook_path = dir.path().join("words.vcbt");
	save_codebook(&codebook_path, &centroids).unwrap();

	let mut images = Vec::new();
	for (id, descriptors) in [
		("a", vec![axis_vector(2, 0.10), axis_vector(0, 1.0)]),
		("b", vec![axis_vector(2, 0.12), axis_vector(0, 1.0)]),
		("c", vec![axis_vector(1, 1.0), axis_vector(3, 0.9)]),
	] {
		let path = dir.path().join(format!("{}.isat_feat", id));
		write_feature_file(&path, &descriptors);
		let mut image = plain_image(id);
		image.feature_file = path;
		images.push(image);
	}

	let options = RetrievalOptions {
		top_k: 2,
		..RetrievalOptions::default()
	};
	let pairs = retrieve_by_vlad(&images, &options, &codebook_path, None, None).unwrap();

	assert!(!pairs.is_empty());
	for pair in &pairs {
		assert!(pair.image1_idx < pair.image2_idx);
		assert!(pair.visual_similarity.is_some());
	}
	let best = pairs
		.iter()
		.max_by(|x, y| x.score.partial_cmp(&y.score).unwrap())
		.unwrap();
	assert_eq!(best.key(), (0, 1), "most similar images should score highest");

	// Same inputs, same pair list.
	let again = retrieve_by_vlad(&images, &options, &codebook_path, None, None).unwrap();
	assert_eq!(pairs, again);
}

#[test]
fn vlad_cache_round_trip() {
	let dir = tempfile::tempdir().unwrap();
	let cache_dir = dir.path().join("cache");

	let mut centroids = Array2::<f32>::zeros((2, DIM));
	centroids[[0, 0]] = 1.0;
	centroids[[1, 1]] = 1.0;
	let codebook_path = dir.path().join("words.vcbt");
	save_codebook(&codebook_path, &centroids).unwrap();

	let mut images = Vec::new();
	for id in ["a", "b"] {
		let path = dir.path().join(format!("{}.isat_feat", id));
		write_feature_file(&path, &[axis_vector(0, 1.0), axis_vector(1, 0.5)]);
		let mut image = plain_image(id);
		image.feature_file = path;
		images.push(image);
	}

	let options = RetrievalOptions::default();
	let cold = retrieve_by_vlad(&images, &options, &codebook_path, Some(cache_dir.as_path()), None).unwrap();
	assert!(cache_dir.join("a.isat_vlad").exists());
	assert!(cache_dir.join("b.isat_vlad").exists());

	let warm = retrieve_by_vlad(&images, &options, &codebook_path, Some(cache_dir.as_path()), None).unwrap();
	assert_eq!(cold, warm, "cached vectors must reproduce the cold result");
}

#[test]
fn vocab_database_scores_shared_words() {
	let dir = tempfile::tempdir().unwrap();

	let mut centroids = Array2::<f32>::zeros((2, DIM));
	centroids[[0, 0]] = 1.0;
	centroids[[1, 1]] = 1.0;
	let vocab_path = dir.path().join("vocab.vcbt");
	save_codebook(&vocab_path, &centroids).unwrap();

	let vocabulary = Vocabulary::load(&vocab_path).unwrap();
	assert_eq!(vocabulary.len(), 2);

	let mut database = VocabDatabase::new(&vocabulary);
	database.add_image(0, &axis_vector(0, 1.0));
	database.add_image(1, &axis_vector(0, 0.9));
	database.add_image(2, &axis_vector(1, 1.0));
	database.finalize();

	let results = database.query(0, 2);
	assert_eq!(results[0].0, 1, "image sharing the word must rank first");
	assert!(results[0].1 > results[1].1);
	assert!((results[0].1 - 1.0).abs() < 1e-9);
}

#[test]
fn vocab_retrieval_end_to_end() {
	let dir = tempfile::tempdir().unwrap();

	let mut centroids = Array2::<f32>::zeros((2, DIM));
	centroids[[0, 0]] = 1.0;
	centroids[[1, 1]] = 1.0;
	let vocab_path = dir.path().join("vocab.vcbt");
	save_codebook(&vocab_path, &centroids).unwrap();

	let mut images = Vec::new();
	for (id, descriptors) in [
		("a", vec![axis_vector(0, 1.0), axis_vector(0, 0.8)]),
		("b", vec![axis_vector(0, 0.9)]),
		("c", vec![axis_vector(1, 1.0)]),
	] {
		let path = dir.path().join(format!("{}.isat_feat", id));
		write_feature_file(&path, &descriptors);
		let mut image = plain_image(id);
		image.feature_file = path;
		images.push(image);
	}

	let options = RetrievalOptions {
		top_k: 1,
		..RetrievalOptions::default()
	};
	let pairs = retrieve_by_vocab(&images, &options, &vocab_path).unwrap();

	assert!(pairs.iter().any(|p| p.key() == (0, 1)));
	let best = pairs
		.iter()
		.max_by(|x, y| x.score.partial_cmp(&y.score).unwrap())
		.unwrap();
	assert_eq!(best.key(), (0, 1));
	assert!(pairs.iter().all(|p| p.method == "vocab"));
}
