// Integration tests for the matching core and driver

use std::path::Path;

use parallax::container::ContainerReader;
use parallax::core::{DescriptorType, Descriptors, FeatureSet, Keypoint, PairEntry};
use parallax::matching::{
	descriptor_distance, run_matching, CpuMatcher, DescriptorMatcher, MatchOptions, MatchingParams,
};

const DIM: usize = 128;

fn desc(values: &[(usize, f32)]) -> Vec<f32> {
	let mut v = vec![0.0; DIM];
	for &(axis, value) in values {
		v[axis] = value;
	}
	v
}

fn feature_set_f32(descriptors: Vec<Vec<f32>>) -> FeatureSet {
	let n = descriptors.len();
	FeatureSet {
		keypoints: (0..n)
			.map(|i| Keypoint {
				x: i as f32 * 10.0,
				y: i as f32 * 5.0,
				scale: 1.0 + i as f32 * 0.1,
				orientation: 0.0,
			})
			.collect(),
		descriptors: Descriptors::F32(descriptors.concat()),
		quantization_scale: 1.0,
	}
}

fn feature_set_u8(descriptors: Vec<Vec<u8>>) -> FeatureSet {
	let n = descriptors.len();
	FeatureSet {
		keypoints: (0..n)
			.map(|i| Keypoint { x: i as f32, y: i as f32, scale: 1.0, orientation: 0.0 })
			.collect(),
		descriptors: Descriptors::U8(descriptors.concat()),
		quantization_scale: 512.0,
	}
}

/// Hand-crafted sets: A0's best neighbor is B0 (0.1) with runner-up B1
/// (0.2); A1's best is also B0 but at 0.3; A2 is far from everything.
fn ratio_mutual_fixture() -> (FeatureSet, FeatureSet) {
	let a = feature_set_f32(vec![
		desc(&[(0, 1.0), (1, 0.1)]),
		desc(&[(0, 1.0), (3, 0.3)]),
		desc(&[(5, 10.0)]),
	]);
	let b = feature_set_f32(vec![
		desc(&[(0, 1.0)]),
		desc(&[(0, 1.0), (1, 0.3)]),
		desc(&[(0, 1.0), (2, 5.0)]),
	]);
	(a, b)
}

#[test]
fn ratio_test_and_mutual_best() {
	let (a, b) = ratio_mutual_fixture();
	let options = MatchOptions::default();

	// A0 -> B0: distance 0.1, ratio 0.1/0.2 = 0.5 <= 0.8, mutual best.
	// A1 -> B0: fails mutual best (B0's best is A0 at 0.1 < 0.3).
	// A2: nearest distance exceeds the 0.7 cap.
	let matches = CpuMatcher::new().matches(&a, &b, &options).unwrap();
	assert_eq!(matches, vec![(0, 0)]);

	let d = descriptor_distance(&a, &b, 0, 0);
	assert!((d - 0.1).abs() < 1e-5);
}

#[test]
fn disabling_mutual_best_admits_second_match() {
	let (a, b) = ratio_mutual_fixture();
	let options = MatchOptions {
		mutual_best_match: false,
		..MatchOptions::default()
	};

	let matches = CpuMatcher::new().matches(&a, &b, &options).unwrap();
	assert_eq!(matches, vec![(0, 0), (1, 0)]);
}

#[test]
fn ambiguous_neighbors_fail_the_ratio_test() {
	let a = feature_set_f32(vec![desc(&[(0, 1.0)])]);
	// Two near-identical candidates: 0.30 vs 0.32 -> ratio 0.94 > 0.8.
	let b = feature_set_f32(vec![
		desc(&[(0, 1.0), (1, 0.30)]),
		desc(&[(0, 1.0), (2, 0.32)]),
	]);

	let matches = CpuMatcher::new().matches(&a, &b, &MatchOptions::default()).unwrap();
	assert!(matches.is_empty());
}

#[test]
fn dtype_mismatch_yields_no_matches() {
	let a = feature_set_f32(vec![desc(&[(0, 1.0)])]);
	let b = feature_set_u8(vec![vec![128; DIM]]);

	let matches = CpuMatcher::new().matches(&a, &b, &MatchOptions::default()).unwrap();
	assert!(matches.is_empty());
	assert_eq!(descriptor_distance(&a, &b, 0, 0), 1e6);
}

#[test]
fn uint8_pairs_scale_the_distance_cap() {
	// Raw uint8 distance is 102; with the 0.7 cap scaled by the recorded
	// quantization factor (0.7 * 512 = 358.4) the pair matches.
	let mut d1 = vec![0u8; DIM];
	let mut d2 = vec![0u8; DIM];
	d1[0] = 200;
	d2[0] = 98;
	let a = feature_set_u8(vec![d1]);
	let b = feature_set_u8(vec![d2]);

	assert_eq!(a.descriptor_type(), DescriptorType::U8);
	let matches = CpuMatcher::new().matches(&a, &b, &MatchOptions::default()).unwrap();
	assert_eq!(matches, vec![(0, 0)]);
}

#[test]
fn max_matches_keeps_the_closest() {
	let a = feature_set_f32(vec![
		desc(&[(0, 1.0), (1, 0.05)]),
		desc(&[(2, 1.0), (3, 0.02)]),
		desc(&[(4, 1.0), (5, 0.08)]),
	]);
	let b = feature_set_f32(vec![
		desc(&[(0, 1.0)]),
		desc(&[(2, 1.0)]),
		desc(&[(4, 1.0)]),
	]);

	let options = MatchOptions {
		max_matches: Some(2),
		..MatchOptions::default()
	};
	let matches = CpuMatcher::new().matches(&a, &b, &options).unwrap();
	assert_eq!(matches.len(), 2);
	// The weakest correspondence (A2, distance 0.08) is the one dropped.
	assert!(matches.contains(&(0, 0)));
	assert!(matches.contains(&(1, 1)));
}

#[test]
fn homography_guides_the_candidate_set() {
	// A0 sits at (0, 0); the descriptor-closest candidate B1 sits far from
	// the predicted position, B0 sits next to it.
	let mut a = feature_set_f32(vec![desc(&[(0, 1.0)])]);
	a.keypoints[0] = Keypoint { x: 0.0, y: 0.0, scale: 1.0, orientation: 0.0 };

	let mut b = feature_set_f32(vec![
		desc(&[(0, 1.0), (1, 0.2)]),
		desc(&[(0, 1.0)]),
	]);
	b.keypoints[0] = Keypoint { x: 0.0, y: 1.0, scale: 1.0, orientation: 0.0 };
	b.keypoints[1] = Keypoint { x: 50.0, y: 50.0, scale: 1.0, orientation: 0.0 };

	let unguided = CpuMatcher::new().matches(&a, &b, &MatchOptions::default()).unwrap();
	assert_eq!(unguided, vec![(0, 1)]);

	let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
	let options = MatchOptions {
		homography: Some(identity),
		..MatchOptions::default()
	};
	let guided = CpuMatcher::new().matches(&a, &b, &options).unwrap();
	assert_eq!(guided, vec![(0, 0)]);
}

#[test]
fn fundamental_matrix_gates_on_sampson_error() {
	// F for a pure sideways motion: correspondences must share a scanline.
	let f = [[0.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]];

	let mut a = feature_set_f32(vec![desc(&[(0, 1.0)])]);
	a.keypoints[0] = Keypoint { x: 10.0, y: 20.0, scale: 1.0, orientation: 0.0 };

	let mut b = feature_set_f32(vec![desc(&[(0, 1.0)])]);
	b.keypoints[0] = Keypoint { x: 30.0, y: 20.0, scale: 1.0, orientation: 0.0 };

	let options = MatchOptions {
		fundamental: Some(f),
		..MatchOptions::default()
	};
	let on_scanline = CpuMatcher::new().matches(&a, &b, &options).unwrap();
	assert_eq!(on_scanline, vec![(0, 0)]);

	b.keypoints[0].y = 45.0;
	let off_scanline = CpuMatcher::new().matches(&a, &b, &options).unwrap();
	assert!(off_scanline.is_empty());
}

fn write_feature_file(path: &Path, features: &FeatureSet) {
	use parallax::container::ContainerWriter;

	let n = features.len();
	let keypoints: Vec<f32> = features
		.keypoints
		.iter()
		.flat_map(|kp| [kp.x, kp.y, kp.scale, kp.orientation])
		.collect();

	let mut writer = ContainerWriter::new(path);
	writer.set_metadata(serde_json::json!({
		"schema_version": "1.0",
		"task_type": "feature_extraction",
	}));
	writer.add_blob_f32("keypoints", &keypoints, &[n, 4]);
	match &features.descriptors {
		Descriptors::F32(data) => writer.add_blob_f32("descriptors", data, &[n, DIM]),
		Descriptors::U8(data) => writer.add_blob("descriptors", data, "uint8", &[n, DIM]),
	}
	writer.write().unwrap();
}

fn pair_entry(id1: &str, id2: &str, file1: &Path, file2: &Path) -> PairEntry {
	PairEntry {
		image1_id: id1.to_string(),
		image2_id: id2.to_string(),
		feature1_file: file1.to_string_lossy().to_string(),
		feature2_file: file2.to_string_lossy().to_string(),
		score: 1.0,
		method: "exhaustive".to_string(),
		priority: 2.0,
		spatial_distance: None,
		visual_similarity: None,
		angle_difference: None,
	}
}

#[test]
fn matching_driver_writes_valid_match_files() {
	let dir = tempfile::tempdir().unwrap();
	let (a, b) = ratio_mutual_fixture();

	let file_a = dir.path().join("a.isat_feat");
	let file_b = dir.path().join("b.isat_feat");
	write_feature_file(&file_a, &a);
	write_feature_file(&file_b, &b);

	let output_dir = dir.path().join("matches");
	let entries = vec![pair_entry("a", "b", &file_a, &file_b)];

	let stats = run_matching(
		&entries,
		CpuMatcher::new(),
		&output_dir,
		&MatchingParams::default(),
	)
	.unwrap();
	assert_eq!(stats.total_pairs, 1);
	assert_eq!(stats.pairs_with_matches, 1);
	assert_eq!(stats.total_matches, 1);

	let match_path = output_dir.join("a_b.isat_match");
	assert!(match_path.exists());

	let reader = ContainerReader::open(&match_path).unwrap();
	let indices = reader.read_u16("indices").unwrap();
	let coords = reader.read_f32("coords_pixel").unwrap();
	let distances = reader.read_f32("distances").unwrap();

	let n = distances.len();
	assert_eq!(indices.len(), n * 2);
	assert_eq!(coords.len(), n * 4);
	for pair in indices.chunks_exact(2) {
		assert!((pair[0] as usize) < a.len());
		assert!((pair[1] as usize) < b.len());
	}

	// coords_pixel carries (x1, y1, x2, y2) straight from the keypoints.
	assert_eq!(&coords[0..4], &[0.0, 0.0, 0.0, 0.0]);
	assert!((distances[0] - 0.1).abs() < 1e-5);
	assert_eq!(
		reader.metadata()["metadata"]["num_matches"].as_u64(),
		Some(1)
	);
}

#[test]
fn matching_driver_skips_degenerate_pairs() {
	let dir = tempfile::tempdir().unwrap();

	// Pair 1: dtype mismatch. Pair 2: feature file missing entirely.
	let f32_file = dir.path().join("f.isat_feat");
	let u8_file = dir.path().join("u.isat_feat");
	write_feature_file(&f32_file, &feature_set_f32(vec![desc(&[(0, 1.0)])]));
	write_feature_file(&u8_file, &feature_set_u8(vec![vec![100; DIM]]));

	let output_dir = dir.path().join("matches");
	let entries = vec![
		pair_entry("f", "u", &f32_file, &u8_file),
		pair_entry("f", "ghost", &f32_file, &dir.path().join("ghost.isat_feat")),
	];

	let stats = run_matching(
		&entries,
		CpuMatcher::new(),
		&output_dir,
		&MatchingParams::default(),
	)
	.unwrap();

	assert_eq!(stats.total_pairs, 2);
	assert_eq!(stats.pairs_with_matches, 0);
	assert_eq!(stats.total_matches, 0);
	assert!(!output_dir.join("f_u.isat_match").exists());
	assert!(!output_dir.join("f_ghost.isat_match").exists());
}
