// Integration tests for the IDC container format

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use parallax::container::{ContainerReader, ContainerWriter, DescriptorSchema};

fn feature_metadata_fixture() -> serde_json::Value {
	serde_json::json!({
		"schema_version": "1.1",
		"task_type": "feature_extraction",
		"algorithm": {"name": "SIFT_GPU", "version": "1.1"},
		"descriptor_schema": {
			"feature_type": "sift",
			"descriptor_dim": 128,
			"descriptor_dtype": "uint8",
			"normalization": "l1root",
			"quantization_scale": 512.0,
		},
	})
}

#[test]
fn feature_file_round_trip() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("img.isat_feat");

	let keypoints: Vec<f32> = vec![
		10.0, 20.0, 1.5, 0.0, //
		30.0, 40.0, 2.0, 1.57, //
		50.0, 60.0, 1.8, 3.14,
	];
	let descriptors: Vec<u8> = (0..384).map(|v| (v % 256) as u8).collect();

	let mut writer = ContainerWriter::new(&path);
	writer.set_metadata(feature_metadata_fixture());
	writer.add_blob_f32("keypoints", &keypoints, &[3, 4]);
	writer.add_blob("descriptors", &descriptors, "uint8", &[3, 128]);
	writer.write().unwrap();

	let reader = ContainerReader::open(&path).unwrap();
	assert_eq!(reader.read_f32("keypoints").unwrap(), keypoints);
	assert_eq!(reader.read_bytes("descriptors").unwrap(), descriptors);

	let kp_desc = reader.blob_descriptor("keypoints").unwrap();
	assert_eq!(kp_desc.dtype, "float32");
	assert_eq!(kp_desc.shape, vec![3, 4]);
	assert_eq!(kp_desc.size, 48);

	let schema = DescriptorSchema::from_metadata(reader.metadata()).unwrap();
	assert_eq!(schema.descriptor_dim, 128);
	assert_eq!(schema.descriptor_dtype, "uint8");
	assert_eq!(schema.quantization_scale, 512.0);
}

#[test]
fn magic_bytes_and_payload_alignment() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("aligned.isat_feat");

	// Vary metadata size to exercise different padding amounts.
	for extra in 0..8usize {
		let mut writer = ContainerWriter::new(&path);
		writer.set_metadata(serde_json::json!({"pad": "x".repeat(extra)}));
		writer.add_blob("data", &[1u8, 2, 3, 4, 5, 6, 7, 8], "uint8", &[8]);
		writer.write().unwrap();

		let bytes = fs::read(&path).unwrap();
		assert_eq!(&bytes[0..4], &[0x49, 0x53, 0x41, 0x54], "magic must read ISAT");

		let json_size = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
		let pad = (8 - (16 + json_size) % 8) % 8;
		let payload_offset = 16 + json_size + pad;
		assert_eq!(payload_offset % 8, 0);

		// Padding bytes are zero and the payload follows them verbatim.
		assert!(bytes[16 + json_size..payload_offset].iter().all(|&b| b == 0));
		assert_eq!(&bytes[payload_offset..payload_offset + 8], &[1, 2, 3, 4, 5, 6, 7, 8]);
	}
}

#[test]
fn blob_order_and_offsets_preserved() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("multi.idc");

	let mut writer = ContainerWriter::new(&path);
	writer.add_blob("first", &[0xAA; 10], "uint8", &[10]);
	writer.add_blob("second", &[0xBB; 6], "uint8", &[6]);
	writer.add_blob("third", &[0xCC; 4], "uint8", &[4]);
	writer.write().unwrap();

	let reader = ContainerReader::open(&path).unwrap();
	let first = reader.blob_descriptor("first").unwrap();
	let second = reader.blob_descriptor("second").unwrap();
	let third = reader.blob_descriptor("third").unwrap();

	assert_eq!(first.offset, 0);
	assert_eq!(second.offset, 10);
	assert_eq!(third.offset, 16);
	assert_eq!(reader.read_bytes("second").unwrap(), vec![0xBB; 6]);
}

#[test]
fn rejects_bad_magic() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("bad.idc");

	let mut writer = ContainerWriter::new(&path);
	writer.add_blob("data", &[1u8, 2, 3, 4], "uint8", &[4]);
	writer.write().unwrap();

	let mut file = fs::OpenOptions::new().write(true).open(&path).unwrap();
	file.seek(SeekFrom::Start(0)).unwrap();
	file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
	drop(file);

	assert!(ContainerReader::open(&path).is_err());
}

#[test]
fn rejects_invalid_json() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("badjson.idc");

	let mut bytes = Vec::new();
	bytes.extend_from_slice(&0x5441_5349u32.to_le_bytes());
	bytes.extend_from_slice(&1u32.to_le_bytes());
	bytes.extend_from_slice(&4u64.to_le_bytes());
	bytes.extend_from_slice(b"{{{{");
	fs::write(&path, bytes).unwrap();

	assert!(ContainerReader::open(&path).is_err());
}

#[test]
fn missing_blob_reads_empty() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("sparse.idc");

	let mut writer = ContainerWriter::new(&path);
	writer.add_blob("present", &[7u8; 8], "uint8", &[8]);
	writer.write().unwrap();

	let reader = ContainerReader::open(&path).unwrap();
	assert!(reader.read_bytes("absent").unwrap().is_empty());
	assert!(reader.blob_descriptor("absent").is_none());
}

#[test]
fn rejects_non_divisible_blob_size() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("odd.idc");

	let mut writer = ContainerWriter::new(&path);
	writer.add_blob("weird", &[1u8, 2, 3, 4, 5, 6], "float32", &[6]);
	writer.write().unwrap();

	let reader = ContainerReader::open(&path).unwrap();
	assert!(reader.read_f32("weird").is_err());
	assert!(reader.read_u16("weird").is_ok());
	assert_eq!(reader.read_bytes("weird").unwrap().len(), 6);
}

#[test]
fn rejects_truncated_payload() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("cut.idc");

	let mut writer = ContainerWriter::new(&path);
	writer.add_blob_f32("data", &[1.0; 64], &[64]);
	writer.write().unwrap();

	let full = fs::metadata(&path).unwrap().len();
	let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
	file.set_len(full - 32).unwrap();
	drop(file);

	let reader = ContainerReader::open(&path).unwrap();
	assert!(reader.read_f32("data").is_err());
}

#[test]
fn version_mismatch_still_reads() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("v2.idc");

	let mut writer = ContainerWriter::new(&path);
	writer.add_blob("data", &[9u8; 4], "uint8", &[4]);
	writer.write().unwrap();

	// Bump the version field; the reader warns but continues.
	let mut file = fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
	file.seek(SeekFrom::Start(4)).unwrap();
	file.write_all(&2u32.to_le_bytes()).unwrap();
	file.seek(SeekFrom::Start(0)).unwrap();
	let mut check = [0u8; 8];
	file.read_exact(&mut check).unwrap();
	drop(file);

	let reader = ContainerReader::open(&path).unwrap();
	assert_eq!(reader.read_bytes("data").unwrap(), vec![9u8; 4]);
}

#[test]
fn u16_round_trip() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("indices.isat_match");

	let indices: Vec<u16> = vec![0, 5, 1, 9, 2, 700];
	let mut writer = ContainerWriter::new(&path);
	writer.add_blob_u16("indices", &indices, &[3, 2]);
	writer.write().unwrap();

	let reader = ContainerReader::open(&path).unwrap();
	assert_eq!(reader.read_u16("indices").unwrap(), indices);
}
