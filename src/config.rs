// Config - Application constants

pub const DESCRIPTOR_DIM: usize = 128;
pub const QUANTIZATION_SCALE: f32 = 512.0;

pub const FEATURE_EXT: &str = "isat_feat";
pub const MATCH_EXT: &str = "isat_match";
pub const VLAD_EXT: &str = "isat_vlad";

// Pipeline shape: I/O stages run a small worker pool, the context-affine
// stage runs pinned with a shorter queue so it throttles the loaders.
pub const NUM_IO_THREADS: usize = 4;
pub const IO_QUEUE_CAPACITY: usize = 10;
pub const EXTRACT_GPU_QUEUE_CAPACITY: usize = 5;
pub const MATCH_GPU_QUEUE_CAPACITY: usize = 3;

pub const DEFAULT_MAX_FEATURES: usize = 8000;
pub const DEFAULT_PEAK_THRESHOLD: f32 = 0.02;
pub const DEFAULT_LEVELS: usize = 3;
pub const DEFAULT_NMS_RADIUS: f32 = 3.0;
pub const NMS_CELL_FACTOR: f32 = 10.0;
pub const NMS_MAX_PER_CELL: usize = 2;

pub const DEFAULT_RATIO_TEST: f32 = 0.8;
pub const DEFAULT_DISTANCE_MAX: f32 = 0.7;
pub const DEFAULT_FUNDAMENTAL_THRESHOLD: f32 = 16.0;
pub const DEFAULT_HOMOGRAPHY_THRESHOLD: f32 = 32.0;

pub const DEFAULT_SEQUENTIAL_WINDOW: usize = 10;
pub const DEFAULT_GPS_DISTANCE: f64 = 200.0;
pub const DEFAULT_MAX_NEIGHBORS: usize = 50;
pub const DEFAULT_TOP_K: usize = 20;
pub const VLAD_SIGMA: f64 = 1.0;
pub const SCORE_FLOOR: f64 = 0.01;

pub const DEFAULT_VLAD_CLUSTERS: usize = 64;
pub const DEFAULT_KMEANS_ITERATIONS: usize = 100;
pub const DEFAULT_TRAIN_MAX_DESCRIPTORS: usize = 1_000_000;
pub const DEFAULT_TRAIN_MAX_PER_IMAGE: usize = 500;
pub const DEFAULT_PCA_DIMS: usize = 256;
