//! # Core Domain Types
//!
//! Feature sets, image metadata, and candidate pairs. These types are
//! shared by all three tools.

pub mod features;
pub mod imagery;
pub mod pairs;

pub use features::{DescriptorType, Descriptors, FeatureSet, Keypoint};
pub use imagery::{GnssData, ImageInfo, ImuData};
pub use pairs::{ImagePair, PairEntry};
