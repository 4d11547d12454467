//! # Parallax Library
//!
//! Structure-from-Motion preprocessing: staged concurrent pipelines for SIFT
//! feature extraction, candidate pair retrieval, and descriptor matching,
//! sharing the IDC binary container as on-disk interchange.

pub mod cli;
pub mod commands;
pub mod config;
pub mod container;
pub mod core;
pub mod extract;
pub mod matching;
pub mod pipeline;
pub mod retrieval;
pub mod ui;
