pub mod app;
pub mod chart;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod normalize;
pub mod output;
pub mod progress;
pub mod reconcile;
pub mod sample_index;
pub mod synapse;
pub mod tui;
