//! Sample Data Module
//!
//! This module provides the decoded PCM containers handed to voices. The
//! file pool owns the decoded data; a voice holds a *sample promise*, a
//! cheap shared handle it can read during rendering and drop on reset
//! without touching the loader.

use std::collections::HashMap;
use std::sync::Arc;

/// Decoded PCM audio for one sample file.
///
/// Channel data is stored as split vectors, mono samples leave `right`
/// empty. The frame counts and loop points the regions carry are expressed
/// against the *original* rate; `oversampling_factor` tells the playback
/// path how much the stored data was upsampled during load.
#[derive(Debug, Clone)]
pub struct SampleData {
    /// Left (or mono) channel, normalized to [-1, 1]
    pub left: Vec<f32>,

    /// Right channel for stereo sources
    pub right: Option<Vec<f32>>,

    /// Sample rate of the original file in Hz
    pub sample_rate: f32,

    /// Integer upsampling factor applied during load (1 = none)
    pub oversampling_factor: u32,
}

impl SampleData {
    /// Creates mono sample data.
    pub fn new_mono(left: Vec<f32>, sample_rate: f32) -> Self {
        Self {
            left,
            right: None,
            sample_rate,
            oversampling_factor: 1,
        }
    }

    /// Creates stereo sample data.
    pub fn new_stereo(left: Vec<f32>, right: Vec<f32>, sample_rate: f32) -> Self {
        debug_assert_eq!(left.len(), right.len());
        Self {
            left,
            right: Some(right),
            sample_rate,
            oversampling_factor: 1,
        }
    }

    /// Number of stored frames (after oversampling).
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Whether the data carries two channels.
    pub fn is_stereo(&self) -> bool {
        self.right.is_some()
    }
}

/// Shared handle to decoded PCM, held by a playing voice.
#[derive(Debug, Clone)]
pub struct SamplePromise {
    data: Arc<SampleData>,
}

impl SamplePromise {
    /// Borrows the decoded audio.
    pub fn get_data(&self) -> &SampleData {
        &self.data
    }

    /// Sample rate of the original file.
    pub fn sample_rate(&self) -> f32 {
        self.data.sample_rate
    }

    /// Upsampling factor applied during load.
    pub fn oversampling_factor(&self) -> u32 {
        self.data.oversampling_factor
    }
}

/// Pool of decoded sample files, keyed by the region's sample name.
#[derive(Debug, Clone, Default)]
pub struct FilePool {
    files: HashMap<String, Arc<SampleData>>,
}

impl FilePool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers decoded data under a sample name (loader side, not
    /// realtime).
    pub fn add_file(&mut self, name: &str, data: SampleData) {
        log::debug!(
            "file pool: '{}' ({} frames, {} ch, {} Hz, {}x)",
            name,
            data.frames(),
            if data.is_stereo() { 2 } else { 1 },
            data.sample_rate,
            data.oversampling_factor
        );
        self.files.insert(name.to_string(), Arc::new(data));
    }

    /// Hands out a promise for a sample, or None when the name was never
    /// loaded.
    pub fn get_file_promise(&self, name: &str) -> Option<SamplePromise> {
        self.files.get(name).map(|data| SamplePromise {
            data: Arc::clone(data),
        })
    }
}
