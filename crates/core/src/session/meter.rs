//! Input level metering for visual feedback.
//!
//! Works like a browser analyser node with a 512-point window: the newest
//! samples are Hann-windowed, each spectrum bin is mapped onto a 0-255 byte
//! scale between `MIN_DECIBELS` and `MAX_DECIBELS`, and the bins are averaged.

use std::f32::consts::PI;

const WINDOW_SIZE: usize = 512;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

pub struct VolumeMeter {
    window: Vec<f32>,
    cos: Vec<f32>,
    sin: Vec<f32>,
    level: f32,
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeMeter {
    pub fn new() -> Self {
        let window = (0..WINDOW_SIZE)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / WINDOW_SIZE as f32).cos())
            .collect();
        let (cos, sin) = (0..WINDOW_SIZE)
            .map(|n| {
                let phase = 2.0 * PI * n as f32 / WINDOW_SIZE as f32;
                (phase.cos(), phase.sin())
            })
            .unzip();
        Self {
            window,
            cos,
            sin,
            level: 0.0,
        }
    }

    /// Updates the level from the newest captured samples and returns it.
    pub fn update(&mut self, samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return self.level;
        }
        let newest = &samples[samples.len().saturating_sub(WINDOW_SIZE)..];
        let windowed: Vec<f32> = newest
            .iter()
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();

        let bins = WINDOW_SIZE / 2;
        let mut total = 0.0f32;
        for k in 0..bins {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (n, x) in windowed.iter().enumerate() {
                let idx = (k * n) % WINDOW_SIZE;
                re += x * self.cos[idx];
                im -= x * self.sin[idx];
            }
            let magnitude = (re * re + im * im).sqrt() / WINDOW_SIZE as f32;
            total += Self::to_byte(magnitude);
        }
        self.level = total / bins as f32;
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }

    fn to_byte(magnitude: f32) -> f32 {
        if magnitude <= 0.0 {
            return 0.0;
        }
        let db = 20.0 * magnitude.log10();
        let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
        scaled.clamp(0.0, 255.0).floor()
    }
}
