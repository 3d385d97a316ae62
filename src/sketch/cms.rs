//! Count-Min Sketch primitive.
//!
//! A fixed-shape table of `d` hash rows by `w` counter columns. Updates add
//! into one cell per row; estimates take the minimum across rows, so the
//! estimate is always an overestimate of the true count. With shape derived
//! from error parameters, `P(overestimate > eps * total) < gamma`.
//!
//! Concurrency: every cell is an `AtomicU64` accessed with relaxed
//! ordering, so `update`, `estimate`, and `reset` all take `&self` and may
//! race freely. A reset racing an update loses at most the in-flight
//! increments, which only deflates counts that were about to be zeroed
//! anyway.

use std::f64::consts::E;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use twox_hash::xxh3::hash64_with_seed;

/// Errors from sketch construction.
#[derive(Error, Debug, PartialEq)]
pub enum SketchError {
    #[error("sketch rows must be >= 1, got {0}")]
    InvalidRows(u64),

    #[error("sketch cols must be >= 1, got {0}")]
    InvalidCols(u64),

    #[error("gamma must be in (0, 1], got {0}")]
    InvalidGamma(f64),

    #[error("eps must be in (0, 1], got {0}")]
    InvalidEps(f64),
}

/// A Count-Min Sketch over byte-string keys with u64 counters.
pub struct Cms {
    rows: usize,
    cols: usize,
    /// Row-major `rows * cols` cells.
    cells: Vec<AtomicU64>,
}

impl Cms {
    /// Builds a sketch with an explicit shape.
    pub fn with_dims(rows: u64, cols: u64) -> Result<Self, SketchError> {
        if rows < 1 {
            return Err(SketchError::InvalidRows(rows));
        }
        if cols < 1 {
            return Err(SketchError::InvalidCols(cols));
        }

        let (rows, cols) = (rows as usize, cols as usize);
        let mut cells = Vec::with_capacity(rows * cols);
        cells.resize_with(rows * cols, || AtomicU64::new(0));

        Ok(Self { rows, cols, cells })
    }

    /// Builds a sketch sized from error parameters: `gamma` bounds the
    /// probability of exceeding the error tolerance `eps`.
    pub fn with_gamma_eps(gamma: f64, eps: f64) -> Result<Self, SketchError> {
        if !(gamma > 0.0 && gamma <= 1.0) {
            return Err(SketchError::InvalidGamma(gamma));
        }
        if !(eps > 0.0 && eps <= 1.0) {
            return Err(SketchError::InvalidEps(eps));
        }

        Self::with_dims(Self::rows_from_gamma(gamma), Self::cols_from_eps(eps))
    }

    /// `d = ceil(ln(1/gamma))`.
    pub fn rows_from_gamma(gamma: f64) -> u64 {
        (1.0 / gamma).ln().ceil() as u64
    }

    /// `w = ceil(e/eps)`.
    pub fn cols_from_eps(eps: f64) -> u64 {
        (E / eps).ceil() as u64
    }

    /// `gamma = 1/exp(d)`.
    pub fn gamma_from_rows(rows: u64) -> f64 {
        1.0 / (rows as f64).exp()
    }

    /// `eps = e/w`.
    pub fn eps_from_cols(cols: u64) -> f64 {
        E / cols as f64
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Constant heap footprint of the counter table.
    pub fn size_bytes(&self) -> usize {
        self.rows * self.cols * std::mem::size_of::<u64>()
    }

    /// Adds `delta` to the key's cell in every row, saturating at u64::MAX.
    pub fn update(&self, key: &[u8], delta: u64) {
        for row in 0..self.rows {
            let cell = &self.cells[self.cell_index(row, key)];
            let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_add(delta))
            });
        }
    }

    /// Returns the minimum counter for the key across all rows.
    pub fn estimate(&self, key: &[u8]) -> u64 {
        (0..self.rows)
            .map(|row| self.cells[self.cell_index(row, key)].load(Ordering::Relaxed))
            .min()
            .unwrap_or(0)
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for cell in &self.cells {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Each row hashes with its index as seed, keeping the d hash functions
    /// distinct and deterministic for the process lifetime.
    fn cell_index(&self, row: usize, key: &[u8]) -> usize {
        let h = hash64_with_seed(key, row as u64);
        row * self.cols + (h % self.cols as u64) as usize
    }
}

impl std::fmt::Debug for Cms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cms")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_never_underestimates() {
        let cms = Cms::with_dims(5, 2048).expect("valid shape");
        for _ in 0..1000 {
            cms.update(b"/bin/sh", 1);
        }
        assert_eq!(cms.estimate(b"/bin/sh"), 1000);
        assert_eq!(cms.estimate(b"/bin/zsh"), 0);
    }

    #[test]
    fn test_collision_overestimate_bounded() {
        let cms = Cms::with_dims(2, 4).expect("valid shape");
        for i in 0..100 {
            let key = format!("/usr/bin/tool{i}");
            for _ in 0..10 {
                cms.update(key.as_bytes(), 1);
            }
        }
        for i in 0..100 {
            let key = format!("/usr/bin/tool{i}");
            let est = cms.estimate(key.as_bytes());
            assert!(est >= 10, "estimate {est} below true count");
            assert!(est <= 1000, "estimate {est} above total stream count");
        }
    }

    #[test]
    fn test_reset_zeroes_all_counters() {
        let cms = Cms::with_dims(3, 64).expect("valid shape");
        cms.update(b"a", 5);
        cms.update(b"b", 7);
        cms.reset();
        assert_eq!(cms.estimate(b"a"), 0);
        assert_eq!(cms.estimate(b"b"), 0);
    }

    #[test]
    fn test_saturating_update() {
        let cms = Cms::with_dims(2, 8).expect("valid shape");
        cms.update(b"hot", u64::MAX);
        cms.update(b"hot", 10);
        assert_eq!(cms.estimate(b"hot"), u64::MAX);
    }

    #[test]
    fn test_determinism_across_instances() {
        let a = Cms::with_dims(4, 256).expect("valid shape");
        let b = Cms::with_dims(4, 256).expect("valid shape");
        for i in 0..50u32 {
            let key = i.to_le_bytes();
            a.update(&key, u64::from(i));
            b.update(&key, u64::from(i));
        }
        for i in 0..50u32 {
            let key = i.to_le_bytes();
            assert_eq!(a.estimate(&key), b.estimate(&key));
        }
    }

    #[test]
    fn test_shape_from_error_params() {
        // ln(100) = 4.605 -> 5 rows, ln(1000) = 6.908 -> 7 rows.
        assert_eq!(Cms::rows_from_gamma(0.01), 5);
        assert_eq!(Cms::rows_from_gamma(0.001), 7);
        // e/0.1 = 27.18 -> 28 cols, e/0.001 = 2718.28 -> 2719 cols.
        assert_eq!(Cms::cols_from_eps(0.1), 28);
        assert_eq!(Cms::cols_from_eps(0.001), 2719);
    }

    #[test]
    fn test_inverse_formulas() {
        assert!((Cms::gamma_from_rows(7) - (-7.0f64).exp()).abs() < 1e-12);
        assert!((Cms::eps_from_cols(2048) - E / 2048.0).abs() < 1e-15);
    }

    #[test]
    fn test_gamma_eps_shape() {
        // gamma=0.001, eps=0.0001 is the canonical sizing example:
        // d = ceil(ln(1000)) = 7, w = ceil(e/0.0001) = 27183.
        let cms = Cms::with_gamma_eps(0.001, 0.0001).expect("valid params");
        assert_eq!(cms.rows(), 7);
        assert_eq!(cms.cols(), 27183);
        assert_eq!(cms.size_bytes(), 7 * 27183 * 8);
    }

    #[test]
    fn test_size_bytes_constant_under_updates() {
        let cms = Cms::with_dims(5, 1024).expect("valid shape");
        let before = cms.size_bytes();
        for i in 0..10_000u32 {
            cms.update(&i.to_le_bytes(), 1);
        }
        assert_eq!(cms.size_bytes(), before);
        assert_eq!(before, 5 * 1024 * 8);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert_eq!(Cms::with_dims(0, 10).unwrap_err(), SketchError::InvalidRows(0));
        assert_eq!(Cms::with_dims(10, 0).unwrap_err(), SketchError::InvalidCols(0));
        assert!(matches!(
            Cms::with_gamma_eps(0.0, 0.1),
            Err(SketchError::InvalidGamma(_)),
        ));
        assert!(matches!(
            Cms::with_gamma_eps(1.5, 0.1),
            Err(SketchError::InvalidGamma(_)),
        ));
        assert!(matches!(
            Cms::with_gamma_eps(0.1, 0.0),
            Err(SketchError::InvalidEps(_)),
        ));
        // gamma = 1 derives zero rows, which the shape check rejects.
        assert!(matches!(
            Cms::with_gamma_eps(1.0, 0.1),
            Err(SketchError::InvalidRows(0)),
        ));
    }
}
