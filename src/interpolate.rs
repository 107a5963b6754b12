//! Interpolation Module
//!
//! This module provides the fractional sample readers used by the sample
//! playback path. The playback cursor is split into an integer index and a
//! fractional coefficient in [0, 1); the interpolators reconstruct the value
//! between source frames.
//!
//! # Interpolators
//!
//! - **Linear**: two-point, cheapest, audible rolloff when transposing up
//! - **Hermite (3rd order)**: four-point cubic through the sample points
//! - **B-spline (3rd order)**: four-point cubic with stronger smoothing
//!
//! Neighbor reads are clamped to the source bounds, so the callers may pass
//! indices at the very edges of the buffer.

/// Reads a source frame with the index clamped to the buffer bounds.
#[inline]
fn frame_at(source: &[f32], index: isize) -> f32 {
    let clamped = index.clamp(0, source.len() as isize - 1) as usize;
    source[clamped]
}

/// Two-point linear interpolation at `index + coeff`.
#[inline]
pub fn interpolate_linear(source: &[f32], index: usize, coeff: f32) -> f32 {
    let x0 = frame_at(source, index as isize);
    let x1 = frame_at(source, index as isize + 1);
    x0 + coeff * (x1 - x0)
}

/// Four-point third-order Hermite interpolation at `index + coeff`.
#[inline]
pub fn interpolate_hermite3(source: &[f32], index: usize, coeff: f32) -> f32 {
    let ym1 = frame_at(source, index as isize - 1);
    let y0 = frame_at(source, index as isize);
    let y1 = frame_at(source, index as isize + 1);
    let y2 = frame_at(source, index as isize + 2);

    let c0 = y0;
    let c1 = 0.5 * (y1 - ym1);
    let c2 = ym1 - 2.5 * y0 + 2.0 * y1 - 0.5 * y2;
    let c3 = 0.5 * (y2 - ym1) + 1.5 * (y0 - y1);

    ((c3 * coeff + c2) * coeff + c1) * coeff + c0
}

/// Four-point third-order B-spline interpolation at `index + coeff`.
///
/// The B-spline basis does not pass exactly through the sample points; it
/// trades a little passband accuracy for better suppression of imaging
/// artifacts when resampling.
#[inline]
pub fn interpolate_bspline3(source: &[f32], index: usize, coeff: f32) -> f32 {
    let ym1 = frame_at(source, index as isize - 1);
    let y0 = frame_at(source, index as isize);
    let y1 = frame_at(source, index as isize + 1);
    let y2 = frame_at(source, index as isize + 2);

    let x = coeff;
    let x2 = x * x;
    let x3 = x2 * x;

    let h0 = (1.0 - x) * (1.0 - x) * (1.0 - x) / 6.0;
    let h1 = (3.0 * x3 - 6.0 * x2 + 4.0) / 6.0;
    let h2 = (-3.0 * x3 + 3.0 * x2 + 3.0 * x + 1.0) / 6.0;
    let h3 = x3 / 6.0;

    h0 * ym1 + h1 * y0 + h2 * y1 + h3 * y2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_midpoint() {
        let source = [0.0f32, 1.0, 2.0, 3.0];
        assert!((interpolate_linear(&source, 1, 0.5) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_linear_at_integer_positions() {
        let source = [0.5f32, -0.25, 0.75];
        for (i, &value) in source.iter().enumerate() {
            assert!((interpolate_linear(&source, i, 0.0) - value).abs() < 1e-6);
        }
    }

    #[test]
    fn test_hermite_reproduces_linear_ramp() {
        // A cubic through four collinear points stays on the line.
        let source: Vec<f32> = (0..16).map(|i| i as f32 * 0.25).collect();
        for i in 1..14 {
            let expected = (i as f32 + 0.3) * 0.25;
            let value = interpolate_hermite3(&source, i, 0.3);
            assert!(
                (value - expected).abs() < 1e-5,
                "hermite off the ramp at {}: {} vs {}",
                i,
                value,
                expected
            );
        }
    }

    #[test]
    fn test_bspline_reproduces_linear_ramp() {
        let source: Vec<f32> = (0..16).map(|i| i as f32 * 0.25).collect();
        for i in 1..14 {
            let expected = (i as f32 + 0.7) * 0.25;
            let value = interpolate_bspline3(&source, i, 0.7);
            assert!(
                (value - expected).abs() < 1e-5,
                "b-spline off the ramp at {}: {} vs {}",
                i,
                value,
                expected
            );
        }
    }

    #[test]
    fn test_edge_clamping() {
        let source = [1.0f32, 2.0];
        // Neighbor reads past either end must not panic.
        let first = interpolate_hermite3(&source, 0, 0.5);
        let last = interpolate_bspline3(&source, 1, 0.9);
        assert!(first.is_finite());
        assert!(last.is_finite());
    }
}
