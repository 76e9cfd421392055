//! Multi-quadrant arc tessellation: compute centre, radius, and sweep from
//! I/J offsets, sample chord points, and widen each chord as a stroke.

use std::f64::consts::PI;

use crate::mesh::MeshBuilder;

use super::stroke::{draw_linear, StrokeStyle};

/// Maximum chord length in mm. Keeps sub-pixel error at 100× zoom on a
/// 1000-pixel viewport of a 50 mm board; design-time constant.
pub const MAX_CHORD_MM: f64 = 0.02;

/// Minimum chord count for any arc, however small.
pub const MIN_ARC_SEGMENTS: u32 = 8;

/// Guard against absurd radii producing unbounded tessellations.
const MAX_ARC_SEGMENTS: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDirection {
    Clockwise,
    CounterClockwise,
}

/// Sample an arc from `from` to `to` whose centre is `from + center_offset`,
/// into chord endpoints. Returns None (with a warning) when the arc is
/// degenerate. A start coincident with the end and a non-zero offset is a
/// full circle.
pub fn sample_arc(
    mesh: &mut MeshBuilder,
    from: [f64; 2],
    to: [f64; 2],
    center_offset: [f64; 2],
    direction: ArcDirection,
) -> Option<Vec<[f64; 2]>> {
    let cx = from[0] + center_offset[0];
    let cy = from[1] + center_offset[1];

    let r0 = ((from[0] - cx).powi(2) + (from[1] - cy).powi(2)).sqrt();
    let r1 = ((to[0] - cx).powi(2) + (to[1] - cy).powi(2)).sqrt();
    if r0 < 1e-9 {
        mesh.warn("zero-radius arc skipped");
        return None;
    }

    let radius = if (r1 - r0).abs() > (1e-3 * r0).max(1e-6) {
        mesh.warn(format!(
            "arc start/end radii disagree ({r0:.6} vs {r1:.6}); using their average"
        ));
        (r0 + r1) / 2.0
    } else {
        r0
    };

    let theta0 = (from[1] - cy).atan2(from[0] - cx);
    let theta1 = (to[1] - cy).atan2(to[0] - cx);

    let closed = (from[0] - to[0]).abs() < 1e-9 && (from[1] - to[1]).abs() < 1e-9;
    let sweep = if closed {
        match direction {
            ArcDirection::Clockwise => -2.0 * PI,
            ArcDirection::CounterClockwise => 2.0 * PI,
        }
    } else {
        let mut sweep = theta1 - theta0;
        match direction {
            ArcDirection::Clockwise => {
                if sweep >= 0.0 {
                    sweep -= 2.0 * PI;
                }
            }
            ArcDirection::CounterClockwise => {
                if sweep <= 0.0 {
                    sweep += 2.0 * PI;
                }
            }
        }
        sweep
    };

    let wanted = (sweep.abs() * radius / MAX_CHORD_MM).ceil();
    let segments = if wanted > MAX_ARC_SEGMENTS as f64 {
        mesh.warn("arc tessellation clamped");
        MAX_ARC_SEGMENTS
    } else {
        (wanted as u32).max(MIN_ARC_SEGMENTS)
    };

    let mut points = Vec::with_capacity(segments as usize + 1);
    for k in 0..=segments {
        let angle = theta0 + sweep * (k as f64) / (segments as f64);
        points.push([cx + radius * angle.cos(), cy + radius * angle.sin()]);
    }
    Some(points)
}

/// Draw an arc as a sequence of widened chords.
pub fn draw_arc(
    mesh: &mut MeshBuilder,
    from: [f64; 2],
    to: [f64; 2],
    center_offset: [f64; 2],
    direction: ArcDirection,
    style: StrokeStyle,
) {
    if !(style.half_width > 0.0) {
        mesh.warn("arc with zero-width aperture skipped");
        return;
    }
    let Some(points) = sample_arc(mesh, from, to, center_offset, direction) else {
        return;
    };
    for pair in points.windows(2) {
        draw_linear(mesh, pair[0], pair[1], style);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshBuilder;

    const STYLE: StrokeStyle = StrokeStyle {
        half_width: 0.5,
        round_caps: true,
    };

    #[test]
    fn test_quarter_arc_sample_endpoints() {
        let mut mesh = MeshBuilder::new();
        // Quarter circle CCW from (1,0) to (0,1) around the origin.
        let points = sample_arc(
            &mut mesh,
            [1.0, 0.0],
            [0.0, 1.0],
            [-1.0, 0.0],
            ArcDirection::CounterClockwise,
        )
        .unwrap();
        let first = points.first().unwrap();
        let last = points.last().unwrap();
        assert!((first[0] - 1.0).abs() < 1e-9 && first[1].abs() < 1e-9);
        assert!(last[0].abs() < 1e-9 && (last[1] - 1.0).abs() < 1e-9);
        // every sample sits on the unit circle
        for p in &points {
            let r = (p[0] * p[0] + p[1] * p[1]).sqrt();
            assert!((r - 1.0).abs() < 1e-9);
        }
        // chord rule: quarter of unit circle at 0.02 mm chords
        assert!(points.len() >= (std::f64::consts::FRAC_PI_2 / MAX_CHORD_MM) as usize);
    }

    #[test]
    fn test_clockwise_sweep_is_negative() {
        let mut mesh = MeshBuilder::new();
        let points = sample_arc(
            &mut mesh,
            [1.0, 0.0],
            [0.0, 1.0],
            [-1.0, 0.0],
            ArcDirection::Clockwise,
        )
        .unwrap();
        // CW from (1,0) to (0,1) is the long way around: 3/4 turn through (0,-1)
        assert!(points.iter().any(|p| p[1] < -0.9));
    }

    #[test]
    fn test_full_circle_detected() {
        let mut mesh = MeshBuilder::new();
        let points = sample_arc(
            &mut mesh,
            [5.0, 0.0],
            [5.0, 0.0],
            [-5.0, 0.0],
            ArcDirection::CounterClockwise,
        )
        .unwrap();
        // sweeps all the way around: samples reach the far side
        assert!(points.iter().any(|p| p[0] < -4.9));
        let record = mesh.finish();
        assert_eq!(record.warning_count, 0);
    }

    #[test]
    fn test_zero_radius_arc_warns() {
        let mut mesh = MeshBuilder::new();
        assert!(sample_arc(
            &mut mesh,
            [1.0, 1.0],
            [1.0, 1.0],
            [0.0, 0.0],
            ArcDirection::Clockwise,
        )
        .is_none());
        let record = mesh.finish();
        assert_eq!(record.warning_count, 1);
    }

    #[test]
    fn test_radius_mismatch_warns_and_averages() {
        let mut mesh = MeshBuilder::new();
        // end point pulled well off the circle through the start point
        let points = sample_arc(
            &mut mesh,
            [1.0, 0.0],
            [0.0, 1.5],
            [-1.0, 0.0],
            ArcDirection::CounterClockwise,
        )
        .unwrap();
        let record = mesh.finish();
        assert_eq!(record.warning_count, 1);
        let r = (points[1][0].powi(2) + points[1][1].powi(2)).sqrt();
        assert!((r - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_draw_arc_full_circle_bounds() {
        let mut mesh = MeshBuilder::new();
        draw_arc(
            &mut mesh,
            [5.0, 0.0],
            [5.0, 0.0],
            [-5.0, 0.0],
            ArcDirection::CounterClockwise,
            STYLE,
        );
        let record = mesh.finish();
        assert_eq!(record.warning_count, 0);
        assert!((record.bounds.minx + 5.5).abs() < 1e-3);
        assert!((record.bounds.maxx - 5.5).abs() < 1e-3);
        assert!((record.bounds.miny + 5.5).abs() < 1e-3);
        assert!((record.bounds.maxy - 5.5).abs() < 1e-3);
        // all indices reference emitted vertices
        for &i in &record.indices {
            assert!(i < record.vertex_count);
        }
    }

    #[test]
    fn test_small_arc_minimum_segments() {
        let mut mesh = MeshBuilder::new();
        // tiny radius: chord rule alone would give fewer than 8 segments
        let points = sample_arc(
            &mut mesh,
            [0.001, 0.0],
            [0.0, 0.001],
            [-0.001, 0.0],
            ArcDirection::CounterClockwise,
        )
        .unwrap();
        assert_eq!(points.len(), MIN_ARC_SEGMENTS as usize + 1);
    }
}
