//! Stroke widening: turn a straight segment drawn with an aperture into a
//! quad, plus semicircular endcaps when the aperture is round.

use crate::mesh::MeshBuilder;

use super::flash::flash_circle;
use super::CAP_SEGMENTS;

/// How an aperture behaves when swept along a path. The half width is the
/// aperture's bounding radius perpendicular to the stroke; round apertures
/// additionally get endcaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub half_width: f64,
    pub round_caps: bool,
}

/// Emit the swept region of the aperture translated along `from → to`.
pub fn draw_linear(mesh: &mut MeshBuilder, from: [f64; 2], to: [f64; 2], style: StrokeStyle) {
    if !(style.half_width > 0.0) {
        mesh.warn("stroke with zero-width aperture skipped");
        return;
    }

    let dx = to[0] - from[0];
    let dy = to[1] - from[1];
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-9 {
        if style.round_caps {
            // Zero-length draw with a round aperture is equivalent to a flash.
            flash_circle(mesh, from[0], from[1], style.half_width * 2.0);
        } else {
            mesh.warn("zero-length stroke with non-circular aperture skipped");
        }
        return;
    }

    let h = style.half_width;
    let nx = -dy / len * h;
    let ny = dx / len * h;

    // CCW quad: the two corners below the segment, then the two above.
    let corners = [
        [from[0] - nx, from[1] - ny],
        [to[0] - nx, to[1] - ny],
        [to[0] + nx, to[1] + ny],
        [from[0] + nx, from[1] + ny],
    ];
    let mut ids = [0u32; 4];
    for (slot, corner) in ids.iter_mut().zip(corners) {
        match mesh.push_vertex(corner[0], corner[1]) {
            Some(id) => *slot = id,
            None => return,
        }
    }
    mesh.push_quad(ids[0], ids[1], ids[2], ids[3]);

    if style.round_caps {
        let theta = dy.atan2(dx);
        let half_pi = std::f64::consts::FRAC_PI_2;
        semicircle(mesh, from[0], from[1], h, theta + half_pi);
        semicircle(mesh, to[0], to[1], h, theta - half_pi);
    }
}

/// Fan-triangulated semicircle of radius `r` centred at (cx, cy), sweeping
/// π counter-clockwise from `start_angle` (radians).
pub(crate) fn semicircle(mesh: &mut MeshBuilder, cx: f64, cy: f64, r: f64, start_angle: f64) {
    let Some(center) = mesh.push_vertex(cx, cy) else {
        return;
    };
    let mut first_rim = None;
    for k in 0..=CAP_SEGMENTS {
        let angle = start_angle + std::f64::consts::PI * (k as f64) / (CAP_SEGMENTS as f64);
        let Some(rim) = mesh.push_vertex(cx + r * angle.cos(), cy + r * angle.sin()) else {
            return;
        };
        if first_rim.is_none() {
            first_rim = Some(rim);
        }
    }
    let Some(first_rim) = first_rim else { return };
    for k in 0..CAP_SEGMENTS {
        mesh.push_triangle(center, first_rim + k, first_rim + k + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshBuilder;

    const ROUND: StrokeStyle = StrokeStyle {
        half_width: 0.5,
        round_caps: true,
    };

    const SQUARE: StrokeStyle = StrokeStyle {
        half_width: 0.5,
        round_caps: false,
    };

    #[test]
    fn test_square_stroke_is_one_quad() {
        let mut mesh = MeshBuilder::new();
        draw_linear(&mut mesh, [0.0, 0.0], [10.0, 0.0], SQUARE);
        let record = mesh.finish();
        assert_eq!(record.vertex_count, 4);
        assert_eq!(record.index_count, 6);
        assert!((record.bounds.miny + 0.5).abs() < 1e-9);
        assert!((record.bounds.maxy - 0.5).abs() < 1e-9);
        assert!((record.bounds.maxx - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_round_stroke_adds_caps() {
        let mut mesh = MeshBuilder::new();
        draw_linear(&mut mesh, [0.0, 0.0], [10.0, 0.0], ROUND);
        let record = mesh.finish();
        // quad + two (CAP_SEGMENTS + 2)-vertex fans
        assert_eq!(record.vertex_count, 4 + 2 * (CAP_SEGMENTS + 2));
        assert_eq!(record.index_count, 6 + 2 * CAP_SEGMENTS * 3);
        // caps extend the bounds past the endpoints
        assert!((record.bounds.minx + 0.5).abs() < 1e-6);
        assert!((record.bounds.maxx - 10.5).abs() < 1e-6);
    }

    #[test]
    fn test_diagonal_stroke_width() {
        let mut mesh = MeshBuilder::new();
        draw_linear(&mut mesh, [0.0, 0.0], [10.0, 10.0], SQUARE);
        let record = mesh.finish();
        assert_eq!(record.vertex_count, 4);
        // corners are offset perpendicular to the diagonal
        let inv_sqrt2 = 0.5f64 / 2.0f64.sqrt();
        assert!((record.bounds.minx + inv_sqrt2).abs() < 1e-6);
    }

    #[test]
    fn test_zero_length_round_stroke_flashes() {
        let mut mesh = MeshBuilder::new();
        draw_linear(&mut mesh, [1.0, 1.0], [1.0, 1.0], ROUND);
        let record = mesh.finish();
        assert_eq!(record.vertex_count, 33);
        assert_eq!(record.warning_count, 0);
        assert!((record.bounds.maxx - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_length_square_stroke_warns() {
        let mut mesh = MeshBuilder::new();
        draw_linear(&mut mesh, [1.0, 1.0], [1.0, 1.0], SQUARE);
        let record = mesh.finish();
        assert_eq!(record.vertex_count, 0);
        assert_eq!(record.warning_count, 1);
    }

    #[test]
    fn test_zero_width_stroke_warns() {
        let mut mesh = MeshBuilder::new();
        draw_linear(
            &mut mesh,
            [0.0, 0.0],
            [1.0, 0.0],
            StrokeStyle {
                half_width: 0.0,
                round_caps: true,
            },
        );
        let record = mesh.finish();
        assert_eq!(record.vertex_count, 0);
        assert_eq!(record.warning_count, 1);
    }
}
