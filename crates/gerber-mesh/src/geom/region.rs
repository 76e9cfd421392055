//! Region filling: flatten a closed boundary (lines and arcs) and
//! triangulate it by ear clipping with degeneracy fallbacks.

use crate::mesh::MeshBuilder;

use super::arc::{sample_arc, ArcDirection};

/// One boundary edge of a region contour, taken from the current point to
/// `to`. Arc segments carry the I/J centre offset from their start point.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundarySegment {
    Line {
        to: [f64; 2],
    },
    Arc {
        to: [f64; 2],
        center_offset: [f64; 2],
        direction: ArcDirection,
    },
}

/// Fill a closed region starting at `start` and following `segments`.
/// Arc segments are pre-tessellated into chords by the arc chord rule.
pub fn fill_region(mesh: &mut MeshBuilder, start: [f64; 2], segments: &[BoundarySegment]) {
    let mut points = vec![start];
    let mut cursor = start;
    for segment in segments {
        match segment {
            BoundarySegment::Line { to } => {
                points.push(*to);
                cursor = *to;
            }
            BoundarySegment::Arc {
                to,
                center_offset,
                direction,
            } => {
                match sample_arc(mesh, cursor, *to, *center_offset, *direction) {
                    Some(samples) => points.extend(samples.into_iter().skip(1)),
                    // degenerate arc (already warned): fall back to a chord
                    None => points.push(*to),
                }
                cursor = *to;
            }
        }
    }
    fill_outline(mesh, &points);
}

/// Triangulate a polygon given as a vertex loop. Consecutive duplicates are
/// dropped and the loop is auto-closed; degenerate input is skipped with a
/// warning.
pub fn fill_outline(mesh: &mut MeshBuilder, points: &[[f64; 2]]) {
    let mut poly: Vec<[f64; 2]> = Vec::with_capacity(points.len());
    for &p in points {
        if poly.last().is_some_and(|last| same_point(*last, p)) {
            continue;
        }
        poly.push(p);
    }
    // drop an explicit closing vertex; the loop is implicit from here on
    if poly.len() >= 2 && same_point(poly[0], poly[poly.len() - 1]) {
        poly.pop();
    }
    if poly.len() < 3 {
        mesh.warn("region with fewer than three distinct vertices skipped");
        return;
    }

    let area = signed_area(&poly);
    if area.abs() < 1e-9 {
        mesh.warn("zero-area region skipped");
        return;
    }
    if area < 0.0 {
        poly.reverse();
    }

    let mut ids = Vec::with_capacity(poly.len());
    for p in &poly {
        match mesh.push_vertex(p[0], p[1]) {
            Some(id) => ids.push(id),
            None => return,
        }
    }

    ear_clip(mesh, &poly, &ids);
}

/// Twice the signed area (shoelace) halved; positive for CCW winding.
fn signed_area(points: &[[f64; 2]]) -> f64 {
    let mut sum = 0.0;
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        sum += a[0] * b[1] - b[0] * a[1];
    }
    sum / 2.0
}

/// Cross product of (a - o) × (b - o).
fn cross(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

fn same_point(a: [f64; 2], b: [f64; 2]) -> bool {
    (a[0] - b[0]).abs() < 1e-9 && (a[1] - b[1]).abs() < 1e-9
}

/// Point-in-triangle test for a CCW triangle; boundary counts as inside so
/// touching vertices block an ear.
fn point_in_triangle(p: [f64; 2], a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> bool {
    let eps = 1e-12;
    cross(a, b, p) >= -eps && cross(b, c, p) >= -eps && cross(c, a, p) >= -eps
}

/// Interior angle at `b` in radians.
fn interior_angle(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    let u = [a[0] - b[0], a[1] - b[1]];
    let v = [c[0] - b[0], c[1] - b[1]];
    let dot = u[0] * v[0] + u[1] * v[1];
    let lu = (u[0] * u[0] + u[1] * u[1]).sqrt();
    let lv = (v[0] * v[0] + v[1] * v[1]).sqrt();
    if lu < 1e-12 || lv < 1e-12 {
        return 0.0;
    }
    (dot / (lu * lv)).clamp(-1.0, 1.0).acos()
}

/// Standard ear clipping over a CCW polygon. When no ear can be found (self-
/// intersecting or deeply twisted boundary) the remainder is emitted as a
/// fan with a warning.
fn ear_clip(mesh: &mut MeshBuilder, poly: &[[f64; 2]], ids: &[u32]) {
    let mut ring: Vec<usize> = (0..poly.len()).collect();

    while ring.len() > 3 {
        let n = ring.len();
        let mut best: Option<(usize, f64)> = None;
        for k in 0..n {
            let ip = ring[(k + n - 1) % n];
            let ic = ring[k];
            let inx = ring[(k + 1) % n];
            let (a, b, c) = (poly[ip], poly[ic], poly[inx]);
            if cross(a, b, c) <= 1e-12 {
                continue; // reflex or collinear corner
            }
            let blocked = ring.iter().any(|&other| {
                other != ip && other != ic && other != inx && point_in_triangle(poly[other], a, b, c)
            });
            if blocked {
                continue;
            }
            let angle = interior_angle(a, b, c);
            if best.map_or(true, |(_, prev)| angle < prev) {
                best = Some((k, angle));
            }
        }

        match best {
            Some((k, _)) => {
                let n = ring.len();
                let ip = ring[(k + n - 1) % n];
                let ic = ring[k];
                let inx = ring[(k + 1) % n];
                mesh.push_triangle(ids[ip], ids[ic], ids[inx]);
                ring.remove(k);
            }
            None => {
                mesh.warn("self-intersecting region boundary; filled as a fan");
                for w in 1..ring.len() - 1 {
                    mesh.push_triangle(ids[ring[0]], ids[ring[w]], ids[ring[w + 1]]);
                }
                return;
            }
        }
    }

    mesh.push_triangle(ids[ring[0]], ids[ring[1]], ids[ring[2]]);
}
