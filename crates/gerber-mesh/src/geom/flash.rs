//! Aperture expansion: turn a standard aperture positioned at a point into
//! triangles in the mesh.

use crate::mesh::MeshBuilder;

use super::{rotate_deg, CIRCLE_SEGMENTS};

/// Validate a linear dimension before emission. Negative values are
/// absolute-valued with a warning; zero (or non-finite) values produce no
/// geometry and return None.
fn checked_dimension(mesh: &mut MeshBuilder, what: &str, value: f64) -> Option<f64> {
    if !value.is_finite() {
        mesh.warn(format!("non-finite {what} dimension; skipped"));
        return None;
    }
    let value = if value < 0.0 {
        mesh.warn(format!("negative {what} dimension {value}; using absolute value"));
        -value
    } else {
        value
    };
    if value == 0.0 {
        mesh.warn(format!("zero-size {what}; no geometry emitted"));
        return None;
    }
    Some(value)
}

/// Flash a circle of the given diameter centred at (cx, cy): a 32-segment
/// fan, centre vertex first.
pub fn flash_circle(mesh: &mut MeshBuilder, cx: f64, cy: f64, diameter: f64) {
    let Some(diameter) = checked_dimension(mesh, "circle aperture", diameter) else {
        return;
    };
    mesh.push_ngon(cx, cy, diameter / 2.0, CIRCLE_SEGMENTS);
}

/// Flash an axis-aligned or rotated rectangle centred at (cx, cy).
/// Rotation is about the rectangle's own centre, in degrees.
pub fn flash_rect(mesh: &mut MeshBuilder, cx: f64, cy: f64, width: f64, height: f64, rotation_deg: f64) {
    let Some(width) = checked_dimension(mesh, "rectangle aperture width", width) else {
        return;
    };
    let Some(height) = checked_dimension(mesh, "rectangle aperture height", height) else {
        return;
    };

    let hw = width / 2.0;
    let hh = height / 2.0;
    // CCW corner order
    let corners = [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)];

    let mut ids = [0u32; 4];
    for (slot, (dx, dy)) in ids.iter_mut().zip(corners) {
        let (rx, ry) = rotate_deg(dx, dy, rotation_deg);
        match mesh.push_vertex(cx + rx, cy + ry) {
            Some(id) => *slot = id,
            None => return,
        }
    }
    mesh.push_quad(ids[0], ids[1], ids[2], ids[3]);
}

/// Flash an obround: a rectangle body along the longer axis with two
/// semicircular caps. Degenerates to a circle when width == height.
pub fn flash_obround(mesh: &mut MeshBuilder, cx: f64, cy: f64, width: f64, height: f64) {
    let Some(width) = checked_dimension(mesh, "obround aperture width", width) else {
        return;
    };
    let Some(height) = checked_dimension(mesh, "obround aperture height", height) else {
        return;
    };

    if (width - height).abs() < 1e-12 {
        flash_circle(mesh, cx, cy, width);
        return;
    }

    use std::f64::consts::FRAC_PI_2;
    if width > height {
        let half_body = (width - height) / 2.0;
        let r = height / 2.0;
        flash_rect(mesh, cx, cy, width - height, height, 0.0);
        super::stroke::semicircle(mesh, cx + half_body, cy, r, -FRAC_PI_2);
        super::stroke::semicircle(mesh, cx - half_body, cy, r, FRAC_PI_2);
    } else {
        let half_body = (height - width) / 2.0;
        let r = width / 2.0;
        flash_rect(mesh, cx, cy, width, height - width, 0.0);
        super::stroke::semicircle(mesh, cx, cy + half_body, r, 0.0);
        super::stroke::semicircle(mesh, cx, cy - half_body, r, std::f64::consts::PI);
    }
}

/// Flash a regular polygon. Vertex count is clamped to [3, 12] and the
/// rotation is reduced modulo 360° before emission.
pub fn flash_polygon(
    mesh: &mut MeshBuilder,
    cx: f64,
    cy: f64,
    diameter: f64,
    vertices: u32,
    rotation_deg: f64,
) {
    let Some(diameter) = checked_dimension(mesh, "polygon aperture", diameter) else {
        return;
    };
    let n = if !(3..=12).contains(&vertices) {
        let clamped = vertices.clamp(3, 12);
        mesh.warn(format!(
            "polygon aperture vertex count {vertices} out of range; clamped to {clamped}"
        ));
        clamped
    } else {
        vertices
    };
    let rotation = rotation_deg.rem_euclid(360.0);

    let r = diameter / 2.0;
    let phase = rotation.to_radians();
    let Some(center) = mesh.push_vertex(cx, cy) else {
        return;
    };
    let mut first_rim = None;
    for k in 0..n {
        let angle = phase + 2.0 * std::f64::consts::PI * (k as f64) / (n as f64);
        let Some(rim) = mesh.push_vertex(cx + r * angle.cos(), cy + r * angle.sin()) else {
            return;
        };
        if first_rim.is_none() {
            first_rim = Some(rim);
        }
    }
    let Some(first_rim) = first_rim else { return };
    for k in 0..n {
        mesh.push_triangle(center, first_rim + k, first_rim + (k + 1) % n);
    }
}
