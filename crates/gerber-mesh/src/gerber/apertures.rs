use std::collections::HashMap;

use crate::geom::stroke::StrokeStyle;
use crate::mesh::MeshBuilder;

use super::commands::ApertureTemplate;

/// Aperture table built from %AD commands. Templates are normalised on
/// definition: negative dimensions are absolute-valued and out-of-range
/// polygon vertex counts clamped, each with a warning.
#[derive(Debug, Default)]
pub struct ApertureTable {
    apertures: HashMap<u32, ApertureTemplate>,
}

impl ApertureTable {
    pub fn define(&mut self, mesh: &mut MeshBuilder, code: u32, template: ApertureTemplate) {
        let template = normalize(mesh, code, template);
        if self.apertures.insert(code, template).is_some() {
            mesh.warn(format!("aperture D{code} redefined; last definition wins"));
        }
    }

    pub fn get(&self, code: u32) -> Option<&ApertureTemplate> {
        self.apertures.get(&code)
    }

    /// How the aperture behaves when swept along a D01 path, in file units.
    /// Circles stroke at their diameter with round caps; rectangles and
    /// obrounds widen by their minimum dimension (the Gerber standard only
    /// defines stroking for circular and rectangular apertures); polygons
    /// use their outer diameter. Macro apertures are flash-only.
    pub fn stroke_style(&self, code: u32) -> Option<StrokeStyle> {
        match self.apertures.get(&code)? {
            ApertureTemplate::Circle { diameter } => Some(StrokeStyle {
                half_width: diameter / 2.0,
                round_caps: true,
            }),
            ApertureTemplate::Rectangle { x_size, y_size }
            | ApertureTemplate::Obround { x_size, y_size } => Some(StrokeStyle {
                half_width: x_size.min(*y_size) / 2.0,
                round_caps: false,
            }),
            ApertureTemplate::Polygon { outer_diameter, .. } => Some(StrokeStyle {
                half_width: outer_diameter / 2.0,
                round_caps: false,
            }),
            ApertureTemplate::Macro { .. } => None,
        }
    }
}

fn abs_dimension(mesh: &mut MeshBuilder, code: u32, what: &str, v: f64) -> f64 {
    if v < 0.0 {
        mesh.warn(format!("aperture D{code}: negative {what} {v}; using absolute value"));
        -v
    } else {
        v
    }
}

fn normalize(mesh: &mut MeshBuilder, code: u32, template: ApertureTemplate) -> ApertureTemplate {
    match template {
        ApertureTemplate::Circle { diameter } => ApertureTemplate::Circle {
            diameter: abs_dimension(mesh, code, "diameter", diameter),
        },
        ApertureTemplate::Rectangle { x_size, y_size } => ApertureTemplate::Rectangle {
            x_size: abs_dimension(mesh, code, "width", x_size),
            y_size: abs_dimension(mesh, code, "height", y_size),
        },
        ApertureTemplate::Obround { x_size, y_size } => ApertureTemplate::Obround {
            x_size: abs_dimension(mesh, code, "width", x_size),
            y_size: abs_dimension(mesh, code, "height", y_size),
        },
        ApertureTemplate::Polygon {
            outer_diameter,
            num_vertices,
            rotation,
        } => {
            let outer_diameter = abs_dimension(mesh, code, "diameter", outer_diameter);
            let vertices = if !(3..=12).contains(&num_vertices) {
                let clamped = num_vertices.clamp(3, 12);
                mesh.warn(format!(
                    "aperture D{code}: polygon vertex count {num_vertices} out of range; clamped to {clamped}"
                ));
                clamped
            } else {
                num_vertices
            };
            ApertureTemplate::Polygon {
                outer_diameter,
                num_vertices: vertices,
                rotation: rotation.rem_euclid(360.0),
            }
        }
        other @ ApertureTemplate::Macro { .. } => other,
    }
}
