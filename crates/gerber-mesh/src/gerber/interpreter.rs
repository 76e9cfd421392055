use crate::geom::arc::{draw_arc, ArcDirection};
use crate::geom::flash::{flash_circle, flash_obround, flash_polygon, flash_rect};
use crate::geom::region::{fill_region, BoundarySegment};
use crate::geom::stroke::draw_linear;
use crate::mesh::{GeometryRecord, MeshBuilder};

use super::apertures::ApertureTable;
use super::commands::{ApertureTemplate, CommandStream, GerberCommand, Polarity};
use super::coord::{Axis, CoordinateConverter, RawCoord};
use super::macros::{self, ApertureMacro, MacroTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterpolationMode {
    Linear,
    ClockwiseArc,
    CounterClockwiseArc,
}

/// An open step-and-repeat block: where its geometry starts in the builder,
/// plus grid counts and steps (already in mm).
#[derive(Debug, Clone, Copy)]
struct SrFrame {
    vstart: u32,
    istart: u32,
    x_repeat: u32,
    y_repeat: u32,
    x_step: f64,
    y_step: f64,
}

/// Region collection state. A subpath begins at `start` (set by D02, or by
/// the first draw after G36) and accumulates boundary segments until the
/// next D02 or G37 closes and fills it.
#[derive(Debug, Default)]
struct RegionState {
    active: bool,
    start: Option<[f64; 2]>,
    segments: Vec<BoundarySegment>,
}

/// Gerber state machine. Walks commands and writes triangles through the
/// mesh builder; all state lives for one invocation only.
struct Interpreter {
    mesh: MeshBuilder,
    current: [f64; 2],
    aperture: Option<u32>,
    interpolation: InterpolationMode,
    polarity: Polarity,
    region: RegionState,
    converter: CoordinateConverter,
    units_set: bool,
    format_set: bool,
    apertures: ApertureTable,
    macro_table: MacroTable,
    sr_stack: Vec<SrFrame>,
    warned_single_quadrant: bool,
    warned_missing_units: bool,
    warned_missing_format: bool,
    ended: bool,
}

impl Interpreter {
    fn new() -> Self {
        Self {
            mesh: MeshBuilder::new(),
            current: [0.0, 0.0],
            aperture: None,
            interpolation: InterpolationMode::Linear,
            polarity: Polarity::Dark,
            region: RegionState::default(),
            converter: CoordinateConverter::default(),
            units_set: false,
            format_set: false,
            apertures: ApertureTable::default(),
            macro_table: MacroTable::default(),
            sr_stack: Vec::new(),
            warned_single_quadrant: false,
            warned_missing_units: false,
            warned_missing_format: false,
            ended: false,
        }
    }

    fn process(&mut self, cmd: &GerberCommand) {
        if self.ended {
            return; // everything after M02 is ignored
        }
        self.mesh.note_command();

        match cmd {
            GerberCommand::FormatSpec(fmt) => {
                self.converter.format = fmt.clone();
                self.format_set = true;
            }
            GerberCommand::Units(units) => {
                self.converter.units = *units;
                self.units_set = true;
            }
            GerberCommand::ApertureDefine { code, template } => {
                self.apertures.define(&mut self.mesh, *code, template.clone());
            }
            GerberCommand::MacroDefine { name, body } => {
                let primitives = macros::parse_macro_body(&mut self.mesh, name, body);
                self.macro_table.define(
                    &mut self.mesh,
                    ApertureMacro {
                        name: name.clone(),
                        primitives,
                    },
                );
            }
            GerberCommand::SelectAperture(code) => {
                self.aperture = Some(*code);
            }
            GerberCommand::LinearMode => {
                self.interpolation = InterpolationMode::Linear;
            }
            GerberCommand::ClockwiseArcMode => {
                self.interpolation = InterpolationMode::ClockwiseArc;
            }
            GerberCommand::CounterClockwiseArcMode => {
                self.interpolation = InterpolationMode::CounterClockwiseArc;
            }
            GerberCommand::SingleQuadrant => {
                if !self.warned_single_quadrant {
                    self.mesh.warn(
                        "single-quadrant arc mode (G74) is unsupported; arcs are interpreted as multi-quadrant",
                    );
                    self.warned_single_quadrant = true;
                }
            }
            GerberCommand::MultiQuadrant => {}
            GerberCommand::Polarity(p) => {
                if *p != self.polarity {
                    match p {
                        Polarity::Clear => self.mesh.open_clear_range(),
                        Polarity::Dark => self.mesh.close_clear_range(),
                    }
                    self.polarity = *p;
                }
            }
            GerberCommand::RegionBegin => {
                self.region.active = true;
                self.region.start = None;
                self.region.segments.clear();
            }
            GerberCommand::RegionEnd => {
                if self.region.active {
                    self.close_subpath();
                    self.region.active = false;
                } else {
                    self.mesh.warn("G37 without a matching G36; ignored");
                }
            }
            GerberCommand::Interpolate { x, y, i, j } => {
                self.do_interpolate(*x, *y, *i, *j);
            }
            GerberCommand::Move { x, y } => {
                let to = [self.resolve(*x, Axis::X), self.resolve(*y, Axis::Y)];
                self.current = to;
                if self.region.active {
                    self.close_subpath();
                    self.region.start = Some(to);
                }
            }
            GerberCommand::Flash { x, y } => {
                let to = [self.resolve(*x, Axis::X), self.resolve(*y, Axis::Y)];
                self.current = to;
                if self.region.active {
                    self.mesh.warn("flash inside a region is invalid; skipped");
                    return;
                }
                self.do_flash(to);
            }
            GerberCommand::StepRepeatBegin {
                x_repeat,
                y_repeat,
                x_step,
                y_step,
            } => {
                let factor = self.converter.units.to_mm_factor();
                self.sr_stack.push(SrFrame {
                    vstart: self.mesh.vertex_count(),
                    istart: self.mesh.index_count(),
                    x_repeat: *x_repeat,
                    y_repeat: *y_repeat,
                    x_step: x_step * factor,
                    y_step: y_step * factor,
                });
            }
            GerberCommand::StepRepeatEnd => {
                if !self.close_sr_frame() {
                    self.mesh.warn("%SR% close without an open block; ignored");
                }
            }
            GerberCommand::EndOfFile => {
                self.flush_end();
                self.ended = true;
            }
        }
    }

    /// Resolve a modal coordinate: a missing axis inherits the current value.
    fn resolve(&mut self, raw: Option<RawCoord>, axis: Axis) -> f64 {
        match raw {
            Some(raw) => {
                self.note_coordinate();
                self.converter.to_mm(raw, axis)
            }
            None => match axis {
                Axis::X => self.current[0],
                Axis::Y => self.current[1],
            },
        }
    }

    fn offset(&mut self, raw: Option<RawCoord>, axis: Axis) -> f64 {
        match raw {
            Some(raw) => self.converter.to_mm(raw, axis),
            None => 0.0,
        }
    }

    fn note_coordinate(&mut self) {
        if !self.units_set && !self.warned_missing_units {
            self.mesh
                .warn("coordinate before a %MO% unit directive; assuming millimetres");
            self.warned_missing_units = true;
        }
        if !self.format_set && !self.warned_missing_format {
            self.mesh
                .warn("coordinate before a %FS% format directive; assuming 2.4 leading-zero suppression");
            self.warned_missing_format = true;
        }
    }

    fn do_interpolate(
        &mut self,
        x: Option<RawCoord>,
        y: Option<RawCoord>,
        i: Option<RawCoord>,
        j: Option<RawCoord>,
    ) {
        let from = self.current;
        let to = [self.resolve(x, Axis::X), self.resolve(y, Axis::Y)];
        let has_offset = i.is_some() || j.is_some();
        let offset = [self.offset(i, Axis::X), self.offset(j, Axis::Y)];
        self.current = to;

        if self.region.active {
            if self.region.start.is_none() {
                // a draw in an open region without a D02 starts at the
                // current point
                self.region.start = Some(from);
            }
            let segment = match self.arc_direction() {
                Some(direction) if has_offset => BoundarySegment::Arc {
                    to,
                    center_offset: offset,
                    direction,
                },
                _ => BoundarySegment::Line { to },
            };
            self.region.segments.push(segment);
            return;
        }

        let Some(code) = self.aperture else {
            self.mesh.warn("draw without a selected aperture; skipped");
            return;
        };
        if self.apertures.get(code).is_none() {
            self.mesh
                .warn(format!("draw with undefined aperture D{code}; skipped"));
            return;
        }
        let Some(mut style) = self.apertures.stroke_style(code) else {
            self.mesh.warn(format!(
                "draw with macro aperture D{code} is unsupported; skipped"
            ));
            return;
        };
        style.half_width *= self.converter.units.to_mm_factor();

        match self.arc_direction() {
            None => draw_linear(&mut self.mesh, from, to, style),
            Some(direction) => draw_arc(&mut self.mesh, from, to, offset, direction, style),
        }
    }

    fn arc_direction(&self) -> Option<ArcDirection> {
        match self.interpolation {
            InterpolationMode::Linear => None,
            InterpolationMode::ClockwiseArc => Some(ArcDirection::Clockwise),
            InterpolationMode::CounterClockwiseArc => Some(ArcDirection::CounterClockwise),
        }
    }

    fn do_flash(&mut self, at: [f64; 2]) {
        let Some(code) = self.aperture else {
            self.mesh.warn("flash without a selected aperture; skipped");
            return;
        };
        let factor = self.converter.units.to_mm_factor();
        match self.apertures.get(code) {
            None => {
                self.mesh
                    .warn(format!("flash with undefined aperture D{code}; skipped"));
            }
            Some(ApertureTemplate::Circle { diameter }) => {
                flash_circle(&mut self.mesh, at[0], at[1], diameter * factor);
            }
            Some(ApertureTemplate::Rectangle { x_size, y_size }) => {
                flash_rect(&mut self.mesh, at[0], at[1], x_size * factor, y_size * factor, 0.0);
            }
            Some(ApertureTemplate::Obround { x_size, y_size }) => {
                flash_obround(&mut self.mesh, at[0], at[1], x_size * factor, y_size * factor);
            }
            Some(ApertureTemplate::Polygon {
                outer_diameter,
                num_vertices,
                rotation,
            }) => {
                flash_polygon(
                    &mut self.mesh,
                    at[0],
                    at[1],
                    outer_diameter * factor,
                    *num_vertices,
                    *rotation,
                );
            }
            Some(ApertureTemplate::Macro { name, params }) => match self.macro_table.get(name) {
                Some(mac) => {
                    macros::instantiate(&mut self.mesh, mac, params, at[0], at[1], factor)
                }
                None => self.mesh.warn(format!(
                    "flash with undefined aperture macro \"{name}\"; skipped"
                )),
            },
        }
    }

    /// Fill and reset the pending region subpath, if any.
    fn close_subpath(&mut self) {
        let segments = std::mem::take(&mut self.region.segments);
        if let Some(start) = self.region.start.take() {
            if !segments.is_empty() {
                fill_region(&mut self.mesh, start, &segments);
            }
        }
    }

    /// Close the innermost step-repeat block, replicating its capture.
    /// Returns false when no block was open.
    fn close_sr_frame(&mut self) -> bool {
        let Some(frame) = self.sr_stack.pop() else {
            return false;
        };
        if frame.x_repeat == 0 || frame.y_repeat == 0 {
            self.mesh
                .warn("step-repeat with a zero repeat count; nothing replicated");
            return true;
        }
        let vend = self.mesh.vertex_count();
        let iend = self.mesh.index_count();
        // Row-major: j major, i minor, the original at (0,0) already emitted.
        for j in 0..frame.y_repeat {
            for i in 0..frame.x_repeat {
                if i == 0 && j == 0 {
                    continue;
                }
                self.mesh.replicate_range(
                    frame.vstart,
                    vend,
                    frame.istart,
                    iend,
                    i as f64 * frame.x_step,
                    j as f64 * frame.y_step,
                );
            }
        }
        true
    }

    /// End-of-file housekeeping: an open region is filled and open SR blocks
    /// are closed implicitly (some files omit the final %SR%).
    fn flush_end(&mut self) {
        if self.region.active {
            self.mesh.warn("region still open at end of file; closed implicitly");
            self.close_subpath();
            self.region.active = false;
        }
        while self.close_sr_frame() {}
    }
}

/// Interpret a parsed command stream into a geometry record.
pub fn interpret(stream: CommandStream) -> GeometryRecord {
    let mut interp = Interpreter::new();
    for warning in stream.warnings {
        interp.mesh.warn(warning);
    }
    for cmd in &stream.commands {
        interp.process(cmd);
    }
    if !interp.ended {
        interp.mesh.warn("truncated file: M02 never observed; partial result");
        interp.flush_end();
    }
    interp.mesh.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gerber::commands::ApertureTemplate;
    use crate::gerber::coord::{CoordinateFormat, Units};

    fn rc(value: i64) -> Option<RawCoord> {
        Some(RawCoord {
            value,
            digits: value.unsigned_abs().to_string().len() as u8,
        })
    }

    fn run(commands: Vec<GerberCommand>) -> GeometryRecord {
        interpret(CommandStream {
            commands,
            warnings: Vec::new(),
        })
    }

    /// Format spec + mm units + a 0.1 mm circle aperture selected.
    fn setup() -> Vec<GerberCommand> {
        vec![
            GerberCommand::FormatSpec(CoordinateFormat::default()),
            GerberCommand::Units(Units::Millimeters),
            GerberCommand::ApertureDefine {
                code: 10,
                template: ApertureTemplate::Circle { diameter: 0.1 },
            },
            GerberCommand::SelectAperture(10),
            GerberCommand::LinearMode,
        ]
    }

    fn finish(mut cmds: Vec<GerberCommand>, tail: Vec<GerberCommand>) -> Vec<GerberCommand> {
        cmds.extend(tail);
        cmds.push(GerberCommand::EndOfFile);
        cmds
    }

    #[test]
    fn test_linear_segment() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::Move { x: rc(0), y: rc(0) },
                GerberCommand::Interpolate {
                    x: rc(10000), // 1.0 mm
                    y: rc(0),
                    i: None,
                    j: None,
                },
            ],
        ));
        assert_eq!(record.warning_count, 0);
        // quad + two endcap fans
        assert_eq!(record.index_count, 6 + 2 * 16 * 3);
        assert!((record.bounds.maxx - 1.05).abs() < 1e-6);
        assert!((record.bounds.miny + 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_flash_circle() {
        let record = run(finish(
            setup(),
            vec![GerberCommand::Flash {
                x: rc(10000),
                y: rc(20000),
            }],
        ));
        assert_eq!(record.warning_count, 0);
        assert_eq!(record.vertex_count, 33);
        assert_eq!(record.index_count, 96);
        assert!((record.bounds.minx - 0.95).abs() < 1e-6);
        assert!((record.bounds.maxy - 2.05).abs() < 1e-6);
    }

    #[test]
    fn test_flash_rectangle() {
        let mut cmds = vec![
            GerberCommand::FormatSpec(CoordinateFormat::default()),
            GerberCommand::Units(Units::Millimeters),
            GerberCommand::ApertureDefine {
                code: 11,
                template: ApertureTemplate::Rectangle {
                    x_size: 0.5,
                    y_size: 0.3,
                },
            },
            GerberCommand::SelectAperture(11),
        ];
        cmds.push(GerberCommand::Flash {
            x: rc(10000),
            y: rc(10000),
        });
        cmds.push(GerberCommand::EndOfFile);
        let record = run(cmds);
        assert_eq!(record.vertex_count, 4);
        assert_eq!(record.index_count, 6);
        assert!((record.bounds.minx - 0.75).abs() < 1e-6);
        assert!((record.bounds.miny - 0.85).abs() < 1e-6);
        assert!((record.bounds.maxx - 1.25).abs() < 1e-6);
        assert!((record.bounds.maxy - 1.15).abs() < 1e-6);
    }

    #[test]
    fn test_region_square() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::RegionBegin,
                GerberCommand::Move { x: rc(0), y: rc(0) },
                GerberCommand::Interpolate { x: rc(100000), y: rc(0), i: None, j: None },
                GerberCommand::Interpolate { x: rc(100000), y: rc(100000), i: None, j: None },
                GerberCommand::Interpolate { x: rc(0), y: rc(100000), i: None, j: None },
                GerberCommand::Interpolate { x: rc(0), y: rc(0), i: None, j: None },
                GerberCommand::RegionEnd,
            ],
        ));
        assert_eq!(record.warning_count, 0);
        assert_eq!(record.vertex_count, 4);
        assert_eq!(record.index_count, 6);
        assert!((record.bounds.maxx - 10.0).abs() < 1e-6);
        assert!((record.bounds.maxy - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_region_without_move_uses_current_point() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::Move { x: rc(0), y: rc(0) },
                GerberCommand::RegionBegin,
                GerberCommand::Interpolate { x: rc(100000), y: rc(0), i: None, j: None },
                GerberCommand::Interpolate { x: rc(100000), y: rc(100000), i: None, j: None },
                GerberCommand::Interpolate { x: rc(0), y: rc(0), i: None, j: None },
                GerberCommand::RegionEnd,
            ],
        ));
        assert_eq!(record.warning_count, 0);
        assert_eq!(record.index_count, 3);
    }

    #[test]
    fn test_coordinate_persistence() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::Move {
                    x: rc(10000),
                    y: rc(20000),
                },
                GerberCommand::Interpolate {
                    x: rc(30000),
                    y: None, // Y persists at 2.0 mm
                    i: None,
                    j: None,
                },
            ],
        ));
        assert_eq!(record.warning_count, 0);
        // horizontal stroke at y = 2.0: bounds stay within 2.0 ± half width
        assert!((record.bounds.miny - 1.95).abs() < 1e-6);
        assert!((record.bounds.maxy - 2.05).abs() < 1e-6);
        assert!((record.bounds.maxx - 3.05).abs() < 1e-6);
    }

    #[test]
    fn test_clear_polarity_records_range() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::Flash { x: rc(0), y: rc(0) },
                GerberCommand::Polarity(Polarity::Clear),
                GerberCommand::Flash { x: rc(20000), y: rc(0) },
                GerberCommand::Polarity(Polarity::Dark),
                GerberCommand::Flash { x: rc(40000), y: rc(0) },
            ],
        ));
        assert_eq!(record.warning_count, 0);
        // three flashes of 96 indices each; the middle one is clear
        assert_eq!(record.index_count, 3 * 96);
        assert_eq!(
            record.clear_ranges,
            vec![crate::mesh::ClearRange {
                first_index: 96,
                index_count: 96
            }]
        );
    }

    #[test]
    fn test_clear_polarity_open_at_eof_closed() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::Polarity(Polarity::Clear),
                GerberCommand::Flash { x: rc(0), y: rc(0) },
            ],
        ));
        assert_eq!(record.clear_ranges.len(), 1);
        assert_eq!(record.clear_ranges[0].first_index, 0);
        assert_eq!(record.clear_ranges[0].index_count, 96);
    }

    #[test]
    fn test_inches_conversion() {
        let cmds = vec![
            GerberCommand::FormatSpec(CoordinateFormat::default()),
            GerberCommand::Units(Units::Inches),
            GerberCommand::ApertureDefine {
                code: 10,
                template: ApertureTemplate::Circle { diameter: 0.01 }, // 0.01 in
            },
            GerberCommand::SelectAperture(10),
            GerberCommand::Flash { x: rc(10000), y: rc(0) }, // 1.0000 in
            GerberCommand::EndOfFile,
        ];
        let record = run(cmds);
        assert_eq!(record.warning_count, 0);
        // centre at 25.4 mm, radius 0.127 mm
        assert!((record.positions[0] as f64 - 25.4).abs() < 1e-4);
        assert!((record.bounds.maxx - (25.4 + 0.127)).abs() < 1e-6);
    }

    #[test]
    fn test_draw_without_aperture_warns() {
        let record = run(finish(
            vec![
                GerberCommand::FormatSpec(CoordinateFormat::default()),
                GerberCommand::Units(Units::Millimeters),
            ],
            vec![GerberCommand::Interpolate {
                x: rc(10000),
                y: rc(0),
                i: None,
                j: None,
            }],
        ));
        assert_eq!(record.vertex_count, 0);
        assert_eq!(record.warning_count, 1);
    }

    #[test]
    fn test_draw_with_undefined_aperture_warns() {
        let record = run(finish(
            vec![
                GerberCommand::FormatSpec(CoordinateFormat::default()),
                GerberCommand::Units(Units::Millimeters),
                GerberCommand::SelectAperture(42),
            ],
            vec![GerberCommand::Flash { x: rc(0), y: rc(0) }],
        ));
        assert_eq!(record.vertex_count, 0);
        assert_eq!(record.warning_count, 1);
    }

    #[test]
    fn test_coordinate_before_units_warns_once() {
        let record = run(finish(
            vec![
                GerberCommand::FormatSpec(CoordinateFormat::default()),
                GerberCommand::ApertureDefine {
                    code: 10,
                    template: ApertureTemplate::Circle { diameter: 0.1 },
                },
                GerberCommand::SelectAperture(10),
            ],
            vec![
                GerberCommand::Flash { x: rc(0), y: rc(0) },
                GerberCommand::Flash { x: rc(10000), y: rc(0) },
            ],
        ));
        assert_eq!(record.warning_count, 1);
        assert_eq!(record.vertex_count, 66);
    }

    #[test]
    fn test_g74_warns_once_and_arcs_stay_multi_quadrant() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::SingleQuadrant,
                GerberCommand::SingleQuadrant,
                GerberCommand::CounterClockwiseArcMode,
                GerberCommand::Move { x: rc(50000), y: rc(0) },
                // full circle around the origin: single-quadrant files would
                // read this as a zero-sweep arc
                GerberCommand::Interpolate {
                    x: rc(50000),
                    y: rc(0),
                    i: rc(-50000),
                    j: rc(0),
                },
            ],
        ));
        assert_eq!(record.warning_count, 1);
        assert!((record.bounds.minx + 5.05).abs() < 1e-3);
        assert!((record.bounds.maxx - 5.05).abs() < 1e-3);
    }

    #[test]
    fn test_arc_draw_bounds() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::CounterClockwiseArcMode,
                GerberCommand::Move { x: rc(10000), y: rc(0) },
                // quarter arc from (1,0) to (0,1) about the origin
                GerberCommand::Interpolate {
                    x: rc(0),
                    y: rc(10000),
                    i: rc(-10000),
                    j: rc(0),
                },
            ],
        ));
        assert_eq!(record.warning_count, 0);
        assert!((record.bounds.maxx - 1.05).abs() < 1e-4);
        assert!((record.bounds.maxy - 1.05).abs() < 1e-4);
        for &i in &record.indices {
            assert!(i < record.vertex_count);
        }
    }

    #[test]
    fn test_region_with_arc_boundary() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::RegionBegin,
                GerberCommand::Move { x: rc(-10000), y: rc(0) },
                GerberCommand::Interpolate { x: rc(10000), y: rc(0), i: None, j: None },
                GerberCommand::CounterClockwiseArcMode,
                GerberCommand::Interpolate {
                    x: rc(-10000),
                    y: rc(0),
                    i: rc(-10000),
                    j: rc(0),
                },
                GerberCommand::RegionEnd,
            ],
        ));
        assert_eq!(record.warning_count, 0);
        assert!(record.index_count > 0);
        assert!((record.bounds.maxy - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_step_repeat_2x2() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::StepRepeatBegin {
                    x_repeat: 2,
                    y_repeat: 2,
                    x_step: 3.0,
                    y_step: 4.0,
                },
                GerberCommand::Flash { x: rc(0), y: rc(0) },
                GerberCommand::StepRepeatEnd,
            ],
        ));
        assert_eq!(record.warning_count, 0);
        // 4 copies of a 33-vertex, 32-triangle flash
        assert_eq!(record.vertex_count, 4 * 33);
        assert_eq!(record.index_count, 4 * 96);
        assert!((record.bounds.maxx - 3.05).abs() < 1e-6);
        assert!((record.bounds.maxy - 4.05).abs() < 1e-6);
    }

    #[test]
    fn test_step_repeat_row_major_order() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::StepRepeatBegin {
                    x_repeat: 2,
                    y_repeat: 3,
                    x_step: 10.0,
                    y_step: 10.0,
                },
                GerberCommand::Flash { x: rc(0), y: rc(0) },
                GerberCommand::StepRepeatEnd,
            ],
        ));
        assert_eq!(record.warning_count, 0);
        assert_eq!(record.vertex_count, 6 * 33);
        assert_eq!(record.index_count, 6 * 96);
        // copies appear j-major, i-minor: fan centres land in this order
        let expected = [
            [0.0, 0.0],
            [10.0, 0.0],
            [0.0, 10.0],
            [10.0, 10.0],
            [0.0, 20.0],
            [10.0, 20.0],
        ];
        for (k, exp) in expected.iter().enumerate() {
            let base = k * 33 * 2;
            assert!((record.positions[base] as f64 - exp[0]).abs() < 1e-5, "copy {k}");
            assert!((record.positions[base + 1] as f64 - exp[1]).abs() < 1e-5, "copy {k}");
        }
    }

    #[test]
    fn test_step_repeat_implicit_close_at_eof() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::StepRepeatBegin {
                    x_repeat: 3,
                    y_repeat: 1,
                    x_step: 2.0,
                    y_step: 0.0,
                },
                GerberCommand::Flash { x: rc(0), y: rc(0) },
            ],
        ));
        assert_eq!(record.vertex_count, 3 * 33);
    }

    #[test]
    fn test_step_repeat_nested() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::StepRepeatBegin {
                    x_repeat: 2,
                    y_repeat: 1,
                    x_step: 100.0,
                    y_step: 0.0,
                },
                GerberCommand::StepRepeatBegin {
                    x_repeat: 2,
                    y_repeat: 1,
                    x_step: 10.0,
                    y_step: 0.0,
                },
                GerberCommand::Flash { x: rc(0), y: rc(0) },
                GerberCommand::StepRepeatEnd,
                GerberCommand::StepRepeatEnd,
            ],
        ));
        // inner block doubles the flash, outer block doubles that again
        assert_eq!(record.vertex_count, 4 * 33);
        assert!((record.bounds.maxx - 110.05).abs() < 1e-4);
    }

    #[test]
    fn test_step_repeat_zero_count_warns() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::StepRepeatBegin {
                    x_repeat: 0,
                    y_repeat: 2,
                    x_step: 1.0,
                    y_step: 1.0,
                },
                GerberCommand::Flash { x: rc(0), y: rc(0) },
                GerberCommand::StepRepeatEnd,
            ],
        ));
        assert_eq!(record.warning_count, 1);
        assert_eq!(record.vertex_count, 33);
    }

    #[test]
    fn test_step_repeat_inside_clear_range_replicates_clear() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::Polarity(Polarity::Clear),
                GerberCommand::StepRepeatBegin {
                    x_repeat: 2,
                    y_repeat: 1,
                    x_step: 5.0,
                    y_step: 0.0,
                },
                GerberCommand::Flash { x: rc(0), y: rc(0) },
                GerberCommand::StepRepeatEnd,
                GerberCommand::Polarity(Polarity::Dark),
            ],
        ));
        assert_eq!(record.warning_count, 0);
        // a single clear range spans both copies
        assert_eq!(record.clear_ranges.len(), 1);
        assert_eq!(record.clear_ranges[0].first_index, 0);
        assert_eq!(record.clear_ranges[0].index_count, 2 * 96);
    }

    #[test]
    fn test_flash_macro_aperture() {
        let cmds = vec![
            GerberCommand::FormatSpec(CoordinateFormat::default()),
            GerberCommand::Units(Units::Millimeters),
            GerberCommand::MacroDefine {
                name: "MYCIRC".into(),
                body: vec!["1,1,$1,0,0".into()],
            },
            GerberCommand::ApertureDefine {
                code: 20,
                template: ApertureTemplate::Macro {
                    name: "MYCIRC".into(),
                    params: vec![0.5],
                },
            },
            GerberCommand::SelectAperture(20),
            GerberCommand::Flash {
                x: rc(10000),
                y: rc(20000),
            },
            GerberCommand::EndOfFile,
        ];
        let record = run(cmds);
        assert_eq!(record.warning_count, 0);
        assert_eq!(record.vertex_count, 33);
        assert!((record.positions[0] as f64 - 1.0).abs() < 1e-5);
        assert!((record.positions[1] as f64 - 2.0).abs() < 1e-5);
        assert!((record.bounds.maxx - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_flash_undefined_macro_warns() {
        let cmds = vec![
            GerberCommand::FormatSpec(CoordinateFormat::default()),
            GerberCommand::Units(Units::Millimeters),
            GerberCommand::ApertureDefine {
                code: 20,
                template: ApertureTemplate::Macro {
                    name: "NOPE".into(),
                    params: vec![],
                },
            },
            GerberCommand::SelectAperture(20),
            GerberCommand::Flash { x: rc(0), y: rc(0) },
            GerberCommand::EndOfFile,
        ];
        let record = run(cmds);
        assert_eq!(record.vertex_count, 0);
        assert_eq!(record.warning_count, 1);
    }

    #[test]
    fn test_draw_with_macro_aperture_warns() {
        let cmds = vec![
            GerberCommand::FormatSpec(CoordinateFormat::default()),
            GerberCommand::Units(Units::Millimeters),
            GerberCommand::MacroDefine {
                name: "MYCIRC".into(),
                body: vec!["1,1,1.0,0,0".into()],
            },
            GerberCommand::ApertureDefine {
                code: 20,
                template: ApertureTemplate::Macro {
                    name: "MYCIRC".into(),
                    params: vec![],
                },
            },
            GerberCommand::SelectAperture(20),
            GerberCommand::Interpolate { x: rc(10000), y: rc(0), i: None, j: None },
            GerberCommand::EndOfFile,
        ];
        let record = run(cmds);
        assert_eq!(record.vertex_count, 0);
        assert_eq!(record.warning_count, 1);
    }

    #[test]
    fn test_truncated_file_warns() {
        let record = run(finish(setup(), vec![]).into_iter().filter(|c| !matches!(c, GerberCommand::EndOfFile)).collect());
        assert_eq!(record.warning_count, 1);
        assert!(record.warnings[0].contains("truncated"));
    }

    #[test]
    fn test_commands_after_m02_ignored() {
        let record = run(finish(
            setup(),
            vec![
                GerberCommand::EndOfFile,
                GerberCommand::Flash { x: rc(0), y: rc(0) },
            ],
        ));
        assert_eq!(record.vertex_count, 0);
        assert_eq!(record.warning_count, 0);
    }

    #[test]
    fn test_zero_size_aperture_flash_warns() {
        let cmds = vec![
            GerberCommand::FormatSpec(CoordinateFormat::default()),
            GerberCommand::Units(Units::Millimeters),
            GerberCommand::ApertureDefine {
                code: 10,
                template: ApertureTemplate::Circle { diameter: 0.0 },
            },
            GerberCommand::SelectAperture(10),
            GerberCommand::Flash { x: rc(0), y: rc(0) },
            GerberCommand::EndOfFile,
        ];
        let record = run(cmds);
        assert_eq!(record.vertex_count, 0);
        assert_eq!(record.warning_count, 1);
    }

    #[test]
    fn test_command_count() {
        let record = run(finish(
            setup(),
            vec![GerberCommand::Flash { x: rc(0), y: rc(0) }],
        ));
        // 5 setup commands + flash + M02
        assert_eq!(record.command_count, 7);
    }
}
