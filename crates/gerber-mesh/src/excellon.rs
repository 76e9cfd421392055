//! Excellon NC-drill parsing: M48 header with a tool table, then a body of
//! tool selections and hole coordinates. Each hole is flashed as a circle
//! with the tool's diameter.

use std::collections::HashMap;

use crate::geom::flash::flash_circle;
use crate::mesh::{GeometryRecord, MeshBuilder};

/// Units used in the drill file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrillUnits {
    Metric,
    Inches,
}

/// Zero suppression declared in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZeroMode {
    Trailing,
    Leading,
}

/// Coordinate format: how many integer and decimal digits.
#[derive(Debug, Clone, Copy)]
struct DrillFormat {
    integer: u8,
    decimal: u8,
}

struct DrillParser {
    mesh: MeshBuilder,
    units: DrillUnits,
    zero_mode: ZeroMode,
    format: DrillFormat,
    tools: HashMap<u32, f64>, // tool number → diameter in mm
    current_tool: Option<u32>,
    in_header: bool,
    saw_header: bool,
    warned_missing_header: bool,
    warned_routing: bool,
    warned_no_tool: bool,
    ended: bool,
}

impl DrillParser {
    fn new() -> Self {
        Self {
            mesh: MeshBuilder::new(),
            // Missing-header defaults: inch, 2.4, leading-zero suppression.
            units: DrillUnits::Inches,
            zero_mode: ZeroMode::Leading,
            format: DrillFormat {
                integer: 2,
                decimal: 4,
            },
            tools: HashMap::new(),
            current_tool: None,
            in_header: false,
            saw_header: false,
            warned_missing_header: false,
            warned_routing: false,
            warned_no_tool: false,
            ended: false,
        }
    }

    fn process_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            return;
        }
        self.mesh.note_command();

        if line == "M48" {
            self.in_header = true;
            self.saw_header = true;
            return;
        }
        if line == "%" || line == "M95" {
            self.in_header = false;
            return;
        }
        if line == "M30" || line == "M00" {
            self.ended = true;
            return;
        }

        if self.in_header {
            self.header_line(line);
        } else {
            self.body_line(line);
        }
    }

    fn header_line(&mut self, line: &str) {
        let upper = line.to_uppercase();

        if upper.starts_with("METRIC") || upper == "M71" {
            self.units = DrillUnits::Metric;
            self.format = DrillFormat {
                integer: 3,
                decimal: 3,
            };
            self.format_options(&upper);
            return;
        }
        if upper.starts_with("INCH") || upper == "M72" {
            self.units = DrillUnits::Inches;
            self.format = DrillFormat {
                integer: 2,
                decimal: 4,
            };
            self.format_options(&upper);
            return;
        }

        // Tool definitions: T01C0.300 or T1C0.3
        if let Some(rest) = upper.strip_prefix('T') {
            if let Some(c_pos) = rest.find('C') {
                let tool_num = rest[..c_pos]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse::<u32>();
                let diameter = rest[c_pos + 1..]
                    .split(|c: char| c.is_ascii_alphabetic())
                    .next()
                    .unwrap_or("")
                    .parse::<f64>();
                if let (Ok(tool_num), Ok(diameter)) = (tool_num, diameter) {
                    let diameter = if diameter < 0.0 {
                        self.mesh.warn(format!(
                            "tool T{tool_num}: negative diameter {diameter}; using absolute value"
                        ));
                        -diameter
                    } else {
                        diameter
                    };
                    let diameter_mm = match self.units {
                        DrillUnits::Metric => diameter,
                        DrillUnits::Inches => diameter * 25.4,
                    };
                    if self.tools.insert(tool_num, diameter_mm).is_some() {
                        self.mesh
                            .warn(format!("tool T{tool_num} redefined; last definition wins"));
                    }
                } else {
                    self.mesh
                        .warn(format!("malformed tool definition \"{line}\"; skipped"));
                }
            }
        }
        // Other header keywords (FMAT, ICI, VER, ...) carry no geometry.
    }

    /// Parse comma-separated options after METRIC/INCH, like "TZ" or "000.000".
    fn format_options(&mut self, line: &str) {
        for part in line.split(',').skip(1) {
            let part = part.trim();
            match part {
                "TZ" => self.zero_mode = ZeroMode::Trailing,
                "LZ" => self.zero_mode = ZeroMode::Leading,
                _ => {
                    // An explicit digit pattern like "000.000" or "00.0000"
                    if part.contains('.') && part.chars().all(|c| c == '0' || c == '.') {
                        if let Some(dot_pos) = part.find('.') {
                            let int_digits = dot_pos as u8;
                            let dec_digits = (part.len() - dot_pos - 1) as u8;
                            if int_digits > 0 && dec_digits > 0 {
                                self.format = DrillFormat {
                                    integer: int_digits,
                                    decimal: dec_digits,
                                };
                            }
                        }
                    }
                }
            }
        }
    }

    fn body_line(&mut self, line: &str) {
        if !self.saw_header && !self.warned_missing_header {
            self.mesh.warn(
                "drill body without an M48 header; assuming inch units, 2.4 format, leading-zero suppression",
            );
            self.warned_missing_header = true;
        }

        let upper = line.to_uppercase();

        // Routing commands are not supported: drill hits only.
        if upper.starts_with("G00")
            || upper.starts_with("G01")
            || upper.starts_with("G02")
            || upper.starts_with("G03")
        {
            if !self.warned_routing {
                self.mesh
                    .warn("routed paths (G00-G03) are unsupported; routing commands skipped");
                self.warned_routing = true;
            }
            return;
        }

        // Tool selection: T<n> without a C parameter
        if upper.starts_with('T') && !upper.contains('C') {
            let num: String = upper[1..].chars().take_while(|c| c.is_ascii_digit()).collect();
            match num.parse::<u32>() {
                // T0 unloads the tool
                Ok(0) => self.current_tool = None,
                Ok(n) => {
                    if !self.tools.contains_key(&n) {
                        self.mesh
                            .warn(format!("selected tool T{n} has no definition"));
                    }
                    self.current_tool = Some(n);
                }
                Err(_) => self
                    .mesh
                    .warn(format!("malformed tool selection \"{line}\"; skipped")),
            }
            return;
        }

        // Coordinate line: X14.478Y10.541 or X14478Y10541
        if upper.starts_with('X') || upper.starts_with('Y') {
            let diameter = match self.current_tool.and_then(|t| self.tools.get(&t).copied()) {
                Some(d) => d,
                None => {
                    if !self.warned_no_tool {
                        self.mesh
                            .warn("hole coordinate before a usable tool selection; skipped");
                        self.warned_no_tool = true;
                    }
                    return;
                }
            };
            match self.coordinate_pair(&upper) {
                Some((x, y)) => flash_circle(&mut self.mesh, x, y, diameter),
                None => self
                    .mesh
                    .warn(format!("malformed drill coordinate \"{line}\"; skipped")),
            }
        }
        // Anything else in the body (G90, G05, FMAT echoes, ...) is inert.
    }

    fn coordinate_pair(&self, line: &str) -> Option<(f64, f64)> {
        if !line.is_ascii() {
            return None;
        }
        let mut x_str: Option<&str> = None;
        let mut y_str: Option<&str> = None;

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                'X' => {
                    let start = i + 1;
                    let end = next_letter(&chars, start);
                    x_str = Some(&line[start..end]);
                    i = end;
                }
                'Y' => {
                    let start = i + 1;
                    let end = next_letter(&chars, start);
                    y_str = Some(&line[start..end]);
                    i = end;
                }
                _ => i += 1,
            }
        }

        let x = self.coordinate_value(x_str?)?;
        let y = self.coordinate_value(y_str?)?;
        Some((x, y))
    }

    fn coordinate_value(&self, s: &str) -> Option<f64> {
        if s.is_empty() {
            return None;
        }

        let value = if s.contains('.') {
            // Explicit decimal point: parse directly
            s.parse::<f64>().ok()?
        } else {
            let negative = s.starts_with('-');
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() || digits.len() != s.trim_start_matches(['-', '+']).len() {
                return None;
            }

            // Both suppression modes pad on the left: most real-world tools
            // (Eagle among them) declare TZ yet still omit leading zeros, so
            // digits are right-aligned against the decimal point either way.
            let total = (self.format.integer + self.format.decimal) as usize;
            let mut padded = digits;
            while padded.len() < total {
                padded.insert(0, '0');
            }

            let raw: i64 = padded.parse().ok()?;
            let val = raw as f64 / 10f64.powi(self.format.decimal as i32);
            if negative {
                -val
            } else {
                val
            }
        };

        match self.units {
            DrillUnits::Metric => Some(value),
            DrillUnits::Inches => Some(value * 25.4),
        }
    }

    fn finish(mut self) -> GeometryRecord {
        if !self.ended {
            self.mesh
                .warn("truncated file: M30 never observed; partial result");
        }
        self.mesh.finish()
    }
}

fn next_letter(chars: &[char], start: usize) -> usize {
    for (i, ch) in chars.iter().enumerate().skip(start) {
        if ch.is_ascii_alphabetic() {
            return i;
        }
    }
    chars.len()
}

/// Parse an Excellon drill file into a geometry record. Never fatal: any
/// text input yields a (possibly empty, possibly partial) record.
pub fn parse(content: &str) -> GeometryRecord {
    let mut parser = DrillParser::new();
    for line in content.lines() {
        if parser.ended {
            break;
        }
        parser.process_line(line);
    }
    parser.finish()
}
