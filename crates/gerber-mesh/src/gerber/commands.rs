use super::coord::{CoordinateFormat, RawCoord, Units, ZeroSuppression};
use super::lexer::Token;

/// Aperture shape template from an %AD command.
#[derive(Debug, Clone, PartialEq)]
pub enum ApertureTemplate {
    Circle {
        diameter: f64,
    },
    Rectangle {
        x_size: f64,
        y_size: f64,
    },
    Obround {
        x_size: f64,
        y_size: f64,
    },
    Polygon {
        outer_diameter: f64,
        num_vertices: u32,
        rotation: f64,
    },
    /// Reference to a user-defined aperture macro.
    Macro {
        name: String,
        params: Vec<f64>,
    },
}

/// Layer polarity from %LP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Dark,
    Clear,
}

/// A fully parsed Gerber command.
#[derive(Debug, Clone, PartialEq)]
pub enum GerberCommand {
    /// %FS - Format specification
    FormatSpec(CoordinateFormat),
    /// %MO - Unit mode
    Units(Units),
    /// %AD - Aperture definition
    ApertureDefine {
        code: u32,
        template: ApertureTemplate,
    },
    /// %AM - Aperture macro definition
    MacroDefine { name: String, body: Vec<String> },
    /// Dnn (n >= 10) - Select aperture
    SelectAperture(u32),
    /// D01 - Interpolate (draw)
    Interpolate {
        x: Option<RawCoord>,
        y: Option<RawCoord>,
        i: Option<RawCoord>,
        j: Option<RawCoord>,
    },
    /// D02 - Move
    Move {
        x: Option<RawCoord>,
        y: Option<RawCoord>,
    },
    /// D03 - Flash
    Flash {
        x: Option<RawCoord>,
        y: Option<RawCoord>,
    },
    /// G01 - Linear interpolation mode
    LinearMode,
    /// G02 - Clockwise circular interpolation
    ClockwiseArcMode,
    /// G03 - Counter-clockwise circular interpolation
    CounterClockwiseArcMode,
    /// G36 - Begin region
    RegionBegin,
    /// G37 - End region
    RegionEnd,
    /// G74 - Single quadrant arc mode (deprecated; interpreted as G75)
    SingleQuadrant,
    /// G75 - Multi quadrant arc mode
    MultiQuadrant,
    /// %LP - Layer polarity
    Polarity(Polarity),
    /// %SRX..Y..I..J..% - Step-and-repeat block open
    StepRepeatBegin {
        x_repeat: u32,
        y_repeat: u32,
        x_step: f64,
        y_step: f64,
    },
    /// Bare %SR% (or X1Y1) - close the innermost block
    StepRepeatEnd,
    /// M02 - End of file
    EndOfFile,
}

/// The typed command stream plus the warnings raised while producing it.
/// Malformed or unsupported commands are skipped, never fatal.
#[derive(Debug, Default)]
pub struct CommandStream {
    pub commands: Vec<GerberCommand>,
    pub warnings: Vec<String>,
}

impl CommandStream {
    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Parse a token stream into a sequence of Gerber commands.
pub fn parse_commands(tokens: &[Token]) -> CommandStream {
    let mut stream = CommandStream::default();
    let mut macro_name: Option<String> = None;
    let mut macro_body: Vec<String> = Vec::new();

    for token in tokens {
        match token {
            Token::Extended(content) => {
                // Check if this starts a new macro definition
                if content.starts_with("AM") && content.len() > 2 {
                    flush_macro(&mut stream, &mut macro_name, &mut macro_body);
                    macro_name = Some(content[2..].to_string());
                    continue;
                }

                // If we're inside a macro, collect body lines
                if macro_name.is_some() {
                    // Body lines are primitive descriptors or $n assignments
                    let trimmed = content.trim();
                    if trimmed.starts_with(|c: char| c.is_ascii_digit()) || trimmed.starts_with('$')
                    {
                        macro_body.push(trimmed.to_string());
                        continue;
                    }
                    // Non-body extended token ends the macro
                    flush_macro(&mut stream, &mut macro_name, &mut macro_body);
                }

                parse_extended(&mut stream, content);
            }
            Token::Word(word) => {
                // A word token ends any open macro definition
                flush_macro(&mut stream, &mut macro_name, &mut macro_body);
                parse_word(&mut stream, word);
            }
        }
    }

    flush_macro(&mut stream, &mut macro_name, &mut macro_body);
    stream
}

fn flush_macro(stream: &mut CommandStream, name: &mut Option<String>, body: &mut Vec<String>) {
    if let Some(name) = name.take() {
        stream.commands.push(GerberCommand::MacroDefine {
            name,
            body: std::mem::take(body),
        });
    }
}

/// Parse an extended command (content between % delimiters).
fn parse_extended(stream: &mut CommandStream, content: &str) {
    if content.starts_with("FS") {
        parse_format_spec(stream, content);
        return;
    }
    if content == "MOMM" {
        stream.commands.push(GerberCommand::Units(Units::Millimeters));
        return;
    }
    if content == "MOIN" {
        stream.commands.push(GerberCommand::Units(Units::Inches));
        return;
    }
    if content.starts_with("AD") {
        parse_aperture_define(stream, content);
        return;
    }
    if content == "LPD" {
        stream.commands.push(GerberCommand::Polarity(Polarity::Dark));
        return;
    }
    if content == "LPC" {
        stream.commands.push(GerberCommand::Polarity(Polarity::Clear));
        return;
    }
    if content.starts_with("SR") {
        parse_step_repeat(stream, content);
        return;
    }
    // X2 attributes carry no geometry; classification is the host's concern.
    if content.starts_with("TF")
        || content.starts_with("TA")
        || content.starts_with("TO")
        || content.starts_with("TD")
    {
        return;
    }
    // Deprecated image-transform directives are explicitly unsupported.
    const DEPRECATED: [&str; 7] = ["IP", "IR", "MI", "OF", "SF", "LN", "AS"];
    if let Some(tag) = DEPRECATED.iter().find(|tag| content.starts_with(*tag)) {
        stream.warn(format!("deprecated directive %{tag}% is unsupported; skipped"));
        return;
    }
    stream.warn(format!("unrecognised extended directive %{content}%; skipped"));
}

/// Parse %FS command. Example: `FSLAX24Y24`
fn parse_format_spec(stream: &mut CommandStream, content: &str) {
    let s = &content[2..]; // skip "FS"

    let flags: String = s.chars().take_while(|c| c.is_ascii_alphabetic() && *c != 'X').collect();
    let mut suppression = ZeroSuppression::Leading;
    if flags.contains('T') {
        stream.warn("trailing-zero suppression selected in %FS%; accepted but unusual");
        suppression = ZeroSuppression::Trailing;
    }
    if flags.contains('I') {
        stream.warn("incremental coordinates in %FS% are unsupported; treating as absolute");
    }
    if flags != "LA" && !flags.contains('T') && !flags.contains('I') {
        stream.warn(format!("unexpected %FS% variant \"{flags}\"; attempting parse"));
    }

    let s = s.trim_start_matches(['L', 'T', 'A', 'I']);
    let (Some(x_pos), Some(y_pos)) = (s.find('X'), s.find('Y')) else {
        stream.warn(format!("malformed %FS{s}%; skipped"));
        return;
    };
    let x_part = &s[x_pos + 1..y_pos];
    let y_part = &s[y_pos + 1..];
    if x_part.len() < 2 || y_part.len() < 2 {
        stream.warn(format!("malformed %FS% digits X={x_part} Y={y_part}; skipped"));
        return;
    }

    let digits = |part: &str| -> Option<(u8, u8)> {
        let integer = part[..part.len() - 1].parse::<u8>().ok()?;
        let decimal = part[part.len() - 1..].parse::<u8>().ok()?;
        Some((integer, decimal))
    };
    let (Some((xi, xd)), Some((yi, yd))) = (digits(x_part), digits(y_part)) else {
        stream.warn(format!("malformed %FS% digits X={x_part} Y={y_part}; skipped"));
        return;
    };

    let clamp = |stream: &mut CommandStream, what: &str, v: u8| -> u8 {
        if v > 6 {
            stream.warn(format!("%FS% {what} digit count {v} exceeds 6; clamped"));
            6
        } else {
            v
        }
    };
    let format = CoordinateFormat {
        x_integer: clamp(stream, "X integer", xi),
        x_decimal: clamp(stream, "X decimal", xd),
        y_integer: clamp(stream, "Y integer", yi),
        y_decimal: clamp(stream, "Y decimal", yd),
        suppression,
    };
    stream.commands.push(GerberCommand::FormatSpec(format));
}

/// Parse %AD command. Example: `ADD10C,0.020` or `ADD11R,0.040X0.020`
fn parse_aperture_define(stream: &mut CommandStream, content: &str) {
    let s = &content[2..]; // skip "AD"

    let Some(s) = s.strip_prefix('D') else {
        stream.warn(format!("malformed aperture definition %AD{s}%; skipped"));
        return;
    };

    // Find where the code ends and the template type begins
    let Some(type_pos) = s.find(|c: char| c.is_ascii_alphabetic()) else {
        stream.warn(format!("aperture definition without template: %ADD{s}%; skipped"));
        return;
    };
    let Ok(code) = s[..type_pos].parse::<u32>() else {
        stream.warn(format!("bad aperture code in %ADD{s}%; skipped"));
        return;
    };
    if code < 10 {
        stream.warn(format!("aperture code D{code} is reserved (must be >= 10); skipped"));
        return;
    }

    match parse_aperture_template(&s[type_pos..]) {
        Ok(template) => stream
            .commands
            .push(GerberCommand::ApertureDefine { code, template }),
        Err(msg) => stream.warn(format!("{msg}; aperture D{code} skipped")),
    }
}

/// Parse aperture template. Example: `C,0.020` or `R,0.040X0.020`
fn parse_aperture_template(s: &str) -> Result<ApertureTemplate, String> {
    let (type_str, params_str) = match s.find(',') {
        Some(comma_pos) => (&s[..comma_pos], &s[comma_pos + 1..]),
        None => (s, ""),
    };

    let params: Vec<f64> = if params_str.is_empty() {
        Vec::new()
    } else {
        params_str
            .split('X')
            .map(|p| p.parse::<f64>().map_err(|_| format!("bad aperture parameter \"{p}\"")))
            .collect::<Result<Vec<_>, _>>()?
    };

    match type_str {
        "C" => {
            let diameter = params
                .first()
                .copied()
                .ok_or_else(|| "circle aperture missing diameter".to_string())?;
            Ok(ApertureTemplate::Circle { diameter })
        }
        "R" => {
            if params.len() < 2 {
                return Err("rectangle aperture needs width and height".into());
            }
            Ok(ApertureTemplate::Rectangle {
                x_size: params[0],
                y_size: params[1],
            })
        }
        "O" => {
            if params.len() < 2 {
                return Err("obround aperture needs width and height".into());
            }
            Ok(ApertureTemplate::Obround {
                x_size: params[0],
                y_size: params[1],
            })
        }
        "P" => {
            if params.len() < 2 {
                return Err("polygon aperture needs diameter and vertex count".into());
            }
            Ok(ApertureTemplate::Polygon {
                outer_diameter: params[0],
                num_vertices: params[1] as u32,
                rotation: params.get(2).copied().unwrap_or(0.0),
            })
        }
        _ => {
            // Aperture macro reference: the template name, params passed through
            Ok(ApertureTemplate::Macro {
                name: type_str.to_string(),
                params,
            })
        }
    }
}

/// Parse %SR command. Example: `SRX3Y2I5.0J10.0` opens a block; a bare `SR`
/// (or X1Y1) closes the innermost one.
fn parse_step_repeat(stream: &mut CommandStream, content: &str) {
    let s = &content[2..]; // skip "SR"
    if s.is_empty() {
        stream.commands.push(GerberCommand::StepRepeatEnd);
        return;
    }
    let x_repeat = parse_keyed_value(s, 'X').and_then(|v| v.parse::<u32>().ok());
    let y_repeat = parse_keyed_value(s, 'Y').and_then(|v| v.parse::<u32>().ok());
    let x_step = parse_keyed_value(s, 'I').and_then(|v| v.parse::<f64>().ok());
    let y_step = parse_keyed_value(s, 'J').and_then(|v| v.parse::<f64>().ok());

    let x_repeat = x_repeat.unwrap_or(1);
    let y_repeat = y_repeat.unwrap_or(1);
    if x_repeat == 1 && y_repeat == 1 {
        stream.commands.push(GerberCommand::StepRepeatEnd);
        return;
    }
    stream.commands.push(GerberCommand::StepRepeatBegin {
        x_repeat,
        y_repeat,
        x_step: x_step.unwrap_or(0.0),
        y_step: y_step.unwrap_or(0.0),
    });
}

/// Extract the value text after a key letter, up to the next alphabetic char.
fn parse_keyed_value(s: &str, key: char) -> Option<&str> {
    let pos = s.find(key)?;
    let after = &s[pos + 1..];
    let end = after
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(after.len());
    Some(&after[..end])
}

/// Parse a word command (e.g., "D10", "X100Y200D01", "G01", "M02").
///
/// A single word may contain an embedded G-code prefix (e.g., "G01X100Y200D01").
fn parse_word(stream: &mut CommandStream, word: &str) {
    let mut remaining = word;

    if remaining.starts_with('G') || remaining.starts_with('g') {
        let g_end = remaining[1..]
            .find(|c: char| !c.is_ascii_digit())
            .map(|i| i + 1)
            .unwrap_or(remaining.len());
        parse_g_code(stream, &remaining[..g_end]);
        remaining = &remaining[g_end..];
        if remaining.is_empty() {
            return;
        }
    }

    if remaining.starts_with('M') || remaining.starts_with('m') {
        match remaining[1..].parse::<u32>() {
            Ok(2) => stream.commands.push(GerberCommand::EndOfFile),
            Ok(0) | Ok(1) => {
                stream.warn(format!("deprecated program stop {remaining} ignored"))
            }
            _ => stream.warn(format!("unrecognised M-code \"{remaining}\"; skipped")),
        }
        return;
    }

    // Parse coordinate/D-code word: optional X, Y, I, J values followed by D code
    let mut x: Option<RawCoord> = None;
    let mut y: Option<RawCoord> = None;
    let mut i: Option<RawCoord> = None;
    let mut j: Option<RawCoord> = None;
    let mut d_code: Option<u32> = None;

    let s = remaining;
    let bytes = s.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let key = (bytes[pos] as char).to_ascii_uppercase();
        pos += 1;

        match key {
            'X' | 'Y' | 'I' | 'J' => {
                let start = pos;
                if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
                    pos += 1;
                }
                let digit_start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                let Ok(value) = s[start..pos].parse::<i64>() else {
                    stream.warn(format!("bad coordinate in \"{word}\"; command skipped"));
                    return;
                };
                let raw = RawCoord {
                    value,
                    digits: (pos - digit_start) as u8,
                };
                match key {
                    'X' => x = Some(raw),
                    'Y' => y = Some(raw),
                    'I' => i = Some(raw),
                    'J' => j = Some(raw),
                    _ => unreachable!(),
                }
            }
            'D' => {
                let start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                match s[start..pos].parse::<u32>() {
                    Ok(code) => d_code = Some(code),
                    Err(_) => {
                        stream.warn(format!("bad D-code in \"{word}\"; command skipped"));
                        return;
                    }
                }
            }
            _ => {
                stream.warn(format!("unrecognised character '{key}' in \"{word}\"; command skipped"));
                return;
            }
        }
    }

    match d_code {
        Some(1) => stream.commands.push(GerberCommand::Interpolate { x, y, i, j }),
        Some(2) => stream.commands.push(GerberCommand::Move { x, y }),
        Some(3) => stream.commands.push(GerberCommand::Flash { x, y }),
        Some(code) if code >= 10 => stream.commands.push(GerberCommand::SelectAperture(code)),
        Some(code) => stream.warn(format!("reserved D-code D{code:02}; command skipped")),
        None => {
            // Bare coordinates without a D-code: the previous operation's
            // D01 persists (modal), so treat as a draw.
            if x.is_some() || y.is_some() {
                stream.commands.push(GerberCommand::Interpolate { x, y, i, j });
            }
        }
    }
}

/// Parse a G-code word.
fn parse_g_code(stream: &mut CommandStream, s: &str) {
    let Ok(code) = s[1..].parse::<u32>() else {
        stream.warn(format!("unrecognised G-code \"{s}\"; skipped"));
        return;
    };
    let cmd = match code {
        1 => GerberCommand::LinearMode,
        2 => GerberCommand::ClockwiseArcMode,
        3 => GerberCommand::CounterClockwiseArcMode,
        36 => GerberCommand::RegionBegin,
        37 => GerberCommand::RegionEnd,
        74 => GerberCommand::SingleQuadrant,
        75 => GerberCommand::MultiQuadrant,
        // G54/G55 are deprecated no-op prefixes for aperture select / flash
        54 | 55 => return,
        70 | 71 | 90 | 91 => {
            stream.warn(format!(
                "deprecated G{code:02} (unit/coordinate mode) ignored; use %MO%/%FS%"
            ));
            return;
        }
        _ => {
            stream.warn(format!("unrecognised G-code G{code}; skipped"));
            return;
        }
    };
    stream.commands.push(cmd);
}
