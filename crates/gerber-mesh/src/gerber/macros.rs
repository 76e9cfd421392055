use std::collections::HashMap;

use crate::geom::flash::{flash_circle, flash_polygon, flash_rect};
use crate::geom::region::fill_outline;
use crate::geom::rotate_deg;
use crate::geom::stroke::{draw_linear, StrokeStyle};
use crate::mesh::MeshBuilder;

/// Expression nesting deeper than this aborts the primitive with a warning.
pub const MAX_EXPR_DEPTH: u32 = 20;

/// A single primitive within an aperture macro definition.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroPrimitive {
    /// Code 1: Circle
    Circle {
        exposure: Expr,
        diameter: Expr,
        center_x: Expr,
        center_y: Expr,
        rotation: Option<Expr>,
    },
    /// Code 20 (or 2): Vector line
    VectorLine {
        exposure: Expr,
        width: Expr,
        start_x: Expr,
        start_y: Expr,
        end_x: Expr,
        end_y: Expr,
        rotation: Expr,
    },
    /// Code 21: Center line (rectangle by center)
    CenterLine {
        exposure: Expr,
        width: Expr,
        height: Expr,
        center_x: Expr,
        center_y: Expr,
        rotation: Expr,
    },
    /// Code 4: Outline (arbitrary polygon)
    Outline {
        exposure: Expr,
        num_points: Expr,
        points: Vec<Expr>, // pairs of (x, y) coordinates, rotation last
        rotation: Expr,
    },
    /// Code 5: Regular polygon
    Polygon {
        exposure: Expr,
        num_vertices: Expr,
        center_x: Expr,
        center_y: Expr,
        diameter: Expr,
        rotation: Expr,
    },
}

/// Expression node for macro parameter evaluation.
/// Supports: literals, variable references ($1, $2, ...), and arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Variable(u32), // $1 = Variable(1)
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

/// Arithmetic anomalies observed while evaluating one primitive.
#[derive(Debug, Default)]
struct EvalDiag {
    divide_by_zero: bool,
}

impl Expr {
    /// Evaluate the expression with the given parameter bindings. Unbound
    /// variables are 0; division by zero yields 0 and is flagged.
    fn eval(&self, params: &[f64], diag: &mut EvalDiag) -> f64 {
        match self {
            Expr::Literal(v) => *v,
            Expr::Variable(idx) => {
                if *idx == 0 || *idx as usize > params.len() {
                    0.0
                } else {
                    params[*idx as usize - 1]
                }
            }
            Expr::Add(a, b) => a.eval(params, diag) + b.eval(params, diag),
            Expr::Sub(a, b) => a.eval(params, diag) - b.eval(params, diag),
            Expr::Mul(a, b) => a.eval(params, diag) * b.eval(params, diag),
            Expr::Div(a, b) => {
                let denom = b.eval(params, diag);
                if denom.abs() < 1e-15 {
                    diag.divide_by_zero = true;
                    0.0
                } else {
                    a.eval(params, diag) / denom
                }
            }
        }
    }

    fn depth(&self) -> u32 {
        match self {
            Expr::Literal(_) | Expr::Variable(_) => 1,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                1 + a.depth().max(b.depth())
            }
        }
    }
}

/// An aperture macro definition (from %AM...% blocks).
#[derive(Debug, Clone)]
pub struct ApertureMacro {
    pub name: String,
    pub primitives: Vec<MacroPrimitive>,
}

/// Table of macro definitions, keyed by name.
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, ApertureMacro>,
}

impl MacroTable {
    pub fn define(&mut self, mesh: &mut MeshBuilder, mac: ApertureMacro) {
        if self.macros.insert(mac.name.clone(), mac).is_some() {
            mesh.warn("aperture macro redefined; last definition wins");
        }
    }

    pub fn get(&self, name: &str) -> Option<&ApertureMacro> {
        self.macros.get(name)
    }
}

// ─── Expression Parser ──────────────────────────────────────────────

/// Parse a Gerber macro expression string into an Expr tree.
/// Gerber uses 'x' or 'X' for multiplication (not '*' which is the statement
/// terminator).
pub fn parse_expr(s: &str) -> Result<Expr, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Expr::Literal(0.0));
    }
    let tokens = tokenize_expr(s)?;
    let (expr, rest) = parse_add_sub(&tokens, 0)?;
    if !rest.is_empty() {
        return Err(format!("unexpected tokens after expression: {s}"));
    }
    Ok(expr)
}

#[derive(Debug, Clone)]
enum ExprToken {
    Num(f64),
    Var(u32),
    Plus,
    Minus,
    Mul,
    Div,
    LParen,
    RParen,
}

fn tokenize_expr(s: &str) -> Result<Vec<ExprToken>, String> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(ExprToken::Plus);
            }
            '-' => {
                chars.next();
                // Negative number if preceded by operator or at start
                let is_unary = matches!(
                    tokens.last(),
                    None | Some(ExprToken::Plus)
                        | Some(ExprToken::Minus)
                        | Some(ExprToken::Mul)
                        | Some(ExprToken::Div)
                        | Some(ExprToken::LParen)
                );
                if is_unary
                    && chars
                        .peek()
                        .is_some_and(|c| c.is_ascii_digit() || *c == '.')
                {
                    let mut num_str = String::from('-');
                    while chars
                        .peek()
                        .is_some_and(|c| c.is_ascii_digit() || *c == '.')
                    {
                        num_str.push(chars.next().unwrap());
                    }
                    let val: f64 = num_str
                        .parse()
                        .map_err(|_| format!("bad number: {num_str}"))?;
                    tokens.push(ExprToken::Num(val));
                } else {
                    tokens.push(ExprToken::Minus);
                }
            }
            'x' | 'X' => {
                chars.next();
                tokens.push(ExprToken::Mul);
            }
            '/' => {
                chars.next();
                tokens.push(ExprToken::Div);
            }
            '(' => {
                chars.next();
                tokens.push(ExprToken::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(ExprToken::RParen);
            }
            '$' => {
                chars.next(); // consume '$'
                let mut num_str = String::new();
                while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                    num_str.push(chars.next().unwrap());
                }
                let idx: u32 = num_str
                    .parse()
                    .map_err(|_| format!("bad variable: ${num_str}"))?;
                tokens.push(ExprToken::Var(idx));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut num_str = String::new();
                while chars
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || *c == '.')
                {
                    num_str.push(chars.next().unwrap());
                }
                let val: f64 = num_str
                    .parse()
                    .map_err(|_| format!("bad number: {num_str}"))?;
                tokens.push(ExprToken::Num(val));
            }
            _ => {
                return Err(format!("unexpected char '{ch}' in: {s}"));
            }
        }
    }

    Ok(tokens)
}

// Recursive descent: add/sub -> mul/div -> atom. `depth` guards the parser
// itself against pathological paren nesting.
fn parse_add_sub(tokens: &[ExprToken], depth: u32) -> Result<(Expr, &[ExprToken]), String> {
    if depth > MAX_EXPR_DEPTH {
        return Err(format!("expression nested deeper than {MAX_EXPR_DEPTH}"));
    }
    let (mut left, mut rest) = parse_mul_div(tokens, depth)?;
    loop {
        match rest.first() {
            Some(ExprToken::Plus) => {
                let (right, r) = parse_mul_div(&rest[1..], depth)?;
                left = Expr::Add(Box::new(left), Box::new(right));
                rest = r;
            }
            Some(ExprToken::Minus) => {
                let (right, r) = parse_mul_div(&rest[1..], depth)?;
                left = Expr::Sub(Box::new(left), Box::new(right));
                rest = r;
            }
            _ => break,
        }
    }
    Ok((left, rest))
}

fn parse_mul_div(tokens: &[ExprToken], depth: u32) -> Result<(Expr, &[ExprToken]), String> {
    let (mut left, mut rest) = parse_atom(tokens, depth)?;
    loop {
        match rest.first() {
            Some(ExprToken::Mul) => {
                let (right, r) = parse_atom(&rest[1..], depth)?;
                left = Expr::Mul(Box::new(left), Box::new(right));
                rest = r;
            }
            Some(ExprToken::Div) => {
                let (right, r) = parse_atom(&rest[1..], depth)?;
                left = Expr::Div(Box::new(left), Box::new(right));
                rest = r;
            }
            _ => break,
        }
    }
    Ok((left, rest))
}

fn parse_atom(tokens: &[ExprToken], depth: u32) -> Result<(Expr, &[ExprToken]), String> {
    match tokens.first() {
        Some(ExprToken::Num(v)) => Ok((Expr::Literal(*v), &tokens[1..])),
        Some(ExprToken::Var(idx)) => Ok((Expr::Variable(*idx), &tokens[1..])),
        Some(ExprToken::LParen) => {
            let (expr, rest) = parse_add_sub(&tokens[1..], depth + 1)?;
            match rest.first() {
                Some(ExprToken::RParen) => Ok((expr, &rest[1..])),
                _ => Err("missing closing paren".into()),
            }
        }
        _ => Err("unexpected end of expression".into()),
    }
}

// ─── Macro Primitive Parser ─────────────────────────────────────────

/// Parse the body lines of an aperture macro into primitives.
/// Each line is a comma-separated descriptor like "5,1,8,0,0,1.08239X$1,22.5".
/// Malformed or unsupported lines are skipped with a warning.
pub fn parse_macro_body(mesh: &mut MeshBuilder, name: &str, lines: &[String]) -> Vec<MacroPrimitive> {
    let mut primitives = Vec::new();

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Comment primitives (code 0); the lexer has already dropped blanks
        if trimmed.starts_with('0') {
            continue;
        }

        // $n=<expr> variable assignments are rare and not evaluated
        if trimmed.starts_with('$') {
            mesh.warn(format!(
                "macro {name}: variable assignment \"{trimmed}\" is unsupported; skipped"
            ));
            continue;
        }

        match parse_macro_line(trimmed) {
            Ok(Some(prim)) => primitives.push(prim),
            Ok(None) => mesh.warn(format!(
                "macro {name}: unsupported primitive \"{trimmed}\"; skipped"
            )),
            Err(msg) => mesh.warn(format!("macro {name}: {msg}; primitive skipped")),
        }
    }

    primitives
}

fn parse_macro_line(line: &str) -> Result<Option<MacroPrimitive>, String> {
    let parts: Vec<&str> = line.split(',').collect();
    let code: u32 = parts[0]
        .trim()
        .parse()
        .map_err(|_| format!("bad primitive code \"{}\"", parts[0]))?;

    let exprs: Vec<Expr> = parts[1..]
        .iter()
        .map(|p| parse_expr(p))
        .collect::<Result<Vec<_>, _>>()?;

    for e in &exprs {
        if e.depth() > MAX_EXPR_DEPTH {
            return Err(format!("expression deeper than {MAX_EXPR_DEPTH} levels"));
        }
    }

    let prim = match code {
        1 => {
            // Circle: exposure, diameter, center_x, center_y [, rotation]
            if exprs.len() < 4 {
                return Err("circle primitive needs at least 4 fields".into());
            }
            MacroPrimitive::Circle {
                exposure: exprs[0].clone(),
                diameter: exprs[1].clone(),
                center_x: exprs[2].clone(),
                center_y: exprs[3].clone(),
                rotation: exprs.get(4).cloned(),
            }
        }
        2 | 20 => {
            // Vector line: exposure, width, start_x, start_y, end_x, end_y, rotation
            if exprs.len() < 7 {
                return Err("vector line primitive needs 7 fields".into());
            }
            MacroPrimitive::VectorLine {
                exposure: exprs[0].clone(),
                width: exprs[1].clone(),
                start_x: exprs[2].clone(),
                start_y: exprs[3].clone(),
                end_x: exprs[4].clone(),
                end_y: exprs[5].clone(),
                rotation: exprs[6].clone(),
            }
        }
        21 => {
            // Center line: exposure, width, height, center_x, center_y, rotation
            if exprs.len() < 6 {
                return Err("center line primitive needs 6 fields".into());
            }
            MacroPrimitive::CenterLine {
                exposure: exprs[0].clone(),
                width: exprs[1].clone(),
                height: exprs[2].clone(),
                center_x: exprs[3].clone(),
                center_y: exprs[4].clone(),
                rotation: exprs[5].clone(),
            }
        }
        4 => {
            // Outline: exposure, n_vertices, x0, y0, x1, y1, ..., rotation
            if exprs.len() < 2 {
                return Err("outline primitive needs at least 2 fields".into());
            }
            // The vertex count is an expression, so the coordinate list can
            // only be sliced at evaluation time. Store everything after it.
            MacroPrimitive::Outline {
                exposure: exprs[0].clone(),
                num_points: exprs[1].clone(),
                points: exprs[2..].to_vec(),
                rotation: exprs.last().cloned().unwrap_or(Expr::Literal(0.0)),
            }
        }
        5 => {
            // Polygon: exposure, n_vertices, center_x, center_y, diameter, rotation
            if exprs.len() < 6 {
                return Err("polygon primitive needs 6 fields".into());
            }
            MacroPrimitive::Polygon {
                exposure: exprs[0].clone(),
                num_vertices: exprs[1].clone(),
                center_x: exprs[2].clone(),
                center_y: exprs[3].clone(),
                diameter: exprs[4].clone(),
                rotation: exprs[5].clone(),
            }
        }
        // Thermal (7) and anything newer are recognised but unsupported.
        _ => return Ok(None),
    };

    Ok(Some(prim))
}

// ─── Macro Evaluation (flash-time) ──────────────────────────────────

/// Instantiate an aperture macro at a flash position, emitting triangles.
/// `unit_scale` takes file-unit lengths to mm. Exposure 0 primitives are
/// wrapped in a clear range; primitive rotations apply before the flash
/// translation.
pub fn instantiate(
    mesh: &mut MeshBuilder,
    mac: &ApertureMacro,
    params: &[f64],
    flash_x: f64,
    flash_y: f64,
    unit_scale: f64,
) {
    for prim in &mac.primitives {
        let mut diag = EvalDiag::default();
        emit_primitive(mesh, prim, params, flash_x, flash_y, unit_scale, &mut diag);
        if diag.divide_by_zero {
            mesh.warn(format!(
                "macro {}: division by zero evaluated to 0",
                mac.name
            ));
        }
    }
}

fn emit_primitive(
    mesh: &mut MeshBuilder,
    prim: &MacroPrimitive,
    params: &[f64],
    fx: f64,
    fy: f64,
    scale: f64,
    diag: &mut EvalDiag,
) {
    match prim {
        MacroPrimitive::Circle {
            exposure,
            diameter,
            center_x,
            center_y,
            rotation,
        } => {
            let clear = exposure.eval(params, diag) < 0.5;
            let d = diameter.eval(params, diag) * scale;
            let cx = center_x.eval(params, diag) * scale;
            let cy = center_y.eval(params, diag) * scale;
            let rot = rotation
                .as_ref()
                .map(|r| r.eval(params, diag))
                .unwrap_or(0.0);
            let (rx, ry) = rotate_deg(cx, cy, rot);

            with_exposure(mesh, clear, |mesh| {
                flash_circle(mesh, fx + rx, fy + ry, d);
            });
        }
        MacroPrimitive::VectorLine {
            exposure,
            width,
            start_x,
            start_y,
            end_x,
            end_y,
            rotation,
        } => {
            let clear = exposure.eval(params, diag) < 0.5;
            let w = width.eval(params, diag) * scale;
            let sx = start_x.eval(params, diag) * scale;
            let sy = start_y.eval(params, diag) * scale;
            let ex = end_x.eval(params, diag) * scale;
            let ey = end_y.eval(params, diag) * scale;
            let rot = rotation.eval(params, diag);

            let (rsx, rsy) = rotate_deg(sx, sy, rot);
            let (rex, rey) = rotate_deg(ex, ey, rot);
            with_exposure(mesh, clear, |mesh| {
                draw_linear(
                    mesh,
                    [fx + rsx, fy + rsy],
                    [fx + rex, fy + rey],
                    StrokeStyle {
                        half_width: w.abs() / 2.0,
                        round_caps: true,
                    },
                );
            });
        }
        MacroPrimitive::CenterLine {
            exposure,
            width,
            height,
            center_x,
            center_y,
            rotation,
        } => {
            let clear = exposure.eval(params, diag) < 0.5;
            let w = width.eval(params, diag) * scale;
            let h = height.eval(params, diag) * scale;
            let cx = center_x.eval(params, diag) * scale;
            let cy = center_y.eval(params, diag) * scale;
            let rot = rotation.eval(params, diag);

            // The rectangle spins about its own centre.
            with_exposure(mesh, clear, |mesh| {
                flash_rect(mesh, fx + cx, fy + cy, w, h, rot);
            });
        }
        MacroPrimitive::Outline {
            exposure,
            num_points,
            points: point_exprs,
            rotation: _,
        } => {
            let clear = exposure.eval(params, diag) < 0.5;
            let n = num_points.eval(params, diag) as usize;
            // (n+1) coordinate pairs (the first vertex repeats), then rotation
            let coord_count = (n + 1) * 2;
            if point_exprs.len() < coord_count + 1 {
                mesh.warn("macro outline primitive has fewer vertices than declared; skipped");
                return;
            }

            let rot = point_exprs[coord_count].eval(params, diag);
            let mut pts = Vec::with_capacity(n + 1);
            for k in 0..=n {
                let px = point_exprs[k * 2].eval(params, diag) * scale;
                let py = point_exprs[k * 2 + 1].eval(params, diag) * scale;
                let (rx, ry) = rotate_deg(px, py, rot);
                pts.push([fx + rx, fy + ry]);
            }

            with_exposure(mesh, clear, |mesh| {
                fill_outline(mesh, &pts);
            });
        }
        MacroPrimitive::Polygon {
            exposure,
            num_vertices,
            center_x,
            center_y,
            diameter,
            rotation,
        } => {
            let clear = exposure.eval(params, diag) < 0.5;
            let n = num_vertices.eval(params, diag);
            let cx = center_x.eval(params, diag) * scale;
            let cy = center_y.eval(params, diag) * scale;
            let d = diameter.eval(params, diag) * scale;
            let rot = rotation.eval(params, diag);

            let n = if n.is_finite() && n >= 0.0 { n as u32 } else { 0 };
            let (rx, ry) = rotate_deg(cx, cy, rot);
            with_exposure(mesh, clear, |mesh| {
                flash_polygon(mesh, fx + rx, fy + ry, d, n, rot);
            });
        }
    }
}

/// Run an emission under the primitive's exposure: dark emits normally,
/// clear wraps it in a clear range.
fn with_exposure(mesh: &mut MeshBuilder, clear: bool, emit: impl FnOnce(&mut MeshBuilder)) {
    if clear {
        mesh.open_clear_range();
        emit(mesh);
        mesh.close_clear_range();
    } else {
        emit(mesh);
    }
}
