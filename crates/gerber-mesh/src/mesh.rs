use log::warn;
use serde::ser::Serializer;
use serde::Serialize;

/// Hard ceiling on emitted triangles for a single parse. Reaching it records
/// a warning and the builder stops accepting geometry (partial result).
pub const MAX_TRIANGLES: u32 = 10_000_000;

/// Vertex indices are emitted as u32 but must stay below 2³¹ so hosts can
/// treat them as signed without surprises.
const MAX_VERTEX_INDEX: u32 = 1 << 31;

/// Round a float to N decimal places.
pub fn round_f64(v: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (v * factor).round() / factor
}

/// Wrapper that rounds f64 to 6 decimal places on serialization.
fn serialize_f64_rounded<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_f64(*v, 6))
}

// ─── Bounding Box ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BBox {
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub minx: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub miny: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub maxx: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub maxy: f64,
}

impl BBox {
    pub fn empty() -> Self {
        Self {
            minx: f64::INFINITY,
            miny: f64::INFINITY,
            maxx: f64::NEG_INFINITY,
            maxy: f64::NEG_INFINITY,
        }
    }

    pub fn expand_point(&mut self, x: f64, y: f64) {
        self.minx = self.minx.min(x);
        self.miny = self.miny.min(y);
        self.maxx = self.maxx.max(x);
        self.maxy = self.maxy.max(y);
    }

    /// True while no vertex has been folded in.
    pub fn is_empty(&self) -> bool {
        self.minx > self.maxx
    }
}

// ─── Clear ranges ────────────────────────────────────────────────────

/// A contiguous run of indices drawn under clear polarity. The host may
/// paint these triangles in the background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearRange {
    pub first_index: u32,
    pub index_count: u32,
}

// ─── Output record ───────────────────────────────────────────────────

/// Flat triangulated mesh plus metadata for one parsed file. Positions are
/// interleaved `[x0, y0, x1, y1, ...]`; indices reference vertex slots.
#[derive(Debug, Clone, Serialize)]
pub struct GeometryRecord {
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
    pub bounds: BBox,
    pub command_count: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    pub warning_count: u32,
    pub warnings: Vec<String>,
    pub clear_ranges: Vec<ClearRange>,
}

// ─── Builder ─────────────────────────────────────────────────────────

/// Append-only accumulator for vertices, indices, bounds, warnings, and
/// clear ranges. All geometry producers write through this; it is created
/// at entry and consumed by `finish`.
#[derive(Debug)]
pub struct MeshBuilder {
    positions: Vec<f64>,
    indices: Vec<u32>,
    bounds: BBox,
    warnings: Vec<String>,
    clear_ranges: Vec<ClearRange>,
    clear_depth: u32,
    clear_start: u32,
    command_count: u32,
    saturated: bool,
}

impl Default for MeshBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            indices: Vec::new(),
            bounds: BBox::empty(),
            warnings: Vec::new(),
            clear_ranges: Vec::new(),
            clear_depth: 0,
            clear_start: 0,
            command_count: 0,
            saturated: false,
        }
    }

    pub fn vertex_count(&self) -> u32 {
        (self.positions.len() / 2) as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    /// True once a resource cap stopped the builder; remaining geometry in
    /// the file is ignored and the partial record is still returned.
    pub fn saturated(&self) -> bool {
        self.saturated
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("gerber-mesh: {message}");
        self.warnings.push(message);
    }

    pub fn note_command(&mut self) {
        self.command_count = self.command_count.saturating_add(1);
    }

    /// Append a vertex and return its index, or None if the coordinate is
    /// non-finite or a cap has been reached (a warning is recorded either way).
    pub fn push_vertex(&mut self, x: f64, y: f64) -> Option<u32> {
        if self.saturated {
            return None;
        }
        if !x.is_finite() || !y.is_finite() {
            self.warn(format!("non-finite vertex ({x}, {y}) skipped"));
            return None;
        }
        let index = self.vertex_count();
        if index >= MAX_VERTEX_INDEX {
            self.saturate("vertex index limit reached");
            return None;
        }
        self.positions.push(x);
        self.positions.push(y);
        self.bounds.expand_point(x, y);
        Some(index)
    }

    /// Append one triangle. Indices referencing vertices that were never
    /// emitted are dropped with a warning rather than corrupting the mesh.
    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        if self.saturated {
            return;
        }
        if self.triangle_count() >= MAX_TRIANGLES {
            self.saturate("triangle limit reached");
            return;
        }
        let count = self.vertex_count();
        if a >= count || b >= count || c >= count {
            self.warn(format!("triangle ({a}, {b}, {c}) references missing vertex"));
            return;
        }
        self.indices.extend_from_slice(&[a, b, c]);
    }

    /// Two triangles with winding `a-b-c`, `a-c-d`.
    pub fn push_quad(&mut self, a: u32, b: u32, c: u32, d: u32) {
        self.push_triangle(a, b, c);
        self.push_triangle(a, c, d);
    }

    /// Regular N-gon as a fan: centre vertex first, then `segments` evenly
    /// spaced perimeter vertices. Returns the centre index.
    pub fn push_ngon(&mut self, cx: f64, cy: f64, radius: f64, segments: u32) -> Option<u32> {
        let center = self.push_vertex(cx, cy)?;
        let mut first_rim = None;
        for k in 0..segments {
            let angle = 2.0 * std::f64::consts::PI * (k as f64) / (segments as f64);
            let rim = self.push_vertex(cx + radius * angle.cos(), cy + radius * angle.sin())?;
            if first_rim.is_none() {
                first_rim = Some(rim);
            }
        }
        let first_rim = first_rim?;
        for k in 0..segments {
            let next = first_rim + (k + 1) % segments;
            self.push_triangle(center, first_rim + k, next);
        }
        Some(center)
    }

    /// Begin a clear run at the current index count. Opens nest: an open
    /// while one is active keeps the original start, and the run only ends
    /// once every open has been matched by a close.
    pub fn open_clear_range(&mut self) {
        if self.clear_depth == 0 {
            self.clear_start = self.index_count();
        }
        self.clear_depth += 1;
    }

    pub fn close_clear_range(&mut self) {
        match self.clear_depth {
            0 => {}
            1 => {
                self.clear_depth = 0;
                let len = self.index_count() - self.clear_start;
                self.clear_ranges.push(ClearRange {
                    first_index: self.clear_start,
                    index_count: len,
                });
            }
            _ => self.clear_depth -= 1,
        }
    }

    /// Re-emit the vertex range `[vstart, vend)` translated by `(dx, dy)` and
    /// the index range `[istart, iend)` rebased onto the copies. Closed clear
    /// ranges wholly inside the index range are replicated with it.
    pub(crate) fn replicate_range(
        &mut self,
        vstart: u32,
        vend: u32,
        istart: u32,
        iend: u32,
        dx: f64,
        dy: f64,
    ) {
        let vbase = self.vertex_count();
        let ibase = self.index_count();

        let coords: Vec<f64> =
            self.positions[(vstart as usize) * 2..(vend as usize) * 2].to_vec();
        for pair in coords.chunks_exact(2) {
            self.push_vertex(pair[0] + dx, pair[1] + dy);
        }

        let tris: Vec<u32> = self.indices[istart as usize..iend as usize].to_vec();
        for tri in tris.chunks_exact(3) {
            let map = |i: u32| {
                if i >= vstart && i < vend {
                    i - vstart + vbase
                } else {
                    i
                }
            };
            self.push_triangle(map(tri[0]), map(tri[1]), map(tri[2]));
        }

        let copies: Vec<ClearRange> = self
            .clear_ranges
            .iter()
            .filter(|r| r.first_index >= istart && r.first_index + r.index_count <= iend)
            .map(|r| ClearRange {
                first_index: r.first_index - istart + ibase,
                index_count: r.index_count,
            })
            .collect();
        self.clear_ranges.extend(copies);
    }

    fn saturate(&mut self, what: &str) {
        if !self.saturated {
            self.warn(format!("{what}; remaining geometry ignored"));
            self.saturated = true;
        }
    }

    /// Finalise: close any open clear run, coalesce clear ranges, collapse an
    /// undefined bounding box to zeros, and down-cast positions to f32.
    pub fn finish(mut self) -> GeometryRecord {
        self.clear_depth = self.clear_depth.min(1);
        self.close_clear_range();

        let mut ranges: Vec<ClearRange> = self
            .clear_ranges
            .into_iter()
            .filter(|r| r.index_count > 0)
            .collect();
        ranges.sort_by_key(|r| r.first_index);
        let mut coalesced: Vec<ClearRange> = Vec::with_capacity(ranges.len());
        for r in ranges {
            match coalesced.last_mut() {
                Some(prev) if r.first_index <= prev.first_index + prev.index_count => {
                    let end = (r.first_index + r.index_count)
                        .max(prev.first_index + prev.index_count);
                    prev.index_count = end - prev.first_index;
                }
                _ => coalesced.push(r),
            }
        }

        let bounds = if self.bounds.is_empty() {
            BBox {
                minx: 0.0,
                miny: 0.0,
                maxx: 0.0,
                maxy: 0.0,
            }
        } else {
            self.bounds
        };

        let positions: Vec<f32> = self.positions.iter().map(|&v| v as f32).collect();
        let vertex_count = (positions.len() / 2) as u32;
        let index_count = self.indices.len() as u32;
        let warning_count = self.warnings.len() as u32;

        GeometryRecord {
            positions,
            indices: self.indices,
            bounds,
            command_count: self.command_count,
            vertex_count,
            index_count,
            warning_count,
            warnings: self.warnings,
            clear_ranges: coalesced,
        }
    }
}
