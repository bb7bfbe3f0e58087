//! B-spline and NURBS surfaces.
//!
//! Tensor-product surfaces over a rectangular control point grid. The grid
//! is stored flat with the **v index varying fastest**: the point at grid
//! position `(i, j)` lives at `control_points[i * count_v + j]`.
//!
//! Per-direction structural operations (knot insertion, removal,
//! refinement, degree change) extract the 1D control point rows along the
//! operation direction, run the curve cores on each row, and reassemble the
//! grid — every row shares the direction's knot vector, so all rows agree
//! on the resulting structure.

use nalgebra::{
    allocator::Allocator, DefaultAllocator, DimName, OPoint, Point3, Point4, Vector3, Vector4,
};
use tracing::warn;

use crate::basis::{basis_function_derivatives, basis_functions, find_span, SpanSearch};
use crate::degree_ops::{
    binomial, decompose_core, elevate_degree_core, reduce_degree_core,
};
use crate::hodograph::surface_deriv_ctrlpts;
use crate::knot_ops::{
    density_midpoints, insert_knot_core, refine_knots_core, remove_rows,
};
use crate::knots::KnotVector;
use crate::{Result, SplineError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A parametric direction on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SurfaceDirection {
    /// The first parametric direction.
    U,
    /// The second parametric direction.
    V,
}

/// A non-rational B-spline surface.
///
/// Holds a `count_u x count_v` control point grid (v fastest in the flat
/// storage), one degree and one knot vector per direction. Structural
/// operations return new surfaces.
///
/// # Example
///
/// ```
/// use spline_types::BSplineSurface;
/// use nalgebra::Point3;
///
/// // A bilinear patch over the unit square with z = x * y
/// let surface = BSplineSurface::clamped(
///     vec![
///         Point3::new(0.0, 0.0, 0.0),
///         Point3::new(0.0, 1.0, 0.0),
///         Point3::new(1.0, 0.0, 0.0),
///         Point3::new(1.0, 1.0, 1.0),
///     ],
///     (2, 2),
///     (1, 1),
/// ).unwrap();
///
/// let p = surface.point_at(0.5, 0.5);
/// assert!((p.z - 0.25).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BSplineSurface {
    /// Control point grid, flat, v varying fastest.
    control_points: Vec<Point3<f64>>,
    /// Grid size in the u direction.
    count_u: usize,
    /// Grid size in the v direction.
    count_v: usize,
    /// Knot vector in the u direction.
    knots_u: KnotVector,
    /// Knot vector in the v direction.
    knots_v: KnotVector,
    /// Degree in the u direction.
    degree_u: usize,
    /// Degree in the v direction.
    degree_v: usize,
    /// Knot span search strategy used during evaluation.
    span_search: SpanSearch,
}

/// Validate grid dimensions against knot vectors and degrees.
fn validate_grid(
    len: usize,
    (count_u, count_v): (usize, usize),
    (knots_u, knots_v): (&KnotVector, &KnotVector),
    (degree_u, degree_v): (usize, usize),
) -> Result<()> {
    if count_u * count_v != len {
        return Err(SplineError::count_mismatch(
            "control grid",
            count_u * count_v,
            len,
        ));
    }
    if count_u < degree_u + 1 {
        return Err(SplineError::insufficient_points(degree_u + 1, count_u));
    }
    if count_v < degree_v + 1 {
        return Err(SplineError::insufficient_points(degree_v + 1, count_v));
    }
    if knots_u.len() != count_u + degree_u + 1 {
        return Err(SplineError::KnotVectorSize {
            expected: count_u + degree_u + 1,
            actual: knots_u.len(),
        });
    }
    if knots_v.len() != count_v + degree_v + 1 {
        return Err(SplineError::KnotVectorSize {
            expected: count_v + degree_v + 1,
            actual: knots_v.len(),
        });
    }
    Ok(())
}

/// Run a curve-level operation on every u-directed row of a flat grid and
/// reassemble. The operation must be deterministic in the row structure so
/// every column agrees on the resulting knot vector.
fn apply_u<D, F>(
    ctrlpts: &[OPoint<f64, D>],
    count_u: usize,
    count_v: usize,
    op: F,
) -> Result<(KnotVector, Vec<OPoint<f64, D>>, usize)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
    F: Fn(&[OPoint<f64, D>]) -> Result<(KnotVector, Vec<OPoint<f64, D>>)>,
{
    let mut knots = None;
    let mut columns: Vec<Vec<OPoint<f64, D>>> = Vec::with_capacity(count_v);
    for j in 0..count_v {
        let column: Vec<OPoint<f64, D>> = (0..count_u)
            .map(|i| ctrlpts[i * count_v + j].clone())
            .collect();
        let (kv, new_column) = op(&column)?;
        knots = Some(kv);
        columns.push(new_column);
    }
    let knots = knots.ok_or_else(|| SplineError::count_mismatch("control grid", 1, 0))?;

    let new_count_u = columns[0].len();
    let mut out = vec![OPoint::<f64, D>::origin(); new_count_u * count_v];
    for (j, column) in columns.iter().enumerate() {
        for (i, p) in column.iter().enumerate() {
            out[i * count_v + j] = p.clone();
        }
    }
    Ok((knots, out, new_count_u))
}

/// Run a curve-level operation on every v-directed row (contiguous in the
/// flat storage) and reassemble.
fn apply_v<D, F>(
    ctrlpts: &[OPoint<f64, D>],
    count_u: usize,
    count_v: usize,
    op: F,
) -> Result<(KnotVector, Vec<OPoint<f64, D>>, usize)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
    F: Fn(&[OPoint<f64, D>]) -> Result<(KnotVector, Vec<OPoint<f64, D>>)>,
{
    let mut knots = None;
    let mut out = Vec::with_capacity(ctrlpts.len());
    for i in 0..count_u {
        let row = &ctrlpts[i * count_v..(i + 1) * count_v];
        let (kv, new_row) = op(row)?;
        knots = Some(kv);
        out.extend(new_row);
    }
    let knots = knots.ok_or_else(|| SplineError::count_mismatch("control grid", 1, 0))?;
    let new_count_v = out.len() / count_u;
    Ok((knots, out, new_count_v))
}

impl BSplineSurface {
    /// Create a B-spline surface with explicit knot vectors.
    ///
    /// `control_points` is the flat grid with v varying fastest;
    /// `counts = (count_u, count_v)` its dimensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the grid size, per-direction counts, or knot
    /// vector lengths are inconsistent.
    pub fn new(
        control_points: Vec<Point3<f64>>,
        counts: (usize, usize),
        knots_u: KnotVector,
        knots_v: KnotVector,
        degrees: (usize, usize),
    ) -> Result<Self> {
        validate_grid(
            control_points.len(),
            counts,
            (&knots_u, &knots_v),
            degrees,
        )?;
        Ok(Self {
            control_points,
            count_u: counts.0,
            count_v: counts.1,
            knots_u,
            knots_v,
            degree_u: degrees.0,
            degree_v: degrees.1,
            span_search: SpanSearch::default(),
        })
    }

    /// Create a clamped surface with uniform interior knots on `[0, 1]` in
    /// both directions.
    ///
    /// # Errors
    ///
    /// Returns an error if the grid is too small for the degrees.
    pub fn clamped(
        control_points: Vec<Point3<f64>>,
        counts: (usize, usize),
        degrees: (usize, usize),
    ) -> Result<Self> {
        let knots_u = KnotVector::clamped_uniform(degrees.0, counts.0)?;
        let knots_v = KnotVector::clamped_uniform(degrees.1, counts.1)?;
        Self::new(control_points, counts, knots_u, knots_v, degrees)
    }

    fn from_parts(
        control_points: Vec<Point3<f64>>,
        counts: (usize, usize),
        knots_u: KnotVector,
        knots_v: KnotVector,
        degrees: (usize, usize),
        span_search: SpanSearch,
    ) -> Self {
        debug_assert_eq!(control_points.len(), counts.0 * counts.1);
        debug_assert_eq!(knots_u.len(), counts.0 + degrees.0 + 1);
        debug_assert_eq!(knots_v.len(), counts.1 + degrees.1 + 1);
        Self {
            control_points,
            count_u: counts.0,
            count_v: counts.1,
            knots_u,
            knots_v,
            degree_u: degrees.0,
            degree_v: degrees.1,
            span_search,
        }
    }

    /// Select the knot span search strategy used during evaluation.
    #[must_use]
    pub fn with_span_search(mut self, strategy: SpanSearch) -> Self {
        self.span_search = strategy;
        self
    }

    /// Get the flat control point grid (v varying fastest).
    #[must_use]
    pub fn control_points(&self) -> &[Point3<f64>] {
        &self.control_points
    }

    /// Get the control point at grid position `(i, j)`.
    #[must_use]
    pub fn control_point(&self, i: usize, j: usize) -> &Point3<f64> {
        &self.control_points[i * self.count_v + j]
    }

    /// Get the grid size `(count_u, count_v)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        (self.count_u, self.count_v)
    }

    /// Get the degrees `(degree_u, degree_v)`.
    #[must_use]
    pub fn degrees(&self) -> (usize, usize) {
        (self.degree_u, self.degree_v)
    }

    /// Get the knot vector for a direction.
    #[must_use]
    pub fn knots(&self, direction: SurfaceDirection) -> &KnotVector {
        match direction {
            SurfaceDirection::U => &self.knots_u,
            SurfaceDirection::V => &self.knots_v,
        }
    }

    /// Get the parameter domains `((u_min, u_max), (v_min, v_max))`.
    #[must_use]
    pub fn domain(&self) -> ((f64, f64), (f64, f64)) {
        (
            self.knots_u.domain(self.degree_u),
            self.knots_v.domain(self.degree_v),
        )
    }

    /// Evaluate the surface at `(u, v)`.
    ///
    /// Both parameters are clamped to their knot domains.
    #[must_use]
    pub fn point_at(&self, u: f64, v: f64) -> Point3<f64> {
        let (du, dv) = self.domain();
        let u = u.clamp(du.0, du.1);
        let v = v.clamp(dv.0, dv.1);

        let span_u = find_span(
            self.degree_u,
            self.knots_u.as_slice(),
            self.count_u,
            u,
            self.span_search,
        );
        let span_v = find_span(
            self.degree_v,
            self.knots_v.as_slice(),
            self.count_v,
            v,
            self.span_search,
        );
        let bu = basis_functions(self.degree_u, self.knots_u.as_slice(), span_u, u);
        let bv = basis_functions(self.degree_v, self.knots_v.as_slice(), span_v, v);

        let mut acc = Vector3::zeros();
        for (i, &nu) in bu.iter().enumerate() {
            let row = span_u - self.degree_u + i;
            for (j, &nv) in bv.iter().enumerate() {
                let col = span_v - self.degree_v + j;
                acc += self.control_points[row * self.count_v + col].coords * (nu * nv);
            }
        }
        Point3::from(acc)
    }

    /// Sample the surface on a regular `(nu, nv)` parameter grid.
    ///
    /// Points come back flat with the v samples varying fastest, matching
    /// the control grid convention, so external mesh builders can
    /// reconstruct connectivity from the two counts.
    #[must_use]
    pub fn sample_regular(&self, nu: usize, nv: usize) -> Vec<Point3<f64>> {
        let nu = nu.max(2);
        let nv = nv.max(2);
        let ((u0, u1), (v0, v1)) = self.domain();

        let mut out = Vec::with_capacity(nu * nv);
        for i in 0..nu {
            let u = u0 + (u1 - u0) * i as f64 / (nu - 1) as f64;
            for j in 0..nv {
                let v = v0 + (v1 - v0) * j as f64 / (nv - 1) as f64;
                out.push(self.point_at(u, v));
            }
        }
        out
    }

    /// Evaluate the surface point and its partial derivatives up to `order`.
    ///
    /// Returns `skl[k][l]`: the surface differentiated `k` times in u and
    /// `l` times in v, for `k + l <= order`; `skl[0][0]` is the surface
    /// point. Entries beyond the total order (or the degree in either
    /// direction) are zero.
    #[must_use]
    pub fn derivatives(&self, u: f64, v: f64, order: usize) -> Vec<Vec<Vector3<f64>>> {
        let (dom_u, dom_v) = self.domain();
        let u = u.clamp(dom_u.0, dom_u.1);
        let v = v.clamp(dom_v.0, dom_v.1);

        let du = order.min(self.degree_u);
        let dv = order.min(self.degree_v);

        let span_u = find_span(
            self.degree_u,
            self.knots_u.as_slice(),
            self.count_u,
            u,
            self.span_search,
        );
        let span_v = find_span(
            self.degree_v,
            self.knots_v.as_slice(),
            self.count_v,
            v,
            self.span_search,
        );
        let uders =
            basis_function_derivatives(self.degree_u, self.knots_u.as_slice(), span_u, u, du);
        let vders =
            basis_function_derivatives(self.degree_v, self.knots_v.as_slice(), span_v, v, dv);

        let mut skl = vec![vec![Vector3::zeros(); order + 1]; order + 1];
        let mut temp = vec![Vector3::zeros(); self.degree_v + 1];

        for k in 0..=du {
            for (s, slot) in temp.iter_mut().enumerate() {
                *slot = Vector3::zeros();
                for r in 0..=self.degree_u {
                    let idx = (span_u - self.degree_u + r) * self.count_v
                        + (span_v - self.degree_v + s);
                    *slot += self.control_points[idx].coords * uders[k][r];
                }
            }
            let dd = (order - k).min(dv);
            for l in 0..=dd {
                for (s, slot) in temp.iter().enumerate() {
                    skl[k][l] += slot * vders[l][s];
                }
            }
        }

        skl
    }

    /// Insert the knot `t` into the given direction `num` times.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::BSplineCurve::insert_knot`].
    pub fn insert_knot(&self, direction: SurfaceDirection, t: f64, num: usize) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                let (kv, pts, new_count_u) =
                    apply_u(&self.control_points, self.count_u, self.count_v, |row| {
                        insert_knot_core(self.degree_u, &self.knots_u, row, t, num)
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    kv,
                    self.knots_v.clone(),
                    (self.degree_u, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                let (kv, pts, new_count_v) =
                    apply_v(&self.control_points, self.count_u, self.count_v, |row| {
                        insert_knot_core(self.degree_v, &self.knots_v, row, t, num)
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    kv,
                    (self.degree_u, self.degree_v),
                    self.span_search,
                ))
            }
        }
    }

    /// Remove the knot `t` from the given direction up to `num` times.
    ///
    /// All rows must agree: the achieved count is the largest every row can
    /// remove within tolerance, so the grid stays rectangular. Returns the
    /// surface and that count.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::BSplineCurve::remove_knot`].
    pub fn remove_knot(
        &self,
        direction: SurfaceDirection,
        t: f64,
        num: usize,
    ) -> Result<(Self, usize)> {
        match direction {
            SurfaceDirection::U => {
                let rows: Vec<Vec<Point3<f64>>> = (0..self.count_v)
                    .map(|j| {
                        (0..self.count_u)
                            .map(|i| self.control_points[i * self.count_v + j])
                            .collect()
                    })
                    .collect();
                let (kv, new_rows, removed) =
                    remove_rows(self.degree_u, &self.knots_u, &rows, t, num)?;
                let new_count_u = new_rows[0].len();
                let mut pts = vec![Point3::origin(); new_count_u * self.count_v];
                for (j, column) in new_rows.iter().enumerate() {
                    for (i, p) in column.iter().enumerate() {
                        pts[i * self.count_v + j] = *p;
                    }
                }
                Ok((
                    Self::from_parts(
                        pts,
                        (new_count_u, self.count_v),
                        kv,
                        self.knots_v.clone(),
                        (self.degree_u, self.degree_v),
                        self.span_search,
                    ),
                    removed,
                ))
            }
            SurfaceDirection::V => {
                let rows: Vec<Vec<Point3<f64>>> = (0..self.count_u)
                    .map(|i| self.control_points[i * self.count_v..(i + 1) * self.count_v].to_vec())
                    .collect();
                let (kv, new_rows, removed) =
                    remove_rows(self.degree_v, &self.knots_v, &rows, t, num)?;
                let new_count_v = new_rows[0].len();
                let pts: Vec<Point3<f64>> = new_rows.into_iter().flatten().collect();
                Ok((
                    Self::from_parts(
                        pts,
                        (self.count_u, new_count_v),
                        self.knots_u.clone(),
                        kv,
                        (self.degree_u, self.degree_v),
                        self.span_search,
                    ),
                    removed,
                ))
            }
        }
    }

    /// Insert a list of knots into a direction in one refinement pass.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::BSplineCurve::refine_knots`].
    pub fn refine_knots(&self, direction: SurfaceDirection, insert: &[f64]) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                let (kv, pts, new_count_u) =
                    apply_u(&self.control_points, self.count_u, self.count_v, |row| {
                        refine_knots_core(self.degree_u, &self.knots_u, row, insert)
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    kv,
                    self.knots_v.clone(),
                    (self.degree_u, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                let (kv, pts, new_count_v) =
                    apply_v(&self.control_points, self.count_u, self.count_v, |row| {
                        refine_knots_core(self.degree_v, &self.knots_v, row, insert)
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    kv,
                    (self.degree_u, self.degree_v),
                    self.span_search,
                ))
            }
        }
    }

    /// Refine a direction by recursive midpoint subdivision.
    ///
    /// # Errors
    ///
    /// Fails for density 0.
    pub fn refine_density(&self, direction: SurfaceDirection, density: usize) -> Result<Self> {
        let (degree, knots) = match direction {
            SurfaceDirection::U => (self.degree_u, &self.knots_u),
            SurfaceDirection::V => (self.degree_v, &self.knots_v),
        };
        let midpoints = density_midpoints(degree, knots, density)?;
        self.refine_knots(direction, &midpoints)
    }

    /// Decompose into Bezier strips along one direction.
    ///
    /// Each strip is clamped to a single span of the chosen direction and
    /// keeps the full structure of the other direction.
    ///
    /// # Errors
    ///
    /// Fails for degree 0 or an unclamped knot vector in that direction.
    pub fn decompose(&self, direction: SurfaceDirection) -> Result<Vec<Self>> {
        match direction {
            SurfaceDirection::U => {
                // Decompose every v-column identically, then regroup by segment.
                let mut per_column: Vec<Vec<(KnotVector, Vec<Point3<f64>>)>> =
                    Vec::with_capacity(self.count_v);
                for j in 0..self.count_v {
                    let column: Vec<Point3<f64>> = (0..self.count_u)
                        .map(|i| self.control_points[i * self.count_v + j])
                        .collect();
                    per_column.push(decompose_core(self.degree_u, &self.knots_u, &column)?);
                }

                let num_segments = per_column[0].len();
                let strip_count_u = self.degree_u + 1;
                let mut strips = Vec::with_capacity(num_segments);
                for s in 0..num_segments {
                    let kv = per_column[0][s].0.clone();
                    let mut pts = vec![Point3::origin(); strip_count_u * self.count_v];
                    for (j, column) in per_column.iter().enumerate() {
                        for (i, p) in column[s].1.iter().enumerate() {
                            pts[i * self.count_v + j] = *p;
                        }
                    }
                    strips.push(Self::from_parts(
                        pts,
                        (strip_count_u, self.count_v),
                        kv,
                        self.knots_v.clone(),
                        (self.degree_u, self.degree_v),
                        self.span_search,
                    ));
                }
                Ok(strips)
            }
            SurfaceDirection::V => {
                let mut per_row: Vec<Vec<(KnotVector, Vec<Point3<f64>>)>> =
                    Vec::with_capacity(self.count_u);
                for i in 0..self.count_u {
                    let row =
                        self.control_points[i * self.count_v..(i + 1) * self.count_v].to_vec();
                    per_row.push(decompose_core(self.degree_v, &self.knots_v, &row)?);
                }

                let num_segments = per_row[0].len();
                let strip_count_v = self.degree_v + 1;
                let mut strips = Vec::with_capacity(num_segments);
                for s in 0..num_segments {
                    let kv = per_row[0][s].0.clone();
                    let mut pts = Vec::with_capacity(self.count_u * strip_count_v);
                    for row in &per_row {
                        pts.extend(row[s].1.iter().copied());
                    }
                    strips.push(Self::from_parts(
                        pts,
                        (self.count_u, strip_count_v),
                        self.knots_u.clone(),
                        kv,
                        (self.degree_u, self.degree_v),
                        self.span_search,
                    ));
                }
                Ok(strips)
            }
        }
    }

    /// Decompose into the full grid of Bezier patches: u strips first, then
    /// each strip split along v. Patches come back strip-major.
    ///
    /// # Errors
    ///
    /// Fails for degree 0 or unclamped knot vectors.
    pub fn decompose_bezier_patches(&self) -> Result<Vec<Self>> {
        let mut patches = Vec::new();
        for strip in self.decompose(SurfaceDirection::U)? {
            patches.extend(strip.decompose(SurfaceDirection::V)?);
        }
        Ok(patches)
    }

    /// Elevate the degree of one direction by `num`.
    ///
    /// Runs the curve elevation on every row of that direction;
    /// evaluation-invariant.
    ///
    /// # Errors
    ///
    /// Propagates per-row decomposition errors.
    pub fn elevate_degree(&self, direction: SurfaceDirection, num: usize) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                let (kv, pts, new_count_u) =
                    apply_u(&self.control_points, self.count_u, self.count_v, |row| {
                        elevate_degree_core(self.degree_u, &self.knots_u, row, num)
                            .map(|(_, kv, pts)| (kv, pts))
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    kv,
                    self.knots_v.clone(),
                    (self.degree_u + num, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                let (kv, pts, new_count_v) =
                    apply_v(&self.control_points, self.count_u, self.count_v, |row| {
                        elevate_degree_core(self.degree_v, &self.knots_v, row, num)
                            .map(|(_, kv, pts)| (kv, pts))
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    kv,
                    (self.degree_u, self.degree_v + num),
                    self.span_search,
                ))
            }
        }
    }

    /// Reduce the degree of one direction by one.
    ///
    /// Approximate, like [`crate::BSplineCurve::reduce_degree`].
    ///
    /// # Errors
    ///
    /// Fails if that direction's degree is below 2.
    pub fn reduce_degree(&self, direction: SurfaceDirection) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                let (kv, pts, new_count_u) =
                    apply_u(&self.control_points, self.count_u, self.count_v, |row| {
                        reduce_degree_core(self.degree_u, &self.knots_u, row)
                            .map(|(_, kv, pts)| (kv, pts))
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    kv,
                    self.knots_v.clone(),
                    (self.degree_u - 1, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                let (kv, pts, new_count_v) =
                    apply_v(&self.control_points, self.count_u, self.count_v, |row| {
                        reduce_degree_core(self.degree_v, &self.knots_v, row)
                            .map(|(_, kv, pts)| (kv, pts))
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    kv,
                    (self.degree_u, self.degree_v - 1),
                    self.span_search,
                ))
            }
        }
    }

    /// Control points of the mixed partial derivative surfaces up to
    /// `order` (clamped per direction to the degree).
    ///
    /// Returns `pkl[k][l][i][j]`: the control points of the surface
    /// differentiated `k` times in u and `l` times in v.
    #[must_use]
    pub fn derivative_control_points(&self, order: usize) -> Vec<Vec<Vec<Vec<Point3<f64>>>>> {
        surface_deriv_ctrlpts(
            self.degree_u,
            self.degree_v,
            self.knots_u.as_slice(),
            self.knots_v.as_slice(),
            &self.control_points,
            self.count_u,
            self.count_v,
            order,
            (0, self.count_u - 1),
            (0, self.count_v - 1),
        )
    }

    /// The hodograph in one direction: the first-derivative surface as a
    /// geometry object, one degree lower in that direction.
    ///
    /// # Errors
    ///
    /// Fails if that direction's degree is 0.
    pub fn hodograph(&self, direction: SurfaceDirection) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                if self.degree_u == 0 {
                    return Err(SplineError::DegreeTooLow { degree: 0, min: 1 });
                }
                let p = self.degree_u as f64;
                let kv = self.knots_u.as_slice();
                let new_count_u = self.count_u - 1;
                let mut pts = vec![Point3::origin(); new_count_u * self.count_v];
                for i in 0..new_count_u {
                    let denom = kv[i + self.degree_u + 1] - kv[i + 1];
                    let factor = if denom.abs() < f64::EPSILON { 0.0 } else { p / denom };
                    for j in 0..self.count_v {
                        let upper = self.control_points[(i + 1) * self.count_v + j].coords;
                        let lower = self.control_points[i * self.count_v + j].coords;
                        pts[i * self.count_v + j] = Point3::from((upper - lower) * factor);
                    }
                }
                let knots = KnotVector::new_unchecked(kv[1..kv.len() - 1].to_vec());
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    knots,
                    self.knots_v.clone(),
                    (self.degree_u - 1, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                if self.degree_v == 0 {
                    return Err(SplineError::DegreeTooLow { degree: 0, min: 1 });
                }
                let p = self.degree_v as f64;
                let kv = self.knots_v.as_slice();
                let new_count_v = self.count_v - 1;
                let mut pts = vec![Point3::origin(); self.count_u * new_count_v];
                for i in 0..self.count_u {
                    for j in 0..new_count_v {
                        let denom = kv[j + self.degree_v + 1] - kv[j + 1];
                        let factor = if denom.abs() < f64::EPSILON { 0.0 } else { p / denom };
                        let upper = self.control_points[i * self.count_v + j + 1].coords;
                        let lower = self.control_points[i * self.count_v + j].coords;
                        pts[i * new_count_v + j] = Point3::from((upper - lower) * factor);
                    }
                }
                let knots = KnotVector::new_unchecked(kv[1..kv.len() - 1].to_vec());
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    knots,
                    (self.degree_u, self.degree_v - 1),
                    self.span_search,
                ))
            }
        }
    }

    /// A copy of this surface with both knot vectors rescaled onto `[0, 1]`.
    #[must_use]
    pub fn normalize_knots(&self) -> Self {
        Self::from_parts(
            self.control_points.clone(),
            (self.count_u, self.count_v),
            self.knots_u.normalized(),
            self.knots_v.normalized(),
            (self.degree_u, self.degree_v),
            self.span_search,
        )
    }

    /// Swap the parametric directions, transposing the control grid.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut pts = vec![Point3::origin(); self.control_points.len()];
        for i in 0..self.count_u {
            for j in 0..self.count_v {
                pts[j * self.count_u + i] = self.control_points[i * self.count_v + j];
            }
        }
        Self::from_parts(
            pts,
            (self.count_v, self.count_u),
            self.knots_v.clone(),
            self.knots_u.clone(),
            (self.degree_v, self.degree_u),
            self.span_search,
        )
    }

    /// Axis-aligned bounding box of the control points.
    #[must_use]
    pub fn control_bounds(&self) -> (Point3<f64>, Point3<f64>) {
        crate::curve::control_bounds(&self.control_points)
    }

    /// Convert to a rational surface with all weights 1.
    #[must_use]
    pub fn to_rational(&self) -> NurbsSurface {
        let pts = self
            .control_points
            .iter()
            .map(|p| Point4::new(p.x, p.y, p.z, 1.0))
            .collect();
        NurbsSurface {
            control_points: pts,
            count_u: self.count_u,
            count_v: self.count_v,
            knots_u: self.knots_u.clone(),
            knots_v: self.knots_v.clone(),
            degree_u: self.degree_u,
            degree_v: self.degree_v,
            span_search: self.span_search,
        }
    }
}

/// A NURBS (rational B-spline) surface.
///
/// The rational counterpart of [`BSplineSurface`]: the grid holds
/// homogeneous control points `(x*w, y*w, z*w, w)` and evaluation divides
/// the weight back out. Structural operations run on the homogeneous
/// coordinates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NurbsSurface {
    /// Homogeneous control point grid, flat, v varying fastest.
    control_points: Vec<Point4<f64>>,
    /// Grid size in the u direction.
    count_u: usize,
    /// Grid size in the v direction.
    count_v: usize,
    /// Knot vector in the u direction.
    knots_u: KnotVector,
    /// Knot vector in the v direction.
    knots_v: KnotVector,
    /// Degree in the u direction.
    degree_u: usize,
    /// Degree in the v direction.
    degree_v: usize,
    /// Knot span search strategy used during evaluation.
    span_search: SpanSearch,
}

impl NurbsSurface {
    /// Create a NURBS surface from cartesian control points, weights, and
    /// explicit knot vectors.
    ///
    /// # Errors
    ///
    /// Returns an error for a weight/grid mismatch, non-positive weights,
    /// or inconsistent grid dimensions and knot vector lengths.
    pub fn new(
        control_points: Vec<Point3<f64>>,
        weights: Vec<f64>,
        counts: (usize, usize),
        knots_u: KnotVector,
        knots_v: KnotVector,
        degrees: (usize, usize),
    ) -> Result<Self> {
        if weights.len() != control_points.len() {
            return Err(SplineError::count_mismatch(
                "weights",
                control_points.len(),
                weights.len(),
            ));
        }
        for (index, &w) in weights.iter().enumerate() {
            if w <= 0.0 {
                return Err(SplineError::InvalidWeight { index, value: w });
            }
        }
        validate_grid(
            control_points.len(),
            counts,
            (&knots_u, &knots_v),
            degrees,
        )?;

        let homogeneous = control_points
            .iter()
            .zip(weights.iter())
            .map(|(p, &w)| Point4::new(p.x * w, p.y * w, p.z * w, w))
            .collect();

        Ok(Self {
            control_points: homogeneous,
            count_u: counts.0,
            count_v: counts.1,
            knots_u,
            knots_v,
            degree_u: degrees.0,
            degree_v: degrees.1,
            span_search: SpanSearch::default(),
        })
    }

    /// Create a clamped NURBS surface with uniform interior knots.
    ///
    /// # Errors
    ///
    /// Same conditions as [`NurbsSurface::new`].
    pub fn clamped(
        control_points: Vec<Point3<f64>>,
        weights: Vec<f64>,
        counts: (usize, usize),
        degrees: (usize, usize),
    ) -> Result<Self> {
        let knots_u = KnotVector::clamped_uniform(degrees.0, counts.0)?;
        let knots_v = KnotVector::clamped_uniform(degrees.1, counts.1)?;
        Self::new(control_points, weights, counts, knots_u, knots_v, degrees)
    }

    fn from_parts(
        control_points: Vec<Point4<f64>>,
        counts: (usize, usize),
        knots_u: KnotVector,
        knots_v: KnotVector,
        degrees: (usize, usize),
        span_search: SpanSearch,
    ) -> Self {
        debug_assert_eq!(control_points.len(), counts.0 * counts.1);
        Self {
            control_points,
            count_u: counts.0,
            count_v: counts.1,
            knots_u,
            knots_v,
            degree_u: degrees.0,
            degree_v: degrees.1,
            span_search,
        }
    }

    /// Get the control points in cartesian coordinates.
    #[must_use]
    pub fn control_points(&self) -> Vec<Point3<f64>> {
        self.control_points
            .iter()
            .map(|hp| Point3::new(hp.x / hp.w, hp.y / hp.w, hp.z / hp.w))
            .collect()
    }

    /// Get the weights.
    #[must_use]
    pub fn weights(&self) -> Vec<f64> {
        self.control_points.iter().map(|hp| hp.w).collect()
    }

    /// Get the control points in homogeneous (weighted) form.
    #[must_use]
    pub fn homogeneous_control_points(&self) -> &[Point4<f64>] {
        &self.control_points
    }

    /// Get the grid size `(count_u, count_v)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        (self.count_u, self.count_v)
    }

    /// Get the degrees `(degree_u, degree_v)`.
    #[must_use]
    pub fn degrees(&self) -> (usize, usize) {
        (self.degree_u, self.degree_v)
    }

    /// Get the knot vector for a direction.
    #[must_use]
    pub fn knots(&self, direction: SurfaceDirection) -> &KnotVector {
        match direction {
            SurfaceDirection::U => &self.knots_u,
            SurfaceDirection::V => &self.knots_v,
        }
    }

    /// Get the parameter domains `((u_min, u_max), (v_min, v_max))`.
    #[must_use]
    pub fn domain(&self) -> ((f64, f64), (f64, f64)) {
        (
            self.knots_u.domain(self.degree_u),
            self.knots_v.domain(self.degree_v),
        )
    }

    /// Evaluate the surface at `(u, v)`.
    ///
    /// Evaluates in homogeneous coordinates with the perspective division.
    #[must_use]
    pub fn point_at(&self, u: f64, v: f64) -> Point3<f64> {
        let (dom_u, dom_v) = self.domain();
        let u = u.clamp(dom_u.0, dom_u.1);
        let v = v.clamp(dom_v.0, dom_v.1);

        let span_u = find_span(
            self.degree_u,
            self.knots_u.as_slice(),
            self.count_u,
            u,
            self.span_search,
        );
        let span_v = find_span(
            self.degree_v,
            self.knots_v.as_slice(),
            self.count_v,
            v,
            self.span_search,
        );
        let bu = basis_functions(self.degree_u, self.knots_u.as_slice(), span_u, u);
        let bv = basis_functions(self.degree_v, self.knots_v.as_slice(), span_v, v);

        let mut acc = Vector4::zeros();
        for (i, &nu) in bu.iter().enumerate() {
            let row = span_u - self.degree_u + i;
            for (j, &nv) in bv.iter().enumerate() {
                let col = span_v - self.degree_v + j;
                acc += self.control_points[row * self.count_v + col].coords * (nu * nv);
            }
        }
        Point3::new(acc.x / acc.w, acc.y / acc.w, acc.z / acc.w)
    }

    /// Sample the surface on a regular `(nu, nv)` parameter grid
    /// (v samples varying fastest).
    #[must_use]
    pub fn sample_regular(&self, nu: usize, nv: usize) -> Vec<Point3<f64>> {
        let nu = nu.max(2);
        let nv = nv.max(2);
        let ((u0, u1), (v0, v1)) = self.domain();

        let mut out = Vec::with_capacity(nu * nv);
        for i in 0..nu {
            let u = u0 + (u1 - u0) * i as f64 / (nu - 1) as f64;
            for j in 0..nv {
                let v = v0 + (v1 - v0) * j as f64 / (nv - 1) as f64;
                out.push(self.point_at(u, v));
            }
        }
        out
    }

    /// Evaluate the surface point and its rational partial derivatives up
    /// to `order` (`k + l <= order`).
    ///
    /// Homogeneous derivatives are corrected with the two-index binomial
    /// quotient-rule recursion, so the results are exact derivatives of the
    /// rational surface.
    #[must_use]
    pub fn derivatives(&self, u: f64, v: f64, order: usize) -> Vec<Vec<Vector3<f64>>> {
        let (dom_u, dom_v) = self.domain();
        let u = u.clamp(dom_u.0, dom_u.1);
        let v = v.clamp(dom_v.0, dom_v.1);

        let du = order.min(self.degree_u);
        let dv = order.min(self.degree_v);

        let span_u = find_span(
            self.degree_u,
            self.knots_u.as_slice(),
            self.count_u,
            u,
            self.span_search,
        );
        let span_v = find_span(
            self.degree_v,
            self.knots_v.as_slice(),
            self.count_v,
            v,
            self.span_search,
        );
        let uders =
            basis_function_derivatives(self.degree_u, self.knots_u.as_slice(), span_u, u, du);
        let vders =
            basis_function_derivatives(self.degree_v, self.knots_v.as_slice(), span_v, v, dv);

        // Homogeneous derivative table first.
        let mut hders = vec![vec![Vector4::zeros(); order + 1]; order + 1];
        let mut temp = vec![Vector4::zeros(); self.degree_v + 1];
        for k in 0..=du {
            for (s, slot) in temp.iter_mut().enumerate() {
                *slot = Vector4::zeros();
                for r in 0..=self.degree_u {
                    let idx = (span_u - self.degree_u + r) * self.count_v
                        + (span_v - self.degree_v + s);
                    *slot += self.control_points[idx].coords * uders[k][r];
                }
            }
            let dd = (order - k).min(dv);
            for l in 0..=dd {
                for (s, slot) in temp.iter().enumerate() {
                    hders[k][l] += slot * vders[l][s];
                }
            }
        }

        // Split into coordinate and weight derivatives, then apply the
        // rational correction.
        let mut skl = vec![vec![Vector3::zeros(); order + 1]; order + 1];
        let w00 = hders[0][0].w;
        for k in 0..=order {
            for l in 0..=(order - k) {
                let h = &hders[k][l];
                let mut value = Vector3::new(h.x, h.y, h.z);

                for j in 1..=l {
                    value -= skl[k][l - j] * (binomial(l, j) * hders[0][j].w);
                }
                for i in 1..=k {
                    value -= skl[k - i][l] * (binomial(k, i) * hders[i][0].w);
                    let mut inner = Vector3::zeros();
                    for j in 1..=l {
                        inner += skl[k - i][l - j] * (binomial(l, j) * hders[i][j].w);
                    }
                    value -= inner * binomial(k, i);
                }

                skl[k][l] = value / w00;
            }
        }

        skl
    }

    /// Insert the knot `t` into the given direction `num` times.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::NurbsCurve::insert_knot`].
    pub fn insert_knot(&self, direction: SurfaceDirection, t: f64, num: usize) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                let (kv, pts, new_count_u) =
                    apply_u(&self.control_points, self.count_u, self.count_v, |row| {
                        insert_knot_core(self.degree_u, &self.knots_u, row, t, num)
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    kv,
                    self.knots_v.clone(),
                    (self.degree_u, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                let (kv, pts, new_count_v) =
                    apply_v(&self.control_points, self.count_u, self.count_v, |row| {
                        insert_knot_core(self.degree_v, &self.knots_v, row, t, num)
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    kv,
                    (self.degree_u, self.degree_v),
                    self.span_search,
                ))
            }
        }
    }

    /// Remove the knot `t` from the given direction up to `num` times,
    /// with the grid-consistent two-pass semantics of
    /// [`BSplineSurface::remove_knot`].
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::NurbsCurve::remove_knot`].
    pub fn remove_knot(
        &self,
        direction: SurfaceDirection,
        t: f64,
        num: usize,
    ) -> Result<(Self, usize)> {
        match direction {
            SurfaceDirection::U => {
                let rows: Vec<Vec<Point4<f64>>> = (0..self.count_v)
                    .map(|j| {
                        (0..self.count_u)
                            .map(|i| self.control_points[i * self.count_v + j])
                            .collect()
                    })
                    .collect();
                let (kv, new_rows, removed) =
                    remove_rows(self.degree_u, &self.knots_u, &rows, t, num)?;
                let new_count_u = new_rows[0].len();
                let mut pts = vec![Point4::origin(); new_count_u * self.count_v];
                for (j, column) in new_rows.iter().enumerate() {
                    for (i, p) in column.iter().enumerate() {
                        pts[i * self.count_v + j] = *p;
                    }
                }
                Ok((
                    Self::from_parts(
                        pts,
                        (new_count_u, self.count_v),
                        kv,
                        self.knots_v.clone(),
                        (self.degree_u, self.degree_v),
                        self.span_search,
                    ),
                    removed,
                ))
            }
            SurfaceDirection::V => {
                let rows: Vec<Vec<Point4<f64>>> = (0..self.count_u)
                    .map(|i| self.control_points[i * self.count_v..(i + 1) * self.count_v].to_vec())
                    .collect();
                let (kv, new_rows, removed) =
                    remove_rows(self.degree_v, &self.knots_v, &rows, t, num)?;
                let new_count_v = new_rows[0].len();
                let pts: Vec<Point4<f64>> = new_rows.into_iter().flatten().collect();
                Ok((
                    Self::from_parts(
                        pts,
                        (self.count_u, new_count_v),
                        self.knots_u.clone(),
                        kv,
                        (self.degree_u, self.degree_v),
                        self.span_search,
                    ),
                    removed,
                ))
            }
        }
    }

    /// Insert a list of knots into a direction in one refinement pass.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::NurbsCurve::refine_knots`].
    pub fn refine_knots(&self, direction: SurfaceDirection, insert: &[f64]) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                let (kv, pts, new_count_u) =
                    apply_u(&self.control_points, self.count_u, self.count_v, |row| {
                        refine_knots_core(self.degree_u, &self.knots_u, row, insert)
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    kv,
                    self.knots_v.clone(),
                    (self.degree_u, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                let (kv, pts, new_count_v) =
                    apply_v(&self.control_points, self.count_u, self.count_v, |row| {
                        refine_knots_core(self.degree_v, &self.knots_v, row, insert)
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    kv,
                    (self.degree_u, self.degree_v),
                    self.span_search,
                ))
            }
        }
    }

    /// Refine a direction by recursive midpoint subdivision.
    ///
    /// # Errors
    ///
    /// Fails for density 0.
    pub fn refine_density(&self, direction: SurfaceDirection, density: usize) -> Result<Self> {
        let (degree, knots) = match direction {
            SurfaceDirection::U => (self.degree_u, &self.knots_u),
            SurfaceDirection::V => (self.degree_v, &self.knots_v),
        };
        let midpoints = density_midpoints(degree, knots, density)?;
        self.refine_knots(direction, &midpoints)
    }

    /// Elevate the degree of one direction by `num` on the homogeneous
    /// grid.
    ///
    /// # Errors
    ///
    /// Propagates per-row decomposition errors.
    pub fn elevate_degree(&self, direction: SurfaceDirection, num: usize) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                let (kv, pts, new_count_u) =
                    apply_u(&self.control_points, self.count_u, self.count_v, |row| {
                        elevate_degree_core(self.degree_u, &self.knots_u, row, num)
                            .map(|(_, kv, pts)| (kv, pts))
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    kv,
                    self.knots_v.clone(),
                    (self.degree_u + num, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                let (kv, pts, new_count_v) =
                    apply_v(&self.control_points, self.count_u, self.count_v, |row| {
                        elevate_degree_core(self.degree_v, &self.knots_v, row, num)
                            .map(|(_, kv, pts)| (kv, pts))
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    kv,
                    (self.degree_u, self.degree_v + num),
                    self.span_search,
                ))
            }
        }
    }

    /// Reduce the degree of one direction by one on the homogeneous grid.
    ///
    /// Approximate, like [`crate::NurbsCurve::reduce_degree`].
    ///
    /// # Errors
    ///
    /// Fails if that direction's degree is below 2.
    pub fn reduce_degree(&self, direction: SurfaceDirection) -> Result<Self> {
        match direction {
            SurfaceDirection::U => {
                let (kv, pts, new_count_u) =
                    apply_u(&self.control_points, self.count_u, self.count_v, |row| {
                        reduce_degree_core(self.degree_u, &self.knots_u, row)
                            .map(|(_, kv, pts)| (kv, pts))
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (new_count_u, self.count_v),
                    kv,
                    self.knots_v.clone(),
                    (self.degree_u - 1, self.degree_v),
                    self.span_search,
                ))
            }
            SurfaceDirection::V => {
                let (kv, pts, new_count_v) =
                    apply_v(&self.control_points, self.count_u, self.count_v, |row| {
                        reduce_degree_core(self.degree_v, &self.knots_v, row)
                            .map(|(_, kv, pts)| (kv, pts))
                    })?;
                Ok(Self::from_parts(
                    pts,
                    (self.count_u, new_count_v),
                    self.knots_u.clone(),
                    kv,
                    (self.degree_u, self.degree_v - 1),
                    self.span_search,
                ))
            }
        }
    }

    /// The hodograph is defined for non-rational geometry only; for a
    /// rational surface this logs a warning and returns the surface
    /// unchanged.
    #[must_use]
    pub fn hodograph(&self, _direction: SurfaceDirection) -> Self {
        warn!("hodograph is undefined for rational surfaces; returning the input unchanged");
        self.clone()
    }

    /// A copy of this surface with both knot vectors rescaled onto `[0, 1]`.
    #[must_use]
    pub fn normalize_knots(&self) -> Self {
        Self::from_parts(
            self.control_points.clone(),
            (self.count_u, self.count_v),
            self.knots_u.normalized(),
            self.knots_v.normalized(),
            (self.degree_u, self.degree_v),
            self.span_search,
        )
    }

    /// Swap the parametric directions, transposing the control grid.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut pts = vec![Point4::origin(); self.control_points.len()];
        for i in 0..self.count_u {
            for j in 0..self.count_v {
                pts[j * self.count_u + i] = self.control_points[i * self.count_v + j];
            }
        }
        Self::from_parts(
            pts,
            (self.count_v, self.count_u),
            self.knots_v.clone(),
            self.knots_u.clone(),
            (self.degree_v, self.degree_u),
            self.span_search,
        )
    }

    /// Axis-aligned bounding box of the cartesian control points.
    #[must_use]
    pub fn control_bounds(&self) -> (Point3<f64>, Point3<f64>) {
        crate::curve::control_bounds(&self.control_points())
    }

    /// Split into the non-rational surface over the cartesian control
    /// points and the separate weight vector.
    ///
    /// The exact inverse of [`BSplineSurface::to_rational`] when all
    /// weights are 1.
    #[must_use]
    pub fn to_nonrational(&self) -> (BSplineSurface, Vec<f64>) {
        let surface = BSplineSurface::from_parts(
            self.control_points(),
            (self.count_u, self.count_v),
            self.knots_u.clone(),
            self.knots_v.clone(),
            (self.degree_u, self.degree_v),
            self.span_search,
        );
        (surface, self.weights())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Bilinear patch over the unit square with z = x * y.
    fn bilinear_patch() -> BSplineSurface {
        BSplineSurface::clamped(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 1.0),
            ],
            (2, 2),
            (1, 1),
        )
        .unwrap()
    }

    /// A 4x3 grid, cubic in u and quadratic in v, with a wavy z.
    fn wavy_surface() -> BSplineSurface {
        let mut pts = Vec::new();
        for i in 0..4 {
            for j in 0..3 {
                let x = i as f64;
                let y = j as f64;
                let z = ((i * 7 + j * 3) % 5) as f64 - 2.0;
                pts.push(Point3::new(x, y, z));
            }
        }
        BSplineSurface::clamped(pts, (4, 3), (3, 2)).unwrap()
    }

    /// Quarter cylinder: the quarter-circle arc swept along z.
    fn quarter_cylinder() -> NurbsSurface {
        let w = std::f64::consts::FRAC_1_SQRT_2;
        let mut pts = Vec::new();
        let mut weights = Vec::new();
        for (arc_pt, arc_w) in [
            (Point3::new(1.0, 0.0, 0.0), 1.0),
            (Point3::new(1.0, 1.0, 0.0), w),
            (Point3::new(0.0, 1.0, 0.0), 1.0),
        ] {
            for k in 0..2 {
                pts.push(Point3::new(arc_pt.x, arc_pt.y, k as f64));
                weights.push(arc_w);
            }
        }
        NurbsSurface::clamped(pts, weights, (3, 2), (2, 1)).unwrap()
    }

    #[test]
    fn test_grid_validation() {
        let pts = vec![Point3::origin(); 5];
        let err = BSplineSurface::clamped(pts, (2, 2), (1, 1)).unwrap_err();
        assert!(matches!(
            err,
            SplineError::CountMismatch {
                expected: 4,
                actual: 5,
                ..
            }
        ));

        let pts = vec![Point3::origin(); 4];
        let err = BSplineSurface::clamped(pts, (2, 2), (2, 1)).unwrap_err();
        assert!(err.is_insufficient_points());
    }

    #[test]
    fn test_bilinear_evaluation() {
        let surface = bilinear_patch();
        for i in 0..=4 {
            for j in 0..=4 {
                let u = i as f64 / 4.0;
                let v = j as f64 / 4.0;
                let p = surface.point_at(u, v);
                assert_relative_eq!(p.x, u, epsilon = 1e-12);
                assert_relative_eq!(p.y, v, epsilon = 1e-12);
                assert_relative_eq!(p.z, u * v, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_corner_interpolation() {
        let surface = wavy_surface();
        assert_relative_eq!(
            surface.point_at(0.0, 0.0).coords,
            surface.control_point(0, 0).coords,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            surface.point_at(1.0, 1.0).coords,
            surface.control_point(3, 2).coords,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_sample_regular_ordering() {
        let surface = bilinear_patch();
        let samples = surface.sample_regular(3, 5);
        assert_eq!(samples.len(), 15);
        // v varies fastest: the first 5 samples share u = 0.
        for j in 0..5 {
            assert_relative_eq!(samples[j].x, 0.0, epsilon = 1e-12);
            assert_relative_eq!(samples[j].y, j as f64 / 4.0, epsilon = 1e-12);
        }
        // Start of the second u row.
        assert_relative_eq!(samples[5].x, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_derivatives_of_bilinear_patch() {
        let surface = bilinear_patch();
        let skl = surface.derivatives(0.3, 0.7, 2);

        assert_relative_eq!(skl[0][0], surface.point_at(0.3, 0.7).coords, epsilon = 1e-12);
        // dS/du = (1, 0, v); dS/dv = (0, 1, u)
        assert_relative_eq!(skl[1][0], Vector3::new(1.0, 0.0, 0.7), epsilon = 1e-12);
        assert_relative_eq!(skl[0][1], Vector3::new(0.0, 1.0, 0.3), epsilon = 1e-12);
        // Mixed partial is the constant twist (0, 0, 1)
        assert_relative_eq!(skl[1][1], Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let surface = wavy_surface();
        let (u, v) = (0.37, 0.61);
        let h = 1e-6;
        let skl = surface.derivatives(u, v, 1);

        let fd_u =
            (surface.point_at(u + h, v).coords - surface.point_at(u - h, v).coords) / (2.0 * h);
        let fd_v =
            (surface.point_at(u, v + h).coords - surface.point_at(u, v - h).coords) / (2.0 * h);
        assert_relative_eq!(skl[1][0], fd_u, epsilon = 1e-4);
        assert_relative_eq!(skl[0][1], fd_v, epsilon = 1e-4);
    }

    #[test]
    fn test_insertion_invariance_both_directions() {
        let surface = wavy_surface();
        let refined = surface
            .insert_knot(SurfaceDirection::U, 0.5, 1)
            .unwrap()
            .insert_knot(SurfaceDirection::V, 0.25, 1)
            .unwrap();

        assert_eq!(refined.counts(), (5, 4));
        assert_eq!(refined.knots(SurfaceDirection::U).multiplicity(0.5), 1);
        assert_eq!(refined.knots(SurfaceDirection::V).multiplicity(0.25), 1);

        for i in 0..=8 {
            for j in 0..=8 {
                let u = i as f64 / 8.0;
                let v = j as f64 / 8.0;
                assert_relative_eq!(
                    surface.point_at(u, v).coords,
                    refined.point_at(u, v).coords,
                    epsilon = 1e-9
                );
            }
        }
    }

    #[test]
    fn test_removal_roundtrip() {
        let surface = wavy_surface();
        let inserted = surface.insert_knot(SurfaceDirection::U, 0.4, 1).unwrap();
        let (removed, count) = inserted.remove_knot(SurfaceDirection::U, 0.4, 1).unwrap();

        assert_eq!(count, 1);
        assert_eq!(removed.counts(), surface.counts());
        for (a, b) in removed
            .control_points()
            .iter()
            .zip(surface.control_points().iter())
        {
            assert_relative_eq!(a.coords, b.coords, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_refinement_invariance() {
        let surface = wavy_surface();
        let refined = surface
            .refine_knots(SurfaceDirection::U, &[0.2, 0.5, 0.8])
            .unwrap();
        assert_eq!(refined.counts().0, 7);

        for i in 0..=8 {
            for j in 0..=8 {
                let u = i as f64 / 8.0;
                let v = j as f64 / 8.0;
                assert_relative_eq!(
                    surface.point_at(u, v).coords,
                    refined.point_at(u, v).coords,
                    epsilon = 1e-9
                );
            }
        }

        let dense = surface.refine_density(SurfaceDirection::V, 1).unwrap();
        assert!(dense.counts().1 > surface.counts().1);
    }

    #[test]
    fn test_decompose_strips() {
        let surface = wavy_surface();
        // Cubic in u over 4 points: a single segment; quadratic in v over 3
        // points: a single segment as well. Refine first so there is
        // something to split.
        let refined = surface.refine_knots(SurfaceDirection::U, &[0.5]).unwrap();
        let strips = refined.decompose(SurfaceDirection::U).unwrap();
        assert_eq!(strips.len(), 2);
        for strip in &strips {
            assert_eq!(strip.counts().0, 4);
            let ((u0, u1), _) = strip.domain();
            for i in 0..=4 {
                for j in 0..=4 {
                    let u = u0 + (u1 - u0) * i as f64 / 4.0;
                    let v = j as f64 / 4.0;
                    assert_relative_eq!(
                        strip.point_at(u, v).coords,
                        surface.point_at(u, v).coords,
                        epsilon = 1e-9
                    );
                }
            }
        }
    }

    #[test]
    fn test_decompose_bezier_patches() {
        let surface = wavy_surface();
        let refined = surface
            .refine_knots(SurfaceDirection::U, &[0.5])
            .unwrap()
            .refine_knots(SurfaceDirection::V, &[0.5])
            .unwrap();
        let patches = refined.decompose_bezier_patches().unwrap();
        assert_eq!(patches.len(), 4);
        for patch in &patches {
            assert_eq!(patch.counts(), (4, 3));
        }
    }

    #[test]
    fn test_elevation_invariance() {
        let surface = wavy_surface();
        let elevated = surface.elevate_degree(SurfaceDirection::V, 1).unwrap();
        assert_eq!(elevated.degrees(), (3, 3));
        assert_eq!(elevated.counts(), (4, 4));

        for i in 0..=8 {
            for j in 0..=8 {
                let u = i as f64 / 8.0;
                let v = j as f64 / 8.0;
                assert_relative_eq!(
                    surface.point_at(u, v).coords,
                    elevated.point_at(u, v).coords,
                    epsilon = 1e-6
                );
            }
        }
    }

    #[test]
    fn test_reduction_recovers_elevated_surface() {
        let surface = wavy_surface();
        let elevated = surface.elevate_degree(SurfaceDirection::U, 1).unwrap();
        let reduced = elevated.reduce_degree(SurfaceDirection::U).unwrap();

        assert_eq!(reduced.degrees(), surface.degrees());
        for i in 0..=8 {
            for j in 0..=8 {
                let u = i as f64 / 8.0;
                let v = j as f64 / 8.0;
                assert_relative_eq!(
                    surface.point_at(u, v).coords,
                    reduced.point_at(u, v).coords,
                    epsilon = 1e-3
                );
            }
        }
    }

    #[test]
    fn test_hodograph_matches_partial_derivatives() {
        let surface = wavy_surface();
        let hodo_u = surface.hodograph(SurfaceDirection::U).unwrap();
        let hodo_v = surface.hodograph(SurfaceDirection::V).unwrap();
        assert_eq!(hodo_u.degrees(), (2, 2));
        assert_eq!(hodo_v.degrees(), (3, 1));

        for i in 1..8 {
            for j in 1..8 {
                let u = i as f64 / 8.0;
                let v = j as f64 / 8.0;
                let skl = surface.derivatives(u, v, 1);
                assert_relative_eq!(hodo_u.point_at(u, v).coords, skl[1][0], epsilon = 1e-9);
                assert_relative_eq!(hodo_v.point_at(u, v).coords, skl[0][1], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_derivative_control_points_table() {
        let surface = bilinear_patch();
        let pkl = surface.derivative_control_points(2);
        // The (1,1) table holds the constant twist vector.
        assert_relative_eq!(
            pkl[1][1][0][0].coords,
            Vector3::new(0.0, 0.0, 1.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_transpose_swaps_parameters() {
        let surface = wavy_surface();
        let transposed = surface.transpose();
        assert_eq!(transposed.counts(), (3, 4));
        assert_eq!(transposed.degrees(), (2, 3));

        for i in 0..=6 {
            for j in 0..=6 {
                let u = i as f64 / 6.0;
                let v = j as f64 / 6.0;
                assert_relative_eq!(
                    surface.point_at(u, v).coords,
                    transposed.point_at(v, u).coords,
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_quarter_cylinder_radius_is_exact() {
        let surface = quarter_cylinder();
        for i in 0..=8 {
            for j in 0..=8 {
                let u = i as f64 / 8.0;
                let v = j as f64 / 8.0;
                let p = surface.point_at(u, v);
                let radius = (p.x * p.x + p.y * p.y).sqrt();
                assert_relative_eq!(radius, 1.0, epsilon = 1e-12);
                assert!(p.z >= -1e-12 && p.z <= 1.0 + 1e-12);
            }
        }
    }

    #[test]
    fn test_unit_weight_rational_matches_nonrational() {
        let surface = wavy_surface();
        let rational = surface.to_rational();
        for i in 0..=6 {
            for j in 0..=6 {
                let u = i as f64 / 6.0;
                let v = j as f64 / 6.0;
                assert_relative_eq!(
                    surface.point_at(u, v).coords,
                    rational.point_at(u, v).coords,
                    epsilon = 1e-12
                );
                let a = surface.derivatives(u, v, 1);
                let b = rational.derivatives(u, v, 1);
                assert_relative_eq!(a[1][0], b[1][0], epsilon = 1e-9);
                assert_relative_eq!(a[0][1], b[0][1], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_rational_roundtrip_is_exact() {
        let surface = wavy_surface();
        let rational = surface.to_rational();
        let (back, weights) = rational.to_nonrational();

        assert!(weights.iter().all(|&w| w == 1.0));
        assert_eq!(back.counts(), surface.counts());
        for (a, b) in back
            .control_points()
            .iter()
            .zip(surface.control_points().iter())
        {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_rational_insertion_keeps_cylinder_exact() {
        let surface = quarter_cylinder();
        let refined = surface.insert_knot(SurfaceDirection::U, 0.5, 1).unwrap();
        assert_eq!(refined.counts(), (4, 2));
        for i in 0..=8 {
            for j in 0..=8 {
                let u = i as f64 / 8.0;
                let v = j as f64 / 8.0;
                let p = refined.point_at(u, v);
                assert_relative_eq!((p.x * p.x + p.y * p.y).sqrt(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_rational_surface_hodograph_is_unchanged() {
        let surface = quarter_cylinder();
        let same = surface.hodograph(SurfaceDirection::U);
        assert_eq!(same, surface);
    }

    #[test]
    fn test_rational_derivatives_on_cylinder() {
        // Radius is constant along u, so position · du-velocity vanishes in
        // the xy plane.
        let surface = quarter_cylinder();
        for i in 1..8 {
            let u = i as f64 / 8.0;
            let skl = surface.derivatives(u, 0.5, 1);
            let pos_xy = Vector3::new(skl[0][0].x, skl[0][0].y, 0.0);
            let vel_xy = Vector3::new(skl[1][0].x, skl[1][0].y, 0.0);
            assert_relative_eq!(pos_xy.dot(&vel_xy), 0.0, epsilon = 1e-9);
        }
    }
}
