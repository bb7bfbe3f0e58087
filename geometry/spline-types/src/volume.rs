//! B-spline and NURBS volumes.
//!
//! Trivariate tensor-product geometry over a `count_u x count_v x count_w`
//! control point lattice. The flat storage nests the directions with **w
//! varying fastest**, then v, then u: the point at lattice position
//! `(i, j, k)` lives at `control_points[(i * count_v + j) * count_w + k]`.
//!
//! Volumes support point evaluation and the per-direction knot algorithms.
//! Derivative evaluation and degree change are not defined for volumes in
//! this crate and fail loudly with [`SplineError::Unsupported`] instead of
//! returning silently wrong results.

use nalgebra::{allocator::Allocator, DefaultAllocator, DimName, OPoint, Point3, Point4, Vector3, Vector4};

use crate::basis::{basis_functions, find_span, SpanSearch};
use crate::knot_ops::{
    density_midpoints, insert_knot_core, refine_knots_core, remove_rows,
};
use crate::knots::KnotVector;
use crate::{Result, SplineError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A parametric direction in a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VolumeDirection {
    /// The first parametric direction.
    U,
    /// The second parametric direction.
    V,
    /// The third parametric direction.
    W,
}

/// Extract the 1D control point rows along a direction of the lattice.
fn extract_rows<D>(
    pts: &[OPoint<f64, D>],
    (count_u, count_v, count_w): (usize, usize, usize),
    direction: VolumeDirection,
) -> Vec<Vec<OPoint<f64, D>>>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    let idx = |i: usize, j: usize, k: usize| (i * count_v + j) * count_w + k;
    match direction {
        VolumeDirection::U => {
            let mut rows = Vec::with_capacity(count_v * count_w);
            for j in 0..count_v {
                for k in 0..count_w {
                    rows.push((0..count_u).map(|i| pts[idx(i, j, k)].clone()).collect());
                }
            }
            rows
        }
        VolumeDirection::V => {
            let mut rows = Vec::with_capacity(count_u * count_w);
            for i in 0..count_u {
                for k in 0..count_w {
                    rows.push((0..count_v).map(|j| pts[idx(i, j, k)].clone()).collect());
                }
            }
            rows
        }
        VolumeDirection::W => {
            let mut rows = Vec::with_capacity(count_u * count_v);
            for i in 0..count_u {
                for j in 0..count_v {
                    rows.push((0..count_w).map(|k| pts[idx(i, j, k)].clone()).collect());
                }
            }
            rows
        }
    }
}

/// Rebuild the flat lattice from direction rows produced by
/// [`extract_rows`], with the row length possibly changed to `new_len`.
fn assemble_rows<D>(
    rows: &[Vec<OPoint<f64, D>>],
    (count_u, count_v, count_w): (usize, usize, usize),
    direction: VolumeDirection,
) -> (Vec<OPoint<f64, D>>, (usize, usize, usize))
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    let new_len = rows[0].len();
    let counts = match direction {
        VolumeDirection::U => (new_len, count_v, count_w),
        VolumeDirection::V => (count_u, new_len, count_w),
        VolumeDirection::W => (count_u, count_v, new_len),
    };
    let (nu, nv, nw) = counts;
    let idx = |i: usize, j: usize, k: usize| (i * nv + j) * nw + k;
    let mut out = vec![OPoint::<f64, D>::origin(); nu * nv * nw];

    match direction {
        VolumeDirection::U => {
            for (row_index, row) in rows.iter().enumerate() {
                let j = row_index / nw;
                let k = row_index % nw;
                for (i, p) in row.iter().enumerate() {
                    out[idx(i, j, k)] = p.clone();
                }
            }
        }
        VolumeDirection::V => {
            for (row_index, row) in rows.iter().enumerate() {
                let i = row_index / nw;
                let k = row_index % nw;
                for (j, p) in row.iter().enumerate() {
                    out[idx(i, j, k)] = p.clone();
                }
            }
        }
        VolumeDirection::W => {
            for (row_index, row) in rows.iter().enumerate() {
                let i = row_index / nv;
                let j = row_index % nv;
                for (k, p) in row.iter().enumerate() {
                    out[idx(i, j, k)] = p.clone();
                }
            }
        }
    }

    (out, counts)
}

/// A non-rational B-spline volume.
///
/// # Example
///
/// ```
/// use spline_types::BSplineVolume;
/// use nalgebra::Point3;
///
/// // The unit cube as a trilinear volume
/// let mut pts = Vec::new();
/// for i in 0..2 {
///     for j in 0..2 {
///         for k in 0..2 {
///             pts.push(Point3::new(i as f64, j as f64, k as f64));
///         }
///     }
/// }
/// let volume = BSplineVolume::clamped(pts, (2, 2, 2), (1, 1, 1)).unwrap();
///
/// let center = volume.point_at(0.5, 0.5, 0.5);
/// assert!((center.x - 0.5).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BSplineVolume {
    /// Control point lattice, flat, w fastest, then v, then u.
    control_points: Vec<Point3<f64>>,
    /// Lattice size per direction.
    count_u: usize,
    count_v: usize,
    count_w: usize,
    /// Knot vectors per direction.
    knots_u: KnotVector,
    knots_v: KnotVector,
    knots_w: KnotVector,
    /// Degrees per direction.
    degree_u: usize,
    degree_v: usize,
    degree_w: usize,
    /// Knot span search strategy used during evaluation.
    span_search: SpanSearch,
}

fn validate_lattice(
    len: usize,
    (count_u, count_v, count_w): (usize, usize, usize),
    (knots_u, knots_v, knots_w): (&KnotVector, &KnotVector, &KnotVector),
    (degree_u, degree_v, degree_w): (usize, usize, usize),
) -> Result<()> {
    if count_u * count_v * count_w != len {
        return Err(SplineError::count_mismatch(
            "control lattice",
            count_u * count_v * count_w,
            len,
        ));
    }
    for (count, degree) in [
        (count_u, degree_u),
        (count_v, degree_v),
        (count_w, degree_w),
    ] {
        if count < degree + 1 {
            return Err(SplineError::insufficient_points(degree + 1, count));
        }
    }
    for (knots, count, degree) in [
        (knots_u, count_u, degree_u),
        (knots_v, count_v, degree_v),
        (knots_w, count_w, degree_w),
    ] {
        if knots.len() != count + degree + 1 {
            return Err(SplineError::KnotVectorSize {
                expected: count + degree + 1,
                actual: knots.len(),
            });
        }
    }
    Ok(())
}

impl BSplineVolume {
    /// Create a B-spline volume with explicit knot vectors.
    ///
    /// `control_points` is the flat lattice with w varying fastest, then v,
    /// then u; `counts` its dimensions per direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the lattice size, per-direction counts, or knot
    /// vector lengths are inconsistent.
    pub fn new(
        control_points: Vec<Point3<f64>>,
        counts: (usize, usize, usize),
        knots: (KnotVector, KnotVector, KnotVector),
        degrees: (usize, usize, usize),
    ) -> Result<Self> {
        validate_lattice(
            control_points.len(),
            counts,
            (&knots.0, &knots.1, &knots.2),
            degrees,
        )?;
        Ok(Self {
            control_points,
            count_u: counts.0,
            count_v: counts.1,
            count_w: counts.2,
            knots_u: knots.0,
            knots_v: knots.1,
            knots_w: knots.2,
            degree_u: degrees.0,
            degree_v: degrees.1,
            degree_w: degrees.2,
            span_search: SpanSearch::default(),
        })
    }

    /// Create a clamped volume with uniform interior knots on `[0, 1]` in
    /// every direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the lattice is too small for the degrees.
    pub fn clamped(
        control_points: Vec<Point3<f64>>,
        counts: (usize, usize, usize),
        degrees: (usize, usize, usize),
    ) -> Result<Self> {
        let knots_u = KnotVector::clamped_uniform(degrees.0, counts.0)?;
        let knots_v = KnotVector::clamped_uniform(degrees.1, counts.1)?;
        let knots_w = KnotVector::clamped_uniform(degrees.2, counts.2)?;
        Self::new(control_points, counts, (knots_u, knots_v, knots_w), degrees)
    }

    fn from_parts(
        control_points: Vec<Point3<f64>>,
        counts: (usize, usize, usize),
        knots: (KnotVector, KnotVector, KnotVector),
        degrees: (usize, usize, usize),
        span_search: SpanSearch,
    ) -> Self {
        debug_assert_eq!(control_points.len(), counts.0 * counts.1 * counts.2);
        Self {
            control_points,
            count_u: counts.0,
            count_v: counts.1,
            count_w: counts.2,
            knots_u: knots.0,
            knots_v: knots.1,
            knots_w: knots.2,
            degree_u: degrees.0,
            degree_v: degrees.1,
            degree_w: degrees.2,
            span_search,
        }
    }

    /// Get the flat control point lattice.
    #[must_use]
    pub fn control_points(&self) -> &[Point3<f64>] {
        &self.control_points
    }

    /// Get the control point at lattice position `(i, j, k)`.
    #[must_use]
    pub fn control_point(&self, i: usize, j: usize, k: usize) -> &Point3<f64> {
        &self.control_points[(i * self.count_v + j) * self.count_w + k]
    }

    /// Get the lattice size `(count_u, count_v, count_w)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.count_u, self.count_v, self.count_w)
    }

    /// Get the degrees `(degree_u, degree_v, degree_w)`.
    #[must_use]
    pub fn degrees(&self) -> (usize, usize, usize) {
        (self.degree_u, self.degree_v, self.degree_w)
    }

    /// Get the knot vector for a direction.
    #[must_use]
    pub fn knots(&self, direction: VolumeDirection) -> &KnotVector {
        match direction {
            VolumeDirection::U => &self.knots_u,
            VolumeDirection::V => &self.knots_v,
            VolumeDirection::W => &self.knots_w,
        }
    }

    /// Get the parameter domains per direction.
    #[must_use]
    pub fn domain(&self) -> ((f64, f64), (f64, f64), (f64, f64)) {
        (
            self.knots_u.domain(self.degree_u),
            self.knots_v.domain(self.degree_v),
            self.knots_w.domain(self.degree_w),
        )
    }

    /// Evaluate the volume at `(u, v, w)`.
    ///
    /// All three parameters are clamped to their knot domains.
    #[must_use]
    pub fn point_at(&self, u: f64, v: f64, w: f64) -> Point3<f64> {
        let (dom_u, dom_v, dom_w) = self.domain();
        let u = u.clamp(dom_u.0, dom_u.1);
        let v = v.clamp(dom_v.0, dom_v.1);
        let w = w.clamp(dom_w.0, dom_w.1);

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
        let span_w = find_span(
            self.degree_w,
            self.knots_w.as_slice(),
            self.count_w,
            w,
            self.span_search,
        );
        let bu = basis_functions(self.degree_u, self.knots_u.as_slice(), span_u, u);
        let bv = basis_functions(self.degree_v, self.knots_v.as_slice(), span_v, v);
        let bw = basis_functions(self.degree_w, self.knots_w.as_slice(), span_w, w);

        let mut acc = Vector3::zeros();
        for (i, &nu) in bu.iter().enumerate() {
            let row = span_u - self.degree_u + i;
            for (j, &nv) in bv.iter().enumerate() {
                let col = span_v - self.degree_v + j;
                for (k, &nw) in bw.iter().enumerate() {
                    let layer = span_w - self.degree_w + k;
                    let idx = (row * self.count_v + col) * self.count_w + layer;
                    acc += self.control_points[idx].coords * (nu * nv * nw);
                }
            }
        }
        Point3::from(acc)
    }

    /// Sample the volume on a regular `(nu, nv, nw)` parameter lattice,
    /// flat with the w samples varying fastest, then v, then u.
    #[must_use]
    pub fn sample_regular(&self, nu: usize, nv: usize, nw: usize) -> Vec<Point3<f64>> {
        let nu = nu.max(2);
        let nv = nv.max(2);
        let nw = nw.max(2);
        let (dom_u, dom_v, dom_w) = self.domain();

        let mut out = Vec::with_capacity(nu * nv * nw);
        for i in 0..nu {
            let u = dom_u.0 + (dom_u.1 - dom_u.0) * i as f64 / (nu - 1) as f64;
            for j in 0..nv {
                let v = dom_v.0 + (dom_v.1 - dom_v.0) * j as f64 / (nv - 1) as f64;
                for k in 0..nw {
                    let w = dom_w.0 + (dom_w.1 - dom_w.0) * k as f64 / (nw - 1) as f64;
                    out.push(self.point_at(u, v, w));
                }
            }
        }
        out
    }

    /// Volume derivative evaluation is not defined in this crate.
    ///
    /// # Errors
    ///
    /// Always returns [`SplineError::Unsupported`].
    pub fn derivatives(
        &self,
        _u: f64,
        _v: f64,
        _w: f64,
        _order: usize,
    ) -> Result<Vec<Vec<Vec<Vector3<f64>>>>> {
        Err(SplineError::unsupported("volume derivatives"))
    }

    fn direction_params(&self, direction: VolumeDirection) -> (usize, &KnotVector) {
        match direction {
            VolumeDirection::U => (self.degree_u, &self.knots_u),
            VolumeDirection::V => (self.degree_v, &self.knots_v),
            VolumeDirection::W => (self.degree_w, &self.knots_w),
        }
    }

    fn replace_knots(
        &self,
        direction: VolumeDirection,
        kv: KnotVector,
    ) -> (KnotVector, KnotVector, KnotVector) {
        match direction {
            VolumeDirection::U => (kv, self.knots_v.clone(), self.knots_w.clone()),
            VolumeDirection::V => (self.knots_u.clone(), kv, self.knots_w.clone()),
            VolumeDirection::W => (self.knots_u.clone(), self.knots_v.clone(), kv),
        }
    }

    /// Insert the knot `t` into the given direction `num` times.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::BSplineCurve::insert_knot`].
    pub fn insert_knot(&self, direction: VolumeDirection, t: f64, num: usize) -> Result<Self> {
        let (degree, knots) = self.direction_params(direction);
        let counts = self.counts();
        let rows = extract_rows(&self.control_points, counts, direction);

        let mut new_knots = None;
        let mut new_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let (kv, pts) = insert_knot_core(degree, knots, row, t, num)?;
            new_knots = Some(kv);
            new_rows.push(pts);
        }
        let kv = new_knots.ok_or_else(|| SplineError::count_mismatch("control lattice", 1, 0))?;

        let (pts, new_counts) = assemble_rows(&new_rows, counts, direction);
        Ok(Self::from_parts(
            pts,
            new_counts,
            self.replace_knots(direction, kv),
            self.degrees(),
            self.span_search,
        ))
    }

    /// Remove the knot `t` from the given direction up to `num` times.
    ///
    /// All lattice rows must agree on the removal count, as in
    /// [`crate::BSplineSurface::remove_knot`]; returns the achieved count.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::BSplineCurve::remove_knot`].
    pub fn remove_knot(
        &self,
        direction: VolumeDirection,
        t: f64,
        num: usize,
    ) -> Result<(Self, usize)> {
        let (degree, knots) = self.direction_params(direction);
        let counts = self.counts();
        let rows = extract_rows(&self.control_points, counts, direction);
        let (kv, new_rows, removed) = remove_rows(degree, knots, &rows, t, num)?;
        let (pts, new_counts) = assemble_rows(&new_rows, counts, direction);
        Ok((
            Self::from_parts(
                pts,
                new_counts,
                self.replace_knots(direction, kv),
                self.degrees(),
                self.span_search,
            ),
            removed,
        ))
    }

    /// Insert a list of knots into a direction in one refinement pass.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::BSplineCurve::refine_knots`].
    pub fn refine_knots(&self, direction: VolumeDirection, insert: &[f64]) -> Result<Self> {
        let (degree, knots) = self.direction_params(direction);
        let counts = self.counts();
        let rows = extract_rows(&self.control_points, counts, direction);

        let mut new_knots = None;
        let mut new_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let (kv, pts) = refine_knots_core(degree, knots, row, insert)?;
            new_knots = Some(kv);
            new_rows.push(pts);
        }
        let kv = new_knots.ok_or_else(|| SplineError::count_mismatch("control lattice", 1, 0))?;

        let (pts, new_counts) = assemble_rows(&new_rows, counts, direction);
        Ok(Self::from_parts(
            pts,
            new_counts,
            self.replace_knots(direction, kv),
            self.degrees(),
            self.span_search,
        ))
    }

    /// Refine a direction by recursive midpoint subdivision.
    ///
    /// # Errors
    ///
    /// Fails for density 0.
    pub fn refine_density(&self, direction: VolumeDirection, density: usize) -> Result<Self> {
        let (degree, knots) = self.direction_params(direction);
        let midpoints = density_midpoints(degree, knots, density)?;
        self.refine_knots(direction, &midpoints)
    }

    /// Volume degree elevation is not defined in this crate.
    ///
    /// # Errors
    ///
    /// Always returns [`SplineError::Unsupported`].
    pub fn elevate_degree(&self, _direction: VolumeDirection, _num: usize) -> Result<Self> {
        Err(SplineError::unsupported("volume degree elevation"))
    }

    /// Volume degree reduction is not defined in this crate.
    ///
    /// # Errors
    ///
    /// Always returns [`SplineError::Unsupported`].
    pub fn reduce_degree(&self, _direction: VolumeDirection) -> Result<Self> {
        Err(SplineError::unsupported("volume degree reduction"))
    }

    /// A copy of this volume with every knot vector rescaled onto `[0, 1]`.
    #[must_use]
    pub fn normalize_knots(&self) -> Self {
        Self::from_parts(
            self.control_points.clone(),
            self.counts(),
            (
                self.knots_u.normalized(),
                self.knots_v.normalized(),
                self.knots_w.normalized(),
            ),
            self.degrees(),
            self.span_search,
        )
    }

    /// Axis-aligned bounding box of the control points.
    #[must_use]
    pub fn control_bounds(&self) -> (Point3<f64>, Point3<f64>) {
        crate::curve::control_bounds(&self.control_points)
    }

    /// Convert to a rational volume with all weights 1.
    #[must_use]
    pub fn to_rational(&self) -> NurbsVolume {
        let pts = self
            .control_points
            .iter()
            .map(|p| Point4::new(p.x, p.y, p.z, 1.0))
            .collect();
        NurbsVolume {
            control_points: pts,
            count_u: self.count_u,
            count_v: self.count_v,
            count_w: self.count_w,
            knots_u: self.knots_u.clone(),
            knots_v: self.knots_v.clone(),
            knots_w: self.knots_w.clone(),
            degree_u: self.degree_u,
            degree_v: self.degree_v,
            degree_w: self.degree_w,
            span_search: self.span_search,
        }
    }
}

/// A NURBS (rational B-spline) volume.
///
/// Homogeneous control lattice with the same layout as
/// [`BSplineVolume`]. Point evaluation divides the weight back out;
/// rational volume derivatives and degree change are unsupported and fail
/// loudly.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NurbsVolume {
    /// Homogeneous control point lattice, flat, w fastest.
    control_points: Vec<Point4<f64>>,
    count_u: usize,
    count_v: usize,
    count_w: usize,
    knots_u: KnotVector,
    knots_v: KnotVector,
    knots_w: KnotVector,
    degree_u: usize,
    degree_v: usize,
    degree_w: usize,
    span_search: SpanSearch,
}

impl NurbsVolume {
    /// Create a NURBS volume from cartesian control points and weights.
    ///
    /// # Errors
    ///
    /// Returns an error for a weight/lattice mismatch, non-positive
    /// weights, or inconsistent lattice dimensions and knot vectors.
    pub fn new(
        control_points: Vec<Point3<f64>>,
        weights: Vec<f64>,
        counts: (usize, usize, usize),
        knots: (KnotVector, KnotVector, KnotVector),
        degrees: (usize, usize, usize),
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
        validate_lattice(
            control_points.len(),
            counts,
            (&knots.0, &knots.1, &knots.2),
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
            count_w: counts.2,
            knots_u: knots.0,
            knots_v: knots.1,
            knots_w: knots.2,
            degree_u: degrees.0,
            degree_v: degrees.1,
            degree_w: degrees.2,
            span_search: SpanSearch::default(),
        })
    }

    /// Create a clamped NURBS volume with uniform interior knots.
    ///
    /// # Errors
    ///
    /// Same conditions as [`NurbsVolume::new`].
    pub fn clamped(
        control_points: Vec<Point3<f64>>,
        weights: Vec<f64>,
        counts: (usize, usize, usize),
        degrees: (usize, usize, usize),
    ) -> Result<Self> {
        let knots_u = KnotVector::clamped_uniform(degrees.0, counts.0)?;
        let knots_v = KnotVector::clamped_uniform(degrees.1, counts.1)?;
        let knots_w = KnotVector::clamped_uniform(degrees.2, counts.2)?;
        Self::new(
            control_points,
            weights,
            counts,
            (knots_u, knots_v, knots_w),
            degrees,
        )
    }

    fn from_parts(
        control_points: Vec<Point4<f64>>,
        counts: (usize, usize, usize),
        knots: (KnotVector, KnotVector, KnotVector),
        degrees: (usize, usize, usize),
        span_search: SpanSearch,
    ) -> Self {
        debug_assert_eq!(control_points.len(), counts.0 * counts.1 * counts.2);
        Self {
            control_points,
            count_u: counts.0,
            count_v: counts.1,
            count_w: counts.2,
            knots_u: knots.0,
            knots_v: knots.1,
            knots_w: knots.2,
            degree_u: degrees.0,
            degree_v: degrees.1,
            degree_w: degrees.2,
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

    /// Get the lattice size `(count_u, count_v, count_w)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.count_u, self.count_v, self.count_w)
    }

    /// Get the degrees `(degree_u, degree_v, degree_w)`.
    #[must_use]
    pub fn degrees(&self) -> (usize, usize, usize) {
        (self.degree_u, self.degree_v, self.degree_w)
    }

    /// Get the knot vector for a direction.
    #[must_use]
    pub fn knots(&self, direction: VolumeDirection) -> &KnotVector {
        match direction {
            VolumeDirection::U => &self.knots_u,
            VolumeDirection::V => &self.knots_v,
            VolumeDirection::W => &self.knots_w,
        }
    }

    /// Get the parameter domains per direction.
    #[must_use]
    pub fn domain(&self) -> ((f64, f64), (f64, f64), (f64, f64)) {
        (
            self.knots_u.domain(self.degree_u),
            self.knots_v.domain(self.degree_v),
            self.knots_w.domain(self.degree_w),
        )
    }

    /// Evaluate the volume at `(u, v, w)` with the perspective division.
    #[must_use]
    pub fn point_at(&self, u: f64, v: f64, w: f64) -> Point3<f64> {
        let (dom_u, dom_v, dom_w) = self.domain();
        let u = u.clamp(dom_u.0, dom_u.1);
        let v = v.clamp(dom_v.0, dom_v.1);
        let w = w.clamp(dom_w.0, dom_w.1);

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
        let span_w = find_span(
            self.degree_w,
            self.knots_w.as_slice(),
            self.count_w,
            w,
            self.span_search,
        );
        let bu = basis_functions(self.degree_u, self.knots_u.as_slice(), span_u, u);
        let bv = basis_functions(self.degree_v, self.knots_v.as_slice(), span_v, v);
        let bw = basis_functions(self.degree_w, self.knots_w.as_slice(), span_w, w);

        let mut acc = Vector4::zeros();
        for (i, &nu) in bu.iter().enumerate() {
            let row = span_u - self.degree_u + i;
            for (j, &nv) in bv.iter().enumerate() {
                let col = span_v - self.degree_v + j;
                for (k, &nw) in bw.iter().enumerate() {
                    let layer = span_w - self.degree_w + k;
                    let idx = (row * self.count_v + col) * self.count_w + layer;
                    acc += self.control_points[idx].coords * (nu * nv * nw);
                }
            }
        }
        Point3::new(acc.x / acc.w, acc.y / acc.w, acc.z / acc.w)
    }

    /// Sample the volume on a regular parameter lattice (w fastest).
    #[must_use]
    pub fn sample_regular(&self, nu: usize, nv: usize, nw: usize) -> Vec<Point3<f64>> {
        let nu = nu.max(2);
        let nv = nv.max(2);
        let nw = nw.max(2);
        let (dom_u, dom_v, dom_w) = self.domain();

        let mut out = Vec::with_capacity(nu * nv * nw);
        for i in 0..nu {
            let u = dom_u.0 + (dom_u.1 - dom_u.0) * i as f64 / (nu - 1) as f64;
            for j in 0..nv {
                let v = dom_v.0 + (dom_v.1 - dom_v.0) * j as f64 / (nv - 1) as f64;
                for k in 0..nw {
                    let w = dom_w.0 + (dom_w.1 - dom_w.0) * k as f64 / (nw - 1) as f64;
                    out.push(self.point_at(u, v, w));
                }
            }
        }
        out
    }

    /// Rational volume derivatives are not defined in this crate.
    ///
    /// # Errors
    ///
    /// Always returns [`SplineError::Unsupported`].
    pub fn derivatives(
        &self,
        _u: f64,
        _v: f64,
        _w: f64,
        _order: usize,
    ) -> Result<Vec<Vec<Vec<Vector3<f64>>>>> {
        Err(SplineError::unsupported("volume rational derivatives"))
    }

    fn direction_params(&self, direction: VolumeDirection) -> (usize, &KnotVector) {
        match direction {
            VolumeDirection::U => (self.degree_u, &self.knots_u),
            VolumeDirection::V => (self.degree_v, &self.knots_v),
            VolumeDirection::W => (self.degree_w, &self.knots_w),
        }
    }

    fn replace_knots(
        &self,
        direction: VolumeDirection,
        kv: KnotVector,
    ) -> (KnotVector, KnotVector, KnotVector) {
        match direction {
            VolumeDirection::U => (kv, self.knots_v.clone(), self.knots_w.clone()),
            VolumeDirection::V => (self.knots_u.clone(), kv, self.knots_w.clone()),
            VolumeDirection::W => (self.knots_u.clone(), self.knots_v.clone(), kv),
        }
    }

    /// Insert the knot `t` into the given direction `num` times on the
    /// homogeneous lattice.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::NurbsCurve::insert_knot`].
    pub fn insert_knot(&self, direction: VolumeDirection, t: f64, num: usize) -> Result<Self> {
        let (degree, knots) = self.direction_params(direction);
        let counts = self.counts();
        let rows = extract_rows(&self.control_points, counts, direction);

        let mut new_knots = None;
        let mut new_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let (kv, pts) = insert_knot_core(degree, knots, row, t, num)?;
            new_knots = Some(kv);
            new_rows.push(pts);
        }
        let kv = new_knots.ok_or_else(|| SplineError::count_mismatch("control lattice", 1, 0))?;

        let (pts, new_counts) = assemble_rows(&new_rows, counts, direction);
        Ok(Self::from_parts(
            pts,
            new_counts,
            self.replace_knots(direction, kv),
            self.degrees(),
            self.span_search,
        ))
    }

    /// Remove the knot `t` from the given direction up to `num` times.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::NurbsCurve::remove_knot`].
    pub fn remove_knot(
        &self,
        direction: VolumeDirection,
        t: f64,
        num: usize,
    ) -> Result<(Self, usize)> {
        let (degree, knots) = self.direction_params(direction);
        let counts = self.counts();
        let rows = extract_rows(&self.control_points, counts, direction);
        let (kv, new_rows, removed) = remove_rows(degree, knots, &rows, t, num)?;
        let (pts, new_counts) = assemble_rows(&new_rows, counts, direction);
        Ok((
            Self::from_parts(
                pts,
                new_counts,
                self.replace_knots(direction, kv),
                self.degrees(),
                self.span_search,
            ),
            removed,
        ))
    }

    /// Insert a list of knots into a direction in one refinement pass.
    ///
    /// # Errors
    ///
    /// Same per-row conditions as [`crate::NurbsCurve::refine_knots`].
    pub fn refine_knots(&self, direction: VolumeDirection, insert: &[f64]) -> Result<Self> {
        let (degree, knots) = self.direction_params(direction);
        let counts = self.counts();
        let rows = extract_rows(&self.control_points, counts, direction);

        let mut new_knots = None;
        let mut new_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let (kv, pts) = refine_knots_core(degree, knots, row, insert)?;
            new_knots = Some(kv);
            new_rows.push(pts);
        }
        let kv = new_knots.ok_or_else(|| SplineError::count_mismatch("control lattice", 1, 0))?;

        let (pts, new_counts) = assemble_rows(&new_rows, counts, direction);
        Ok(Self::from_parts(
            pts,
            new_counts,
            self.replace_knots(direction, kv),
            self.degrees(),
            self.span_search,
        ))
    }

    /// Refine a direction by recursive midpoint subdivision.
    ///
    /// # Errors
    ///
    /// Fails for density 0.
    pub fn refine_density(&self, direction: VolumeDirection, density: usize) -> Result<Self> {
        let (degree, knots) = self.direction_params(direction);
        let midpoints = density_midpoints(degree, knots, density)?;
        self.refine_knots(direction, &midpoints)
    }

    /// Volume degree elevation is not defined in this crate.
    ///
    /// # Errors
    ///
    /// Always returns [`SplineError::Unsupported`].
    pub fn elevate_degree(&self, _direction: VolumeDirection, _num: usize) -> Result<Self> {
        Err(SplineError::unsupported("volume degree elevation"))
    }

    /// Volume degree reduction is not defined in this crate.
    ///
    /// # Errors
    ///
    /// Always returns [`SplineError::Unsupported`].
    pub fn reduce_degree(&self, _direction: VolumeDirection) -> Result<Self> {
        Err(SplineError::unsupported("volume degree reduction"))
    }

    /// A copy of this volume with every knot vector rescaled onto `[0, 1]`.
    #[must_use]
    pub fn normalize_knots(&self) -> Self {
        Self::from_parts(
            self.control_points.clone(),
            self.counts(),
            (
                self.knots_u.normalized(),
                self.knots_v.normalized(),
                self.knots_w.normalized(),
            ),
            self.degrees(),
            self.span_search,
        )
    }

    /// Split into the non-rational volume and the separate weight vector.
    #[must_use]
    pub fn to_nonrational(&self) -> (BSplineVolume, Vec<f64>) {
        let volume = BSplineVolume::from_parts(
            self.control_points(),
            (self.count_u, self.count_v, self.count_w),
            (
                self.knots_u.clone(),
                self.knots_v.clone(),
                self.knots_w.clone(),
            ),
            (self.degree_u, self.degree_v, self.degree_w),
            self.span_search,
        );
        (volume, self.weights())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Trilinear unit cube, slightly sheared in z so the directions are
    /// distinguishable.
    fn sheared_cube() -> BSplineVolume {
        let mut pts = Vec::new();
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    pts.push(Point3::new(
                        i as f64,
                        j as f64,
                        k as f64 + 0.5 * i as f64,
                    ));
                }
            }
        }
        BSplineVolume::clamped(pts, (2, 2, 2), (1, 1, 1)).unwrap()
    }

    /// A 4x3x2 lattice, cubic/quadratic/linear.
    fn mixed_volume() -> BSplineVolume {
        let mut pts = Vec::new();
        for i in 0..4 {
            for j in 0..3 {
                for k in 0..2 {
                    let z = k as f64 + ((i * 5 + j * 2) % 3) as f64 * 0.25;
                    pts.push(Point3::new(i as f64, j as f64, z));
                }
            }
        }
        BSplineVolume::clamped(pts, (4, 3, 2), (3, 2, 1)).unwrap()
    }

    #[test]
    fn test_lattice_validation() {
        let pts = vec![Point3::origin(); 7];
        let err = BSplineVolume::clamped(pts, (2, 2, 2), (1, 1, 1)).unwrap_err();
        assert!(matches!(err, SplineError::CountMismatch { expected: 8, actual: 7, .. }));
    }

    #[test]
    fn test_trilinear_evaluation() {
        let volume = sheared_cube();
        for i in 0..=4 {
            for j in 0..=4 {
                for k in 0..=4 {
                    let u = i as f64 / 4.0;
                    let v = j as f64 / 4.0;
                    let w = k as f64 / 4.0;
                    let p = volume.point_at(u, v, w);
                    assert_relative_eq!(p.x, u, epsilon = 1e-12);
                    assert_relative_eq!(p.y, v, epsilon = 1e-12);
                    assert_relative_eq!(p.z, w + 0.5 * u, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_corner_interpolation() {
        let volume = mixed_volume();
        assert_relative_eq!(
            volume.point_at(0.0, 0.0, 0.0).coords,
            volume.control_point(0, 0, 0).coords,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            volume.point_at(1.0, 1.0, 1.0).coords,
            volume.control_point(3, 2, 1).coords,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_sample_regular_ordering() {
        let volume = sheared_cube();
        let samples = volume.sample_regular(2, 2, 3);
        assert_eq!(samples.len(), 12);
        // w varies fastest: the first three samples share (u, v) = (0, 0).
        for k in 0..3 {
            assert_relative_eq!(samples[k].x, 0.0, epsilon = 1e-12);
            assert_relative_eq!(samples[k].y, 0.0, epsilon = 1e-12);
            assert_relative_eq!(samples[k].z, k as f64 / 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_insertion_invariance_every_direction() {
        let volume = mixed_volume();
        for (direction, t) in [
            (VolumeDirection::U, 0.5),
            (VolumeDirection::V, 0.4),
            (VolumeDirection::W, 0.6),
        ] {
            let refined = volume.insert_knot(direction, t, 1).unwrap();
            assert_eq!(refined.knots(direction).multiplicity(t), 1);

            for i in 0..=4 {
                for j in 0..=4 {
                    for k in 0..=4 {
                        let u = i as f64 / 4.0;
                        let v = j as f64 / 4.0;
                        let w = k as f64 / 4.0;
                        assert_relative_eq!(
                            volume.point_at(u, v, w).coords,
                            refined.point_at(u, v, w).coords,
                            epsilon = 1e-9
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_insertion_updates_counts() {
        let volume = mixed_volume();
        let refined = volume.insert_knot(VolumeDirection::U, 0.5, 1).unwrap();
        assert_eq!(refined.counts(), (5, 3, 2));
        let refined = refined.insert_knot(VolumeDirection::V, 0.5, 1).unwrap();
        assert_eq!(refined.counts(), (5, 4, 2));
        let refined = refined.insert_knot(VolumeDirection::W, 0.5, 1).unwrap();
        assert_eq!(refined.counts(), (5, 4, 3));
    }

    #[test]
    fn test_removal_roundtrip() {
        let volume = mixed_volume();
        let inserted = volume.insert_knot(VolumeDirection::U, 0.3, 1).unwrap();
        let (removed, count) = inserted.remove_knot(VolumeDirection::U, 0.3, 1).unwrap();

        assert_eq!(count, 1);
        assert_eq!(removed.counts(), volume.counts());
        for (a, b) in removed
            .control_points()
            .iter()
            .zip(volume.control_points().iter())
        {
            assert_relative_eq!(a.coords, b.coords, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_refinement_invariance() {
        let volume = mixed_volume();
        let refined = volume
            .refine_knots(VolumeDirection::U, &[0.25, 0.75])
            .unwrap();
        assert_eq!(refined.counts(), (6, 3, 2));

        for i in 0..=4 {
            for j in 0..=4 {
                for k in 0..=2 {
                    let u = i as f64 / 4.0;
                    let v = j as f64 / 4.0;
                    let w = k as f64 / 2.0;
                    assert_relative_eq!(
                        volume.point_at(u, v, w).coords,
                        refined.point_at(u, v, w).coords,
                        epsilon = 1e-9
                    );
                }
            }
        }

        let dense = volume.refine_density(VolumeDirection::W, 1).unwrap();
        assert_eq!(dense.counts(), (4, 3, 3));
    }

    #[test]
    fn test_unsupported_operations_fail_loudly() {
        let volume = sheared_cube();
        assert!(volume.derivatives(0.5, 0.5, 0.5, 1).unwrap_err().is_unsupported());
        assert!(volume
            .elevate_degree(VolumeDirection::U, 1)
            .unwrap_err()
            .is_unsupported());
        assert!(volume
            .reduce_degree(VolumeDirection::V)
            .unwrap_err()
            .is_unsupported());

        let rational = volume.to_rational();
        assert!(rational
            .derivatives(0.5, 0.5, 0.5, 1)
            .unwrap_err()
            .is_unsupported());
        assert!(rational
            .elevate_degree(VolumeDirection::W, 1)
            .unwrap_err()
            .is_unsupported());
    }

    #[test]
    fn test_rational_roundtrip_and_unit_weights() {
        let volume = mixed_volume();
        let rational = volume.to_rational();

        for i in 0..=3 {
            for j in 0..=3 {
                for k in 0..=3 {
                    let u = i as f64 / 3.0;
                    let v = j as f64 / 3.0;
                    let w = k as f64 / 3.0;
                    assert_relative_eq!(
                        volume.point_at(u, v, w).coords,
                        rational.point_at(u, v, w).coords,
                        epsilon = 1e-12
                    );
                }
            }
        }

        let (back, weights) = rational.to_nonrational();
        assert!(weights.iter().all(|&w| w == 1.0));
        assert_eq!(back.counts(), volume.counts());
        for (a, b) in back
            .control_points()
            .iter()
            .zip(volume.control_points().iter())
        {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_rational_insertion_invariance() {
        let mut pts = Vec::new();
        let mut weights = Vec::new();
        for i in 0..3 {
            for j in 0..2 {
                for k in 0..2 {
                    pts.push(Point3::new(i as f64, j as f64, k as f64));
                    weights.push(if i == 1 { 2.0 } else { 1.0 });
                }
            }
        }
        let volume = NurbsVolume::clamped(pts, weights, (3, 2, 2), (2, 1, 1)).unwrap();
        let refined = volume.insert_knot(VolumeDirection::U, 0.5, 1).unwrap();

        for i in 0..=4 {
            for j in 0..=2 {
                for k in 0..=2 {
                    let u = i as f64 / 4.0;
                    let v = j as f64 / 2.0;
                    let w = k as f64 / 2.0;
                    assert_relative_eq!(
                        volume.point_at(u, v, w).coords,
                        refined.point_at(u, v, w).coords,
                        epsilon = 1e-9
                    );
                }
            }
        }
    }
}
