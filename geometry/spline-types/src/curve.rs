//! B-spline and NURBS curves.
//!
//! [`BSplineCurve`] is the non-rational piecewise-polynomial curve;
//! [`NurbsCurve`] generalizes it with per-control-point weights stored in
//! homogeneous coordinates, which lets it represent conic sections exactly.
//! Both expose the same evaluation and knot/degree manipulation surface;
//! the rational type runs every structural algorithm on its weighted
//! coordinates and divides the weight back out on evaluation.

use nalgebra::{Point3, Point4, Vector3, Vector4};
use tracing::warn;

use crate::basis::{basis_function_derivatives, basis_functions, find_span, SpanSearch};
use crate::degree_ops::{
    binomial, decompose_core, elevate_degree_core, link_core, reduce_degree_core,
};
use crate::hodograph::curve_deriv_ctrlpts;
use crate::knot_ops::{
    density_midpoints, insert_knot_core, refine_knots_core, remove_knot_core, split_core,
    REMOVAL_TOLERANCE,
};
use crate::knots::KnotVector;
use crate::{Result, SplineError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A non-rational B-spline curve.
///
/// Defined by a degree, a knot vector of length
/// `control_points.len() + degree + 1`, and the control points themselves.
/// All structural operations (knot insertion, removal, refinement, degree
/// change) return a new curve and leave the receiver untouched.
///
/// Parameters live in the knot vector's domain `[knots[p], knots[m-p-1]]`;
/// evaluation clamps to it.
///
/// # Example
///
/// ```
/// use spline_types::BSplineCurve;
/// use nalgebra::Point3;
///
/// let curve = BSplineCurve::clamped(
///     vec![
///         Point3::new(0.0, 0.0, 0.0),
///         Point3::new(1.0, 2.0, 0.0),
///         Point3::new(3.0, 2.0, 0.0),
///         Point3::new(4.0, 0.0, 0.0),
///     ],
///     3,
/// ).unwrap();
///
/// let start = curve.point_at(0.0);
/// assert!((start.x - 0.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BSplineCurve {
    /// Control points.
    control_points: Vec<Point3<f64>>,
    /// Knot vector.
    knots: KnotVector,
    /// Degree of the curve.
    degree: usize,
    /// Knot span search strategy used during evaluation.
    span_search: SpanSearch,
}

impl BSplineCurve {
    /// Create a B-spline curve with an explicit knot vector.
    ///
    /// # Errors
    ///
    /// Returns an error if there are fewer than `degree + 1` control points
    /// or the knot vector length is not `control_points.len() + degree + 1`.
    pub fn new(control_points: Vec<Point3<f64>>, knots: KnotVector, degree: usize) -> Result<Self> {
        let n = control_points.len();
        if n < degree + 1 {
            return Err(SplineError::insufficient_points(degree + 1, n));
        }

        let expected = n + degree + 1;
        if knots.len() != expected {
            return Err(SplineError::KnotVectorSize {
                expected,
                actual: knots.len(),
            });
        }

        Ok(Self {
            control_points,
            knots,
            degree,
            span_search: SpanSearch::default(),
        })
    }

    /// Create a clamped B-spline with uniform interior knots on `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if there are fewer than `degree + 1` control points.
    pub fn clamped(control_points: Vec<Point3<f64>>, degree: usize) -> Result<Self> {
        let knots = KnotVector::clamped_uniform(degree, control_points.len())?;
        Self::new(control_points, knots, degree)
    }

    pub(crate) fn from_parts(
        control_points: Vec<Point3<f64>>,
        knots: KnotVector,
        degree: usize,
        span_search: SpanSearch,
    ) -> Self {
        debug_assert_eq!(knots.len(), control_points.len() + degree + 1);
        Self {
            control_points,
            knots,
            degree,
            span_search,
        }
    }

    /// Select the knot span search strategy used during evaluation.
    #[must_use]
    pub fn with_span_search(mut self, strategy: SpanSearch) -> Self {
        self.span_search = strategy;
        self
    }

    /// Get the control points.
    #[must_use]
    pub fn control_points(&self) -> &[Point3<f64>] {
        &self.control_points
    }

    /// Get the knot vector.
    #[must_use]
    pub fn knots(&self) -> &KnotVector {
        &self.knots
    }

    /// Get the degree.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Get the order (degree + 1).
    #[must_use]
    pub fn order(&self) -> usize {
        self.degree + 1
    }

    /// Get the number of control points.
    #[must_use]
    pub fn num_control_points(&self) -> usize {
        self.control_points.len()
    }

    /// Get the valid parameter domain `(u_min, u_max)`.
    #[must_use]
    pub fn domain(&self) -> (f64, f64) {
        self.knots.domain(self.degree)
    }

    fn clamp_param(&self, u: f64) -> f64 {
        let (min, max) = self.domain();
        u.clamp(min, max)
    }

    /// Evaluate the curve at parameter `u`.
    ///
    /// `u` is clamped to the knot domain.
    #[must_use]
    pub fn point_at(&self, u: f64) -> Point3<f64> {
        let u = self.clamp_param(u);
        let span = find_span(
            self.degree,
            self.knots.as_slice(),
            self.control_points.len(),
            u,
            self.span_search,
        );
        let basis = basis_functions(self.degree, self.knots.as_slice(), span, u);

        let mut acc = Vector3::zeros();
        for (i, &b) in basis.iter().enumerate() {
            acc += self.control_points[span - self.degree + i].coords * b;
        }
        Point3::from(acc)
    }

    /// Sample the curve at `n` parameters uniformly spaced over the domain.
    ///
    /// `n` is clamped to at least 2; the first and last samples sit on the
    /// domain boundaries.
    #[must_use]
    pub fn sample_regular(&self, n: usize) -> Vec<Point3<f64>> {
        let (start, stop) = self.domain();
        self.sample_params(start, stop, n)
    }

    /// Sample the curve at `n` parameters uniformly spaced over
    /// `[start, stop]`.
    ///
    /// # Errors
    ///
    /// Returns [`SplineError::ParameterOutOfDomain`] if the range leaves the
    /// knot domain or is reversed.
    pub fn sample_range(&self, start: f64, stop: f64, n: usize) -> Result<Vec<Point3<f64>>> {
        let (min, max) = self.domain();
        if start < min || start > max {
            return Err(SplineError::out_of_domain(start, (min, max)));
        }
        if stop < start || stop > max {
            return Err(SplineError::out_of_domain(stop, (start, max)));
        }
        Ok(self.sample_params(start, stop, n))
    }

    fn sample_params(&self, start: f64, stop: f64, n: usize) -> Vec<Point3<f64>> {
        let n = n.max(2);
        (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                self.point_at(start + (stop - start) * t)
            })
            .collect()
    }

    /// Evaluate the curve point and its derivatives up to `order`.
    ///
    /// Returns `ck[0..=order]` where `ck[0]` is the curve point (as a
    /// vector from the origin) and `ck[k]` the k-th derivative. Orders
    /// above the degree are zero vectors.
    #[must_use]
    pub fn derivatives(&self, u: f64, order: usize) -> Vec<Vector3<f64>> {
        let u = self.clamp_param(u);
        let du = order.min(self.degree);
        let span = find_span(
            self.degree,
            self.knots.as_slice(),
            self.control_points.len(),
            u,
            self.span_search,
        );
        let nders = basis_function_derivatives(self.degree, self.knots.as_slice(), span, u, du);

        let mut ck = vec![Vector3::zeros(); order + 1];
        for (k, row) in nders.iter().enumerate().take(du + 1) {
            for (j, &b) in row.iter().enumerate() {
                ck[k] += self.control_points[span - self.degree + j].coords * b;
            }
        }
        ck
    }

    /// Insert the knot `u` into the curve `num` times.
    ///
    /// Insertion changes the representation, not the shape.
    ///
    /// # Errors
    ///
    /// Fails if `u` is outside the domain or `num` plus the existing
    /// multiplicity exceeds the degree.
    pub fn insert_knot(&self, u: f64, num: usize) -> Result<Self> {
        let (knots, pts) = insert_knot_core(self.degree, &self.knots, &self.control_points, u, num)?;
        Ok(Self::from_parts(pts, knots, self.degree, self.span_search))
    }

    /// Remove the knot `u` from the curve up to `num` times.
    ///
    /// Removal is approximate: each repetition is committed only if the
    /// shape is preserved within a `1e-4` tolerance, and the remaining
    /// repetitions are skipped silently otherwise. The second return value
    /// is the number of removals that actually happened.
    ///
    /// # Errors
    ///
    /// Fails if `u` is not strictly inside the domain or `num` exceeds the
    /// knot's multiplicity.
    pub fn remove_knot(&self, u: f64, num: usize) -> Result<(Self, usize)> {
        let (knots, pts, removed) = remove_knot_core(
            self.degree,
            &self.knots,
            &self.control_points,
            u,
            num,
            REMOVAL_TOLERANCE,
        )?;
        Ok((
            Self::from_parts(pts, knots, self.degree, self.span_search),
            removed,
        ))
    }

    /// Insert a list of knots in one combined refinement pass.
    ///
    /// # Errors
    ///
    /// Fails if any knot is outside the domain or would exceed the degree
    /// in multiplicity.
    pub fn refine_knots(&self, insert: &[f64]) -> Result<Self> {
        let (knots, pts) = refine_knots_core(self.degree, &self.knots, &self.control_points, insert)?;
        Ok(Self::from_parts(pts, knots, self.degree, self.span_search))
    }

    /// Refine by recursive midpoint subdivision: density 1 inserts the
    /// midpoint of every knot span, density `d` recurses `d` times.
    ///
    /// # Errors
    ///
    /// Fails for density 0.
    pub fn refine_density(&self, density: usize) -> Result<Self> {
        let midpoints = density_midpoints(self.degree, &self.knots, density)?;
        self.refine_knots(&midpoints)
    }

    /// Split the curve at parameter `u` into two curves meeting at the
    /// split point.
    ///
    /// # Errors
    ///
    /// Fails if `u` is not strictly inside the domain.
    pub fn split_at(&self, u: f64) -> Result<(Self, Self)> {
        let ((lk, lp), (rk, rp)) = split_core(self.degree, &self.knots, &self.control_points, u)?;
        Ok((
            Self::from_parts(lp, lk, self.degree, self.span_search),
            Self::from_parts(rp, rk, self.degree, self.span_search),
        ))
    }

    /// Decompose the curve into its Bezier segments.
    ///
    /// The input is unchanged; each returned segment spans its true
    /// parametric interval.
    ///
    /// # Errors
    ///
    /// Fails for degree 0 or an unclamped knot vector.
    pub fn decompose(&self) -> Result<Vec<Self>> {
        let segments = decompose_core(self.degree, &self.knots, &self.control_points)?;
        Ok(segments
            .into_iter()
            .map(|(kv, pts)| Self::from_parts(pts, kv, self.degree, self.span_search))
            .collect())
    }

    /// Link a sequence of curves of equal degree into a single curve.
    ///
    /// The inverse of [`BSplineCurve::decompose`]: shared boundary control
    /// points are merged and the knot vectors are concatenated with
    /// accumulated domain offsets. With `validate` set, adjoining endpoints
    /// must coincide within `1e-7`.
    ///
    /// # Errors
    ///
    /// Fails on an empty list or (with validation) on an endpoint gap.
    pub fn link(curves: &[Self], validate: bool) -> Result<Self> {
        let Some(first) = curves.first() else {
            return Err(SplineError::invalid_knot_vector(
                "cannot link an empty segment list",
            ));
        };
        let segments: Vec<(KnotVector, Vec<Point3<f64>>)> = curves
            .iter()
            .map(|c| (c.knots.clone(), c.control_points.clone()))
            .collect();
        let (knots, pts) = link_core(&segments, first.degree, validate)?;
        Ok(Self::from_parts(pts, knots, first.degree, first.span_search))
    }

    /// Elevate the curve's degree by `num`.
    ///
    /// The curve is decomposed into Bezier segments, each segment is
    /// elevated with the binomial blending formula, the segments are linked
    /// back, and the seam knots introduced by decomposition are removed
    /// again. Evaluation-invariant.
    ///
    /// # Errors
    ///
    /// Propagates decomposition errors (degree 0, unclamped knots).
    pub fn elevate_degree(&self, num: usize) -> Result<Self> {
        let (degree, knots, pts) =
            elevate_degree_core(self.degree, &self.knots, &self.control_points, num)?;
        Ok(Self::from_parts(pts, knots, degree, self.span_search))
    }

    /// Reduce the curve's degree by one.
    ///
    /// Not guaranteed exact: the per-segment Bezier reduction carries no
    /// error bound, so the result may deviate from the input geometry.
    ///
    /// # Errors
    ///
    /// Fails for degree below 2.
    pub fn reduce_degree(&self) -> Result<Self> {
        let (degree, knots, pts) =
            reduce_degree_core(self.degree, &self.knots, &self.control_points)?;
        Ok(Self::from_parts(pts, knots, degree, self.span_search))
    }

    /// Control points of the derivative curves up to `order`, over the full
    /// control point range.
    ///
    /// Returns `pk[k][i]`, the `i`-th control point of the `k`-th
    /// derivative curve; row `k` has `num_control_points - k` entries.
    ///
    /// # Errors
    ///
    /// Fails if `order` exceeds the degree.
    pub fn derivative_control_points(&self, order: usize) -> Result<Vec<Vec<Point3<f64>>>> {
        if order > self.degree {
            return Err(SplineError::DegreeTooLow {
                degree: self.degree,
                min: order,
            });
        }
        let n = self.control_points.len() - 1;
        let pk = curve_deriv_ctrlpts(
            self.degree,
            self.knots.as_slice(),
            &self.control_points,
            order,
            0,
            n,
        );
        Ok(pk
            .into_iter()
            .enumerate()
            .map(|(k, row)| row.into_iter().take(n + 1 - k).collect())
            .collect())
    }

    /// The hodograph: the first-derivative curve as a geometry object.
    ///
    /// A degree-`p` curve yields a degree-`p-1` curve whose control points
    /// are the scaled forward differences of the original ones; the knot
    /// vector loses its outermost knot on each side.
    ///
    /// # Errors
    ///
    /// Fails for degree 0.
    pub fn hodograph(&self) -> Result<Self> {
        if self.degree == 0 {
            return Err(SplineError::DegreeTooLow {
                degree: 0,
                min: 1,
            });
        }

        let p = self.degree as f64;
        let kv = self.knots.as_slice();
        let n = self.control_points.len();

        let mut pts = Vec::with_capacity(n - 1);
        for i in 0..n - 1 {
            let denom = kv[i + self.degree + 1] - kv[i + 1];
            let factor = if denom.abs() < f64::EPSILON { 0.0 } else { p / denom };
            pts.push(Point3::from(
                (self.control_points[i + 1].coords - self.control_points[i].coords) * factor,
            ));
        }

        let knots = KnotVector::new_unchecked(kv[1..kv.len() - 1].to_vec());
        Ok(Self::from_parts(pts, knots, self.degree - 1, self.span_search))
    }

    /// Reverse the curve's parameterization.
    ///
    /// The control point order flips and the knot vector is mirrored about
    /// the domain; the traced shape is unchanged.
    #[must_use]
    pub fn reverse(&self) -> Self {
        let kv = self.knots.as_slice();
        let total = self.knots.first() + self.knots.last();
        let knots: Vec<f64> = kv.iter().rev().map(|&k| total - k).collect();
        let pts: Vec<Point3<f64>> = self.control_points.iter().rev().copied().collect();
        Self::from_parts(
            pts,
            KnotVector::new_unchecked(knots),
            self.degree,
            self.span_search,
        )
    }

    /// A copy of this curve with its knot vector rescaled onto `[0, 1]`.
    #[must_use]
    pub fn normalize_knots(&self) -> Self {
        Self::from_parts(
            self.control_points.clone(),
            self.knots.normalized(),
            self.degree,
            self.span_search,
        )
    }

    /// Axis-aligned bounding box of the control points.
    ///
    /// A conservative bound: the curve lies inside the convex hull of its
    /// control points.
    #[must_use]
    pub fn control_bounds(&self) -> (Point3<f64>, Point3<f64>) {
        control_bounds(&self.control_points)
    }

    /// Convert to a rational curve with all weights 1.
    ///
    /// The round trip through [`NurbsCurve::to_nonrational`] reproduces
    /// this curve exactly.
    #[must_use]
    pub fn to_rational(&self) -> NurbsCurve {
        let pts = self
            .control_points
            .iter()
            .map(|p| Point4::new(p.x, p.y, p.z, 1.0))
            .collect();
        NurbsCurve {
            control_points: pts,
            knots: self.knots.clone(),
            degree: self.degree,
            span_search: self.span_search,
        }
    }
}

/// A NURBS (rational B-spline) curve.
///
/// Control points are stored in homogeneous form `(x*w, y*w, z*w, w)` with
/// strictly positive weights. Every structural algorithm (insertion,
/// removal, refinement, degree change) runs on the homogeneous coordinates;
/// evaluation divides the weight back out.
///
/// With all weights 1 a NURBS curve evaluates identically to the
/// corresponding [`BSplineCurve`].
///
/// # Example
///
/// ```
/// use spline_types::NurbsCurve;
/// use nalgebra::Point3;
///
/// // Quarter circle as a quadratic NURBS arc
/// let w = std::f64::consts::FRAC_1_SQRT_2;
/// let arc = NurbsCurve::clamped(
///     vec![
///         Point3::new(1.0, 0.0, 0.0),
///         Point3::new(1.0, 1.0, 0.0),
///         Point3::new(0.0, 1.0, 0.0),
///     ],
///     vec![1.0, w, 1.0],
///     2,
/// ).unwrap();
///
/// let mid = arc.point_at(0.5);
/// assert!((mid.coords.norm() - 1.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NurbsCurve {
    /// Control points in homogeneous coordinates (weighted).
    control_points: Vec<Point4<f64>>,
    /// Knot vector.
    knots: KnotVector,
    /// Degree of the curve.
    degree: usize,
    /// Knot span search strategy used during evaluation.
    span_search: SpanSearch,
}

impl NurbsCurve {
    /// Create a NURBS curve from cartesian control points, weights, and an
    /// explicit knot vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights don't pair up with the control
    /// points, any weight is non-positive, there are fewer than
    /// `degree + 1` control points, or the knot vector length is wrong.
    pub fn new(
        control_points: Vec<Point3<f64>>,
        weights: Vec<f64>,
        knots: KnotVector,
        degree: usize,
    ) -> Result<Self> {
        let n = control_points.len();
        if weights.len() != n {
            return Err(SplineError::count_mismatch("weights", n, weights.len()));
        }
        for (index, &w) in weights.iter().enumerate() {
            if w <= 0.0 {
                return Err(SplineError::InvalidWeight { index, value: w });
            }
        }
        if n < degree + 1 {
            return Err(SplineError::insufficient_points(degree + 1, n));
        }
        let expected = n + degree + 1;
        if knots.len() != expected {
            return Err(SplineError::KnotVectorSize {
                expected,
                actual: knots.len(),
            });
        }

        let homogeneous = control_points
            .iter()
            .zip(weights.iter())
            .map(|(p, &w)| Point4::new(p.x * w, p.y * w, p.z * w, w))
            .collect();

        Ok(Self {
            control_points: homogeneous,
            knots,
            degree,
            span_search: SpanSearch::default(),
        })
    }

    /// Create a clamped NURBS curve with uniform interior knots on `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`NurbsCurve::new`].
    pub fn clamped(
        control_points: Vec<Point3<f64>>,
        weights: Vec<f64>,
        degree: usize,
    ) -> Result<Self> {
        let knots = KnotVector::clamped_uniform(degree, control_points.len())?;
        Self::new(control_points, weights, knots, degree)
    }

    /// Create a NURBS curve directly from homogeneous control points.
    ///
    /// # Errors
    ///
    /// Returns an error for non-positive weights, insufficient points, or a
    /// knot vector length mismatch.
    pub fn from_homogeneous(
        control_points: Vec<Point4<f64>>,
        knots: KnotVector,
        degree: usize,
    ) -> Result<Self> {
        for (index, p) in control_points.iter().enumerate() {
            if p.w <= 0.0 {
                return Err(SplineError::InvalidWeight {
                    index,
                    value: p.w,
                });
            }
        }
        let n = control_points.len();
        if n < degree + 1 {
            return Err(SplineError::insufficient_points(degree + 1, n));
        }
        let expected = n + degree + 1;
        if knots.len() != expected {
            return Err(SplineError::KnotVectorSize {
                expected,
                actual: knots.len(),
            });
        }

        Ok(Self {
            control_points,
            knots,
            degree,
            span_search: SpanSearch::default(),
        })
    }

    fn from_parts(
        control_points: Vec<Point4<f64>>,
        knots: KnotVector,
        degree: usize,
        span_search: SpanSearch,
    ) -> Self {
        debug_assert_eq!(knots.len(), control_points.len() + degree + 1);
        Self {
            control_points,
            knots,
            degree,
            span_search,
        }
    }

    /// Select the knot span search strategy used during evaluation.
    #[must_use]
    pub fn with_span_search(mut self, strategy: SpanSearch) -> Self {
        self.span_search = strategy;
        self
    }

    /// Get the control points in cartesian coordinates (weights divided
    /// out).
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

    /// Get the knot vector.
    #[must_use]
    pub fn knots(&self) -> &KnotVector {
        &self.knots
    }

    /// Get the degree.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Get the number of control points.
    #[must_use]
    pub fn num_control_points(&self) -> usize {
        self.control_points.len()
    }

    /// Get the valid parameter domain `(u_min, u_max)`.
    #[must_use]
    pub fn domain(&self) -> (f64, f64) {
        self.knots.domain(self.degree)
    }

    fn clamp_param(&self, u: f64) -> f64 {
        let (min, max) = self.domain();
        u.clamp(min, max)
    }

    /// Evaluate the curve at parameter `u`.
    ///
    /// Evaluates in homogeneous coordinates and performs the perspective
    /// division. `u` is clamped to the knot domain.
    #[must_use]
    pub fn point_at(&self, u: f64) -> Point3<f64> {
        let hp = self.homogeneous_point_at(u);
        Point3::new(hp.x / hp.w, hp.y / hp.w, hp.z / hp.w)
    }

    fn homogeneous_point_at(&self, u: f64) -> Point4<f64> {
        let u = self.clamp_param(u);
        let span = find_span(
            self.degree,
            self.knots.as_slice(),
            self.control_points.len(),
            u,
            self.span_search,
        );
        let basis = basis_functions(self.degree, self.knots.as_slice(), span, u);

        let mut acc = Vector4::zeros();
        for (i, &b) in basis.iter().enumerate() {
            acc += self.control_points[span - self.degree + i].coords * b;
        }
        Point4::from(acc)
    }

    /// Sample the curve at `n` parameters uniformly spaced over the domain.
    #[must_use]
    pub fn sample_regular(&self, n: usize) -> Vec<Point3<f64>> {
        let (start, stop) = self.domain();
        let n = n.max(2);
        (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                self.point_at(start + (stop - start) * t)
            })
            .collect()
    }

    /// Sample the curve at `n` parameters uniformly spaced over
    /// `[start, stop]`.
    ///
    /// # Errors
    ///
    /// Returns [`SplineError::ParameterOutOfDomain`] if the range leaves the
    /// knot domain or is reversed.
    pub fn sample_range(&self, start: f64, stop: f64, n: usize) -> Result<Vec<Point3<f64>>> {
        let (min, max) = self.domain();
        if start < min || start > max {
            return Err(SplineError::out_of_domain(start, (min, max)));
        }
        if stop < start || stop > max {
            return Err(SplineError::out_of_domain(stop, (start, max)));
        }
        let n = n.max(2);
        Ok((0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                self.point_at(start + (stop - start) * t)
            })
            .collect())
    }

    /// Evaluate the curve point and its rational derivatives up to `order`.
    ///
    /// Returns `ck[0..=order]` with `ck[0]` the curve point. Derivatives
    /// are computed in homogeneous space and corrected with the binomial
    /// quotient-rule recursion, so they are exact for the rational curve
    /// (not merely the weighted polynomial's derivatives).
    #[must_use]
    pub fn derivatives(&self, u: f64, order: usize) -> Vec<Vector3<f64>> {
        let u = self.clamp_param(u);
        let du = order.min(self.degree);
        let span = find_span(
            self.degree,
            self.knots.as_slice(),
            self.control_points.len(),
            u,
            self.span_search,
        );
        let nders = basis_function_derivatives(self.degree, self.knots.as_slice(), span, u, du);

        let mut hders = vec![Vector4::zeros(); order + 1];
        for (k, row) in nders.iter().enumerate().take(du + 1) {
            for (j, &b) in row.iter().enumerate() {
                hders[k] += self.control_points[span - self.degree + j].coords * b;
            }
        }

        let aders: Vec<Vector3<f64>> = hders
            .iter()
            .map(|d| Vector3::new(d.x, d.y, d.z))
            .collect();
        let wders: Vec<f64> = hders.iter().map(|d| d.w).collect();

        let mut ck: Vec<Vector3<f64>> = Vec::with_capacity(order + 1);
        for k in 0..=order {
            let mut v = aders[k];
            for i in 1..=k {
                v -= ck[k - i] * (binomial(k, i) * wders[i]);
            }
            ck.push(v / wders[0]);
        }
        ck
    }

    /// Insert the knot `u` into the curve `num` times.
    ///
    /// Runs on the homogeneous control points; shape-invariant.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BSplineCurve::insert_knot`].
    pub fn insert_knot(&self, u: f64, num: usize) -> Result<Self> {
        let (knots, pts) = insert_knot_core(self.degree, &self.knots, &self.control_points, u, num)?;
        Ok(Self::from_parts(pts, knots, self.degree, self.span_search))
    }

    /// Remove the knot `u` from the curve up to `num` times.
    ///
    /// Approximate, with the same silent-skip semantics as
    /// [`BSplineCurve::remove_knot`]. The tolerance check runs on the
    /// homogeneous coordinates.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BSplineCurve::remove_knot`].
    pub fn remove_knot(&self, u: f64, num: usize) -> Result<(Self, usize)> {
        let (knots, pts, removed) = remove_knot_core(
            self.degree,
            &self.knots,
            &self.control_points,
            u,
            num,
            REMOVAL_TOLERANCE,
        )?;
        Ok((
            Self::from_parts(pts, knots, self.degree, self.span_search),
            removed,
        ))
    }

    /// Insert a list of knots in one combined refinement pass.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BSplineCurve::refine_knots`].
    pub fn refine_knots(&self, insert: &[f64]) -> Result<Self> {
        let (knots, pts) = refine_knots_core(self.degree, &self.knots, &self.control_points, insert)?;
        Ok(Self::from_parts(pts, knots, self.degree, self.span_search))
    }

    /// Refine by recursive midpoint subdivision.
    ///
    /// # Errors
    ///
    /// Fails for density 0.
    pub fn refine_density(&self, density: usize) -> Result<Self> {
        let midpoints = density_midpoints(self.degree, &self.knots, density)?;
        self.refine_knots(&midpoints)
    }

    /// Split the curve at parameter `u`.
    ///
    /// # Errors
    ///
    /// Fails if `u` is not strictly inside the domain.
    pub fn split_at(&self, u: f64) -> Result<(Self, Self)> {
        let ((lk, lp), (rk, rp)) = split_core(self.degree, &self.knots, &self.control_points, u)?;
        Ok((
            Self::from_parts(lp, lk, self.degree, self.span_search),
            Self::from_parts(rp, rk, self.degree, self.span_search),
        ))
    }

    /// Decompose the curve into rational Bezier segments.
    ///
    /// # Errors
    ///
    /// Fails for degree 0 or an unclamped knot vector.
    pub fn decompose(&self) -> Result<Vec<Self>> {
        let segments = decompose_core(self.degree, &self.knots, &self.control_points)?;
        Ok(segments
            .into_iter()
            .map(|(kv, pts)| Self::from_parts(pts, kv, self.degree, self.span_search))
            .collect())
    }

    /// Link a sequence of rational curves of equal degree into one curve.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BSplineCurve::link`]; with validation the gap
    /// is measured in homogeneous coordinates.
    pub fn link(curves: &[Self], validate: bool) -> Result<Self> {
        let Some(first) = curves.first() else {
            return Err(SplineError::invalid_knot_vector(
                "cannot link an empty segment list",
            ));
        };
        let segments: Vec<(KnotVector, Vec<Point4<f64>>)> = curves
            .iter()
            .map(|c| (c.knots.clone(), c.control_points.clone()))
            .collect();
        let (knots, pts) = link_core(&segments, first.degree, validate)?;
        Ok(Self::from_parts(pts, knots, first.degree, first.span_search))
    }

    /// Elevate the curve's degree by `num`.
    ///
    /// The elevation runs on the homogeneous control points, so weights are
    /// blended consistently with the coordinates.
    ///
    /// # Errors
    ///
    /// Propagates decomposition errors.
    pub fn elevate_degree(&self, num: usize) -> Result<Self> {
        let (degree, knots, pts) =
            elevate_degree_core(self.degree, &self.knots, &self.control_points, num)?;
        Ok(Self::from_parts(pts, knots, degree, self.span_search))
    }

    /// Reduce the curve's degree by one.
    ///
    /// Approximate, like [`BSplineCurve::reduce_degree`].
    ///
    /// # Errors
    ///
    /// Fails for degree below 2.
    pub fn reduce_degree(&self) -> Result<Self> {
        let (degree, knots, pts) =
            reduce_degree_core(self.degree, &self.knots, &self.control_points)?;
        Ok(Self::from_parts(pts, knots, degree, self.span_search))
    }

    /// The hodograph is defined for non-rational geometry only; for a
    /// rational curve this logs a warning and returns the curve unchanged.
    #[must_use]
    pub fn hodograph(&self) -> Self {
        warn!("hodograph is undefined for rational curves; returning the input unchanged");
        self.clone()
    }

    /// Reverse the curve's parameterization.
    #[must_use]
    pub fn reverse(&self) -> Self {
        let kv = self.knots.as_slice();
        let total = self.knots.first() + self.knots.last();
        let knots: Vec<f64> = kv.iter().rev().map(|&k| total - k).collect();
        let pts: Vec<Point4<f64>> = self.control_points.iter().rev().copied().collect();
        Self::from_parts(
            pts,
            KnotVector::new_unchecked(knots),
            self.degree,
            self.span_search,
        )
    }

    /// A copy of this curve with its knot vector rescaled onto `[0, 1]`.
    #[must_use]
    pub fn normalize_knots(&self) -> Self {
        Self::from_parts(
            self.control_points.clone(),
            self.knots.normalized(),
            self.degree,
            self.span_search,
        )
    }

    /// Axis-aligned bounding box of the cartesian control points.
    #[must_use]
    pub fn control_bounds(&self) -> (Point3<f64>, Point3<f64>) {
        control_bounds(&self.control_points())
    }

    /// Split into the non-rational curve over the cartesian control points
    /// and the separate weight vector.
    ///
    /// The exact inverse of [`BSplineCurve::to_rational`] when all weights
    /// are 1.
    #[must_use]
    pub fn to_nonrational(&self) -> (BSplineCurve, Vec<f64>) {
        let curve = BSplineCurve::from_parts(
            self.control_points(),
            self.knots.clone(),
            self.degree,
            self.span_search,
        );
        (curve, self.weights())
    }
}

pub(crate) fn control_bounds(points: &[Point3<f64>]) -> (Point3<f64>, Point3<f64>) {
    let mut min = points[0];
    let mut max = points[0];
    for p in &points[1..] {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        min.z = min.z.min(p.z);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
        max.z = max.z.max(p.z);
    }
    (min, max)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// The 2D cubic used throughout: its evaluation at 0.5 is a known
    /// fixture, `(27.645, 14.691)`.
    fn fixture_curve() -> BSplineCurve {
        let knots =
            KnotVector::new(vec![0.0, 0.0, 0.0, 0.0, 0.33, 0.66, 1.0, 1.0, 1.0, 1.0]).unwrap();
        BSplineCurve::new(
            vec![
                Point3::new(5.0, 5.0, 0.0),
                Point3::new(10.0, 10.0, 0.0),
                Point3::new(20.0, 15.0, 0.0),
                Point3::new(35.0, 15.0, 0.0),
                Point3::new(45.0, 10.0, 0.0),
                Point3::new(50.0, 5.0, 0.0),
            ],
            knots,
            3,
        )
        .unwrap()
    }

    fn quarter_circle() -> NurbsCurve {
        let w = std::f64::consts::FRAC_1_SQRT_2;
        NurbsCurve::new(
            vec![
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![1.0, w, 1.0],
            KnotVector::new(vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap(),
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_constructor_validation() {
        let knots = KnotVector::new(vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();

        // Too few control points for a cubic
        let err = BSplineCurve::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)],
            knots.clone(),
            3,
        )
        .unwrap_err();
        assert!(err.is_insufficient_points());

        // Knot vector length mismatch
        let err = BSplineCurve::new(
            vec![
                Point3::origin(),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(3.0, 0.0, 0.0),
            ],
            knots,
            2,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SplineError::KnotVectorSize {
                expected: 7,
                actual: 6
            }
        ));
    }

    #[test]
    fn test_clamped_endpoint_interpolation() {
        let curve = fixture_curve();
        let (start, end) = curve.domain();
        assert_relative_eq!(
            curve.point_at(start).coords,
            Vector3::new(5.0, 5.0, 0.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            curve.point_at(end).coords,
            Vector3::new(50.0, 5.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_point_at_fixture_value() {
        let curve = fixture_curve();
        let p = curve.point_at(0.5);
        assert_relative_eq!(p.x, 27.645, epsilon = 1e-3);
        assert_relative_eq!(p.y, 14.691, epsilon = 1e-3);
    }

    #[test]
    fn test_insertion_is_evaluation_invariant() {
        let curve = fixture_curve();
        let refined = curve.insert_knot(0.5, 1).unwrap();

        assert_eq!(refined.num_control_points(), 7);
        assert_eq!(refined.knots().multiplicity(0.5), 1);

        let p = refined.point_at(0.5);
        assert_relative_eq!(p.x, 27.645, epsilon = 1e-3);
        assert_relative_eq!(p.y, 14.691, epsilon = 1e-3);

        for i in 0..=20 {
            let u = i as f64 / 20.0;
            assert_relative_eq!(
                curve.point_at(u).coords,
                refined.point_at(u).coords,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_multiplicity_bookkeeping() {
        let curve = fixture_curve();
        let inserted = curve.insert_knot(0.33, 2).unwrap();
        assert_eq!(inserted.knots().multiplicity(0.33), 3);

        let (removed, count) = inserted.remove_knot(0.33, 2).unwrap();
        assert_eq!(count, 2);
        assert_eq!(removed.knots().multiplicity(0.33), 1);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let curve = fixture_curve();
        let u = 0.4;
        let h = 1e-6;

        let ders = curve.derivatives(u, 2);

        assert_relative_eq!(ders[0], curve.point_at(u).coords, epsilon = 1e-12);

        let fd1 = (curve.point_at(u + h).coords - curve.point_at(u - h).coords) / (2.0 * h);
        assert_relative_eq!(ders[1], fd1, epsilon = 1e-4);

        let fd2 = (curve.point_at(u + h).coords - curve.point_at(u).coords * 2.0
            + curve.point_at(u - h).coords)
            / (h * h);
        assert_relative_eq!(ders[2], fd2, epsilon = 1e-2);
    }

    #[test]
    fn test_derivatives_above_degree_are_zero() {
        let curve = fixture_curve();
        let ders = curve.derivatives(0.4, 5);
        assert_relative_eq!(ders[4].norm(), 0.0);
        assert_relative_eq!(ders[5].norm(), 0.0);
    }

    #[test]
    fn test_sample_range_validation() {
        let curve = fixture_curve();

        let samples = curve.sample_regular(11);
        assert_eq!(samples.len(), 11);
        assert_relative_eq!(samples[0].coords, curve.point_at(0.0).coords);
        assert_relative_eq!(samples[10].coords, curve.point_at(1.0).coords);

        let sub = curve.sample_range(0.25, 0.75, 5).unwrap();
        assert_eq!(sub.len(), 5);
        assert_relative_eq!(sub[0].coords, curve.point_at(0.25).coords);

        assert!(curve.sample_range(-0.5, 0.5, 5).unwrap_err().is_out_of_domain());
        assert!(curve.sample_range(0.8, 0.2, 5).unwrap_err().is_out_of_domain());
    }

    #[test]
    fn test_split_at_meets_in_the_middle() {
        let curve = fixture_curve();
        let (left, right) = curve.split_at(0.4).unwrap();

        let meeting = curve.point_at(0.4);
        assert_relative_eq!(
            left.point_at(0.4).coords,
            meeting.coords,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            right.point_at(0.4).coords,
            meeting.coords,
            epsilon = 1e-9
        );
        assert_eq!(
            left.num_control_points() + right.num_control_points(),
            curve.num_control_points() + 3 + 1
        );
    }

    #[test]
    fn test_decompose_then_link_restores_shape() {
        let curve = fixture_curve();
        let segments = curve.decompose().unwrap();
        assert_eq!(segments.len(), 3);
        for seg in &segments {
            assert_eq!(seg.num_control_points(), 4);
        }

        let linked = BSplineCurve::link(&segments, true).unwrap();
        for i in 0..=20 {
            let u = i as f64 / 20.0;
            assert_relative_eq!(
                curve.point_at(u).coords,
                linked.point_at(u).coords,
                epsilon = 1e-9
            );
        }

        // Removing the seam knots reproduces the original representation.
        let mut restored = linked;
        for u in curve.knots().interior(3) {
            let (next, removed) = restored.remove_knot(u, 2).unwrap();
            assert_eq!(removed, 2);
            restored = next;
        }
        assert_eq!(restored.num_control_points(), curve.num_control_points());
        for (a, b) in restored
            .control_points()
            .iter()
            .zip(curve.control_points().iter())
        {
            assert_relative_eq!(a.coords, b.coords, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_elevation_bookkeeping_and_invariance() {
        // Single-segment cubic: elevating by e adds exactly e control points.
        let curve = BSplineCurve::clamped(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 3.0, 0.0),
                Point3::new(3.0, 3.0, 0.0),
                Point3::new(4.0, 0.0, 0.0),
            ],
            3,
        )
        .unwrap();

        let elevated = curve.elevate_degree(2).unwrap();
        assert_eq!(elevated.degree(), 5);
        assert_eq!(elevated.num_control_points(), curve.num_control_points() + 2);

        for i in 0..=20 {
            let u = i as f64 / 20.0;
            assert_relative_eq!(
                curve.point_at(u).coords,
                elevated.point_at(u).coords,
                epsilon = 1e-9
            );
        }

        // Multi-segment curve stays evaluation-invariant too.
        let curve = fixture_curve();
        let elevated = curve.elevate_degree(1).unwrap();
        assert_eq!(elevated.degree(), 4);
        for i in 0..=20 {
            let u = i as f64 / 20.0;
            assert_relative_eq!(
                curve.point_at(u).coords,
                elevated.point_at(u).coords,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_reduction_requires_degree_two() {
        let line = BSplineCurve::clamped(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)],
            1,
        )
        .unwrap();
        let err = line.reduce_degree().unwrap_err();
        assert!(matches!(err, SplineError::DegreeTooLow { degree: 1, min: 2 }));
    }

    #[test]
    fn test_hodograph_of_line_is_constant() {
        // A degree-1 curve along x: derivative curve is the constant speed.
        let line = BSplineCurve::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(4.0, 0.0, 0.0),
            ],
            KnotVector::new(vec![0.0, 0.0, 0.5, 1.0, 1.0]).unwrap(),
            1,
        )
        .unwrap();

        let hodo = line.hodograph().unwrap();
        assert_eq!(hodo.degree(), 0);
        assert_eq!(hodo.num_control_points(), 2);
        assert_relative_eq!(hodo.control_points()[0].x, 4.0, epsilon = 1e-12);
        assert_relative_eq!(hodo.control_points()[1].x, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hodograph_matches_derivatives() {
        let curve = fixture_curve();
        let hodo = curve.hodograph().unwrap();
        for i in 1..20 {
            let u = i as f64 / 20.0;
            let d1 = curve.derivatives(u, 1)[1];
            assert_relative_eq!(hodo.point_at(u).coords, d1, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_derivative_control_points_row_lengths() {
        let curve = fixture_curve();
        let pk = curve.derivative_control_points(2).unwrap();
        assert_eq!(pk[0].len(), 6);
        assert_eq!(pk[1].len(), 5);
        assert_eq!(pk[2].len(), 4);

        let err = curve.derivative_control_points(4).unwrap_err();
        assert!(matches!(err, SplineError::DegreeTooLow { .. }));
    }

    #[test]
    fn test_reverse_traces_same_shape() {
        let curve = fixture_curve();
        let reversed = curve.reverse();
        for i in 0..=20 {
            let u = i as f64 / 20.0;
            assert_relative_eq!(
                curve.point_at(u).coords,
                reversed.point_at(1.0 - u).coords,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_rational_roundtrip_is_exact() {
        let curve = fixture_curve();
        let rational = curve.to_rational();
        let (back, weights) = rational.to_nonrational();

        assert!(weights.iter().all(|&w| w == 1.0));
        assert_eq!(back.knots(), curve.knots());
        assert_eq!(back.degree(), curve.degree());
        for (a, b) in back
            .control_points()
            .iter()
            .zip(curve.control_points().iter())
        {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_unit_weight_nurbs_matches_bspline() {
        let curve = fixture_curve();
        let rational = curve.to_rational();
        for i in 0..=20 {
            let u = i as f64 / 20.0;
            assert_relative_eq!(
                curve.point_at(u).coords,
                rational.point_at(u).coords,
                epsilon = 1e-12
            );
            let d1 = curve.derivatives(u, 1);
            let d2 = rational.derivatives(u, 1);
            assert_relative_eq!(d1[1], d2[1], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_nurbs_weight_validation() {
        let pts = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ];

        let err = NurbsCurve::clamped(pts.clone(), vec![1.0, 0.0, 1.0], 2).unwrap_err();
        assert!(matches!(
            err,
            SplineError::InvalidWeight { index: 1, value } if value == 0.0
        ));

        let err = NurbsCurve::clamped(pts, vec![1.0, 1.0], 2).unwrap_err();
        assert!(matches!(err, SplineError::CountMismatch { .. }));
    }

    #[test]
    fn test_quarter_circle_is_exact() {
        let arc = quarter_circle();
        for i in 0..=20 {
            let u = i as f64 / 20.0;
            let p = arc.point_at(u);
            assert_relative_eq!(p.coords.norm(), 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(arc.point_at(0.0).x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(arc.point_at(1.0).y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rational_derivatives_on_circle() {
        // On the unit circle the velocity is orthogonal to the position.
        let arc = quarter_circle();
        for i in 1..20 {
            let u = i as f64 / 20.0;
            let ders = arc.derivatives(u, 1);
            assert_relative_eq!(ders[0].dot(&ders[1]), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rational_insertion_keeps_circle_exact() {
        let arc = quarter_circle();
        let refined = arc.insert_knot(0.5, 1).unwrap();
        assert_eq!(refined.num_control_points(), 4);
        for i in 0..=20 {
            let u = i as f64 / 20.0;
            assert_relative_eq!(refined.point_at(u).coords.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rational_elevation_keeps_circle_exact() {
        let arc = quarter_circle();
        let elevated = arc.elevate_degree(1).unwrap();
        assert_eq!(elevated.degree(), 3);
        for i in 0..=20 {
            let u = i as f64 / 20.0;
            assert_relative_eq!(elevated.point_at(u).coords.norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rational_hodograph_returns_input_unchanged() {
        let arc = quarter_circle();
        let same = arc.hodograph();
        assert_eq!(same, arc);
    }

    #[test]
    fn test_normalize_knots() {
        let knots = KnotVector::new(vec![2.0, 2.0, 2.0, 3.0, 4.0, 4.0, 4.0]).unwrap();
        let pts = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
        ];
        let curve = BSplineCurve::new(pts, knots, 2).unwrap();
        let normalized = curve.normalize_knots();

        assert_eq!(normalized.domain(), (0.0, 1.0));
        for i in 0..=10 {
            let t = i as f64 / 10.0;
            assert_relative_eq!(
                curve.point_at(2.0 + 2.0 * t).coords,
                normalized.point_at(t).coords,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_control_bounds() {
        let curve = fixture_curve();
        let (min, max) = curve.control_bounds();
        assert_relative_eq!(min.x, 5.0);
        assert_relative_eq!(min.y, 5.0);
        assert_relative_eq!(max.x, 50.0);
        assert_relative_eq!(max.y, 15.0);
    }
}
