//! Degree elevation and reduction, with the Bezier decompose/link machinery
//! they depend on.
//!
//! The general-spline cases reduce to sequences of Bezier segments: a spline
//! is decomposed by inserting every interior knot to full multiplicity, each
//! segment is elevated or reduced with the binomial blending formulas, the
//! segments are linked back into one knot vector, and a knot-removal pass
//! restores the interior multiplicity structure the decomposition inflated.
//!
//! Like the knot cores, everything here is generic over the point dimension
//! so rational geometry runs the same code on homogeneous coordinates.

use nalgebra::{allocator::Allocator, DefaultAllocator, DimName, OPoint};

use crate::knot_ops::{refine_knots_core, remove_knot_core, REMOVAL_TOLERANCE};
use crate::knots::KnotVector;
use crate::{Result, SplineError};

/// Default tolerance for validating that adjoining segment endpoints meet
/// during linking.
pub const LINK_TOLERANCE: f64 = 1e-7;

/// Binomial coefficient as a float.
///
/// The blending formulas need ratios of binomials at spline-degree scale,
/// where the coefficients are cheap enough to recompute on demand.
pub(crate) fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut result = 1.0;
    for i in 0..k {
        result = result * (n - i) as f64 / (i + 1) as f64;
    }
    result
}

/// Decompose a spline into its Bezier segments.
///
/// Inserts every interior knot up to multiplicity `degree`, then slices the
/// control points and knots per segment. Adjacent segments share their
/// boundary control point; each segment's knot vector spans the segment's
/// true parametric interval. The input is not mutated.
///
/// # Errors
///
/// - [`SplineError::DegreeTooLow`] for degree 0.
/// - [`SplineError::InvalidKnotVector`] if the knot vector is not clamped.
pub(crate) fn decompose_core<D>(
    degree: usize,
    knots: &KnotVector,
    ctrlpts: &[OPoint<f64, D>],
) -> Result<Vec<(KnotVector, Vec<OPoint<f64, D>>)>>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    if degree == 0 {
        return Err(SplineError::DegreeTooLow { degree, min: 1 });
    }
    if !knots.is_clamped(degree) {
        return Err(SplineError::invalid_knot_vector(
            "decomposition requires a clamped knot vector",
        ));
    }

    // Raise every interior knot to full multiplicity in one refinement pass.
    let mut fill = Vec::new();
    for u in knots.interior(degree) {
        let s = knots.multiplicity(u);
        fill.extend(std::iter::repeat(u).take(degree - s));
    }
    let (full_knots, full_pts) = refine_knots_core(degree, knots, ctrlpts, &fill)?;

    let breaks = full_knots.distinct();
    let mut segments = Vec::with_capacity(breaks.len() - 1);

    for i in 0..breaks.len() - 1 {
        let pts = full_pts[i * degree..=(i + 1) * degree].to_vec();
        let mut kv = vec![breaks[i]; degree + 1];
        kv.extend(std::iter::repeat(breaks[i + 1]).take(degree + 1));
        segments.push((KnotVector::new_unchecked(kv), pts));
    }

    Ok(segments)
}

/// Link a sequence of segments back into a single spline.
///
/// The exact inverse of [`decompose_core`]: concatenates the control points
/// (dropping each subsequent segment's first point, which duplicates the
/// previous segment's last) and merges the knot vectors, offsetting each
/// segment by the accumulated parametric domain length so the merged vector
/// stays non-decreasing.
///
/// With `validate` set, adjoining endpoints must coincide within
/// [`LINK_TOLERANCE`].
///
/// # Errors
///
/// - [`SplineError::InvalidKnotVector`] for an empty segment list.
/// - [`SplineError::CannotLink`] if validation finds a gap between segments.
pub(crate) fn link_core<D>(
    segments: &[(KnotVector, Vec<OPoint<f64, D>>)],
    degree: usize,
    validate: bool,
) -> Result<(KnotVector, Vec<OPoint<f64, D>>)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    let Some(((first_knots, first_pts), rest)) = segments.split_first() else {
        return Err(SplineError::invalid_knot_vector(
            "cannot link an empty segment list",
        ));
    };

    let mut kv: Vec<f64> = first_knots.as_slice()[..first_knots.len() - (degree + 1)].to_vec();
    let mut pts = first_pts.clone();
    let mut domain_end = first_knots.last();

    for (seg_knots, seg_pts) in rest {
        if validate {
            let gap = (&pts[pts.len() - 1].coords - &seg_pts[0].coords).norm();
            if gap > LINK_TOLERANCE {
                return Err(SplineError::CannotLink { gap });
            }
        }

        let offset = domain_end - seg_knots.first();
        kv.extend(
            seg_knots.as_slice()[1..seg_knots.len() - (degree + 1)]
                .iter()
                .map(|&k| k + offset),
        );
        pts.extend(seg_pts[1..].iter().cloned());
        domain_end += seg_knots.last() - seg_knots.first();
    }

    kv.extend(std::iter::repeat(domain_end).take(degree + 1));

    Ok((KnotVector::new_unchecked(kv), pts))
}

/// Elevate a Bezier segment's degree by `num` (Piegl & Tiller Eq. 5.36).
///
/// # Errors
///
/// Returns [`SplineError::NotBezier`] unless exactly `degree + 1` control
/// points are given.
pub(crate) fn elevate_bezier_core<D>(
    degree: usize,
    ctrlpts: &[OPoint<f64, D>],
    num: usize,
) -> Result<Vec<OPoint<f64, D>>>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    if ctrlpts.len() != degree + 1 {
        return Err(SplineError::NotBezier {
            expected: degree + 1,
            actual: ctrlpts.len(),
        });
    }
    if num == 0 {
        return Ok(ctrlpts.to_vec());
    }

    let elevated_degree = degree + num;
    let mut elevated = Vec::with_capacity(elevated_degree + 1);

    for i in 0..=elevated_degree {
        let start = i.saturating_sub(num);
        let end = degree.min(i);
        let mut acc = OPoint::<f64, D>::origin();
        for j in start..=end {
            let coeff = binomial(degree, j) * binomial(num, i - j) / binomial(elevated_degree, i);
            acc.coords += &ctrlpts[j].coords * coeff;
        }
        elevated.push(acc);
    }

    Ok(elevated)
}

/// Reduce a Bezier segment's degree by one (Piegl & Tiller Eqs. 5.41/5.42).
///
/// Sweeps forward from the start and backward from the end; for odd input
/// degree the two estimates of the middle point are averaged. No maximum
/// error bound is computed: reduction is an approximation and may deviate
/// geometrically.
///
/// # Errors
///
/// - [`SplineError::DegreeTooLow`] for degree below 2.
/// - [`SplineError::NotBezier`] unless exactly `degree + 1` control points
///   are given.
pub(crate) fn reduce_bezier_core<D>(
    degree: usize,
    ctrlpts: &[OPoint<f64, D>],
) -> Result<Vec<OPoint<f64, D>>>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    if degree < 2 {
        return Err(SplineError::DegreeTooLow { degree, min: 2 });
    }
    if ctrlpts.len() != degree + 1 {
        return Err(SplineError::NotBezier {
            expected: degree + 1,
            actual: ctrlpts.len(),
        });
    }

    let p = degree;
    let pf = p as f64;
    let r = (p - 1) / 2;
    let mut reduced = vec![OPoint::<f64, D>::origin(); p];

    reduced[0] = ctrlpts[0].clone();
    reduced[p - 1] = ctrlpts[p].clone();

    let alpha = |i: usize| i as f64 / pf;

    if p % 2 == 0 {
        for i in 1..=r {
            let a = alpha(i);
            reduced[i] = OPoint::from((&ctrlpts[i].coords - &reduced[i - 1].coords * a) / (1.0 - a));
        }
        for i in (r + 1..=p - 2).rev() {
            let a = alpha(i + 1);
            reduced[i] =
                OPoint::from((&ctrlpts[i + 1].coords - &reduced[i + 1].coords * (1.0 - a)) / a);
        }
    } else {
        for i in 1..r {
            let a = alpha(i);
            reduced[i] = OPoint::from((&ctrlpts[i].coords - &reduced[i - 1].coords * a) / (1.0 - a));
        }
        for i in (r + 1..=p - 2).rev() {
            let a = alpha(i + 1);
            reduced[i] =
                OPoint::from((&ctrlpts[i + 1].coords - &reduced[i + 1].coords * (1.0 - a)) / a);
        }
        // Both sweeps produce an estimate of the middle point; average them.
        let a_left = alpha(r);
        let left =
            (&ctrlpts[r].coords - &reduced[r - 1].coords * a_left) / (1.0 - a_left);
        let a_right = alpha(r + 1);
        let right =
            (&ctrlpts[r + 1].coords - &reduced[r + 1].coords * (1.0 - a_right)) / a_right;
        reduced[r] = OPoint::from((left + right) * 0.5);
    }

    Ok(reduced)
}

/// Elevate a spline's degree by `num` via decompose / per-segment elevate /
/// link, then restore the interior multiplicity structure by knot removal.
///
/// Interior knots end up at multiplicity `s + num` (original multiplicity
/// `s`), preserving the continuity structure at the higher degree.
pub(crate) fn elevate_degree_core<D>(
    degree: usize,
    knots: &KnotVector,
    ctrlpts: &[OPoint<f64, D>],
    num: usize,
) -> Result<(usize, KnotVector, Vec<OPoint<f64, D>>)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    if num == 0 {
        return Ok((degree, knots.clone(), ctrlpts.to_vec()));
    }

    let interior: Vec<(f64, usize)> = knots
        .interior(degree)
        .into_iter()
        .map(|u| (u, knots.multiplicity(u)))
        .collect();

    let new_degree = degree + num;
    let segments = decompose_core(degree, knots, ctrlpts)?;
    let mut elevated = Vec::with_capacity(segments.len());
    for (seg_knots, seg_pts) in &segments {
        let pts = elevate_bezier_core(degree, seg_pts, num)?;
        let mut kv = vec![seg_knots.first(); new_degree + 1];
        kv.extend(std::iter::repeat(seg_knots.last()).take(new_degree + 1));
        elevated.push((KnotVector::new_unchecked(kv), pts));
    }

    let (mut kv, mut pts) = link_core(&elevated, new_degree, false)?;

    // Decomposition left every interior knot at multiplicity `new_degree`;
    // bring each back down to `s + num`. The removals are shape-exact here,
    // so the tolerance guard passes them through.
    for (u, s) in interior {
        let excess = new_degree - s - num;
        if excess > 0 {
            let (k2, p2, _) = remove_knot_core(new_degree, &kv, &pts, u, excess, REMOVAL_TOLERANCE)?;
            kv = k2;
            pts = p2;
        }
    }

    Ok((new_degree, kv, pts))
}

/// Reduce a spline's degree by one via decompose / per-segment reduce /
/// link / knot removal.
///
/// Not guaranteed exact: the Bezier reduction is an approximation (no error
/// bound is checked), and the restoring knot removal is tolerance-guarded.
pub(crate) fn reduce_degree_core<D>(
    degree: usize,
    knots: &KnotVector,
    ctrlpts: &[OPoint<f64, D>],
) -> Result<(usize, KnotVector, Vec<OPoint<f64, D>>)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    if degree < 2 {
        return Err(SplineError::DegreeTooLow { degree, min: 2 });
    }

    let interior: Vec<(f64, usize)> = knots
        .interior(degree)
        .into_iter()
        .map(|u| (u, knots.multiplicity(u)))
        .collect();

    let new_degree = degree - 1;
    let segments = decompose_core(degree, knots, ctrlpts)?;
    let mut reduced = Vec::with_capacity(segments.len());
    for (seg_knots, seg_pts) in &segments {
        let pts = reduce_bezier_core(degree, seg_pts)?;
        let mut kv = vec![seg_knots.first(); new_degree + 1];
        kv.extend(std::iter::repeat(seg_knots.last()).take(new_degree + 1));
        reduced.push((KnotVector::new_unchecked(kv), pts));
    }

    let (mut kv, mut pts) = link_core(&reduced, new_degree, false)?;

    // Interior multiplicity after linking is `new_degree`; preserving the
    // continuity class at the lower degree calls for multiplicity `s - 1`,
    // so `degree - s` removals. The tolerance guard keeps extra knots when
    // the reduction was not exact there.
    for (u, s) in interior {
        let excess = degree.saturating_sub(s);
        if excess > 0 {
            let (k2, p2, _) = remove_knot_core(new_degree, &kv, &pts, u, excess, REMOVAL_TOLERANCE)?;
            kv = k2;
            pts = p2;
        }
    }

    Ok((new_degree, kv, pts))
}
