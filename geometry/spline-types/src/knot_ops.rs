//! Knot insertion, removal, and refinement cores.
//!
//! The algorithms here are generic over the point dimension so the same
//! code serves cartesian control points (B-spline geometry) and homogeneous
//! ones (NURBS geometry, where the blending runs on weighted coordinates).
//! The geometry types wrap these cores per parametric direction; surfaces
//! and volumes extract 1D control point rows along the operation direction,
//! run the curve core on each row, and reassemble their grids.

use nalgebra::{allocator::Allocator, DefaultAllocator, DimName, OPoint};

use crate::basis::{find_multiplicity, find_span_linear, KNOT_TOLERANCE};
use crate::knots::KnotVector;
use crate::{Result, SplineError};

/// Default tolerance for the knot-removal shape-preservation check
/// (Piegl & Tiller Eq. 5.30).
pub const REMOVAL_TOLERANCE: f64 = 1e-4;

/// Linear interpolation between two points: `(1 - t) * a + t * b`.
pub(crate) fn lerp<D>(a: &OPoint<f64, D>, b: &OPoint<f64, D>, t: f64) -> OPoint<f64, D>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    OPoint::from(a.coords.lerp(&b.coords, t))
}

fn distance<D>(a: &OPoint<f64, D>, b: &OPoint<f64, D>) -> f64
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    (&a.coords - &b.coords).norm()
}

/// Insert the knot `u` into the vector `num` times (Piegl & Tiller A5.1).
///
/// Control points outside the affected window `[k - degree, k - s]` are
/// carried over verbatim; the window is re-derived by repeated linear
/// blending.
///
/// # Errors
///
/// - [`SplineError::ParameterOutOfDomain`] if `u` is outside the knot
///   domain.
/// - [`SplineError::CannotInsertKnot`] if `num + multiplicity > degree`.
pub(crate) fn insert_knot_core<D>(
    degree: usize,
    knots: &KnotVector,
    ctrlpts: &[OPoint<f64, D>],
    u: f64,
    num: usize,
) -> Result<(KnotVector, Vec<OPoint<f64, D>>)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    if num == 0 {
        return Ok((knots.clone(), ctrlpts.to_vec()));
    }

    let (start, end) = knots.domain(degree);
    if u < start || u > end {
        return Err(SplineError::out_of_domain(u, (start, end)));
    }

    let s = knots.multiplicity(u);
    if num + s > degree {
        return Err(SplineError::CannotInsertKnot {
            knot: u,
            requested: num,
            multiplicity: s,
        });
    }

    let kv = knots.as_slice();
    let np = ctrlpts.len();
    let k = find_span_linear(degree, kv, np, u);

    // New knot vector: the original with `num` copies of `u` spliced in
    // after index k.
    let mut new_knots = Vec::with_capacity(kv.len() + num);
    new_knots.extend_from_slice(&kv[..=k]);
    new_knots.extend(std::iter::repeat(u).take(num));
    new_knots.extend_from_slice(&kv[k + 1..]);

    // Unaltered control points outside the affected window.
    let mut q = vec![OPoint::<f64, D>::origin(); np + num];
    q[..=(k - degree)].clone_from_slice(&ctrlpts[..=(k - degree)]);
    for i in (k - s)..np {
        q[i + num] = ctrlpts[i].clone();
    }

    // Working window, blended once per inserted copy.
    let mut temp: Vec<OPoint<f64, D>> = ctrlpts[(k - degree)..=(k - s)].to_vec();

    let mut l = 0;
    for j in 1..=num {
        l = k - degree + j;
        for i in 0..=(degree - j - s) {
            let alpha = (u - kv[l + i]) / (kv[i + k + 1] - kv[l + i]);
            temp[i] = lerp(&temp[i], &temp[i + 1], alpha);
        }
        q[l] = temp[0].clone();
        q[k + num - j - s] = temp[degree - j - s].clone();
    }
    for i in (l + 1)..(k - s) {
        q[i] = temp[i - l].clone();
    }

    Ok((KnotVector::new_unchecked(new_knots), q))
}

/// Remove the knot `u` up to `num` times (Piegl & Tiller A5.8).
///
/// Each repetition blends symmetrically from both ends of the affected
/// window toward the center and only commits when the reconstruction error
/// stays within `tolerance` (Eq. 5.30). Repetitions that would move the
/// geometry are skipped silently; the returned count is the number of
/// removals that actually happened.
///
/// # Errors
///
/// - [`SplineError::ParameterOutOfDomain`] if `u` is not strictly inside
///   the knot domain.
/// - [`SplineError::CannotRemoveKnot`] if `num` exceeds the knot's current
///   multiplicity.
pub(crate) fn remove_knot_core<D>(
    degree: usize,
    knots: &KnotVector,
    ctrlpts: &[OPoint<f64, D>],
    u: f64,
    num: usize,
    tolerance: f64,
) -> Result<(KnotVector, Vec<OPoint<f64, D>>, usize)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    let (start, end) = knots.domain(degree);
    if u <= start + KNOT_TOLERANCE || u >= end - KNOT_TOLERANCE {
        return Err(SplineError::out_of_domain(u, (start, end)));
    }

    let s = knots.multiplicity(u);
    if num > s {
        return Err(SplineError::CannotRemoveKnot {
            knot: u,
            requested: num,
            multiplicity: s,
        });
    }

    let kv = knots.as_slice();
    let np = ctrlpts.len();
    let r = find_span_linear(degree, kv, np, u);
    let ord = degree + 1;

    let mut ctrl = ctrlpts.to_vec();
    let mut temp = vec![OPoint::<f64, D>::origin(); 2 * degree + 2];

    let mut first = r - degree;
    let mut last = r - s;
    let mut removed = 0usize;

    for t in 0..num {
        let off = first - 1;
        temp[0] = ctrl[off].clone();
        temp[last + 1 - off] = ctrl[last + 1].clone();

        let mut i = first;
        let mut j = last;
        let mut ii = 1usize;
        let mut jj = last - off;
        let mut remflag = false;

        // Blend in from both ends of the window toward the center.
        while j as isize - i as isize > t as isize {
            let alfi = (u - kv[i]) / (kv[i + ord + t] - kv[i]);
            let alfj = (u - kv[j - t]) / (kv[j + ord] - kv[j - t]);
            temp[ii] =
                OPoint::from((&ctrl[i].coords - &temp[ii - 1].coords * (1.0 - alfi)) / alfi);
            temp[jj] =
                OPoint::from((&ctrl[j].coords - &temp[jj + 1].coords * alfj) / (1.0 - alfj));
            i += 1;
            ii += 1;
            j -= 1;
            jj -= 1;
        }

        // Eq. 5.30: is this repetition removable without moving the curve?
        if (j as isize - i as isize) < t as isize {
            if distance(&temp[ii - 1], &temp[jj + 1]) <= tolerance {
                remflag = true;
            }
        } else {
            let alfi = (u - kv[i]) / (kv[i + ord + t] - kv[i]);
            let interior = lerp(&temp[ii - 1], &temp[ii + t + 1], alfi);
            if distance(&ctrl[i], &interior) <= tolerance {
                remflag = true;
            }
        }

        if !remflag {
            // This and all further repetitions would change the shape.
            break;
        }

        let mut i = first;
        let mut j = last;
        while j as isize - i as isize > t as isize {
            ctrl[i] = temp[i - off].clone();
            ctrl[j] = temp[j - off].clone();
            i += 1;
            j -= 1;
        }

        first -= 1;
        last += 1;
        removed = t + 1;
    }

    if removed == 0 {
        return Ok((knots.clone(), ctrl, 0));
    }

    // Shift the knot vector over the removed copies.
    let mut new_knots = Vec::with_capacity(kv.len() - removed);
    new_knots.extend_from_slice(&kv[..=(r - removed)]);
    new_knots.extend_from_slice(&kv[r + 1..]);

    // Close the gap in the control points.
    let fout = (2 * r - s - degree) / 2;
    let mut j = fout;
    let mut i = j;
    for k in 1..removed {
        if k % 2 == 1 {
            i += 1;
        } else {
            j -= 1;
        }
    }
    for k in (i + 1)..np {
        ctrl[j] = ctrl[k].clone();
        j += 1;
    }
    ctrl.truncate(np - removed);

    Ok((KnotVector::new_unchecked(new_knots), ctrl, removed))
}

/// Insert a whole list of knots in one combined pass
/// (Piegl & Tiller A5.4).
///
/// A single blended sweep over the affected region, rather than
/// `insert.len()` sequential single insertions. The list may contain
/// repeated values; the resulting multiplicity of every value must not
/// exceed the degree.
///
/// # Errors
///
/// - [`SplineError::ParameterOutOfDomain`] if any knot lies outside the
///   domain.
/// - [`SplineError::CannotInsertKnot`] if any value would end up with
///   multiplicity above the degree.
pub(crate) fn refine_knots_core<D>(
    degree: usize,
    knots: &KnotVector,
    ctrlpts: &[OPoint<f64, D>],
    insert: &[f64],
) -> Result<(KnotVector, Vec<OPoint<f64, D>>)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    if insert.is_empty() {
        return Ok((knots.clone(), ctrlpts.to_vec()));
    }

    let mut x = insert.to_vec();
    x.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let (start, end) = knots.domain(degree);
    for &u in &x {
        if u < start || u > end {
            return Err(SplineError::out_of_domain(u, (start, end)));
        }
    }

    // Validate resulting multiplicities in one pass over the sorted list.
    let mut idx = 0;
    while idx < x.len() {
        let u = x[idx];
        let mut count = 1;
        while idx + count < x.len() && (x[idx + count] - u).abs() <= KNOT_TOLERANCE {
            count += 1;
        }
        let s = knots.multiplicity(u);
        if s + count > degree {
            return Err(SplineError::CannotInsertKnot {
                knot: u,
                requested: count,
                multiplicity: s,
            });
        }
        idx += count;
    }

    let kv = knots.as_slice();
    let n = ctrlpts.len() - 1;
    let m = n + degree + 1;
    let r = x.len() - 1;
    let a = find_span_linear(degree, kv, n + 1, x[0]);
    let b = find_span_linear(degree, kv, n + 1, x[r]) + 1;

    let mut q = vec![OPoint::<f64, D>::origin(); n + r + 2];
    let mut ubar = vec![0.0; m + r + 2];

    // Unchanged head and tail.
    q[..=(a - degree)].clone_from_slice(&ctrlpts[..=(a - degree)]);
    for i in (b - 1)..=n {
        q[i + r + 1] = ctrlpts[i].clone();
    }
    ubar[..=a].copy_from_slice(&kv[..=a]);
    for i in (b + degree)..=m {
        ubar[i + r + 1] = kv[i];
    }

    let mut i = b + degree - 1;
    let mut k = b + degree + r;

    for j in (0..=r).rev() {
        while x[j] <= kv[i] && i > a {
            q[k - degree - 1] = ctrlpts[i - degree - 1].clone();
            ubar[k] = kv[i];
            k -= 1;
            i -= 1;
        }
        q[k - degree - 1] = q[k - degree].clone();
        for l in 1..=degree {
            let ind = k - degree + l;
            let mut alpha = ubar[k + l] - x[j];
            if alpha.abs() < KNOT_TOLERANCE {
                q[ind - 1] = q[ind].clone();
            } else {
                alpha /= ubar[k + l] - kv[i - degree + l];
                q[ind - 1] = lerp(&q[ind], &q[ind - 1], alpha);
            }
        }
        ubar[k] = x[j];
        k -= 1;
    }

    Ok((KnotVector::new_unchecked(ubar), q))
}

/// Expand a refinement density into the list of knots to insert.
///
/// Density 1 inserts the midpoint of every knot span; density `d` repeats
/// the subdivision recursively `d` times. Returns the knots to insert
/// (existing knots are not repeated).
///
/// # Errors
///
/// Returns [`SplineError::InvalidDensity`] for density 0.
pub(crate) fn density_midpoints(
    degree: usize,
    knots: &KnotVector,
    density: usize,
) -> Result<Vec<f64>> {
    if density == 0 {
        return Err(SplineError::InvalidDensity { density });
    }

    let (start, end) = knots.domain(degree);
    let mut breaks: Vec<f64> = knots
        .distinct()
        .into_iter()
        .filter(|&k| k >= start && k <= end)
        .collect();

    let mut inserted = Vec::new();
    for _ in 0..density {
        let mut next = Vec::with_capacity(breaks.len() * 2 - 1);
        for w in breaks.windows(2) {
            let mid = (w[0] + w[1]) / 2.0;
            next.push(w[0]);
            next.push(mid);
            inserted.push(mid);
        }
        next.push(breaks[breaks.len() - 1]);
        breaks = next;
    }

    inserted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(inserted)
}

/// Two-pass knot removal over a family of control point rows sharing one
/// knot vector: find the count every row can remove within tolerance, then
/// remove exactly that much from each so the grid stays rectangular.
/// Returns the achieved removal count.
///
/// Surfaces and volumes use this for their per-direction removal, where the
/// rows are the 1D control point sequences along the removal direction.
pub(crate) fn remove_rows<D>(
    degree: usize,
    knots: &KnotVector,
    rows: &[Vec<OPoint<f64, D>>],
    u: f64,
    num: usize,
) -> Result<(KnotVector, Vec<Vec<OPoint<f64, D>>>, usize)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    let mut achievable = num;
    for row in rows {
        let (_, _, removed) = remove_knot_core(degree, knots, row, u, num, REMOVAL_TOLERANCE)?;
        achievable = achievable.min(removed);
        if achievable == 0 {
            return Ok((knots.clone(), rows.to_vec(), 0));
        }
    }

    let mut new_knots = None;
    let mut new_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let (kv, pts, removed) =
            remove_knot_core(degree, knots, row, u, achievable, REMOVAL_TOLERANCE)?;
        debug_assert_eq!(removed, achievable);
        new_knots = Some(kv);
        new_rows.push(pts);
    }
    let new_knots =
        new_knots.ok_or_else(|| SplineError::count_mismatch("control grid", 1, 0))?;
    Ok((new_knots, new_rows, achievable))
}

/// Split control points and knots at `u` into two halves sharing the
/// boundary control point.
///
/// Inserts `u` up to multiplicity `degree` first, then slices both the
/// control points and the knot vector, completing each side's clamped end.
pub(crate) fn split_core<D>(
    degree: usize,
    knots: &KnotVector,
    ctrlpts: &[OPoint<f64, D>],
    u: f64,
) -> Result<(
    (KnotVector, Vec<OPoint<f64, D>>),
    (KnotVector, Vec<OPoint<f64, D>>),
)>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    let (start, end) = knots.domain(degree);
    if u <= start + KNOT_TOLERANCE || u >= end - KNOT_TOLERANCE {
        return Err(SplineError::out_of_domain(u, (start, end)));
    }

    let s = find_multiplicity(u, knots.as_slice());
    let (knots, ctrl) = if s < degree {
        refine_knots_core(degree, knots, ctrlpts, &vec![u; degree - s])?
    } else {
        (knots.clone(), ctrlpts.to_vec())
    };

    let kv = knots.as_slice();
    let span = find_span_linear(degree, kv, ctrl.len(), u);

    let mut left_knots = kv[..=span].to_vec();
    left_knots.push(u);
    let left_pts = ctrl[..=(span - degree)].to_vec();

    let mut right_knots = vec![u];
    right_knots.extend_from_slice(&kv[(span - degree + 1)..]);
    let right_pts = ctrl[(span - degree)..].to_vec();

    Ok((
        (KnotVector::new_unchecked(left_knots), left_pts),
        (KnotVector::new_unchecked(right_knots), right_pts),
    ))
}
