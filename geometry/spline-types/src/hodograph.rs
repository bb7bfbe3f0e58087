//! Derivative control points.
//!
//! Computes the control points of derivative curves and surfaces directly in
//! control-point space, without evaluating basis functions per derivative
//! order. These tables back the hodograph constructors on the geometry
//! types and the fast derivative paths.
//!
//! Only non-rational geometry has a spline hodograph; the rational wrappers
//! on the geometry types warn and hand the input back unchanged.

use nalgebra::{allocator::Allocator, DefaultAllocator, DimName, OPoint};

/// Control points of the derivative curves up to `order` over the control
/// point range `[r1, r2]`.
///
/// Returns `pk[k][i]`: the `i`-th control point of the `k`-th derivative
/// curve. Row `k` has `r2 - r1 + 1 - k` meaningful entries; trailing slots
/// stay at the origin. `order` must not exceed the degree.
///
/// `knots` is taken as a raw slice so the surface variant can pass a
/// shifted sub-vector for its second direction.
pub(crate) fn curve_deriv_ctrlpts<D>(
    degree: usize,
    knots: &[f64],
    ctrlpts: &[OPoint<f64, D>],
    order: usize,
    r1: usize,
    r2: usize,
) -> Vec<Vec<OPoint<f64, D>>>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    debug_assert!(order <= degree, "derivative order must not exceed degree");

    let r = r2 - r1;
    let mut pk = vec![vec![OPoint::<f64, D>::origin(); r + 1]; order + 1];

    for i in 0..=r {
        pk[0][i] = ctrlpts[r1 + i].clone();
    }

    for k in 1..=order {
        let tmp = (degree - k + 1) as f64;
        for i in 0..=(r - k) {
            let denom = knots[r1 + i + degree + 1] - knots[r1 + i + k];
            pk[k][i] =
                OPoint::from((&pk[k - 1][i + 1].coords - &pk[k - 1][i].coords) * (tmp / denom));
        }
    }

    pk
}

/// Control points of the mixed partial derivative surfaces up to `order`.
///
/// Returns `pkl[k][l][i][j]`: the `(i, j)` control point of the surface
/// differentiated `k` times in u and `l` times in v. The u direction is
/// differentiated first on every v-column, then the v direction runs over
/// the u-differentiated rows. Control points arrive as the flat v-fastest
/// grid used by the surface types.
#[allow(clippy::too_many_arguments)]
pub(crate) fn surface_deriv_ctrlpts<D>(
    degree_u: usize,
    degree_v: usize,
    knots_u: &[f64],
    knots_v: &[f64],
    ctrlpts: &[OPoint<f64, D>],
    count_u: usize,
    count_v: usize,
    order: usize,
    (r1, r2): (usize, usize),
    (s1, s2): (usize, usize),
) -> Vec<Vec<Vec<Vec<OPoint<f64, D>>>>>
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>,
{
    let du = order.min(degree_u);
    let dv = order.min(degree_v);
    let r = r2 - r1;
    let s = s2 - s1;

    let mut pkl =
        vec![vec![vec![vec![OPoint::<f64, D>::origin(); s + 1]; r + 1]; dv + 1]; du + 1];

    // u direction first, on every v-column of the grid.
    for j in s1..=s2 {
        let column: Vec<OPoint<f64, D>> = (0..count_u)
            .map(|i| ctrlpts[i * count_v + j].clone())
            .collect();
        let temp = curve_deriv_ctrlpts(degree_u, knots_u, &column, du, r1, r2);
        for (k, row) in temp.iter().enumerate() {
            for i in 0..=(r - k) {
                pkl[k][0][i][j - s1] = row[i].clone();
            }
        }
    }

    // v direction over the u-differentiated rows, against the shifted
    // sub-vector of the v knots.
    let shifted_v = &knots_v[s1..];
    for k in 0..=du {
        for i in 0..=(r - k) {
            let dd = (order - k).min(dv);
            if dd == 0 {
                continue;
            }
            let row = pkl[k][0][i].clone();
            let temp = curve_deriv_ctrlpts(degree_v, shifted_v, &row, dd, 0, s);
            for (l, trow) in temp.iter().enumerate().skip(1) {
                for j in 0..=(s - l) {
                    pkl[k][l][i][j] = trow[j].clone();
                }
            }
        }
    }

    pkl
}
