//! Parametric spline types for CAD and geometric modeling.
//!
//! This crate provides B-spline and NURBS (non-uniform rational B-spline)
//! geometry over one, two, and three parametric dimensions:
//!
//! - [`BSplineCurve`] / [`NurbsCurve`] - curves
//! - [`BSplineSurface`] / [`NurbsSurface`] - tensor-product surfaces
//! - [`BSplineVolume`] / [`NurbsVolume`] - trivariate volumes
//!
//! Rational types store their control points in homogeneous (weighted)
//! coordinates, which lets them represent conic sections exactly; with all
//! weights 1 they evaluate identically to their non-rational counterparts.
//!
//! # Evaluation
//!
//! Every geometry type evaluates points at exact parameters in its knot
//! domain (`point_at`), samples regular parameter grids (`sample_regular`,
//! `sample_range`), and computes derivatives up to arbitrary order
//! (`derivatives`) - non-rational derivatives directly from the basis
//! function recursion, rational ones through the binomial quotient-rule
//! correction.
//!
//! # Knot and degree algorithms
//!
//! The representation-changing algorithms of the standard reference are
//! available on every type where they are defined: knot insertion, removal
//! (approximate, tolerance-guarded), refinement (single-pass multi-knot
//! insertion and recursive midpoint subdivision), Bezier decomposition and
//! linking, and degree elevation/reduction. All of them take `&self` and
//! return new geometry; a spline is never mutated in place.
//!
//! # Example
//!
//! ```
//! use spline_types::BSplineCurve;
//! use nalgebra::Point3;
//!
//! let curve = BSplineCurve::clamped(
//!     vec![
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(1.0, 2.0, 0.0),
//!         Point3::new(3.0, 2.0, 0.0),
//!         Point3::new(4.0, 0.0, 0.0),
//!     ],
//!     3,
//! ).unwrap();
//!
//! // Insertion refines the representation without moving the curve
//! let refined = curve.insert_knot(0.5, 1).unwrap();
//! let before = curve.point_at(0.3);
//! let after = refined.point_at(0.3);
//! assert!((before - after).norm() < 1e-12);
//! ```
//!
//! # Coordinate System
//!
//! Geometry is fixed to 3D Euclidean space (`nalgebra::Point3<f64>`);
//! planar curves and surfaces embed with `z = 0`. Homogeneous control
//! points are `nalgebra::Point4<f64>` holding `(x*w, y*w, z*w, w)`.
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**. It can be used
//! in CLI tools, web applications (WASM), servers, and other engines.
//!
//! # Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for all geometry types

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::int_plus_one,
    clippy::too_many_lines,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::suboptimal_flops,
    clippy::cast_precision_loss,
    clippy::doc_markdown,
    clippy::module_name_repetitions,
    clippy::needless_range_loop,
    clippy::uninlined_format_args,
    clippy::return_self_not_must_use,
    clippy::items_after_statements
)]

pub mod basis;
mod curve;
mod degree_ops;
mod error;
mod hodograph;
mod knot_ops;
mod knots;
mod surface;
mod volume;

// Re-export core types
pub use basis::SpanSearch;
pub use curve::{BSplineCurve, NurbsCurve};
pub use degree_ops::LINK_TOLERANCE;
pub use error::SplineError;
pub use knot_ops::REMOVAL_TOLERANCE;
pub use knots::KnotVector;
pub use surface::{BSplineSurface, NurbsSurface, SurfaceDirection};
pub use volume::{BSplineVolume, NurbsVolume, VolumeDirection};

// Re-export nalgebra types for convenience
pub use nalgebra::{Point3, Point4, Vector3};

/// Result type for spline operations.
pub type Result<T> = std::result::Result<T, SplineError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod integration_tests {
    use super::*;
    use approx::assert_relative_eq;

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

    /// Chain the representation-changing operations and verify the shape
    /// survives the whole pipeline.
    #[test]
    fn test_curve_pipeline_preserves_shape() {
        let curve = fixture_curve();
        let reference: Vec<Point3<f64>> = curve.sample_regular(33);

        let transformed = curve
            .insert_knot(0.5, 1)
            .unwrap()
            .refine_knots(&[0.1, 0.9])
            .unwrap()
            .elevate_degree(1)
            .unwrap();
        assert_eq!(transformed.degree(), 4);

        for (i, expected) in reference.iter().enumerate() {
            let u = i as f64 / 32.0;
            assert_relative_eq!(
                transformed.point_at(u).coords,
                expected.coords,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_rational_pipeline_preserves_circle() {
        let w = std::f64::consts::FRAC_1_SQRT_2;
        let arc = NurbsCurve::new(
            vec![
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![1.0, w, 1.0],
            KnotVector::new(vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap(),
            2,
        )
        .unwrap();

        let transformed = arc
            .insert_knot(0.3, 1)
            .unwrap()
            .elevate_degree(1)
            .unwrap()
            .refine_density(1)
            .unwrap();

        for i in 0..=32 {
            let u = i as f64 / 32.0;
            assert_relative_eq!(
                transformed.point_at(u).coords.norm(),
                1.0,
                epsilon = 1e-9
            );
        }
    }

    /// The binary span search must agree with the linear default across a
    /// pipeline of operations.
    #[test]
    fn test_span_strategies_agree() {
        let linear = fixture_curve();
        let binary = fixture_curve().with_span_search(SpanSearch::Binary);

        for i in 0..=50 {
            let u = i as f64 / 50.0;
            assert_relative_eq!(
                linear.point_at(u).coords,
                binary.point_at(u).coords,
                epsilon = 1e-14
            );
        }
    }

    /// Surface and curve evaluators must agree on an extruded curve: the
    /// surface's u-isocurves are translates of the profile.
    #[test]
    fn test_extruded_surface_matches_curve() {
        let profile = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
            Point3::new(3.0, 2.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
        ];
        let curve = BSplineCurve::clamped(profile.clone(), 3).unwrap();

        // Extrude along z: two copies of the profile as the v direction.
        let mut grid = Vec::new();
        for p in &profile {
            grid.push(*p);
            grid.push(Point3::new(p.x, p.y, 1.0));
        }
        let surface = BSplineSurface::clamped(grid, (4, 2), (3, 1)).unwrap();

        for i in 0..=10 {
            let u = i as f64 / 10.0;
            let on_curve = curve.point_at(u);
            let on_surface = surface.point_at(u, 0.0);
            assert_relative_eq!(on_curve.coords, on_surface.coords, epsilon = 1e-12);

            let lifted = surface.point_at(u, 1.0);
            assert_relative_eq!(lifted.z, 1.0, epsilon = 1e-12);
            assert_relative_eq!(lifted.x, on_curve.x, epsilon = 1e-12);
        }
    }

    /// All six geometry types round-trip through their rational form.
    #[test]
    fn test_rational_roundtrips() {
        let curve = fixture_curve();
        let (curve_back, _) = curve.to_rational().to_nonrational();
        assert_eq!(curve_back.control_points(), curve.control_points());

        let surface = BSplineSurface::clamped(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 1.0),
            ],
            (2, 2),
            (1, 1),
        )
        .unwrap();
        let (surface_back, _) = surface.to_rational().to_nonrational();
        assert_eq!(surface_back.control_points(), surface.control_points());

        let mut pts = Vec::new();
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    pts.push(Point3::new(i as f64, j as f64, k as f64));
                }
            }
        }
        let volume = BSplineVolume::clamped(pts, (2, 2, 2), (1, 1, 1)).unwrap();
        let (volume_back, _) = volume.to_rational().to_nonrational();
        assert_eq!(volume_back.control_points(), volume.control_points());
    }
}
