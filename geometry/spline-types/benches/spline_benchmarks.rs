//! Benchmarks for spline evaluation and knot manipulation.
//!
//! Run with: cargo bench -p spline-types
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p spline-types -- --save-baseline main
//! 2. After changes: cargo bench -p spline-types -- --baseline main

#![allow(missing_docs, clippy::cast_precision_loss)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::Point3;
use spline_types::{BSplineCurve, BSplineSurface, NurbsCurve, SpanSearch};

// =============================================================================
// Test Geometry Generation
// =============================================================================

/// A clamped cubic curve with `n` control points on a sine wave.
fn create_curve(n: usize) -> BSplineCurve {
    let pts: Vec<Point3<f64>> = (0..n)
        .map(|i| {
            let x = i as f64;
            Point3::new(x, (x * 0.7).sin() * 10.0, 0.0)
        })
        .collect();
    BSplineCurve::clamped(pts, 3).expect("valid curve")
}

/// A rational quarter circle.
fn create_arc() -> NurbsCurve {
    let w = std::f64::consts::FRAC_1_SQRT_2;
    NurbsCurve::clamped(
        vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ],
        vec![1.0, w, 1.0],
        2,
    )
    .expect("valid arc")
}

/// A bicubic surface over an `n x n` wavy grid.
fn create_surface(n: usize) -> BSplineSurface {
    let mut pts = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            let x = i as f64;
            let y = j as f64;
            pts.push(Point3::new(x, y, ((x + y) * 0.5).sin()));
        }
    }
    BSplineSurface::clamped(pts, (n, n), (3, 3)).expect("valid surface")
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_curve_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("curve_evaluation");

    for n in [8, 32, 128] {
        let curve = create_curve(n);
        group.bench_with_input(BenchmarkId::new("point_at", n), &curve, |b, curve| {
            b.iter(|| {
                for i in 0..100 {
                    let u = i as f64 / 99.0;
                    black_box(curve.point_at(u));
                }
            });
        });
    }

    let curve = create_curve(32);
    let binary = create_curve(32).with_span_search(SpanSearch::Binary);
    group.bench_function("span_linear", |b| {
        b.iter(|| black_box(curve.point_at(black_box(0.37))));
    });
    group.bench_function("span_binary", |b| {
        b.iter(|| black_box(binary.point_at(black_box(0.37))));
    });

    group.finish();
}

fn bench_derivatives(c: &mut Criterion) {
    let mut group = c.benchmark_group("derivatives");

    let curve = create_curve(32);
    group.bench_function("curve_order_2", |b| {
        b.iter(|| black_box(curve.derivatives(black_box(0.37), 2)));
    });

    let arc = create_arc();
    group.bench_function("rational_order_2", |b| {
        b.iter(|| black_box(arc.derivatives(black_box(0.37), 2)));
    });

    let surface = create_surface(8);
    group.bench_function("surface_order_2", |b| {
        b.iter(|| black_box(surface.derivatives(black_box(0.37), black_box(0.61), 2)));
    });

    group.finish();
}

fn bench_knot_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("knot_algorithms");

    let curve = create_curve(32);
    group.bench_function("insert_single", |b| {
        b.iter(|| black_box(curve.insert_knot(black_box(0.37), 1).expect("insertion")));
    });

    let refinement: Vec<f64> = (1..20).map(|i| i as f64 / 20.0).collect();
    group.bench_function("refine_19_knots", |b| {
        b.iter(|| black_box(curve.refine_knots(black_box(&refinement)).expect("refinement")));
    });

    let inserted = curve.insert_knot(0.37, 1).expect("insertion");
    group.bench_function("remove_single", |b| {
        b.iter(|| black_box(inserted.remove_knot(black_box(0.37), 1).expect("removal")));
    });

    group.finish();
}

fn bench_degree_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("degree_algorithms");

    let curve = create_curve(16);
    group.bench_function("decompose", |b| {
        b.iter(|| black_box(curve.decompose().expect("decomposition")));
    });
    group.bench_function("elevate_by_1", |b| {
        b.iter(|| black_box(curve.elevate_degree(1).expect("elevation")));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_curve_evaluation,
    bench_derivatives,
    bench_knot_algorithms,
    bench_degree_algorithms
);
criterion_main!(benches);
