//! Error types for spline operations.

use thiserror::Error;

/// Errors that can occur during spline construction and manipulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplineError {
    /// Insufficient control points for the requested degree.
    #[error("insufficient control points: need at least {required}, got {actual}")]
    InsufficientControlPoints {
        /// Minimum required control points (`degree + 1`).
        required: usize,
        /// Actual number of control points provided.
        actual: usize,
    },

    /// Knot vector is invalid (not non-decreasing, empty, etc.).
    #[error("invalid knot vector: {reason}")]
    InvalidKnotVector {
        /// Description of what's wrong with the knot vector.
        reason: String,
    },

    /// Knot vector has the wrong length for the control point count and degree.
    #[error("knot vector length mismatch: expected {expected}, got {actual}")]
    KnotVectorSize {
        /// Expected length (`num_control_points + degree + 1`).
        expected: usize,
        /// Actual length provided.
        actual: usize,
    },

    /// A companion list has the wrong length (weight list, control grid).
    #[error("{what} count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// What was being counted ("weights", "control grid", ...).
        what: String,
        /// Expected count.
        expected: usize,
        /// Actual count provided.
        actual: usize,
    },

    /// Weight values are invalid (non-positive).
    #[error("invalid weight at index {index}: {value} (must be positive)")]
    InvalidWeight {
        /// Index of the invalid weight.
        index: usize,
        /// The invalid weight value.
        value: f64,
    },

    /// Parameter is outside the knot vector's valid domain.
    #[error("parameter {parameter} is outside the domain [{min}, {max}]")]
    ParameterOutOfDomain {
        /// The offending parameter value.
        parameter: f64,
        /// Lower bound of the valid domain.
        min: f64,
        /// Upper bound of the valid domain.
        max: f64,
    },

    /// Knot insertion count exceeds what the degree allows.
    #[error(
        "cannot insert knot {knot} {requested} time(s): existing multiplicity \
         is {multiplicity}"
    )]
    CannotInsertKnot {
        /// The knot value requested for insertion.
        knot: f64,
        /// Number of insertions requested.
        requested: usize,
        /// Current multiplicity of the knot.
        multiplicity: usize,
    },

    /// Knot removal count exceeds the knot's multiplicity.
    #[error(
        "cannot remove knot {knot} {requested} time(s): current multiplicity \
         is {multiplicity}"
    )]
    CannotRemoveKnot {
        /// The knot value requested for removal.
        knot: f64,
        /// Number of removals requested.
        requested: usize,
        /// Current multiplicity of the knot.
        multiplicity: usize,
    },

    /// Refinement density must be a positive integer.
    #[error("invalid refinement density: {density} (must be >= 1)")]
    InvalidDensity {
        /// The offending density value.
        density: usize,
    },

    /// Degree is too low for the requested operation.
    #[error("degree {degree} is too low: operation requires at least {min}")]
    DegreeTooLow {
        /// Current degree.
        degree: usize,
        /// Minimum degree the operation supports.
        min: usize,
    },

    /// Operation requires a Bezier segment (exactly `degree + 1` control points).
    #[error("not a Bezier segment: expected exactly {expected} control points, got {actual}")]
    NotBezier {
        /// Expected control point count (`degree + 1`).
        expected: usize,
        /// Actual control point count.
        actual: usize,
    },

    /// Segments cannot be linked (endpoints don't meet).
    #[error("segments cannot be linked: endpoint gap of {gap}")]
    CannotLink {
        /// Distance between the adjoining segment endpoints.
        gap: f64,
    },

    /// Operation is not supported for this geometry.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: String,
    },
}

impl SplineError {
    /// Create an insufficient control points error.
    #[must_use]
    pub fn insufficient_points(required: usize, actual: usize) -> Self {
        Self::InsufficientControlPoints { required, actual }
    }

    /// Create an invalid knot vector error.
    #[must_use]
    pub fn invalid_knot_vector(reason: impl Into<String>) -> Self {
        Self::InvalidKnotVector {
            reason: reason.into(),
        }
    }

    /// Create a parameter-out-of-domain error.
    #[must_use]
    pub fn out_of_domain(parameter: f64, domain: (f64, f64)) -> Self {
        Self::ParameterOutOfDomain {
            parameter,
            min: domain.0,
            max: domain.1,
        }
    }

    /// Create an unsupported operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a count mismatch error.
    #[must_use]
    pub fn count_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::CountMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// Check if this is an insufficient control points error.
    #[must_use]
    pub fn is_insufficient_points(&self) -> bool {
        matches!(self, Self::InsufficientControlPoints { .. })
    }

    /// Check if this is a parameter-out-of-domain error.
    #[must_use]
    pub fn is_out_of_domain(&self) -> bool {
        matches!(self, Self::ParameterOutOfDomain { .. })
    }

    /// Check if this is an operation-infeasibility error (insertion, removal,
    /// density, degree, or Bezier precondition violations).
    #[must_use]
    pub fn is_infeasible(&self) -> bool {
        matches!(
            self,
            Self::CannotInsertKnot { .. }
                | Self::CannotRemoveKnot { .. }
                | Self::InvalidDensity { .. }
                | Self::DegreeTooLow { .. }
                | Self::NotBezier { .. }
        )
    }

    /// Check if this is an unsupported operation signal.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
