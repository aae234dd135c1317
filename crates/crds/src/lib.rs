//! Package bundle CRD definitions
//!
//! Kubernetes Custom Resource Definitions shared by the bundle manager and
//! the package bundle controller.

pub mod package_bundle;
pub mod package_bundle_controller;

pub use package_bundle::*;
pub use package_bundle_controller::*;

/// API group of every resource in this crate.
pub const API_GROUP: &str = "packages.eks.amazonaws.com";
