//! Startup utilities for the Review App operator

mod crds;

pub use crds::{crd_manifests, ensure_crds_installed};
