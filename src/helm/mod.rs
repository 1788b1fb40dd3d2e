//! Helm integration
//!
//! Installs add-on charts and the Helm server-side component by shelling out
//! to the `helm` binary.

mod client;

pub use client::{control_plane_init_args, HelmClient, PackageManager};

#[cfg(test)]
pub use client::MockPackageManager;
