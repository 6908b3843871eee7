//! Service runner backends

mod kube;
mod local;

pub use kube::KubeRunner;
pub use local::LocalRunner;
