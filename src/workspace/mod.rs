//! Workspace provisioning and request-routing core.
//!
//! `name` derives identities, `inspect` reads live checkout state,
//! `provision` turns a validated name into an isolated checkout, and
//! `registry` multiplexes requests over cached environment handles.

pub mod inspect;
pub mod name;
pub mod provision;
pub mod registry;

pub use name::{WorkspaceName, MAIN_WORKSPACE};
pub use provision::{GitProvisioner, ProvisionError, WorkspaceProvisioner};
pub use registry::{Environment, EnvironmentRegistry};
