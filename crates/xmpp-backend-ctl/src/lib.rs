//! Backend driving the `ejabberdctl` command line utility.
//!
//! Requires `mod_admin_extra`. Note that passwords are passed on the command line and
//! are visible in the process list of the host.

mod backend;
mod output;

pub use backend::{CtlConfig, EjabberdctlBackend, DEFAULT_EJABBERDCTL_PATH};
