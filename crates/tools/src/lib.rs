//! Built-in tool implementations: shell execution, workspace-rooted file
//! operations, and the command-danger classifier the dispatcher uses for
//! approval gating.

pub mod exec;
pub mod fs_ops;
pub mod safety;
