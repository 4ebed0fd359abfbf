//! Command-line surface.
//!
//! Thin by design: `--dir`, `--cli`, `--yolo`, `--mouse`/`--no-mouse`.
//! Exit code 0 on success, 1 on argument error or fatal startup error.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "coworker", about = "Local coworker server", disable_version_flag = true)]
pub struct Args {
    /// Workspace directory for the session.
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Run an interactive terminal session instead of the server.
    #[arg(long)]
    pub cli: bool,

    /// Auto-approve every gated tool call.
    #[arg(long)]
    pub yolo: bool,

    /// Enable mouse reporting in terminal mode (default).
    #[arg(long, overrides_with = "no_mouse")]
    pub mouse: bool,

    /// Disable mouse reporting in terminal mode.
    #[arg(long, overrides_with = "mouse")]
    pub no_mouse: bool,
}

impl Args {
    /// Whether mouse reporting is effectively on.
    pub fn mouse_enabled(&self) -> bool {
        !self.no_mouse
    }

    /// Render back to the argv form that parses to the same value.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = vec!["coworker".to_owned()];
        if let Some(dir) = &self.dir {
            argv.push("--dir".into());
            argv.push(dir.display().to_string());
        }
        if self.cli {
            argv.push("--cli".into());
        }
        if self.yolo {
            argv.push("--yolo".into());
        }
        if self.mouse {
            argv.push("--mouse".into());
        }
        if self.no_mouse {
            argv.push("--no-mouse".into());
        }
        argv
    }
}
