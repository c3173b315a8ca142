// src/apply/postaction.rs
//! Post-install actions
//!
//! Only `run` is a first-class action: its first argument is the command,
//! the rest are passed through verbatim. Commands go through the `Exec`
//! capability; without one the step fails.

use crate::capability::{EngineContext, ExecRequest};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Run one post-action in `cwd`
pub fn run_post_action(
    action: &str,
    args: &[String],
    timeout: Duration,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    ctx: &EngineContext,
) -> Result<()> {
    let step = format!("post-action:{}", action);
    if action != "run" {
        return Err(Error::Apply {
            step,
            cause: format!("unsupported post-install action '{}'", action),
        });
    }
    let Some((command, rest)) = args.split_first() else {
        return Err(Error::Apply {
            step,
            cause: "'run' needs a command".to_string(),
        });
    };
    let exec = ctx.exec.as_ref().ok_or_else(|| Error::Apply {
        step: step.clone(),
        cause: "no exec capability configured".to_string(),
    })?;

    info!("Running post-install: {} {}", command, rest.join(" "));
    let request = ExecRequest {
        command: command.clone(),
        args: rest.to_vec(),
        cwd: cwd.to_path_buf(),
        env: env.clone(),
        timeout,
    };
    let output = exec.run(&request)?;
    debug!("{} exited with {}", command, output.status);

    if !output.success() {
        return Err(Error::Apply {
            step,
            cause: format!(
                "{} exited with status {}: {}",
                command,
                output.status,
                output.stderr.trim()
            ),
        });
    }
    Ok(())
}
