use std::process::{Child, Command, Stdio};

use tracing::info;

use crate::error::{Result, TransportError};

/// Literal argument token replaced with the bootstrap pipe id at launch.
pub const PIPE_ID_TOKEN: &str = "PIPE_ID";

/// A spawned peer process.
pub struct ChildProcess {
    child: Child,
    program: String,
}

impl ChildProcess {
    /// OS process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// True once the process has exited. Does not block.
    pub fn has_exited(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    /// Wait for the process to exit and return its status code, if any.
    pub fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait()?;
        Ok(status.code())
    }

    /// Forcibly terminate the process. No-op if it already exited.
    pub fn kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// The program path this process was launched from.
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .finish()
    }
}

/// Launch a peer executable, handing it the bootstrap pipe id.
///
/// Every `PIPE_ID` token in `args` is replaced with `pipe_id`; with no
/// args at all, a single argument equal to `pipe_id` is passed. The
/// caller's inheritable handle must stay alive until this returns.
pub fn launch(program: &str, args: &[String], pipe_id: &str) -> Result<ChildProcess> {
    let args = substitute_args(args, pipe_id);

    info!(program, pipe_id, "launching peer process");
    let child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|source| TransportError::Spawn {
            program: program.to_string(),
            source,
        })?;

    Ok(ChildProcess {
        child,
        program: program.to_string(),
    })
}

fn substitute_args(args: &[String], pipe_id: &str) -> Vec<String> {
    if args.is_empty() {
        return vec![pipe_id.to_string()];
    }
    args.iter()
        .map(|arg| arg.replace(PIPE_ID_TOKEN, pipe_id))
        .collect()
}
