//! Process termination and replacement backends.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tracing::info;

use crate::collaborators::ProcessControl;
use crate::error::{LifecycleError, LifecycleResult};

/// Portable restart: start a new process, then exit this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnAndExit;

impl ProcessControl for SpawnAndExit {
    fn replace_process(&self, path: &Path, args: &[String]) -> LifecycleResult<()> {
        let child = Command::new(path)
            .args(args)
            .spawn()
            .map_err(|e| LifecycleError::ProcessReplace {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        info!("Started replacement process (PID: {})", child.id());
        std::process::exit(0);
    }

    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Unix restart: replace the process image in place with `execvp`.
///
/// The PID is kept, so a supervising init system sees a single process.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecReplace;

#[cfg(unix)]
impl ProcessControl for ExecReplace {
    fn replace_process(&self, path: &Path, args: &[String]) -> LifecycleResult<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let to_cstring = |bytes: &[u8]| {
            CString::new(bytes).map_err(|e| LifecycleError::ProcessReplace {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        };

        let program = to_cstring(path.as_os_str().as_bytes())?;
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.clone());
        for arg in args {
            argv.push(to_cstring(arg.as_bytes())?);
        }

        info!("Replacing process image with {:?}", path);
        match nix::unistd::execvp(&program, &argv) {
            Ok(never) => match never {},
            Err(e) => Err(LifecycleError::ProcessReplace {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// The restart backend for this platform.
pub fn native_process_control() -> Arc<dyn ProcessControl> {
    #[cfg(unix)]
    {
        Arc::new(ExecReplace)
    }
    #[cfg(not(unix))]
    {
        Arc::new(SpawnAndExit)
    }
}
