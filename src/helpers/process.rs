use std::{
    path::Path,
    process::{Command, Stdio},
};

use tracing::{debug, error};

use crate::{error::DecoderError, util::display_command};

/// Which output stream of a short-lived command the caller is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Capture {
    /// Return stdout; a non-zero exit status is an error.
    Stdout,
    /// Return stderr (falling back to stdout when stderr is empty); the exit
    /// status is ignored because diagnostic runs routinely fail on purpose.
    Diagnostics,
}

/// Runs `program` with `args` to completion and returns the captured text.
///
/// Arguments are passed argv-style and never go through a shell. Stdin is
/// always closed.
pub(crate) fn run_program<S: AsRef<str>>(
    program: &Path,
    args: &[S],
    capture: Capture,
) -> Result<String, DecoderError> {
    let command_line = display_command(program, args);
    debug!(command = %command_line, "running command");

    let mut command = Command::new(program);
    for arg in args {
        let arg: &str = arg.as_ref();
        command.arg(arg);
    }
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(match capture {
            Capture::Stdout => Stdio::null(),
            Capture::Diagnostics => Stdio::piped(),
        })
        .output()
        .map_err(|e| DecoderError::SpawnError {
            command: program.to_string_lossy().into_owned(),
            cause: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    match capture {
        Capture::Stdout => {
            if !output.status.success() {
                error!(command = %command_line, status = %output.status, "command failed");
                return Err(DecoderError::CommandFailed {
                    command: command_line,
                    status: output.status.to_string(),
                    output: stdout,
                });
            }
            if stdout.trim().is_empty() {
                error!(command = %command_line, "command produced no output");
            }
            Ok(stdout)
        }
        Capture::Diagnostics => {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if stderr.trim().is_empty() {
                if stdout.trim().is_empty() {
                    error!(command = %command_line, "command produced no output");
                }
                Ok(stdout)
            } else {
                Ok(stderr)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn stdout_capture_rejects_failures() {
        let err = run_program(Path::new("sh"), &["-c", "echo nope; exit 3"], Capture::Stdout)
            .unwrap_err();
        match err {
            DecoderError::CommandFailed { output, .. } => assert_eq!(output.trim(), "nope"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn diagnostics_tolerate_failures() {
        let text = run_program(
            Path::new("sh"),
            &["-c", "echo banner >&2; exit 1"],
            Capture::Diagnostics,
        )
        .unwrap();
        assert_eq!(text.trim(), "banner");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run_program(
            Path::new("definitely-not-a-real-program-name"),
            &["-version"],
            Capture::Stdout,
        )
        .unwrap_err();
        assert!(matches!(err, DecoderError::SpawnError { .. }));
    }
}
