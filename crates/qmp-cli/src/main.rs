//! Entry point for `qmpc`.
//!
//! The binary delegates to [`qmp_cli::run`], which loads configuration,
//! connects to the configured monitor, and prints replies or events.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    qmp_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
