use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match acrnd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            // Nothing else can report a failed write to stderr.
            drop(writeln!(stderr, "acrnd: {error}"));
            ExitCode::FAILURE
        }
    }
}
