use std::process::ExitCode;

fn main() -> ExitCode {
    approvey_cli::run()
}
