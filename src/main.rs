use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    reviewgate::cli::parse_cli_commands().await
}
