use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    let cli = trialmatch_cli::cli::Cli::parse();
    match trialmatch_cli::cli::run(cli).await {
        Ok(output) => {
            println!("{output}");
            std::process::ExitCode::SUCCESS
        }
        Err(err) => {
            if let Some(match_err) = err.downcast_ref::<trialmatch_cli::error::TrialMatchError>() {
                eprintln!("Error: {match_err}");
            } else {
                eprintln!("Error: {err}");
            }
            std::process::ExitCode::from(1)
        }
    }
}
