use anyhow::Result;
use rollout::cli::build_cli;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    rollout::cli::handlers::dispatch(&matches).await
}
