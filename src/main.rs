use proxy_ng::bootstrap;
use proxy_ng::cli::{version_string, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    if cli.version {
        println!("{}", version_string());
        return Ok(());
    }

    let default_filter = if cli.verbose { "info,proxy_ng=debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    bootstrap::run(cli.into_config()).await
}
