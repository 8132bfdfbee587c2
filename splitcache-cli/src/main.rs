mod pull;
mod server;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use self::server::config::SplitcacheConfig;

#[derive(Parser, Debug)]
#[command(name = "splitcache")]
#[command(version)]
#[command(about = "Sync split definitions and serve them as preload scripts", long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short = 'c', long = "config", global = true, default_value = "splitcache.toml")]
    config: String,

    /// SDK key for the change feeds
    #[arg(long = "api-key", global = true, env = "SPLITCACHE_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync once and print the preload script
    Pull {
        /// Split names to include (default: all)
        #[arg(short = 's', long = "split")]
        splits: Vec<String>,

        /// Print the JSON projection instead of a script
        #[arg(long = "json")]
        json: bool,

        /// Write to a file instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<String>,
    },
    /// Keep the cache refreshed and serve preload scripts over HTTP
    Serve {
        /// Port to listen on
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,

        /// Hostname to bind to
        #[arg(long = "hostname")]
        hostname: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = SplitcacheConfig::load(&args.config);
    config.apply_env_overrides();
    if let Some(key) = args.api_key {
        config.split.api_key = Some(key);
    }

    match args.cmd {
        Command::Pull {
            splits,
            json,
            output,
        } => pull::run_pull(config, splits, json, output).await,
        Command::Serve { port, hostname } => server::run_serve(config, port, hostname).await,
    }
}
