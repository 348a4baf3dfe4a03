use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Query the edge gateway health surface", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate health of every backend
    Health,
    /// Health and breaker state of one backend
    Service {
        /// Backend name, e.g. user-service
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let url = match &cli.command {
        Commands::Health => format!("{base}/health"),
        Commands::Service { name } => format!("{base}/health/{name}"),
    };

    let res = client.get(url).send().await?;
    print_response(res).await
}

/// 503 still carries a health report, so only other failures are errors.
async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{text}"),
    }

    if status.is_success() {
        Ok(())
    } else if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        eprintln!("Gateway reports unhealthy backends");
        std::process::exit(2);
    } else {
        Err(format!("gateway returned status {status}").into())
    }
}
