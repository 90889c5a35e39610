use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "mesh-cli")]
#[command(about = "Client for the distributed-tracing mesh gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service health
    Health,
    /// Dump Prometheus metrics
    Metrics,
    /// Place an order through the gateway
    Order {
        user_id: u64,
        product: String,
        amount: f64,
        /// Join an existing trace instead of starting a new one
        #[arg(long)]
        traceparent: Option<String>,
    },
    /// Look up a user through the gateway
    User { id: u64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut defaults = HeaderMap::new();
    defaults.insert(
        "x-request-id",
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())?,
    );
    let client = reqwest::Client::builder()
        .default_headers(defaults)
        .build()?;

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Metrics => {
            let res = client.get(format!("{}/metrics", cli.url)).send().await?;
            println!("{}", res.text().await?);
        }
        Commands::Order {
            user_id,
            product,
            amount,
            traceparent,
        } => {
            let mut headers = HeaderMap::new();
            if let Some(traceparent) = traceparent {
                headers.insert("traceparent", HeaderValue::from_str(&traceparent)?);
            }
            let res = client
                .post(format!("{}/api/v1/orders", cli.url))
                .headers(headers)
                .json(&json!({ "user_id": user_id, "product": product, "amount": amount }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::User { id } => {
            let res = client
                .get(format!("{}/api/v1/users/{}", cli.url, id))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let request_id = res
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let trace_id = res
        .headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
    }
    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    println!("x-request-id: {}", request_id);
    println!("x-trace-id: {}", trace_id);
    Ok(())
}
