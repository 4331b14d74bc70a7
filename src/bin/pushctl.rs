//! Operator tool for the channel broker.
//!
//! Publishes and inspects channels through the loopback publish endpoint, and
//! can subscribe through a public endpoint to watch what clients receive.

use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use serde_json::Value;
use url::Url;

#[derive(Parser)]
#[command(name = "pushctl")]
#[command(about = "Publish to and inspect ca-gateway channels", long_about = None)]
struct Cli {
    /// Base URL of the loopback publish endpoint.
    #[arg(short, long, env = "PUSHCTL_URL", default_value = "http://127.0.0.1:80")]
    url: Url,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a message to a channel
    Publish {
        channel: String,
        message: String,
        #[arg(long, default_value = "text/plain")]
        content_type: String,
    },
    /// Show a channel's subscribers and sequence
    Info { channel: String },
    /// End every subscription on a channel
    Close { channel: String },
    /// Subscribe and print what arrives
    Subscribe {
        channel: String,
        /// Base URL of a public endpoint.
        #[arg(long, default_value = "http://127.0.0.1:80")]
        public_url: Url,
        #[arg(long, value_enum, default_value_t = Mode::Stream)]
        mode: Mode,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// One long-poll request
    Poll,
    /// Follow the event stream until interrupted
    Stream,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .no_proxy()
        .build()?;
    let base = cli.url.as_str().trim_end_matches('/');

    match cli.command {
        Commands::Publish {
            channel,
            message,
            content_type,
        } => {
            let res = client
                .post(format!("{base}/ev/pub/{channel}"))
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(message)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Info { channel } => {
            let res = client.get(format!("{base}/ev/pub/{channel}")).send().await?;
            print_response(res).await?;
        }
        Commands::Close { channel } => {
            let res = client.delete(format!("{base}/ev/pub/{channel}")).send().await?;
            print_response(res).await?;
        }
        Commands::Subscribe {
            channel,
            public_url,
            mode,
        } => {
            let public = public_url.as_str().trim_end_matches('/');
            match mode {
                Mode::Poll => {
                    let res = client.get(format!("{public}/lp/sub/{channel}")).send().await?;
                    match res.status() {
                        reqwest::StatusCode::NO_CONTENT => eprintln!("No message before timeout"),
                        status if status.is_success() => println!("{}", res.text().await?),
                        status => eprintln!("Error: gateway returned status {status}"),
                    }
                }
                Mode::Stream => {
                    let res = client.get(format!("{public}/ev/sub/{channel}")).send().await?;
                    if !res.status().is_success() {
                        eprintln!("Error: gateway returned status {}", res.status());
                        return Ok(());
                    }
                    let mut body = res.bytes_stream();
                    let mut stdout = std::io::stdout();
                    while let Some(chunk) = body.next().await {
                        stdout.write_all(&chunk?)?;
                        stdout.flush()?;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: publish endpoint returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
