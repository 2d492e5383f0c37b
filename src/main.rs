//! CurveLink - command-line front end
//!
//! Evaluates functions on the local compute server and prints the curve.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use curvelink::config::{self, Config};
use curvelink::network::{Client, ClientError};
use curvelink::protocol::{self, Curve, EvaluationRequest};
use curvelink::transport;

/// CurveLink - evaluate functions on a local compute server
#[derive(Parser)]
#[command(name = "curvelink")]
#[command(author = "CurveLink Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Evaluate a function on the local compute server and print the curve", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Socket path or pipe name of the server
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a function over a domain
    Eval {
        /// Function selector (see `functions`)
        #[arg(short, long)]
        function: String,

        /// Start of the domain
        #[arg(long, allow_hyphen_values = true)]
        from: f64,

        /// End of the domain
        #[arg(long, allow_hyphen_values = true)]
        to: f64,

        /// Number of points to compute
        #[arg(short, long)]
        points: u32,

        /// Order parameter for functions that take one
        #[arg(short, long, default_value_t = 0)]
        order: u32,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Tell the server to abandon its current computation
    Stop,

    /// List the functions in the catalog
    Functions,

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show system information
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint.path = Some(endpoint.clone());
    }

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Eval {
            function,
            from,
            to,
            points,
            order,
            format,
        } => {
            let request = EvaluationRequest::new(function, from, to, points).with_order(order);
            run_eval(&config, request, format).await?;
        }
        Commands::Stop => {
            run_stop(&config).await?;
        }
        Commands::Functions => {
            for entry in &config.functions {
                if entry.takes_order {
                    println!("{} (order 0..={})", entry.name, config.limits.max_order);
                } else {
                    println!("{}", entry.name);
                }
            }
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_system_info(&config);
        }
    }

    Ok(())
}

/// Validate, send one request, print the curve
async fn run_eval(config: &Config, request: EvaluationRequest, format: OutputFormat) -> anyhow::Result<()> {
    config.validate(&request)?;

    let endpoint = config.endpoint();
    let mut client = Client::new(config.network_config());
    client.connect(&endpoint).await.map_err(|e| {
        tracing::error!("Make sure the server is running and listening on {}", endpoint);
        e
    })?;

    tracing::info!(
        "Computing '{}' on [{}, {}] with {} points",
        request.function,
        request.domain_start,
        request.domain_end,
        request.sample_count
    );

    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let result = client.evaluate_cancellable(&request, cancel).await;
    client.disconnect().await;

    match result {
        Ok(curve) => {
            print_curve(&curve, format)?;
            Ok(())
        }
        Err(ClientError::Cancelled) => {
            eprintln!("Cancelled; stop sent to server.");
            Ok(())
        }
        Err(e) if e.is_server_rejection() => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

/// Connect only to deliver the stop message
async fn run_stop(config: &Config) -> anyhow::Result<()> {
    let endpoint = config.endpoint();
    let mut client = Client::new(config.network_config());
    client.connect(&endpoint).await?;
    client.stop().await?;
    println!("Stop sent to {}", endpoint);
    Ok(())
}

fn print_curve(curve: &Curve, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(curve)?);
        }
        OutputFormat::Csv => {
            println!("x,y");
            for p in &curve.points {
                println!("{},{}", p.x, p.y);
            }
        }
        OutputFormat::Table => {
            println!("{:>24} {:>24}", "x", "y");
            for p in &curve.points {
                println!("{:>24} {:>24}", p.x, p.y);
            }

            let (x0, xn) = curve.x_range();
            println!("\n{} points of '{}'", curve.len(), curve.function);
            println!("x axis: [{}, {}]", x0, xn);
            if let Some((lo, hi)) = curve.y_range() {
                println!("y axis: [{}, {}]", lo, hi);
            }
        }
    }
    Ok(())
}

/// Print system information
fn print_system_info(config: &Config) {
    println!("CurveLink System Information");
    println!("============================\n");

    println!("Transport: {}", transport::transport_name());
    println!("Default endpoint: {}", transport::default_endpoint());
    println!("Configured endpoint: {}", config.endpoint());
    println!("Length accounting: {:?}", config.protocol.length_accounting);
    println!("Reply timeout: {} ms", config.timeouts.reply_timeout_ms);
    println!("\nPipe name: {}", protocol::PIPE_NAME);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["curvelink", "info"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_eval_parsing() {
        let cli = Cli::try_parse_from([
            "curvelink", "eval", "-f", "bessel", "--from", "-5", "--to", "5", "-p", "100", "-o", "2", "--format", "csv",
        ])
        .unwrap();

        match cli.command {
            Commands::Eval {
                function,
                from,
                to,
                points,
                order,
                format,
            } => {
                assert_eq!(function, "bessel");
                assert_eq!(from, -5.0);
                assert_eq!(to, 5.0);
                assert_eq!(points, 100);
                assert_eq!(order, 2);
                assert_eq!(format, OutputFormat::Csv);
            }
            _ => panic!("Wrong command"),
        }
    }

    #[test]
    fn test_eval_requires_points() {
        let cli = Cli::try_parse_from(["curvelink", "eval", "-f", "sin", "--from", "0", "--to", "1"]);
        assert!(cli.is_err());
    }
}
