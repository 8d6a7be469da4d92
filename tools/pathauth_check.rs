//! Offline rule checker for pathauth configurations.
//!
//! Loads a configuration, evaluates one synthetic request and prints the
//! matched rule and the decision.
//!
//! Usage:
//!   cargo run --features cli --bin pathauth-check -- <config> <METHOD> <URL> [OPTIONS]
//!
//! Options:
//!   --role ROLE   Add a role (repeatable)
//!   --ip ADDR     Client address for ClientIP matchers
//!   --help        Show help
//!
//! Exit status: 0 forwarded, 1 denied, 2 usage or configuration error.

use axum::extract::ConnectInfo;
use axum_pathauth::{Outcome, PathAuthConfig, RequestContext};
use http::Request;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command line.
#[derive(Debug, PartialEq)]
struct CheckArgs {
    config: PathBuf,
    method: String,
    url: String,
    roles: Vec<String>,
    ip: Option<IpAddr>,
}

/// Parse arguments. `Ok(None)` means help was requested.
fn parse_args(args: &[String]) -> Result<Option<CheckArgs>, String> {
    let mut positional = Vec::new();
    let mut roles = Vec::new();
    let mut ip = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--role" => {
                let role = iter.next().ok_or("--role needs a value")?;
                roles.push(role.clone());
            }
            "--ip" => {
                let addr = iter.next().ok_or("--ip needs a value")?;
                let addr = addr
                    .parse::<IpAddr>()
                    .map_err(|e| format!("invalid --ip {addr:?}: {e}"))?;
                ip = Some(addr);
            }
            _ if !arg.starts_with('-') => positional.push(arg.clone()),
            _ => return Err(format!("Unknown option: {arg}")),
        }
    }

    let [config, method, url]: [String; 3] = positional
        .try_into()
        .map_err(|p: Vec<String>| format!("expected <config> <METHOD> <URL>, got {} arguments", p.len()))?;

    Ok(Some(CheckArgs {
        config: PathBuf::from(config),
        method: method.to_ascii_uppercase(),
        url,
        roles,
        ip,
    }))
}

fn load_config(path: &Path) -> Result<PathAuthConfig, axum_pathauth::ConfigError> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        PathAuthConfig::from_json_file(path)
    } else {
        PathAuthConfig::from_toml_file(path)
    }
}

fn build_request(args: &CheckArgs, config: &PathAuthConfig) -> Result<Request<()>, http::Error> {
    let mut builder = Request::builder()
        .method(args.method.as_str())
        .uri(args.url.as_str());

    let header = config.source.name.trim();
    match config.source.delimiter.as_deref().filter(|d| !d.is_empty()) {
        Some(delimiter) if !args.roles.is_empty() => {
            builder = builder.header(header, args.roles.join(delimiter));
        }
        _ => {
            for role in &args.roles {
                builder = builder.header(header, role.as_str());
            }
        }
    }

    if let Some(ip) = args.ip {
        builder = builder.extension(ConnectInfo(SocketAddr::new(ip, 0)));
    }

    builder.body(())
}

fn print_help() {
    println!("pathauth rule checker");
    println!();
    println!("Usage: pathauth-check <config.toml|config.json> <METHOD> <URL> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --role ROLE   Add a role (repeatable)");
    println!("  --ip ADDR     Client address for ClientIP matchers");
    println!("  --help        Show this help message");
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_pathauth=warn".into()),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&args) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run with --help for usage.");
            return ExitCode::from(2);
        }
    };

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}: {e}", args.config.display());
            return ExitCode::from(2);
        }
    };

    let layer = match config.build_layer() {
        Ok(layer) => layer,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    let request = match build_request(&args, &config) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: invalid request: {e}");
            return ExitCode::from(2);
        }
    };

    println!("{} rules loaded from {}", layer.table().len(), args.config.display());

    let ctx = RequestContext::from_request(&request, args.ip);
    match layer.table().match_request(&ctx) {
        Some(rule) => println!(
            "rule:     {} (priority {})",
            rule.expression(),
            rule.effective_priority()
        ),
        None => println!("rule:     no rule matched"),
    }

    match layer.state().evaluate(&request) {
        Outcome::Unmatched => {
            println!("decision: forward (no rule)");
            ExitCode::SUCCESS
        }
        Outcome::Allowed => {
            println!("decision: forward (allowed)");
            ExitCode::SUCCESS
        }
        Outcome::Denied(denied) => {
            println!("decision: deny 403 ({denied})");
            ExitCode::from(1)
        }
    }
}
