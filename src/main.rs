//! Rathole Fleet - rathole 中继集群管理
//!
//! Usage:
//! - Normal mode: `rathole-fleet`
//! - With custom port: `rathole-fleet --port 9000`

use rathole_fleet::RuntimeConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("Rathole Fleet - rathole relay fleet manager");
    println!();
    println!("USAGE:");
    println!("    rathole-fleet [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port (default: $PORT or 8000)");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    API_KEY                 Key required in the x-api-key header");
    println!("    DATABASE_URL            SQLite URL (default: sqlite://rathole_manager.db?mode=rwc)");
    println!("    CREDENTIAL_KEY          Base64 32-byte key for stored SSH passwords");
    println!("    DEPLOY_CONCURRENCY      Hosts provisioned in parallel (default: 1)");
    println!("    RUST_LOG                Log filter");
}

fn main() -> anyhow::Result<()> {
    let config = parse_args();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rathole_fleet=debug,tower_http=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(rathole_fleet::init_and_run(config))
}
