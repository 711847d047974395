use std::env;

use fleet_telemetry::{
    api::{client, server},
    config::{ClientConfig, ServerConfig},
    logging,
};

fn flag(name: &str) -> bool {
    matches!(env::var(name).as_deref(), Ok("1") | Ok("true"))
}

#[tokio::main]
async fn main() {
    let role = env::var("TELEMETRY_ROLE").unwrap_or_else(|_| "client".to_string());
    let json = env::var("TELEMETRY_LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    if let Err(e) = logging::init_logger(&role, flag("TELEMETRY_DEBUG"), json) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    // Start based on role
    let result = match role.as_str() {
        "client" => match ClientConfig::from_env() {
            Ok(config) => client::start_client(config).await,
            Err(e) => Err(e),
        },
        "server" => match ServerConfig::from_env() {
            Ok(config) => server::start_server(config).await,
            Err(e) => Err(e),
        },
        _ => {
            eprintln!("Invalid TELEMETRY_ROLE. Must be 'client' or 'server'");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
