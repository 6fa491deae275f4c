use dashboard_gateway::{api::server, config::GatewayConfig, logging};
use tracing::error;

#[tokio::main]
async fn main() {
    // Initialize logging
    logging::init_logger();

    let config = GatewayConfig::from_env();

    if let Err(e) = server::start_server(config).await {
        error!("Gateway stopped: {}", e);
        std::process::exit(1);
    }
}
