//! Relay server command: `portrelay serve`.

use anyhow::{Result, bail};
use portrelay::config::RelayConfig;
use portrelay::logging::init_logging;
use tracing::info;

use crate::ServeArgs;

/// Apply CLI flags on top of file and environment values.
pub fn apply_overrides(config: &mut RelayConfig, args: &ServeArgs) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(api_base) = &args.api_base {
        config.upstream.api_base = api_base.clone();
    }
    if let Some(ws_url) = &args.ws_url {
        config.upstream.ws_url = ws_url.clone();
    }
}

pub async fn cmd_serve(mut config: RelayConfig, args: &ServeArgs) -> Result<()> {
    apply_overrides(&mut config, args);

    let problems = config.validate();
    if !problems.is_empty() {
        bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
    }

    let _guard = init_logging(&config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        dev = args.dev,
        "starting portrelay"
    );

    portrelay::server::start_server(config, args.dev).await
}
