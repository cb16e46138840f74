use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use vertical_relay::modules;
use vertical_relay::proxy;

#[tokio::main]
async fn main() -> Result<(), String> {
    modules::logger::init_logger();

    let mut relay_config = match modules::config::load_relay_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!("failed to load relay config: {}. using defaults", err);
            let cfg = proxy::RelayConfig::default();
            let _ = modules::config::save_relay_config(&cfg);
            cfg
        }
    };

    if let Ok(value) = std::env::var("VERTICAL_RELAY_ALLOW_LAN") {
        let enabled = matches!(value.as_str(), "1" | "true" | "yes" | "on");
        if enabled {
            relay_config.allow_lan_access = true;
        }
    }

    let bind_address = if let Ok(addr) = std::env::var("VERTICAL_RELAY_BIND") {
        if addr != "127.0.0.1" && addr != "localhost" {
            relay_config.allow_lan_access = true;
        }
        addr
    } else {
        relay_config.get_bind_address().to_string()
    };

    let catalog = match modules::catalog::ModelCatalog::load(Path::new(&relay_config.models_file))
    {
        Ok(catalog) => catalog,
        Err(err) => {
            tracing::warn!(
                "failed to load model catalog: {}. starting with an empty catalog",
                err
            );
            modules::catalog::ModelCatalog::default()
        }
    };
    if catalog.is_empty() {
        tracing::warn!("model catalog is empty; /v1/models will list nothing");
    } else {
        tracing::info!(
            "loaded {} models from {}",
            catalog.len(),
            relay_config.models_file
        );
    }

    let client_keys =
        match modules::credentials::load_client_keys(Path::new(&relay_config.client_keys_file)) {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!("failed to load client API keys: {}", err);
                HashSet::new()
            }
        };
    if client_keys.is_empty() {
        tracing::warn!("no client API keys loaded; all API requests will be refused");
    }

    let auth_tokens =
        match modules::credentials::load_auth_tokens(Path::new(&relay_config.tokens_file)) {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::warn!("failed to load backend auth tokens: {}", err);
                Vec::new()
            }
        };
    if !auth_tokens.is_empty() {
        tracing::info!(
            "loaded {} backend auth tokens from {}",
            auth_tokens.len(),
            relay_config.tokens_file
        );
    }

    let upstream = Arc::new(
        proxy::upstream::VerticalClient::new(relay_config.connect_timeout_secs)
            .map_err(|e| format!("failed to build backend client: {}", e))?,
    );

    let (server, handle) = proxy::AxumServer::start(
        bind_address.clone(),
        relay_config.port,
        Arc::new(catalog),
        client_keys,
        auth_tokens,
        upstream,
        relay_config.cache_capacity,
        relay_config.collect_timeout_secs,
    )
    .await
    .map_err(|e| format!("failed to start relay server: {}", e))?;

    tracing::info!(
        "vertical-relay listening on http://{}:{}",
        bind_address,
        relay_config.port
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {}", e))?;

    tracing::info!("shutdown requested, stopping server...");
    server.stop();
    let _ = handle.await;

    Ok(())
}
