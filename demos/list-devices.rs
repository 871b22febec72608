//! Lists devices, tunneling into the cluster when no direct address is given.
//!
//! # Running
//!
//! ```bash
//! DEVICE_SERVICE_NAMESPACE=prod cargo run --example list-devices
//! ```
//!
//! # Environment Variables
//!
//! - `DEVICE_SERVICE_ADDRESS`: `host:port` of the device service; skips the tunnel
//! - `DEVICE_SERVICE_NAMESPACE`: namespace to tunnel into (default: kube client's namespace)
//! - `DEVICE_TUNNEL_*`: tunnel settings, see `TunnelConfig::from_env`

use std::env;

use device_tunnel::{DeviceClient, Tunnel, TunnelConfig};
use tracing::{Level, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let (mut devices, tunnel) = match env::var("DEVICE_SERVICE_ADDRESS") {
        Ok(address) => {
            info!("Connecting directly to {address}");
            (DeviceClient::connect(&address).await?, None)
        }

        Err(_) => {
            let config = TunnelConfig::from_env()?;
            let client = kube::Client::try_default().await?;
            let namespace = env::var("DEVICE_SERVICE_NAMESPACE")
                .unwrap_or_else(|_| client.default_namespace().to_string());

            info!("Opening tunnel into {namespace} for {}", config.selector);
            let tunnel = Tunnel::open(client, &namespace, &config).await?;
            info!(
                "Forwarding {} to {}:{}",
                tunnel.address().unwrap_or_default(),
                tunnel.pod(),
                tunnel.remote_port()
            );

            (DeviceClient::connect_tunnel(&tunnel).await?, Some(tunnel))
        }
    };

    let all = devices.list().await?;
    info!("{} devices", all.len());

    for device in &all {
        let name = device.info.as_ref().map_or("", |info| info.name.as_str());
        info!("{}: {name}", device.id);
    }

    devices.close();
    if let Some(tunnel) = tunnel {
        tunnel.close();
    }

    Ok(())
}
