#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Device service client for [Tonic](https://docs.rs/tonic), with Kubernetes
//! port-forward tunnels for reaching the service from outside the cluster.
//!
//! When the device service is not directly routable, [`Tunnel::open`] finds
//! the first ready pod matching a label selector and forwards a local port to
//! it through the Kubernetes API. The tunnel's local address is then used to
//! connect a [`DeviceClient`].
//!
//! # Features
//!
//! - **Pod discovery**: first ready pod in listing order, never a random one
//! - **Owned tunnels**: released on [`Tunnel::close`] or drop, including when
//!   opening is cancelled
//! - **Injectable collaborators**: [`PodLister`], [`Forwarder`] and
//!   [`DeviceService`] can be replaced with fakes
//!
//! # Usage
//!
//! ```ignore
//! use device_tunnel::{DeviceClient, Tunnel, TunnelConfig};
//!
//! let client = kube::Client::try_default().await?;
//! let config = TunnelConfig::from_env()?;
//! let tunnel = Tunnel::open(client, "prod", &config).await?;
//!
//! let mut devices = DeviceClient::connect_tunnel(&tunnel).await?;
//! for device in devices.list().await? {
//!     println!("{}", device.id);
//! }
//!
//! devices.close();
//! tunnel.close();
//! ```

mod client;
mod config;
mod error;
mod locate;
mod proto;
mod readiness;
mod tunnel;

#[cfg(test)]
mod testing;

pub use client::{DeviceClient, DeviceService};
pub use config::{DEFAULT_REMOTE_PORT, DEFAULT_SELECTOR, Selector, TunnelConfig};
pub use error::{BoxError, Error, ErrorKind, Result};
pub use locate::{PodLister, locate};
pub use proto::device_service_client::DeviceServiceClient;
pub use proto::{
    CreateDeviceRequest, CreateDeviceResponse, DeleteDeviceRequest, DeleteDeviceResponse, Device,
    DeviceInfo, GetDeviceRequest, GetDeviceResponse, ListDevicesRequest, ListDevicesResponse,
    UpdateDeviceRequest, UpdateDeviceResponse,
};
pub use readiness::is_ready;
pub use tunnel::{
    Forward, ForwardTarget, Forwarder, PodForward, PodForwarder, Tunnel, TunnelState, open,
};
