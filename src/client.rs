//! Device service client.
//!
//! [`DeviceClient`] maps each operation onto exactly one RPC. It is generic
//! over [`DeviceService`] so it can run against the gRPC client or a fake.

use std::future::Future;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tonic::Status;
use tonic::transport::{Channel, Endpoint};

use crate::error::{Error, Result};
use crate::proto::device_service_client::DeviceServiceClient;
use crate::proto::{
    CreateDeviceRequest, DeleteDeviceRequest, Device, DeviceInfo, GetDeviceRequest,
    ListDevicesRequest, UpdateDeviceRequest,
};
use crate::tunnel::{Forward, Tunnel};

/// The device RPCs [`DeviceClient`] relies on.
pub trait DeviceService {
    /// Creates a device and returns it, if the server sent one.
    fn create(
        &mut self,
        request: CreateDeviceRequest,
    ) -> impl Future<Output = std::result::Result<Option<Device>, Status>> + Send;

    /// Fetches a device, if the server sent one.
    fn get(
        &mut self,
        request: GetDeviceRequest,
    ) -> impl Future<Output = std::result::Result<Option<Device>, Status>> + Send;

    /// Updates a device, if the server sent one back.
    fn update(
        &mut self,
        request: UpdateDeviceRequest,
    ) -> impl Future<Output = std::result::Result<Option<Device>, Status>> + Send;

    /// Starts streaming all devices.
    fn list(
        &mut self,
        request: ListDevicesRequest,
    ) -> impl Future<
        Output = std::result::Result<
            BoxStream<'static, std::result::Result<Option<Device>, Status>>,
            Status,
        >,
    > + Send;

    /// Deletes a device.
    fn delete(
        &mut self,
        request: DeleteDeviceRequest,
    ) -> impl Future<Output = std::result::Result<(), Status>> + Send;
}

impl DeviceService for DeviceServiceClient<Channel> {
    async fn create(
        &mut self,
        request: CreateDeviceRequest,
    ) -> std::result::Result<Option<Device>, Status> {
        Ok(DeviceServiceClient::create(self, request)
            .await?
            .into_inner()
            .device)
    }

    async fn get(
        &mut self,
        request: GetDeviceRequest,
    ) -> std::result::Result<Option<Device>, Status> {
        Ok(DeviceServiceClient::get(self, request)
            .await?
            .into_inner()
            .device)
    }

    async fn update(
        &mut self,
        request: UpdateDeviceRequest,
    ) -> std::result::Result<Option<Device>, Status> {
        Ok(DeviceServiceClient::update(self, request)
            .await?
            .into_inner()
            .device)
    }

    async fn list(
        &mut self,
        request: ListDevicesRequest,
    ) -> std::result::Result<
        BoxStream<'static, std::result::Result<Option<Device>, Status>>,
        Status,
    > {
        let stream = DeviceServiceClient::list(self, request)
            .await?
            .into_inner();
        Ok(stream.map_ok(|frame| frame.device).boxed())
    }

    async fn delete(&mut self, request: DeleteDeviceRequest) -> std::result::Result<(), Status> {
        DeviceServiceClient::delete(self, request).await?;
        Ok(())
    }
}

/// Client for the device service.
///
/// RPC failures are returned verbatim as [`Error::Rpc`]; nothing is retried.
#[derive(Debug)]
pub struct DeviceClient<S = DeviceServiceClient<Channel>> {
    service: S,
}

impl DeviceClient {
    /// Connects to the device service at `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the address is invalid or the
    /// connection cannot be established.
    pub async fn connect(address: &str) -> Result<Self> {
        let context = || format!("connecting to device service at {address}");

        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| Error::transport(context(), e))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::transport(context(), e))?;

        tracing::debug!("connected to device service at {address}");
        Ok(Self::new(DeviceServiceClient::new(channel)))
    }

    /// Connects to the device service through an active tunnel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the tunnel is not active, or
    /// any error from [`DeviceClient::connect`].
    pub async fn connect_tunnel<F: Forward>(tunnel: &Tunnel<F>) -> Result<Self> {
        let address = tunnel
            .address()
            .ok_or(Error::InvalidArgument("tunnel is not active"))?;

        Self::connect(&address).await
    }
}

impl<S: DeviceService> DeviceClient<S> {
    /// Wraps an existing service implementation.
    #[must_use]
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Creates a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the call fails and
    /// [`Error::InvariantViolation`] if it succeeds without a device.
    pub async fn create(&mut self, info: DeviceInfo) -> Result<Device> {
        let request = CreateDeviceRequest { info: Some(info) };

        self.service
            .create(request)
            .await?
            .ok_or(Error::InvariantViolation(
                "create succeeded but returned no device",
            ))
    }

    /// Fetches a device by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the call fails and
    /// [`Error::InvariantViolation`] if it succeeds without a device.
    pub async fn get(&mut self, id: u64) -> Result<Device> {
        let request = GetDeviceRequest { device_id: id };

        self.service
            .get(request)
            .await?
            .ok_or(Error::InvariantViolation(
                "get succeeded but returned no device",
            ))
    }

    /// Replaces a device's attributes.
    ///
    /// Unlike [`create`](Self::create) and [`get`](Self::get), a successful
    /// response without a device is passed through as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the call fails.
    pub async fn update(&mut self, id: u64, info: DeviceInfo) -> Result<Option<Device>> {
        let request = UpdateDeviceRequest {
            device_id: id,
            info: Some(info),
        };

        Ok(self.service.update(request).await?)
    }

    /// Lists all devices, draining the server stream to its end.
    ///
    /// Frames without a device are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the call or any stream frame fails. Devices
    /// received before the failure are discarded.
    pub async fn list(&mut self) -> Result<Vec<Device>> {
        let mut stream = self.service.list(ListDevicesRequest {}).await?;
        let mut devices = Vec::new();

        while let Some(device) = stream.try_next().await? {
            match device {
                Some(device) => devices.push(device),
                None => tracing::debug!("skipping empty device list frame"),
            }
        }

        Ok(devices)
    }

    /// Deletes a device by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the call fails.
    pub async fn delete(&mut self, id: u64) -> Result<()> {
        self.service
            .delete(DeleteDeviceRequest { device_id: id })
            .await?;
        Ok(())
    }

    /// Closes the connection.
    pub fn close(self) {
        drop(self.service);
    }
}
