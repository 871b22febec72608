//! Wire types and gRPC client for the `dtprotos.DeviceService` API,
//! generated from `proto/device.proto`.

#![allow(missing_docs, clippy::pedantic)]

tonic::include_proto!("dtprotos");
