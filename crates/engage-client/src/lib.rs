//! Caller-facing client: turns app events into queued requests.

mod client;
mod device;
mod endpoints;
mod error;
mod login;
mod payload;

pub use client::{ClientConfig, EngageClient, SDK_VERSION};
pub use device::DeviceInfo;
pub use endpoints::Endpoints;
pub use error::{ClientError, ClientResult};
pub use login::{AppLoginParameters, AppLoginStorage};
