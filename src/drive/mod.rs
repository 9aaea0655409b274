mod client;
mod models;
mod proxy;

pub use client::KDriveClient;
pub use models::{DriveEntry, FileDescriptor};
pub use proxy::DriveProxy;
