//! Microsoft Graph and Blob Storage clients
//!
//! Both clients borrow one [`AzureSession`] that holds the service principal
//! credentials and the HTTP client with its request timeout.

mod auth;
mod blob;
mod cloud;
mod graph;

pub use auth::AzureSession;
pub use blob::BlobContainer;
pub use cloud::CloudEnvironment;
pub use graph::GraphDirectory;
