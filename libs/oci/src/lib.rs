//! # flexgrab-oci
//!
//! Minimal Oracle Cloud Infrastructure client for the provisioner.
//!
//! ## Modules
//!
//! - `auth`: credential providers (instance principal, config file)
//! - `signer`: `rsa-sha256` HTTP request signing
//! - `compute`: Compute API client (launch, capacity report)
//! - `models`: Compute API wire types

pub mod auth;
pub mod compute;
pub mod error;
pub mod models;
pub mod signer;

pub use auth::{resolve, AuthMode, AuthOptions, AuthProvider};
pub use compute::ComputeClient;
pub use error::{OciError, ServiceError};
pub use signer::Credentials;
