//! # lfs-endpoint
//!
//! A minimal Git LFS (Large File Storage) server.
//!
//! This crate provides:
//! - A content-addressed object store with atomic, staged writes
//! - The LFS Batch API negotiation (basic transfer adapter)
//! - The legacy LFS object API and raw object transfer endpoints
//! - Dispatch of Git smart-HTTP requests to `git http-backend`
//!
//! Authentication is left to a reverse proxy, which passes the user in the
//! `X-Forwarded-User` header.
//!
//! ## Example
//!
//! ```no_run
//! use lfs_endpoint::{Config, LfsServer};
//!
//! # async fn run() -> lfs_endpoint::Result<()> {
//! let config = Config {
//!     project_root: "/srv/git".into(),
//!     server_url: "https://git.example.com".into(),
//!     ..Config::default()
//! };
//! LfsServer::new(config)?.serve().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod oid;
mod stream;

pub mod backend;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod server;
pub mod store;

pub use backend::{BackendRequest, GitHttpBackend, SmartHttpBackend};
pub use batch::{
    negotiate, Action, BatchError, BatchObject, BatchRequest, BatchRequestObject, BatchResponse,
    Operation,
};
pub use config::{BackendConfig, Config, Links};
pub use dispatch::{route, Target};
pub use error::{Error, Result};
pub use oid::Oid;
pub use server::LfsServer;
pub use store::{ObjectStore, StagedObject};
