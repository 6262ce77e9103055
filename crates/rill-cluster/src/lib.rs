//! Functionality for deploying, managing, and deleting Rill clusters on
//! Kubernetes.
//!
//! The primary entry point is the [`ClusterManager`], which stands up the
//! Rill coordinator from a working [`Configuration`] and a platform client,
//! discovers its administrative endpoint, and tears it down again:
//!
//! ```no_run
//! use std::sync::Arc;
//! use rill_cluster::config::{keys, Configuration};
//! use rill_cluster::platform::KubePlatformClient;
//! use rill_cluster::{ClusterManager, ClusterSpecification};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Configuration::new();
//! config.set(keys::CLUSTER_ID, "pipeline-7");
//!
//! let platform = KubePlatformClient::from_inferred_config("default").await?;
//! let manager = ClusterManager::new(config, Arc::new(platform))?;
//!
//! let spec = ClusterSpecification::builder().build()?;
//! let provider = manager.deploy_session_cluster(&spec).await?;
//! let client = provider.cluster_client().await?;
//! println!("{}", client.web_interface_url());
//! # Ok(())
//! # }
//! ```
//!
//! Pod and service specifications are assembled by the step pipeline in
//! [`spec`]; everything that touches the platform goes through the
//! [`platform::PlatformClient`] boundary.
//!
//! [`Configuration`]: config::Configuration

#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
mod error;
mod manager;
pub mod platform;
mod provider;
pub mod spec;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::ClusterError;
pub use manager::ClusterManager;
pub use provider::{ClusterClient, ClusterClientProvider};
pub use spec::{ClusterSpecification, ClusterSpecificationBuilder};

pub(crate) const DEFAULT_NAMESPACE: &str = "default";
