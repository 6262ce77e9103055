//! Command-line surface over the cluster lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use crate::config::{keys, ApplicationConfig, Configuration};
use crate::platform::KubePlatformClient;
use crate::{ClusterManager, ClusterSpecification};

/// Manage Rill clusters on Kubernetes
#[derive(Debug, Parser)]
#[command(name = "rill-cluster")]
pub enum ClusterCmd {
    /// Deploy a session cluster
    #[command(name = "deploy")]
    Deploy(DeployOpt),

    /// Deploy a cluster dedicated to one application
    #[command(name = "run-application")]
    RunApplication(RunApplicationOpt),

    /// Print the admin endpoint of a running cluster
    #[command(name = "retrieve")]
    Retrieve(TargetOpt),

    /// Delete all resources of a cluster
    #[command(name = "delete")]
    Delete(TargetOpt),
}

impl ClusterCmd {
    pub async fn process(self) -> Result<()> {
        match self {
            Self::Deploy(opt) => opt.process().await,
            Self::RunApplication(opt) => opt.process().await,
            Self::Retrieve(opt) => opt.retrieve().await,
            Self::Delete(opt) => opt.delete().await,
        }
    }
}

#[derive(Debug, Parser)]
pub struct TargetOpt {
    /// cluster id to operate on
    #[arg(long)]
    cluster_id: String,

    /// Kubernetes namespace the cluster lives in
    #[arg(long, default_value = "default")]
    namespace: String,

    /// path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl TargetOpt {
    async fn manager(&self) -> Result<ClusterManager> {
        let mut config = match &self.config {
            Some(path) => Configuration::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => Configuration::new(),
        };
        config.set(keys::CLUSTER_ID, &self.cluster_id);
        config.set(keys::NAMESPACE, &self.namespace);

        let platform = KubePlatformClient::from_inferred_config(self.namespace.clone())
            .await
            .context("connecting to Kubernetes")?;
        debug!(cluster_id = %self.cluster_id, namespace = %self.namespace, "manager ready");
        Ok(ClusterManager::new(config, Arc::new(platform))?)
    }

    async fn retrieve(self) -> Result<()> {
        let manager = self.manager().await?;
        let provider = manager.retrieve().await?;
        let client = provider.cluster_client().await?;
        println!("cluster:       {}", client.cluster_id());
        println!("web interface: {}", client.web_interface_url());
        manager.close().await;
        Ok(())
    }

    async fn delete(self) -> Result<()> {
        let manager = self.manager().await?;
        manager.kill_cluster().await?;
        println!("deleted cluster {}", manager.cluster_id());
        manager.close().await;
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub struct DeployOpt {
    #[command(flatten)]
    target: TargetOpt,

    #[command(flatten)]
    sizing: SizingOpt,
}

impl DeployOpt {
    async fn process(self) -> Result<()> {
        let manager = self.target.manager().await?;
        let provider = manager
            .deploy_session_cluster(&self.sizing.as_cluster_specification()?)
            .await?;
        let client = provider.cluster_client().await?;
        println!("deployed session cluster {}", client.cluster_id());
        println!("web interface: {}", client.web_interface_url());
        manager.close().await;
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub struct RunApplicationOpt {
    #[command(flatten)]
    target: TargetOpt,

    #[command(flatten)]
    sizing: SizingOpt,

    /// application entrypoint identifier
    #[arg(long)]
    entrypoint: Option<String>,

    /// arguments passed to the application
    #[arg(last = true)]
    args: Vec<String>,
}

impl RunApplicationOpt {
    async fn process(self) -> Result<()> {
        let manager = self.target.manager().await?;
        let app_config = ApplicationConfig::new(self.entrypoint, self.args);
        let provider = manager
            .deploy_application_cluster(&self.sizing.as_cluster_specification()?, &app_config)
            .await?;
        let client = provider.cluster_client().await?;
        println!("deployed application cluster {}", client.cluster_id());
        println!("web interface: {}", client.web_interface_url());
        manager.close().await;
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub struct SizingOpt {
    /// coordinator memory ceiling in MiB
    #[arg(long, default_value = "1024")]
    memory_mb: u32,

    /// coordinator cpu core ceiling
    #[arg(long, default_value = "1.0")]
    cpu: f64,

    /// worker containers to provision
    #[arg(long, default_value = "1")]
    workers: u16,
}

impl SizingOpt {
    fn as_cluster_specification(&self) -> Result<ClusterSpecification> {
        Ok(ClusterSpecification::builder()
            .coordinator_memory_mb(self.memory_mb)
            .coordinator_cpu(self.cpu)
            .worker_count(self.workers)
            .build()?)
    }
}
