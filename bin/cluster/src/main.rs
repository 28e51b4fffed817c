use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum_server::Handle;
use clap::Parser;
use cluster_client::JoinClient;
use control::{CredentialIssuer, JoinState};
use identity::KeystoneClient;
use node_config::FileConfigStore;
use tls::{CertificateProvisioner, Fingerprint};

use crate::config::{ClusterConfig, Command};

#[macro_use]
extern crate tracing;

mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let args = config::CliArgs::parse();
  let config = config::load(&args)?;
  logger::init(&config.logging)?;

  debug!("Cluster version: v{}", env!("CARGO_PKG_VERSION"));
  if config.pretty_startup_config {
    debug!("{:#?}", config.sanitized());
  } else {
    debug!("{:?}", config.sanitized());
  }

  install_crypto_provider();

  match args.command {
    Command::Serve { .. } => serve(&config).await,
    Command::AddCompute => add_compute(&config).await,
    Command::Join {
      connection_string, ..
    } => join(&config, &connection_string).await,
    Command::EnsureCertificate => {
      let (_, fingerprint) =
        ensure_certificate(&config, node_config(&config)).await?;
      println!("{fingerprint}");
      Ok(())
    }
  }
}

fn node_config(config: &ClusterConfig) -> Arc<FileConfigStore> {
  Arc::new(FileConfigStore::new(&config.node_config_path))
}

fn keystone(config: &ClusterConfig) -> anyhow::Result<KeystoneClient> {
  KeystoneClient::new(
    &config.keystone_url,
    Duration::from_secs(config.keystone_timeout_secs),
  )
  .context("Invalid keystone config")
}

async fn ensure_certificate(
  config: &ClusterConfig,
  store: Arc<FileConfigStore>,
) -> anyhow::Result<(CertificateProvisioner, Fingerprint)> {
  let provisioner = CertificateProvisioner::from_config(
    store.as_ref(),
    &config.tls_cert_path,
    &config.tls_key_path,
  )?;
  // Waiting on a concurrent provisioning blocks.
  tokio::task::spawn_blocking(move || {
    let fingerprint = provisioner.ensure_certificate(store.as_ref())?;
    anyhow::Ok((provisioner, fingerprint))
  })
  .await
  .context("Certificate provisioning panicked")?
}

async fn serve(config: &ClusterConfig) -> anyhow::Result<()> {
  let store = node_config(config);
  let (provisioner, fingerprint) =
    ensure_certificate(config, store.clone()).await?;
  info!("Join service certificate fingerprint: {fingerprint}");
  let tls =
    tls::server_config(provisioner.cert_path(), provisioner.key_path())?;
  let state = Arc::new(JoinState {
    identity: keystone(config)?,
    config: store,
  });

  let handle = Handle::new();
  tokio::spawn(shutdown_on_signal(handle.clone()));

  control::serve(
    state,
    SocketAddr::new(config.bind_ip, config.port),
    tls,
    handle,
  )
  .await
}

async fn add_compute(config: &ClusterConfig) -> anyhow::Result<()> {
  let store = node_config(config);
  let issuer =
    CredentialIssuer::new(keystone(config)?, config.issuer.clone());
  let issued = issuer
    .issue_join_token(store.as_ref(), chrono::Utc::now())
    .await?;
  eprintln!("{}", issued.notice());
  println!("{}", issued.encoded);
  Ok(())
}

async fn join(
  config: &ClusterConfig,
  connection_string: &str,
) -> anyhow::Result<()> {
  let store = node_config(config);
  let outcome = JoinClient::default()
    .with_port(config.port)
    .with_timeouts(
      Duration::from_secs(config.connect_timeout_secs),
      Duration::from_secs(config.request_timeout_secs),
    )
    .join(connection_string, store.as_ref())
    .await?;
  info!(
    "Joined cluster at {} | wrote {} config keys to {}",
    outcome.control_hostname,
    outcome.applied.len(),
    store.path().display()
  );
  Ok(())
}

async fn shutdown_on_signal(handle: Handle) {
  let ctrl_c = tokio::signal::ctrl_c();
  #[cfg(unix)]
  {
    let Ok(mut term) = tokio::signal::unix::signal(
      tokio::signal::unix::SignalKind::terminate(),
    ) else {
      error!("Failed to listen for SIGTERM");
      return;
    };
    tokio::select! {
      _ = ctrl_c => {},
      _ = term.recv() => {},
    }
  }
  #[cfg(not(unix))]
  let _ = ctrl_c.await;
  info!("Shutting down join service");
  handle.graceful_shutdown(Some(Duration::from_secs(5)));
}

fn install_crypto_provider() {
  if let Err(e) =
    rustls::crypto::aws_lc_rs::default_provider().install_default()
  {
    error!("Failed to install default crypto provider | {e:?}");
    std::process::exit(1);
  };
}
