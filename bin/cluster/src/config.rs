use std::{
  net::{IpAddr, Ipv4Addr},
  path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use cluster_client::entities::CLUSTER_SERVICE_PORT;
use colored::Colorize;
use control::IssuerSettings;
use logger::{LogConfig, LogLevel, StdioLogMode};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "cluster", version, about = "Cluster join tooling")]
pub struct CliArgs {
  #[command(subcommand)]
  pub command: Command,

  /// Toml config file. Override with CLUSTER_CONFIG_PATH.
  #[arg(long, short = 'c', global = true)]
  pub config_path: Option<PathBuf>,

  /// Node config (JSON) file.
  #[arg(long, global = true)]
  pub node_config_path: Option<PathBuf>,

  /// Logging level.
  #[arg(long, global = true)]
  pub log_level: Option<tracing::Level>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Run the join service on the control node.
  Serve {
    #[arg(long)]
    bind_ip: Option<IpAddr>,
    #[arg(long)]
    port: Option<u16>,
  },
  /// Print a connection string for adding a compute node.
  AddCompute,
  /// Join this node to the cluster.
  Join {
    /// The connection string printed by add-compute.
    connection_string: String,
    /// Join service port on the control node.
    #[arg(long)]
    port: Option<u16>,
  },
  /// Generate the join service certificate if missing,
  /// and print its fingerprint.
  EnsureCertificate,
}

/// Values from the environment, prefixed with CLUSTER_.
/// These override the config file.
#[derive(Debug, Default, Deserialize)]
pub struct Env {
  pub cluster_config_path: Option<PathBuf>,
  pub cluster_node_config_path: Option<PathBuf>,
  pub cluster_bind_ip: Option<IpAddr>,
  pub cluster_port: Option<u16>,
  pub cluster_tls_cert_path: Option<PathBuf>,
  pub cluster_tls_key_path: Option<PathBuf>,
  pub cluster_keystone_url: Option<String>,
  pub cluster_keystone_timeout_secs: Option<u64>,
  pub cluster_connect_timeout_secs: Option<u64>,
  pub cluster_request_timeout_secs: Option<u64>,
  pub cluster_credential_validity_minutes: Option<u32>,
  pub cluster_logging_level: Option<LogLevel>,
  pub cluster_logging_stdio: Option<StdioLogMode>,
  pub cluster_logging_pretty: Option<bool>,
  pub cluster_logging_location: Option<bool>,
  pub cluster_logging_ansi: Option<bool>,
  pub cluster_pretty_startup_config: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
  /// JSON document holding the node config.
  pub node_config_path: PathBuf,
  pub bind_ip: IpAddr,
  /// Join service port, both served and dialed.
  pub port: u16,
  /// Used when config.cluster.tls-cert-path is not set.
  pub tls_cert_path: PathBuf,
  /// Used when config.cluster.tls-key-path is not set.
  pub tls_key_path: PathBuf,
  /// Keystone v3 endpoint.
  pub keystone_url: String,
  pub keystone_timeout_secs: u64,
  pub connect_timeout_secs: u64,
  pub request_timeout_secs: u64,
  pub issuer: IssuerSettings,
  pub logging: LogConfig,
  pub pretty_startup_config: bool,
}

impl Default for ClusterConfig {
  fn default() -> Self {
    ClusterConfig {
      node_config_path: PathBuf::from("/var/lib/cluster/config.json"),
      bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
      port: CLUSTER_SERVICE_PORT,
      tls_cert_path: PathBuf::from("/var/lib/cluster/tls/cert.pem"),
      tls_key_path: PathBuf::from("/var/lib/cluster/tls/key.pem"),
      keystone_url: String::from("http://localhost:5000/v3"),
      keystone_timeout_secs: 30,
      connect_timeout_secs: 10,
      request_timeout_secs: 30,
      issuer: IssuerSettings::default(),
      logging: LogConfig::default(),
      pretty_startup_config: false,
    }
  }
}

impl ClusterConfig {
  /// Safe to log. Credentials embedded in the keystone url are hidden.
  pub fn sanitized(&self) -> ClusterConfig {
    let mut config = self.clone();
    if let Ok(mut url) = url::Url::parse(&config.keystone_url)
      && url.password().is_some()
      && url.set_password(Some("##############")).is_ok()
    {
      config.keystone_url = url.to_string();
    }
    config
  }
}

/// Priority: cli args, environment, config file, defaults.
pub fn load(args: &CliArgs) -> anyhow::Result<ClusterConfig> {
  let env: Env = envy::from_env()
    .context("Failed to parse cluster environment")?;
  let config_path =
    args.config_path.as_ref().or(env.cluster_config_path.as_ref());
  let config = match config_path {
    Some(path) => read_config_file(path)?,
    None => {
      eprintln!(
        "{}: No config path found, using default config",
        "INFO".green(),
      );
      ClusterConfig::default()
    }
  };
  Ok(merge(args, env, config))
}

fn read_config_file(path: &Path) -> anyhow::Result<ClusterConfig> {
  let contents = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file at {path:?}"))?;
  toml::from_str(&contents)
    .with_context(|| format!("Invalid config file at {path:?}"))
}

fn merge(
  args: &CliArgs,
  env: Env,
  config: ClusterConfig,
) -> ClusterConfig {
  let (bind_ip, port) = match &args.command {
    Command::Serve { bind_ip, port } => (*bind_ip, *port),
    Command::Join { port, .. } => (None, *port),
    _ => (None, None),
  };
  ClusterConfig {
    node_config_path: args
      .node_config_path
      .clone()
      .or(env.cluster_node_config_path)
      .unwrap_or(config.node_config_path),
    bind_ip: bind_ip
      .or(env.cluster_bind_ip)
      .unwrap_or(config.bind_ip),
    port: port.or(env.cluster_port).unwrap_or(config.port),
    tls_cert_path: env
      .cluster_tls_cert_path
      .unwrap_or(config.tls_cert_path),
    tls_key_path: env
      .cluster_tls_key_path
      .unwrap_or(config.tls_key_path),
    keystone_url: env
      .cluster_keystone_url
      .unwrap_or(config.keystone_url),
    keystone_timeout_secs: env
      .cluster_keystone_timeout_secs
      .unwrap_or(config.keystone_timeout_secs),
    connect_timeout_secs: env
      .cluster_connect_timeout_secs
      .unwrap_or(config.connect_timeout_secs),
    request_timeout_secs: env
      .cluster_request_timeout_secs
      .unwrap_or(config.request_timeout_secs),
    issuer: IssuerSettings {
      validity_minutes: env
        .cluster_credential_validity_minutes
        .unwrap_or(config.issuer.validity_minutes),
      ..config.issuer
    },
    logging: LogConfig {
      level: args
        .log_level
        .map(LogLevel::from)
        .or(env.cluster_logging_level)
        .unwrap_or(config.logging.level),
      stdio: env
        .cluster_logging_stdio
        .unwrap_or(config.logging.stdio),
      pretty: env
        .cluster_logging_pretty
        .unwrap_or(config.logging.pretty),
      location: env
        .cluster_logging_location
        .unwrap_or(config.logging.location),
      ansi: env.cluster_logging_ansi.unwrap_or(config.logging.ansi),
    },
    pretty_startup_config: env
      .cluster_pretty_startup_config
      .unwrap_or(config.pretty_startup_config),
  }
}
