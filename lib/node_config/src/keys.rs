//! Node config keys shared by the control and compute sides.

pub const ROOT: &str = "config";

pub const CLUSTER_ROLE: &str = "config.cluster.role";
pub const CLUSTER_FINGERPRINT: &str = "config.cluster.fingerprint";
pub const CLUSTER_TLS_CERT_PATH: &str = "config.cluster.tls-cert-path";
pub const CLUSTER_TLS_KEY_PATH: &str = "config.cluster.tls-key-path";
pub const CLUSTER_HOSTNAME: &str = "config.cluster.hostname";
pub const CLUSTER_CREDENTIAL_ID: &str = "config.cluster.credential-id";
pub const CLUSTER_CREDENTIAL_SECRET: &str =
  "config.cluster.credential-secret";

pub const NETWORK_CONTROL_IP: &str = "config.network.control-ip";

/// Prefix for the service credentials shared with joining nodes.
pub const CREDENTIALS_PREFIX: &str = "config.credentials";
pub const SERVICE_PASSWORD: &str = "config.credentials.nova-password";

pub const ROLE_CONTROL: &str = "control";
pub const ROLE_COMPUTE: &str = "compute";
