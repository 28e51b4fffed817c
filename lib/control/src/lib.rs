//! Control node side of the join protocol.
//!
//! - [issuer]: mints the scoped credential and the connection token
//!   handed to the operator.
//! - [server]: the HTTPS join service compute nodes connect to.

pub mod issuer;
pub mod server;

pub use issuer::{
  CredentialIssuer, IssueError, IssuedToken, IssuerSettings,
};
pub use server::{ApiError, JoinState, router, serve};
