//! Core proxy logic for the LSP session proxy: framed transport, message
//! dispatch, URI rewriting, round-tripping, session lifecycle, and the
//! connection supervisor. Concrete external collaborators (workspace
//! provisioning, hook execution, process spawning, CLI) live in the
//! `lsp-proxy` binary crate; this crate depends only on the trait
//! boundaries they implement.

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod provisioner;
pub mod roundtrip;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod uri;

pub use config::{IdRewrite, ProxyConfig, SessionConfig};
pub use connection::{Connection, Inbound};
pub use error::{ConfigError, DispatchError, HookError, ProvisionError, SessionError, TransportError};
pub use message::{Message, MessageId, RpcError};
pub use provisioner::{HookRunner, NoopHookRunner, WorkspaceProvisioner};
pub use session::Session;
pub use supervisor::{LanguageServerSpawner, Supervisor};
