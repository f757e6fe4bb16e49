//! # Service Fleet
//!
//! A supervisor for a fleet of interdependent local services: a messaging
//! backbone, a reverse proxy and whatever else `fleet.yaml` declares.
//!
//! ## Features
//!
//! - **Ordered startup**: services start strictly one after another, in configuration order
//! - **Port policing**: every declared port is inspected and its holder classified before start
//! - **Reclaim**: stale instances of the same service are stopped automatically in development
//! - **Route sync**: path-prefix routes are aggregated into a Caddyfile and hot-reloaded
//! - **Identity bootstrap**: an operator/account/user nkey trust chain for the messaging server
//! - **Lifecycle events**: registration, action and status events on a broadcast channel
//!
//! ## Quick Start
//!
//! ```no_run
//! use service_fleet::{Options, Orchestrator, Parser};
//!
//! # async fn example() -> Result<(), service_fleet::Error> {
//! let config = Parser::new().load_config("fleet.yaml")?;
//! config.validate()?;
//! let options = Options::from_config(&config, std::path::Path::new("."));
//!
//! let orchestrator = Orchestrator::from_config(&config, &options)?;
//! let session = orchestrator.start(options).await?;
//!
//! // Runs until a required service dies or someone cancels the session.
//! session.wait().await;
//! session.shutdown().await;
//! session.result()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Startup is sequential; background exit watchers run as tokio tasks
//! - A [`Session`] shares one `CancellationToken` with every service hook
//! - Shutdown runs exactly once even with concurrent calls

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod orchestrator;
pub mod port;
pub mod proxy;
pub mod registry;
pub mod state;
pub mod supervisor;

// Re-export commonly used types
pub use config::{Config, Options, Parser, ServiceKind};
pub use error::{Error, Result};
pub use events::{Event, EventPublisher};
pub use orchestrator::{LifecycleState, Orchestrator, OrchestratorBuilder, Session};
pub use port::Ownership;
pub use registry::{Registry, RouteSpec, ServiceSpec};
pub use supervisor::Supervisor;
