//! # Bifrost Agent
//!
//! Bifrost Agent is a Kubernetes-native bridge between a fleet management
//! server and the collector deployments running in a cluster. It receives
//! remote configuration over the management session, reconciles the
//! cluster's collector resources against it, and reports status, effective
//! configuration, and recursive instance health back upstream.
//!
//! ## Architecture
//!
//! The agent consists of several core components:
//!
//! ### Agent Core
//! ```rust,ignore
//! pub mod agent;
//! ```
//! The reconciliation engine and session callback handler:
//! - Remote configuration diffing and apply/delete ordering
//! - Per-key failure isolation and status aggregation
//! - Recursive health assembly
//! - Heartbeat loop and identity rotation
//!
//! ### Kubernetes Module
//! ```rust,ignore
//! pub mod k8s;
//! ```
//! Manages all Kubernetes interactions:
//! - Collector resource apply/delete through server-side apply
//! - Manifest validation and ownership checks
//! - Managed-instance listing and pod resolution
//! - Retry policy for transient API errors
//!
//! ### Session Module
//! ```rust,ignore
//! pub mod session;
//! ```
//! HTTP transport to the management server:
//! - Report dispatch on poll, nudge, and shutdown
//! - Server payload decoding and callback delivery
//!
//! ### Health Poller
//! ```rust,ignore
//! pub mod healthcheck;
//! ```
//! Concurrent fleet-health polling:
//! - Selector-keyed verdict cache
//! - Bounded worker pool probing instance endpoints
//!
//! ## Operation Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Bridge
//!     participant Server
//!     participant K8s
//!
//!     Bridge->>Server: First Status Report
//!     Server-->>Bridge: Remote Configuration
//!
//!     loop For each changed key
//!         Bridge->>K8s: Apply Collector
//!         K8s-->>Bridge: Apply Result
//!     end
//!     Bridge->>Server: Remote Config Status
//!
//!     loop Every heartbeat interval
//!         Bridge->>K8s: Probe Instances
//!         Bridge->>Server: Health Report
//!     end
//! ```
//!
//! ## Configuration
//!
//! The agent is configured through environment variables or a configuration
//! file:
//!
//! ```yaml
//! log:
//!   level: "info"
//! server:
//!   endpoint: "http://bifrost-server:4320/v1/bridge"
//!   poll_interval_seconds: 30
//! agent:
//!   namespace: "bifrost-system"
//!   service_name: "bifrost-bridge"
//!   heartbeat_interval_seconds: 30
//!   health_port: 8080
//! healthcheck:
//!   interval_seconds: 15
//!   port: 13133
//! capabilities:
//!   accepts_remote_config: true
//!   reports_health: true
//!   reports_effective_config: true
//! ```

pub mod agent;
pub mod cli;
pub mod clock;
pub mod health;
pub mod healthcheck;
pub mod k8s;
pub mod keys;
pub mod metrics;
pub mod reporter;
pub mod session;
