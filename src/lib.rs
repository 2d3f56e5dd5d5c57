#![deny(unreachable_pub)]

// Core modules
mod consts;
mod errors;
mod helpers;
mod prelude;

// Shared utilities
pub mod serde_utils;

// Feature modules
pub mod auth;
mod client;
pub mod config;
pub mod infra;
pub mod store;
pub mod ws;

// Re-exports
pub use auth::{AuthProvider, SharedToken, StaticAuth};
pub use client::{RealtimeClient, SubscriptionHandle};
pub use config::ClientConfig;
pub use consts::{LOCAL_WS_URL, TOKEN_QUERY_PARAM};
pub use errors::{Error, WsError};
pub use helpers::{build_endpoint_url, now_ms};
pub use infra::{init_logging, LogConfig, LogFormat, ReconnectionConfig};
pub use store::{
    Notification, NotificationStore, Opportunity, OpportunityFilter, OpportunityStatus,
    OpportunityStore, StoreConfig,
};
pub use ws::{
    AuthState, ClientEvent, ConnectionSnapshot, ConnectionStatus, Connector, Envelope, Filters,
    HeartbeatConfig, MessageType, SubscriptionRegistry, TungsteniteConnector,
};
