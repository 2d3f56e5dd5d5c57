pub mod dispatcher;
pub mod heartbeat;
pub mod listeners;
pub mod message_types;
pub mod registry;
pub mod transport;
mod ws_manager;

pub use dispatcher::{Dispatch, Dispatcher};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig};
pub use listeners::{Handler, ListenerId, ListenerSet};
pub use message_types::{ControlMessage, Envelope, Filters, MessageType};
pub use registry::SubscriptionRegistry;
pub use transport::{Connector, Frame, Transport, TungsteniteConnector};
pub use ws_manager::{AuthState, ClientEvent, ConnectionSnapshot, ConnectionStatus};
pub(crate) use ws_manager::{Command, ManagerParts, WsManager};
