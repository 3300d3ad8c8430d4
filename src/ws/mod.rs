//! WebSocket connection lifecycle for the market-data stream

pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod router;
pub mod subscription;
pub mod transport;

pub use connection::{
    Connection, ConnectionEvent, ConnectionId, ConnectionState, EndpointId, Transport,
    TransportError, TransportEvent,
};
pub use heartbeat::{HeartbeatSupervisor, SupervisorState, SweepReport};
pub use registry::{RegistryError, SubscriptionInfo, SubscriptionRegistry};
pub use router::{decode_json, Decoder, Policy, Router, RouterConfig};
pub use subscription::{
    MessageHandler, OpenedAction, OpenedHook, SubscribeRequest, TopicSet, Topics,
};
pub use transport::{Connector, TungsteniteConnector};
