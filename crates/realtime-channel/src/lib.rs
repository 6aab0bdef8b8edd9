//! Realtime channel for recipe updates.
//!
//! This crate provides:
//! - One shared WebSocket per session, multiplexing many topic subscriptions
//! - Reference-counted subscribe/unsubscribe on the wire
//! - Automatic reconnection with exponential backoff and re-subscription
//! - Reconnect-on-network-return driven by a reachability stream

mod channel;
mod channel_fsm;
mod error;
mod messages;
mod subscriptions;
mod token;
mod transport;

pub use channel::{ChannelConfig, ChannelEvent, LifecycleEvent, RealtimeChannel, Subscription};
pub use channel_fsm::{channel_machine, ChannelMachine, ChannelMachineInput, ConnectionState};
pub use error::{ChannelError, ChannelResult};
pub use messages::{topic_of, ControlMessage, ControlMessageType};
pub use token::{AccessTokenProvider, StaticToken};
pub use transport::{ConnectRequest, Connection, Connector, Outbound, TransportEvent, WebSocketConnector};
