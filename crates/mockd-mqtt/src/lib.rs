//! # mockd MQTT
//!
//! An embedded MQTT 3.1.1 broker, one per MQTT mock. The broker speaks
//! the full 3.1.1 control-packet set with QoS 0/1/2 (effective QoS is
//! the min of publish and subscription), retained messages with `+`/`#`
//! wildcard delivery, optional CONNECT authentication, periodic topic
//! publishers and `onPublish` respond/forward behaviors.

pub mod broker;
pub mod protocol;
pub mod topics;

pub use broker::MqttBroker;
pub use protocol::{ConnectReturnCode, Packet, ProtocolError, QoS, Will};
pub use topics::{RetainedMessage, Subscription, TopicTree};
