//! Embedded MQTT 3.1.1 broker
//!
//! One broker per MQTT mock, bound to the mock's configured port. Each
//! client connection runs on its own task with a dedicated writer task;
//! routing goes through the shared topic tree. QoS 0/1/2 are supported
//! with the standard effective-QoS downgrade (min of publish and
//! subscription). Topic configs add periodic publishers and `onPublish`
//! respond/forward behaviors.

use crate::protocol::{
    read_packet, write_packet, ConnectReturnCode, Packet, ProtocolError, QoS, Will,
};
use crate::topics::TopicTree;
use mockd_core::model::{MqttOnPublish, MqttSpec};
use mockd_core::{Error, Result, ShutdownToken, TemplateContext};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Handle to a running broker.
pub struct MqttBroker {
    inner: Arc<BrokerInner>,
    local_addr: SocketAddr,
    accept_task: tokio::task::JoinHandle<()>,
    periodic_tasks: Vec<tokio::task::JoinHandle<()>>,
}

struct BrokerInner {
    spec: MqttSpec,
    topics: RwLock<TopicTree>,
    clients: RwLock<HashMap<String, ClientHandle>>,
    next_packet_id: AtomicU16,
    shutdown: ShutdownToken,
}

struct ClientHandle {
    sender: mpsc::UnboundedSender<Packet>,
}

impl MqttBroker {
    /// Bind the configured port and start accepting clients. A taken
    /// port surfaces as `BindFailure`.
    pub async fn start(spec: MqttSpec, shutdown: ShutdownToken) -> Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], spec.port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::bind(format!("MQTT port {}: {e}", spec.port)))?;
        let local_addr = listener.local_addr()?;
        info!("MQTT broker listening on {local_addr}");

        let inner = Arc::new(BrokerInner {
            spec,
            topics: RwLock::new(TopicTree::new()),
            clients: RwLock::new(HashMap::new()),
            next_packet_id: AtomicU16::new(1),
            shutdown: shutdown.clone(),
        });

        let accept_inner = Arc::clone(&inner);
        let mut accept_shutdown = shutdown.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    () = accept_shutdown.cancelled() => break,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("mqtt client connecting from {peer}");
                        let inner = Arc::clone(&accept_inner);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(inner, stream).await {
                                debug!("mqtt connection from {peer} ended: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("mqtt accept failed: {e}");
                    }
                }
            }
        });

        let periodic_tasks = spawn_periodic_publishers(&inner);
        Ok(Self { inner, local_addr, accept_task, periodic_tasks })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Disconnect clients and stop all broker tasks.
    pub async fn stop(self) {
        self.inner.clients.write().await.clear();
        self.accept_task.abort();
        for task in self.periodic_tasks {
            task.abort();
        }
    }
}

fn spawn_periodic_publishers(inner: &Arc<BrokerInner>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut tasks = Vec::new();
    for topic_spec in &inner.spec.topics {
        let Some(periodic) = &topic_spec.periodic else {
            continue;
        };
        let inner = Arc::clone(inner);
        let topic = topic_spec.topic.clone();
        let qos = QoS::from_u8(topic_spec.qos.min(2)).unwrap_or_default();
        let payload_template = periodic.payload.clone();
        let interval = Duration::from_millis(periodic.interval_ms.max(1));
        let repeat = periodic.repeat;
        let mut shutdown = inner.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let mut count = 0u64;
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = shutdown.cancelled() => break,
                }
                let payload =
                    mockd_core::expand(&payload_template, &TemplateContext::default());
                publish(&inner, &topic, payload.into_bytes(), qos, false, true).await;
                count += 1;
                if repeat > 0 && count >= repeat {
                    break;
                }
            }
        }));
    }
    tasks
}

async fn handle_connection(inner: Arc<BrokerInner>, stream: TcpStream) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    // CONNECT must be the first packet.
    let connect = read_packet(&mut reader)
        .await
        .map_err(|e| Error::protocol(format!("expected CONNECT: {e}")))?;
    let Packet::Connect { client_id, clean_session: _, keep_alive, will, username, password } =
        connect
    else {
        return Err(Error::protocol("first packet was not CONNECT"));
    };

    if let Some(code) = check_auth(&inner, username.as_deref(), password.as_deref()) {
        write_packet(&mut writer, &Packet::Connack { session_present: false, code })
            .await
            .map_err(protocol_error)?;
        info!(%client_id, ?code, "mqtt connection rejected");
        return Ok(());
    }
    write_packet(
        &mut writer,
        &Packet::Connack { session_present: false, code: ConnectReturnCode::Accepted },
    )
    .await
    .map_err(protocol_error)?;
    info!(%client_id, keep_alive, "mqtt client connected");

    // Dedicated writer task; the read loop and routing feed it.
    let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
    let writer_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if write_packet(&mut writer, &packet).await.is_err() {
                break;
            }
        }
    });
    inner
        .clients
        .write()
        .await
        .insert(client_id.clone(), ClientHandle { sender: tx.clone() });

    let result = read_loop(&inner, &mut reader, &client_id, &tx, keep_alive).await;

    // Clean up: deregister, drop subscriptions, fire the will on error.
    inner.clients.write().await.remove(&client_id);
    inner.topics.write().await.remove_client(&client_id);
    if result.is_err() {
        if let Some(Will { topic, message, qos, retain }) = will {
            publish(&inner, &topic, message, qos, retain, false).await;
        }
    }
    writer_task.abort();
    info!(%client_id, "mqtt client disconnected");
    result
}

fn check_auth(
    inner: &BrokerInner,
    username: Option<&str>,
    password: Option<&[u8]>,
) -> Option<ConnectReturnCode> {
    let auth = inner.spec.auth.as_ref()?;
    if !auth.enabled {
        return None;
    }
    let Some(username) = username else {
        return Some(ConnectReturnCode::NotAuthorized);
    };
    let Some(expected) = auth.users.get(username) else {
        return Some(ConnectReturnCode::BadUsernamePassword);
    };
    if password != Some(expected.as_bytes()) {
        return Some(ConnectReturnCode::BadUsernamePassword);
    }
    None
}

async fn read_loop(
    inner: &Arc<BrokerInner>,
    reader: &mut tokio::net::tcp::OwnedReadHalf,
    client_id: &str,
    tx: &mpsc::UnboundedSender<Packet>,
    keep_alive: u16,
) -> Result<()> {
    // 3.1.1 allows 1.5x the keep-alive interval between control packets.
    let idle_limit = if keep_alive > 0 {
        Duration::from_millis(u64::from(keep_alive) * 1500)
    } else {
        Duration::from_secs(24 * 3600)
    };
    // In-flight inbound QoS 2 messages, keyed by packet id.
    let mut pending_qos2: HashMap<u16, (String, Vec<u8>, bool)> = HashMap::new();
    let mut shutdown = inner.shutdown.clone();

    loop {
        let packet = tokio::select! {
            read = tokio::time::timeout(idle_limit, read_packet(reader)) => match read {
                Ok(Ok(packet)) => packet,
                Ok(Err(ProtocolError::Io(e)))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Err(Error::protocol("connection closed without DISCONNECT"));
                }
                Ok(Err(e)) => return Err(Error::protocol(e.to_string())),
                Err(_) => return Err(Error::protocol("keep-alive timeout")),
            },
            () = shutdown.cancelled() => {
                let _ = tx.send(Packet::Disconnect);
                return Ok(());
            }
        };

        match packet {
            Packet::Publish { qos, retain, topic, packet_id, payload, .. } => match qos {
                QoS::AtMostOnce => {
                    publish(inner, &topic, payload, qos, retain, false).await;
                }
                QoS::AtLeastOnce => {
                    let id = packet_id.unwrap_or(0);
                    publish(inner, &topic, payload, qos, retain, false).await;
                    let _ = tx.send(Packet::Puback(id));
                }
                QoS::ExactlyOnce => {
                    let id = packet_id.unwrap_or(0);
                    pending_qos2.insert(id, (topic, payload, retain));
                    let _ = tx.send(Packet::Pubrec(id));
                }
            },
            Packet::Pubrel(id) => {
                if let Some((topic, payload, retain)) = pending_qos2.remove(&id) {
                    publish(inner, &topic, payload, QoS::ExactlyOnce, retain, false).await;
                }
                let _ = tx.send(Packet::Pubcomp(id));
            }
            Packet::Pubrec(id) => {
                // Client acking an outbound QoS 2 delivery.
                let _ = tx.send(Packet::Pubrel(id));
            }
            Packet::Puback(_) | Packet::Pubcomp(_) => {}
            Packet::Subscribe { packet_id, filters } => {
                let mut return_codes = Vec::with_capacity(filters.len());
                let mut topics = inner.topics.write().await;
                for (filter, qos) in &filters {
                    topics.subscribe(filter, qos.as_u8(), client_id);
                    return_codes.push(qos.as_u8());
                }
                let retained: Vec<_> = filters
                    .iter()
                    .flat_map(|(filter, qos)| {
                        topics
                            .retained_for_filter(filter)
                            .into_iter()
                            .map(move |(topic, message)| (topic, message, *qos))
                    })
                    .collect();
                drop(topics);
                let _ = tx.send(Packet::Suback { packet_id, return_codes });

                // Retained messages are delivered on subscribe, at the
                // downgraded QoS.
                for (topic, message, sub_qos) in retained {
                    let retained_qos = QoS::from_u8(message.qos.min(2)).unwrap_or_default();
                    let effective = retained_qos.min_with(sub_qos);
                    let _ = tx.send(outbound_publish(
                        inner,
                        &topic,
                        message.payload,
                        effective,
                        true,
                    ));
                }
            }
            Packet::Unsubscribe { packet_id, filters } => {
                let mut topics = inner.topics.write().await;
                for filter in &filters {
                    topics.unsubscribe(filter, client_id);
                }
                drop(topics);
                let _ = tx.send(Packet::Unsuback(packet_id));
            }
            Packet::Pingreq => {
                let _ = tx.send(Packet::Pingresp);
            }
            Packet::Disconnect => return Ok(()),
            other => {
                debug!(?other, "unexpected packet from client");
            }
        }
    }
}

fn outbound_publish(
    inner: &BrokerInner,
    topic: &str,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
) -> Packet {
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        Some(next_packet_id(inner))
    };
    Packet::Publish { dup: false, qos, retain, topic: topic.to_string(), packet_id, payload }
}

fn next_packet_id(inner: &BrokerInner) -> u16 {
    loop {
        let id = inner.next_packet_id.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Deliver one message: retain handling plus subscriber routing with the
/// QoS downgrade.
async fn deliver(
    inner: &Arc<BrokerInner>,
    topic: &str,
    payload: Vec<u8>,
    publish_qos: QoS,
    retain: bool,
) {
    if retain {
        inner
            .topics
            .write()
            .await
            .retain_message(topic, payload.clone(), publish_qos.as_u8());
    }

    let subscribers = inner.topics.read().await.match_topic(topic);
    if subscribers.is_empty() {
        return;
    }
    let clients = inner.clients.read().await;
    for subscription in subscribers {
        let Some(handle) = clients.get(&subscription.client_id) else {
            continue;
        };
        let sub_qos = QoS::from_u8(subscription.qos.min(2)).unwrap_or_default();
        let effective = publish_qos.min_with(sub_qos);
        let packet = outbound_publish(inner, topic, payload.clone(), effective, false);
        let _ = handle.sender.send(packet);
    }
}

/// Route a publish and, unless it originated from a behavior itself, run
/// any configured `onPublish` respond/forward behaviors.
async fn publish(
    inner: &Arc<BrokerInner>,
    topic: &str,
    payload: Vec<u8>,
    publish_qos: QoS,
    retain: bool,
    from_behavior: bool,
) {
    deliver(inner, topic, payload.clone(), publish_qos, retain).await;
    if from_behavior {
        return;
    }
    for topic_spec in &inner.spec.topics {
        if !TopicTree::matches_filter(topic, &topic_spec.topic) {
            continue;
        }
        let qos = QoS::from_u8(topic_spec.qos.min(2)).unwrap_or_default();
        match &topic_spec.on_publish {
            Some(MqttOnPublish::Respond { payload: template }) => {
                let rendered = mockd_core::expand(template, &TemplateContext::default());
                debug!(%topic, "onPublish respond");
                deliver(inner, topic, rendered.into_bytes(), qos, false).await;
            }
            Some(MqttOnPublish::Forward { forward_to }) => {
                debug!(%topic, %forward_to, "onPublish forward");
                deliver(inner, forward_to, payload.clone(), qos, false).await;
            }
            None => {}
        }
    }
}

fn protocol_error(e: ProtocolError) -> Error {
    Error::protocol(e.to_string())
}
