//! The dual-filter forwarding engine (spec §4.2): one [`Session`] per accepted client,
//! owning the client connection and the upstream connection to the real broker, and
//! routing every message across the pair through the [`RuleSet`].

use std::sync::Arc;

use futures_util::{stream::StreamExt, SinkExt};
use tokio::net::UnixStream;
use tracing::{debug, info, trace, warn};
use zbus::{
    AuthMechanism, Connection, ConnectionBuilder, Guid, Message, MessageBuilder, MessageStream,
    MessageType, Socket,
};

use crate::{
    config::Section,
    eavesdrop::{requests_eavesdrop, EavesdropperSet},
    error::Error,
    rules::{Direction, RuleSet},
};

const DBUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
const DBUS_LOCAL_INTERFACE: &str = "org.freedesktop.DBus.Local";

/// What a filter decided to do with a message (design note §9).
enum Decision {
    Forward,
    Drop,
    SynthesizeReply(Box<Message>),
}

/// One accepted client's session: a client connection, an upstream connection to the
/// real broker, and the session-local eavesdropper state (spec §3).
pub struct Session {
    client_conn: Connection,
    upstream_conn: Connection,
    eavesdroppers: Arc<EavesdropperSet>,
    unique_name: UniqueNameBuf,
    rules: RuleSet,
}

/// Owned unique name string, cached at session start (invariant I2).
type UniqueNameBuf = String;

impl Session {
    /// Build a session around a freshly accepted client stream.
    ///
    /// Opens the upstream connection to the real broker (spec §3: "opened lazily on
    /// session start"; here that's synchronous with session construction since nothing
    /// useful can happen before it), caching the unique name the broker assigns it
    /// before any client traffic is handled (invariant I2).
    pub async fn new(
        client_stream: UnixStream,
        guid: &Guid,
        bus_type: Section,
        rules: RuleSet,
    ) -> Result<Self, Error> {
        let upstream_conn = match bus_type {
            Section::Session => ConnectionBuilder::session(),
            Section::System => ConnectionBuilder::system(),
        }
        .map_err(|e| Error::Upstream(e.into()))?
        .build()
        .await
        .map_err(|e| Error::Upstream(e.into()))?;

        let unique_name = upstream_conn
            .unique_name()
            .map(|n| n.as_str().to_string())
            .ok_or_else(|| Error::Upstream(anyhow::anyhow!("broker did not assign a unique name")))?;
        debug!("upstream connection established as {}", unique_name);

        let socket: Box<dyn Socket + 'static> = Box::new(client_stream);
        let client_conn = ConnectionBuilder::socket(socket)
            .server(guid)
            .p2p()
            .auth_mechanisms(&[AuthMechanism::Anonymous, AuthMechanism::External])
            .build()
            .await
            .map_err(|e| Error::Upstream(e.into()))?;

        Ok(Self::from_connections(client_conn, upstream_conn, unique_name, rules))
    }

    /// Assemble a session from two already-established connections.
    ///
    /// [`new`] is the production path, dialling the real broker itself; this
    /// lower-level constructor is the seam integration tests use to stand a session up
    /// against a synthetic peer pair instead of a live system/session bus.
    pub fn from_connections(
        client_conn: Connection,
        upstream_conn: Connection,
        unique_name: impl Into<String>,
        rules: RuleSet,
    ) -> Self {
        Self {
            client_conn,
            upstream_conn,
            eavesdroppers: Arc::new(EavesdropperSet::new()),
            unique_name: unique_name.into(),
            rules,
        }
    }

    /// Drive both directions until the client disconnects or the upstream connection is
    /// lost. Cross-direction ordering is intentionally not synchronised (spec §5).
    pub async fn run(self) {
        let Session {
            client_conn,
            upstream_conn,
            eavesdroppers,
            unique_name,
            rules,
        } = self;

        let outgoing = outgoing_loop(
            client_conn.clone(),
            upstream_conn.clone(),
            eavesdroppers.clone(),
            unique_name.clone(),
            rules.clone(),
        );
        let incoming = incoming_loop(client_conn, upstream_conn, eavesdroppers, unique_name, rules);

        tokio::select! {
            () = outgoing => debug!("session ended: client direction closed"),
            () = incoming => debug!("session ended: upstream direction closed"),
        }
    }
}

/// Messages from the client, destined for the broker.
async fn outgoing_loop(
    client_conn: Connection,
    mut upstream_conn: Connection,
    eavesdroppers: Arc<EavesdropperSet>,
    unique_name: UniqueNameBuf,
    rules: RuleSet,
) {
    let mut stream = MessageStream::from(&client_conn);
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!("client connection closed: {}", e);
                return;
            }
        };

        match filter_outgoing(&msg, &unique_name, &eavesdroppers, &rules) {
            Decision::Forward => {
                if let Err(e) = upstream_conn.send((*msg).clone()).await {
                    warn!("failed to forward message upstream: {}", e);
                }
            }
            Decision::Drop => {
                trace!("dropped outgoing message");
            }
            Decision::SynthesizeReply(reply) => {
                let client = client_conn.clone();
                if let Err(e) = send_reply(&client, *reply).await {
                    warn!("failed to reply to client: {}", e);
                }
            }
        }

        if is_disconnected_signal(&msg) {
            info!("client disconnected");
            return;
        }
    }
}

/// Messages from the broker, destined for the client.
async fn incoming_loop(
    client_conn: Connection,
    upstream_conn: Connection,
    eavesdroppers: Arc<EavesdropperSet>,
    unique_name: UniqueNameBuf,
    rules: RuleSet,
) {
    let mut stream = MessageStream::from(&upstream_conn);
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!("upstream connection lost: {}", e);
                return;
            }
        };

        match filter_incoming(&msg, &unique_name, &eavesdroppers, &rules) {
            Decision::Forward => {
                let client = client_conn.clone();
                if let Err(e) = send_reply(&client, (*msg).clone()).await {
                    warn!("failed to forward message to client: {}", e);
                }
            }
            Decision::Drop => {
                trace!("dropped incoming message");
            }
            Decision::SynthesizeReply(_) => unreachable!("incoming filter never synthesises"),
        }
    }
}

async fn send_reply(conn: &Connection, msg: Message) -> zbus::Result<()> {
    let mut conn = conn.clone();
    conn.send(msg).await
}

/// Outgoing filter: client → broker (spec §4.2).
fn filter_outgoing(
    msg: &Message,
    unique_name: &str,
    eavesdroppers: &EavesdropperSet,
    rules: &RuleSet,
) -> Decision {
    let header = match msg.header() {
        Ok(h) => h,
        Err(e) => {
            warn!("message without a usable header: {}", e);
            return Decision::Drop;
        }
    };

    let interface = header.interface().map(|i| i.as_str());
    let path = header.path().map(|p| p.as_str());
    let destination = header.destination().map(|d| d.as_str());
    let member = header.member().map(|m| m.as_str());

    // 1. Hello interception: spoof the identity handshake locally.
    if msg.message_type() == MessageType::MethodCall
        && path == Some(DBUS_PATH)
        && interface == Some(DBUS_INTERFACE)
        && destination == Some(DBUS_INTERFACE)
        && member == Some("Hello")
    {
        return match MessageBuilder::method_return(&header).and_then(|b| b.build(&unique_name)) {
            Ok(reply) => Decision::SynthesizeReply(Box::new(reply)),
            Err(e) => {
                warn!("failed to synthesise Hello reply: {}", e);
                Decision::Drop
            }
        };
    }

    // 2. Disconnect handling is observed by the caller via `is_disconnected_signal`;
    //    here it's just forwarded as a bus-control message for symmetry (it never
    //    reaches the broker in practice because the loop returns right after).
    if is_disconnected_signal(msg) {
        return Decision::Drop;
    }

    // 3. Bus-control passthrough.
    if interface.is_none() || interface == Some(DBUS_INTERFACE) {
        return Decision::Forward;
    }

    // 4. Rule check.
    let interface = interface.unwrap_or_default();
    let path = path.unwrap_or_default();
    let member = member.unwrap_or_default();
    if rules.is_allowed(Direction::Outgoing, interface, path, member) {
        info!(
            "accepted call to '{}' from client to '{}' on '{}'",
            member, interface, path
        );
        Decision::Forward
    } else {
        info!(
            "rejected call to '{}' from client to '{}' on '{}'",
            member, interface, path
        );
        let _ = eavesdroppers; // eavesdropper state is only mutated by the incoming filter.
        Decision::Drop
    }
}

/// Incoming filter: broker → client (spec §4.2).
fn filter_incoming(
    msg: &Message,
    unique_name: &str,
    eavesdroppers: &EavesdropperSet,
    rules: &RuleSet,
) -> Decision {
    let header = match msg.header() {
        Ok(h) => h,
        Err(e) => {
            warn!("message without a usable header: {}", e);
            return Decision::Drop;
        }
    };

    let interface = header.interface().map(|i| i.as_str());
    let path = header.path().map(|p| p.as_str());
    let member = header.member().map(|m| m.as_str());
    let sender = header.sender().map(|s| s.as_str());
    let destination = header.destination().map(|d| d.as_str());

    // 1. NameAcquired tracking: a name that was eavesdropping is reassigned.
    if member == Some("NameAcquired") {
        if let Some(dest) = destination {
            if eavesdroppers.remove(dest) {
                debug!(
                    "'{}' was a known eavesdropper; cleared on NameAcquired",
                    dest
                );
            }
        }
    }

    // 2. Bus-control passthrough, with eavesdrop capture.
    if interface.is_none() || interface == Some(DBUS_INTERFACE) {
        if member == Some("AddMatch") {
            if let (Ok(arg), Some(sender)) = (msg.body::<String>(), sender) {
                if requests_eavesdrop(&arg) && !eavesdroppers.contains(sender) {
                    info!("'{}' registered as an eavesdropper", sender);
                    eavesdroppers.add(sender);
                }
            }
        }
        return Decision::Forward;
    }

    // 3. Eavesdropper suppression: this session's own connection is a known monitor.
    if eavesdroppers.contains(unique_name) {
        trace!("'{}' is an eavesdropping connection, suppressing delivery", unique_name);
        return Decision::Drop;
    }

    // 4. Rule check.
    let interface = interface.unwrap_or_default();
    let path = path.unwrap_or_default();
    let member = member.unwrap_or_default();
    if rules.is_allowed(Direction::Incoming, interface, path, member) {
        info!(
            "accepted call to '{}' from server to '{}' on '{}'",
            member, interface, path
        );
        Decision::Forward
    } else {
        info!(
            "rejected call to '{}' from server to '{}' on '{}'",
            member, interface, path
        );
        Decision::Drop
    }
}

fn is_disconnected_signal(msg: &Message) -> bool {
    let Ok(header) = msg.header() else {
        return false;
    };
    msg.message_type() == MessageType::Signal
        && header.interface().map(|i| i.as_str()) == Some(DBUS_LOCAL_INTERFACE)
        && header.member().map(|m| m.as_str()) == Some("Disconnected")
}
