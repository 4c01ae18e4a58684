//! Drives `Session` end to end over real peer-to-peer Unix sockets, standing in a
//! synthetic client and a synthetic broker on either side instead of the real bus —
//! same `UnixStream::pair`/`try_join!` harness shape as the teacher's own p2p tests.

use std::time::Duration;

use dbus_gatekeeper::{
    rules::{MethodField, Rule, RuleSet},
    session::Session,
};
use futures_util::{SinkExt, StreamExt};
use ntest::timeout;
use tokio::net::UnixStream;
use zbus::{Connection, ConnectionBuilder, Guid, MessageBuilder, MessageStream, MessageType, Socket};

const DBUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Build one p2p connection pair; `.0` is the server side, `.1` the client side.
async fn p2p_pair(guid: &Guid) -> (Connection, Connection) {
    let (s0, s1) = UnixStream::pair().unwrap();
    let server_socket: Box<dyn Socket + 'static> = Box::new(s0);
    let client_socket: Box<dyn Socket + 'static> = Box::new(s1);
    futures_util::try_join!(
        ConnectionBuilder::socket(server_socket).server(guid).p2p().build(),
        ConnectionBuilder::socket(client_socket).p2p().build(),
    )
    .unwrap()
}

/// Stand up a `Session` wired to a synthetic confined client and a synthetic broker,
/// returning the two test-side handles (client, broker) once `session.run()` is
/// spawned.
async fn harness(rules: RuleSet) -> (Connection, Connection) {
    let (client_conn, real_client) = p2p_pair(&Guid::generate()).await;
    let (fake_broker, upstream_conn) = p2p_pair(&Guid::generate()).await;

    let session = Session::from_connections(client_conn, upstream_conn, ":1.7", rules);
    tokio::spawn(session.run());

    (real_client, fake_broker)
}

async fn recv_nothing(conn: &Connection) {
    let mut stream = MessageStream::from(conn);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), stream.next())
            .await
            .is_err(),
        "expected no message to arrive"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[timeout(15000)]
async fn hello_is_answered_locally_and_never_reaches_the_broker() {
    let (mut real_client, fake_broker) = harness(RuleSet::new()).await;

    let hello = MessageBuilder::method_call(DBUS_PATH, "Hello")
        .unwrap()
        .interface(DBUS_INTERFACE)
        .unwrap()
        .destination(DBUS_INTERFACE)
        .unwrap()
        .build(&())
        .unwrap();
    real_client.send(hello).await.unwrap();

    let mut client_stream = MessageStream::from(&real_client);
    let reply = client_stream.next().await.unwrap().unwrap();
    assert_eq!(reply.message_type(), MessageType::MethodReturn);
    assert_eq!(reply.body::<&str>().unwrap(), ":1.7");

    recv_nothing(&fake_broker).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[timeout(15000)]
async fn allowed_outgoing_call_is_forwarded_to_the_broker() {
    let rules = RuleSet::new();
    rules.append(vec![Rule::new(
        "outgoing",
        "com.example.*",
        "/com/example/Foo",
        MethodField::Single("DoThing".to_string().into()),
    )]);
    let (mut real_client, fake_broker) = harness(rules).await;

    let call = MessageBuilder::method_call("/com/example/Foo", "DoThing")
        .unwrap()
        .interface("com.example.Svc")
        .unwrap()
        .destination("com.example.Svc")
        .unwrap()
        .build(&())
        .unwrap();
    real_client.send(call).await.unwrap();

    let mut broker_stream = MessageStream::from(&fake_broker);
    let forwarded = tokio::time::timeout(Duration::from_secs(5), broker_stream.next())
        .await
        .expect("call should have been forwarded")
        .unwrap()
        .unwrap();
    assert_eq!(forwarded.header().unwrap().member().unwrap().as_str(), "DoThing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[timeout(15000)]
async fn denied_outgoing_call_is_dropped_before_reaching_the_broker() {
    let (mut real_client, fake_broker) = harness(RuleSet::new()).await;

    let call = MessageBuilder::method_call("/com/example/Foo", "DoThing")
        .unwrap()
        .interface("com.example.Svc")
        .unwrap()
        .destination("com.example.Svc")
        .unwrap()
        .build(&())
        .unwrap();
    real_client.send(call).await.unwrap();

    recv_nothing(&fake_broker).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[timeout(15000)]
async fn allowed_incoming_signal_is_delivered_to_the_client() {
    let rules = RuleSet::new();
    rules.append(vec![Rule::new(
        "incoming",
        "com.example.*",
        "*",
        MethodField::Single("*".to_string().into()),
    )]);
    let (real_client, mut fake_broker) = harness(rules).await;

    let signal = MessageBuilder::method_call("/com/example/Obj", "Changed")
        .unwrap()
        .interface("com.example.X")
        .unwrap()
        .destination(":1.7")
        .unwrap()
        .sender(":1.99")
        .unwrap()
        .build(&())
        .unwrap();
    fake_broker.send(signal).await.unwrap();

    let mut client_stream = MessageStream::from(&real_client);
    let delivered = tokio::time::timeout(Duration::from_secs(5), client_stream.next())
        .await
        .expect("signal should have been delivered")
        .unwrap()
        .unwrap();
    assert_eq!(delivered.header().unwrap().member().unwrap().as_str(), "Changed");
}
