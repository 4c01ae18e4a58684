use std::{env::temp_dir, iter::repeat_with};

use dbus_gatekeeper::listener::Listener;
use ntest::timeout;
use tokio::{io::AsyncWriteExt, net::UnixStream};

fn unique_socket_path() -> std::path::PathBuf {
    let dir = temp_dir().join("dbus-gatekeeper-test");
    let _ = std::fs::create_dir(&dir);
    let name: String = repeat_with(fastrand::alphanumeric).take(10).collect();
    dir.join(name)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[timeout(15000)]
async fn accepts_a_client_connection() {
    let path = unique_socket_path();
    let mut listener = Listener::listen(&path).await.unwrap();

    let connect_path = path.clone();
    let client = tokio::spawn(async move {
        let mut stream = UnixStream::connect(&connect_path).await.unwrap();
        stream.write_all(b"hi").await.unwrap();
    });

    let _accepted = listener.accept().await.unwrap();
    client.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[timeout(15000)]
async fn teardown_then_relisten_accepts_again() {
    let path = unique_socket_path();
    let mut listener = Listener::listen(&path).await.unwrap();
    listener.teardown();
    assert!(!path.exists() || UnixStream::connect(&path).await.is_err());

    listener.relisten().await.unwrap();
    let connect_path = path.clone();
    let client = tokio::spawn(async move {
        UnixStream::connect(&connect_path).await.unwrap();
    });
    let _accepted = listener.accept().await.unwrap();
    client.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[timeout(15000)]
async fn dropping_the_listener_removes_the_socket_file() {
    let path = unique_socket_path();
    let listener = Listener::listen(&path).await.unwrap();
    assert!(path.exists());
    drop(listener);
    assert!(!path.exists());
}
