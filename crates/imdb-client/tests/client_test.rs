// End-to-end tests against a scripted in-process server
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use imdb_client::{
    BinaryDecoding, Client, ClientConfig, ClientError, Command, ConnectionState, Payload,
};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Minimal imdb server: one connection, state in memory
#[derive(Default)]
struct Store {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, Vec<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    subscribed: HashSet<String>,
}

impl Store {
    fn handle(&mut self, line: &str) -> String {
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let (first, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        let reply = match cmd {
            "SET" => {
                let value = tail
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .map(|v| v.replace("\\\"", "\""))
                    .unwrap_or_else(|| tail.to_string());
                self.strings.insert(first.to_string(), value);
                "OK".to_string()
            }
            "GET" => self.strings.get(first).cloned().unwrap_or_else(nil),
            "LPUSH" | "RPUSH" => {
                let list = self.lists.entry(first.to_string()).or_default();
                for value in tail.split(' ') {
                    if cmd == "LPUSH" {
                        list.push_front(value.to_string());
                    } else {
                        list.push_back(value.to_string());
                    }
                }
                list.len().to_string()
            }
            "LPOP" => self
                .lists
                .get_mut(first)
                .and_then(|l| l.pop_front())
                .unwrap_or_else(nil),
            "RPOP" => self
                .lists
                .get_mut(first)
                .and_then(|l| l.pop_back())
                .unwrap_or_else(nil),
            "SADD" => {
                let set = self.sets.entry(first.to_string()).or_default();
                for member in tail.split(' ') {
                    if !set.iter().any(|m| m == member) {
                        set.push(member.to_string());
                    }
                }
                set.len().to_string()
            }
            "SMEMBERS" => self.sets.get(first).map(|s| s.join(" ")).unwrap_or_else(nil),
            "HSET" => {
                let (field, value) = tail.split_once(' ').unwrap_or((tail, ""));
                self.hashes
                    .entry(first.to_string())
                    .or_default()
                    .insert(field.to_string(), value.to_string());
                "OK".to_string()
            }
            "HGET" => self
                .hashes
                .get(first)
                .and_then(|h| h.get(tail))
                .cloned()
                .unwrap_or_else(nil),
            "SUBSCRIBE" => {
                self.subscribed.insert(first.to_string());
                "OK".to_string()
            }
            "PUBLISH" => return self.publish(first, json!({"Type": 0, "Content": tail})),
            "PUBLISH_JSON" => {
                let data: serde_json::Value = serde_json::from_str(tail).unwrap();
                return self.publish(first, json!({"Type": 1, "Content": data}));
            }
            "PUBLISH_BIN" => return self.publish(first, json!({"Type": 2, "Content": tail})),
            // Integers and arrays arrive as strings, the way the server relays them
            "PUBLISH_INT" => return self.publish(first, json!({"Type": 3, "Content": tail})),
            "PUBLISH_ARRAY" => return self.publish(first, json!({"Type": 4, "Content": tail})),
            _ => "ERR unknown command".to_string(),
        };
        format!("{}\n", reply)
    }

    /// Push first, then the acknowledgment
    fn publish(&self, channel: &str, envelope: serde_json::Value) -> String {
        let mut out = String::new();
        if self.subscribed.contains(channel) {
            out.push_str(&format!("Message {} {}\n", channel, envelope));
        }
        out.push_str("OK\n");
        out
    }
}

fn nil() -> String {
    "(nil)".to_string()
}

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream).await;
    });
    addr
}

async fn serve(stream: TcpStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut store = Store::default();

    while let Ok(Some(line)) = lines.next_line().await {
        let out = store.handle(&line);
        if write.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new(addr.ip().to_string(), addr.port())
}

async fn connected_client() -> Client {
    Client::connect_with(config_for(spawn_server().await)).await.unwrap()
}

fn collector() -> (
    mpsc::UnboundedReceiver<Payload>,
    impl Fn(&Payload) + Send + Sync + 'static,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (rx, move |payload: &Payload| {
        let _ = tx.send(payload.clone());
    })
}

#[tokio::test]
async fn test_set_get_roundtrip() {
    let client = connected_client().await;
    assert_eq!(client.state(), ConnectionState::Connected);

    assert!(client.set("greeting", "Hello, World!").await.unwrap());
    assert_eq!(
        client.get("greeting").await.unwrap().as_deref(),
        Some("Hello, World!")
    );

    assert!(client.set("quote", r#"say "hi""#).await.unwrap());
    assert_eq!(client.get("quote").await.unwrap().as_deref(), Some(r#"say "hi""#));

    assert!(client.set("answer", 42).await.unwrap());
    assert_eq!(client.get("answer").await.unwrap().as_deref(), Some("42"));
}

#[tokio::test]
async fn test_get_missing_key() {
    let client = connected_client().await;
    assert_eq!(client.get("nope").await.unwrap(), None);
}

#[tokio::test]
async fn test_list_operations() {
    let client = connected_client().await;
    assert_eq!(client.lpush("mylist", ["first", "second"]).await.unwrap(), 2);
    assert_eq!(client.rpush("mylist", ["third", "fourth"]).await.unwrap(), 4);

    assert_eq!(client.lpop("mylist").await.unwrap().as_deref(), Some("second"));
    assert_eq!(client.rpop("mylist").await.unwrap().as_deref(), Some("fourth"));
    assert_eq!(client.lpop("empty").await.unwrap(), None);
}

#[tokio::test]
async fn test_set_members() {
    let client = connected_client().await;
    assert_eq!(client.smembers("myset").await.unwrap(), None);

    assert_eq!(
        client.sadd("myset", ["apple", "banana", "orange"]).await.unwrap(),
        3
    );
    assert_eq!(
        client.smembers("myset").await.unwrap(),
        Some(vec!["apple".to_string(), "banana".to_string(), "orange".to_string()])
    );
}

#[tokio::test]
async fn test_hash_operations() {
    let client = connected_client().await;
    assert!(client.hset("user:1", "name", "John").await.unwrap());
    assert!(client.hset("user:1", "age", "30").await.unwrap());

    assert_eq!(client.hget("user:1", "name").await.unwrap().as_deref(), Some("John"));
    assert_eq!(client.hget("user:1", "age").await.unwrap().as_deref(), Some("30"));
    assert_eq!(client.hget("user:1", "email").await.unwrap(), None);
}

#[tokio::test]
async fn test_execute_raw_line() {
    let client = connected_client().await;
    client.set("k", "v").await.unwrap();
    let reply = client.execute(Command::raw("GET k")).await.unwrap();
    assert_eq!(reply.as_str(), "v");
}

#[tokio::test]
async fn test_concurrent_requests_get_their_own_replies() {
    let client = Arc::new(connected_client().await);
    for n in 0..50 {
        client.set(&format!("key{}", n), format!("value{}", n)).await.unwrap();
    }

    let handles: Vec<_> = (0..50)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move { (n, client.get(&format!("key{}", n)).await.unwrap()) })
        })
        .collect();

    for handle in handles {
        let (n, value) = handle.await.unwrap();
        assert_eq!(value, Some(format!("value{}", n)));
    }
}

#[tokio::test]
async fn test_typed_publish_dispatch() {
    let config = config_for(spawn_server().await).with_binary_decoding(BinaryDecoding::Base64);
    let client = Client::connect_with(config).await.unwrap();

    let (mut strings, on_string) = collector();
    let (mut jsons, on_json) = collector();
    let (mut bins, on_bin) = collector();
    let (mut ints, on_int) = collector();
    let (mut arrays, on_array) = collector();
    client.subscribe("string_channel", on_string).await.unwrap();
    client.subscribe("json_channel", on_json).await.unwrap();
    client.subscribe("binary_channel", on_bin).await.unwrap();
    client.subscribe("int_channel", on_int).await.unwrap();
    client.subscribe("array_channel", on_array).await.unwrap();

    assert!(client.publish_string("string_channel", "Hello, World!").await.unwrap());
    assert!(client
        .publish_json("json_channel", &json!({"name": "John", "age": 30}))
        .await
        .unwrap());
    assert!(client
        .publish_binary("binary_channel", Bytes::from_static(b"Hello Binary!"))
        .await
        .unwrap());
    assert!(client.publish_int("int_channel", 42).await.unwrap());
    assert!(client
        .publish_array("array_channel", &[json!(1), json!("two"), json!({"three": 3})])
        .await
        .unwrap());

    assert_eq!(strings.recv().await, Some(Payload::Text("Hello, World!".into())));
    assert_eq!(
        jsons.recv().await,
        Some(Payload::Json(json!({"name": "John", "age": 30})))
    );
    assert_eq!(
        bins.recv().await,
        Some(Payload::Binary(Bytes::from_static(b"Hello Binary!")))
    );
    assert_eq!(ints.recv().await, Some(Payload::Integer(42)));
    assert_eq!(
        arrays.recv().await,
        Some(Payload::Array(vec![json!(1), json!("two"), json!({"three": 3})]))
    );
}

#[tokio::test]
async fn test_fan_out_in_registration_order() {
    let client = connected_client().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first = tx.clone();
    client
        .subscribe("news", move |p| {
            let _ = first.send(("first", p.clone()));
        })
        .await
        .unwrap();
    let second = tx.clone();
    client
        .subscribe("news", move |p| {
            let _ = second.send(("second", p.clone()));
        })
        .await
        .unwrap();
    drop(tx);

    client.publish("news", "extra").await.unwrap();

    assert_eq!(rx.recv().await, Some(("first", Payload::Text("extra".into()))));
    assert_eq!(rx.recv().await, Some(("second", Payload::Text("extra".into()))));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_fan_out() {
    let client = connected_client().await;
    client.subscribe("news", |_| panic!("subscriber bug")).await.unwrap();
    let (mut rx, callback) = collector();
    client.subscribe("news", callback).await.unwrap();

    client.publish("news", "one").await.unwrap();
    client.publish("news", "two").await.unwrap();

    assert_eq!(rx.recv().await, Some(Payload::Text("one".into())));
    assert_eq!(rx.recv().await, Some(Payload::Text("two".into())));
    assert_eq!(client.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let client = connected_client().await;
    let (mut rx, callback) = collector();
    let subscription = client.subscribe("news", callback).await.unwrap();
    assert_eq!(subscription.channel(), "news");

    client.publish("news", "before").await.unwrap();
    assert!(client.unsubscribe(&subscription));
    assert!(!client.unsubscribe(&subscription));
    client.publish("news", "after").await.unwrap();

    assert_eq!(rx.recv().await, Some(Payload::Text("before".into())));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_push_split_at_every_offset() {
    let stream = b"Message news {\"Type\":3,\"Content\":\"42\"}\nOK\n";

    for chunk in 1..=8 {
        let (local, mut remote) = tokio::io::duplex(64);
        let config = ClientConfig {
            read_buffer_size: chunk,
            ..ClientConfig::default()
        };
        let client = Client::from_stream(local, config);
        let (mut rx, callback) = collector();
        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = remote.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"GET k\n");
            for byte in stream.iter() {
                remote.write_all(&[*byte]).await.unwrap();
                remote.flush().await.unwrap();
            }
            remote
        });

        let handle = client.subscribe_local("news", callback);
        let reply = client.get("k").await.unwrap();
        assert_eq!(reply.as_deref(), Some("OK"), "chunk size {}", chunk);
        assert_eq!(rx.recv().await, Some(Payload::Integer(42)));
        assert!(rx.try_recv().is_err(), "push routed twice with chunk size {}", chunk);

        client.unsubscribe(&handle);
        let _remote = server.await.unwrap();
    }
}

#[tokio::test]
async fn test_malformed_envelope_does_not_disturb_replies() {
    let (local, remote) = tokio::io::duplex(256);
    let client = Client::from_stream(local, ClientConfig::default());
    let (mut rx, callback) = collector();
    client.subscribe_local("news", callback);

    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(remote);
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("GET a"));
        write
            .write_all(b"Message news {broken\nMessage news {\"Type\":3,\"Content\":\"abc\"}\nvalue-a\n")
            .await
            .unwrap();
        (lines, write)
    });

    assert_eq!(client.get("a").await.unwrap().as_deref(), Some("value-a"));
    assert!(rx.try_recv().is_err());
    let _server = server.await.unwrap();
}

#[tokio::test]
async fn test_push_before_subscribe_ack() {
    let (local, remote) = tokio::io::duplex(256);
    let client = Client::from_stream(local, ClientConfig::default());
    let (mut rx, callback) = collector();

    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(remote);
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("SUBSCRIBE news"));
        write
            .write_all(b"Message news {\"Type\":3,\"Content\":\"42\"}\nOK\n")
            .await
            .unwrap();
        (lines, write)
    });

    client.subscribe("news", callback).await.unwrap();
    // Dispatched by the reader before the acknowledgment resolved
    assert_eq!(rx.try_recv().ok(), Some(Payload::Integer(42)));
    assert_eq!(client.subscriber_count("news"), 1);
    let _server = server.await.unwrap();
}

#[tokio::test]
async fn test_timeout_keeps_fifo_intact() {
    let (local, remote) = tokio::io::duplex(256);
    let config = ClientConfig::default().with_request_timeout(Some(Duration::from_millis(100)));
    let client = Client::from_stream(local, config);

    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(remote);
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("GET slow"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("GET fast"));
        write.write_all(b"late\nfresh\n").await.unwrap();
        (lines, write)
    });

    let err = client.get("slow").await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { ref command, .. } if command == "GET"));
    assert_eq!(client.pending(), 1);

    assert_eq!(client.get("fast").await.unwrap().as_deref(), Some("fresh"));
    assert_eq!(client.pending(), 0);
    let _server = server.await.unwrap();
}

#[tokio::test]
async fn test_max_pending_rejects_before_writing() {
    let (local, remote) = tokio::io::duplex(1024);
    let mut remote = BufReader::new(remote);
    let config = ClientConfig::default()
        .with_max_pending(2)
        .with_request_timeout(None);
    let client = Arc::new(Client::from_stream(local, config));

    let in_flight: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|key| {
            let client = client.clone();
            tokio::spawn(async move { client.get(key).await })
        })
        .collect();
    let mut sent = Vec::new();
    for _ in 0..2 {
        let mut line = String::new();
        remote.read_line(&mut line).await.unwrap();
        sent.push(line);
    }
    sent.sort();
    assert_eq!(sent, vec!["GET a\n", "GET b\n"]);

    let err = client.get("c").await.unwrap_err();
    assert!(matches!(err, ClientError::TooManyPending { limit: 2 }));

    client.close();
    for handle in in_flight {
        assert!(matches!(handle.await.unwrap(), Err(ClientError::Connection(_))));
    }

    // Nothing else reached the wire before the stream closed
    let mut rest = String::new();
    remote.read_to_string(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_disconnect_fails_pending_then_not_connected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        // Read one command and hang up without answering
        lines.next_line().await.unwrap();
    });

    let client = Client::connect_with(config_for(addr)).await.unwrap();
    let err = client.get("k").await.unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));
    server.await.unwrap();

    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.get("k").await,
        Err(ClientError::NotConnected(ConnectionState::Closed))
    ));
    assert!(matches!(
        client.connect().await,
        Err(ClientError::InvalidState(ConnectionState::Closed))
    ));
}

#[tokio::test]
async fn test_commands_before_connect() {
    let client = Client::new(ClientConfig::default());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.set("k", "v").await,
        Err(ClientError::NotConnected(ConnectionState::Disconnected))
    ));

    // A failed SUBSCRIBE leaves no callback behind
    assert!(client.subscribe("news", |_| {}).await.is_err());
    assert_eq!(client.subscriber_count("news"), 0);
}

#[tokio::test]
async fn test_connect_refused() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = Client::new(config_for(addr));
    assert!(matches!(client.connect().await, Err(ClientError::Connect { .. })));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_encoding_error_is_local() {
    let client = connected_client().await;
    assert!(matches!(
        client.set("bad key", "v").await,
        Err(ClientError::Encoding(_))
    ));
    assert!(matches!(
        client.publish("news", "two\nlines").await,
        Err(ClientError::Encoding(_))
    ));
    assert!(matches!(
        client.subscribe("", |_| {}).await,
        Err(ClientError::Encoding(_))
    ));
    assert_eq!(client.pending(), 0);

    // The connection is still in sync
    assert!(client.set("good", "v").await.unwrap());
    assert_eq!(client.get("good").await.unwrap().as_deref(), Some("v"));
}
