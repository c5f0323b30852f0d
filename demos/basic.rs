//! Basic imdb Example
//!
//! Walks through every data type and every publish flavour against a
//! running server.
//!
//! Run with: cargo run --example basic [host] [port]

use std::time::Duration;

use anyhow::{Context, Result};
use imdb_client::{Client, ClientConfig, Payload};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = match args.next() {
        Some(port) => port.parse().context("port must be a number")?,
        None => 6379,
    };

    println!("imdb Basic Example\n");
    let client = Client::connect_with(ClientConfig::new(host, port))
        .await
        .context("Failed to connect (is the server running?)")?;

    strings(&client).await?;
    lists(&client).await?;
    sets(&client).await?;
    hashes(&client).await?;
    pubsub(&client).await?;

    // Give the last pushes time to arrive before closing
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.close();
    Ok(())
}

async fn strings(client: &Client) -> Result<()> {
    println!("=== String Operations ===");
    client.set("value", "Hello, World!").await?;
    println!("GET value: {:?}", client.get("value").await?);
    Ok(())
}

async fn lists(client: &Client) -> Result<()> {
    println!("\n=== List Operations ===");
    client.lpush("mylist", ["first", "second"]).await?;
    client.rpush("mylist", ["third", "fourth"]).await?;
    println!("LPOP: {:?}", client.lpop("mylist").await?);
    println!("RPOP: {:?}", client.rpop("mylist").await?);
    Ok(())
}

async fn sets(client: &Client) -> Result<()> {
    println!("\n=== Set Operations ===");
    client.sadd("myset", ["apple", "banana", "orange"]).await?;
    println!("SMEMBERS: {:?}", client.smembers("myset").await?);
    Ok(())
}

async fn hashes(client: &Client) -> Result<()> {
    println!("\n=== Hash Operations ===");
    client.hset("user:1", "name", "John").await?;
    client.hset("user:1", "age", "30").await?;
    println!("HGET name: {:?}", client.hget("user:1", "name").await?);
    println!("HGET age: {:?}", client.hget("user:1", "age").await?);
    Ok(())
}

async fn pubsub(client: &Client) -> Result<()> {
    println!("\n=== Pub/Sub Operations ===");

    for channel in [
        "string_channel",
        "json_channel",
        "binary_channel",
        "int_channel",
        "array_channel",
    ] {
        client
            .subscribe(channel, move |payload: &Payload| {
                println!("Received {} message on {}: {}", payload.message_type(), channel, payload);
            })
            .await?;
    }

    client.publish_string("string_channel", "Hello, World!").await?;
    client
        .publish_json("json_channel", &json!({ "name": "John", "age": 30 }))
        .await?;
    client
        .publish_binary("binary_channel", &b"Hello Binary!"[..])
        .await?;
    client.publish_int("int_channel", 42).await?;
    client
        .publish_array("array_channel", &[json!(1), json!("two"), json!({ "three": 3 })])
        .await?;
    Ok(())
}
