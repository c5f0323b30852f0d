//! imdb CLI Client
//!
//! Interactive command-line client for imdb servers.
//!
//! # Usage
//!
//! ```bash
//! # Connect to local server
//! imdb
//!
//! # Connect to remote server
//! imdb --host example.com --port 6380
//!
//! # Execute single command
//! imdb -c "GET greeting"
//!
//! # Print every message published on two channels
//! imdb --subscribe news --subscribe alerts
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use imdb_client::{
    BinaryDecoding, Client, ClientConfig, ClientError, Command, ConnectionState, Payload, Response,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// imdb Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "imdb")]
#[command(author, version, about = "imdb CLI - key-value and pub/sub client")]
struct Args {
    /// Server hostname
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "IMDB_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "6379", env = "IMDB_PORT")]
    port: u16,

    /// Request timeout in milliseconds (0 = wait forever)
    #[arg(long, default_value = "5000", env = "IMDB_TIMEOUT_MS")]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "IMDB_LOG_LEVEL")]
    log_level: String,

    /// Execute command and exit
    #[arg(short, long)]
    command: Option<String>,

    /// Subscribe to a channel and print its messages until Ctrl-C (repeatable)
    #[arg(long, value_name = "CHANNEL")]
    subscribe: Vec<String>,

    /// Base64-decode binary messages
    #[arg(long)]
    base64_binary: bool,

    /// Quiet mode (no banner)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let timeout = (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms));
        let binary = if self.base64_binary {
            BinaryDecoding::Base64
        } else {
            BinaryDecoding::Raw
        };

        ClientConfig::new(self.host.clone(), self.port)
            .with_request_timeout(timeout)
            .with_binary_decoding(binary)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so replies stay clean on stdout
    FmtSubscriber::builder()
        .with_max_level(parse_level(&args.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = args.client_config();
    let addr = config.addr();
    let client = Client::connect_with(config.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;

    // Single command mode
    if let Some(cmd) = args.command {
        let reply = client.execute(Command::raw(cmd)).await?;
        print_reply(&reply);
        return Ok(());
    }

    // Listen mode
    if !args.subscribe.is_empty() {
        for channel in &args.subscribe {
            client
                .subscribe(channel, printer(channel))
                .await
                .with_context(|| format!("Failed to subscribe to {}", channel))?;
            if !args.quiet {
                println!("{}", format!("Subscribed to {}", channel).green());
            }
        }
        tokio::signal::ctrl_c().await?;
        client.close();
        return Ok(());
    }

    if !args.quiet {
        println!(
            "{}",
            format!(
                r#"
  imdb CLI
  Connected to {}
  Type 'help' for commands, 'quit' to exit
"#,
                addr
            )
            .cyan()
        );
    }

    repl(client, config).await
}

async fn repl(mut client: Client, config: ClientConfig) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_path = history_path();
    if let Some(path) = &history_path {
        let _ = rl.load_history(path);
    }

    // Re-registered after a reconnect
    let mut channels: Vec<String> = Vec::new();

    loop {
        let prompt = format!("{}> ", "imdb".green());
        let line = match tokio::task::block_in_place(|| rl.readline(&prompt)) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        match LocalCommand::parse(line) {
            Some(LocalCommand::Quit) => break,
            Some(LocalCommand::Help) => {
                print_help();
                continue;
            }
            Some(LocalCommand::Clear) => {
                print!("\x1B[2J\x1B[1;1H");
                continue;
            }
            Some(LocalCommand::Usage(usage)) => {
                eprintln!("{} usage: {}", "Error:".red(), usage);
                continue;
            }
            Some(LocalCommand::Subscribe(channel)) => {
                match client.subscribe(&channel, printer(&channel)).await {
                    Ok(_) => {
                        println!("{}", "OK".green());
                        channels.push(channel);
                    }
                    Err(e) => eprintln!("{} {}", "Error:".red(), e),
                }
                continue;
            }
            None => {}
        }

        match client.execute(Command::raw(line)).await {
            Ok(reply) => print_reply(&reply),
            Err(e) => {
                eprintln!("{} {}", "Error:".red(), e);
                if !is_fatal(&e, &client) {
                    continue;
                }

                // Try to reconnect
                match reconnect(&config, &channels).await {
                    Ok(new_client) => {
                        client = new_client;
                        println!("{}", "Reconnected.".yellow());
                    }
                    Err(e) => {
                        eprintln!("{} {:#}", "Connection lost.".red(), e);
                        break;
                    }
                }
            }
        }
    }

    client.close();
    if let Some(path) = &history_path {
        let _ = rl.save_history(path);
    }
    Ok(())
}

async fn reconnect(config: &ClientConfig, channels: &[String]) -> Result<Client> {
    let client = Client::connect_with(config.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", config.addr()))?;
    for channel in channels {
        client.subscribe(channel, printer(channel)).await?;
    }
    Ok(client)
}

fn is_fatal(error: &ClientError, client: &Client) -> bool {
    matches!(error, ClientError::Connection(_) | ClientError::NotConnected(_))
        || client.state() == ConnectionState::Closed
}

/// Commands handled by the CLI itself
#[derive(Debug, PartialEq, Eq)]
enum LocalCommand {
    Quit,
    Help,
    Clear,
    /// Needs a callback, so it cannot go through as a raw line
    Subscribe(String),
    /// Malformed local command, never forwarded
    Usage(&'static str),
}

impl LocalCommand {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let head = parts.next()?.to_uppercase();
        match head.as_str() {
            "QUIT" | "EXIT" => Some(LocalCommand::Quit),
            "HELP" => Some(LocalCommand::Help),
            "CLEAR" => Some(LocalCommand::Clear),
            "SUBSCRIBE" => match (parts.next(), parts.next()) {
                (Some(channel), None) => Some(LocalCommand::Subscribe(channel.to_string())),
                _ => Some(LocalCommand::Usage("SUBSCRIBE <channel>")),
            },
            _ => None,
        }
    }
}

fn printer(channel: &str) -> impl Fn(&Payload) + Send + Sync + 'static {
    let channel = channel.to_string();
    move |payload: &Payload| {
        println!(
            "{} {} {}",
            format!("[{}]", channel).magenta(),
            format!("({})", payload.message_type()).dimmed(),
            payload
        );
    }
}

fn print_reply(reply: &Response) {
    let text = reply.as_str();
    if reply.is_ok() {
        println!("{}", text.green());
    } else if reply.is_nil() {
        println!("{}", text.dimmed());
    } else if text.parse::<i64>().is_ok() {
        println!("{}", text.yellow());
    } else {
        println!("{}", text);
    }
}

fn print_help() {
    println!(
        r#"
{}

{}
  SET <key> <value>                      Set a string value
  GET <key>                              Get a string value

{}
  LPUSH <key> <v1> [v2 ...]              Push values to the head
  RPUSH <key> <v1> [v2 ...]              Push values to the tail
  LPOP <key>                             Pop from the head
  RPOP <key>                             Pop from the tail

{}
  SADD <key> <m1> [m2 ...]               Add members
  SMEMBERS <key>                         List members

{}
  HSET <key> <field> <value>             Set a field
  HGET <key> <field>                     Get a field

{}
  SUBSCRIBE <channel>                    Print messages published on channel
  PUBLISH <channel> <message>            Publish a string
  PUBLISH_JSON <channel> <json>          Publish a JSON value
  PUBLISH_INT <channel> <int>            Publish an integer
  PUBLISH_BIN <channel> <base64>         Publish binary data
  PUBLISH_ARRAY <channel> <json-array>   Publish an array

{}
  help                                   Show this help
  clear                                  Clear screen
  quit/exit                              Exit CLI
"#,
        "imdb Commands".cyan().bold(),
        "Strings".yellow().bold(),
        "Lists".yellow().bold(),
        "Sets".yellow().bold(),
        "Hashes".yellow().bold(),
        "Pub/Sub".yellow().bold(),
        "Local".yellow().bold(),
    );
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn history_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".imdb_history"))
}
