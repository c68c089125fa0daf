//! StreamRPC CLI - call, listen to, or impersonate a streaming JSON-RPC peer.
//!
//! Logs go to stderr so stdout carries only results, notifications or (for
//! `echo`) protocol bytes.

mod echo;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::io::Write;
use std::net::TcpStream;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use streamrpc_core::{
    ClientConfig, CorrelationMode, Executor, NotificationHandler, StreamingClient, Task,
    TokioExecutor, TransportConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "streamrpc")]
#[command(about = "Duplex JSON-RPC over a single byte stream pair")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// How responses are matched to calls: `by-id` or `fifo`
    #[arg(long, global = true, value_name = "MODE", value_parser = parse_correlation)]
    correlation: Option<CorrelationMode>,

    /// How long a call waits for its response, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a method and print its result
    Call {
        /// Peer address (HOST:PORT)
        #[arg(long)]
        connect: String,

        /// Method to call
        method: String,

        /// Params as a JSON value
        #[arg(default_value = "[]")]
        params: String,
    },
    /// Print notifications from the peer as JSON lines
    Listen {
        /// Peer address (HOST:PORT)
        #[arg(long)]
        connect: String,

        /// Stop after this many notifications
        #[arg(long)]
        count: Option<usize>,
    },
    /// Answer requests on stdin/stdout with their own params
    Echo {
        /// Send a `tick` notification before each reply
        #[arg(long)]
        tick: bool,
    },
}

fn parse_correlation(s: &str) -> Result<CorrelationMode, String> {
    CorrelationMode::from_str(s)
        .ok_or_else(|| format!("unknown correlation mode '{}' (expected by-id or fifo)", s))
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let timeout = self
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(TransportConfig::DEFAULT_CLI_TIMEOUT);
        ClientConfig::default()
            .with_correlation(self.correlation.unwrap_or_default())
            .with_response_timeout(timeout)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    // Clients block on their calls; keep them off the async workers.
    tokio::task::spawn_blocking(move || run(args))
        .await
        .context("worker thread failed")?
}

fn run(args: Args) -> Result<()> {
    let config = args.client_config();
    match args.command {
        Command::Call {
            connect,
            method,
            params,
        } => {
            let params: Value =
                serde_json::from_str(&params).context("params must be valid JSON")?;
            let result = call(&connect, &method, params, config)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Listen { connect, count } => {
            let stdout = std::io::stdout();
            let printed = listen(&connect, count, config, &mut stdout.lock())?;
            info!("Printed {} notifications", printed);
            Ok(())
        }
        Command::Echo { tick } => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            echo::serve(stdin.lock(), stdout.lock(), tick)?;
            Ok(())
        }
    }
}

fn open(addr: &str) -> Result<(TcpStream, TcpStream)> {
    let stream = TcpStream::connect(addr).with_context(|| format!("connecting to {}", addr))?;
    let input = stream.try_clone()?;
    info!("Connected to {}", addr);
    Ok((input, stream))
}

/// Invoke `method` on the peer at `addr` and return its result.
fn call(addr: &str, method: &str, params: Value, config: ClientConfig) -> Result<Value> {
    let (input, output) = open(addr)?;

    let executor: Arc<dyn Executor> = match TokioExecutor::current() {
        Some(executor) => Arc::new(executor),
        None => Arc::new(|task: Task| task()),
    };
    // Notifications arriving during the call are only logged.
    let handler = NotificationHandler::builder_shared(executor)
        .fallback(|method: &str, params: Vec<Value>| {
            let params = Value::Array(params);
            info!("Notification {}: {}", method, params);
        })
        .build();

    let client = StreamingClient::builder(input, output)
        .handler(handler)
        .config(config)
        .start()?;

    match client.invoke::<Value>(method, params) {
        Ok(result) => Ok(result),
        Err(e) if e.is_stream_closed() => {
            Err(anyhow!(e).context(format!("{} closed the connection before answering", addr)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Write each notification from the peer at `addr` to `out` as a JSON line.
/// Returns how many were written.
fn listen(
    addr: &str,
    count: Option<usize>,
    config: ClientConfig,
    out: &mut impl Write,
) -> Result<usize> {
    let (input, output) = open(addr)?;
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    // Inline execution keeps the printed order identical to the wire order.
    let handler = NotificationHandler::builder(|task: Task| task())
        .fallback(move |method: &str, params: Vec<Value>| {
            let line = json!({"method": method, "params": params});
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(line);
            }
        })
        .build();

    let client = StreamingClient::builder(input, output)
        .handler(handler)
        .config(config)
        .start()?;

    let mut printed = 0;
    while count.map_or(true, |limit| printed < limit) {
        // The sender lives in the reader loop; the channel closes when it stops.
        let Ok(line) = rx.recv() else { break };
        writeln!(out, "{}", line)?;
        out.flush()?;
        printed += 1;
    }

    if let Some(exit) = client.reader_exit() {
        if !exit.ended_cleanly() {
            warn!("Connection closed: {}", exit.reason);
        }
    }
    Ok(printed)
}
