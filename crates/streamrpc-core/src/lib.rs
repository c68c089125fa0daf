//! StreamRPC Core - duplex JSON-RPC over one long-lived byte stream pair.
//!
//! Requests and notifications go out over any `Write`; the peer's responses
//! and notifications come back over any `Read` as an unbroken sequence of
//! concatenated JSON values. A background reader thread splits that sequence
//! into values, runs registered notification handlers, and hands everything
//! else to the threads waiting for a response.
//!
//! The crate never opens connections itself. See the `streamrpc` binary for
//! a TCP and stdio front end.
//!
//! # Example
//!
//! ```rust,ignore
//! use streamrpc_core::{NotificationHandler, StreamingClient, ThreadExecutor};
//! use std::net::TcpStream;
//!
//! fn main() -> streamrpc_core::Result<()> {
//!     let stream = TcpStream::connect("127.0.0.1:4000")?;
//!
//!     let handler = NotificationHandler::builder(ThreadExecutor::new())
//!         .method("progress", |job: String, pct: u8| println!("{job}: {pct}%"))
//!         .build();
//!
//!     let client = StreamingClient::builder(stream.try_clone()?, stream)
//!         .handler(handler)
//!         .start()?;
//!
//!     let sum: i64 = client.invoke("add", (2, 3))?;
//!     println!("2 + 3 = {}", sum);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod reader_loop;

// Re-export commonly used types
pub use client::{decode_response, StreamingClient, StreamingClientBuilder};
pub use config::{ClientConfig, CorrelationMode, TransportConfig};
pub use correlator::{CloseReason, ResponseCorrelator};
pub use dispatch::{
    Executor, NotificationFn, NotificationHandler, NotificationHandlerBuilder, Offer, Task,
    ThreadExecutor, TokioExecutor,
};
pub use error::{Result, RpcError};
pub use protocol::{MessageKind, RpcErrorObject, RpcRequest, RpcResponse};
pub use reader::{StreamReaderState, ValueReader};
pub use reader_loop::{LoopExit, ReaderLoop};
