//! # smtp-listener
//!
//! An SMTP listener that turns every received message into a CloudEvent
//! and posts it to an HTTP endpoint.
//!
//! Each message is parsed as MIME. The plain text body, the attachments,
//! the subject and the envelope sender and recipients end up in the
//! event's `data`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smtp_listener::{GatewayConfig, HttpDelivery, SmtpServer};
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::build("", "", "http://localhost:8080/", "", false, false)?;
//! let delivery = HttpDelivery::new(&config)?;
//! let server = SmtpServer::new("localhost", Arc::new(config), Arc::new(delivery));
//!
//! server.start("127.0.0.1:2525")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Events can be consumed in-process instead by handing the server an
//! `mpsc::Sender<Envelope>`:
//!
//! ```rust
//! use smtp_listener::{Envelope, GatewayConfig, SmtpServer};
//! use std::net::TcpListener;
//! use std::sync::{Arc, mpsc};
//! use std::thread;
//!
//! let config = GatewayConfig::build("", "", "http://localhost/", "", false, false).unwrap();
//! let (tx, rx) = mpsc::channel::<Envelope>();
//! let server = SmtpServer::new("test.local", Arc::new(config), Arc::new(tx));
//!
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//! thread::spawn(move || server.start_with_listener(listener));
//!
//! // Application sends email to the listener's address
//! // ...
//! # drop(rx);
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client
//! - `AUTH PLAIN` - Log in, advertised only when credentials are configured
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify the recipients (up to 50)
//! - `DATA` - Send the message, answered with the event id
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! ## Notes
//!
//! - Delivery is synchronous: the reply to `DATA` is sent once the
//!   endpoint has answered. There is no retry queue.
//! - Only the last non-empty `text/plain` part becomes the message text.
//!   HTML alternatives are dropped.
//! - TLS is implicit; `STARTTLS` is not supported.
//! - Mail relay is not supported.

pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod extract;
pub mod message;
pub mod smtp;
pub mod tls;

pub use config::{ConfigError, Credentials, GatewayConfig, Settings};
pub use delivery::{EventSink, HttpDelivery};
pub use error::{DeliveryError, GatewayError};
pub use event::{Envelope, IdPolicy, MessagePayload};
pub use extract::Attachment;
pub use smtp::{Session, SessionState, SmtpError, SmtpLimits, SmtpResponse, SmtpServer};
