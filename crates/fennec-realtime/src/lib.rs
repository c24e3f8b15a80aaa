//! Client for the Fennec realtime speech-to-text WebSocket API.
//!
//! A [`RealtimeSession`] trades the API key for a short-lived streaming token,
//! connects, performs the `start`/`ready` handshake, and then runs a background
//! receive loop that turns server frames into events (`partial`, `final`,
//! `thought`, `error`) and into a pull-style [`MessageStream`].
//!
//! ```ignore
//! use fennec_realtime::{RealtimeSession, SessionConfig};
//! use futures_util::StreamExt;
//!
//! let config = SessionConfig::builder(std::env::var("FENNEC_API_KEY")?).build()?;
//! let mut session = RealtimeSession::new(config);
//! session.events().on_partial(|t| { println!("~ {t}"); Ok(()) });
//!
//! session
//!     .scoped(|handle| async move {
//!         handle.send_bytes(pcm).await?;
//!         handle.send_eos().await?;
//!         let mut messages = handle.messages();
//!         while let Some(msg) = messages.next().await {
//!             println!("{msg}");
//!         }
//!         Ok::<_, fennec_realtime::Error>(())
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
mod keepalive;
pub mod queue;
mod receiver;
pub mod session;
pub mod token;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::{CallbackError, Error, Result};
pub use events::{CallbackResult, Event, EventKind, EventRegistry};
pub use queue::{MessageQueue, MessageStream};
pub use session::{RealtimeSession, SessionHandle, SessionState};
pub use token::{HttpTokenFetcher, TokenFetcher};

pub use fennec_realtime_types as types;
pub use fennec_realtime_types::InboundMessage;
