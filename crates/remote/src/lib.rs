// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Remote control plane: authenticated bidirectional messaging between
//! an engine host and remote clients over WebSocket.

pub mod client;
pub mod config_push;
pub mod protocol;
pub mod server;
pub mod token;

pub use client::{ClientError, ClientEvent, ClientTuning, ConnState, RemoteClient};
pub use config_push::{check_config, push_config, ConfigPaths, ConfigScope};
pub use protocol::{codes, Envelope, Payload, ProtocolError, TokenType, DEFAULT_PORT};
pub use server::{ListenOptions, RemoteServer, ServerError, ServerTuning};
pub use token::{
    constant_time_eq, ConnectionToken, ServerToken, TokenError, TokenStore,
    CONNECTION_TOKEN_HOURS, REFRESH_THRESHOLD_HOURS, SERVER_TOKEN_DAYS,
};
