//! Mock provider servers for integration tests.
//!
//! - Live duplex endpoint on `tokio-tungstenite`, recording every client frame

// Not every test binary uses every helper
#![allow(dead_code)]

pub mod live_mock;

pub use live_mock::{MockLiveServer, wait_until};
