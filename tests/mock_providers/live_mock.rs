//! Mock Live Server
//!
//! Accepts duplex sessions, records every JSON frame a client sends, answers
//! `setup` with `setupComplete`, and forwards frames pushed by the test.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

/// Something the test wants the server to do on the open connection.
#[derive(Debug)]
enum ServerAction {
    Send(Value),
    SendBinary(Vec<u8>),
    Close { code: u16, reason: String },
}

#[derive(Default)]
struct Recorded {
    frames: Vec<Value>,
    request_uris: Vec<String>,
    connections: usize,
}

pub struct MockLiveServer {
    addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
    actions: mpsc::UnboundedSender<ServerAction>,
}

impl MockLiveServer {
    /// Start on an ephemeral port. Connections are served one at a time.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();

        let server_recorded = recorded.clone();
        tokio::spawn(async move {
            let mut actions_rx = actions_rx;
            while let Ok((stream, _)) = listener.accept().await {
                if let Err(e) = handle_connection(stream, &server_recorded, &mut actions_rx).await {
                    eprintln!("mock live connection error: {e}");
                }
            }
        });

        Self {
            addr,
            recorded,
            actions: actions_tx,
        }
    }

    /// Start a server that handles every connection in its own task.
    ///
    /// Pushed frames and closes are not delivered in this mode.
    pub async fn start_concurrent() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (actions_tx, _actions_rx) = mpsc::unbounded_channel();

        let server_recorded = recorded.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = server_recorded.clone();
                tokio::spawn(async move {
                    // Held open so the connection only ends when a peer closes
                    let (_idle_tx, mut idle_rx) = mpsc::unbounded_channel();
                    if let Err(e) = handle_connection(stream, &recorded, &mut idle_rx).await {
                        eprintln!("mock live connection error: {e}");
                    }
                });
            }
        });

        Self {
            addr,
            recorded,
            actions: actions_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Queue a server frame for the current (or next) connection.
    pub fn push(&self, frame: Value) {
        let _ = self.actions.send(ServerAction::Send(frame));
    }

    /// Queue a raw binary frame for the current (or next) connection.
    pub fn push_binary(&self, data: impl Into<Vec<u8>>) {
        let _ = self.actions.send(ServerAction::SendBinary(data.into()));
    }

    /// Close the current connection with the given code.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.actions.send(ServerAction::Close {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn frames(&self) -> Vec<Value> {
        self.recorded.lock().frames.clone()
    }

    /// Recorded frames carrying a top-level `key`.
    pub fn frames_with(&self, key: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|frame| frame.get(key).is_some())
            .collect()
    }

    pub fn request_uris(&self) -> Vec<String> {
        self.recorded.lock().request_uris.clone()
    }

    pub fn connections(&self) -> usize {
        self.recorded.lock().connections
    }

    /// Wait until at least `count` frames carrying `key` have arrived.
    pub async fn wait_for(&self, key: &str, count: usize) -> Vec<Value> {
        wait_until(|| self.frames_with(key).len() >= count).await;
        self.frames_with(key)
    }
}

/// Poll `condition` every 10 ms, panicking after 3 s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 3s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    recorded: &Arc<Mutex<Recorded>>,
    actions: &mut mpsc::UnboundedReceiver<ServerAction>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let uri_log = recorded.clone();
    let ws_stream = accept_hdr_async(stream, move |request: &Request, response: Response| {
        uri_log.lock().request_uris.push(request.uri().to_string());
        Ok(response)
    })
    .await?;
    recorded.lock().connections += 1;

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            message = read.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        eprintln!("mock live read error: {e}");
                        break;
                    }
                };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let is_setup = frame.get("setup").is_some();
                recorded.lock().frames.push(frame);
                if is_setup {
                    write
                        .send(Message::Text(json!({ "setupComplete": {} }).to_string().into()))
                        .await?;
                }
            }

            action = actions.recv() => {
                match action {
                    Some(ServerAction::Send(frame)) => {
                        write.send(Message::Text(frame.to_string().into())).await?;
                    }
                    Some(ServerAction::SendBinary(data)) => {
                        write.send(Message::Binary(data.into())).await?;
                    }
                    Some(ServerAction::Close { code, reason }) => {
                        write
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            })))
                            .await?;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    Ok(())
}
