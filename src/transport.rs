// Byte-stream transport abstraction and the TCP implementation
//
// The session owns the protocol; a transport only moves bytes. Received
// chunks are pushed through an mpsc channel whose receive side the session
// claims at construction.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::protocol::MdwpResult;

const READ_CHUNK_SIZE: usize = 4096;
const CHANNEL_CAPACITY: usize = 64;

/// What the read side of a transport can deliver.
#[derive(Debug)]
pub enum TransportEvent {
    Data(Vec<u8>),
    Error(io::Error),
    Closed,
}

/// A reliable byte stream to the debug agent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying stream.
    async fn connect(&self) -> MdwpResult<()>;

    /// Close the stream and stop delivering events.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Write raw bytes; returns false on any failure.
    async fn write(&self, bytes: &[u8]) -> bool;

    /// Take the receive side of the event channel. Yields a value exactly
    /// once; the session claims it when it is constructed.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;
}

/// TCP transport to a debug agent listening on the target.
pub struct TcpTransport {
    host: String,
    port: u16,
    connected: Arc<AtomicBool>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: StdMutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            host: host.into(),
            port,
            connected: Arc::new(AtomicBool::new(false)),
            writer: Mutex::new(None),
            pump: Mutex::new(None),
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> MdwpResult<()> {
        info!("connecting to {}:{}", self.host, self.port);

        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true).ok();

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        let tx = self.event_tx.clone();
        let handle = tokio::spawn(read_pump(reader, tx, self.connected.clone()));
        *self.pump.lock().await = Some(handle);

        info!("connected to {}:{}", self.host, self.port);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
        // Dropping the write half closes the socket
        self.writer.lock().await.take();
        debug!("transport disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, bytes: &[u8]) -> bool {
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            warn!("write on a disconnected transport");
            return false;
        };

        if let Err(e) = w.write_all(bytes).await {
            error!("transport write failed: {e}");
            self.connected.store(false, Ordering::SeqCst);
            return false;
        }
        if let Err(e) = w.flush().await {
            error!("transport flush failed: {e}");
            self.connected.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.lock().ok()?.take()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn read_pump(
    mut reader: OwnedReadHalf,
    tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("peer closed the stream");
                connected.store(false, Ordering::SeqCst);
                tx.send(TransportEvent::Closed).await.ok();
                break;
            }
            Ok(n) => {
                if tx.send(TransportEvent::Data(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("transport read failed: {e}");
                connected.store(false, Ordering::SeqCst);
                tx.send(TransportEvent::Error(e)).await.ok();
                break;
            }
        }
    }
}
