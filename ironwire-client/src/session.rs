//! Session lifecycle and receive loop.
//!
//! One `Session` owns one connection: the negotiated session key, the
//! peer's public key, the event table, and the receive loop reading
//! frames off the stream. Handlers are dispatched without being
//! awaited; the loop keeps reading the next frame as soon as the
//! current payload and signature are consumed. In-flight handlers are
//! joined when the loop winds down, never cancelled.
//!
//! The protocol is strictly sequential per direction: the write half
//! sits behind an async mutex so exactly one outbound frame is in
//! flight, and the single loop guarantees the inbound direction.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use ironwire_core::crypto::{self, padded_len, SessionKey, IV_LEN};
use ironwire_core::frame::{self, FrameHeader, LEN_FIELD_WIRE, SIGNATURE_LEN};

use crate::chunk;
use crate::error::ConnectionError;
use crate::handshake;
use crate::keys::Identity;
use crate::router::{DeliveryMode, EventData, EventRouter, DEFAULT_STREAM_THRESHOLD};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote peer address, `host:port`.
    pub addr: String,
    /// Payloads over this many bytes default to streamed delivery when
    /// the event has no explicit registration.
    pub stream_threshold: u64,
}

impl SessionConfig {
    /// Configuration with the default streaming threshold.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
        }
    }
}

struct Conn {
    writer: OwnedWriteHalf,
    key: SessionKey,
    // Wakes the receive loop out of a parked read on terminate. Scoped
    // to one connection so a permit cannot leak into a reconnect.
    shutdown: Arc<Notify>,
}

struct Shared {
    config: SessionConfig,
    identity: Identity,
    router: EventRouter,
    conn: tokio::sync::Mutex<Option<Conn>>,
    connected: AtomicBool,
}

/// A client endpoint for one secure connection.
///
/// Cheap to clone; handlers on one session may hold a clone of another
/// session and call [`Session::send`] on it. Register all handlers
/// before calling [`Session::connect`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<Shared>,
}

impl Session {
    /// Create a disconnected session around an identity.
    pub fn new(config: SessionConfig, identity: Identity) -> Self {
        let router = EventRouter::new(config.stream_threshold);
        Self {
            inner: Arc::new(Shared {
                config,
                identity,
                router,
                conn: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// The identity this session authenticates as.
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// The event table. Registrations are also available directly via
    /// [`Session::on`] and [`Session::register`].
    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Register a buffered handler for `name`.
    pub fn on<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.router.on(name, handler);
    }

    /// Register a handler with an explicit delivery mode.
    pub fn register<F, Fut>(&self, name: &str, mode: DeliveryMode, handler: F)
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.router.register(name, mode, handler);
    }

    /// True iff the stream is open.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Open the stream, run the key exchange, and start the receive
    /// loop. Returns once the session is established; the `connect`
    /// event is dispatched on the loop.
    ///
    /// Precondition: not currently connected.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Err(ConnectionError::AlreadyConnected);
        }

        let mut stream = TcpStream::connect(&self.inner.config.addr).await?;
        let (key, peer_public) = handshake::establish(&mut stream, &self.inner.identity).await?;
        let (reader, writer) = stream.into_split();

        let shutdown = Arc::new(Notify::new());
        {
            let mut guard = self.inner.conn.lock().await;
            *guard = Some(Conn {
                writer,
                key: key.clone(),
                shutdown: Arc::clone(&shutdown),
            });
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        tracing::info!(addr = %self.inner.config.addr, "session established");

        tokio::spawn(receive_loop(self.clone(), reader, key, peer_public, shutdown));
        Ok(())
    }

    /// Send one event frame with an in-memory payload.
    pub async fn send(&self, event: &str, data: &[u8]) -> Result<(), ConnectionError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(ConnectionError::NotConnected)?;

        let iv = SessionKey::generate_iv();
        let ciphertext = crypto::symmetric_encrypt(&conn.key, &iv, data);

        let header = FrameHeader {
            event: event.to_string(),
            data_length: ciphertext.len() as u64,
        };
        let (len_field, enc_header) = frame::encode_header(&conn.key, &iv, &header)?;

        conn.writer.write_all(&iv).await?;
        conn.writer.write_all(&len_field).await?;
        conn.writer.write_all(&enc_header).await?;
        conn.writer.write_all(&ciphertext).await?;

        // Sign the digest of the zero-padded plaintext: the receiver
        // hashes what it decrypts, padding included.
        let mut hasher = Sha512::new();
        hasher.update(data);
        let pad = ciphertext.len() - data.len();
        hasher.update(&[0u8; 16][..pad]);
        let digest: [u8; 64] = hasher.finalize().into();

        let signature = crypto::raw_sign(&self.inner.identity.private, &digest);
        conn.writer
            .write_all(&crypto::signature_to_bytes(&signature)?[..])
            .await?;
        conn.writer.flush().await?;
        Ok(())
    }

    /// Send one event frame streaming the payload from a file.
    ///
    /// The declared length is the file size rounded up to the next
    /// multiple of 16; the payload streams in 1024-byte chunks while
    /// the plaintext is hashed for the signature.
    pub async fn send_file(&self, event: &str, path: &Path) -> Result<(), ConnectionError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(ConnectionError::NotConnected)?;

        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        let iv = SessionKey::generate_iv();
        let header = FrameHeader {
            event: event.to_string(),
            data_length: padded_len(size),
        };
        let (len_field, enc_header) = frame::encode_header(&conn.key, &iv, &header)?;

        conn.writer.write_all(&iv).await?;
        conn.writer.write_all(&len_field).await?;
        conn.writer.write_all(&enc_header).await?;

        let digest = chunk::send_chunked(&mut conn.writer, &mut file, size, &conn.key, &iv).await?;

        let signature = crypto::raw_sign(&self.inner.identity.private, &digest);
        conn.writer
            .write_all(&crypto::signature_to_bytes(&signature)?[..])
            .await?;
        conn.writer.flush().await?;
        Ok(())
    }

    /// Close the stream and release the connection.
    ///
    /// The session key is zeroized when the connection state drops. The
    /// receive loop is signalled directly, so it fires `disconnect` and
    /// winds down without waiting for the peer to close its end.
    /// Precondition: currently connected.
    pub async fn terminate(&self) -> Result<(), ConnectionError> {
        let mut guard = self.inner.conn.lock().await;
        let mut conn = guard.take().ok_or(ConnectionError::NotConnected)?;
        self.inner.connected.store(false, Ordering::SeqCst);

        conn.shutdown.notify_one();
        let _ = conn.writer.shutdown().await;
        tracing::info!(addr = %self.inner.config.addr, "session terminated");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.inner.config.addr)
            .field("identity", &self.inner.identity.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// The receive loop: reads frames until the connection dies, then fires
/// `disconnect` exactly once and joins in-flight handlers.
async fn receive_loop(
    session: Session,
    mut reader: OwnedReadHalf,
    key: SessionKey,
    peer_public: RsaPublicKey,
    shutdown: Arc<Notify>,
) {
    let mut tasks = JoinSet::new();

    // `connect` fires on the loop so it joins at shutdown with the rest.
    let (handler, _) = session.inner.router.resolve("connect", 0);
    tasks.spawn(handler(EventData::Empty));

    let cause = loop {
        let frame = tokio::select! {
            res = read_one_frame(&session, &mut reader, &key, &peer_public, &mut tasks) => res,
            // Local terminate: stop even if the peer never closes its end.
            () = shutdown.notified() => Err(ConnectionError::ConnectionClosed),
        };
        match frame {
            Ok(()) => {
                // Reap finished handlers without blocking the stream.
                while tasks.try_join_next().is_some() {}
            }
            Err(e) => break e,
        }
    };
    tracing::debug!(cause = %cause, "receive loop terminated");

    {
        let mut guard = session.inner.conn.lock().await;
        guard.take();
    }
    session.inner.connected.store(false, Ordering::SeqCst);

    let (handler, _) = session.inner.router.resolve("disconnect", 0);
    tasks.spawn(handler(EventData::Empty));

    // Shutdown join point: handlers run to completion, never cancelled.
    while tasks.join_next().await.is_some() {}
}

async fn read_one_frame(
    session: &Session,
    reader: &mut OwnedReadHalf,
    key: &SessionKey,
    peer_public: &RsaPublicKey,
    tasks: &mut JoinSet<()>,
) -> Result<(), ConnectionError> {
    let mut iv = [0u8; IV_LEN];
    reader.read_exact(&mut iv).await?;

    let mut len_field = [0u8; LEN_FIELD_WIRE];
    reader.read_exact(&mut len_field).await?;
    let header_len = frame::decode_len_field(key, &iv, &len_field)?;

    let mut enc_header = vec![0u8; header_len as usize];
    reader.read_exact(&mut enc_header).await?;
    let header = frame::decode_header(key, &iv, &enc_header)?;

    let (handler, mode) = session
        .inner
        .router
        .resolve(&header.event, header.data_length);

    // A handler registered BUFFERED must not let the peer declare an
    // arbitrarily large in-memory allocation.
    if mode == DeliveryMode::Buffered && header.data_length > session.inner.config.stream_threshold
    {
        return Err(ConnectionError::MalformedFrame);
    }

    let (payload, digest) = match mode {
        DeliveryMode::Buffered => {
            let (bytes, digest) =
                chunk::recv_buffered(reader, header.data_length, key, &iv).await?;
            (EventData::Bytes(bytes), digest)
        }
        DeliveryMode::Streamed => {
            let (spooled, digest) =
                chunk::recv_streamed(reader, header.data_length, key, &iv).await?;
            (EventData::Spooled(spooled), digest)
        }
    };

    let mut sig_field = vec![0u8; SIGNATURE_LEN];
    reader.read_exact(&mut sig_field).await?;
    let signature = crypto::signature_from_bytes(&sig_field);
    let recovered = crypto::raw_verify(peer_public, &signature);
    if recovered != BigUint::from_bytes_be(&digest) {
        // Not fatal: mirrors the reference behavior. The payload was
        // modified since signing, or signed under an unexpected key.
        tracing::warn!(event = %header.event, "inbound frame signature mismatch, dispatching anyway");
    }

    let data = EventRouter::adapt(&header.event, payload);
    tasks.spawn(handler(data));
    Ok(())
}
