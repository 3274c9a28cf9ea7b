use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::{FsError, Result};
use crate::model::ServerModel;

/// Lifecycle of the session backing one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Authenticating = 2,
    Ready = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Authenticating,
            3 => SessionState::Ready,
            _ => SessionState::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Connection handshake of a stateful backend.
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    type Session: Send + 'static;

    /// Open the transport and wait until the server is ready for credentials.
    /// Fails with [`FsError::Connection`].
    async fn connect(&self, server: &ServerModel) -> Result<Self::Session>;

    /// Submit credentials. Fails with [`FsError::Authentication`] when they
    /// are rejected.
    async fn authenticate(&self, session: &mut Self::Session, server: &ServerModel) -> Result<()>;

    /// Graceful logout. Errors are logged and swallowed; the transport is
    /// closed when `session` is dropped regardless.
    async fn disconnect(&self, session: Self::Session);
}

/// Opens a fresh session for every logical operation and always tears it
/// down afterwards.
///
/// Operations on one manager are serialized; there is never more than one
/// live session per manager.
pub struct SessionManager<P: Protocol> {
    protocol: P,
    server: ServerModel,
    state: AtomicU8,
    lock: Mutex<()>,
}

impl<P: Protocol> SessionManager<P> {
    pub fn new(protocol: P, server: ServerModel) -> Self {
        Self {
            protocol,
            server,
            state: AtomicU8::new(SessionState::Disconnected as u8),
            lock: Mutex::new(()),
        }
    }

    pub fn server(&self) -> &ServerModel {
        &self.server
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Run `op` on a freshly authenticated session.
    ///
    /// The session is disconnected once `op` finishes, whether it succeeded
    /// or failed. If the returned future is dropped, the transport is closed
    /// and the state reset without the graceful logout.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut P::Session) -> BoxFuture<'s, Result<T>> + Send,
    {
        let _permit = self.lock.lock().await;
        let mut guard = self.open().await?;

        let result = match guard.session.as_mut() {
            Some(session) => op(session).await,
            None => Err(FsError::connection("session closed before use")),
        };

        guard.release(&self.protocol, &self.server).await;
        result
    }

    async fn open(&self) -> Result<SessionGuard<'_, P>> {
        let endpoint = self.server.endpoint();
        let timeout = self.server.connect_timeout();
        let mut guard = SessionGuard {
            state: &self.state,
            session: None,
        };

        self.set_state(SessionState::Connecting);
        debug!("connecting to {}", endpoint);
        let session = match time::timeout(timeout, self.protocol.connect(&self.server)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!("connection to {} failed: {}", endpoint, e);
                return Err(e);
            }
            Err(_) => {
                warn!("connection to {} timed out after {:?}", endpoint, timeout);
                return Err(FsError::connection(format!(
                    "timed out connecting to {}",
                    endpoint
                )));
            }
        };
        guard.session = Some(session);

        self.set_state(SessionState::Authenticating);
        let auth = match guard.session.as_mut() {
            Some(session) => {
                match time::timeout(timeout, self.protocol.authenticate(session, &self.server)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(FsError::connection(format!(
                        "timed out logging in to {}",
                        endpoint
                    ))),
                }
            }
            None => Err(FsError::connection("session closed before login")),
        };
        if let Err(e) = auth {
            warn!("login to {} as {} failed: {}", endpoint, self.server.username, e);
            guard.release(&self.protocol, &self.server).await;
            return Err(e);
        }

        self.set_state(SessionState::Ready);
        info!("session ready on {} as {}", endpoint, self.server.username);
        Ok(guard)
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Owns the live session. Dropping it closes the transport and marks the
/// manager disconnected.
struct SessionGuard<'a, P: Protocol> {
    state: &'a AtomicU8,
    session: Option<P::Session>,
}

impl<P: Protocol> SessionGuard<'_, P> {
    /// Graceful logout, bounded by the connect timeout. A server that never
    /// answers loses the session to a plain transport close.
    async fn release(mut self, protocol: &P, server: &ServerModel) {
        if let Some(session) = self.session.take() {
            let timeout = server.connect_timeout();
            if time::timeout(timeout, protocol.disconnect(session)).await.is_err() {
                warn!(
                    "logout from {} timed out after {:?}, closing transport",
                    server.endpoint(),
                    timeout
                );
            }
        }
        debug!("session released");
    }
}

impl<P: Protocol> Drop for SessionGuard<'_, P> {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            debug!("session dropped mid-operation, transport closed");
        }
        self.state
            .store(SessionState::Disconnected as u8, Ordering::SeqCst);
    }
}
