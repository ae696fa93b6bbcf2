//! Analysis session lifecycle.
//!
//! An [`AnalysisSession`] opens a remote session, relays the decoded event
//! stream in arrival order and guarantees the remote session is ended exactly
//! once, whether the stream finishes, fails, or the caller walks away.
//!
//! ```text
//! Idle -> Starting -> Streaming -> Closing -> Closed
//!             |
//!             +-> Failed
//! ```

use std::fmt;
use std::sync::Arc;

use futures_util::Stream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{AnalysisBackend, ByteStream};
use crate::error::SessionError;
use crate::stream::{frame_to_event, FrameStream, StreamEvent};

/// Lifecycle state of an analysis session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to analyze
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub repo_url: String,
    /// Caller-chosen id echoed back in the `session_created` event
    pub correlation_id: String,
    /// Message sent with the stream request; defaults to the repository URL
    pub message: Option<String>,
}

impl AnalysisRequest {
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            correlation_id: Uuid::new_v4().to_string(),
            message: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(&self.repo_url)
    }
}

/// One remote analysis session, driven by a single consumer.
pub struct AnalysisSession<B: AnalysisBackend + ?Sized + 'static> {
    backend: Arc<B>,
    user_id: String,
    state: SessionState,
    session_id: Option<String>,
    request: Option<AnalysisRequest>,
    /// Synthetic `session_created` event not yet handed out
    announcement: Option<StreamEvent>,
    frames: Option<FrameStream<ByteStream>>,
}

impl<B: AnalysisBackend + ?Sized + 'static> AnalysisSession<B> {
    pub fn new(backend: Arc<B>, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
            state: SessionState::Idle,
            session_id: None,
            request: None,
            announcement: None,
            frames: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Remote session id, known once the session has started
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Open the remote session.
    ///
    /// On failure the session moves to `Failed`; no cleanup call is made since
    /// no remote session exists.
    pub async fn start(&mut self, request: AnalysisRequest) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(self.state.as_str()));
        }

        self.state = SessionState::Starting;
        info!("Starting analysis session for {}", request.repo_url);

        let info = match self.backend.start_session(&self.user_id).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to start analysis session: {}", e);
                self.state = SessionState::Failed;
                return Err(e);
            }
        };

        debug!("Session {} started", info.session_id);
        self.announcement = Some(StreamEvent::SessionCreated {
            session_id: info.session_id.clone(),
            correlation_id: request.correlation_id.clone(),
            user_id: info.user_id,
            agent_kind: info.agent_kind,
            started_at: info.started_at,
        });
        self.session_id = Some(info.session_id);
        self.request = Some(request);
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Next event in arrival order, `None` once the session is over.
    ///
    /// The first event is always `session_created`. A terminal event or a
    /// transport error ends the remote session before it is returned.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, SessionError>> {
        if self.state != SessionState::Streaming {
            return None;
        }

        if let Some(event) = self.announcement.take() {
            return Some(Ok(event));
        }

        if self.frames.is_none() {
            if let Err(e) = self.open_stream().await {
                error!("Failed to open event stream: {}", e);
                self.close().await;
                return Some(Err(e));
            }
        }

        loop {
            let next = match self.frames.as_mut() {
                Some(frames) => frames.next_frame().await,
                None => None,
            };

            match next {
                Some(Ok(frame)) => {
                    let Some(event) = frame_to_event(frame) else {
                        continue;
                    };
                    if event.is_terminal() {
                        debug!("Received terminal {} event", event.kind());
                        self.close().await;
                    }
                    return Some(Ok(event));
                }
                Some(Err(e)) => {
                    error!("Event stream failed: {}", e);
                    self.close().await;
                    return Some(Err(e));
                }
                None => {
                    warn!("Event stream ended without a completion event");
                    self.close().await;
                    return None;
                }
            }
        }
    }

    /// Stop consuming early. Ends the remote session if it is still open.
    pub async fn cancel(&mut self) {
        match self.state {
            SessionState::Idle => self.state = SessionState::Closed,
            SessionState::Streaming => {
                info!("Analysis cancelled by caller");
                self.close().await;
            }
            // An interrupted close already spent its one end-session attempt
            SessionState::Closing => self.state = SessionState::Closed,
            _ => {}
        }
    }

    /// Expose the session as a stream. Dropping the stream cancels the session.
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent, SessionError>> {
        futures_util::stream::unfold(self, |mut session| async move {
            session.next_event().await.map(|item| (item, session))
        })
    }

    async fn open_stream(&mut self) -> Result<(), SessionError> {
        let (Some(session_id), Some(request)) = (self.session_id.as_deref(), &self.request) else {
            return Err(SessionError::InvalidState(self.state.as_str()));
        };

        let bytes = self
            .backend
            .stream_session(session_id, request.message())
            .await?;
        self.frames = Some(FrameStream::new(bytes));
        Ok(())
    }

    /// `Streaming -> Closing -> Closed`. The end-session call is attempted
    /// once and its failure only logged.
    ///
    /// The session id is taken before the call, so a caller that drops this
    /// future mid-call leaves the session in `Closing` with nothing left to
    /// end; `cancel` and `Drop` then settle it as `Closed`.
    async fn close(&mut self) {
        if self.state != SessionState::Streaming {
            return;
        }

        self.state = SessionState::Closing;
        self.frames = None;
        self.announcement = None;

        if let Some(session_id) = self.session_id.take() {
            match self.backend.end_session(&session_id).await {
                Ok(()) => debug!("Session {} ended", session_id),
                Err(e) => warn!("Failed to end session {}: {}", session_id, e),
            }
            self.session_id = Some(session_id);
        }

        self.state = SessionState::Closed;
    }
}

impl<B: AnalysisBackend + ?Sized + 'static> Drop for AnalysisSession<B> {
    fn drop(&mut self) {
        match self.state {
            SessionState::Streaming => {}
            SessionState::Closing => {
                debug!("Dropped while ending the session");
                self.state = SessionState::Closed;
                return;
            }
            _ => return,
        }
        self.state = SessionState::Closed;

        let Some(session_id) = self.session_id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Session {} abandoned, ending it in the background", session_id);
                let backend = Arc::clone(&self.backend);
                handle.spawn(async move {
                    if let Err(e) = backend.end_session(&session_id).await {
                        warn!("Failed to end session {}: {}", session_id, e);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "No async runtime to end session {}; leaving it to expire server-side",
                    session_id
                );
            }
        }
    }
}

/// Start a session and return its event stream.
pub async fn analyze<B: AnalysisBackend + ?Sized + 'static>(
    backend: Arc<B>,
    user_id: impl Into<String>,
    request: AnalysisRequest,
) -> Result<impl Stream<Item = Result<StreamEvent, SessionError>>, SessionError> {
    let mut session = AnalysisSession::new(backend, user_id);
    session.start(request).await?;
    Ok(session.into_stream())
}
