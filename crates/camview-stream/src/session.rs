//! HTTP stream sessions
//!
//! A [`StreamSession`] performs the GET against the camera, validates the
//! multipart handshake and hands the response body to a
//! [`FrameExtractor`] running on a dedicated reader thread. Extracted
//! frames are republished through a bounded channel as a cancellable
//! [`Subscription`].
//!
//! The session never reconnects on its own; reconnection policy belongs
//! to the caller.

use crate::FrameExtractor;
use camview_core::{Error, Frame, Result, StreamConfig, StreamingState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Frames buffered between the reader thread and the consumer.
/// Small on purpose: memory stays bounded and a slow consumer applies
/// backpressure to the network read.
const FRAME_CHANNEL_CAPACITY: usize = 2;

/// Opens MJPEG stream connections
pub struct StreamSession;

impl StreamSession {
    /// Connect to the configured URL and start extracting frames.
    ///
    /// Fails fast on connect timeout, HTTP 401/403, any other
    /// non-success status, or a response that is not a multipart stream
    /// with a boundary parameter. On success the returned subscription
    /// delivers frames in network arrival order until a terminal error
    /// or cancellation.
    pub fn open(config: StreamConfig) -> Result<Subscription> {
        config.validate()?;
        let timeout = Duration::from_secs(config.timeout_secs);

        // per-read timeout instead of a whole-request deadline: the body
        // is endless, but a cancelled subscription must unblock a stuck
        // read within this interval (blocking `timeout` is per
        // connect/read/write operation, not per request)
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        let mut request = client.get(&config.url).header("Cache-Control", "no-cache");
        if let Some(username) = &config.username {
            request = request.basic_auth(username, config.password.as_deref());
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                Error::Connection(format!("connect timed out after {}s", config.timeout_secs))
            } else {
                Error::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Auth(status.as_u16()));
        }
        if !status.is_success() {
            return Err(Error::Connection(format!("unexpected HTTP status {}", status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let boundary = boundary_from_content_type(&content_type)?;

        info!("connected to {} (boundary \"{}\")", config.url, boundary);

        let (sender, mut subscription) = Subscription::in_process(FRAME_CHANNEL_CAPACITY);
        let extractor = FrameExtractor::with_config(response, &boundary, &config);

        let handle = thread::Builder::new()
            .name("camview-stream".into())
            .spawn(move || run_reader(extractor, sender))
            .map_err(|e| Error::Connection(format!("failed to spawn reader thread: {}", e)))?;
        subscription.handle = Some(handle);

        Ok(subscription)
    }
}

/// Reader loop: owns the connection for its whole lifetime; every exit
/// path drops the extractor (and with it the HTTP response).
fn run_reader<R: std::io::Read>(mut extractor: FrameExtractor<R>, sender: FrameSender) {
    sender.set_state(StreamingState::Streaming);
    loop {
        if sender.is_cancelled() {
            sender.set_state(StreamingState::Stopped);
            break;
        }
        match extractor.next_frame() {
            Ok(frame) => {
                if !sender.send(frame) {
                    debug!("subscriber gone, closing stream");
                    sender.set_state(StreamingState::Stopped);
                    break;
                }
            }
            Err(e) => {
                if sender.is_cancelled() {
                    // a read timeout while cancelling is the expected
                    // way out of a blocked read
                    sender.set_state(StreamingState::Stopped);
                } else {
                    warn!("stream terminated: {}", e);
                    sender.set_state(StreamingState::Failed(e.to_string()));
                    sender.fail(e);
                }
                break;
            }
        }
    }
    debug!("stream reader finished");
}

/// Producer half of an in-process frame channel
pub struct FrameSender {
    frames: mpsc::Sender<Result<Frame>>,
    state: watch::Sender<StreamingState>,
    stop: Arc<AtomicBool>,
}

impl FrameSender {
    /// Deliver a frame; false once the subscriber is gone
    pub fn send(&self, frame: Frame) -> bool {
        self.frames.blocking_send(Ok(frame)).is_ok()
    }

    /// Deliver the terminal error
    pub fn fail(&self, error: Error) {
        let _ = self.frames.blocking_send(Err(error));
    }

    /// Publish a state transition
    pub fn set_state(&self, state: StreamingState) {
        let _ = self.state.send(state);
    }

    /// Whether the subscriber asked the producer to stop
    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Detached cancellation handle for a subscription
#[derive(Clone)]
pub struct CancelHandle {
    stop: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request the producer to stop. Idempotent.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Consumer handle over a running stream.
///
/// Frames arrive in extraction order; a terminal error is delivered at
/// most once, after which the channel closes. Dropping the subscription
/// cancels the producer.
pub struct Subscription {
    frames: mpsc::Receiver<Result<Frame>>,
    state: watch::Receiver<StreamingState>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Subscription {
    /// Build a subscription backed by an in-process channel instead of an
    /// HTTP connection, for alternate frame producers and tests.
    pub fn in_process(capacity: usize) -> (FrameSender, Subscription) {
        let (frames_tx, frames_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(StreamingState::Connecting);
        let stop = Arc::new(AtomicBool::new(false));
        (
            FrameSender {
                frames: frames_tx,
                state: state_tx,
                stop: stop.clone(),
            },
            Subscription {
                frames: frames_rx,
                state: state_rx,
                stop,
                handle: None,
            },
        )
    }

    /// Block until the next frame, a terminal error, or channel close
    pub fn recv(&mut self) -> Option<Result<Frame>> {
        self.frames.blocking_recv()
    }

    /// Current session state
    pub fn state(&self) -> StreamingState {
        self.state.borrow().clone()
    }

    /// Watch handle for observing state transitions
    pub fn state_watch(&self) -> watch::Receiver<StreamingState> {
        self.state.clone()
    }

    /// Cancellation handle usable from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            stop: self.stop.clone(),
        }
    }

    /// Stop the stream and release the connection.
    ///
    /// Safe to call at any time and more than once; an in-progress
    /// blocking read unblocks within the configured read timeout.
    pub fn cancel(&mut self) {
        self.stop.store(true, Ordering::Release);
        // wake a producer blocked on a full channel
        self.frames.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("stream reader thread panicked");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Pull the boundary token out of a multipart content-type header
fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let lower = content_type.to_ascii_lowercase();
    if !lower.starts_with("multipart/") {
        return Err(Error::Protocol(format!(
            "expected a multipart content type, got \"{}\"",
            content_type
        )));
    }
    let idx = lower
        .find("boundary=")
        .ok_or_else(|| Error::Protocol("content type carries no boundary parameter".into()))?;
    let raw = &content_type[idx + "boundary=".len()..];
    let token = raw
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches('"');
    if token.is_empty() {
        return Err(Error::Protocol("empty boundary parameter".into()));
    }
    Ok(token.to_string())
}
