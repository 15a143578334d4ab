//! Single-threaded readiness reactor.
//!
//! The reactor multiplexes descriptor readiness onto frame callbacks. It runs
//! on a tokio current-thread runtime and uses [`AsyncFd`] only for
//! registration; the descriptors stay owned by the link socket.
//!
//! Each iteration waits until at least one watcher is ready, then calls every
//! ready watcher's callback once. A watcher is ready when tokio reports a new
//! readiness edge, or when a re-probe of the descriptor level after its last
//! callback found more work. A paused watcher is skipped until its delay has
//! elapsed. The stop signal is checked between iterations only.

use std::future::{Future, poll_fn};
use std::io::{self, Error, ErrorKind};
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use libc::c_short;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;
use tokio::time::Sleep;
use tracing::{debug, error, warn};

use crate::error::{LinkError, Result};

/// Readiness a watcher waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Data to receive
    Readable,
    /// Room to send
    Writable,
}

impl Readiness {
    fn interest(self) -> Interest {
        match self {
            Readiness::Readable => Interest::READABLE,
            Readiness::Writable => Interest::WRITABLE,
        }
    }

    fn poll_events(self) -> c_short {
        match self {
            Readiness::Readable => libc::POLLIN,
            Readiness::Writable => libc::POLLOUT,
        }
    }
}

/// What a callback did with its readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// One frame of I/O done; the descriptor level is probed again
    Handled,
    /// Nothing to do; wait for the next readiness edge
    Idle,
    /// Do not dispatch again before the delay has elapsed
    Pause(Duration),
}

/// Frame-level work bound to one descriptor.
pub trait Callback {
    /// Handle one readiness event.
    ///
    /// # Errors
    ///
    /// Errors for which [`LinkError::is_resource`] holds deregister the
    /// watcher; any other error is logged and the watcher stays.
    fn on_ready(&mut self) -> Result<Dispatch>;

    /// Scheduling after `on_ready` failed with a frame-level error.
    fn after_error(&self) -> Dispatch {
        Dispatch::Handled
    }
}

/// Zero-timeout `poll(2)` of the descriptor level.
fn probe(fd: RawFd, readiness: Readiness) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: readiness.poll_events(),
        revents: 0,
    };

    // SAFETY: poll is a standard POSIX syscall; `pfd` is one valid pollfd
    // and the zero timeout makes it return immediately.
    match unsafe { libc::poll(&mut pfd, 1, 0) } {
        ..=-1 => {
            let err = Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                // Let the callback find out
                return Ok(true);
            }
            Err(err)
        }
        _ if pfd.revents & libc::POLLNVAL != 0 => Err(Error::from_raw_os_error(libc::EBADF)),
        // POLLERR and POLLHUP count as ready so the callback surfaces the error
        _ => Ok(pfd.revents != 0),
    }
}

/// A descriptor registration and its callback.
pub struct Watcher<'a> {
    label: &'static str,
    fd: AsyncFd<RawFd>,
    readiness: Readiness,
    callback: Box<dyn Callback + 'a>,
    armed: bool,
    resume: Option<Pin<Box<Sleep>>>,
    _borrow: PhantomData<BorrowedFd<'a>>,
}

impl<'a> Watcher<'a> {
    /// Register `fd` for `readiness` with the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `Resource` if the runtime refuses the registration.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime with I/O enabled.
    pub fn new(
        label: &'static str,
        fd: BorrowedFd<'a>,
        readiness: Readiness,
        callback: Box<dyn Callback + 'a>,
    ) -> Result<Self> {
        let fd = AsyncFd::with_interest(fd.as_raw_fd(), readiness.interest())
            .map_err(|e| LinkError::Resource { op: "reactor registration", source: e })?;
        debug!(watcher = label, fd = *fd.get_ref(), ?readiness, "registered watcher");
        Ok(Self {
            label,
            fd,
            readiness,
            callback,
            armed: false,
            resume: None,
            _borrow: PhantomData,
        })
    }

    /// Label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Watched descriptor.
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        *self.fd.get_ref()
    }

    /// Readiness the watcher waits for.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(sleep) = self.resume.as_mut() {
            ready!(sleep.as_mut().poll(cx));
            self.resume = None;
            match probe(self.raw_fd(), self.readiness) {
                Ok(level) => self.armed = level,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
        if self.armed {
            return Poll::Ready(Ok(()));
        }
        match self.readiness {
            Readiness::Readable => self.fd.poll_read_ready(cx).map_ok(|mut guard| guard.clear_ready()),
            Readiness::Writable => self.fd.poll_write_ready(cx).map_ok(|mut guard| guard.clear_ready()),
        }
    }

    fn schedule(&mut self, next: Dispatch) {
        match next {
            Dispatch::Handled => {
                let label = self.label;
                self.armed = probe(self.raw_fd(), self.readiness).unwrap_or_else(|e| {
                    warn!(watcher = label, error = %e, "level probe failed");
                    true
                });
            }
            Dispatch::Idle => self.armed = false,
            Dispatch::Pause(delay) => {
                self.armed = false;
                self.resume = Some(Box::pin(tokio::time::sleep(delay)));
            }
        }
    }
}

impl std::fmt::Debug for Watcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("label", &self.label)
            .field("fd", &self.raw_fd())
            .field("readiness", &self.readiness)
            .field("armed", &self.armed)
            .field("paused", &self.resume.is_some())
            .finish()
    }
}

/// Counters from one [`Reactor::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactorStats {
    /// Wake-ups with at least one ready watcher
    pub iterations: u64,
    /// Callback invocations
    pub dispatched: u64,
    /// Callbacks that moved a frame and asked for a level re-probe
    pub handled: u64,
    /// Callbacks that found nothing to do
    pub idle: u64,
    /// Callbacks that moved a frame and paused
    pub paused: u64,
    /// Frame-level failures
    pub frame_errors: u64,
    /// Watchers removed after a resource failure
    pub deregistered: u64,
}

impl ReactorStats {
    fn record(&mut self, outcome: Dispatch) {
        match outcome {
            Dispatch::Handled => self.handled += 1,
            Dispatch::Idle => self.idle += 1,
            Dispatch::Pause(_) => self.paused += 1,
        }
    }
}

/// Requests a running reactor to stop.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    /// Ask the reactor to stop after the current iteration.
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Observed by the reactor between iterations.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once a stop is requested. Never resolves if every handle is
    /// dropped without stopping.
    pub async fn stopped(&mut self) {
        if self.0.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a connected stop handle and signal.
#[must_use]
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(Arc::new(tx)), StopSignal(rx))
}

/// The event loop.
#[derive(Debug, Default)]
pub struct Reactor<'a> {
    watchers: Vec<Watcher<'a>>,
}

impl<'a> Reactor<'a> {
    /// Empty reactor.
    #[must_use]
    pub fn new() -> Self {
        Self { watchers: Vec::new() }
    }

    /// Add a watcher. A descriptor may be watched once.
    ///
    /// # Errors
    ///
    /// `Configuration` if the descriptor already has a watcher.
    pub fn register(&mut self, watcher: Watcher<'a>) -> Result<()> {
        if self.watchers.iter().any(|w| w.raw_fd() == watcher.raw_fd()) {
            return Err(LinkError::Configuration(format!(
                "descriptor {} is already watched",
                watcher.raw_fd()
            )));
        }
        self.watchers.push(watcher);
        Ok(())
    }

    /// Registered watchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Whether no watcher is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    async fn wait(&mut self) -> Vec<(usize, io::Result<()>)> {
        let watchers = &mut self.watchers;
        poll_fn(|cx| {
            let ready: Vec<_> = watchers
                .iter_mut()
                .enumerate()
                .filter_map(|(index, watcher)| match watcher.poll_ready(cx) {
                    Poll::Ready(result) => Some((index, result)),
                    Poll::Pending => None,
                })
                .collect();
            if ready.is_empty() { Poll::Pending } else { Poll::Ready(ready) }
        })
        .await
    }

    /// Dispatch readiness until `stop` fires or no watcher is left.
    ///
    /// The run can be resumed after it returns on a stop or after its future
    /// is dropped at a wait.
    ///
    /// # Errors
    ///
    /// The resource error that removed the last watcher.
    pub async fn run(&mut self, stop: &mut StopSignal) -> Result<ReactorStats> {
        let mut stats = ReactorStats::default();
        let mut last_failure = None;

        loop {
            if stop.is_stopped() {
                debug!("stop requested");
                break;
            }
            if self.watchers.is_empty() {
                if let Some(err) = last_failure {
                    debug!(?stats, "no watchers left");
                    return Err(err);
                }
                break;
            }

            let ready = tokio::select! {
                biased;
                () = stop.stopped() => {
                    debug!("stop requested");
                    break;
                }
                ready = self.wait() => ready,
            };
            stats.iterations += 1;

            let mut failed = Vec::new();
            for (index, readiness) in ready {
                let watcher = &mut self.watchers[index];
                if let Err(e) = readiness {
                    error!(watcher = watcher.label, fd = watcher.raw_fd(), error = %e, "descriptor failed");
                    failed.push((index, LinkError::Resource { op: "readiness wait", source: e }));
                    continue;
                }

                stats.dispatched += 1;
                match watcher.callback.on_ready() {
                    Ok(outcome) => {
                        stats.record(outcome);
                        watcher.schedule(outcome);
                    }
                    Err(e) if e.is_resource() => {
                        error!(watcher = watcher.label, fd = watcher.raw_fd(), error = %e, "watcher unusable");
                        failed.push((index, e));
                    }
                    Err(e) => {
                        stats.frame_errors += 1;
                        warn!(watcher = watcher.label, error = %e, "frame failed");
                        let next = watcher.callback.after_error();
                        watcher.schedule(next);
                    }
                }
            }

            // Indices are ascending; remove from the back
            for (index, err) in failed.into_iter().rev() {
                let watcher = self.watchers.remove(index);
                warn!(watcher = watcher.label, fd = watcher.raw_fd(), "deregistered watcher");
                stats.deregistered += 1;
                last_failure = Some(err);
            }
        }

        debug!(?stats, "reactor stopped");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::os::fd::AsFd;
    use std::os::unix::net::{UnixDatagram, UnixStream};
    use std::rc::Rc;
    use tokio::time::timeout;

    /// Reads one datagram per call and counts invocations.
    struct Drain<'s> {
        socket: &'s UnixDatagram,
        calls: Rc<Cell<usize>>,
    }

    impl Callback for Drain<'_> {
        fn on_ready(&mut self) -> Result<Dispatch> {
            self.calls.set(self.calls.get() + 1);
            let mut buf = [0u8; 64];
            match self.socket.recv(&mut buf) {
                Ok(_) => Ok(Dispatch::Handled),
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Dispatch::Idle),
                Err(e) => Err(LinkError::transport("recv", e)),
            }
        }
    }

    fn pair() -> (UnixDatagram, UnixDatagram) {
        let (a, b) = UnixDatagram::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_no_event_no_callback_then_exactly_one() {
        let (rx, tx) = pair();
        let calls = Rc::new(Cell::new(0));
        let mut reactor = Reactor::new();
        reactor
            .register(
                Watcher::new(
                    "rx",
                    rx.as_fd(),
                    Readiness::Readable,
                    Box::new(Drain { socket: &rx, calls: calls.clone() }),
                )
                .unwrap(),
            )
            .unwrap();
        let (_handle, mut signal) = stop_channel();

        let idle = timeout(Duration::from_millis(50), reactor.run(&mut signal)).await;
        assert!(idle.is_err(), "run must keep waiting");
        assert_eq!(calls.get(), 0);

        tx.send(b"frame").unwrap();
        let _ = timeout(Duration::from_millis(100), reactor.run(&mut signal)).await;
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_pending_data_is_drained_one_callback_per_datagram() {
        let (rx, tx) = pair();
        for _ in 0..3 {
            tx.send(b"frame").unwrap();
        }
        let calls = Rc::new(Cell::new(0));
        let mut reactor = Reactor::new();
        reactor
            .register(
                Watcher::new(
                    "rx",
                    rx.as_fd(),
                    Readiness::Readable,
                    Box::new(Drain { socket: &rx, calls: calls.clone() }),
                )
                .unwrap(),
            )
            .unwrap();
        let (_handle, mut signal) = stop_channel();

        let _ = timeout(Duration::from_millis(100), reactor.run(&mut signal)).await;
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_stop_before_run_returns_immediately() {
        let (rx, tx) = pair();
        tx.send(b"frame").unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut reactor = Reactor::new();
        reactor
            .register(
                Watcher::new(
                    "rx",
                    rx.as_fd(),
                    Readiness::Readable,
                    Box::new(Drain { socket: &rx, calls: calls.clone() }),
                )
                .unwrap(),
            )
            .unwrap();
        let (handle, mut signal) = stop_channel();
        handle.stop();

        let stats = reactor.run(&mut signal).await.unwrap();
        assert_eq!(stats, ReactorStats::default());
        assert_eq!(calls.get(), 0);
    }

    /// Writable callback pacing itself with a pause.
    struct Ticker {
        calls: Rc<Cell<usize>>,
        delay: Duration,
        stop_after: usize,
        handle: StopHandle,
    }

    impl Callback for Ticker {
        fn on_ready(&mut self) -> Result<Dispatch> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() == self.stop_after {
                self.handle.stop();
            }
            Ok(Dispatch::Pause(self.delay))
        }
    }

    #[tokio::test]
    async fn test_pause_paces_writable_watcher() {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let calls = Rc::new(Cell::new(0));
        let (handle, mut signal) = stop_channel();
        let mut reactor = Reactor::new();
        reactor
            .register(
                Watcher::new(
                    "tx",
                    a.as_fd(),
                    Readiness::Writable,
                    Box::new(Ticker {
                        calls: calls.clone(),
                        delay: Duration::from_millis(20),
                        stop_after: 3,
                        handle,
                    }),
                )
                .unwrap(),
            )
            .unwrap();

        let started = tokio::time::Instant::now();
        let stats = reactor.run(&mut signal).await.unwrap();
        // Two full pauses separate the three callbacks
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(calls.get(), 3);
        assert_eq!(stats.paused, 3);
        assert_eq!(stats.dispatched, 3);
    }

    /// Fails every call with the given error kind.
    struct Failing {
        resource: bool,
        calls: Rc<Cell<usize>>,
        handle: StopHandle,
    }

    impl Callback for Failing {
        fn on_ready(&mut self) -> Result<Dispatch> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() == 3 {
                self.handle.stop();
            }
            if self.resource {
                Err(LinkError::ResourceUnavailable("ring unusable".into()))
            } else {
                Err(LinkError::ShortSend { written: 4, requested: 24 })
            }
        }

        fn after_error(&self) -> Dispatch {
            Dispatch::Pause(Duration::from_millis(1))
        }
    }

    #[tokio::test]
    async fn test_frame_error_keeps_watcher() {
        let (a, _b) = UnixStream::pair().unwrap();
        let calls = Rc::new(Cell::new(0));
        let (handle, mut signal) = stop_channel();
        let mut reactor = Reactor::new();
        reactor
            .register(
                Watcher::new(
                    "tx",
                    a.as_fd(),
                    Readiness::Writable,
                    Box::new(Failing { resource: false, calls: calls.clone(), handle }),
                )
                .unwrap(),
            )
            .unwrap();

        let stats = reactor.run(&mut signal).await.unwrap();
        assert_eq!(stats.frame_errors, 3);
        assert_eq!(stats.deregistered, 0);
        assert_eq!(reactor.len(), 1);
    }

    #[tokio::test]
    async fn test_resource_error_deregisters() {
        let (a, _b) = UnixStream::pair().unwrap();
        let calls = Rc::new(Cell::new(0));
        let (handle, mut signal) = stop_channel();
        let mut reactor = Reactor::new();
        reactor
            .register(
                Watcher::new(
                    "tx",
                    a.as_fd(),
                    Readiness::Writable,
                    Box::new(Failing { resource: true, calls: calls.clone(), handle }),
                )
                .unwrap(),
            )
            .unwrap();

        let err = reactor.run(&mut signal).await.unwrap_err();
        assert!(matches!(err, LinkError::ResourceUnavailable(_)));
        assert_eq!(calls.get(), 1);
        assert!(reactor.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_descriptor_is_rejected() {
        let (rx, _tx) = pair();
        let calls = Rc::new(Cell::new(0));
        let mut reactor = Reactor::new();
        let first = Watcher::new(
            "rx",
            rx.as_fd(),
            Readiness::Readable,
            Box::new(Drain { socket: &rx, calls: calls.clone() }),
        )
        .unwrap();
        reactor.register(first).unwrap();

        // A second AsyncFd on the same descriptor is refused by epoll, or by
        // the reactor itself
        if let Ok(second) = Watcher::new(
            "rx-again",
            rx.as_fd(),
            Readiness::Readable,
            Box::new(Drain { socket: &rx, calls }),
        ) {
            assert!(matches!(reactor.register(second), Err(LinkError::Configuration(_))));
        }
        assert_eq!(reactor.len(), 1);
    }

    #[test]
    fn test_probe_levels() {
        let (rx, tx) = pair();
        assert!(!probe(rx.as_raw_fd(), Readiness::Readable).unwrap());
        assert!(probe(tx.as_raw_fd(), Readiness::Writable).unwrap());
        tx.send(b"x").unwrap();
        assert!(probe(rx.as_raw_fd(), Readiness::Readable).unwrap());
    }
}
