//! Availability coordinator: sequences background checks and guards submission.
//!
//! Every dispatched check gets the next sequence number. A check for the
//! current input becomes the single active request; a later dispatch or any
//! edit supersedes it. A response is applied only if its request is still the
//! active one, compared and assigned under one lock, so a slow early response
//! can never overwrite a fresher one. Checks for any other name never touch
//! the shared state. In-flight requests are not aborted at the transport
//! level; their results are simply dropped.
//!
//! [`Coordinator::submit`] never trusts the background state. It performs its
//! own undebounced re-check and registers only if that re-check says the name
//! is available.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::check::{AvailabilityService, Client};
use crate::config::Config;
use crate::debounce::Debouncer;
use crate::error::ConfigError;

/// The text currently typed into the input.
pub type CandidateName = String;

/// A dispatched availability query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    /// Monotonically increasing; higher supersedes lower.
    pub seq: u64,
    /// The name the query was issued for.
    pub name: CandidateName,
}

/// Latest known availability of the current name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AvailabilityState {
    /// Nothing to check (blank input) or never checked.
    #[default]
    Unknown,
    /// A check is scheduled or in flight.
    Pending,
    /// The most recent check said the name is free.
    Available,
    /// The most recent check said the name is in use.
    Taken,
    /// The most recent check failed; the name is not confirmed.
    CheckFailed,
}

impl fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Pending => write!(f, "pending"),
            Self::Available => write!(f, "available"),
            Self::Taken => write!(f, "taken"),
            Self::CheckFailed => write!(f, "check-failed"),
        }
    }
}

/// Why a submission ended without registering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The name was blank.
    Empty,
    /// The re-check found the name in use.
    Taken,
    /// The re-check failed, so availability could not be confirmed.
    CheckFailed,
    /// `register` failed; carries the server's message or the transport error.
    Server(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Taken => write!(f, "taken"),
            Self::CheckFailed => write!(f, "check-failed"),
            Self::Server(message) => write!(f, "{message}"),
        }
    }
}

/// Lifecycle of one submit attempt.
///
/// `Idle -> Verifying -> Submitting -> Succeeded`, with `Rejected` reachable
/// from either in-progress state. Any edit returns it to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SubmissionState {
    /// No submission, or the input changed since the last one.
    #[default]
    Idle,
    /// Running the race-closing re-check.
    Verifying,
    /// Re-check passed; the registration call is in flight.
    Submitting,
    /// The name was registered.
    Succeeded,
    /// The attempt ended without a registration.
    Rejected(RejectReason),
}

impl SubmissionState {
    /// Whether an attempt is currently running.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Verifying | Self::Submitting)
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Verifying => write!(f, "verifying"),
            Self::Submitting => write!(f, "submitting"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// What happened to the response of a [`Coordinator::perform_check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum CheckOutcome {
    /// The response was current and is now the availability state.
    Applied(AvailabilityState),
    /// A later check or edit superseded this one; the response was dropped.
    Stale,
}

/// Point-in-time copy of the coordinator's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current input text.
    pub name: CandidateName,
    /// Availability of `name` as far as the latest check knows.
    pub availability: AvailabilityState,
    /// State of the current submit attempt.
    pub submission: SubmissionState,
    /// Number of checks dispatched so far, which is also the sequence number
    /// of the most recent [`CheckRequest`].
    pub dispatched: u64,
    /// Sequence number of the request still allowed to update `availability`.
    pub active: Option<u64>,
    /// Round-trip time of the last applied check. Display only.
    pub last_latency: Option<Duration>,
}

impl Snapshot {
    /// Whether a UI should enable its submit control.
    ///
    /// Advisory only: [`Coordinator::submit`] re-checks regardless.
    #[must_use]
    pub fn can_submit(&self) -> bool {
        !is_blank(&self.name)
            && self.availability == AvailabilityState::Available
            && !self.submission.is_in_progress()
    }
}

struct State {
    name: CandidateName,
    availability: AvailabilityState,
    submission: SubmissionState,
    dispatched: u64,
    active: Option<u64>,
    attempt: u64,
    last_latency: Option<Duration>,
    subscribers: Vec<Sender<Snapshot>>,
}

impl State {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            name: self.name.clone(),
            availability: self.availability,
            submission: self.submission.clone(),
            dispatched: self.dispatched,
            active: self.active,
            last_latency: self.last_latency,
        }
    }

    /// Deliver the current state to every live subscriber, in mutation order.
    fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        self.subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    Debounced,
    Direct,
}

struct Resolved {
    request: CheckRequest,
    availability: AvailabilityState,
    applied: bool,
}

struct Inner<S> {
    service: S,
    state: Mutex<State>,
}

impl<S: AvailabilityService> Inner<S> {
    fn check(&self, name: &str, origin: Origin) -> Option<Resolved> {
        let request = {
            let mut state = self.state.lock();
            let current = state.name == name;
            // A debounced check that lost a race with a newer edit is skipped.
            if origin == Origin::Debounced && !current {
                debug!(name, current = %state.name, "skipping superseded debounced check");
                return None;
            }
            state.dispatched += 1;
            let request = CheckRequest {
                seq: state.dispatched,
                name: name.to_string(),
            };
            if current {
                state.active = Some(request.seq);
                state.availability = AvailabilityState::Pending;
                state.publish();
            }
            request
        };

        let started = Instant::now();
        let result = self.service.check_username(&request.name);
        let latency = started.elapsed();

        let availability = match result {
            Ok(true) => AvailabilityState::Available,
            Ok(false) => AvailabilityState::Taken,
            Err(ref e) => {
                warn!(seq = request.seq, name = %request.name, error = %e, "availability check failed");
                AvailabilityState::CheckFailed
            }
        };

        let mut state = self.state.lock();
        if state.active != Some(request.seq) {
            debug!(
                seq = request.seq,
                active = ?state.active,
                name = %request.name,
                "discarding stale check response"
            );
            return Some(Resolved {
                request,
                availability,
                applied: false,
            });
        }
        debug!(
            seq = request.seq,
            name = %request.name,
            %availability,
            latency_ms = latency.as_millis() as u64,
            "applied check response"
        );
        state.active = None;
        state.availability = availability;
        state.last_latency = Some(latency);
        state.publish();
        Some(Resolved {
            request,
            availability,
            applied: true,
        })
    }
}

/// Turns input edits into sequenced availability checks and guards submission.
///
/// All methods take `&self` and may be called from any thread. None of them
/// blocks on the network except [`perform_check`](Self::perform_check) and
/// [`submit`](Self::submit), which wait for their own requests.
///
/// # Example
///
/// ```no_run
/// use username_avail::config::Config;
/// use username_avail::coordinator::{Coordinator, SubmissionState};
///
/// let coordinator = Coordinator::new(Config::new("http://localhost:8080"))?;
/// coordinator.on_input_changed("alice");
/// // ... UI renders coordinator.snapshot() as checks land ...
/// match coordinator.submit("alice") {
///     SubmissionState::Succeeded => println!("registered"),
///     other => println!("{other}"),
/// }
/// # Ok::<(), username_avail::error::ConfigError>(())
/// ```
pub struct Coordinator<S: AvailabilityService = Client> {
    inner: Arc<Inner<S>>,
    debouncer: Debouncer<CandidateName>,
    debounce: Duration,
}

impl<S: AvailabilityService> fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.snapshot())
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl Coordinator<Client> {
    /// Build a coordinator talking HTTP to `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if the base address is not an
    /// absolute `http`/`https` URL.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_service(Client::new(&config), config.debounce()))
    }
}

impl<S: AvailabilityService> Coordinator<S> {
    /// Build a coordinator over any [`AvailabilityService`].
    pub fn with_service(service: S, debounce: Duration) -> Self {
        let inner = Arc::new(Inner {
            service,
            state: Mutex::new(State {
                name: CandidateName::new(),
                availability: AvailabilityState::Unknown,
                submission: SubmissionState::Idle,
                dispatched: 0,
                active: None,
                attempt: 0,
                last_latency: None,
                subscribers: Vec::new(),
            }),
        });
        let weak = Arc::downgrade(&inner);
        let debouncer = Debouncer::new(move |name: CandidateName| dispatch(&weak, name));
        Self {
            inner,
            debouncer,
            debounce,
        }
    }

    /// Record an edit. Always returns immediately.
    ///
    /// Invalidates every in-flight check and resets a finished or running
    /// submission to `Idle`. A blank name goes straight to `Unknown` with no
    /// network call; anything else goes to `Pending` and a check is
    /// scheduled once typing pauses.
    pub fn on_input_changed(&self, name: impl Into<CandidateName>) {
        let name = name.into();
        let mut state = self.inner.state.lock();
        state.active = None;
        if state.submission != SubmissionState::Idle {
            debug!(previous = %state.submission, "edit resets submission");
            state.attempt += 1;
            state.submission = SubmissionState::Idle;
        }
        if is_blank(&name) {
            state.availability = AvailabilityState::Unknown;
            self.debouncer.cancel();
        } else {
            state.availability = AvailabilityState::Pending;
            self.debouncer.schedule(name.clone(), self.debounce);
        }
        state.name = name;
        state.publish();
    }

    /// Check `name` now, bypassing the debouncer, and wait for the answer.
    ///
    /// The response updates the availability state only if `name` is the
    /// current input and no later check or edit happened meanwhile; a check
    /// for any other name always comes back [`CheckOutcome::Stale`]. Failures become
    /// [`AvailabilityState::CheckFailed`]; they are logged, never returned.
    pub fn perform_check(&self, name: &str) -> CheckOutcome {
        match self.inner.check(name, Origin::Direct) {
            Some(Resolved {
                availability,
                applied: true,
                ..
            }) => CheckOutcome::Applied(availability),
            _ => CheckOutcome::Stale,
        }
    }

    /// Re-check `name` and register it if, and only if, it is available now.
    ///
    /// Returns the resulting [`SubmissionState`]. A call made while another
    /// attempt is verifying or submitting is ignored and returns that
    /// attempt's state. If the input is edited while this attempt runs, the
    /// attempt is abandoned: `register` is not called after the edit and the
    /// state stays `Idle`.
    pub fn submit(&self, name: &str) -> SubmissionState {
        let attempt = {
            let mut state = self.inner.state.lock();
            if state.submission.is_in_progress() {
                debug!(name, submission = %state.submission, "submit ignored while in progress");
                return state.submission.clone();
            }
            if is_blank(name) {
                state.submission = SubmissionState::Rejected(RejectReason::Empty);
                state.publish();
                return state.submission.clone();
            }
            state.attempt += 1;
            state.submission = SubmissionState::Verifying;
            state.publish();
            state.attempt
        };

        let recheck = self.inner.check(name, Origin::Direct);

        let mut state = self.inner.state.lock();
        if state.attempt != attempt {
            debug!(name, "submission superseded by edit during re-check");
            return state.submission.clone();
        }
        let availability = recheck.map_or(AvailabilityState::CheckFailed, |r| {
            if !r.applied {
                debug!(seq = r.request.seq, "re-check not shown; using its own answer");
            }
            r.availability
        });
        let next = match availability {
            AvailabilityState::Available => SubmissionState::Submitting,
            AvailabilityState::Taken => SubmissionState::Rejected(RejectReason::Taken),
            _ => SubmissionState::Rejected(RejectReason::CheckFailed),
        };
        state.submission = next;
        state.publish();
        if state.submission != SubmissionState::Submitting {
            info!(name, submission = %state.submission, "submission rejected by re-check");
            return state.submission.clone();
        }
        drop(state);

        let outcome = match self.inner.service.register(name) {
            Ok(()) => {
                info!(name, "registered");
                SubmissionState::Succeeded
            }
            Err(e) => {
                warn!(name, error = %e, "registration failed");
                SubmissionState::Rejected(RejectReason::Server(e.to_string()))
            }
        };

        let mut state = self.inner.state.lock();
        if state.attempt != attempt {
            debug!(name, result = %outcome, "input edited during registration");
            return outcome;
        }
        state.submission = outcome;
        state.publish();
        state.submission.clone()
    }

    /// Whether a UI should enable its submit control.
    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.inner.state.lock().snapshot().can_submit()
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.lock().snapshot()
    }

    /// Current availability state.
    #[must_use]
    pub fn availability(&self) -> AvailabilityState {
        self.inner.state.lock().availability
    }

    /// Current submission state.
    #[must_use]
    pub fn submission(&self) -> SubmissionState {
        self.inner.state.lock().submission.clone()
    }

    /// Current input text.
    #[must_use]
    pub fn name(&self) -> CandidateName {
        self.inner.state.lock().name.clone()
    }

    /// Receive a [`Snapshot`] after every state change, in mutation order.
    ///
    /// The channel is unbounded: a receiver that is kept alive but never
    /// drained accumulates one snapshot per change. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel();
        self.inner.state.lock().subscribers.push(tx);
        rx
    }

    /// The service this coordinator talks to.
    #[must_use]
    pub fn service(&self) -> &S {
        &self.inner.service
    }
}

/// Debouncer callback: run the check off the debouncer thread.
fn dispatch<S: AvailabilityService>(inner: &Weak<Inner<S>>, name: CandidateName) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let worker = Arc::clone(&inner);
    let task = name.clone();
    let spawned = thread::Builder::new()
        .name("availability-check".into())
        .spawn(move || {
            let _ = worker.check(&task, Origin::Debounced);
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn check thread; checking inline");
        let _ = inner.check(&name, Origin::Debounced);
    }
}

fn is_blank(name: &str) -> bool {
    name.trim().is_empty()
}
