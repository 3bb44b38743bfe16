//! [`ConnectionState`]: the shared connection state machine.
//!
//! ```text
//!   ConnectNeeded ──(first waiter)──▶ Connecting ──did_connect──▶ Connected
//!        ▲                                                            │
//!        │                                               should_reconnect
//!        │                                                            ▼
//!        └───────────────── reattempt_connection ─────────────── BackoffPause
//!
//!   any state ──shut_down_forever──▶ StoppedForever   (terminal)
//! ```
//!
//! Every transition is a compare-and-set on a `tokio::sync::watch` value,
//! so concurrent callers never both win the same transition. Waiters are
//! woken by the watch change and also re-check on a fixed poll interval.

use std::time::Duration;

// ---

use tokio::sync::watch;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    // ---
    /// No connection and nobody is attempting one.
    ConnectNeeded,

    /// Exactly one caller is establishing the connection.
    Connecting,

    Connected,

    /// Waiting out a reconnect delay after a stream error.
    BackoffPause,

    /// Terminal.
    StoppedForever,
}

// ---

/// Outcome of [`ConnectionState::block_on_connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockResult {
    // ---
    AlreadyConnected,

    /// This caller won the right to connect and must call
    /// [`ConnectionState::did_connect`] once it has.
    MustAttemptConnection,

    /// The uplink has stopped; never attempt again.
    GoAwayForever,
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

pub struct ConnectionState {
    // ---
    tx: watch::Sender<State>,
    poll: Duration,
}

// ---

impl ConnectionState {
    // ---
    pub fn new(poll: Duration) -> Self {
        // ---
        let (tx, _rx) = watch::channel(State::ConnectNeeded);
        Self { tx, poll }
    }

    // ---

    pub fn current(&self) -> State {
        *self.tx.borrow()
    }

    // ---

    /// Wait until the uplink is connected, this caller has been chosen to
    /// connect, or the uplink has stopped forever.
    pub async fn block_on_connection(&self) -> BlockResult {
        // ---
        let mut rx = self.tx.subscribe();

        loop {
            // Mark the current value seen before inspecting it so a change
            // made after the check still wakes us.
            let _ = rx.borrow_and_update();

            let mut outcome = None;
            self.tx.send_if_modified(|state| match *state {
                State::Connected => {
                    outcome = Some(BlockResult::AlreadyConnected);
                    false
                }
                State::StoppedForever => {
                    outcome = Some(BlockResult::GoAwayForever);
                    false
                }
                State::ConnectNeeded => {
                    *state = State::Connecting;
                    outcome = Some(BlockResult::MustAttemptConnection);
                    true
                }
                State::Connecting | State::BackoffPause => false,
            });

            if let Some(outcome) = outcome {
                return outcome;
            }

            // Elapsed or sender dropped: either way re-check the state.
            let _ = tokio::time::timeout(self.poll, rx.changed()).await;
        }
    }

    // ---

    /// Record a successful connect. No-op once stopped forever.
    pub fn did_connect(&self) {
        // ---
        self.tx.send_if_modified(|state| {
            if *state == State::StoppedForever {
                return false;
            }
            *state = State::Connected;
            true
        });
    }

    // ---

    /// Claim the reconnect after a stream error. Returns `true` for exactly
    /// one caller per `Connected` period; the state becomes `BackoffPause`.
    pub fn should_reconnect(&self) -> bool {
        // ---
        self.tx.send_if_modified(|state| {
            if *state != State::Connected {
                return false;
            }
            *state = State::BackoffPause;
            true
        })
    }

    // ---

    /// Allow the next waiter to connect. No-op once stopped forever.
    pub fn reattempt_connection(&self) {
        // ---
        self.tx.send_if_modified(|state| {
            if *state == State::StoppedForever {
                return false;
            }
            let changed = *state != State::ConnectNeeded;
            *state = State::ConnectNeeded;
            changed
        });
    }

    // ---

    /// Enter the terminal state and wake every waiter.
    pub fn shut_down_forever(&self) {
        // ---
        let previous = self.tx.send_replace(State::StoppedForever);
        if previous != State::StoppedForever {
            tracing::info!("connection state {previous:?} → StoppedForever");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
