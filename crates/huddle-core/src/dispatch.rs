//! Single-task event loop around a [`Roster`].
//!
//! Inputs are queued on an mpsc channel and applied strictly one at a time,
//! interleaved with the raised-hand expiry timer and the sounding tick.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::errors::RosterError;
use crate::events::RosterInput;
use crate::roster::{Roster, RosterSnapshot};

const QUEUE_CAPACITY: usize = 256;

/// Far enough out that a disabled sleep branch never matters.
const IDLE_SLEEP: Duration = Duration::from_secs(86_400);

enum RosterCommand {
    Input(RosterInput),
    Snapshot {
        respond_to: oneshot::Sender<RosterSnapshot>,
    },
    Shutdown,
}

/// Cloneable sender side of a running roster task.
#[derive(Clone)]
pub struct RosterHandle {
    sender: mpsc::Sender<RosterCommand>,
}

impl RosterHandle {
    /// Queue an input. Inputs are applied in the order they were sent.
    pub async fn send(&self, input: RosterInput) -> Result<(), RosterError> {
        self.sender
            .send(RosterCommand::Input(input))
            .await
            .map_err(|_| RosterError::DispatcherClosed)
    }

    /// Snapshot taken after every input queued before this call.
    pub async fn snapshot(&self) -> Result<RosterSnapshot, RosterError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RosterCommand::Snapshot { respond_to })
            .await
            .map_err(|_| RosterError::DispatcherClosed)?;
        response.await.map_err(|_| RosterError::ReplyDropped)
    }

    /// Ask the task to stop after the inputs already queued.
    pub async fn shutdown(&self) -> Result<(), RosterError> {
        self.sender
            .send(RosterCommand::Shutdown)
            .await
            .map_err(|_| RosterError::DispatcherClosed)
    }
}

/// Move `roster` onto its own task. The task hands the roster back when it
/// stops, either on [`RosterHandle::shutdown`] or once every handle is gone.
pub fn spawn(roster: Roster) -> (RosterHandle, JoinHandle<Roster>) {
    let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
    let task = tokio::spawn(run(roster, receiver));
    (RosterHandle { sender }, task)
}

async fn run(mut roster: Roster, mut receiver: mpsc::Receiver<RosterCommand>) -> Roster {
    let mut ticker = time::interval(roster.settings().sounding_tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!("roster dispatcher started");

    loop {
        let expiry = roster.next_expiry();
        let sleep_until = expiry.unwrap_or_else(|| Instant::now() + IDLE_SLEEP);
        let sounding = roster.sounding_active();

        tokio::select! {
            command = receiver.recv() => {
                match command {
                    Some(RosterCommand::Input(input)) => {
                        let was_sounding = roster.sounding_active();
                        roster.handle_input(input, Instant::now());
                        if !was_sounding && roster.sounding_active() {
                            ticker.reset();
                        }
                    }
                    Some(RosterCommand::Snapshot { respond_to }) => {
                        if respond_to.send(roster.snapshot()).is_err() {
                            tracing::debug!("snapshot requester went away");
                        }
                    }
                    Some(RosterCommand::Shutdown) | None => break,
                }
            }
            _ = time::sleep_until(sleep_until), if expiry.is_some() => {
                roster.fire_raised_hand_expiry(Instant::now());
            }
            _ = ticker.tick(), if sounding => {
                roster.tick_sounding(Instant::now());
            }
        }
    }

    tracing::info!("roster dispatcher stopped");
    roster
}
