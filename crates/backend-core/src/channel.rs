//! Command queue into the feed runtime and event fan-out back out of it.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::types::{FeedCommand, FeedEvent};

/// Receiver half held by each event consumer.
pub type EventStream = broadcast::Receiver<FeedEvent>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedChannelError {
    /// The runtime task exited and dropped its command receiver.
    #[error("feed runtime is not running; '{command}' was not delivered")]
    RuntimeStopped { command: &'static str },
}

/// Sending side of the runtime: bounded commands in, broadcast events out.
#[derive(Clone, Debug)]
pub struct FeedChannels {
    commands: mpsc::Sender<FeedCommand>,
    events: broadcast::Sender<FeedEvent>,
}

impl FeedChannels {
    /// The runtime keeps the returned receiver; capacities below one are raised to one.
    pub fn new(
        command_capacity: usize,
        event_capacity: usize,
    ) -> (Self, mpsc::Receiver<FeedCommand>) {
        let (commands, receiver) = mpsc::channel(command_capacity.max(1));
        let (events, _) = broadcast::channel(event_capacity.max(1));
        (Self { commands, events }, receiver)
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Queue a command, waiting while the queue is full.
    pub async fn send_command(&self, command: FeedCommand) -> Result<(), FeedChannelError> {
        let kind = command.kind();
        self.commands
            .send(command)
            .await
            .map_err(|_| FeedChannelError::RuntimeStopped { command: kind })
    }

    /// Publish an event and return how many subscribers it reached.
    pub fn emit(&self, event: FeedEvent) -> usize {
        match self.events.send(event) {
            Ok(reached) => reached,
            Err(_) => {
                trace!("feed event dropped; nobody is subscribed");
                0
            }
        }
    }
}
