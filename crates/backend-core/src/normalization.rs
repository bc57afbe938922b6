use crate::{
    error::FeedError,
    types::{FeedEvent, MessageId, MutationAck, MutationKind},
};

/// Mutation success/failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Mutation succeeded for the given server message id.
    Success { message_id: MessageId },
    /// Mutation failed with feed error details.
    Failure { error: FeedError },
}

impl<T> From<Result<MessageId, T>> for MutationOutcome
where
    T: Into<FeedError>,
{
    fn from(result: Result<MessageId, T>) -> Self {
        match result {
            Ok(message_id) => Self::Success { message_id },
            Err(error) => Self::Failure {
                error: error.into(),
            },
        }
    }
}

/// Convert a mutation outcome to a stable `FeedEvent::MutationAck`.
pub fn normalize_mutation_outcome(
    client_txn_id: impl Into<String>,
    kind: MutationKind,
    outcome: MutationOutcome,
) -> FeedEvent {
    let client_txn_id = client_txn_id.into();
    match outcome {
        MutationOutcome::Success { message_id } => FeedEvent::MutationAck(MutationAck {
            client_txn_id,
            kind,
            message_id: Some(message_id),
            error: None,
        }),
        MutationOutcome::Failure { error } => FeedEvent::MutationAck(MutationAck {
            client_txn_id,
            kind,
            message_id: None,
            error: Some(error),
        }),
    }
}

/// Convert a command-level error into a `CommandFailed` event.
pub fn normalize_command_failure(command: impl Into<String>, error: FeedError) -> FeedEvent {
    FeedEvent::CommandFailed {
        command: command.into(),
        error,
    }
}
