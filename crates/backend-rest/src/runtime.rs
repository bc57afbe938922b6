//! Actor that owns the feed engine and poll scheduler.
//!
//! One task handles commands, interval ticks and completions of spawned
//! network requests in turn, so engine state is only touched from a single
//! place. Auth calls are awaited inline; feed calls run as child tasks that
//! report back through the completion channel tagged with the current epoch.
//!
//! Completions also carry the credential generation they were issued under.
//! A 401 from a request that still used a replaced credential says nothing
//! about the current one and never suspends polling.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use backend_core::{
    AuthApi, EventStream, FeedApi, FeedChannelError, FeedChannels, FeedCommand, FeedEngine,
    FeedError, FeedErrorKind, FeedEvent, FeedRuntimeConfig, Identity, Message, MessageId,
    MutationKind, MutationOutcome, PollScheduler, PollState, Profile, ProfileUpdate,
    normalize_command_failure, normalize_mutation_outcome,
};
use backend_platform::SessionStore;
use tokio::{
    sync::mpsc,
    time::{Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const COMMAND_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 512;
const COMPLETION_BUFFER: usize = 64;
const MIN_PASSWORD_LEN: usize = 8;

/// Clonable front door to a running feed runtime.
#[derive(Clone, Debug)]
pub struct FeedHandle {
    channels: FeedChannels,
}

impl FeedHandle {
    pub async fn send(&self, command: FeedCommand) -> Result<(), FeedChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Queue a send and return its client transaction id.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
    ) -> Result<String, FeedChannelError> {
        let client_txn_id = new_txn_id();
        self.send(FeedCommand::Send {
            client_txn_id: client_txn_id.clone(),
            content: content.into(),
        })
        .await?;
        Ok(client_txn_id)
    }

    /// Queue an edit and return its client transaction id.
    pub async fn edit_message(
        &self,
        id: MessageId,
        content: impl Into<String>,
    ) -> Result<String, FeedChannelError> {
        let client_txn_id = new_txn_id();
        self.send(FeedCommand::Edit {
            client_txn_id: client_txn_id.clone(),
            id,
            content: content.into(),
        })
        .await?;
        Ok(client_txn_id)
    }

    /// Queue a delete and return its client transaction id.
    pub async fn delete_message(&self, id: MessageId) -> Result<String, FeedChannelError> {
        let client_txn_id = new_txn_id();
        self.send(FeedCommand::Delete {
            client_txn_id: client_txn_id.clone(),
            id,
        })
        .await?;
        Ok(client_txn_id)
    }
}

/// Start the runtime on the current tokio runtime.
pub fn spawn_runtime<F, A>(
    feed: F,
    auth: A,
    session: SessionStore,
    config: FeedRuntimeConfig,
) -> FeedHandle
where
    F: FeedApi + 'static,
    A: AuthApi + 'static,
{
    let (channels, command_rx) = FeedChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let runtime = FeedRuntime::new(
        channels.clone(),
        command_rx,
        Arc::new(feed),
        Arc::new(auth),
        session,
        config,
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    FeedHandle { channels }
}

fn new_txn_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug)]
struct Completion {
    epoch: u64,
    generation: u64,
    outcome: Outcome,
}

#[derive(Debug)]
enum Outcome {
    Poll(Result<Vec<Message>, FeedError>),
    Send {
        client_txn_id: String,
        local_id: MessageId,
        result: Result<Message, FeedError>,
    },
    Edit {
        client_txn_id: String,
        id: MessageId,
        result: Result<Message, FeedError>,
    },
    Delete {
        client_txn_id: String,
        id: MessageId,
        result: Result<(), FeedError>,
    },
}

struct FeedRuntime {
    channels: FeedChannels,
    command_rx: mpsc::Receiver<FeedCommand>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
    feed: Arc<dyn FeedApi>,
    auth: Arc<dyn AuthApi>,
    session: SessionStore,
    config: FeedRuntimeConfig,
    engine: FeedEngine,
    scheduler: PollScheduler,
    ticker: Interval,
    epoch: u64,
    /// Bumped whenever sign-in stores a new credential.
    generation: u64,
    tasks: CancellationToken,
    /// Mutations spawned in the current epoch that have not reported back.
    in_flight_mutations: HashMap<String, MutationKind>,
}

impl FeedRuntime {
    fn new(
        channels: FeedChannels,
        command_rx: mpsc::Receiver<FeedCommand>,
        feed: Arc<dyn FeedApi>,
        auth: Arc<dyn AuthApi>,
        session: SessionStore,
        config: FeedRuntimeConfig,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_BUFFER);
        let mut ticker = tokio::time::interval(config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut engine = FeedEngine::new();
        engine.set_identity(session.username());

        Self {
            channels,
            command_rx,
            completion_tx,
            completion_rx,
            feed,
            auth,
            session,
            config,
            engine,
            scheduler: PollScheduler::default(),
            ticker,
            epoch: 0,
            generation: 0,
            tasks: CancellationToken::new(),
            in_flight_mutations: HashMap::new(),
        }
    }

    async fn run(mut self) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            restored_session = self.session.has_credential(),
            "feed runtime started"
        );

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else { break };
                    let kind = command.kind();
                    if let Err(err) = self.handle_command(command).await {
                        debug!(command = kind, error_code = %err.code, "command failed");
                        self.channels.emit(normalize_command_failure(kind, err));
                    }
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }
                _ = self.ticker.tick() => {
                    self.poll_now();
                }
            }
        }

        self.tasks.cancel();
        info!("feed runtime stopped");
    }

    async fn handle_command(&mut self, command: FeedCommand) -> Result<(), FeedError> {
        match command {
            FeedCommand::Login { username, password } => {
                self.handle_login(username, password).await;
                Ok(())
            }
            FeedCommand::Register { username, password } => {
                self.handle_register(username, password).await;
                Ok(())
            }
            FeedCommand::Logout => {
                self.handle_logout().await;
                Ok(())
            }
            FeedCommand::Attach => self.handle_attach().await,
            FeedCommand::Detach => self.handle_detach(),
            FeedCommand::Refresh => self.handle_refresh(),
            FeedCommand::LoadProfile => self.handle_load_profile().await,
            FeedCommand::UpdateProfile(update) => self.handle_update_profile(update).await,
            FeedCommand::Send {
                client_txn_id,
                content,
            } => {
                self.handle_send(client_txn_id, content);
                Ok(())
            }
            FeedCommand::Edit {
                client_txn_id,
                id,
                content,
            } => {
                self.handle_edit(client_txn_id, id, content);
                Ok(())
            }
            FeedCommand::Delete { client_txn_id, id } => {
                self.handle_delete(client_txn_id, id);
                Ok(())
            }
        }
    }

    async fn handle_login(&mut self, username: String, password: String) {
        let username = username.trim().to_owned();
        if username.is_empty() || password.is_empty() {
            self.channels.emit(FeedEvent::AuthResult {
                success: false,
                error: Some(FeedError::new(
                    FeedErrorKind::Rejected,
                    "missing_credentials",
                    "username and password are required",
                )),
            });
            return;
        }

        let result = bounded(
            self.config.request_timeout(),
            "login",
            self.auth.login(&username, &password),
        )
        .await;

        let grant = match result {
            Ok(grant) => grant,
            Err(err) => {
                warn!(error_code = %err.code, "login failed");
                self.channels.emit(FeedEvent::AuthResult {
                    success: false,
                    error: Some(err),
                });
                return;
            }
        };

        let switched = self
            .engine
            .identity()
            .is_some_and(|current| current != grant.user.username);
        if switched {
            debug!("identity changed; dropping previous feed state");
            self.teardown();
        }

        self.session.set_credential(grant.token);
        self.generation = self.generation.wrapping_add(1);
        self.adopt_identity(grant.user);
        info!(username = %username, generation = self.generation, "signed in");

        self.channels.emit(FeedEvent::AuthResult {
            success: true,
            error: None,
        });
        self.emit_session();

        let events = self.scheduler.credential_restored();
        let resumed = !events.is_empty();
        self.emit_all(events);
        if switched {
            self.publish();
        }
        if (resumed || switched) && self.scheduler.state() == PollState::Polling {
            self.ticker.reset();
            self.poll_now();
        }
    }

    async fn handle_register(&mut self, username: String, password: String) {
        let username = username.trim().to_owned();
        let validation = if username.is_empty() {
            Err(FeedError::new(
                FeedErrorKind::Rejected,
                "invalid_username",
                "username is required",
            ))
        } else if password.chars().count() < MIN_PASSWORD_LEN {
            Err(FeedError::new(
                FeedErrorKind::Rejected,
                "password_too_short",
                format!("password must be at least {MIN_PASSWORD_LEN} characters"),
            ))
        } else {
            Ok(())
        };

        let result = match validation {
            Ok(()) => {
                bounded(
                    self.config.request_timeout(),
                    "register",
                    self.auth.register(&username, &password),
                )
                .await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                info!(username = %username, "account registered");
                self.channels.emit(FeedEvent::RegisterResult {
                    success: true,
                    error: None,
                });
            }
            Err(err) => {
                warn!(error_code = %err.code, "registration failed");
                self.channels.emit(FeedEvent::RegisterResult {
                    success: false,
                    error: Some(err),
                });
            }
        }
    }

    async fn handle_logout(&mut self) {
        if self.session.has_credential()
            && let Err(err) = bounded(
                self.config.request_timeout(),
                "logout",
                self.auth.logout(),
            )
            .await
        {
            // The local sign-out proceeds either way.
            warn!(error_code = %err.code, "remote logout failed");
        }

        self.session.clear_credential();
        self.teardown();
        self.engine.set_identity(None);
        let events = self.scheduler.sign_out();
        self.emit_all(events);
        self.emit_session();
        self.publish();
        info!("signed out");
    }

    async fn handle_attach(&mut self) -> Result<(), FeedError> {
        let events = self.scheduler.start(self.session.has_credential())?;
        self.emit_all(events);

        if self.engine.identity().is_none() {
            self.resolve_identity().await;
        }

        if self.scheduler.state() == PollState::Polling {
            self.ticker.reset();
            self.poll_now();
        }
        Ok(())
    }

    async fn resolve_identity(&mut self) {
        if let Some(identity) = self.session.identity() {
            self.engine.set_identity(Some(identity.username));
            return;
        }

        match bounded(self.config.request_timeout(), "profile", self.auth.profile()).await {
            Ok(profile) => {
                self.adopt_identity(Identity {
                    id: profile.id,
                    username: profile.username,
                });
                self.emit_session();
            }
            Err(err) if err.is_unauthorized() => self.invalidate_session(&err),
            Err(err) => {
                warn!(error_code = %err.code, "could not resolve identity; ownership checks deferred to server");
            }
        }
    }

    async fn handle_load_profile(&mut self) -> Result<(), FeedError> {
        self.require_credential()?;
        let result = bounded(self.config.request_timeout(), "profile", self.auth.profile()).await;
        self.finish_profile(result)
    }

    async fn handle_update_profile(&mut self, update: ProfileUpdate) -> Result<(), FeedError> {
        self.require_credential()?;
        if update.is_empty() {
            return Err(FeedError::new(
                FeedErrorKind::Rejected,
                "empty_profile_update",
                "profile update names no field to change",
            ));
        }
        if let Some(email) = update.email.as_deref()
            && !email.is_empty()
            && !email.contains('@')
        {
            return Err(FeedError::new(
                FeedErrorKind::Rejected,
                "invalid_email",
                format!("'{email}' is not an email address"),
            ));
        }

        let result = bounded(
            self.config.request_timeout(),
            "update_profile",
            self.auth.update_profile(&update),
        )
        .await;
        self.finish_profile(result)
    }

    fn finish_profile(&mut self, result: Result<Profile, FeedError>) -> Result<(), FeedError> {
        match result {
            Ok(profile) => {
                if self.engine.identity().is_none() {
                    self.adopt_identity(Identity {
                        id: profile.id,
                        username: profile.username.clone(),
                    });
                    self.emit_session();
                }
                self.channels.emit(FeedEvent::ProfileLoaded(profile));
                Ok(())
            }
            Err(err) => {
                if err.is_unauthorized() {
                    self.invalidate_session(&err);
                }
                Err(err)
            }
        }
    }

    fn handle_detach(&mut self) -> Result<(), FeedError> {
        let events = self.scheduler.stop()?;
        self.teardown();
        self.emit_all(events);
        self.publish();
        Ok(())
    }

    fn handle_refresh(&mut self) -> Result<(), FeedError> {
        if self.scheduler.state() != PollState::Polling {
            return Err(FeedError::invalid_state(self.scheduler.state(), "refresh"));
        }
        if !self.poll_now() {
            debug!("refresh skipped; a poll is already outstanding");
        }
        Ok(())
    }

    fn handle_send(&mut self, client_txn_id: String, content: String) {
        if let Err(err) = self.require_credential() {
            self.reject(client_txn_id, MutationKind::Send, err);
            return;
        }

        let ticket = match self.engine.begin_send(&content) {
            Ok(ticket) => ticket,
            Err(err) => {
                self.reject(client_txn_id, MutationKind::Send, err);
                return;
            }
        };
        self.publish();

        let feed = self.feed.clone();
        let limit = self.config.request_timeout();
        self.in_flight_mutations
            .insert(client_txn_id.clone(), MutationKind::Send);
        self.spawn_request("create", async move {
            let result = bounded(limit, "create", feed.create(&ticket.content)).await;
            Outcome::Send {
                client_txn_id,
                local_id: ticket.local_id,
                result,
            }
        });
    }

    fn handle_edit(&mut self, client_txn_id: String, id: MessageId, content: String) {
        if let Err(err) = self.require_credential() {
            self.reject(client_txn_id, MutationKind::Edit, err);
            return;
        }

        let ticket = match self.engine.begin_edit(id, &content) {
            Ok(ticket) => ticket,
            Err(err) => {
                self.reject(client_txn_id, MutationKind::Edit, err);
                return;
            }
        };
        self.publish();

        let feed = self.feed.clone();
        let limit = self.config.request_timeout();
        self.in_flight_mutations
            .insert(client_txn_id.clone(), MutationKind::Edit);
        self.spawn_request("update", async move {
            let result = bounded(limit, "update", feed.update(ticket.id, &ticket.content)).await;
            Outcome::Edit {
                client_txn_id,
                id: ticket.id,
                result,
            }
        });
    }

    fn handle_delete(&mut self, client_txn_id: String, id: MessageId) {
        if let Err(err) = self.require_credential() {
            self.reject(client_txn_id, MutationKind::Delete, err);
            return;
        }

        let ticket = match self.engine.begin_delete(id) {
            Ok(ticket) => ticket,
            Err(err) => {
                self.reject(client_txn_id, MutationKind::Delete, err);
                return;
            }
        };
        self.publish();

        let feed = self.feed.clone();
        let limit = self.config.request_timeout();
        self.in_flight_mutations
            .insert(client_txn_id.clone(), MutationKind::Delete);
        self.spawn_request("delete", async move {
            let result = bounded(limit, "delete", feed.delete(ticket.id)).await;
            Outcome::Delete {
                client_txn_id,
                id: ticket.id,
                result,
            }
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        if completion.epoch != self.epoch {
            debug!(
                completion_epoch = completion.epoch,
                current_epoch = self.epoch,
                "dropping stale completion"
            );
            return;
        }

        let superseded = completion.generation != self.generation;
        match completion.outcome {
            Outcome::Poll(result) => {
                if superseded && result.as_ref().is_err_and(FeedError::is_unauthorized) {
                    debug!("poll carried a replaced credential; polling again");
                    self.scheduler.abandon_poll();
                    self.poll_now();
                    return;
                }

                let events = self.scheduler.on_poll_result(&result);
                let unauthorized = result
                    .as_ref()
                    .err()
                    .filter(|err| err.is_unauthorized())
                    .cloned();
                if let Err(err) = &result
                    && err.kind == FeedErrorKind::ServerError
                {
                    warn!(error_code = %err.code, "poll hit a server error; retrying next tick");
                }

                self.engine.apply_poll(result);
                self.emit_all(events);
                if let Some(err) = unauthorized {
                    self.invalidate_session(&err);
                }
                self.publish();
            }
            Outcome::Send {
                client_txn_id,
                local_id,
                result,
            } => {
                let result = self.engine.complete_send(local_id, result);
                self.finish_mutation(client_txn_id, MutationKind::Send, result, superseded);
            }
            Outcome::Edit {
                client_txn_id,
                id,
                result,
            } => {
                let result = self.engine.complete_edit(id, result);
                self.finish_mutation(client_txn_id, MutationKind::Edit, result, superseded);
            }
            Outcome::Delete {
                client_txn_id,
                id,
                result,
            } => {
                let result = self.engine.complete_delete(id, result);
                self.finish_mutation(client_txn_id, MutationKind::Delete, result, superseded);
            }
        }
    }

    fn finish_mutation(
        &mut self,
        client_txn_id: String,
        kind: MutationKind,
        result: Result<MessageId, FeedError>,
        superseded: bool,
    ) {
        self.in_flight_mutations.remove(&client_txn_id);
        let unauthorized = result
            .as_ref()
            .err()
            .filter(|err| err.is_unauthorized() && !superseded)
            .cloned();
        match &result {
            Ok(message_id) => {
                debug!(client_txn_id = %client_txn_id, message_id = %message_id, ?kind, "mutation confirmed");
            }
            Err(err) => {
                warn!(client_txn_id = %client_txn_id, error_code = %err.code, ?kind, "mutation failed");
            }
        }

        self.channels
            .emit(normalize_mutation_outcome(client_txn_id, kind, result.into()));
        self.publish();

        if let Some(err) = unauthorized {
            self.invalidate_session(&err);
        }
    }

    fn reject(&self, client_txn_id: String, kind: MutationKind, error: FeedError) {
        debug!(client_txn_id = %client_txn_id, error_code = %error.code, ?kind, "mutation rejected locally");
        self.channels.emit(normalize_mutation_outcome(
            client_txn_id,
            kind,
            MutationOutcome::Failure { error },
        ));
    }

    /// Issue a poll unless one is outstanding or polling is off.
    fn poll_now(&mut self) -> bool {
        if !self.scheduler.on_tick() {
            return false;
        }

        let feed = self.feed.clone();
        let limit = self.config.request_timeout();
        self.spawn_request("list", async move {
            Outcome::Poll(bounded(limit, "list", feed.list()).await)
        });
        true
    }

    fn spawn_request<Fut>(&self, operation: &'static str, request: Fut)
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let cancel = self.tasks.child_token();
        let completion_tx = self.completion_tx.clone();
        let epoch = self.epoch;
        let generation = self.generation;
        trace!(operation, epoch, generation, "spawning request");

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(operation, epoch, "request cancelled");
                }
                outcome = request => {
                    let _ = completion_tx
                        .send(Completion {
                            epoch,
                            generation,
                            outcome,
                        })
                        .await;
                }
            }
        });
    }

    /// Cancel in-flight requests and forget all feed state.
    ///
    /// Every cancelled mutation is acknowledged as a `cancelled` failure.
    fn teardown(&mut self) {
        self.tasks.cancel();
        self.tasks = CancellationToken::new();
        self.epoch = self.epoch.wrapping_add(1);
        self.scheduler.abandon_poll();
        self.engine.reset();

        for (client_txn_id, kind) in self.in_flight_mutations.drain() {
            debug!(client_txn_id = %client_txn_id, ?kind, "mutation cancelled by teardown");
            self.channels.emit(normalize_mutation_outcome(
                client_txn_id,
                kind,
                MutationOutcome::Failure {
                    error: FeedError::cancelled(kind.as_str()),
                },
            ));
        }
    }

    fn invalidate_session(&mut self, err: &FeedError) {
        let had_credential = self.session.has_credential();
        self.session.clear_credential();
        let events = self.scheduler.on_unauthorized();
        self.emit_all(events);

        if had_credential {
            warn!(error_code = %err.code, "credential rejected; polling suspended until sign-in");
            self.emit_session();
        }
    }

    fn adopt_identity(&mut self, identity: Identity) {
        self.engine.set_identity(Some(identity.username.clone()));
        self.session.set_identity(identity);
    }

    fn require_credential(&self) -> Result<(), FeedError> {
        if self.session.has_credential() {
            Ok(())
        } else {
            Err(FeedError::credential_missing())
        }
    }

    fn emit_session(&self) {
        self.channels.emit(FeedEvent::SessionChanged {
            authenticated: self.session.has_credential(),
            identity: self.session.username(),
        });
    }

    fn emit_all(&self, events: Vec<FeedEvent>) {
        for event in events {
            self.channels.emit(event);
        }
    }

    fn publish(&self) {
        self.channels.emit(FeedEvent::FeedUpdated(
            self.engine.snapshot(self.scheduler.state()),
        ));
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    request: impl Future<Output = Result<T, FeedError>>,
) -> Result<T, FeedError> {
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::timeout(operation)),
    }
}
