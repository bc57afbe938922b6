mod config;
mod input;
mod logging;
mod state;

use std::{process::ExitCode, sync::Arc};

use backend_core::{
    CredentialSource, EventStream, FeedChannelError, FeedCommand, FeedError, FeedEvent,
    MutationKind,
};
use backend_platform::{SecretStore, SessionStore};
use backend_rest::{FeedHandle, rest_clients, spawn_runtime};
use config::{CliConfig, ConfigError};
use input::{HELP_TEXT, Input, lifecycle_command, parse_input, startup_command_sequence};
use state::{CliSnapshot, CliState};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tracing::{debug, error, info, warn};

const SECRET_SERVICE: &str = "chatfeed";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("feed client setup failed: {0}")]
    Feed(#[from] FeedError),
    #[error("feed runtime stopped: {0}")]
    Channel(#[from] FeedChannelError),
    #[error("terminal i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting chatfeed-cli");

    match run().await {
        Ok(()) => {
            info!("chatfeed-cli exiting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "chatfeed-cli stopped");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CliError> {
    let config = CliConfig::from_env()?;
    debug!(
        base_url = %config.base_url,
        poll_interval_ms = config.runtime.poll_interval_ms,
        request_timeout_ms = config.runtime.request_timeout_ms,
        "configuration loaded"
    );

    let session = SessionStore::load(
        secret_store(&config),
        SECRET_SERVICE,
        config.session_account(),
    );
    let credential_restored = session.has_credential();
    let credentials: Arc<dyn CredentialSource> = Arc::new(session.clone());
    let (feed, auth) = rest_clients(
        &config.base_url,
        config.runtime.request_timeout(),
        credentials,
    )?;
    let handle = spawn_runtime(feed, auth, session, config.runtime);
    let mut events = handle.subscribe();

    println!("chatfeed connected to {} (type /help for commands)", config.base_url);
    for command in startup_command_sequence(credential_restored, config.auto_login()) {
        debug!(command = command.kind(), "issuing startup command");
        handle.send(command).await?;
    }

    let mut state = CliState::default();
    let mut last_rendered: Option<CliSnapshot> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                match parse_input(&line) {
                    Ok(Input::Quit) => break,
                    Ok(input) => dispatch(&handle, &mut state, input).await?,
                    Err(err) => state.set_error_text(err.to_string()),
                }
            }
            event = recv_event(&mut events) => {
                let Some(event) = event else {
                    warn!("feed event stream closed");
                    break;
                };
                let signed_in = matches!(event, FeedEvent::AuthResult { success: true, .. });
                state.handle_feed_event(event);
                if signed_in && !state.is_attached() {
                    handle.send(FeedCommand::Attach).await?;
                }
            }
            _ = &mut shutdown => {
                info!("interrupt received");
                break;
            }
        }

        render(state.snapshot(), &mut last_rendered);
    }

    Ok(())
}

async fn dispatch(
    handle: &FeedHandle,
    state: &mut CliState,
    input: Input,
) -> Result<(), FeedChannelError> {
    match input {
        Input::Send(content) => {
            let txn = handle.send_message(content).await?;
            state.mark_mutation_requested(txn, MutationKind::Send);
        }
        Input::Edit { id, content } => {
            let txn = handle.edit_message(id, content).await?;
            state.mark_mutation_requested(txn, MutationKind::Edit);
        }
        Input::Delete(id) => {
            let txn = handle.delete_message(id).await?;
            state.mark_mutation_requested(txn, MutationKind::Delete);
        }
        Input::Help => println!("{HELP_TEXT}"),
        Input::Empty | Input::Quit => {}
        other => {
            if let Some(command) = lifecycle_command(&other) {
                debug!(command = command.kind(), "forwarding command");
                handle.send(command).await?;
            }
        }
    }
    Ok(())
}

fn render(snapshot: CliSnapshot, last_rendered: &mut Option<CliSnapshot>) {
    if last_rendered.as_ref() == Some(&snapshot) {
        return;
    }

    println!("---- {} ----", snapshot.status_text);
    if let Some(profile) = &snapshot.profile_text {
        println!("profile: {profile}");
    }
    for line in &snapshot.lines {
        println!("{line}");
    }
    if snapshot.pending_requests > 0 {
        println!("({} request(s) in flight)", snapshot.pending_requests);
    }
    if let Some(error) = &snapshot.error_text {
        println!("! {error}");
    }
    *last_rendered = Some(snapshot);
}

async fn recv_event(events: &mut EventStream) -> Option<FeedEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged; continuing with newer events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(feature = "os-keyring")]
fn secret_store(_config: &CliConfig) -> Arc<dyn SecretStore> {
    Arc::new(backend_platform::OsKeyringSecretStore)
}

#[cfg(not(feature = "os-keyring"))]
fn secret_store(config: &CliConfig) -> Arc<dyn SecretStore> {
    Arc::new(backend_platform::FileSecretStore::new(config.credentials_path()))
}
