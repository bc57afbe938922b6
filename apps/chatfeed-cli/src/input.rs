//! Line-oriented input parsing and command mapping for the terminal client.

use backend_core::{FeedCommand, MessageId, ProfileUpdate};
use thiserror::Error;

pub const HELP_TEXT: &str = "\
commands:
  <text>                   post a message (prefix with // to start with a slash)
  /edit <id> <text>        replace the content of one of your messages
  /delete <id>             delete one of your messages
  /login <user> <pass>     sign in
  /register <user> <pass>  create an account
  /logout                  sign out and forget the stored credential
  /attach | /detach        start or stop following the feed
  /refresh                 poll now
  /profile                 show your profile
  /profile <field> <value> change email, first or last name
  /help                    show this text
  /quit                    exit";

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Edit { id: MessageId, content: String },
    Delete(MessageId),
    Login { username: String, password: String },
    Register { username: String, password: String },
    Logout,
    Attach,
    Detach,
    Refresh,
    ShowProfile,
    UpdateProfile(ProfileUpdate),
    Help,
    Quit,
    Empty,
}

/// Input lines that cannot be turned into an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("unknown command '/{0}'; type /help")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("'{0}' is not a message id")]
    InvalidId(String),
    #[error("unknown profile field '{0}'; use email, first or last")]
    UnknownProfileField(String),
}

/// Parse one line typed by the user.
pub fn parse_input(line: &str) -> Result<Input, InputError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(Input::Empty);
    }

    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Input::Send(format!("/{escaped}")));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Send(line.to_owned()));
    };

    let (name, args) = split_word(rest);
    match name {
        "edit" | "e" => {
            let (id, content) = split_word(args);
            if id.is_empty() || content.is_empty() {
                return Err(InputError::Usage("/edit <id> <text>"));
            }
            Ok(Input::Edit {
                id: parse_id(id)?,
                content: content.to_owned(),
            })
        }
        "delete" | "rm" => {
            let (id, extra) = split_word(args);
            if id.is_empty() || !extra.is_empty() {
                return Err(InputError::Usage("/delete <id>"));
            }
            Ok(Input::Delete(parse_id(id)?))
        }
        "login" => {
            let (username, password) = credentials(args, "/login <user> <pass>")?;
            Ok(Input::Login { username, password })
        }
        "register" => {
            let (username, password) = credentials(args, "/register <user> <pass>")?;
            Ok(Input::Register { username, password })
        }
        "logout" => Ok(Input::Logout),
        "attach" => Ok(Input::Attach),
        "detach" => Ok(Input::Detach),
        "refresh" | "r" => Ok(Input::Refresh),
        "profile" | "me" => profile_input(args),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        other => Err(InputError::UnknownCommand(other.to_owned())),
    }
}

/// Session/lifecycle inputs map straight onto runtime commands.
///
/// Mutations go through the handle so they get a transaction id, and
/// `Help`/`Quit`/`Empty` never reach the runtime.
pub fn lifecycle_command(input: &Input) -> Option<FeedCommand> {
    match input {
        Input::Login { username, password } => Some(FeedCommand::Login {
            username: username.clone(),
            password: password.clone(),
        }),
        Input::Register { username, password } => Some(FeedCommand::Register {
            username: username.clone(),
            password: password.clone(),
        }),
        Input::Logout => Some(FeedCommand::Logout),
        Input::Attach => Some(FeedCommand::Attach),
        Input::Detach => Some(FeedCommand::Detach),
        Input::Refresh => Some(FeedCommand::Refresh),
        Input::ShowProfile => Some(FeedCommand::LoadProfile),
        Input::UpdateProfile(update) => Some(FeedCommand::UpdateProfile(update.clone())),
        Input::Send(_)
        | Input::Edit { .. }
        | Input::Delete(_)
        | Input::Help
        | Input::Quit
        | Input::Empty => None,
    }
}

/// Commands issued once the terminal starts.
pub fn startup_command_sequence(
    credential_restored: bool,
    auto_login: Option<(String, String)>,
) -> Vec<FeedCommand> {
    if credential_restored {
        return vec![FeedCommand::Attach];
    }
    match auto_login {
        Some((username, password)) => vec![FeedCommand::Login { username, password }],
        None => Vec::new(),
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(idx) => (&input[..idx], input[idx..].trim_start()),
        None => (input, ""),
    }
}

fn parse_id(raw: &str) -> Result<MessageId, InputError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(MessageId(id)),
        _ => Err(InputError::InvalidId(raw.to_owned())),
    }
}

fn profile_input(args: &str) -> Result<Input, InputError> {
    let (field, value) = split_word(args);
    if field.is_empty() {
        return Ok(Input::ShowProfile);
    }
    if value.is_empty() {
        return Err(InputError::Usage("/profile <email|first|last> <value>"));
    }

    let value = Some(value.to_owned());
    let update = match field {
        "email" => ProfileUpdate {
            email: value,
            ..ProfileUpdate::default()
        },
        "first" | "first_name" => ProfileUpdate {
            first_name: value,
            ..ProfileUpdate::default()
        },
        "last" | "last_name" => ProfileUpdate {
            last_name: value,
            ..ProfileUpdate::default()
        },
        other => return Err(InputError::UnknownProfileField(other.to_owned())),
    };
    Ok(Input::UpdateProfile(update))
}

fn credentials(args: &str, usage: &'static str) -> Result<(String, String), InputError> {
    let (username, password) = split_word(args);
    if username.is_empty() || password.is_empty() {
        return Err(InputError::Usage(usage));
    }
    Ok((username.to_owned(), password.to_owned()))
}
