//! Log setup for the terminal client.
//!
//! Logs go to stderr; stdout carries only the rendered feed.

use std::env;

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CHATFEED_LOG";
const DEFAULT_DIRECTIVES: &str =
    "info,chatfeed_cli=debug,backend_rest=debug,hyper_util=warn,reqwest=warn";

pub fn init() {
    let directives = pick_directives(env::var(EnvFilter::DEFAULT_ENV).ok(), env::var(LOG_ENV).ok());
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_env_filter(EnvFilter::new(directives))
        .try_init();
}

/// `RUST_LOG` wins over `CHATFEED_LOG`. Blank or unparsable values fall
/// through to the next source.
fn pick_directives(rust_log: Option<String>, chatfeed_log: Option<String>) -> String {
    [rust_log, chatfeed_log]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty() && EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_owned())
}
