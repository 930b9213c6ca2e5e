//! Resolve login credentials from the configured source.
//!
//! Sources, in priority order: a 1Password item (via the `op` CLI), a
//! password command, an environment variable.

use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use crate::config::AccountConfig;
use crate::error::{MailError, Result};

/// Username and password for LOGIN.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Look up credentials for `account`.
pub fn resolve(account: &AccountConfig) -> Result<Credentials> {
    if let Some(item) = account.onepassword_item.as_deref().filter(|s| !s.is_empty()) {
        debug!(item, "Reading credentials from 1Password");
        let output = run(&["op", "item", "get", item, "--format", "json"])?;
        let mut creds = parse_onepassword_item(&output)?;
        if !account.username.is_empty() {
            creds.username = account.username.clone();
        }
        return Ok(creds);
    }

    if account.username.is_empty() {
        return Err(MailError::Config("account.username is not set".into()));
    }

    if let Some((program, args)) = account.password_command.split_first() {
        debug!(program = %program, "Reading password from command");
        let mut argv = vec![program.as_str()];
        argv.extend(args.iter().map(String::as_str));
        let output = run(&argv)?;
        let password = output.lines().next().unwrap_or_default().to_string();
        if password.is_empty() {
            return Err(MailError::Credentials(format!("'{program}' printed no password")));
        }
        return Ok(Credentials {
            username: account.username.clone(),
            password,
        });
    }

    let password = std::env::var(&account.password_env).map_err(|_| {
        MailError::Credentials(format!(
            "no password source: set ${} or configure password_command / onepassword_item",
            account.password_env
        ))
    })?;
    Ok(Credentials {
        username: account.username.clone(),
        password,
    })
}

fn run(argv: &[&str]) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| MailError::Credentials("empty command".into()))?;
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| MailError::Credentials(format!("could not run '{program}': {e}")))?;
    if !output.status.success() {
        return Err(MailError::Credentials(format!(
            "'{program}' failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Deserialize)]
struct OpItem {
    #[serde(default)]
    fields: Vec<OpField>,
}

#[derive(Deserialize)]
struct OpField {
    #[serde(default)]
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    value: Option<String>,
}

impl OpField {
    fn is(&self, name: &str) -> bool {
        self.id == name || self.label == name
    }
}

/// Pick the `username` and `password` fields out of `op item get --format json`.
fn parse_onepassword_item(json: &str) -> Result<Credentials> {
    let item: OpItem = serde_json::from_str(json)
        .map_err(|e| MailError::Credentials(format!("unexpected 1Password output: {e}")))?;

    let field = |name: &str| {
        item.fields
            .iter()
            .find(|f| f.is(name))
            .and_then(|f| f.value.clone())
            .filter(|v| !v.is_empty())
    };

    match (field("username"), field("password")) {
        (Some(username), Some(password)) => Ok(Credentials { username, password }),
        _ => Err(MailError::Credentials(
            "1Password item lacks a username or password field".into(),
        )),
    }
}
