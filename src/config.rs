// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io;
use std::path::PathBuf;

use lettre::address::AddressError;
use lettre::message::Mailbox;

use crate::Error;
use crate::UsageError;


/// The SMTP host used when none is specified.
pub const DEFAULT_HOST: &str = "localhost";
/// The SMTP port used when none is specified.
pub const DEFAULT_PORT: u16 = 25;


/// A well known relay, configured with a single flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Preset {
  /// Google's GMail.
  Gmail,
  /// Microsoft's Office365.
  Office365,
}

impl Preset {
  /// The hostname of the relay's SMTP server.
  pub fn host(&self) -> &'static str {
    match self {
      Self::Gmail => "smtp.gmail.com",
      Self::Office365 => "smtp.office365.com",
    }
  }

  /// The relay's submission port.
  pub fn port(&self) -> u16 {
    587
  }

  /// Configure the relay, overwriting all affected settings.
  pub fn apply(self, config: &mut SubmissionConfig) {
    config.transport.use_tls = true;
    config.transport.host = self.host().to_string();
    config.transport.port = self.port();
    config.auth.required = true;
  }
}


/// Connection settings for the SMTP server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
  /// Upgrade the connection using STARTTLS (often on port 587).
  pub use_tls: bool,
  /// Use TLS from the first byte on (often on port 465).
  pub use_ssl: bool,
  /// The hostname of the SMTP server.
  pub host: String,
  /// The port of the SMTP server.
  pub port: u16,
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      use_tls: false,
      use_ssl: false,
      host: DEFAULT_HOST.to_string(),
      port: DEFAULT_PORT,
    }
  }
}


/// SMTP authentication settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthConfig {
  /// Whether the server requires us to authenticate.
  pub required: bool,
  /// The user to log in as.
  pub user: Option<String>,
  /// The password to use for logging in.
  pub pass: Option<String>,
}

impl AuthConfig {
  /// Retrieve user and password, if both are present and non-empty.
  pub fn credentials(&self) -> Option<(&str, &str)> {
    let user = self.user.as_deref().filter(|user| !user.is_empty())?;
    let pass = self.pass.as_deref().filter(|pass| !pass.is_empty())?;
    Some((user, pass))
  }
}


/// Where to read the message body from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BodySource {
  /// Read the body from standard input.
  #[default]
  Stdin,
  /// Read the body from the file at the given path.
  File(PathBuf),
}


/// The contents of the message to send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageConfig {
  /// The "From" identifier to use.
  pub sender: Option<Mailbox>,
  /// The "To" recipients.
  pub recipients: Vec<Mailbox>,
  /// The "Cc" recipients.
  pub copies: Vec<Mailbox>,
  /// The subject of the message.
  pub subject: Option<String>,
  /// The source of the message body.
  pub body: BodySource,
  /// Paths of files to attach.
  pub attachments: Vec<PathBuf>,
}


/// Everything needed to compose and submit an email.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionConfig {
  pub transport: TransportConfig,
  pub auth: AuthConfig,
  pub message: MessageConfig,
}

impl SubmissionConfig {
  /// Apply a single parsed option.
  ///
  /// Options carrying a single value overwrite earlier occurrences,
  /// `to`, `cc`, and `attach` accumulate.
  pub fn apply(&mut self, flag: &str, value: Option<&str>) -> Result<(), Error> {
    match flag {
      "gmail" => Preset::Gmail.apply(self),
      "o365" => Preset::Office365.apply(self),
      "ssl" => self.transport.use_ssl = true,
      "tls" => self.transport.use_tls = true,
      "host" => self.transport.host = required(flag, value)?.to_string(),
      "port" => self.transport.port = port(flag, required(flag, value)?)?,
      "user" => {
        self.auth.required = true;
        self.auth.user = Some(required(flag, value)?.to_string());
      },
      "pass" => self.auth.pass = Some(required(flag, value)?.to_string()),
      "from" => self.message.sender = Some(mailbox(flag, required(flag, value)?)?),
      "to" => {
        let mailbox = mailbox(flag, required(flag, value)?)?;
        let () = self.message.recipients.push(mailbox);
      },
      "cc" => {
        let mailbox = mailbox(flag, required(flag, value)?)?;
        let () = self.message.copies.push(mailbox);
      },
      "subject" => self.message.subject = Some(required(flag, value)?.to_string()),
      "body" => self.message.body = BodySource::File(PathBuf::from(required(flag, value)?)),
      "attach" => {
        let path = PathBuf::from(required(flag, value)?);
        let () = self.message.attachments.push(path);
      },
      _ => return Err(Error::Internal(format!("no handler for option `{flag}`"))),
    }
    Ok(())
  }

  /// Validate the configuration, prompting for a missing password on
  /// the terminal.
  pub fn validate(&mut self) -> Result<(), Error> {
    self.validate_with(|| rpassword::prompt_password("password: "))
  }

  /// Validate the configuration, using `prompt` to retrieve a missing
  /// password.
  ///
  /// `prompt` is invoked at most once.
  pub fn validate_with<P>(&mut self, prompt: P) -> Result<(), Error>
  where
    P: FnOnce() -> io::Result<String>,
  {
    if self.message.recipients.is_empty() {
      return Err(Error::Config(
        "you must specify at least one recipient email address".to_string(),
      ))
    }

    if self.auth.required {
      if self.auth.user.as_deref().map_or(true, str::is_empty) {
        return Err(Error::Config(
          "you must specify smtp user to authenticate".to_string(),
        ))
      }

      if self.auth.pass.as_deref().map_or(true, str::is_empty) {
        let pass = prompt().map_err(Error::Prompt)?;
        if pass.is_empty() {
          return Err(Error::Config(
            "you must specify smtp password to authenticate".to_string(),
          ))
        }
        self.auth.pass = Some(pass);
      }
    }
    Ok(())
  }

  /// Iterate over all envelope recipients: "To" followed by "Cc".
  pub fn envelope_recipients(&self) -> impl Iterator<Item = &Mailbox> {
    self.message.recipients.iter().chain(&self.message.copies)
  }
}


fn required<'value>(flag: &str, value: Option<&'value str>) -> Result<&'value str, Error> {
  value.ok_or_else(|| UsageError::MissingValue(format!("--{flag}")).into())
}

fn invalid(flag: &str, value: &str, reason: impl ToString) -> Error {
  Error::from(UsageError::InvalidValue {
    option: format!("--{flag}"),
    value: value.to_string(),
    reason: reason.to_string(),
  })
}

fn port(flag: &str, value: &str) -> Result<u16, Error> {
  value.parse().map_err(|err| invalid(flag, value, err))
}

/// Parse an email address, optionally including a display name.
///
/// Bare local parts (`root`) cannot be addressed over SMTP and are
/// rejected.
fn mailbox(flag: &str, value: &str) -> Result<Mailbox, Error> {
  value.parse().map_err(|_err: AddressError| {
    invalid(flag, value, "expected an address of the form `user@domain`")
  })
}
