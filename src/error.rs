// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::options::DuplicateOption;
use crate::options::UsageError;


/// The errors reported while submitting an email.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
  /// The command line is malformed.
  #[error(transparent)]
  Usage(#[from] UsageError),
  /// The set of declared options is inconsistent.
  #[error(transparent)]
  Declaration(#[from] DuplicateOption),
  /// The configuration is incomplete.
  #[error("{0}")]
  Config(String),
  /// The message body could not be read.
  #[error("failed to read message body from {source_name}: {source}")]
  Body {
    source_name: String,
    #[source]
    source: io::Error,
  },
  /// An attachment could not be read.
  #[error("failed to read attachment `{}`: {source}", path.display())]
  Attachment {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  /// The password could not be read from the terminal.
  #[error("failed to read password: {0}")]
  Prompt(#[source] io::Error),
  /// The email message could not be assembled.
  #[error("failed to create email message: {0}")]
  Message(#[from] lettre::error::Error),
  /// Talking to the SMTP server failed.
  ///
  /// The error includes the server's reply, if there was one.
  #[error("failed to send email via {host}: {source}")]
  Transport {
    host: String,
    #[source]
    source: lettre::transport::smtp::Error,
  },
  /// A programming error.
  #[error("internal error: {0}")]
  Internal(String),
}

impl Error {
  /// Check whether the usage text helps in correcting the error.
  pub fn shows_usage(&self) -> bool {
    matches!(self, Self::Usage(..) | Self::Config(..))
  }
}
