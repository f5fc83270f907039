// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt::Display;
use std::io;
use std::io::IsTerminal as _;
use std::path::Path;
use std::path::PathBuf;
use std::str;

use chrono::DateTime;
use chrono::Local;
use chrono::TimeZone;

use lettre::message::header::ContentDisposition;
use lettre::message::header::ContentTransferEncoding;
use lettre::message::header::ContentType;
use lettre::message::header::HeaderName;
use lettre::message::header::HeaderValue;
use lettre::message::Mailbox;
use lettre::message::MaybeString;
use lettre::message::MultiPart;
use lettre::message::SinglePart;
use lettre::Message;

use tokio::fs::read;
use tokio::io::stdin;
use tokio::io::AsyncReadExt as _;

use crate::BodySource;
use crate::Error;
use crate::MessageConfig;


/// A file to attach to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
  /// The name the attachment is presented under, without any
  /// directory components.
  pub filename: String,
  /// The raw contents of the file.
  pub content: Vec<u8>,
}

impl Attachment {
  /// Create an attachment named after the final component of `path`.
  pub fn new(path: &Path, content: Vec<u8>) -> Self {
    let filename = path
      .file_name()
      .unwrap_or(path.as_os_str())
      .to_string_lossy()
      .into_owned();

    Self { filename, content }
  }
}


fn sender(config: &MessageConfig) -> Result<Mailbox, Error> {
  config
    .sender
    .clone()
    .ok_or_else(|| Error::Config("you must specify the sender email address".to_string()))
}

/// Convert the raw body into the form we hand to `lettre`.
fn text(body: &[u8]) -> MaybeString {
  // We always try to work with string. The reason being that `lettre`
  // performs line ending conversion only when the data is passed in
  // as a string, and some mailers reject emails with bare linefeed
  // line endings.
  if let Ok(body) = str::from_utf8(body) {
    MaybeString::String(body.to_string())
  } else {
    MaybeString::Binary(body.to_vec())
  }
}

fn attachment_part(attachment: &Attachment) -> Result<SinglePart, Error> {
  let content_type = ContentType::parse("application/octet-stream").map_err(|err| {
    Error::Internal(format!(
      "failed to parse 'application/octet-stream' content type header: {err}"
    ))
  })?;

  let part = SinglePart::builder()
    .header(content_type)
    .header(ContentTransferEncoding::Base64)
    .header(ContentDisposition::attachment(&attachment.filename))
    .body(attachment.content.clone());
  Ok(part)
}


/// Read the message body from the given source.
///
/// Standard input is only touched if it is the configured source.
pub async fn read_body(source: &BodySource) -> Result<Vec<u8>, Error> {
  match source {
    BodySource::File(path) => read(path).await.map_err(|source| Error::Body {
      source_name: format!("`{}`", path.display()),
      source,
    }),
    BodySource::Stdin => {
      // At this point tokio's stdin does not sport the `is_terminal`
      // method so we have to go through std here.
      if io::stdin().is_terminal() {
        eprintln!("Please enter message (terminate with Ctrl-D):");
      }

      let mut data = Vec::new();
      let _count = stdin()
        .read_to_end(&mut data)
        .await
        .map_err(|source| Error::Body {
          source_name: "standard input".to_string(),
          source,
        })?;
      Ok(data)
    },
  }
}

/// Read all attachments, in order.
pub async fn read_attachments(paths: &[PathBuf]) -> Result<Vec<Attachment>, Error> {
  let mut attachments = Vec::with_capacity(paths.len());
  for path in paths {
    let content = read(path).await.map_err(|source| Error::Attachment {
      path: path.clone(),
      source,
    })?;
    let () = attachments.push(Attachment::new(path, content));
  }
  Ok(attachments)
}

/// Render a `Date` header for the given point in time, keeping its
/// offset.
fn date_header<Tz>(date: DateTime<Tz>) -> HeaderValue
where
  Tz: TimeZone,
  Tz::Offset: Display,
{
  HeaderValue::new(HeaderName::new_from_ascii_str("Date"), date.to_rfc2822())
}

/// Assemble a message from already loaded body and attachments.
///
/// Without attachments the result is a plain text message, otherwise
/// a `multipart/mixed` one with the text as first part.
pub fn build_message(
  config: &MessageConfig,
  body: &[u8],
  attachments: &[Attachment],
) -> Result<Message, Error> {
  let mut email = Message::builder().from(sender(config)?);

  if let Some(subject) = &config.subject {
    email = email.subject(subject);
  }

  for to in &config.recipients {
    email = email.to(to.clone());
  }

  for cc in &config.copies {
    email = email.cc(cc.clone());
  }

  let mut email = if attachments.is_empty() {
    email.header(ContentType::TEXT_PLAIN).body(text(body))?
  } else {
    let mut parts = MultiPart::mixed().singlepart(
      SinglePart::builder()
        .header(ContentType::TEXT_PLAIN)
        .body(text(body)),
    );

    for attachment in attachments {
      parts = parts.singlepart(attachment_part(attachment)?);
    }

    email.multipart(parts)?
  };

  // lettre's own `Date` header is always in UTC and a custom one set
  // on the builder is replaced if it does not parse as such.
  let () = email.headers_mut().insert_raw(date_header(Local::now()));
  Ok(email)
}

/// Compose the message described by `config`, reading the body and
/// all attachments.
#[cfg_attr(
  feature = "tracing",
  tracing::instrument(skip_all, fields(attachments = config.attachments.len()), err)
)]
pub async fn compose(config: &MessageConfig) -> Result<Message, Error> {
  // Bail out before the user gets to type a message we could not send.
  let _sender = sender(config)?;

  let body = read_body(&config.body).await?;
  #[cfg(feature = "tracing")]
  tracing::debug!(bytes = body.len(), "read message body");

  let attachments = read_attachments(&config.attachments).await?;
  #[cfg(feature = "tracing")]
  for attachment in &attachments {
    tracing::debug!(
      filename = attachment.filename.as_str(),
      bytes = attachment.content.len(),
      "read attachment"
    );
  }

  build_message(config, &body, &attachments)
}
