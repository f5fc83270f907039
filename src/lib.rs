// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

//! A library for composing emails and submitting them to an SMTP
//! relay.
//!
//! The typical flow is:
//! - declare the recognized options on an [`OptionRegistry`] and
//!   [`parse`][OptionRegistry::parse] the command line
//! - [`apply`][SubmissionConfig::apply] each parsed option to a
//!   [`SubmissionConfig`] and [`validate`][SubmissionConfig::validate]
//!   it
//! - [`compose`] the message and [`submit`] it

#![allow(
  clippy::collapsible_else_if,
  clippy::collapsible_if,
  clippy::let_and_return,
  clippy::let_unit_value
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod error;
mod message;
mod options;
mod transport;

pub use crate::config::AuthConfig;
pub use crate::config::BodySource;
pub use crate::config::MessageConfig;
pub use crate::config::Preset;
pub use crate::config::SubmissionConfig;
pub use crate::config::TransportConfig;
pub use crate::config::DEFAULT_HOST;
pub use crate::config::DEFAULT_PORT;
pub use crate::error::Error;
pub use crate::message::build_message;
pub use crate::message::compose;
pub use crate::message::read_attachments;
pub use crate::message::read_body;
pub use crate::message::Attachment;
pub use crate::options::DuplicateOption;
pub use crate::options::OptionRegistry;
pub use crate::options::OptionSpec;
pub use crate::options::Parsed;
pub use crate::options::ParsedOption;
pub use crate::options::UsageError;
pub use crate::transport::mailer;
pub use crate::transport::submit;

/// The email message type produced by [`compose`].
pub use lettre::Message;
