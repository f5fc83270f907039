// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::OsString;

use postmail::Error;
use postmail::OptionRegistry;
use postmail::OptionSpec;
use postmail::Parsed;
use postmail::ParsedOption;
use postmail::SubmissionConfig;


/// Declare all options understood by the program, in display order.
pub(crate) fn mail_options(program: &str) -> Result<OptionRegistry, Error> {
  let mut registry = OptionRegistry::new(program);
  let _registry = registry
    .declare(OptionSpec::long("help").short('h').desc("show this help"))?
    .declare(OptionSpec::long("version").short('V').desc("show version information"))?
    .declare(
      OptionSpec::long("verbose")
        .short('v')
        .desc("increase logging verbosity (may be repeated)"),
    )?
    // service
    .declare(OptionSpec::separator())?
    .declare(OptionSpec::long("gmail").desc("use GMail as a smtp server"))?
    .declare(OptionSpec::long("o365").desc("use Office365 as a smtp server"))?
    // tls
    .declare(OptionSpec::separator())?
    .declare(OptionSpec::long("ssl").desc("use SSL as an smtp connection encryption method"))?
    .declare(OptionSpec::long("tls").desc("use TLS as an smtp connection encryption method"))?
    // smtp
    .declare(OptionSpec::separator())?
    .declare(OptionSpec::long("host=").hint("host").desc("hostname of smtp server"))?
    .declare(OptionSpec::long("port=").hint("port").desc("port-number of smtp server"))?
    .declare(OptionSpec::long("user=").hint("user").desc("smtp authentication username"))?
    .declare(OptionSpec::long("pass=").hint("password").desc("smtp authentication password"))?
    // message
    .declare(OptionSpec::separator())?
    .declare(OptionSpec::long("from=").hint("email").desc("e-mail address of the sender"))?
    .declare(OptionSpec::long("to=").hint("email").desc("e-mail address of the recipient"))?
    .declare(OptionSpec::long("cc=").hint("email").desc("e-mail address of the CC"))?
    .declare(OptionSpec::long("subject=").hint("text").desc("subject of message"))?
    .declare(OptionSpec::long("body=").hint("file").desc("body of message"))?
    .declare(OptionSpec::long("attach=").hint("file").desc("attachment file"))?;
  Ok(registry)
}


/// An email submission requested on the command line.
#[derive(Debug)]
pub(crate) struct Submission {
  /// The configuration as provided; not yet validated.
  pub config: SubmissionConfig,
  /// The requested logging verbosity.
  pub verbosity: u8,
  /// Arguments that are not options.
  pub operands: Vec<String>,
}


/// What the program was asked to do.
#[derive(Debug)]
pub(crate) enum Command {
  /// Print the usage text.
  Help,
  /// Print version information.
  Version,
  /// Send an email.
  Submit(Submission),
}


/// Parse `args` (excluding the program name) and apply the resulting
/// options in the order provided.
pub(crate) fn configure<A, T>(registry: &OptionRegistry, args: A) -> Result<Command, Error>
where
  A: IntoIterator<Item = T>,
  T: Into<OsString>,
{
  let Parsed { options, operands } = registry.parse(args)?;
  let mut config = SubmissionConfig::default();
  let mut verbosity = 0u8;

  for ParsedOption { flag, value } in options {
    match flag.as_str() {
      "help" => return Ok(Command::Help),
      "version" => return Ok(Command::Version),
      "verbose" => verbosity = verbosity.saturating_add(1),
      _ => config.apply(&flag, value.as_deref())?,
    }
  }

  let submission = Submission {
    config,
    verbosity,
    operands,
  };
  Ok(Command::Submit(submission))
}
