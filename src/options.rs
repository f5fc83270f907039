// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

//! A small getopt style option framework.
//!
//! Options are declared once, in display order, on an
//! [`OptionRegistry`]. Parsing turns raw program arguments into an
//! ordered list of [`ParsedOption`]s plus the remaining operands,
//! leaving it to the caller to interpret them.

use std::ffi::OsString;
use std::fmt::Write as _;

use clap::error::ContextKind;
use clap::error::ContextValue;
use clap::error::ErrorKind;
use clap::Arg;
use clap::ArgAction;
use clap::Command;

use thiserror::Error;


/// The marker a long flag ends in when the option requires a value.
const VALUE_MARKER: char = '=';
/// The identifier under which operands are collected.
const OPERANDS: &str = "[operands]";


/// An error caused by a malformed command line.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UsageError {
  /// The option is not known.
  #[error("unrecognized option `{0}`")]
  UnknownOption(String),
  /// An abbreviated long option matched more than one declaration.
  #[error("option `{option}` is ambiguous; possibilities: {candidates}")]
  AmbiguousOption { option: String, candidates: String },
  /// The option requires a value but none was provided.
  #[error("option `{0}` requires a value")]
  MissingValue(String),
  /// The option does not take a value but one was provided.
  #[error("option `{0}` does not take a value")]
  UnexpectedValue(String),
  /// The value provided to an option could not be interpreted.
  #[error("invalid value `{value}` for option `{option}`: {reason}")]
  InvalidValue {
    option: String,
    value: String,
    reason: String,
  },
  /// An argument is not valid Unicode.
  #[error("argument `{0}` is not valid Unicode")]
  NotUnicode(String),
  /// The command line is malformed in some other way.
  #[error("malformed command line: {0}")]
  Malformed(String),
}


/// An error reported when a flag is declared twice.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("option `{0}` is declared more than once")]
pub struct DuplicateOption(pub String);


/// The declaration of a single option.
///
/// A declaration without short and long flag is a separator. It only
/// groups the usage output and never matches an argument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptionSpec {
  /// The short flag, without the leading `-`.
  pub short: Option<char>,
  /// The long flag, without the leading `--`.
  ///
  /// A trailing `=` marks the option as requiring a value.
  pub long: Option<&'static str>,
  /// A hint describing the value, e.g., `host`.
  pub hint: Option<&'static str>,
  /// A human readable description.
  pub desc: Option<&'static str>,
}

impl OptionSpec {
  /// Create a separator.
  pub fn separator() -> Self {
    Self::default()
  }

  /// Create a declaration for the given long flag.
  pub fn long(long: &'static str) -> Self {
    Self {
      long: Some(long),
      ..Default::default()
    }
  }

  /// Create a declaration for the given short flag only.
  pub fn short_only(short: char) -> Self {
    Self {
      short: Some(short),
      ..Default::default()
    }
  }

  /// Set the short flag.
  pub fn short(mut self, short: char) -> Self {
    self.short = Some(short);
    self
  }

  /// Set the value hint.
  pub fn hint(mut self, hint: &'static str) -> Self {
    self.hint = Some(hint);
    self
  }

  /// Set the description.
  pub fn desc(mut self, desc: &'static str) -> Self {
    self.desc = Some(desc);
    self
  }

  /// Check whether this declaration is a mere separator.
  pub fn is_separator(&self) -> bool {
    self.short.is_none() && self.long.is_none()
  }

  /// Check whether the option requires a value.
  ///
  /// Short-only options require a value exactly when they carry a
  /// hint.
  pub fn takes_value(&self) -> bool {
    match self.long {
      Some(long) => long.ends_with(VALUE_MARKER),
      None => self.hint.is_some(),
    }
  }

  /// The long flag without the value marker.
  pub fn long_name(&self) -> Option<&'static str> {
    self
      .long
      .map(|long| long.strip_suffix(VALUE_MARKER).unwrap_or(long))
  }

  /// The canonical name of the option, as reported in a
  /// [`ParsedOption`].
  pub fn name(&self) -> String {
    match (self.long_name(), self.short) {
      (Some(long), _) => long.to_string(),
      (None, Some(short)) => short.to_string(),
      (None, None) => String::new(),
    }
  }

  /// The flag as it is written on the command line, preferring the
  /// long form.
  fn flag(&self) -> String {
    match (self.long_name(), self.short) {
      (Some(long), _) => format!("--{long}"),
      (None, Some(short)) => format!("-{short}"),
      (None, None) => String::new(),
    }
  }

  /// Render the flag column of the usage output, e.g.,
  /// `-h, --help` or `--host=<host>`.
  fn column(&self) -> String {
    let mut column = String::new();
    if let Some(short) = self.short {
      let _result = write!(column, "-{short}");
      if self.long.is_some() {
        column.push_str(", ");
      }
    }
    if let Some(long) = self.long {
      let _result = write!(column, "--{long}");
    }
    if let Some(hint) = self.hint {
      if self.long.is_none() {
        column.push(' ');
      }
      let _result = write!(column, "<{hint}>");
    }
    column
  }
}


/// A single option occurrence on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedOption {
  /// The canonical name of the option (see [`OptionSpec::name`]).
  pub flag: String,
  /// The value, for options requiring one.
  pub value: Option<String>,
}

impl ParsedOption {
  fn new(spec: &OptionSpec, value: Option<String>) -> Self {
    Self {
      flag: spec.name(),
      value,
    }
  }
}


/// The result of parsing a command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parsed {
  /// All option occurrences, in the order they were provided.
  pub options: Vec<ParsedOption>,
  /// All arguments that are not options, in order.
  pub operands: Vec<String>,
}


/// An ordered collection of option declarations.
#[derive(Clone, Debug)]
pub struct OptionRegistry {
  /// The program name, as shown in the usage output.
  program: String,
  /// All declarations, including separators, in display order.
  specs: Vec<OptionSpec>,
}

impl OptionRegistry {
  /// Create an empty registry for the program with the given name.
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      specs: Vec::new(),
    }
  }

  /// The program name this registry was created for.
  pub fn program(&self) -> &str {
    &self.program
  }

  /// Append a declaration.
  ///
  /// Declaring a short or long flag that is already known is rejected.
  pub fn declare(&mut self, spec: OptionSpec) -> Result<&mut Self, DuplicateOption> {
    if let Some(short) = spec.short {
      if self.options().any(|other| other.short == Some(short)) {
        return Err(DuplicateOption(format!("-{short}")))
      }
    }

    if let Some(long) = spec.long_name() {
      if self.options().any(|other| other.long_name() == Some(long)) {
        return Err(DuplicateOption(format!("--{long}")))
      }
    }

    let () = self.specs.push(spec);
    Ok(self)
  }

  /// Iterate over all declarations that are not separators.
  pub fn options(&self) -> impl Iterator<Item = &OptionSpec> {
    self.specs.iter().filter(|spec| !spec.is_separator())
  }

  /// Build the `clap` command matching all declarations.
  fn command(&self) -> Command {
    let command = Command::new(self.program.clone())
      .no_binary_name(true)
      .disable_help_flag(true)
      .disable_version_flag(true)
      .infer_long_args(true)
      .arg(
        Arg::new(OPERANDS)
          .action(ArgAction::Append)
          .num_args(1..),
      );

    self.options().fold(command, |command, spec| {
      let mut arg = Arg::new(spec.name()).action(ArgAction::Append);
      if let Some(long) = spec.long_name() {
        arg = arg.long(long);
      }
      if let Some(short) = spec.short {
        arg = arg.short(short);
      }

      // Flags are modeled as options with an optional value that has to
      // be attached with `=`, so that every occurrence is recorded
      // along with its position.
      let arg = if spec.takes_value() {
        let arg = arg.num_args(1).allow_hyphen_values(true);
        match spec.hint {
          Some(hint) => arg.value_name(hint),
          None => arg,
        }
      } else {
        arg
          .num_args(0..=1)
          .require_equals(true)
          .default_missing_value("")
      };
      command.arg(arg)
    })
  }

  /// Translate a parser error into a [`UsageError`].
  fn usage_error(&self, err: &clap::Error) -> UsageError {
    let arg = match err.get(ContextKind::InvalidArg) {
      Some(ContextValue::String(arg)) => arg.clone(),
      _ => String::new(),
    };

    match err.kind() {
      ErrorKind::UnknownArgument => {
        if let Some(name) = arg.strip_prefix("--") {
          let candidates = self
            .options()
            .filter_map(OptionSpec::long_name)
            .filter(|long| !name.is_empty() && long.starts_with(name))
            .map(|long| format!("--{long}"))
            .collect::<Vec<_>>();

          if candidates.len() > 1 {
            return UsageError::AmbiguousOption {
              option: arg,
              candidates: candidates.join(", "),
            }
          }
        }
        UsageError::UnknownOption(arg)
      },
      // Reported for an option lacking its value, with the argument
      // rendered as, e.g., `--host <host>`.
      ErrorKind::InvalidValue => {
        let flag = arg.split_whitespace().next().unwrap_or_default();
        UsageError::MissingValue(flag.to_string())
      },
      kind => UsageError::Malformed(kind.to_string()),
    }
  }

  /// Parse the provided arguments, which must not include the program
  /// name.
  ///
  /// Long options accept their value as `--name value` or
  /// `--name=value`, short ones as `-x value` or `-xvalue`. Unambiguous
  /// prefixes of long options are accepted. Short options not taking a
  /// value may be clustered (`-hv`). Options and operands may be
  /// intermixed; a `--` argument ends option processing.
  pub fn parse<A, T>(&self, args: A) -> Result<Parsed, UsageError>
  where
    A: IntoIterator<Item = T>,
    T: Into<OsString>,
  {
    let args = args
      .into_iter()
      .map(|arg| {
        arg
          .into()
          .into_string()
          .map_err(|arg| UsageError::NotUnicode(arg.to_string_lossy().into_owned()))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let matches = self
      .command()
      .try_get_matches_from(args)
      .map_err(|err| self.usage_error(&err))?;

    let mut occurrences = Vec::new();
    for spec in self.options() {
      let name = spec.name();
      let (Some(values), Some(indices)) = (
        matches.get_many::<String>(&name),
        matches.indices_of(&name),
      ) else {
        continue
      };

      for (value, index) in values.zip(indices) {
        let value = if spec.takes_value() {
          Some(value.clone())
        } else if value.is_empty() {
          None
        } else {
          return Err(UsageError::UnexpectedValue(spec.flag()))
        };
        let () = occurrences.push((index, ParsedOption::new(spec, value)));
      }
    }
    let () = occurrences.sort_by_key(|(index, _option)| *index);

    let parsed = Parsed {
      options: occurrences
        .into_iter()
        .map(|(_index, option)| option)
        .collect(),
      operands: matches
        .get_many::<String>(OPERANDS)
        .map(|operands| operands.cloned().collect())
        .unwrap_or_default(),
    };
    Ok(parsed)
  }

  /// Render the usage text listing all declared options.
  pub fn render_usage(&self) -> String {
    let columns = self
      .specs
      .iter()
      .map(OptionSpec::column)
      .collect::<Vec<_>>();
    let width = columns
      .iter()
      .map(|column| column.chars().count())
      .max()
      .unwrap_or(0)
      .max(20);

    let mut usage = format!("Usage: {} [option]...\n", self.program);
    for (spec, column) in self.specs.iter().zip(&columns) {
      if spec.is_separator() {
        let () = usage.push('\n');
        continue
      }

      let line = format!("{column:>width$}  {}", spec.desc.unwrap_or(""));
      let _result = writeln!(usage, "{}", line.trim_end());
    }
    usage
  }
}
