// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

#![allow(
  clippy::collapsible_if,
  clippy::let_and_return,
  clippy::let_unit_value
)]

mod args;
mod util;

use std::env::args_os;
use std::env::var_os;
use std::ffi::OsString;
use std::future::pending;
use std::io;
use std::io::IsTerminal as _;
use std::io::Write;
use std::process::ExitCode;

use anyhow::Context as _;
use anyhow::Error;
use anyhow::Result;

use colored::control::set_override as set_color_override;
use colored::Colorize as _;

use postmail::compose;
use postmail::submit;
use postmail::OptionRegistry;

use tokio::runtime::Builder;
use tokio::signal::ctrl_c;
use tokio::task::spawn_blocking;

use tracing::info;
use tracing::subscriber::set_default as set_default_subscriber;
use tracing::subscriber::DefaultGuard;
use tracing::warn;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::FmtSubscriber;

use crate::args::configure;
use crate::args::mail_options;
use crate::args::Command;
use crate::args::Submission;
use crate::util::program_name;
use crate::util::TerminalState;


async fn run_impl(submission: Submission) -> Result<()> {
  let Submission {
    config,
    verbosity,
    operands,
  } = submission;

  let _guard = setup_tracing(verbosity)?;

  for operand in operands {
    warn!(operand = operand.as_str(), "ignoring positional argument");
  }

  // Prompting for a password blocks. Do so off the runtime so that an
  // interrupt is still noticed.
  let config = spawn_blocking(move || {
    let mut config = config;
    config.validate().map(|()| config)
  })
  .await
  .context("failed to join configuration validation task")??;

  let message = compose(&config.message).await?;
  let () = submit(&config, message).await?;

  info!(host = config.transport.host.as_str(), "message submitted");
  Ok(())
}

/// Set up the tracing subscriber for the current thread.
///
/// All our work happens on a single thread, so the subscriber stays in
/// place for as long as the returned guard is alive.
fn setup_tracing(verbosity: u8) -> Result<DefaultGuard> {
  let builder = FmtSubscriber::builder()
    .with_writer(io::stderr)
    .with_timer(ChronoLocal::new("%Y-%m-%dT%H:%M:%S%.3f%:z".to_string()));

  let guard = if verbosity != 0 {
    let level = match verbosity {
      0 => LevelFilter::WARN,
      1 => LevelFilter::INFO,
      2 => LevelFilter::DEBUG,
      _ => LevelFilter::TRACE,
    };
    let subscriber = builder.with_max_level(level).finish();
    set_default_subscriber(subscriber)
  } else {
    let directive = var_os(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let directive = directive
      .to_str()
      .with_context(|| format!("env var `{}` is not valid UTF-8", EnvFilter::DEFAULT_ENV))?;

    let subscriber = builder.with_env_filter(EnvFilter::new(directive)).finish();
    set_default_subscriber(subscriber)
  };
  Ok(guard)
}


/// Report an error in the form befitting its kind.
///
/// Failures reported by the SMTP server are highlighted in red, all
/// others in yellow. Errors caused by the command line are followed by
/// the usage text.
fn report(err: &Error, registry: Option<&OptionRegistry>, stderr: &mut dyn Write) {
  let _result = match err.downcast_ref::<postmail::Error>() {
    Some(err @ postmail::Error::Transport { .. }) => {
      writeln!(stderr, "{}", err.to_string().red())
    },
    Some(err) => writeln!(stderr, "{}", err.to_string().yellow()).and_then(|()| {
      match registry.filter(|_| err.shows_usage()) {
        Some(registry) => write!(stderr, "\n{}", registry.render_usage()),
        None => Ok(()),
      }
    }),
    None => writeln!(stderr, "{}", format!("{err:#}").yellow()),
  };
}

/// Wait for the user to interrupt us.
async fn interrupted() {
  if ctrl_c().await.is_err() {
    // Without a signal handler the default disposition applies and
    // there is nothing for us to wait for.
    pending::<()>().await
  }
}


/// Run the program and report errors, if any, returning the exit
/// status.
async fn run<A, T>(args: A, stdout: &mut dyn Write, stderr: &mut dyn Write) -> u8
where
  A: IntoIterator<Item = T>,
  T: Into<OsString>,
{
  let mut args = args.into_iter().map(Into::<OsString>::into);
  let arg0 = args.next();
  let program = program_name(arg0.as_deref());

  let registry = match mail_options(&program) {
    Ok(registry) => registry,
    Err(err) => {
      let () = report(&Error::from(err), None, stderr);
      return 1
    },
  };

  // The password prompt disables echoing on the terminal. Capture its
  // state beforehand so that we can undo that when interrupted.
  let terminal = TerminalState::capture();

  let work = async {
    match configure(&registry, args)? {
      Command::Help => {
        let () = write!(stdout, "{}", registry.render_usage())?;
        Result::<_, Error>::Ok(())
      },
      Command::Version => {
        let () = writeln!(stdout, "{program} {}", env!("CARGO_PKG_VERSION"))?;
        Ok(())
      },
      Command::Submit(submission) => run_impl(submission).await,
    }
  };

  tokio::select! {
    result = work => match result {
      Ok(()) => 0,
      Err(err) => {
        let () = report(&err, Some(&registry), stderr);
        1
      },
    },
    () = interrupted() => {
      if let Some(terminal) = &terminal {
        let _result = terminal.restore();
      }
      0
    },
  }
}


fn main() -> ExitCode {
  let () = set_color_override(io::stderr().is_terminal());

  let runtime = match Builder::new_current_thread().enable_all().build() {
    Ok(runtime) => runtime,
    Err(err) => {
      let err = Error::from(err).context("failed to create tokio runtime");
      let () = report(&err, None, &mut io::stderr());
      return ExitCode::FAILURE
    },
  };

  let code = runtime.block_on(run(args_os(), &mut io::stdout(), &mut io::stderr()));
  // A pending password prompt or read of standard input may still
  // occupy a blocking thread after an interrupt. Do not wait for it.
  let () = runtime.shutdown_background();
  ExitCode::from(code)
}


#[cfg(test)]
mod tests {
  use super::*;

  use std::iter::once;
  use std::net::TcpListener;

  use tokio::test;


  /// Run the program with the given arguments, capturing its output.
  async fn run_captured(args: &[&str]) -> (u8, String, String) {
    let () = set_color_override(true);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let args = once("postmail").chain(args.iter().copied());
    let code = run(args, &mut stdout, &mut stderr).await;
    let stdout = String::from_utf8(stdout).unwrap();
    let stderr = String::from_utf8(stderr).unwrap();
    (code, stdout, stderr)
  }

  /// Find a local port nobody is listening on.
  fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
  }


  /// Check that an unknown option fails and is followed by the usage
  /// text on stderr.
  #[test]
  async fn unknown_option() {
    let (code, stdout, stderr) = run_captured(&["--bogus"]).await;
    assert_eq!(code, 1);
    assert_eq!(stdout, "");
    assert!(stderr.contains("\x1b[33munrecognized option `--bogus`"), "{stderr}");
    assert!(stderr.contains("\n\nUsage: postmail [option]...\n"), "{stderr}");
  }

  /// Check that help goes to stdout and nothing is sent.
  #[test]
  async fn help() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let () = listener.set_nonblocking(true).unwrap();
    let port = listener.local_addr().unwrap().port().to_string();

    let args = [
      "--host",
      "127.0.0.1",
      "--port",
      port.as_str(),
      "--to",
      "a@example.com",
      "--help",
    ];
    let (code, stdout, stderr) = run_captured(&args).await;
    assert_eq!(code, 0);
    assert!(stdout.starts_with("Usage: postmail [option]...\n"), "{stdout}");
    assert_eq!(stderr, "");

    let err = listener.accept().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
  }

  /// Check that the version is printed on stdout.
  #[test]
  async fn version() {
    let (code, stdout, stderr) = run_captured(&["-V"]).await;
    assert_eq!(code, 0);
    assert_eq!(stdout, format!("postmail {}\n", env!("CARGO_PKG_VERSION")));
    assert_eq!(stderr, "");
  }

  /// Check that an incomplete configuration is reported along with
  /// the usage text.
  #[test]
  async fn missing_recipients() {
    let (code, _stdout, stderr) = run_captured(&["--from", "sender@example.com"]).await;
    assert_eq!(code, 1);
    assert!(stderr.starts_with("\x1b[33m"), "{stderr}");
    assert!(stderr.contains("Usage: postmail"), "{stderr}");
  }

  /// Check that an unreadable attachment is reported without usage
  /// text.
  #[test]
  async fn attachment_error() {
    let args = [
      "--from",
      "sender@example.com",
      "--to",
      "a@example.com",
      "--body",
      concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"),
      "--attach",
      concat!(env!("CARGO_MANIFEST_DIR"), "/does-not-exist.pdf"),
    ];
    let (code, _stdout, stderr) = run_captured(&args).await;
    assert_eq!(code, 1);
    assert!(stderr.starts_with("\x1b[33mfailed to read attachment"), "{stderr}");
    assert!(stderr.contains("does-not-exist.pdf"), "{stderr}");
    assert!(!stderr.contains("Usage:"), "{stderr}");
  }

  /// Check that a transport failure is reported in red and without
  /// usage text.
  #[test]
  async fn transport_error() {
    let port = closed_port().to_string();
    let args = [
      "--host",
      "127.0.0.1",
      "--port",
      port.as_str(),
      "--from",
      "sender@example.com",
      "--to",
      "a@example.com",
      "--body",
      concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"),
    ];
    let (code, _stdout, stderr) = run_captured(&args).await;
    assert_eq!(code, 1);
    assert!(
      stderr.starts_with("\x1b[31mfailed to send email via 127.0.0.1"),
      "{stderr}"
    );
    assert!(!stderr.contains("Usage:"), "{stderr}");
  }

  /// Check that errors not originating in the library are reported
  /// with their full chain of causes.
  #[test]
  async fn report_foreign_error() {
    let () = set_color_override(true);

    let err = Error::msg("root cause").context("failed to do something");
    let mut stderr = Vec::new();
    let () = report(&err, None, &mut stderr);
    assert_eq!(
      String::from_utf8(stderr).unwrap(),
      "\x1b[33mfailed to do something: root cause\x1b[0m\n"
    );
  }
}
