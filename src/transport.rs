// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::Tls;
use lettre::transport::smtp::client::TlsParameters;
use lettre::AsyncSmtpTransport;
use lettre::AsyncTransport as _;
use lettre::Message;
use lettre::Tokio1Executor;

use crate::AuthConfig;
use crate::Error;
use crate::SubmissionConfig;
use crate::TransportConfig;


fn tls_parameters(host: &str) -> Result<TlsParameters, Error> {
  TlsParameters::new(host.to_string()).map_err(|source| Error::Transport {
    host: host.to_string(),
    source,
  })
}


/// Create a mailer for the configured SMTP server.
///
/// SSL takes precedence over STARTTLS: a connection that is encrypted
/// from the start is not upgraded again. Credentials are only used if
/// both user and password are present.
pub fn mailer(
  transport: &TransportConfig,
  auth: &AuthConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, Error> {
  let tls = if transport.use_ssl {
    Tls::Wrapper(tls_parameters(&transport.host)?)
  } else if transport.use_tls {
    Tls::Required(tls_parameters(&transport.host)?)
  } else {
    Tls::None
  };

  let mut builder =
    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(transport.host.as_str())
      .port(transport.port)
      .tls(tls);

  if let Some((user, pass)) = auth.credentials() {
    builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
  }

  Ok(builder.build())
}

/// Submit `message` to the configured SMTP server.
///
/// A single connection is used: greeting, optional STARTTLS followed
/// by a second greeting, optional authentication, the envelope and
/// data, and finally QUIT. The envelope recipients are all "To" and
/// "Cc" addresses of the message.
#[cfg_attr(
  feature = "tracing",
  tracing::instrument(
    skip_all,
    fields(host = config.transport.host.as_str(), port = config.transport.port),
    err
  )
)]
pub async fn submit(config: &SubmissionConfig, message: Message) -> Result<(), Error> {
  let SubmissionConfig {
    transport, auth, ..
  } = config;

  let mailer = mailer(transport, auth)?;
  #[cfg(feature = "tracing")]
  tracing::debug!(
    ssl = transport.use_ssl,
    tls = transport.use_tls,
    auth = auth.credentials().is_some(),
    recipients = message.envelope().to().len(),
    "submitting message"
  );

  let _response = mailer
    .send(message)
    .await
    .map_err(|source| Error::Transport {
      host: transport.host.clone(),
      source,
    })?;
  Ok(())
}


#[cfg(test)]
mod tests {
  use super::*;

  use tokio::io::AsyncBufReadExt as _;
  use tokio::io::AsyncWriteExt as _;
  use tokio::io::BufReader;
  use tokio::net::TcpListener;
  use tokio::spawn;
  use tokio::test;

  use crate::build_message;


  /// How the fake server behaves.
  #[derive(Clone, Copy, Default)]
  struct Behavior {
    /// Reject all recipients.
    reject_rcpt: bool,
    /// Advertise and accept `AUTH PLAIN`.
    offer_auth: bool,
    /// Reject any authentication attempt.
    reject_auth: bool,
  }


  /// Serve a single SMTP session on `listener`, returning all commands
  /// received outside of the data phase.
  async fn fake_server(listener: TcpListener, behavior: Behavior) -> Vec<String> {
    let (stream, _addr) = listener.accept().await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut commands = Vec::new();
    let mut data = false;
    let mut line = String::new();

    let _result = writer.write_all(b"220 localhost ESMTP ready\r\n").await;

    loop {
      let () = line.clear();
      let count = reader.read_line(&mut line).await.unwrap_or(0);
      if count == 0 {
        break
      }

      if data {
        if line == ".\r\n" {
          data = false;
          let _result = writer.write_all(b"250 2.0.0 queued\r\n").await;
        }
        continue
      }

      let command = line.trim_end().to_string();
      let verb = command
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
      let reply: &[u8] = match verb.as_str() {
        "EHLO" if behavior.offer_auth => b"250-localhost\r\n250 AUTH PLAIN\r\n",
        "EHLO" | "HELO" => b"250 localhost\r\n",
        "AUTH" if behavior.reject_auth => b"535 5.7.8 authentication credentials invalid\r\n",
        "AUTH" => b"235 2.7.0 authentication successful\r\n",
        "MAIL" | "RSET" => b"250 2.1.0 ok\r\n",
        "RCPT" if behavior.reject_rcpt => b"550 5.1.1 mailbox unavailable\r\n",
        "RCPT" => b"250 2.1.5 ok\r\n",
        "DATA" => {
          data = true;
          b"354 end data with <CR><LF>.<CR><LF>\r\n"
        },
        "QUIT" => b"221 2.0.0 bye\r\n",
        _ => b"502 5.5.2 command not recognized\r\n",
      };

      let () = commands.push(command);
      let _result = writer.write_all(reply).await;

      if verb == "QUIT" {
        break
      }
    }
    commands
  }

  async fn listen() -> (TcpListener, TransportConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let transport = TransportConfig {
      host: "127.0.0.1".to_string(),
      port: listener.local_addr().unwrap().port(),
      ..Default::default()
    };
    (listener, transport)
  }

  fn submission(transport: TransportConfig) -> (SubmissionConfig, Message) {
    let mut config = SubmissionConfig {
      transport,
      ..Default::default()
    };
    for (flag, value) in [
      ("from", "sender@example.com"),
      ("to", "a@example.com"),
      ("to", "b@example.com"),
      ("cc", "c@example.com"),
      ("subject", "test"),
    ] {
      let () = config.apply(flag, Some(value)).unwrap();
    }

    let message = build_message(&config.message, b"Hello!\n", &[]).unwrap();
    (config, message)
  }


  /// Check that credentials are only used when complete.
  #[test]
  async fn credentials_usage() {
    let auth = AuthConfig {
      required: true,
      user: Some("user".to_string()),
      pass: None,
    };
    assert_eq!(auth.credentials(), None);

    let auth = AuthConfig {
      pass: Some(String::new()),
      ..auth
    };
    assert_eq!(auth.credentials(), None);

    let _mailer = mailer(&TransportConfig::default(), &auth).unwrap();
  }

  /// Check that we can send a message to a plain text SMTP server and
  /// that all "To" and "Cc" recipients end up in the envelope.
  #[test]
  async fn submit_plain() {
    let (listener, transport) = listen().await;
    let server = spawn(fake_server(listener, Behavior::default()));

    let (config, message) = submission(transport);
    let () = submit(&config, message).await.unwrap();

    let commands = server.await.unwrap();
    assert!(commands[0].starts_with("EHLO "), "{commands:?}");
    assert!(
      commands
        .iter()
        .any(|command| command.starts_with("MAIL FROM:<sender@example.com>")),
      "{commands:?}"
    );
    for recipient in ["a@example.com", "b@example.com", "c@example.com"] {
      let rcpt = format!("RCPT TO:<{recipient}>");
      assert!(
        commands.iter().any(|command| command.starts_with(&rcpt)),
        "{commands:?}"
      );
    }
    assert!(commands.iter().any(|command| command == "DATA"), "{commands:?}");
    assert!(
      !commands.iter().any(|command| command.starts_with("AUTH")),
      "{commands:?}"
    );
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
  }

  /// Check that a rejection by the server is reported along with its
  /// reason.
  #[test]
  async fn submit_rejected() {
    let (listener, transport) = listen().await;
    let server = spawn(fake_server(
      listener,
      Behavior {
        reject_rcpt: true,
        ..Default::default()
      },
    ));

    let (config, message) = submission(transport);
    let err = submit(&config, message).await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }), "{err:?}");
    assert!(err.to_string().contains("550"), "{err}");

    let commands = server.await.unwrap();
    assert!(
      !commands.iter().any(|command| command == "DATA"),
      "{commands:?}"
    );
  }

  /// Check that we authenticate when user and password are present.
  #[test]
  async fn submit_authenticated() {
    let (listener, transport) = listen().await;
    let server = spawn(fake_server(
      listener,
      Behavior {
        offer_auth: true,
        ..Default::default()
      },
    ));

    let (mut config, message) = submission(transport);
    let () = config.apply("user", Some("user")).unwrap();
    let () = config.apply("pass", Some("secret")).unwrap();
    let () = submit(&config, message).await.unwrap();

    let commands = server.await.unwrap();
    let auth = commands
      .iter()
      .position(|command| command == "AUTH PLAIN AHVzZXIAc2VjcmV0")
      .unwrap_or_else(|| panic!("{commands:?}"));
    let mail = commands
      .iter()
      .position(|command| command.starts_with("MAIL FROM:"))
      .unwrap_or_else(|| panic!("{commands:?}"));
    assert!(auth < mail, "{commands:?}");
  }

  /// Check that rejected credentials are reported along with the
  /// server's reason.
  #[test]
  async fn submit_auth_rejected() {
    let (listener, transport) = listen().await;
    let server = spawn(fake_server(
      listener,
      Behavior {
        offer_auth: true,
        reject_auth: true,
        ..Default::default()
      },
    ));

    let (mut config, message) = submission(transport);
    let () = config.apply("user", Some("user")).unwrap();
    let () = config.apply("pass", Some("wrong")).unwrap();
    let err = submit(&config, message).await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }), "{err:?}");
    assert!(err.to_string().contains("535"), "{err}");

    let commands = server.await.unwrap();
    assert!(
      !commands.iter().any(|command| command.starts_with("MAIL")),
      "{commands:?}"
    );
  }

  /// Check that STARTTLS is not silently skipped when the server does
  /// not offer it.
  #[test]
  async fn submit_starttls_unsupported() {
    let (listener, mut transport) = listen().await;
    transport.use_tls = true;
    let server = spawn(fake_server(listener, Behavior::default()));

    let (config, message) = submission(transport);
    let err = submit(&config, message).await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }), "{err:?}");

    let commands = server.await.unwrap();
    assert!(
      !commands.iter().any(|command| command.starts_with("MAIL")),
      "{commands:?}"
    );
  }

  /// Check that a refused connection is reported as a transport error.
  #[test]
  async fn submit_connection_refused() {
    let (listener, transport) = listen().await;
    let () = drop(listener);

    let (config, message) = submission(transport);
    let err = submit(&config, message).await.unwrap_err();
    match err {
      Error::Transport { host, .. } => assert_eq!(host, "127.0.0.1"),
      err => panic!("unexpected error: {err:?}"),
    }
  }
}
