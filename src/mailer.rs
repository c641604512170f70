/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::{
    config::{Config, Security},
    email::Email,
    smtp::message::Message,
    SmtpClient, SmtpClientBuilder,
};

/// Fixed-delay retry bound applied to connecting and to sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

enum Session {
    Tls(SmtpClient<TlsStream<TcpStream>>),
    Plain(SmtpClient<TcpStream>),
}

impl Session {
    async fn send(&mut self, message: &Message) -> crate::Result<()> {
        match self {
            Session::Tls(client) => client.send(message).await,
            Session::Plain(client) => client.send(message).await,
        }
    }

    async fn rset(&mut self) -> crate::Result<()> {
        match self {
            Session::Tls(client) => client.rset().await,
            Session::Plain(client) => client.rset().await,
        }
    }

    async fn quit(self) -> crate::Result<()> {
        match self {
            Session::Tls(client) => client.quit().await,
            Session::Plain(client) => client.quit().await,
        }
    }
}

/// Sends e-mail through one authenticated session with the submission server.
///
/// The session is released by [`Mailer::close`]; a mailer dropped while
/// still connected closes the socket without saying QUIT.
pub struct Mailer {
    config: Config,
    builder: SmtpClientBuilder<String>,
    retry: Retry,
    session: Option<Session>,
}

impl Mailer {
    pub fn new(config: Config) -> Self {
        let builder = SmtpClientBuilder::new(config.server().to_string(), config.port())
            .implicit_tls(config.security() == Security::Tls)
            .timeout(config.timeout())
            .credentials((config.account().to_string(), config.credential().to_string()));

        Mailer {
            config,
            builder,
            retry: Retry::default(),
            session: None,
        }
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the host name announced in EHLO.
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.builder.local_host = host.into();
        self
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Opens and authenticates the session, retrying on failure.
    pub async fn connect(&mut self) -> bool {
        if self.session.is_some() {
            return true;
        }

        for attempt in 1..=self.retry.attempts {
            match self.open().await {
                Ok(session) => {
                    tracing::info!(
                        server = self.config.server(),
                        port = self.config.port(),
                        "Connected to SMTP server"
                    );
                    self.session = Some(session);
                    return true;
                }
                Err(err) => {
                    tracing::error!(attempt, error = %err, "Connection attempt failed");
                    if attempt < self.retry.attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        false
    }

    /// Sends `email`, retrying the submission on failure.
    ///
    /// The message is composed once; attachments that cannot be read are
    /// logged and left out. Never fails: the outcome is the returned flag.
    pub async fn send(&mut self, email: &Email) -> bool {
        let attachments = email.load_attachments().await;
        let message = match email.compose(self.config.account(), &attachments) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(error = %err, "Failed to compose message");
                return false;
            }
        };
        let recipients = email.recipients().join(", ");

        for attempt in 1..=self.retry.attempts {
            match self.submit(&message).await {
                Ok(()) => {
                    tracing::info!(%recipients, "Message sent");
                    return true;
                }
                Err(err) => {
                    tracing::error!(attempt, error = %err, "Send attempt failed");
                    if attempt < self.retry.attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        false
    }

    /// Says QUIT and releases the session. Errors are logged, never returned.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            match session.quit().await {
                Ok(()) => tracing::info!("SMTP connection closed"),
                Err(err) => tracing::error!(error = %err, "Failed to close SMTP connection"),
            }
        }
    }

    async fn open(&self) -> crate::Result<Session> {
        match self.config.security() {
            Security::Tls | Security::StartTls => self.builder.connect().await.map(Session::Tls),
            Security::Plain => self.builder.connect_plain().await.map(Session::Plain),
        }
    }

    async fn submit(&mut self, message: &Message) -> crate::Result<()> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                tracing::debug!("No open session, reconnecting");
                self.open().await?
            }
        };

        match session.send(message).await {
            Ok(()) => {
                self.session = Some(session);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                // Rejected by the server but the session is still usable
                if session.rset().await.is_ok() {
                    self.session = Some(session);
                }
                Err(err)
            }
        }
    }
}

impl Drop for Mailer {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            tracing::warn!("Mailer dropped without close, SMTP connection released");
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
    };
    use tracing_test::traced_test;

    use super::{Mailer, Retry};
    use crate::{Config, Email, Security};

    #[derive(Debug, Default, Clone)]
    struct Received {
        mail_from: String,
        rcpt_to: Vec<String>,
        data: String,
    }

    #[derive(Clone, Copy, Default)]
    struct Behaviour {
        // Reply code to the first n DATA terminations
        reject_data: usize,
        reject_code: u16,
        // Drop the connection on the first n DATA commands
        hang_up_data: usize,
    }

    struct MockServer {
        port: u16,
        received: Arc<Mutex<Vec<Received>>>,
        sessions: Arc<AtomicUsize>,
    }

    impl MockServer {
        fn delivered(&self) -> usize {
            self.received.lock().unwrap().len()
        }

        fn sessions(&self) -> usize {
            self.sessions.load(Ordering::SeqCst)
        }
    }

    /// Minimal submission server accepting AUTH PLAIN and recording messages.
    async fn mock_server(behaviour: Behaviour) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sessions = Arc::new(AtomicUsize::new(0));
        let rejections = Arc::new(AtomicUsize::new(0));
        let hang_ups = Arc::new(AtomicUsize::new(0));

        let store = received.clone();
        let accepted = sessions.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let store = store.clone();
                let rejections = rejections.clone();
                let hang_ups = hang_ups.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut lines = BufReader::new(reader).lines();
                    let mut current = Received::default();

                    writer.write_all(b"220 mock ESMTP\r\n").await.unwrap();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let upper = line.to_ascii_uppercase();
                        let reply: String = if upper.starts_with("EHLO") {
                            "250-mock\r\n250 AUTH PLAIN\r\n".into()
                        } else if upper.starts_with("AUTH PLAIN") {
                            "235 2.7.0 Authentication successful\r\n".into()
                        } else if upper.starts_with("MAIL FROM:") {
                            current = Received {
                                mail_from: line[10..].trim_matches(&['<', '>'][..]).into(),
                                ..Default::default()
                            };
                            "250 OK\r\n".into()
                        } else if upper.starts_with("RCPT TO:") {
                            current
                                .rcpt_to
                                .push(line[8..].trim_matches(&['<', '>'][..]).into());
                            "250 OK\r\n".into()
                        } else if upper == "DATA" {
                            if hang_ups.fetch_add(1, Ordering::SeqCst) < behaviour.hang_up_data {
                                break;
                            }
                            writer.write_all(b"354 Go ahead\r\n").await.unwrap();
                            while let Ok(Some(line)) = lines.next_line().await {
                                if line == "." {
                                    break;
                                }
                                current.data.push_str(&line);
                                current.data.push('\n');
                            }
                            if rejections.fetch_add(1, Ordering::SeqCst) < behaviour.reject_data {
                                format!("{} Try again later\r\n", behaviour.reject_code)
                            } else {
                                store.lock().unwrap().push(std::mem::take(&mut current));
                                "250 Queued\r\n".into()
                            }
                        } else if upper == "RSET" {
                            current = Received::default();
                            "250 OK\r\n".into()
                        } else if upper == "QUIT" {
                            writer.write_all(b"221 Bye\r\n").await.unwrap();
                            break;
                        } else {
                            "502 Unknown command\r\n".into()
                        };
                        if writer.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        MockServer {
            port,
            received,
            sessions,
        }
    }

    fn config(port: u16) -> Config {
        Config::new("127.0.0.1", port, "john@example.com", "p4ssw0rd")
            .unwrap()
            .with_security(Security::Plain)
            .with_timeout(Duration::from_secs(5))
    }

    fn fast_retry() -> Retry {
        Retry {
            attempts: 3,
            delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn send_end_to_end() {
        let server = mock_server(Behaviour::default()).await;

        let mut mailer = Mailer::new(config(server.port))
            .with_retry(fast_retry())
            .helo_host("client.example.org");
        assert!(mailer.connect().await);
        assert!(
            mailer
                .send(&Email::new("Hi!", "Hello world!").to("jane@example.com"))
                .await
        );
        mailer.close().await;
        assert!(!mailer.is_connected());

        let received = server.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].mail_from, "john@example.com");
        assert_eq!(received[0].rcpt_to, vec!["jane@example.com".to_string()]);
        assert!(received[0].data.contains("Subject: Hi!"));
        assert!(received[0].data.contains("Hello world!"));
    }

    #[tokio::test]
    async fn envelope_includes_cc_and_bcc() {
        let server = mock_server(Behaviour::default()).await;

        let mut mailer = Mailer::new(config(server.port)).with_retry(fast_retry());
        assert!(mailer.connect().await);
        assert!(
            mailer
                .send(
                    &Email::new("Certificate", "Attached")
                        .html_body("<h1>Congratulations!</h1>")
                        .to("jane@example.com")
                        .cc("support@example.com")
                        .bcc("audit@example.com")
                )
                .await
        );
        mailer.close().await;

        let received = server.received.lock().unwrap();
        assert_eq!(
            received[0].rcpt_to,
            vec![
                "jane@example.com".to_string(),
                "support@example.com".to_string(),
                "audit@example.com".to_string()
            ]
        );
        assert!(received[0].data.contains("text/html"));
        assert!(!received[0].data.contains("audit@example.com"));
    }

    #[tokio::test]
    #[traced_test]
    async fn send_retries_rejected_message() {
        let server = mock_server(Behaviour {
            reject_data: 2,
            reject_code: 451,
            ..Default::default()
        })
        .await;

        let mut mailer = Mailer::new(config(server.port)).with_retry(fast_retry());
        assert!(mailer.connect().await);
        assert!(
            mailer
                .send(&Email::new("Hi!", "Hello world!").to("jane@example.com"))
                .await
        );
        mailer.close().await;

        assert_eq!(server.delivered(), 1);
        assert_eq!(server.sessions(), 1);
        assert!(logs_contain("Send attempt failed"));
    }

    #[tokio::test]
    async fn send_gives_up_after_retries() {
        let server = mock_server(Behaviour {
            reject_data: usize::MAX,
            reject_code: 554,
            ..Default::default()
        })
        .await;

        let mut mailer = Mailer::new(config(server.port)).with_retry(fast_retry());
        assert!(mailer.connect().await);
        assert!(
            !mailer
                .send(&Email::new("Hi!", "Hello world!").to("jane@example.com"))
                .await
        );
        mailer.close().await;

        assert_eq!(server.delivered(), 0);
    }

    #[tokio::test]
    async fn send_without_recipients_fails_fast() {
        let server = mock_server(Behaviour::default()).await;

        let mut mailer = Mailer::new(config(server.port)).with_retry(Retry {
            attempts: 3,
            delay: Duration::from_secs(60),
        });
        assert!(mailer.connect().await);
        let sent = tokio::time::timeout(
            Duration::from_secs(5),
            mailer.send(&Email::new("Hi!", "Hello world!")),
        )
        .await
        .expect("no retry delay expected");
        assert!(!sent);
        mailer.close().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn send_reconnects_after_dropped_session() {
        let server = mock_server(Behaviour {
            hang_up_data: 1,
            ..Default::default()
        })
        .await;

        let mut mailer = Mailer::new(config(server.port)).with_retry(fast_retry());
        assert!(mailer.connect().await);
        assert!(
            mailer
                .send(&Email::new("Hi!", "Hello world!").to("jane@example.com"))
                .await
        );
        assert!(mailer.is_connected());
        mailer.close().await;

        assert_eq!(server.sessions(), 2);
        assert_eq!(server.delivered(), 1);
        assert!(logs_contain("Send attempt failed"));
        assert!(logs_contain("No open session, reconnecting"));
    }

    #[tokio::test]
    async fn send_without_connect_opens_session() {
        let server = mock_server(Behaviour::default()).await;

        let mut mailer = Mailer::new(config(server.port)).with_retry(fast_retry());
        assert!(!mailer.is_connected());
        assert!(
            mailer
                .send(&Email::new("Hi!", "Hello world!").to("jane@example.com"))
                .await
        );
        assert!(mailer.is_connected());
        mailer.close().await;

        assert_eq!(server.sessions(), 1);
        assert_eq!(server.delivered(), 1);
        assert_eq!(server.received.lock().unwrap()[0].mail_from, "john@example.com");
    }

    #[tokio::test]
    #[traced_test]
    async fn connect_gives_up_after_three_attempts() {
        // Accepts connections and hangs up before the greeting
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        let mut mailer = Mailer::new(config(port)).with_retry(fast_retry());
        assert!(!mailer.connect().await);
        assert!(!mailer.is_connected());
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
        assert!(logs_contain("Connection attempt failed"));
    }

    #[tokio::test]
    async fn connect_waits_between_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut mailer = Mailer::new(config(port)).with_retry(Retry {
            attempts: 3,
            delay: Duration::from_millis(100),
        });
        let started = std::time::Instant::now();
        assert!(!mailer.connect().await);
        // Two waits: none after the last attempt
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn close_without_connection() {
        let mut mailer = Mailer::new(config(1));
        mailer.close().await;
        mailer.close().await;
        assert!(!mailer.is_connected());
    }
}
