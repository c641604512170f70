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

//! # mail-dispatch
//!
//! _mail-dispatch_ sends a single e-mail message through an authenticated SMTP
//! submission server. It includes the following features:
//!
//! - Configuration read from the environment (and an optional `.env` file).
//! - Multipart **MIME** messages with a plain text body, an optional HTML
//!   alternative and file attachments typed by extension.
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) submission over
//!   implicit TLS or **STARTTLS** (_RFC 3207_).
//! - SMTP Authentication (_RFC 4954_) with automatic mechanism negotiation
//!   (CRAM-MD5, LOGIN and PLAIN).
//! - Bounded retries with a fixed delay around both connecting and sending.
//!
//! ## Usage Example
//!
//! ```rust
//!     let config = Config::from_env()?;
//!
//!     let email = Email::new("Hi!", "Hello world!")
//!         .html_body("<h1>Hello, world!</h1>")
//!         .sender_name("John Doe")
//!         .to("jane@example.com")
//!         .cc("james@test.com")
//!         .attachment("./pretzels.png");
//!
//!     let mut mailer = Mailer::new(config);
//!     if mailer.connect().await {
//!         mailer.send(&email).await;
//!     }
//!     mailer.close().await;
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod config;
pub mod email;
pub mod logging;
pub mod mailer;
pub mod smtp;

use std::{fmt::Display, time::Duration};

pub use config::{Config, Security};
pub use email::Email;
pub use mail_builder;
pub use mailer::{Mailer, Retry};
use smtp_proto::Response;
use tokio_rustls::TlsConnector;

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    /// SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Missing message sender.
    MissingMailFrom,

    /// Missing message recipients.
    MissingRcptTo,

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Connection timeout.
    Timeout,

    /// STARTTLS not available
    MissingStartTls,
}

impl Error {
    /// Whether the session that produced this error can no longer be used.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::UnexpectedReply(_)
                | Error::MissingMailFrom
                | Error::MissingRcptTo
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client connection.
pub struct SmtpClient<T> {
    pub stream: T,
    pub timeout: Duration,
}

/// Connection parameters for an SMTP session.
#[derive(Clone)]
pub struct SmtpClientBuilder<T: AsRef<str>> {
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: T,
    pub tls_implicit: bool,
    pub credentials: Option<Credentials<T>>,
    pub addr: String,
    pub local_host: String,
}

/// Account name and secret used to authenticate the session.
#[derive(Clone)]
pub struct Credentials<T: AsRef<str>> {
    pub username: T,
    pub secret: T,
}

impl<T: AsRef<str>> Credentials<T> {
    pub fn new(username: T, secret: T) -> Credentials<T> {
        Credentials { username, secret }
    }
}

impl<T: AsRef<str>> From<(T, T)> for Credentials<T> {
    fn from((username, secret): (T, T)) -> Self {
        Credentials { username, secret }
    }
}

impl<T: AsRef<str>> std::fmt::Debug for Credentials<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username.as_ref())
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Tls(err) => Some(err.as_ref()),
            Error::Base64(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => {
                write!(f, "Unexpected reply: {} {}", e.code(), e.message())
            }
            Error::AuthenticationFailed(e) => {
                write!(f, "Authentication failed: {} {}", e.code(), e.message())
            }
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::MissingMailFrom => write!(f, "Missing message sender"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::Timeout => write!(f, "Connection timeout"),
            Error::MissingStartTls => write!(f, "STARTTLS extension unavailable"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}
