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

//! Submission server settings read from the environment.
//!
//! | Variable         | Default       |
//! |------------------|---------------|
//! | `SMTP_SERVER`    | `smtp.qq.com` |
//! | `SMTP_PORT`      | `465`         |
//! | `EMAIL`          | required      |
//! | `EMAIL_PASSWORD` | required      |
//! | `SMTP_SECURITY`  | `tls`         |
//! | `SMTP_TIMEOUT`   | `60` seconds  |

use std::{fmt::Display, str::FromStr, time::Duration};

pub const DEFAULT_SERVER: &str = "smtp.qq.com";
pub const DEFAULT_PORT: u16 = 465;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required variable is unset or blank.
    Missing(&'static str),

    /// A variable holds a value that cannot be parsed.
    Invalid { var: &'static str, value: String },
}

/// How the connection to the server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// TLS from the first byte (port 465).
    #[default]
    Tls,

    /// Plain connection upgraded with STARTTLS (port 587).
    StartTls,

    /// No encryption. Only meant for local relays and testing.
    Plain,
}

#[derive(Clone)]
pub struct Config {
    server: String,
    port: u16,
    account: String,
    credential: String,
    security: Security,
    timeout: Duration,
}

impl Config {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, Error> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded environment file");
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let value = |var: &str| {
            lookup(var)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let server = value("SMTP_SERVER").unwrap_or_else(|| DEFAULT_SERVER.to_string());
        let port = parse_or("SMTP_PORT", value("SMTP_PORT"), DEFAULT_PORT)?;
        let security = parse_or("SMTP_SECURITY", value("SMTP_SECURITY"), Security::Tls)?;
        let timeout = value("SMTP_TIMEOUT")
            .map(|value| {
                value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| Error::Invalid {
                        var: "SMTP_TIMEOUT",
                        value,
                    })
            })
            .transpose()?
            .unwrap_or(DEFAULT_TIMEOUT);

        Config::new(
            server,
            port,
            value("EMAIL").unwrap_or_default(),
            // Surrounding whitespace may be part of the secret
            lookup("EMAIL_PASSWORD").unwrap_or_default(),
        )
        .map(|config| config.with_security(security).with_timeout(timeout))
    }

    /// Creates a configuration, rejecting a blank account or credential.
    pub fn new(
        server: impl Into<String>,
        port: u16,
        account: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<Self, Error> {
        let account = account.into();
        let credential = credential.into();

        if account.trim().is_empty() {
            return Err(Error::Missing("EMAIL"));
        } else if credential.trim().is_empty() {
            return Err(Error::Missing("EMAIL_PASSWORD"));
        }

        Ok(Config {
            server: server.into(),
            port,
            account,
            credential,
            security: Security::default(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn security(&self) -> Security {
        self.security
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn parse_or<T: FromStr>(var: &'static str, value: Option<String>, default: T) -> Result<T, Error> {
    match value {
        Some(value) => value.parse().map_err(|_| Error::Invalid { var, value }),
        None => Ok(default),
    }
}

impl FromStr for Security {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tls" | "ssl" | "implicit" => Ok(Security::Tls),
            "starttls" => Ok(Security::StartTls),
            "plain" | "none" => Ok(Security::Plain),
            _ => Err(()),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("account", &self.account)
            .field("credential", &"<redacted>")
            .field("security", &self.security)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Missing(var) => write!(f, "{var} must be set (environment or .env file)"),
            Error::Invalid { var, value } => write!(f, "Invalid value for {var}: {value:?}"),
        }
    }
}

impl std::error::Error for Error {}
