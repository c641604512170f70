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

use std::fmt::Display;

use base64::{engine, Engine};
use smtp_proto::{EhloResponse, AUTH_LOGIN, AUTH_PLAIN};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Credentials, SmtpClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChallenge,
}

/// Authentication mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Challenge-Response Authentication Mechanism (CRAM)
    #[cfg(feature = "cram-md5")]
    CramMD5,

    /// Login
    Login,

    /// Plain
    Plain,
}

impl Mechanism {
    /// Supported mechanisms, from most to least secure.
    pub const PREFERENCE: &'static [Mechanism] = &[
        #[cfg(feature = "cram-md5")]
        Mechanism::CramMD5,
        Mechanism::Login,
        Mechanism::Plain,
    ];

    fn flag(&self) -> u64 {
        match self {
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => smtp_proto::AUTH_CRAM_MD5,
            Mechanism::Login => AUTH_LOGIN,
            Mechanism::Plain => AUTH_PLAIN,
        }
    }

    /// Mechanisms advertised by the server that this client can use.
    pub fn negotiate(advertised: u64) -> impl Iterator<Item = Mechanism> {
        Self::PREFERENCE
            .iter()
            .copied()
            .filter(move |mechanism| advertised & mechanism.flag() != 0)
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => write!(f, "CRAM-MD5"),
            Mechanism::Login => write!(f, "LOGIN"),
            Mechanism::Plain => write!(f, "PLAIN"),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChallenge => write!(f, "Invalid challenge received."),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Authenticates with the strongest mechanism both sides support.
    pub async fn authenticate<U: AsRef<str>>(
        &mut self,
        credentials: &Credentials<U>,
        capabilities: &EhloResponse<String>,
    ) -> crate::Result<&mut Self> {
        let mut last_err = None;

        for mechanism in Mechanism::negotiate(capabilities.auth_mechanisms) {
            match self.auth(mechanism, credentials).await {
                Ok(_) => {
                    tracing::debug!(%mechanism, "Authenticated");
                    return Ok(self);
                }
                Err(crate::Error::UnexpectedReply(reply)) => {
                    // 535: credentials rejected, other mechanisms will not help
                    let rejected = reply.code() == 535;
                    last_err = Some(reply);
                    if rejected {
                        break;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        match last_err {
            Some(reply) => Err(crate::Error::AuthenticationFailed(reply)),
            None => Err(crate::Error::UnsupportedAuthMechanism),
        }
    }

    async fn auth<U: AsRef<str>>(
        &mut self,
        mechanism: Mechanism,
        credentials: &Credentials<U>,
    ) -> crate::Result<()> {
        let mut reply = if mechanism == Mechanism::Plain {
            self.cmd(
                format!("AUTH {} {}\r\n", mechanism, credentials.encode(mechanism, "")?)
                    .as_bytes(),
            )
            .await?
        } else {
            self.cmd(format!("AUTH {mechanism}\r\n").as_bytes()).await?
        };

        for _ in 0..3 {
            match reply.code() {
                334 => {
                    let response = credentials.encode(mechanism, reply.message())?;
                    reply = self.cmd(format!("{response}\r\n").as_bytes()).await?;
                }
                235 => {
                    return Ok(());
                }
                _ => {
                    return Err(crate::Error::UnexpectedReply(reply));
                }
            }
        }

        Err(crate::Error::UnexpectedReply(reply))
    }
}

impl<T: AsRef<str>> Credentials<T> {
    pub(crate) fn encode(&self, mechanism: Mechanism, challenge: &str) -> crate::Result<String> {
        let username = self.username.as_ref();
        let secret = self.secret.as_ref();

        Ok(engine::general_purpose::STANDARD.encode(
            match mechanism {
                Mechanism::Plain => format!("\u{0}{username}\u{0}{secret}"),

                Mechanism::Login => {
                    let challenge = engine::general_purpose::STANDARD.decode(challenge)?;

                    if challenge_starts_with(&challenge, b"user name")
                        || challenge_starts_with(&challenge, b"username")
                    {
                        username.to_string()
                    } else if challenge_starts_with(&challenge, b"password") {
                        secret.to_string()
                    } else {
                        return Err(Error::InvalidChallenge.into());
                    }
                }

                #[cfg(feature = "cram-md5")]
                Mechanism::CramMD5 => {
                    let mut secret_opad: Vec<u8> = vec![0x5c; 64];
                    let mut secret_ipad: Vec<u8> = vec![0x36; 64];

                    let key: Vec<u8> = if secret.len() <= 64 {
                        secret.as_bytes().to_vec()
                    } else {
                        md5::compute(secret.as_bytes()).0.to_vec()
                    };
                    for (pos, byte) in key.iter().enumerate() {
                        secret_opad[pos] ^= byte;
                        secret_ipad[pos] ^= byte;
                    }

                    secret_ipad
                        .extend_from_slice(&engine::general_purpose::STANDARD.decode(challenge)?);
                    secret_opad.extend_from_slice(&md5::compute(&secret_ipad).0);

                    format!("{username} {:x}", md5::compute(&secret_opad))
                }
            }
            .as_bytes(),
        ))
    }
}

fn challenge_starts_with(challenge: &[u8], prefix: &[u8]) -> bool {
    challenge
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
