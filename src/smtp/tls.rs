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

use std::{convert::TryFrom, io, sync::Arc};

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::{Error, SmtpClient};

use super::AssertReply;

impl SmtpClient<TcpStream> {
    /// Upgrade the connection to TLS.
    pub async fn start_tls(
        mut self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<SmtpClient<TlsStream<TcpStream>>> {
        self.cmd(b"STARTTLS\r\n")
            .await?
            .assert_positive_completion()?;

        self.into_tls(tls_connector, hostname).await
    }

    /// Performs the TLS handshake on the plain connection.
    pub async fn into_tls(
        self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<SmtpClient<TlsStream<TcpStream>>> {
        let server_name = ServerName::try_from(hostname)
            .map_err(|_| Error::InvalidTLSName)?
            .to_owned();

        let stream = tokio::time::timeout(
            self.timeout,
            tls_connector.connect(server_name, self.stream),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(tls_error)?;

        Ok(SmtpClient {
            stream,
            timeout: self.timeout,
        })
    }
}

fn tls_error(err: io::Error) -> Error {
    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<rustls::Error>() {
            Ok(error) => Error::Tls(error),
            Err(error) => Error::Io(io::Error::new(kind, error)),
        },
        None => Error::Io(io::Error::new(kind, "Unspecified")),
    }
}

/// Builds a connector trusting the webpki root certificates.
pub fn build_tls_connector() -> TlsConnector {
    let root_cert_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}
