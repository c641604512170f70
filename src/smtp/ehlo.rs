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

use smtp_proto::{
    response::parser::{ResponseReceiver, MAX_RESPONSE_LENGTH},
    EhloResponse,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a EHLO command to the server.
    pub async fn ehlo(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        tokio::time::timeout(self.timeout, async {
            self.stream
                .write_all(format!("EHLO {hostname}\r\n").as_bytes())
                .await?;
            self.stream.flush().await?;
            self.read_ehlo().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    async fn read_ehlo(&mut self) -> crate::Result<EhloResponse<String>> {
        let mut buf = vec![0u8; 1024];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::UnparseableReply);
            } else if pending.len() + br > MAX_RESPONSE_LENGTH {
                return Err(crate::Error::UnparseableReply);
            }
            pending.extend_from_slice(&buf[..br]);

            let mut iter = pending.iter();
            match EhloResponse::parse(&mut iter) {
                Ok(reply) => return Ok(reply),
                Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                Err(smtp_proto::Error::InvalidResponse { code }) => {
                    // Servers rejecting EHLO reply with a regular error response
                    match ResponseReceiver::from_code(code).parse(&mut iter) {
                        Ok(response) => return Err(crate::Error::UnexpectedReply(response)),
                        Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                        Err(_) => return Err(crate::Error::UnparseableReply),
                    }
                }
                Err(_) => return Err(crate::Error::UnparseableReply),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use smtp_proto::{AUTH_LOGIN, AUTH_PLAIN, EXT_START_TLS};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::SmtpClient;

    #[tokio::test]
    async fn ehlo_capabilities() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut client = SmtpClient {
            stream: client,
            timeout: Duration::from_secs(5),
        };

        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let br = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..br], b"EHLO client.example.org\r\n");
            // Split the reply to exercise reassembly
            server
                .write_all(b"250-mx.example.org greets you\r\n250-STARTTLS\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            server
                .write_all(b"250 AUTH PLAIN LOGIN\r\n")
                .await
                .unwrap();
            server
        });

        let response = client.ehlo("client.example.org").await.unwrap();
        assert!(response.has_capability(EXT_START_TLS));
        assert_ne!(response.auth_mechanisms & AUTH_PLAIN, 0);
        assert_ne!(response.auth_mechanisms & AUTH_LOGIN, 0);
        server.await.unwrap();
    }
}
