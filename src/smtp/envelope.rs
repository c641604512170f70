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

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

use super::AssertReply;

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a MAIL FROM command to the server.
    pub async fn mail_from(&mut self, addr: &str) -> crate::Result<()> {
        self.cmd(format!("MAIL FROM:<{addr}>\r\n").as_bytes())
            .await?
            .assert_positive_completion()
    }

    /// Sends a RCPT TO command to the server.
    pub async fn rcpt_to(&mut self, addr: &str) -> crate::Result<()> {
        self.cmd(format!("RCPT TO:<{addr}>\r\n").as_bytes())
            .await?
            .assert_positive_completion()
    }

    /// Sends a DATA command to the server.
    pub async fn data(&mut self, message: impl AsRef<[u8]>) -> crate::Result<()> {
        self.cmd(b"DATA\r\n").await?.assert_code(354)?;
        tokio::time::timeout(self.timeout, async {
            self.write_message(message.as_ref()).await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)??
        .assert_positive_completion()
    }

    /// Sends a RSET command to the server.
    pub async fn rset(&mut self) -> crate::Result<()> {
        self.cmd(b"RSET\r\n").await?.assert_positive_completion()
    }

    /// Sends a QUIT command to the server.
    pub async fn quit(mut self) -> crate::Result<()> {
        self.cmd(b"QUIT\r\n").await?.assert_positive_completion()
    }

    /// Writes the message body applying the transparency procedure
    /// (RFC 5321, section 4.5.2) followed by the end of data marker.
    pub(crate) async fn write_message(&mut self, message: &[u8]) -> tokio::io::Result<()> {
        let mut line_start = true;
        let mut last_pos = 0;

        for (pos, byte) in message.iter().enumerate() {
            if *byte == b'.' && line_start {
                self.stream.write_all(&message[last_pos..pos]).await?;
                self.stream.write_all(b".").await?;
                last_pos = pos;
            }
            line_start = *byte == b'\n' && pos > 0 && message[pos - 1] == b'\r';
        }
        self.stream.write_all(&message[last_pos..]).await?;

        if message.ends_with(b"\r\n") {
            self.stream.write_all(b".\r\n").await?;
        } else {
            self.stream.write_all(b"\r\n.\r\n").await?;
        }
        self.stream.flush().await
    }
}
