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

use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

/// A message ready for submission: the SMTP envelope plus the raw
/// RFC 5322 body.
#[derive(Debug, Default, Clone)]
pub struct Message {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub body: Vec<u8>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Submits a message: MAIL FROM, one RCPT TO per recipient, then DATA.
    pub async fn send(&mut self, message: &Message) -> crate::Result<()> {
        if message.mail_from.is_empty() {
            return Err(crate::Error::MissingMailFrom);
        } else if message.rcpt_to.is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }

        self.mail_from(&message.mail_from).await?;
        for rcpt in &message.rcpt_to {
            self.rcpt_to(rcpt).await?;
        }
        self.data(&message.body).await
    }
}
