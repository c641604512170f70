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

use std::{
    io,
    path::{Path, PathBuf},
};

use mail_builder::{headers::address::Address as HeaderAddress, MessageBuilder};

use crate::smtp::message::Message;

/// An outgoing e-mail: headers, bodies and the files to attach.
#[derive(Debug, Clone, Default)]
pub struct Email {
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub sender_name: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<PathBuf>,
}

/// A file read from disk, ready to be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub content_type: &'static str,
    pub filename: String,
    pub contents: Vec<u8>,
}

impl Email {
    pub fn new(subject: impl Into<String>, text_body: impl Into<String>) -> Self {
        Email {
            subject: subject.into(),
            text_body: text_body.into(),
            ..Default::default()
        }
    }

    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }

    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    pub fn attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// Envelope recipients: primary, then cc, then bcc, without duplicates.
    pub fn recipients(&self) -> Vec<&str> {
        let mut recipients: Vec<&str> =
            Vec::with_capacity(self.to.len() + self.cc.len() + self.bcc.len());
        for address in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            let address = address.trim();
            if !address.is_empty()
                && !recipients
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(address))
            {
                recipients.push(address);
            }
        }
        recipients
    }

    /// Reads every attachment, skipping the ones that cannot be read.
    pub async fn load_attachments(&self) -> Vec<Attachment> {
        let mut attachments = Vec::with_capacity(self.attachments.len());

        for path in &self.attachments {
            match Attachment::read(path).await {
                Ok(attachment) => {
                    tracing::debug!(filename = %attachment.filename, "Attachment added");
                    attachments.push(attachment);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path.display(), "Attachment not found, skipping");
                }
                Err(err) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %err,
                        "Failed to read attachment, skipping"
                    );
                }
            }
        }

        attachments
    }

    /// Builds the submission message sent from `account`.
    ///
    /// Bcc recipients are only added to the envelope, never to the headers.
    pub fn compose(&self, account: &str, attachments: &[Attachment]) -> crate::Result<Message> {
        let recipients = self.recipients();
        if recipients.is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }

        let from = if self.sender_name.is_empty() {
            HeaderAddress::new_address(None::<&str>, account)
        } else {
            HeaderAddress::new_address(Some(self.sender_name.as_str()), account)
        };

        let mut builder = MessageBuilder::new()
            .from(from)
            .subject(self.subject.as_str())
            .text_body(self.text_body.as_str());
        if let Some(to) = address_list(&self.to) {
            builder = builder.to(to);
        }
        if let Some(cc) = address_list(&self.cc) {
            builder = builder.cc(cc);
        }
        if let Some(html) = &self.html_body {
            builder = builder.html_body(html.as_str());
        }
        for attachment in attachments {
            builder = builder.attachment(
                attachment.content_type,
                attachment.filename.as_str(),
                attachment.contents.as_slice(),
            );
        }

        Ok(Message {
            mail_from: account.into(),
            rcpt_to: recipients.into_iter().map(String::from).collect(),
            body: builder.write_to_vec()?,
        })
    }
}

/// Header address list without blank entries, `None` when nothing is left.
fn address_list(addresses: &[String]) -> Option<HeaderAddress<'_>> {
    let list: Vec<_> = addresses
        .iter()
        .map(|address| address.trim())
        .filter(|address| !address.is_empty())
        .map(|address| HeaderAddress::new_address(None::<&str>, address))
        .collect();
    (!list.is_empty()).then(|| HeaderAddress::new_list(list))
}

impl Attachment {
    pub async fn read(path: &Path) -> io::Result<Self> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

        Ok(Attachment {
            content_type: content_type(path),
            filename,
            contents: tokio::fs::read(path).await?,
        })
    }
}

/// MIME type of an attachment, chosen by file extension.
pub fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
