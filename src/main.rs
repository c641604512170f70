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

use mail_dispatch::{logging, Config, Email, Mailer};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = logging::init(logging::LOG_FILE) {
        eprintln!("Failed to initialize logging: {err}");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Invalid configuration");
            return;
        }
    };

    let email = Email::new(
        "Certificate of completion",
        "Hi Tom, please find your certificate of completion attached.",
    )
    .html_body("<h1>Congratulations on completing the course!</h1><p>Your certificate is attached.</p>")
    .sender_name("Course Team")
    .to("tom@example.com")
    .cc("support@example.com")
    .attachment("certificate_tom.png");

    let mut mailer = Mailer::new(config);
    let sent = mailer.connect().await && mailer.send(&email).await;
    mailer.close().await;

    if sent {
        tracing::info!("Email delivered");
    } else {
        tracing::error!("Email delivery failed");
    }
}
