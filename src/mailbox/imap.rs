//! IMAP fetcher — raw IMAP over TLS, date-range search, mail-parser decode.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use mail_parser::{HeaderValue, MessageParser};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::pipeline::transform::strip_tags;

use super::types::{DateRange, MailFetcher, RawMessage};

/// Fetches messages from an IMAP mailbox for a date range.
pub struct ImapFetcher {
    config: MailboxConfig,
}

impl ImapFetcher {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailFetcher for ImapFetcher {
    async fn fetch(&self, range: DateRange) -> Result<Vec<RawMessage>, MailboxError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_range_imap(&config, range))
            .await
            .map_err(|e| MailboxError::Transport {
                host: self.config.imap_host.clone(),
                reason: format!("fetch task panicked: {e}"),
            })?
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn transport_err(config: &MailboxConfig, reason: impl std::fmt::Display) -> MailboxError {
    MailboxError::Transport {
        host: config.imap_host.clone(),
        reason: reason.to_string(),
    }
}

/// Fetch all messages in the date range (blocking — run in spawn_blocking).
fn fetch_range_imap(
    config: &MailboxConfig,
    range: DateRange,
) -> Result<Vec<RawMessage>, MailboxError> {
    use std::sync::Arc;

    // Connect TCP
    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))
        .map_err(|e| transport_err(config, e))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| transport_err(config, e))?;

    // TLS via rustls
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| transport_err(config, e))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| transport_err(config, e))?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    // ── IMAP helpers ────────────────────────────────────────────────
    let read_line = |tls: &mut TlsStream| -> Result<String, std::io::Error> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(tls, &mut byte) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "IMAP connection closed",
                    ));
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    };

    let send_cmd =
        |tls: &mut TlsStream, tag: &str, cmd: &str| -> Result<Vec<String>, std::io::Error> {
            let full = format!("{tag} {cmd}\r\n");
            IoWrite::write_all(tls, full.as_bytes())?;
            IoWrite::flush(tls)?;
            let mut lines = Vec::new();
            loop {
                let line = read_line(tls)?;
                let done = line.starts_with(tag);
                lines.push(line);
                if done {
                    break;
                }
            }
            Ok(lines)
        };

    // Read greeting
    let _greeting = read_line(&mut tls).map_err(|e| transport_err(config, e))?;

    // Login
    info!(host = %config.imap_host, user = %config.username, "Authenticating");
    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )
    .map_err(|e| transport_err(config, e))?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        let reason = login_resp
            .last()
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| "login rejected".into());
        return Err(MailboxError::Authentication {
            mailbox: config.username.clone(),
            reason,
        });
    }

    // Select INBOX
    let select_resp =
        send_cmd(&mut tls, "A2", "SELECT \"INBOX\"").map_err(|e| transport_err(config, e))?;
    if !select_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(transport_err(config, "failed to select INBOX"));
    }

    // Server-side date-range search. BEFORE is exclusive, so search one day
    // past the inclusive end date.
    let since = range.start.format("%d-%b-%Y").to_string();
    let before = range
        .end
        .checked_add_days(Days::new(1))
        .unwrap_or(range.end)
        .format("%d-%b-%Y")
        .to_string();
    info!(since = %since, before = %before, "Searching for messages in range");

    let search_resp = send_cmd(&mut tls, "A3", &format!("SEARCH SINCE {since} BEFORE {before}"))
        .map_err(|e| transport_err(config, e))?;
    let mut uids: Vec<String> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                uids.extend(parts[2..].iter().map(|s| s.to_string()));
            }
        }
    }
    info!(count = uids.len(), "Messages found in date range");

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for uid in &uids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = match send_cmd(&mut tls, &fetch_tag, &format!("FETCH {uid} RFC822")) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(uid = %uid, error = %e, "Failed to fetch message, skipping");
                continue;
            }
        };

        let raw: String = fetch_resp
            .iter()
            .skip(1)
            .take(fetch_resp.len().saturating_sub(2))
            .cloned()
            .collect();

        match parse_message(raw.as_bytes()) {
            Some(msg) => {
                // Server-side search is day-granular; re-check the header date.
                if range.contains(msg.timestamp) {
                    debug!(id = %msg.id, sender = %msg.sender, "Message included");
                    results.push(msg);
                } else {
                    debug!(id = %msg.id, "Message date outside range, skipping");
                }
            }
            None => warn!(uid = %uid, "Unparseable message, skipping"),
        }
    }

    // Logout
    let logout_tag = format!("A{tag_counter}");
    let _ = send_cmd(&mut tls, &logout_tag, "LOGOUT");

    info!(count = results.len(), "Fetched messages in date range");
    Ok(results)
}

/// Strip angle brackets from a Message-ID-style token.
fn normalize_msg_id(token: &str) -> String {
    token.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

/// Flatten a Text/TextList header value into normalized id tokens.
fn header_id_list(value: Option<&HeaderValue>) -> Vec<String> {
    match value {
        Some(HeaderValue::Text(text)) => {
            text.split_whitespace().map(normalize_msg_id).collect()
        }
        Some(HeaderValue::TextList(list)) => list
            .iter()
            .flat_map(|t| t.split_whitespace())
            .map(normalize_msg_id)
            .collect(),
        _ => Vec::new(),
    }
}

/// Decode one RFC822 message into a `RawMessage`.
///
/// Returns `None` for messages without a parseable envelope.
pub(crate) fn parse_message(raw: &[u8]) -> Option<RawMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());

    let recipient = parsed
        .to()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default();

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let id = parsed.message_id().map(normalize_msg_id)?;

    let timestamp = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let body = if let Some(text) = parsed.body_text(0) {
        text.trim().to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_tags(html.as_ref()).trim().to_string()
    } else {
        String::new()
    };

    let in_reply_to = header_id_list(parsed.header("In-Reply-To"))
        .into_iter()
        .next();
    let references = header_id_list(parsed.header("References"));

    Some(RawMessage {
        id,
        sender,
        recipient,
        subject,
        timestamp,
        body,
        in_reply_to,
        references,
    })
}
