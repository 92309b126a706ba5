//! SMTP provider. `mailto` speaks STARTTLS on port 587 by default,
//! `mailtos` speaks implicit TLS on port 465 (§6). Attachments are folded
//! into `multipart/mixed` with a `----=_Part_<16-hex>` boundary, base64
//! body lines wrapped at 76 columns per RFC 2045.

use std::sync::Arc;

use async_trait::async_trait;
use notifyhub_types::{ErrorKind, NotifyError, Severity};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::registry::{map_cancellation, EffectiveRequest, Provider};
use crate::url::ParsedUrl;

pub(crate) fn register(registry: &mut crate::registry::ProviderRegistry) {
    registry.register("mailto", |p| Ok(Arc::new(Smtp::parse(p, false)?)));
    registry.register("mailtos", |p| Ok(Arc::new(Smtp::parse(p, true)?)));
}

pub struct Smtp {
    host: String,
    port: u16,
    implicit_tls: bool,
    user: Option<String>,
    password: Option<String>,
    from: String,
    recipients: Vec<String>,
    subject_override: Option<String>,
}

impl Smtp {
    fn parse(p: &ParsedUrl, implicit_tls: bool) -> Result<Self, NotifyError> {
        p.require_scheme(if implicit_tls { &["mailtos"] } else { &["mailto"] })?;

        if p.host.is_empty() {
            return Err(NotifyError::invalid_configuration("mailto:// requires an SMTP host"));
        }
        let port = p.port.unwrap_or(if implicit_tls { 465 } else { 587 });

        let recipients: Vec<String> = p.path_segments.clone();
        if recipients.is_empty() {
            return Err(NotifyError::invalid_configuration("mailto:// requires at least one recipient path segment"));
        }
        for r in &recipients {
            if !r.contains('@') {
                return Err(NotifyError::invalid_configuration(format!("recipient {r:?} is not an email address")));
            }
        }

        let from = p
            .query_get("from")
            .map(str::to_string)
            .or_else(|| p.user.clone())
            .unwrap_or_else(|| format!("notifyhub@{}", p.host));

        Ok(Smtp {
            host: p.host.clone(),
            port,
            implicit_tls,
            user: p.user.clone(),
            password: p.secret.clone(),
            from,
            recipients,
            subject_override: p.query_get("subject").map(str::to_string),
        })
    }

    fn boundary() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        format!("----=_Part_{:016x}", nanos & 0xFFFF_FFFF_FFFF_FFFF)
    }

    fn build_message(&self, request: &EffectiveRequest<'_>) -> Result<String, NotifyError> {
        let subject = self
            .subject_override
            .clone()
            .unwrap_or_else(|| if request.title.is_empty() { "Notification".to_string() } else { request.title.to_string() });

        let emoji = match request.severity {
            Severity::Success => "\u{2705} ",
            Severity::Warning => "\u{26A0}\u{FE0F} ",
            Severity::Error => "\u{1F6A8} ",
            Severity::Info => "",
        };

        let attachments = request.attachments.get_all();
        let to_header = self.recipients.join(", ");

        if attachments.is_empty() {
            let content_type = "text/plain; charset=utf-8";
            return Ok(format!(
                "From: {}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: {}\r\n\r\n{}{}\r\n",
                self.from, to_header, subject, content_type, emoji, request.body
            ));
        }

        let boundary = Self::boundary();
        let mut message = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n--{}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}{}\r\n",
            self.from, to_header, subject, boundary, boundary, emoji, request.body
        );

        for attachment in attachments {
            let encoded = attachment.base64().map_err(|e| NotifyError::new(ErrorKind::Internal, e.to_string()))?;
            let folded = fold_base64(&encoded);
            let disposition = if attachment.mime_type().starts_with("image/") {
                format!("inline\r\nContent-ID: <{}>", attachment.name())
            } else {
                "attachment".to_string()
            };
            message.push_str(&format!(
                "\r\n--{}\r\nContent-Type: {}; name=\"{}\"\r\nContent-Transfer-Encoding: base64\r\nContent-Disposition: {}; filename=\"{}\"\r\n\r\n{}\r\n",
                boundary,
                attachment.mime_type(),
                attachment.name(),
                disposition,
                attachment.name(),
                folded
            ));
        }
        message.push_str(&format!("\r\n--{boundary}--\r\n"));
        Ok(message)
    }
}

/// RFC 2045 §6.8: base64 lines MUST NOT exceed 76 characters.
fn fold_base64(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(76)
        .map(|c| std::str::from_utf8(c).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Reads one line at a time without over-reading past it, so a plaintext
/// `TcpStream` can be handed to `tokio_rustls` for the STARTTLS upgrade with
/// no buffered bytes left behind.
async fn read_line<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> Result<String, NotifyError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| NotifyError::new(ErrorKind::TransientTransport, format!("SMTP read failed: {e}")))?;
        if n == 0 {
            return Err(NotifyError::new(ErrorKind::TransientTransport, "SMTP connection closed unexpectedly"));
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn read_reply<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> Result<(u16, String), NotifyError> {
    let mut full = String::new();
    loop {
        let line = read_line(stream).await?;
        full.push_str(&line);
        let bytes = line.as_bytes();
        if bytes.len() >= 4 && bytes[3] == b' ' {
            let code: u16 = line[..3].parse().unwrap_or(0);
            return Ok((code, full));
        }
        if bytes.len() < 4 {
            return Err(NotifyError::new(ErrorKind::TransientTransport, "malformed SMTP reply line"));
        }
    }
}

async fn write_command<S: tokio::io::AsyncWrite + Unpin>(stream: &mut S, cmd: &str) -> Result<(), NotifyError> {
    stream
        .write_all(cmd.as_bytes())
        .await
        .map_err(|e| NotifyError::new(ErrorKind::TransientTransport, format!("SMTP write failed: {e}")))
}

async fn command<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
    stream: &mut S,
    cmd: &str,
    expect: u16,
) -> Result<(), NotifyError> {
    write_command(stream, cmd).await?;
    let (code, _) = read_reply(stream).await?;
    if code != expect {
        return Err(classify_smtp_code(code, cmd.trim()));
    }
    Ok(())
}

fn classify_smtp_code(code: u16, context: &str) -> NotifyError {
    match code {
        530 | 535 | 534 => NotifyError::new(ErrorKind::CredentialRejected, format!("{context}: {code}")),
        421 | 450 | 451 | 452 => NotifyError::new(ErrorKind::TransientTransport, format!("{context}: {code}")),
        _ => NotifyError::new(ErrorKind::PermanentProtocol, format!("{context}: {code}")),
    }
}

#[async_trait]
impl Provider for Smtp {
    fn service_id(&self) -> &'static str {
        "email"
    }

    fn default_port(&self) -> Option<u16> {
        Some(if self.implicit_tls { 465 } else { 587 })
    }

    fn supports_attachments(&self) -> bool {
        true
    }

    fn max_body_length(&self) -> usize {
        0
    }

    async fn send(&self, ctx: CancellationToken, request: &EffectiveRequest<'_>) -> Result<(), NotifyError> {
        if let Some(e) = map_cancellation(&ctx) {
            return Err(e);
        }
        let message = self.build_message(request)?;

        let deliver = self.deliver(&message);
        tokio::select! {
            r = deliver => r,
            _ = ctx.cancelled() => Err(NotifyError::new(ErrorKind::ContextCanceled, "SMTP send canceled")),
        }
    }
}

impl Smtp {
    async fn deliver(&self, message: &str) -> Result<(), NotifyError> {
        let addr = format!("{}:{}", self.host, self.port);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| NotifyError::new(ErrorKind::TransientTransport, format!("connect to {addr} failed: {e}")))?;

        if self.implicit_tls {
            let mut tls = self.wrap_tls(tcp).await?;
            self.session(&mut tls, message).await
        } else {
            let mut tcp = tcp;
            let (code, _) = read_reply(&mut tcp).await?;
            if code != 220 {
                return Err(classify_smtp_code(code, "greeting"));
            }
            command(&mut tcp, &format!("EHLO {}\r\n", self.host), 250).await?;
            command(&mut tcp, "STARTTLS\r\n", 220).await?;

            let mut tls = self.wrap_tls(tcp).await?;
            command(&mut tls, &format!("EHLO {}\r\n", self.host), 250).await?;
            self.authenticate(&mut tls).await?;
            self.transact(&mut tls, message).await
        }
    }

    /// Full greeting + EHLO + auth + transaction over an already-secure
    /// stream (the implicit-TLS path, no STARTTLS negotiation needed).
    async fn session<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
        &self,
        stream: &mut S,
        message: &str,
    ) -> Result<(), NotifyError> {
        let (code, _) = read_reply(stream).await?;
        if code != 220 {
            return Err(classify_smtp_code(code, "greeting"));
        }
        command(stream, &format!("EHLO {}\r\n", self.host), 250).await?;
        self.authenticate(stream).await?;
        self.transact(stream, message).await
    }

    async fn wrap_tls(&self, tcp: TcpStream) -> Result<tokio_rustls::client::TlsStream<TcpStream>, NotifyError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
        let connector = TlsConnector::from(std::sync::Arc::new(config));
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|_| NotifyError::invalid_configuration(format!("invalid TLS server name: {}", self.host)))?;
        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| NotifyError::new(ErrorKind::TransientTransport, format!("TLS handshake failed: {e}")))
    }

    async fn authenticate<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<(), NotifyError> {
        let (Some(user), Some(password)) = (&self.user, &self.password) else {
            return Ok(());
        };
        command(stream, "AUTH LOGIN\r\n", 334).await?;
        command(stream, &format!("{}\r\n", base64_encode(user.as_bytes())), 334).await?;
        command(stream, &format!("{}\r\n", base64_encode(password.as_bytes())), 235).await
    }

    async fn transact<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
        &self,
        stream: &mut S,
        message: &str,
    ) -> Result<(), NotifyError> {
        command(stream, &format!("MAIL FROM:<{}>\r\n", self.from), 250).await?;
        for r in &self.recipients {
            command(stream, &format!("RCPT TO:<{r}>\r\n"), 250).await?;
        }
        command(stream, "DATA\r\n", 354).await?;

        let dot_stuffed = message.replace("\r\n.", "\r\n..");
        write_command(stream, &format!("{dot_stuffed}\r\n.\r\n")).await?;
        let (code, _) = read_reply(stream).await?;
        if code != 250 {
            return Err(classify_smtp_code(code, "DATA"));
        }

        let _ = write_command(stream, "QUIT\r\n").await;
        Ok(())
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailto_defaults_to_port_587() {
        let p = ParsedUrl::parse("mailto://u:p@smtp.example.com/r@y.z").unwrap();
        let smtp = Smtp::parse(&p, false).unwrap();
        assert_eq!(smtp.port, 587);
        assert!(!smtp.implicit_tls);
    }

    #[test]
    fn mailtos_defaults_to_port_465() {
        let p = ParsedUrl::parse("mailtos://u:p@smtp.example.com/r@y.z").unwrap();
        let smtp = Smtp::parse(&p, true).unwrap();
        assert_eq!(smtp.port, 465);
        assert!(smtp.implicit_tls);
    }

    #[test]
    fn mailto_requires_recipient_with_at_sign() {
        let p = ParsedUrl::parse("mailto://u:p@smtp.example.com/not-an-email").unwrap();
        assert!(Smtp::parse(&p, false).is_err());
    }

    #[test]
    fn subject_query_override_takes_precedence() {
        let p = ParsedUrl::parse("mailto://u:p@smtp.x/r@y.z?subject=X").unwrap();
        let smtp = Smtp::parse(&p, false).unwrap();
        assert_eq!(smtp.subject_override.as_deref(), Some("X"));
    }

    #[test]
    fn fold_base64_wraps_at_76_columns() {
        let long = "a".repeat(200);
        let encoded = base64_encode(long.as_bytes());
        let folded = fold_base64(&encoded);
        for line in folded.split("\r\n") {
            assert!(line.len() <= 76);
        }
    }

    #[test]
    fn boundary_has_expected_prefix_and_length() {
        let b = Smtp::boundary();
        assert!(b.starts_with("----=_Part_"));
        assert_eq!(b.len(), "----=_Part_".len() + 16);
    }

    #[test]
    fn plain_message_without_attachments_has_simple_content_type() {
        let p = ParsedUrl::parse("mailto://u:p@smtp.x/r@y.z?subject=Hi").unwrap();
        let smtp = Smtp::parse(&p, false).unwrap();
        let attachments = notifyhub_attachment::AttachmentSet::new();
        let req = EffectiveRequest {
            title: "t",
            body: "body text",
            severity: Severity::Info,
            url: None,
            attachments: &attachments,
        };
        let msg = smtp.build_message(&req).unwrap();
        assert!(msg.contains("Subject: Hi"));
        assert!(msg.contains("Content-Type: text/plain"));
        assert!(!msg.contains("multipart/mixed"));
    }
}
