//! IRC adapter — persistent TCP (optionally TLS) with line framing.
//!
//! Registration: `PASS` (if configured), `NICK`, `USER`; on RPL_WELCOME
//! (001) or RPL_ENDOFMOTD (376) every configured channel is JOINed exactly
//! once per connection. `PING` is answered with `PONG` carrying the exact
//! tail, leading colon included. Connection loss reconnects after the
//! fixed 5 s back-off.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use alfred_core::config::{IrcConfig, TextsConfig, FETCH_BACKOFF_SECS};
use alfred_core::types::{InboundMessage, OutboundMessage, RequestContext, DEFAULT_TENANT};

use crate::channel::{require_session_id, Channel, ChannelStatus, InboundHandler, Lifecycle};
use crate::commands;
use crate::error::{ChannelError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct IrcInner {
    config: IrcConfig,
    texts: TextsConfig,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
}

/// IRC channel over a persistent socket.
pub struct IrcChannel {
    inner: Arc<IrcInner>,
    lifecycle: Lifecycle,
    status: Mutex<ChannelStatus>,
}

impl IrcChannel {
    pub fn new(config: IrcConfig, texts: TextsConfig) -> Self {
        Self {
            inner: Arc::new(IrcInner {
                config,
                texts,
                writer: tokio::sync::Mutex::new(None),
            }),
            lifecycle: Lifecycle::new(),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }
}

#[async_trait::async_trait]
impl Channel for IrcChannel {
    fn name(&self) -> &str {
        "irc"
    }

    async fn start(&self, handler: InboundHandler) -> Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::Connecting;
        let shutdown = self.lifecycle.begin();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                match IrcInner::run_session(&inner, &handler, &shutdown).await {
                    Ok(()) => {
                        info!("irc session ended");
                        break;
                    }
                    Err(e) => {
                        *inner.writer.lock().await = None;
                        error!(error = %e, "irc connection error, reconnecting");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(FETCH_BACKOFF_SECS)) => {}
                            _ = shutdown.cancelled() => break,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.end();
        *self.inner.writer.lock().await = None;
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let target = require_session_id(msg)?;
        self.inner
            .send_lines(target, &msg.rendered_content())
            .await
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

impl IrcInner {
    /// One connection lifetime: connect, register, read until EOF/shutdown.
    async fn run_session(
        inner: &Arc<Self>,
        handler: &InboundHandler,
        shutdown: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let addr = (inner.config.server.as_str(), inner.config.port);
        let tcp = TcpStream::connect(addr).await?;
        info!(server = %inner.config.server, port = inner.config.port, "irc connected");

        let reader: BufReader<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;
        if inner.config.use_tls {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
            let server_name = rustls::pki_types::ServerName::try_from(inner.config.server.clone())
                .map_err(|e| ChannelError::api("irc", format!("bad server name: {e}")))?;
            let stream = connector.connect(server_name, tcp).await?;
            let (r, w) = tokio::io::split(stream);
            reader = BufReader::new(Box::new(r));
            *inner.writer.lock().await = Some(Box::new(w));
        } else {
            let (r, w) = tokio::io::split(tcp);
            reader = BufReader::new(Box::new(r));
            *inner.writer.lock().await = Some(Box::new(w));
        }

        // Registration handshake.
        if let Some(password) = &inner.config.password {
            inner.raw_send(&format!("PASS {password}")).await?;
        }
        inner.raw_send(&format!("NICK {}", inner.config.nick)).await?;
        inner
            .raw_send(&format!(
                "USER {0} 0 * :{0}",
                inner.config.nick
            ))
            .await?;

        let mut joined = false;
        let mut lines = reader.lines();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Err(ChannelError::api("irc", "server closed the connection"));
                    };
                    let line = line.trim_end_matches('\r');
                    inner.handle_line(line, &mut joined, handler).await?;
                }
            }
        }
    }

    async fn handle_line(
        self: &Arc<Self>,
        line: &str,
        joined: &mut bool,
        handler: &InboundHandler,
    ) -> Result<()> {
        if let Some(tail) = line.strip_prefix("PING") {
            // The tail is echoed verbatim, leading colon and all.
            self.raw_send(&format!("PONG{tail}")).await?;
            return Ok(());
        }

        // Numerics arrive as ":server <code> <nick> ...".
        if let Some(code) = numeric_code(line) {
            if (code == "001" || code == "376") && !*joined {
                *joined = true;
                for channel in &self.config.channels {
                    self.raw_send(&format!("JOIN {channel}")).await?;
                }
            }
            return Ok(());
        }

        if let Some((nick, target, text)) = parse_privmsg(line) {
            // Never react to our own messages.
            if nick.eq_ignore_ascii_case(&self.config.nick) {
                return Ok(());
            }

            let is_channel = target.starts_with('#') || target.starts_with('&');
            let reply_target = if is_channel { target.clone() } else { nick.clone() };

            if let Some(reply) = commands::intercept(&text, true) {
                let response = commands::reply_text(reply, "irc", &self.texts);
                if let Err(e) = self.send_lines(&reply_target, &response).await {
                    warn!(error = %e, "irc command reply failed");
                }
                return Ok(());
            }

            let is_mention = text
                .to_lowercase()
                .contains(&self.config.nick.to_lowercase());
            if self.config.mention_only && is_channel && !is_mention {
                return Ok(());
            }

            let mut inbound = InboundMessage::new("irc", &reply_target, &nick, &text);
            inbound.sender_name = nick.clone();
            inbound.group_id = is_channel.then(|| target.clone());
            inbound.is_mention = is_mention;

            // Dispatch off the reader loop so PING handling stays live
            // during long agent turns.
            let inner = Arc::clone(self);
            let handler = Arc::clone(handler);
            tokio::spawn(async move {
                match handler(RequestContext::new(DEFAULT_TENANT), inbound).await {
                    Ok(outbound) => {
                        if let Err(e) = inner
                            .send_lines(&reply_target, &outbound.rendered_content())
                            .await
                        {
                            warn!(error = %e, target = %reply_target, "irc reply failed");
                        }
                    }
                    Err(e) => warn!(error = %e, target = %reply_target, "irc dispatch failed"),
                }
            });
        }

        Ok(())
    }

    async fn raw_send(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(ChannelError::NotConnected("irc".into()));
        };
        w.write_all(line.as_bytes()).await?;
        w.write_all(b"\r\n").await?;
        w.flush().await?;
        debug!(line, "irc >>");
        Ok(())
    }

    /// IRC frames per line, so multi-line replies become one PRIVMSG each.
    async fn send_lines(&self, target: &str, content: &str) -> Result<()> {
        for line in content.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            self.raw_send(&format!("PRIVMSG {target} :{line}")).await?;
        }
        Ok(())
    }
}

/// Extract the numeric reply code from `:server 001 nick :...`.
fn numeric_code(line: &str) -> Option<&str> {
    if !line.starts_with(':') {
        return None;
    }
    let code = line.split_whitespace().nth(1)?;
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_digit())).then_some(code)
}

/// Parse `:nick!user@host PRIVMSG target :text` into (nick, target, text).
fn parse_privmsg(line: &str) -> Option<(String, String, String)> {
    let rest = line.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let rest = rest.strip_prefix("PRIVMSG ")?;
    let (target, text) = rest.split_once(" :")?;

    let nick = prefix.split('!').next().unwrap_or(prefix);
    Some((nick.to_string(), target.to_string(), text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::handler_fn;
    use tokio::io::AsyncReadExt;

    #[test]
    fn privmsg_parsing() {
        let (nick, target, text) =
            parse_privmsg(":alice!a@host PRIVMSG #ops :deploy it please").unwrap();
        assert_eq!(nick, "alice");
        assert_eq!(target, "#ops");
        assert_eq!(text, "deploy it please");

        let (nick, target, text) = parse_privmsg(":bob!b@h PRIVMSG alfred :hi").unwrap();
        assert_eq!(nick, "bob");
        assert_eq!(target, "alfred");
        assert_eq!(text, "hi");

        assert!(parse_privmsg("NOTICE #ops :x").is_none());
    }

    #[test]
    fn numeric_codes() {
        assert_eq!(numeric_code(":srv 001 bot :Welcome"), Some("001"));
        assert_eq!(numeric_code(":srv 376 bot :End of MOTD"), Some("376"));
        assert_eq!(numeric_code(":a!b@c PRIVMSG #x :hello"), None);
        assert_eq!(numeric_code("PING :xyz"), None);
    }

    /// Scenario: registration, JOIN after 001, and PING/PONG with the exact
    /// tail, driven against a local TCP server.
    #[tokio::test]
    async fn registration_join_and_ping_pong() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let channel = IrcChannel::new(
            IrcConfig {
                server: "127.0.0.1".into(),
                port,
                use_tls: false,
                nick: "bot".into(),
                password: None,
                channels: vec!["#test".into()],
                mention_only: false,
            },
            TextsConfig::default(),
        );
        channel
            .start(handler_fn(|_ctx, msg| async move {
                Ok(OutboundMessage::reply_to(&msg, "ok"))
            }))
            .await
            .unwrap();

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = String::new();
        let mut buf = [0u8; 1024];

        // Read until the registration lines arrive.
        while !received.contains("USER bot") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up during registration");
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        assert!(received.contains("NICK bot\r\n"));
        assert!(received.contains("USER bot 0 * :bot\r\n"));

        socket.write_all(b":srv 001 bot :Welcome\r\n").await.unwrap();
        let mut after_welcome = String::new();
        while !after_welcome.contains("JOIN #test\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up before JOIN");
            after_welcome.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        socket.write_all(b"PING :srv123\r\n").await.unwrap();
        let mut pong = String::new();
        while !pong.contains("PONG :srv123\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up before PONG");
            pong.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        channel.stop().await.unwrap();
    }

    /// A channel-target PRIVMSG dispatches with the channel as both the
    /// session and the group; the reply goes back to the channel.
    #[tokio::test]
    async fn channel_privmsg_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let channel = IrcChannel::new(
            IrcConfig {
                server: "127.0.0.1".into(),
                port,
                use_tls: false,
                nick: "bot".into(),
                password: None,
                channels: vec!["#test".into()],
                mention_only: false,
            },
            TextsConfig::default(),
        );
        channel
            .start(handler_fn(|_ctx, msg| async move {
                assert_eq!(msg.session_id, "#test");
                assert_eq!(msg.group_id.as_deref(), Some("#test"));
                Ok(OutboundMessage::reply_to(&msg, "line one\nline two"))
            }))
            .await
            .unwrap();

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let mut received = String::new();
        while !received.contains("USER bot") {
            let n = socket.read(&mut buf).await.unwrap();
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        socket.write_all(b":srv 001 bot :Welcome\r\n").await.unwrap();

        socket
            .write_all(b":alice!a@h PRIVMSG #test :bot, status?\r\n")
            .await
            .unwrap();

        let mut replies = String::new();
        while !replies.contains("PRIVMSG #test :line two\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up before replies");
            replies.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        assert!(replies.contains("PRIVMSG #test :line one\r\n"));

        channel.stop().await.unwrap();
    }
}
