//! Minimal control-port client for hidden-service provisioning.
//!
//! Speaks just enough of the control protocol to cookie-authenticate and
//! manage one onion service: `PROTOCOLINFO`, `AUTHENTICATE`, `ADD_ONION`,
//! `DEL_ONION`. Replies are CRLF lines `NNN<sep>text` where a space
//! separator marks the final line of a reply.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub(crate) struct ControlClient {
    stream: BufReader<TcpStream>,
}

impl ControlClient {
    pub(crate) async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to control port {}", addr))?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Cookie authentication: locate the cookie file via PROTOCOLINFO, read
    /// it, and present it hex-encoded.
    pub(crate) async fn authenticate(&mut self) -> Result<()> {
        let reply = self.command("PROTOCOLINFO 1").await?;
        let cookie_path = reply
            .iter()
            .find_map(|line| parse_cookie_path(line))
            .context("control daemon offers no cookie file")?;

        let cookie = tokio::fs::read(&cookie_path)
            .await
            .with_context(|| format!("reading control cookie {}", cookie_path))?;
        self.command(&format!("AUTHENTICATE {}", hex::encode(cookie)))
            .await?;
        tracing::debug!("control port authenticated");
        Ok(())
    }

    /// Publish a hidden service mapping `virtual_port` to the local
    /// listener. Returns the service id (the onion address without suffix).
    pub(crate) async fn add_onion(&mut self, virtual_port: u16, local_port: u16) -> Result<String> {
        let reply = self
            .command(&format!(
                "ADD_ONION NEW:BEST Flags=DiscardPK Port={},127.0.0.1:{}",
                virtual_port, local_port
            ))
            .await?;
        reply
            .iter()
            .find_map(|line| parse_service_id(line))
            .context("no ServiceID in ADD_ONION reply")
    }

    pub(crate) async fn del_onion(&mut self, service_id: &str) -> Result<()> {
        self.command(&format!("DEL_ONION {}", service_id)).await?;
        Ok(())
    }

    async fn command(&mut self, cmd: &str) -> Result<Vec<String>> {
        self.stream.get_mut().write_all(cmd.as_bytes()).await?;
        self.stream.get_mut().write_all(b"\r\n").await?;
        self.stream.get_mut().flush().await?;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.stream.read_line(&mut line).await?;
            if n == 0 {
                bail!("control connection closed mid-reply");
            }
            let line = line.trim_end().to_string();
            if line.len() < 4 {
                bail!("short control reply: {:?}", line);
            }
            if !line.starts_with('2') {
                bail!("control error reply: {}", line);
            }
            let last = line.as_bytes()[3] == b' ';
            lines.push(line);
            if last {
                break;
            }
        }
        Ok(lines)
    }
}

fn parse_cookie_path(line: &str) -> Option<String> {
    let rest = &line[line.find("COOKIEFILE=\"")? + "COOKIEFILE=\"".len()..];
    Some(rest[..rest.find('"')?].to_string())
}

fn parse_service_id(line: &str) -> Option<String> {
    line.strip_prefix("250-ServiceID=")
        .map(|id| id.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_cookie_path() {
        let line = r#"250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE="/run/tor/control.authcookie""#;
        assert_eq!(
            parse_cookie_path(line).as_deref(),
            Some("/run/tor/control.authcookie")
        );
        assert_eq!(parse_cookie_path("250-AUTH METHODS=NULL"), None);
    }

    #[test]
    fn test_parse_service_id() {
        assert_eq!(
            parse_service_id("250-ServiceID=abcd1234").as_deref(),
            Some("abcd1234")
        );
        assert_eq!(parse_service_id("250 OK"), None);
    }

    #[tokio::test]
    async fn test_publish_against_fake_daemon() {
        let cookie_dir = tempfile::TempDir::new().unwrap();
        let cookie_path = cookie_dir.path().join("control.authcookie");
        std::fs::write(&cookie_path, [0xA5u8; 32]).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());

        let expected_cookie = hex::encode([0xA5u8; 32]);
        let cookie_file = cookie_path.display().to_string();
        let daemon = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(sock);

            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), "PROTOCOLINFO 1");
            reader
                .get_mut()
                .write_all(
                    format!(
                        "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=COOKIE COOKIEFILE=\"{}\"\r\n250 OK\r\n",
                        cookie_file
                    )
                    .as_bytes(),
                )
                .await
                .unwrap();

            line.clear();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), format!("AUTHENTICATE {}", expected_cookie));
            reader.get_mut().write_all(b"250 OK\r\n").await.unwrap();

            line.clear();
            reader.read_line(&mut line).await.unwrap();
            assert!(line.starts_with("ADD_ONION NEW:BEST"));
            reader
                .get_mut()
                .write_all(b"250-ServiceID=testservice123\r\n250 OK\r\n")
                .await
                .unwrap();

            line.clear();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), "DEL_ONION testservice123");
            reader.get_mut().write_all(b"250 OK\r\n").await.unwrap();
        });

        let mut client = ControlClient::connect(&addr).await.unwrap();
        client.authenticate().await.unwrap();
        let id = client.add_onion(9878, 40001).await.unwrap();
        assert_eq!(id, "testservice123");
        client.del_onion(&id).await.unwrap();

        daemon.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_reply_surfaces() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(sock);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader
                .get_mut()
                .write_all(b"515 Bad authentication\r\n")
                .await
                .unwrap();
        });

        let mut client = ControlClient::connect(&addr).await.unwrap();
        assert!(client.command("AUTHENTICATE deadbeef").await.is_err());
    }
}
