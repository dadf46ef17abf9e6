//! SOCKS5 CONNECT through the local anonymizing proxy.
//!
//! Only the no-auth method and the domain address type are needed: the proxy
//! is loopback-local and the target is always `<peer>.onion:<port>`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use cwtch_core::error::{Error, Result};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;

pub(crate) async fn socks5_connect(proxy: &str, host: &str, port: u16) -> Result<TcpStream> {
    if host.len() > 255 {
        return Err(Error::Protocol("target hostname too long for socks5".into()));
    }

    let mut stream = TcpStream::connect(proxy).await?;

    // Greeting: offer the no-auth method only.
    stream.write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice != [SOCKS_VERSION, METHOD_NO_AUTH] {
        return Err(Error::Protocol("socks5 proxy refused the no-auth method".into()));
    }

    // CONNECT request with a domain target so the proxy resolves the onion.
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host.len() as u8]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err(Error::Protocol("socks5 reply has bad version".into()));
    }
    if header[1] != 0x00 {
        return Err(Error::Protocol(format!("socks5 connect refused: code {}", header[1])));
    }

    // Drain the bound address; its shape depends on the address type.
    let addr_len = match header[3] {
        0x01 => 4,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        0x04 => 16,
        other => {
            return Err(Error::Protocol(format!("socks5 reply has bad address type {}", other)));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal in-process SOCKS5 server that accepts any CONNECT.
    async fn fake_proxy() -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();

            let mut greeting = [0u8; 3];
            sock.read_exact(&mut greeting).await.unwrap();
            sock.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 5];
            sock.read_exact(&mut head).await.unwrap();
            let mut target = vec![0u8; head[4] as usize + 2];
            sock.read_exact(&mut target).await.unwrap();

            sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            target
        });
        (port, task)
    }

    #[tokio::test]
    async fn test_connect_through_fake_proxy() {
        let (port, proxy) = fake_proxy().await;
        let proxy_addr = format!("127.0.0.1:{}", port);

        let _stream = socks5_connect(&proxy_addr, "abcdef.onion", 9878).await.unwrap();

        let target = proxy.await.unwrap();
        assert_eq!(&target[..target.len() - 2], b"abcdef.onion");
        assert_eq!(&target[target.len() - 2..], &9878u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_refused_connect_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            sock.read_exact(&mut greeting).await.unwrap();
            sock.write_all(&[0x05, 0x00]).await.unwrap();
            let mut head = [0u8; 5];
            sock.read_exact(&mut head).await.unwrap();
            let mut rest = vec![0u8; head[4] as usize + 2];
            sock.read_exact(&mut rest).await.unwrap();
            // Host unreachable.
            sock.write_all(&[0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let result = socks5_connect(&format!("127.0.0.1:{}", port), "dead.onion", 9878).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
