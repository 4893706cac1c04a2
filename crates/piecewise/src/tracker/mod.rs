//! A tracker is a server that manages peers and stats of multiple torrents.
//!
//! Only HTTP trackers are supported, and only one announce is made, before
//! the download starts.
pub mod announce;

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::Error;

pub use announce::{Request, Response};

/// How long to wait for a tracker to answer.
pub const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct Tracker {
    client: Client,
}

impl Tracker {
    pub fn new() -> Result<Self, Error> {
        Self::with_timeout(ANNOUNCE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Whether `url` can be announced to by this client.
    pub fn supports(url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    /// Announce to one tracker.
    pub async fn announce(
        &self,
        url: &str,
        req: &Request,
    ) -> Result<Response, Error> {
        let url = req.url(url)?;
        debug!("announcing to {url}");

        let res = self.client.get(&url).send().await?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::TrackerStatus(status.as_u16()));
        }

        let body = res.bytes().await?;
        Response::from_bytes(&body)
    }

    /// Announce to the trackers in order, returning the response of the
    /// first one that answers. Trackers that are not HTTP are skipped.
    pub async fn announce_any(
        &self,
        urls: &[String],
        req: &Request,
    ) -> Result<Response, Error> {
        let mut last_error = Error::TrackerNoHosts;

        for url in urls {
            if !Self::supports(url) {
                warn!("skipping tracker {url}, only HTTP is supported");
                continue;
            }

            match self.announce(url, req).await {
                Ok(res) => {
                    info!("tracker {url} returned {} peers", res.peers.len());
                    if let Some(warning) = &res.warning {
                        warn!("tracker {url}: {warning}");
                    }
                    return Ok(res);
                }
                Err(e) => {
                    warn!("tracker {url} failed: {e}");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::{
        metainfo::InfoHash,
        peer::{PeerAddress, PeerId},
    };

    /// Answer one HTTP request with `body`, returning the request line.
    async fn serve_once(
        status: &'static str,
        body: &'static [u8],
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: \
                 close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();

            let request = String::from_utf8_lossy(&request).into_owned();
            request.lines().next().unwrap_or_default().to_owned()
        });

        (format!("http://{addr}/announce"), handle)
    }

    fn request() -> Request {
        Request::started(InfoHash([1u8; 20]), PeerId::generate(), 6889, 7)
    }

    #[tokio::test]
    async fn announce_over_http() {
        let mut body = b"d8:intervali900e5:peers6:".to_vec();
        body.extend_from_slice(&[127, 0, 0, 1, 0x1A, 0xE1]);
        body.push(b'e');
        let body: &'static [u8] = Box::leak(body.into_boxed_slice());

        let (url, server) = serve_once("200 OK", body).await;

        let tracker = Tracker::new().unwrap();
        let res = tracker
            .announce_any(&["udp://skipped:80".to_owned(), url], &request())
            .await
            .unwrap();

        assert_eq!(res.peers, vec![PeerAddress::new("127.0.0.1", 6881)]);

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /announce?info_hash=%01%01"));
        assert!(request_line.contains("&compact=1"));
        assert!(request_line.contains("&event=started"));
    }

    #[tokio::test]
    async fn announce_http_error() {
        let (url, server) = serve_once("404 Not Found", b"").await;

        let tracker = Tracker::new().unwrap();
        let r = tracker.announce(&url, &request()).await;
        assert!(matches!(r, Err(Error::TrackerStatus(404))));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn no_http_tracker() {
        let tracker = Tracker::new().unwrap();
        let urls = ["udp://tracker.example:6969".to_owned()];
        let r = tracker.announce_any(&urls, &request()).await;
        assert!(matches!(r, Err(Error::TrackerNoHosts)));
    }
}
