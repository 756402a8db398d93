//! HTTP(S) MITM front-end.
//!
//! Plain requests are forwarded as-is except for the `User-Agent` header.
//! Every CONNECT is intercepted: the proxy answers the TLS handshake with a
//! certificate minted for the requested host, reads the decrypted requests
//! and re-sends them to the origin over a new TLS session. All outbound
//! connections go through the shared dialer.

use crate::cert::CertificateAuthority;
use crate::dialer::Dialer;
use crate::error::ConfigError;
use crate::user_agent::UserAgentPool;
use crate::utils;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, HOST, USER_AGENT};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::{TlsAcceptor, TlsConnector};

type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Headers meant for the proxy hop, never forwarded.
const PROXY_HEADERS: [&str; 4] = [
    "connection",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Where a forwarded request goes.
#[derive(Debug, Clone)]
struct Target {
    /// `host:port` handed to the dialer.
    authority: String,
    /// Host used for the `Host` header and TLS server name.
    host: String,
    /// Whether the origin leg is TLS.
    tls: bool,
}

/// HTTP proxy server that rewrites user agents and intercepts TLS.
#[derive(Clone)]
pub struct HttpProxy {
    dialer: Arc<dyn Dialer>,
    user_agents: Arc<UserAgentPool>,
    ca: Arc<CertificateAuthority>,
    tls: TlsConnector,
}

impl HttpProxy {
    /// Create a proxy that verifies origins against the webpki roots.
    pub fn new(
        dialer: Arc<dyn Dialer>,
        user_agents: Arc<UserAgentPool>,
        ca: Arc<CertificateAuthority>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            dialer,
            user_agents,
            ca,
            tls: default_tls_connector()?,
        })
    }

    /// Replace the connector used for the origin leg of intercepted sessions.
    pub fn with_tls_connector(mut self, tls: TlsConnector) -> Self {
        self.tls = tls;
        self
    }

    /// Serve clients from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("HTTP proxy listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("HTTP proxy: New connection from {}", addr);

            let proxy = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let proxy = proxy.clone();
                    async move { proxy.handle(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .preserve_header_case(true)
                    .title_case_headers(true)
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await
                {
                    debug!("HTTP proxy: connection from {} ended: {}", addr, err);
                }
            });
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>, hyper::Error> {
        debug!("HTTP proxy: {} {}", req.method(), req.uri());

        if req.method() == Method::CONNECT {
            return Ok(self.intercept(req));
        }

        match plain_target(req.uri()) {
            Some(target) => Ok(self.forward(req, &target).await),
            None => Ok(status_response(
                StatusCode::BAD_REQUEST,
                "Proxy requests must use an absolute http:// or https:// URI",
            )),
        }
    }

    /// Accept a CONNECT and serve the decrypted session in the background.
    fn intercept(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
            return status_response(StatusCode::BAD_REQUEST, "CONNECT must be to host:port");
        };
        let host = match utils::split_host_port(&authority) {
            Ok((host, _)) => host,
            Err(_) => {
                return status_response(StatusCode::BAD_REQUEST, "CONNECT must be to host:port")
            }
        };

        let server_config = match self.ca.server_config_for(&host) {
            Ok(config) => config,
            Err(e) => {
                error!("HTTP proxy: no certificate for {}: {}", host, e);
                return status_response(StatusCode::INTERNAL_SERVER_ERROR, "Certificate error");
            }
        };

        let target = Target {
            authority,
            host,
            tls: true,
        };
        let proxy = self.clone();
        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    if let Err(e) = proxy.serve_intercepted(upgraded, server_config, target).await {
                        debug!("HTTP proxy: intercepted session ended: {:#}", e);
                    }
                }
                Err(e) => warn!("HTTP proxy: upgrade error: {}", e),
            }
        });

        Response::new(empty())
    }

    async fn serve_intercepted(
        self,
        upgraded: Upgraded,
        server_config: Arc<ServerConfig>,
        target: Target,
    ) -> anyhow::Result<()> {
        let tls = TlsAcceptor::from(server_config)
            .accept(TokioIo::new(upgraded))
            .await
            .with_context(|| format!("TLS handshake with client for {}", target.host))?;

        let target = Arc::new(target);
        let service = service_fn(move |req| {
            let proxy = self.clone();
            let target = target.clone();
            async move { Ok::<_, hyper::Error>(proxy.forward(req, &target).await) }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(TokioIo::new(tls), service)
            .await?;
        Ok(())
    }

    /// Rewrite a request and send it to the origin through the dialer.
    async fn forward(&self, mut req: Request<Incoming>, target: &Target) -> Response<ProxyBody> {
        if let Err(e) = self.rewrite(&mut req, target) {
            error!("HTTP proxy: cannot rewrite request: {}", e);
            return status_response(StatusCode::INTERNAL_SERVER_ERROR, "Proxy error");
        }

        let conn = match self.dialer.dial("tcp", &target.authority).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("HTTP proxy: dial {} failed: {}", target.authority, e);
                return status_response(StatusCode::BAD_GATEWAY, "Upstream connection failed");
            }
        };

        let result = if target.tls {
            match ServerName::try_from(target.host.clone()) {
                Ok(name) => match self.tls.connect(name, conn).await {
                    Ok(stream) => send_request(req, stream).await,
                    Err(e) => Err(anyhow!("TLS handshake with {}: {}", target.host, e)),
                },
                Err(e) => Err(anyhow!("invalid server name {}: {}", target.host, e)),
            }
        } else {
            send_request(req, conn).await
        };

        match result {
            Ok(resp) => resp.map(|body| body.boxed()),
            Err(e) => {
                warn!("HTTP proxy: request to {} failed: {:#}", target.authority, e);
                status_response(StatusCode::BAD_GATEWAY, "Upstream request failed")
            }
        }
    }

    /// Replace the user agent, drop proxy headers, switch to origin-form.
    fn rewrite(&self, req: &mut Request<Incoming>, target: &Target) -> anyhow::Result<()> {
        let user_agent = self.user_agents.random_name()?;
        let headers = req.headers_mut();
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        for name in PROXY_HEADERS {
            headers.remove(HeaderName::from_static(name));
        }
        if !headers.contains_key(HOST) {
            headers.insert(HOST, HeaderValue::from_str(&target.authority)?);
        }

        let path = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/")
            .parse::<Uri>()?;
        *req.uri_mut() = path;
        Ok(())
    }
}

/// Target of an absolute-form `http://` or `https://` request.
fn plain_target(uri: &Uri) -> Option<Target> {
    let (tls, default_port) = match uri.scheme_str()? {
        "http" => (false, 80),
        "https" => (true, 443),
        _ => return None,
    };
    let host = uri.host()?.trim_start_matches('[').trim_end_matches(']');
    let port = uri.port_u16().unwrap_or(default_port);
    Some(Target {
        authority: utils::join_host_port(host, port),
        host: host.to_string(),
        tls,
    })
}

async fn send_request<S>(req: Request<Incoming>, stream: S) -> anyhow::Result<Response<Incoming>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await?;

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!("HTTP proxy: upstream connection ended: {}", err);
        }
    });

    Ok(sender.send_request(req).await?)
}

/// Connector for origin TLS, trusting the bundled webpki roots.
pub fn default_tls_connector() -> Result<TlsConnector, ConfigError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    tls_connector(roots)
}

/// Connector for origin TLS trusting `roots`.
pub fn tls_connector(roots: RootCertStore) -> Result<TlsConnector, ConfigError> {
    let mut config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::Certificate(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsConnector::from(Arc::new(config)))
}

fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn status_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let mut resp = Response::new(full(message));
    *resp.status_mut() = status;
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::Connection;
    use crate::error::DialError;
    use crate::utils::SharedRng;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::convert::Infallible;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    /// What the fake origin saw.
    #[derive(Debug)]
    struct Seen {
        dialed: String,
        uri: String,
        user_agent: Option<String>,
        hop_headers: bool,
    }

    /// Dialer that spins up an in-memory origin server for every dial.
    struct FakeOrigin {
        tls: Option<Arc<ServerConfig>>,
        seen: mpsc::UnboundedSender<Seen>,
        fail: bool,
    }

    #[async_trait]
    impl Dialer for FakeOrigin {
        async fn dial(&self, _network: &str, address: &str) -> Result<Connection, DialError> {
            if self.fail {
                return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
            }
            let (proxy_side, origin_side) = tokio::io::duplex(64 * 1024);
            let seen = self.seen.clone();
            let tls = self.tls.clone();
            let dialed = address.to_string();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let _ = seen.send(Seen {
                        dialed: dialed.clone(),
                        uri: req.uri().to_string(),
                        user_agent: req
                            .headers()
                            .get(USER_AGENT)
                            .map(|v| v.to_str().unwrap().to_string()),
                        hop_headers: req.headers().contains_key("proxy-connection")
                            || req.headers().contains_key("connection"),
                    });
                    async { Ok::<_, Infallible>(Response::new(Full::new(Bytes::from("ok")))) }
                });
                match tls {
                    Some(config) => {
                        let stream = TlsAcceptor::from(config).accept(origin_side).await.unwrap();
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    }
                    None => {
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(origin_side), service)
                            .await;
                    }
                }
            });

            Ok(Box::new(proxy_side))
        }
    }

    fn user_agents() -> Arc<UserAgentPool> {
        Arc::new(
            UserAgentPool::new(
                vec!["UA1".to_string(), "UA2".to_string()],
                SharedRng::from_time(),
            )
            .unwrap(),
        )
    }

    async fn start(proxy: HttpProxy) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { proxy.serve(listener).await });
        addr
    }

    async fn client_over<S>(stream: S) -> hyper::client::conn::http1::SendRequest<Empty<Bytes>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .unwrap();
        tokio::spawn(conn);
        sender
    }

    fn get(uri: &str, host: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .uri(uri)
            .header(HOST, host)
            .header(USER_AGENT, "OriginalUA")
            .header("Proxy-Connection", "keep-alive")
            .header("Connection", "keep-alive")
            .body(Empty::new())
            .unwrap()
    }

    #[tokio::test]
    async fn plain_request_gets_pool_user_agent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(FakeOrigin {
            tls: None,
            seen: tx,
            fail: false,
        });
        let ca = Arc::new(CertificateAuthority::generate().unwrap());
        let addr = start(HttpProxy::new(dialer, user_agents(), ca).unwrap()).await;

        let mut sender = client_over(TcpStream::connect(addr).await.unwrap()).await;
        let mut agents = HashSet::new();
        for _ in 0..24 {
            sender.ready().await.unwrap();
            let resp = sender
                .send_request(get("http://example.test/path?q=1", "example.test"))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let body = resp.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"ok");

            let seen = rx.recv().await.unwrap();
            assert_eq!(seen.dialed, "example.test:80");
            assert_eq!(seen.uri, "/path?q=1");
            assert!(!seen.hop_headers);
            let ua = seen.user_agent.unwrap();
            assert!(ua == "UA1" || ua == "UA2", "unexpected user agent {}", ua);
            agents.insert(ua);
        }
        assert_eq!(agents.len(), 2);
    }

    #[tokio::test]
    async fn absolute_https_request_is_forwarded_over_tls() {
        let origin_ca = CertificateAuthority::generate().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(FakeOrigin {
            tls: Some(origin_ca.server_config_for("example.test").unwrap()),
            seen: tx,
            fail: false,
        });

        let mut origin_roots = RootCertStore::empty();
        origin_roots.add(origin_ca.cert_der()).unwrap();

        let ca = Arc::new(CertificateAuthority::generate().unwrap());
        let proxy = HttpProxy::new(dialer, user_agents(), ca)
            .unwrap()
            .with_tls_connector(tls_connector(origin_roots).unwrap());
        let addr = start(proxy).await;

        let mut sender = client_over(TcpStream::connect(addr).await.unwrap()).await;
        let resp = sender
            .send_request(get("https://example.test/", "example.test"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.dialed, "example.test:443");
        assert_eq!(seen.uri, "/");
        assert!(!seen.hop_headers);
        let ua = seen.user_agent.unwrap();
        assert!(ua == "UA1" || ua == "UA2", "unexpected user agent {}", ua);
    }

    #[tokio::test]
    async fn failed_dial_is_bad_gateway() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(FakeOrigin {
            tls: None,
            seen: tx,
            fail: true,
        });
        let ca = Arc::new(CertificateAuthority::generate().unwrap());
        let addr = start(HttpProxy::new(dialer, user_agents(), ca).unwrap()).await;

        let mut sender = client_over(TcpStream::connect(addr).await.unwrap()).await;
        let resp = sender
            .send_request(get("http://example.test/", "example.test"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn origin_form_request_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(FakeOrigin {
            tls: None,
            seen: tx,
            fail: false,
        });
        let ca = Arc::new(CertificateAuthority::generate().unwrap());
        let addr = start(HttpProxy::new(dialer, user_agents(), ca).unwrap()).await;

        let mut sender = client_over(TcpStream::connect(addr).await.unwrap()).await;
        let resp = sender.send_request(get("/", "example.test")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn connect_is_intercepted_and_user_agent_rewritten() {
        let origin_ca = CertificateAuthority::generate().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(FakeOrigin {
            tls: Some(origin_ca.server_config_for("example.test").unwrap()),
            seen: tx,
            fail: false,
        });

        let mut origin_roots = RootCertStore::empty();
        origin_roots.add(origin_ca.cert_der()).unwrap();

        let mitm_ca = Arc::new(CertificateAuthority::generate().unwrap());
        let mut client_roots = RootCertStore::empty();
        client_roots.add(mitm_ca.cert_der()).unwrap();

        let proxy = HttpProxy::new(dialer, user_agents(), mitm_ca)
            .unwrap()
            .with_tls_connector(tls_connector(origin_roots).unwrap());
        let addr = start(proxy).await;

        // CONNECT by hand, then read the response head.
        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(b"CONNECT example.test:443 HTTP/1.1\r\nHost: example.test:443\r\n\r\n")
            .await
            .unwrap();
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(tcp.read_u8().await.unwrap());
        }
        assert!(head.starts_with(b"HTTP/1.1 200"), "{}", String::from_utf8_lossy(&head));

        // The client only trusts the MITM CA; the handshake must succeed.
        let tls = tls_connector(client_roots)
            .unwrap()
            .connect(ServerName::try_from("example.test").unwrap(), tcp)
            .await
            .unwrap();

        let mut sender = client_over(tls).await;
        let resp = sender.send_request(get("/secure", "example.test")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.dialed, "example.test:443");
        assert_eq!(seen.uri, "/secure");
        let ua = seen.user_agent.unwrap();
        assert!(ua == "UA1" || ua == "UA2", "unexpected user agent {}", ua);
    }

    #[test]
    fn plain_target_http_defaults_port_80() {
        let target = plain_target(&"http://example.com/x".parse().unwrap()).unwrap();
        assert_eq!(target.authority, "example.com:80");
        assert!(!target.tls);

        let target = plain_target(&"http://[::1]:8080/".parse().unwrap()).unwrap();
        assert_eq!(target.authority, "[::1]:8080");
        assert_eq!(target.host, "::1");

        assert!(plain_target(&"/relative".parse().unwrap()).is_none());
        assert!(plain_target(&"ftp://example.com/".parse().unwrap()).is_none());
    }

    #[test]
    fn plain_target_https_defaults_port_443() {
        let target = plain_target(&"https://example.com/x".parse().unwrap()).unwrap();
        assert_eq!(target.authority, "example.com:443");
        assert_eq!(target.host, "example.com");
        assert!(target.tls);

        let target = plain_target(&"https://example.com:8443/".parse().unwrap()).unwrap();
        assert_eq!(target.authority, "example.com:8443");
    }
}
