// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! TCP/TLS listener driving the plugin handler

use crate::config::{ListenerTls, ServerConfig};
use crate::kubernetes::ClusterConnector;
use crate::server::handler::PluginHandler;
use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Pause after a failed accept before polling the listener again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct PluginServer {
    handler: Arc<PluginHandler>,
}

impl PluginServer {
    pub fn new(config: ServerConfig, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            handler: Arc::new(PluginHandler::new(Arc::new(config), connector)),
        }
    }

    /// Accept connections until the process is asked to stop
    pub async fn run(self) -> Result<()> {
        let config = self.handler.config();

        // Unreadable TLS material aborts startup instead of serving without a certificate.
        let acceptor = config
            .listener_tls
            .as_ref()
            .map(load_tls_acceptor)
            .transpose()?;

        let listener = TcpListener::bind(&config.listen_address)
            .await
            .with_context(|| format!("Failed to listen on {}", config.listen_address))?;

        info!(
            listen_address = %config.listen_address,
            tls = acceptor.is_some(),
            mutual_tls = config
                .listener_tls
                .as_ref()
                .is_some_and(|tls| tls.client_ca_path.is_some()),
            local = config.local,
            "Server starting"
        );

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        accept_error_backoff(&e).await;
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping server");
                    return Ok(());
                }
            };

            let handler = self.handler.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => serve_connection(stream, remote_addr, handler).await,
                        Err(e) => debug!(address = %remote_addr, error = %e, "TLS handshake failed"),
                    },
                    None => serve_connection(stream, remote_addr, handler).await,
                }
            });
        }
    }
}

async fn accept_error_backoff(error: &std::io::Error) {
    warn!(error = %error, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Serve HTTP/1 on one connection. Dropping the connection drops any in-flight
/// downstream call with it.
async fn serve_connection<S>(stream: S, remote_addr: SocketAddr, handler: Arc<PluginHandler>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(req, remote_addr).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(address = %remote_addr, error = %e, "Connection closed with error");
    }
}

/// Build the TLS acceptor, requiring client certificates when a client CA is configured
pub fn load_tls_acceptor(tls: &ListenerTls) -> Result<TlsAcceptor> {
    let certs = CertificateDer::pem_file_iter(&tls.cert_path)
        .with_context(|| format!("Failed to open TLS certificate {}", tls.cert_path.display()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse TLS certificate {}", tls.cert_path.display()))?;
    let key = PrivateKeyDer::from_pem_file(&tls.key_path)
        .with_context(|| format!("Failed to load TLS key {}", tls.key_path.display()))?;

    let builder = rustls::ServerConfig::builder();
    let builder = match &tls.client_ca_path {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in CertificateDer::pem_file_iter(ca_path)
                .with_context(|| format!("Failed to open client CA {}", ca_path.display()))?
            {
                let cert = cert
                    .with_context(|| format!("Failed to parse client CA {}", ca_path.display()))?;
                roots
                    .add(cert)
                    .with_context(|| format!("Invalid client CA {}", ca_path.display()))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .context("Failed to build client certificate verifier")?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut server_config = builder
        .with_single_cert(certs, key)
        .context("Invalid TLS certificate or key")?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockConnector, MockService};
    use rcgen::{
        BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, DnValue,
        ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
    };
    use rustls::pki_types::ServerName;
    use rustls::ClientConfig;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::TlsConnector;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn install_crypto_provider() {
        // Another test may have installed it already
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    fn distinguished_name(common_name: &str) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        dn
    }

    /// A throwaway CA with one server and one client certificate signed by it
    struct TestPki {
        ca: Certificate,
        server_cert: String,
        server_key: String,
        client_cert: Certificate,
        client_key: KeyPair,
    }

    impl TestPki {
        fn generate() -> Self {
            let ca_key = KeyPair::generate().unwrap();
            let mut ca_params = CertificateParams::default();
            ca_params.distinguished_name = distinguished_name("plugin test ca");
            ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            ca_params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::DigitalSignature,
            ];
            let ca = ca_params.self_signed(&ca_key).unwrap();
            let issuer = Issuer::new(ca_params, ca_key);

            let (server_cert, server_key) =
                leaf(&issuer, "localhost", ExtendedKeyUsagePurpose::ServerAuth);
            let (client_cert, client_key) =
                leaf(&issuer, "applicationset-controller", ExtendedKeyUsagePurpose::ClientAuth);

            Self {
                ca,
                server_cert: server_cert.pem(),
                server_key: server_key.serialize_pem(),
                client_cert,
                client_key,
            }
        }

        /// Server material on disk, plus the client CA when mutual TLS is wanted
        fn listener_files(&self, mutual: bool) -> (ListenerTls, Vec<tempfile::NamedTempFile>) {
            let cert = write_temp(&self.server_cert);
            let key = write_temp(&self.server_key);
            let ca = write_temp(&self.ca.pem());
            let tls = ListenerTls {
                cert_path: cert.path().to_path_buf(),
                key_path: key.path().to_path_buf(),
                client_ca_path: mutual.then(|| ca.path().to_path_buf()),
            };
            (tls, vec![cert, key, ca])
        }

        fn connector(&self, with_client_cert: bool) -> TlsConnector {
            let mut roots = RootCertStore::empty();
            roots.add(self.ca.der().clone()).unwrap();
            let builder = ClientConfig::builder().with_root_certificates(roots);
            let config = if with_client_cert {
                let key =
                    PrivateKeyDer::from_pem_slice(self.client_key.serialize_pem().as_bytes())
                        .unwrap();
                builder
                    .with_client_auth_cert(vec![self.client_cert.der().clone()], key)
                    .unwrap()
            } else {
                builder.with_no_client_auth()
            };
            TlsConnector::from(Arc::new(config))
        }
    }

    fn leaf(
        issuer: &Issuer<'_, KeyPair>,
        name: &str,
        usage: ExtendedKeyUsagePurpose,
    ) -> (Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.distinguished_name = distinguished_name(name);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![usage];
        let cert = params.signed_by(&key, issuer).unwrap();
        (cert, key)
    }

    fn localhost() -> ServerName<'static> {
        ServerName::try_from("localhost").unwrap()
    }

    /// Run both handshake sides over an in-memory pipe, returning (server, client) outcomes
    async fn handshake(
        acceptor: TlsAcceptor,
        connector: TlsConnector,
    ) -> (std::io::Result<()>, std::io::Result<()>) {
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let (server, client) = tokio::join!(
            acceptor.accept(server_io),
            connector.connect(localhost(), client_io)
        );
        (server.map(|_| ()), client.map(|_| ()))
    }

    fn test_handler() -> Arc<PluginHandler> {
        Arc::new(PluginHandler::new(
            Arc::new(ServerConfig::default()),
            Arc::new(MockConnector::new(MockService::new())),
        ))
    }

    /// Read until the end of the response head and return it
    async fn read_response_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the response head");
            head.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(head).unwrap()
    }

    const GET_EXECUTE: &[u8] =
        b"GET /api/v1/getparams.execute HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n";

    #[test]
    fn test_missing_certificate_is_fatal() {
        let tls = ListenerTls {
            cert_path: PathBuf::from("/nonexistent/tls.crt"),
            key_path: PathBuf::from("/nonexistent/tls.key"),
            client_ca_path: None,
        };

        assert!(load_tls_acceptor(&tls).is_err());
    }

    #[test]
    fn test_garbage_key_is_fatal() {
        let cert = write_temp("not a certificate");
        let key = write_temp("not a key");
        let tls = ListenerTls {
            cert_path: cert.path().to_path_buf(),
            key_path: key.path().to_path_buf(),
            client_ca_path: None,
        };

        assert!(load_tls_acceptor(&tls).is_err());
    }

    #[test]
    fn test_missing_client_ca_is_fatal() {
        install_crypto_provider();
        let pki = TestPki::generate();
        let (mut tls, _files) = pki.listener_files(false);
        tls.client_ca_path = Some(PathBuf::from("/nonexistent/ca.crt"));

        assert!(load_tls_acceptor(&tls).is_err());
    }

    #[tokio::test]
    async fn test_tls_handshake_without_client_ca() {
        install_crypto_provider();
        let pki = TestPki::generate();
        let (tls, _files) = pki.listener_files(false);
        let acceptor = load_tls_acceptor(&tls).unwrap();

        let (server, client) = handshake(acceptor, pki.connector(false)).await;

        assert!(server.is_ok(), "server handshake failed: {:?}", server);
        assert!(client.is_ok(), "client handshake failed: {:?}", client);
    }

    #[tokio::test]
    async fn test_mutual_tls_rejects_client_without_certificate() {
        install_crypto_provider();
        let pki = TestPki::generate();
        let (tls, _files) = pki.listener_files(true);
        let acceptor = load_tls_acceptor(&tls).unwrap();

        let (server, _) = handshake(acceptor, pki.connector(false)).await;

        assert!(server.is_err());
    }

    #[tokio::test]
    async fn test_mutual_tls_rejects_certificate_from_other_ca() {
        install_crypto_provider();
        let pki = TestPki::generate();
        let other = TestPki::generate();
        let (tls, _files) = pki.listener_files(true);
        let acceptor = load_tls_acceptor(&tls).unwrap();

        // Trusts the right server but presents a client certificate from another CA
        let mut roots = RootCertStore::empty();
        roots.add(pki.ca.der().clone()).unwrap();
        let key =
            PrivateKeyDer::from_pem_slice(other.client_key.serialize_pem().as_bytes()).unwrap();
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(vec![other.client_cert.der().clone()], key)
            .unwrap();

        let (server, _) = handshake(acceptor, TlsConnector::from(Arc::new(config))).await;

        assert!(server.is_err());
    }

    #[tokio::test]
    async fn test_mutual_tls_accepts_signed_client_certificate() {
        install_crypto_provider();
        let pki = TestPki::generate();
        let (tls, _files) = pki.listener_files(true);
        let acceptor = load_tls_acceptor(&tls).unwrap();

        let (server, client) = handshake(acceptor, pki.connector(true)).await;

        assert!(server.is_ok(), "server handshake failed: {:?}", server);
        assert!(client.is_ok(), "client handshake failed: {:?}", client);
    }

    #[tokio::test]
    async fn test_serves_http_over_mutual_tls() {
        install_crypto_provider();
        let pki = TestPki::generate();
        let (tls, _files) = pki.listener_files(true);
        let acceptor = load_tls_acceptor(&tls).unwrap();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let remote_addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let server = tokio::spawn(async move {
            let stream = acceptor.accept(server_io).await.unwrap();
            serve_connection(stream, remote_addr, test_handler()).await;
        });
        let mut client = pki
            .connector(true)
            .connect(localhost(), client_io)
            .await
            .unwrap();
        client.write_all(GET_EXECUTE).await.unwrap();

        let head = read_response_head(&mut client).await;

        assert!(head.starts_with("HTTP/1.1 405"), "unexpected response: {}", head);
        server.abort();
    }

    #[tokio::test]
    async fn test_run_serves_plain_http() {
        let address = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let config = ServerConfig {
            listen_address: address.to_string(),
            ..Default::default()
        };
        let server = tokio::spawn(
            PluginServer::new(config, Arc::new(MockConnector::new(MockService::new()))).run(),
        );

        let mut stream = None;
        for _ in 0..50 {
            match tokio::net::TcpStream::connect(address).await {
                Ok(connected) => {
                    stream = Some(connected);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let mut stream = stream.expect("server did not start listening");
        stream.write_all(GET_EXECUTE).await.unwrap();

        let head = read_response_head(&mut stream).await;

        assert!(head.starts_with("HTTP/1.1 405"), "unexpected response: {}", head);
        server.abort();
    }

    #[tokio::test]
    async fn test_accept_error_backs_off() {
        let started = Instant::now();

        accept_error_backoff(&std::io::Error::other("too many open files")).await;

        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }
}
