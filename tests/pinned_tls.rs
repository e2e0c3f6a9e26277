use std::sync::Arc;

use image::RgbaImage;
use rcgen::CertifiedKey;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use tradeproof::models::DonationRecord;
use tradeproof::remote::{HttpTransport, RemoteConfig, SubmitError, Transport};

/// Certificate for a name the client never asks for, so only the pin can
/// make it acceptable.
fn server_certificate() -> CertifiedKey {
    rcgen::generate_simple_self_signed(vec!["pinned.test".to_string()]).unwrap()
}

fn acceptor(identity: &CertifiedKey) -> TlsAcceptor {
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_pair.serialize_der()));
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![identity.cert.der().clone()], key)
    .unwrap();

    TlsAcceptor::from(Arc::new(config))
}

/// Serves HTTPS on a loopback port, answering every complete request with 200.
async fn https_server(identity: &CertifiedKey) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("https://{}/donate", listener.local_addr().unwrap());
    let acceptor = acceptor(identity);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();

            tokio::spawn(async move {
                // Rejected handshakes end here.
                let Ok(mut tls) = acceptor.accept(socket).await else {
                    return;
                };

                let mut request = Vec::new();
                let mut chunk = [0u8; 4096];
                while !request_complete(&request) {
                    match tls.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(read) => request.extend_from_slice(&chunk[..read]),
                    }
                }

                let response = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
                if tls.write_all(response.as_bytes()).await.is_ok() {
                    tls.shutdown().await.ok();
                }
            });
        }
    });

    url
}

fn request_complete(request: &[u8]) -> bool {
    let Some(header_end) = request.windows(4).position(|window| window == b"\r\n\r\n") else {
        return false;
    };
    let headers = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
    let body = &request[header_end + 4..];

    match headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
    {
        Some(length) => body.len() >= length,
        None => body.ends_with(b"0\r\n\r\n"),
    }
}

fn record() -> DonationRecord {
    DonationRecord::new(
        Some("Zezima".into()),
        "Receiver".into(),
        1_234,
        RgbaImage::new(4, 4),
    )
}

fn transport(url: &str, cert: Option<String>) -> HttpTransport {
    let config = RemoteConfig {
        url: url.to_string(),
        cert,
    };
    HttpTransport::new(&config, "hunter2").unwrap()
}

#[tokio::test]
async fn pinned_certificate_is_trusted_without_hostname_match() {
    let identity = server_certificate();
    let url = https_server(&identity).await;

    transport(&url, Some(identity.cert.pem()))
        .submit(&record())
        .await
        .unwrap();
}

#[tokio::test]
async fn unpinned_self_signed_server_is_rejected() {
    let identity = server_certificate();
    let url = https_server(&identity).await;

    let result = transport(&url, None).submit(&record()).await;
    assert!(matches!(result, Err(SubmitError::Http(_))), "{result:?}");
}

#[tokio::test]
async fn a_different_pin_does_not_help() {
    let identity = server_certificate();
    let other = server_certificate();
    let url = https_server(&identity).await;

    let result = transport(&url, Some(other.cert.pem())).submit(&record()).await;
    assert!(matches!(result, Err(SubmitError::Http(_))), "{result:?}");
}
