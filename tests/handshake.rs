//! End-to-end handshake tests against a scripted in-memory backend
//!
//! The backend side is driven by hand over `tokio::io::duplex` (or a local
//! TCP listener), so every byte the client sends can be checked. TLS cases
//! use a self-signed certificate generated with rcgen.

use bytes::Bytes;
use pg_startup::connection::{Connection, ConnectionConfig, HandshakeState, SslMode, TlsConfig};
use pg_startup::{AuthVerdict, Authenticator, Connector, Error};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_rustls::TlsAcceptor;

const SSL_REQUEST: [u8; 8] = [0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ConnectionConfig {
    ConnectionConfig::builder("app", "alice")
        .io_timeout(Duration::from_secs(5))
        .build()
}

fn expected_startup() -> Vec<u8> {
    let mut buf = vec![0, 0, 0, 33, 0, 3, 0, 0];
    buf.extend_from_slice(b"user\0alice\0database\0app\0\0");
    buf
}

fn message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = vec![tag];
    buf.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

fn auth_ok_then_ready() -> Vec<u8> {
    let mut buf = message(b'R', &0i32.to_be_bytes());
    buf.extend(message(b'S', b"server_version\x0016.2\0"));
    buf.extend(message(b'K', &[0, 0, 0x30, 0x39, 0, 0, 0, 42]));
    buf.extend(message(b'Z', b"I"));
    buf
}

/// Read one untagged startup message, length prefix included
async fn read_startup<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut msg = len.to_vec();
    msg.resize(i32::from_be_bytes(len) as usize, 0);
    stream.read_exact(&mut msg[4..]).await.unwrap();
    msg
}

/// Accept a trust login; hands the stream back so the caller controls when
/// the backend hangs up
async fn serve_trust<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S) -> (Vec<u8>, S) {
    let startup = read_startup(&mut stream).await;
    stream.write_all(&auth_ok_then_ready()).await.unwrap();
    stream.flush().await.unwrap();
    (startup, stream)
}

/// Check the SSL probe and answer it with `response`
async fn answer_probe(stream: &mut DuplexStream, response: u8) {
    let mut probe = [0u8; 8];
    stream.read_exact(&mut probe).await.unwrap();
    assert_eq!(probe, SSL_REQUEST);
    stream.write_all(&[response]).await.unwrap();
}

struct SelfSigned {
    acceptor: TlsAcceptor,
    cert_pem: String,
}

fn self_signed() -> SelfSigned {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();

    SelfSigned {
        acceptor: TlsAcceptor::from(Arc::new(server_config)),
        cert_pem: cert.pem(),
    }
}

#[tokio::test]
async fn plaintext_handshake_end_to_end() {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(serve_trust(server));

    let conn = Connector::new(config()).handshake(client).await.unwrap();
    let (startup, _server) = backend.await.unwrap();

    assert_eq!(startup, expected_startup());
    assert_eq!(conn.state(), HandshakeState::Authenticated);
    assert!(!conn.is_encrypted());
    assert_eq!(conn.server_parameter("server_version"), Some("16.2"));
    assert_eq!(conn.backend_key().map(|k| k.process_id), Some(12345));
}

#[tokio::test]
async fn refused_ssl_falls_back_to_plaintext_under_prefer() {
    init_tracing();
    let (client, mut server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(async move {
        answer_probe(&mut server, b'N').await;
        // A readable plaintext startup proves no TLS was attempted
        serve_trust(server).await
    });

    let config = ConnectionConfig::builder("app", "alice")
        .encryption(true)
        .build();
    let conn = Connector::new(config).handshake(client).await.unwrap();
    let (startup, _server) = backend.await.unwrap();

    assert_eq!(startup, expected_startup());
    assert!(!conn.is_encrypted());
}

#[tokio::test]
async fn refused_ssl_is_fatal_under_require() {
    init_tracing();
    let (client, mut server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(async move {
        answer_probe(&mut server, b'N').await;
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        rest
    });

    let config = ConnectionConfig::builder("app", "alice")
        .sslmode(SslMode::Require)
        .build();
    let err = Connector::new(config).handshake(client).await.unwrap_err();

    assert!(matches!(err, Error::SslRefused(SslMode::Require)));
    // No startup message leaks out in plaintext
    assert!(backend.await.unwrap().is_empty());
}

#[tokio::test]
async fn accepted_ssl_routes_startup_through_tls() {
    init_tracing();
    let tls = self_signed();
    let (client, mut server) = tokio::io::duplex(16 * 1024);
    let backend = tokio::spawn(async move {
        answer_probe(&mut server, b'S').await;
        let tls_stream = tls.acceptor.accept(server).await.unwrap();
        serve_trust(tls_stream).await
    });

    let config = ConnectionConfig::builder("app", "alice")
        .encryption(true)
        .build();
    let conn = Connector::new(config).handshake(client).await.unwrap();
    let (startup, _server) = backend.await.unwrap();

    // The server only sees the startup message after decrypting it
    assert_eq!(startup, expected_startup());
    assert!(conn.is_encrypted());
    assert_eq!(conn.state(), HandshakeState::Authenticated);
}

#[tokio::test]
async fn verify_full_accepts_certificate_from_custom_ca() {
    init_tracing();
    let tls = self_signed();
    let ca_path = std::env::temp_dir().join(format!("pg-startup-ca-{}.pem", std::process::id()));
    std::fs::write(&ca_path, &tls.cert_pem).unwrap();

    let tls_config = TlsConfig::builder()
        .ca_cert_path(ca_path.to_string_lossy())
        .build()
        .unwrap();

    let (client, mut server) = tokio::io::duplex(16 * 1024);
    let acceptor = tls.acceptor;
    let backend = tokio::spawn(async move {
        answer_probe(&mut server, b'S').await;
        let tls_stream = acceptor.accept(server).await.unwrap();
        serve_trust(tls_stream).await
    });

    let config = ConnectionConfig::builder("app", "alice")
        .sslmode(SslMode::VerifyFull)
        .build();
    let conn = Connector::new(config)
        .with_tls(tls_config)
        .handshake(client)
        .await
        .unwrap();
    let _ = backend.await.unwrap();
    let _ = std::fs::remove_file(&ca_path);

    assert!(conn.is_encrypted());
}

#[tokio::test]
async fn unverified_tls_accepts_non_dns_host_names() {
    init_tracing();
    let tls = self_signed();
    let (client, mut server) = tokio::io::duplex(16 * 1024);
    let backend = tokio::spawn(async move {
        answer_probe(&mut server, b'S').await;
        let tls_stream = tls.acceptor.accept(server).await.unwrap();
        serve_trust(tls_stream).await
    });

    let config = ConnectionConfig::builder("app", "alice")
        .host("pg_primary")
        .encryption(true)
        .build();
    let conn = Connector::new(config).handshake(client).await.unwrap();
    let _ = backend.await.unwrap();

    assert!(conn.is_encrypted());
}

#[tokio::test]
async fn invalid_host_name_fails_upgrade_under_verify_full() {
    init_tracing();
    let (client, mut server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(async move {
        answer_probe(&mut server, b'S').await;
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        rest
    });

    let config = ConnectionConfig::builder("app", "alice")
        .host("db/primary")
        .sslmode(SslMode::VerifyFull)
        .build();
    let err = Connector::new(config).handshake(client).await.unwrap_err();

    assert!(matches!(err, Error::EncryptionUpgradeFailed(_)));
    assert_eq!(err.category(), "tls_upgrade");
    // Nothing, not even a ClientHello, follows the probe
    assert!(backend.await.unwrap().is_empty());
}

#[tokio::test]
async fn untrusted_certificate_fails_upgrade() {
    init_tracing();
    let tls = self_signed();
    let (client, mut server) = tokio::io::duplex(16 * 1024);
    let backend = tokio::spawn(async move {
        answer_probe(&mut server, b'S').await;
        // Client aborts the TLS handshake
        tls.acceptor.accept(server).await.is_err()
    });

    let config = ConnectionConfig::builder("app", "alice")
        .sslmode(SslMode::VerifyFull)
        .build();
    let err = Connector::new(config).handshake(client).await.unwrap_err();

    assert!(matches!(err, Error::EncryptionUpgradeFailed(_)));
    assert!(backend.await.unwrap());
}

#[tokio::test]
async fn backend_hangup_is_transport_error() {
    init_tracing();
    let (client, mut server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(async move {
        read_startup(&mut server).await;
        drop(server);
    });

    let err = Connector::new(config()).handshake(client).await.unwrap_err();
    backend.await.unwrap();

    assert!(matches!(err, Error::ConnectionClosed));
    assert!(err.is_transport());
}

#[tokio::test]
async fn rejected_login_closes_connection() {
    struct Deny;

    impl Authenticator for Deny {
        async fn authenticate<S>(
            &self,
            _conn: &mut Connection<S>,
            _initial: Bytes,
        ) -> pg_startup::Result<AuthVerdict>
        where
            S: AsyncRead + AsyncWrite + Unpin + Send,
        {
            Ok(AuthVerdict::from(false))
        }
    }

    init_tracing();
    let (client, server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(async move {
        let (_, mut server) = serve_trust(server).await;
        // Client must have shut its side down
        let mut buf = [0u8; 16];
        server.read(&mut buf).await.unwrap()
    });

    let err = Connector::new(config())
        .with_authenticator(Deny)
        .handshake(client)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Authentication(_)));
    assert_eq!(backend.await.unwrap(), 0);
}

#[tokio::test]
async fn server_error_response_fails_authentication() {
    init_tracing();
    let (client, mut server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(async move {
        read_startup(&mut server).await;
        let error = message(
            b'E',
            b"SFATAL\0C3D000\0Mdatabase \"app\" does not exist\0\0",
        );
        server.write_all(&error).await.unwrap();
        server
    });

    let err = Connector::new(config()).handshake(client).await.unwrap_err();
    let _server = backend.await.unwrap();

    match err {
        Error::Authentication(reason) => assert!(reason.contains("does not exist")),
        other => panic!("expected authentication error, got {:?}", other),
    }
}

#[tokio::test]
async fn cleartext_password_exchange() {
    init_tracing();
    let (client, mut server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(async move {
        read_startup(&mut server).await;
        server
            .write_all(&message(b'R', &3i32.to_be_bytes()))
            .await
            .unwrap();

        let mut password = [0u8; 13];
        server.read_exact(&mut password).await.unwrap();
        server.write_all(&auth_ok_then_ready()).await.unwrap();
        (password, server)
    });

    let config = ConnectionConfig::builder("app", "alice")
        .password("hunter2")
        .build();
    let conn = Connector::new(config).handshake(client).await.unwrap();
    let (password, _server) = backend.await.unwrap();

    assert_eq!(&password, b"p\0\0\0\x0chunter2\0");
    assert_eq!(conn.state(), HandshakeState::Authenticated);
}

#[tokio::test]
async fn silent_backend_times_out() {
    init_tracing();
    let (client, mut server) = tokio::io::duplex(4096);
    let backend = tokio::spawn(async move {
        read_startup(&mut server).await;
        // Say nothing, but keep the stream open
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(server);
    });

    let config = ConnectionConfig::builder("app", "alice")
        .io_timeout(Duration::from_millis(100))
        .build();
    let err = Connector::new(config).handshake(client).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.is_transport());
    backend.abort();
}

#[tokio::test]
async fn invalid_parameters_never_touch_the_stream() {
    let (client, mut server) = tokio::io::duplex(4096);

    let config = ConnectionConfig::builder("app", "alice")
        .param("user", "mallory")
        .build();
    let err = Connector::new(config).handshake(client).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }));

    // Client half was dropped without writing anything
    let mut buf = Vec::new();
    server.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());
}

#[tokio::test]
async fn aborting_handshake_closes_socket() {
    init_tracing();
    let (client, mut server) = tokio::io::duplex(4096);
    let connector = Connector::new(config());
    let handshake = tokio::spawn(async move { connector.handshake(client).await });

    read_startup(&mut server).await;
    handshake.abort();
    assert!(handshake.await.unwrap_err().is_cancelled());

    let mut buf = [0u8; 16];
    assert_eq!(server.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn connect_dials_tcp() {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let backend = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_trust(stream).await
    });

    let config = ConnectionConfig::builder("app", "alice")
        .host("127.0.0.1")
        .port(port)
        .build();
    let conn = Connector::new(config).connect().await.unwrap();
    let (startup, _server) = backend.await.unwrap();

    assert_eq!(startup, expected_startup());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_handshakes_share_one_connector() {
    init_tracing();
    let connector = Arc::new(Connector::new(config()));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve_trust(server));
        let connector = connector.clone();
        tasks.push(tokio::spawn(async move {
            connector.handshake(client).await.map(|conn| conn.id())
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}
