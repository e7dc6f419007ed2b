//! Byte-stream transports the session can run over.
//!
//! `"tcp!host!port"` and `"tls!host!port"` address strings are accepted, the
//! same `proto!arg!arg` shape `rs9p`'s server side parses with
//! [`crate::utils::parse_proto`].

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::Error;
use crate::utils::{parse_proto, Result};

/// A connected, full-duplex byte stream. `TcpStream` and a rustls
/// `TlsStream<TcpStream>` both satisfy this; boxing behind it lets the
/// session and receiver stay oblivious to which one they're holding.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncDuplex for T {}

/// Root certificate source for `tls!` addresses.
#[derive(Clone)]
pub enum TlsRoots {
    /// The Mozilla root set shipped by `webpki-roots`.
    WebPki,
    /// A caller-supplied store, e.g. loaded from a custom CA bundle.
    Custom(Arc<RootCertStore>),
}

impl Default for TlsRoots {
    fn default() -> Self {
        TlsRoots::WebPki
    }
}

/// Open a transport for `addr`, one of `"tcp!host!port"` or `"tls!host!port"`.
pub async fn connect(addr: &str, roots: &TlsRoots) -> Result<Box<dyn AsyncDuplex>> {
    let (proto, host, port) = parse_proto(addr)
        .ok_or_else(|| Error::MalformedFrame(format!("not a proto!host!port address: {}", addr)))?;

    match proto {
        "tcp" => {
            let stream = TcpStream::connect((host, port.parse::<u16>().map_err(|_| {
                Error::MalformedFrame(format!("invalid port: {}", port))
            })?))
            .await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        "tls" => {
            let stream = TcpStream::connect((host, port.parse::<u16>().map_err(|_| {
                Error::MalformedFrame(format!("invalid port: {}", port))
            })?))
            .await?;
            stream.set_nodelay(true)?;

            let root_store = match roots {
                TlsRoots::WebPki => {
                    let mut store = RootCertStore::empty();
                    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                    store
                }
                TlsRoots::Custom(store) => (**store).clone(),
            };
            let config = RustlsClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            let connector = TlsConnector::from(Arc::new(config));
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|_| Error::MalformedFrame(format!("invalid server name: {}", host)))?;
            let tls = connector.connect(server_name, stream).await?;
            Ok(Box::new(tls))
        }
        other => Err(Error::Unsupported(format!("transport protocol {:?}", other))),
    }
}
