//! Low-level SMTP stream handling.

use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};
use tracing::debug;

/// Longest reply line accepted, CRLF included (RFC 5321 4.5.3.1.5).
const MAX_REPLY_LINE: usize = 512;

/// Client certificate settings for TLS sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM file holding the client certificate chain.
    pub client_cert: Option<PathBuf>,
    /// PEM file holding the client private key. Defaults to `client_cert`.
    pub client_key: Option<PathBuf>,
}

/// How to dial the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Limit applied to connecting and to every read or write.
    pub timeout: Option<Duration>,
    /// Negotiate TLS immediately after connecting (SMTPS, port 465).
    pub implicit_tls: bool,
    /// Certificate settings used for implicit TLS and STARTTLS.
    pub tls: TlsOptions,
}

#[derive(Debug)]
enum Inner {
    Tcp(BufReader<TcpStream>),
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

/// SMTP stream (TCP or TLS) with an optional I/O timeout.
#[derive(Debug)]
pub struct SmtpStream {
    inner: Inner,
    timeout: Option<Duration>,
}

impl SmtpStream {
    /// Returns true once TLS is active.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.inner, Inner::Tls(_))
    }

    /// Reads a line from the stream, without the line terminator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] at end of stream,
    /// [`Error::Protocol`] if the line exceeds 512 octets, or an error if
    /// the read fails or times out.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = match &mut self.inner {
            Inner::Tcp(reader) => {
                with_timeout(self.timeout, "reading a reply", read_capped(reader, &mut line))
                    .await?
            }
            Inner::Tls(reader) => {
                with_timeout(self.timeout, "reading a reply", read_capped(reader, &mut line))
                    .await?
            }
        };
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        if read >= MAX_REPLY_LINE && !line.ends_with('\n') {
            return Err(Error::Protocol(format!(
                "Reply line longer than {MAX_REPLY_LINE} octets"
            )));
        }
        Ok(line.trim_end().to_string())
    }

    /// Writes data to the stream and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or times out.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.inner {
            Inner::Tcp(reader) => {
                with_timeout(self.timeout, "writing", write_flush(reader.get_mut(), data)).await
            }
            Inner::Tls(reader) => {
                with_timeout(self.timeout, "writing", write_flush(reader.get_mut(), data)).await
            }
        }
    }

    /// Upgrades a TCP stream to TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted, the certificate
    /// files cannot be loaded, or the handshake fails.
    pub async fn upgrade_to_tls(self, hostname: &str, options: &TlsOptions) -> Result<Self> {
        let Inner::Tcp(reader) = self.inner else {
            return Err(Error::Protocol("Already using TLS".into()));
        };

        let connector = tls_connector(options).await?;
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::Tls(format!("Invalid server name: {hostname}")))?;

        let handshake = connector.connect(server_name, reader.into_inner());
        let tls_stream = with_timeout(self.timeout, "negotiating TLS", handshake)
            .await
            .map_err(|e| match e {
                Error::Io(e) => Error::Tls(format!("Handshake with {hostname} failed: {e}")),
                other => other,
            })?;

        debug!(hostname, "TLS established");
        Ok(Self {
            inner: Inner::Tls(Box::new(BufReader::new(tls_stream))),
            timeout: self.timeout,
        })
    }
}

/// Connects to an SMTP server, negotiating TLS first when
/// [`ConnectOptions::implicit_tls`] is set.
///
/// # Errors
///
/// Returns [`Error::Connect`] if the server cannot be reached,
/// [`Error::Timeout`] if dialing takes too long, or a TLS error.
pub async fn connect(hostname: &str, port: u16, options: &ConnectOptions) -> Result<SmtpStream> {
    let addr = format!("{hostname}:{port}");
    let dial = TcpStream::connect(&addr);
    let dialed = match options.timeout {
        Some(limit) => tokio::time::timeout(limit, dial)
            .await
            .map_err(|_| Error::Timeout(limit, "connecting"))?,
        None => dial.await,
    };
    let tcp = dialed.map_err(|source| Error::Connect {
        addr: addr.clone(),
        source,
    })?;
    debug!(%addr, implicit_tls = options.implicit_tls, "Connected");

    let stream = SmtpStream {
        inner: Inner::Tcp(BufReader::new(tcp)),
        timeout: options.timeout,
    };
    if options.implicit_tls {
        stream.upgrade_to_tls(hostname, &options.tls).await
    } else {
        Ok(stream)
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    operation: &'static str,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T> {
    let outcome = match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit, operation))?,
        None => fut.await,
    };
    outcome.map_err(Into::into)
}

/// Reads one line, stopping after [`MAX_REPLY_LINE`] bytes.
async fn read_capped<R>(reader: &mut R, line: &mut String) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    reader.take(MAX_REPLY_LINE as u64).read_line(line).await
}

async fn write_flush<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}

/// Creates a TLS connector trusting the webpki roots, presenting a client
/// certificate when one is configured.
async fn tls_connector(options: &TlsOptions) -> Result<TlsConnector> {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let builder = ClientConfig::builder().with_root_certificates(root_store);

    let config = match &options.client_cert {
        Some(cert_path) => {
            let key_path = options.client_key.as_ref().unwrap_or(cert_path);
            let certs = load_certs(cert_path).await?;
            let key = load_key(key_path).await?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::Tls(format!("Unusable client certificate: {e}")))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::Tls(format!("Cannot read {}: {e}", path.display())))
}

async fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path).await?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Invalid certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "No certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

async fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem(path).await?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| Error::Tls(format!("Invalid private key in {}: {e}", path.display())))?
        .ok_or_else(|| Error::Tls(format!("No private key found in {}", path.display())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_file_is_a_tls_error() {
        let options = TlsOptions {
            client_cert: Some(PathBuf::from("/nonexistent/client.pem")),
            client_key: None,
        };
        let err = tls_connector(&options).await.err().unwrap();
        assert!(matches!(err, Error::Tls(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port, &ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let options = ConnectOptions {
            timeout: Some(Duration::from_millis(100)),
            ..ConnectOptions::default()
        };
        let mut stream = connect("127.0.0.1", port, &options).await.unwrap();
        let err = stream.read_line().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_, _)));
        server.abort();
    }

    #[tokio::test]
    async fn end_of_stream_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut stream = connect("127.0.0.1", port, &ConnectOptions::default())
            .await
            .unwrap();
        server.await.unwrap();
        assert!(matches!(
            stream.read_line().await.unwrap_err(),
            Error::ConnectionClosed
        ));
    }
}
