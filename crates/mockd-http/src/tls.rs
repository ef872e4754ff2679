//! TLS support for the HTTPS listener
//!
//! Loads operator-supplied PEM files, or synthesizes a self-signed
//! RSA-2048 leaf (SANs `localhost`, `127.0.0.1`, `::1`, 24 h validity)
//! when none are given. Clients must skip verification or trust the
//! generated certificate.

use mockd_core::{Error, Result, ShutdownToken};
use rsa::pkcs8::EncodePrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// PEM pair ready to serve.
pub struct TlsMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Load the configured PEM files, or generate a self-signed pair.
pub fn load_or_generate_tls(
    cert_file: Option<&str>,
    key_file: Option<&str>,
) -> Result<TlsMaterial> {
    match (cert_file, key_file) {
        (Some(cert), Some(key)) => {
            info!("loading TLS certificate from {cert} and key from {key}");
            Ok(TlsMaterial {
                cert_pem: std::fs::read_to_string(cert)
                    .map_err(|e| Error::validation(format!("cannot read {cert}: {e}")))?,
                key_pem: std::fs::read_to_string(key)
                    .map_err(|e| Error::validation(format!("cannot read {key}: {e}")))?,
            })
        }
        (None, None) => generate_self_signed(),
        _ => Err(Error::validation("--tls-cert and --tls-key must be given together")),
    }
}

/// Synthesize a self-signed RSA-2048 certificate.
pub fn generate_self_signed() -> Result<TlsMaterial> {
    info!("generating self-signed RSA-2048 certificate (localhost, 127.0.0.1, ::1; 24h)");
    let key = rsa::RsaPrivateKey::new(&mut rand_core::OsRng, 2048)
        .map_err(|e| Error::validation(format!("RSA key generation failed: {e}")))?;
    let pkcs8 = key
        .to_pkcs8_der()
        .map_err(|e| Error::validation(format!("key serialization failed: {e}")))?;
    let key_der = PrivatePkcs8KeyDer::from(pkcs8.as_bytes().to_vec());
    let key_pair = rcgen::KeyPair::from_pkcs8_der_and_sign_algo(&key_der, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| Error::validation(format!("key import failed: {e}")))?;

    let mut params = rcgen::CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .map_err(|e| Error::validation(format!("certificate params: {e}")))?;
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::hours(24);
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "mockd self-signed");

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::validation(format!("certificate generation failed: {e}")))?;
    Ok(TlsMaterial { cert_pem: cert.pem(), key_pem: key_pair.serialize_pem() })
}

/// Build a TLS acceptor from PEM text.
pub fn acceptor_from_pem(material: &TlsMaterial) -> Result<TlsAcceptor> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut material.cert_pem.as_bytes())
            .collect::<std::io::Result<_>>()
            .map_err(|e| Error::validation(format!("cannot parse certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(Error::validation("no certificates found in PEM"));
    }
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut material.key_pem.as_bytes())
            .map_err(|e| Error::validation(format!("cannot parse key PEM: {e}")))?
            .ok_or_else(|| Error::validation("no private key found in PEM"))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::validation(format!("TLS config error: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accept loop serving an axum router over TLS until shutdown.
pub async fn serve_https(
    listener: TcpListener,
    material: TlsMaterial,
    router: axum::Router,
    mut shutdown: ShutdownToken,
) -> Result<()> {
    let acceptor = acceptor_from_pem(&material)?;
    info!("HTTPS listener ready on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            () = shutdown.cancelled() => {
                info!("HTTPS listener shutting down");
                return Ok(());
            }
        };
        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("TLS handshake with {peer} failed: {e}");
                    return;
                }
            };
            let service = hyper_util::service::TowerToHyperService::new(router);
            let io = hyper_util::rt::TokioIo::new(tls_stream);
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(
                hyper_util::rt::TokioExecutor::new(),
            )
            .serve_connection_with_upgrades(io, service)
            .await
            {
                warn!("HTTPS connection from {peer} errored: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_material_is_valid_pem() {
        let material = generate_self_signed().unwrap();
        assert!(material.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(material.key_pem.contains("PRIVATE KEY"));
        // And it parses back into a working acceptor.
        acceptor_from_pem(&material).unwrap();
    }

    #[test]
    fn cert_and_key_must_come_together() {
        assert!(load_or_generate_tls(Some("cert.pem"), None).is_err());
        assert!(load_or_generate_tls(None, Some("key.pem")).is_err());
    }

    #[test]
    fn garbage_pem_is_rejected() {
        let material = TlsMaterial {
            cert_pem: "not a cert".to_string(),
            key_pem: "not a key".to_string(),
        };
        assert!(acceptor_from_pem(&material).is_err());
    }
}
