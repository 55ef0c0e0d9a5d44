//! Material TLS do dispositivo (mTLS com o broker).
//!
//! - CA raiz: âncora de confiança para o certificado do broker
//! - Certificado + chave privada do dispositivo: autenticação do cliente
//!
//! O provisionamento dos arquivos PEM é externo ao gateway.

use rustls::ClientConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Erros ao montar a configuração TLS.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Erro ao ler {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("PEM inválido em {path}: {reason}")]
    Pem { path: PathBuf, reason: String },

    #[error("Nenhum certificado em {0}")]
    NoCertificates(PathBuf),

    #[error("Configuração TLS rejeitada: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Monta a configuração do cliente TLS a partir dos três arquivos PEM.
pub fn load_client_config(
    ca_path: &Path,
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<ClientConfig>, TlsError> {
    let ca_pem = read(ca_path)?;
    let cert_pem = read(cert_path)?;
    let key_pem = read(key_path)?;
    build_client_config(
        (ca_pem.as_slice(), ca_path),
        (cert_pem.as_slice(), cert_path),
        (key_pem.as_slice(), key_path),
    )
}

fn build_client_config(
    (ca_pem, ca_path): (&[u8], &Path),
    (cert_pem, cert_path): (&[u8], &Path),
    (key_pem, key_path): (&[u8], &Path),
) -> Result<Arc<ClientConfig>, TlsError> {
    let mut roots = rustls::RootCertStore::empty();
    for ca in certificates(ca_pem, ca_path)? {
        roots.add(ca)?;
    }

    let chain = certificates(cert_pem, cert_path)?;
    let key = PrivateKeyDer::from_pem_slice(key_pem).map_err(|e| TlsError::Pem {
        path: key_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)?;

    Ok(Arc::new(config))
}

fn certificates(pem: &[u8], path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Pem {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}
