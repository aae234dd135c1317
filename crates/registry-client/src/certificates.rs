//! Trusted CA certificates for private registries

use crate::error::RegistryError;
use std::path::Path;
use tracing::{debug, info};

/// Reads a PEM bundle of CA certificates.
///
/// A missing file is not an error: the default trust roots are used.
///
/// # Errors
///
/// Returns [`RegistryError::Certificate`] when the file exists but cannot
/// be read or holds no usable certificate.
pub fn load_certificates(path: &Path) -> Result<Vec<reqwest::Certificate>, RegistryError> {
    let pem = match std::fs::read(path) {
        Ok(pem) => pem,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No registry CA bundle at {}, using default trust roots", path.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(RegistryError::Certificate {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };

    let certificates =
        reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| RegistryError::Certificate {
            path: path.to_path_buf(),
            message: format!("invalid PEM: {e}"),
        })?;
    if certificates.is_empty() {
        return Err(RegistryError::Certificate {
            path: path.to_path_buf(),
            message: "no certificates in bundle".to_string(),
        });
    }
    debug!("Loaded {} CA certificate(s) from {}", certificates.len(), path.display());
    Ok(certificates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_default_roots() {
        let dir = tempfile::tempdir().unwrap();
        let certificates = load_certificates(&dir.path().join("ca.crt")).unwrap();
        assert!(certificates.is_empty());
    }

    #[test]
    fn test_file_without_certificates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.crt");
        std::fs::write(&path, "this is not a certificate\n").unwrap();
        let err = load_certificates(&path).unwrap_err();
        assert!(matches!(err, RegistryError::Certificate { .. }));
    }
}
