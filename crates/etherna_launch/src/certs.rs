//! TLS certificate files shared with https containers
//!
//! Generating certificates is left to a [`CertificateSource`]; this module
//! only decides whether an existing key/cert/bundle triple can be reused and
//! where the files live.

use std::path::{Path, PathBuf};

/// Directory the host certificate directory is mounted at inside containers
pub const CONTAINER_CERTS_DIR: &str = "/usr/local/share/ca-certificates/etherna";

pub const CERTIFICATE_KEY_NAME: &str = "etherna.key";
pub const CERTIFICATE_CERT_NAME: &str = "etherna.crt";
pub const CERTIFICATE_PFX_NAME: &str = "etherna.pfx";
pub const CERTIFICATE_PASSWORD: &str = "etherna";

/// Raw certificate material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
    /// PKCS#12 bundle protected by [`CERTIFICATE_PASSWORD`]
    pub pfx: Vec<u8>,
}

/// Produces a fresh certificate for the given host names
pub trait CertificateSource: Send + Sync {
    fn generate(
        &self,
        common_name: &str,
        alt_names: &[&str],
    ) -> Result<CertificateBundle, CertificateError>;
}

/// The certificate directory in the launcher cache
#[derive(Debug, Clone)]
pub struct CertificateStore {
    dir: PathBuf,
}

impl CertificateStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            dir: cache_dir.join("certs"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(CERTIFICATE_KEY_NAME)
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(CERTIFICATE_CERT_NAME)
    }

    pub fn pfx_path(&self) -> PathBuf {
        self.dir.join(CERTIFICATE_PFX_NAME)
    }

    fn is_complete(&self) -> bool {
        self.key_path().exists() && self.cert_path().exists() && self.pfx_path().exists()
    }

    /// Reuse the stored certificate, or generate and store a new one
    pub fn ensure(
        &self,
        source: Option<&dyn CertificateSource>,
    ) -> Result<CertificateBundle, CertificateError> {
        if self.is_complete() {
            log::debug!("Reusing certificate in {}", self.dir.display());
            return Ok(CertificateBundle {
                key: std::fs::read(self.key_path())?,
                cert: std::fs::read(self.cert_path())?,
                pfx: std::fs::read(self.pfx_path())?,
            });
        }

        let source = source.ok_or_else(|| CertificateError::Missing(self.dir.clone()))?;
        let bundle = source.generate("etherna.localhost", &["host.docker.internal"])?;

        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.key_path(), &bundle.key)?;
        std::fs::write(self.cert_path(), &bundle.cert)?;
        std::fs::write(self.pfx_path(), &bundle.pfx)?;
        log::info!("Stored new certificate in {}", self.dir.display());

        Ok(bundle)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("No certificate in {} and no certificate source configured", .0.display())]
    Missing(PathBuf),

    #[error("Certificate generation failed: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
