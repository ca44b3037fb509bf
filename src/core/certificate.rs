//! Certificate authority: signing identity and certificates of
//! destruction.
//!
//! A 2048-bit RSA key is generated once per install under the user
//! config directory and reused by every subsequent process. Each
//! certificate carries a PKCS#1 v1.5 SHA-256 signature over a fixed
//! payload, the SPKI public key for offline verification, and a QR
//! rendering of the full certificate JSON.

use crate::error::WipeError;
use chrono::{DateTime, SecondsFormat, Utc};
use qrcode::{EcLevel, QrCode};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

const KEY_BITS: usize = 2048;
const QR_PIXELS: u32 = 256;

/// The signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateData {
    pub device_model: String,
    pub device_serial: String,
    pub wipe_method: String,
    pub timestamp: DateTime<Utc>,
    pub verification_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedCertificate {
    pub data: CertificateData,
    /// Hex-encoded PKCS#1 v1.5 SHA-256 signature
    pub signature: String,
    /// SPKI PEM, embedded so certificates verify without this daemon
    pub public_key: String,
    /// PNG bytes; excluded from the JSON document
    #[serde(skip)]
    pub qr_code_png: Vec<u8>,
}

fn payload_digest(data: &CertificateData) -> Vec<u8> {
    let payload = format!(
        "{}|{}|{}|{}|{}",
        data.device_model,
        data.device_serial,
        data.wipe_method,
        data.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        data.verification_hash
    );
    Sha256::digest(payload.as_bytes()).to_vec()
}

fn load_or_generate_key(key_path: &Path) -> Result<RsaPrivateKey, WipeError> {
    if key_path.exists() {
        let pem = fs::read_to_string(key_path)
            .map_err(|e| WipeError::Signing(format!("could not read private key file: {e}")))?;
        return RsaPrivateKey::from_pkcs1_pem(&pem)
            .map_err(|e| WipeError::Signing(format!("could not parse private key: {e}")));
    }

    let key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
        .map_err(|e| WipeError::Signing(format!("could not generate private key: {e}")))?;

    if let Some(parent) = key_path.parent() {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(parent)
            .map_err(|e| WipeError::Signing(format!("could not create key directory: {e}")))?;
    }

    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| WipeError::Signing(format!("could not encode private key: {e}")))?;
    fs::write(key_path, pem.as_bytes())
        .map_err(|e| WipeError::Signing(format!("could not save private key: {e}")))?;
    fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))
        .map_err(|e| WipeError::Signing(format!("could not restrict key permissions: {e}")))?;

    info!(path = %key_path.display(), "New signing key saved");
    Ok(key)
}

pub struct CertificateAuthority {
    base_dir: PathBuf,
    key: OnceLock<RsaPrivateKey>,
}

impl CertificateAuthority {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            key: OnceLock::new(),
        }
    }

    /// Authority rooted at the per-user config directory.
    pub fn from_user_config() -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(config_dir.join("DZap"))
    }

    fn key_path(&self) -> PathBuf {
        self.base_dir.join("private.pem")
    }

    fn certificates_dir(&self) -> PathBuf {
        self.base_dir.join("certificates")
    }

    /// The process-wide signing identity, initialized on first use.
    /// A daemon with no signing identity must not serve, so a key that
    /// can neither be loaded nor created is fatal.
    fn signing_key(&self) -> &RsaPrivateKey {
        self.key.get_or_init(|| {
            load_or_generate_key(&self.key_path())
                .expect("could not load or generate the signing key")
        })
    }

    /// Public half of the signing identity, as SPKI PEM.
    pub fn public_key_pem(&self) -> Result<String, WipeError> {
        self.signing_key()
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| WipeError::Signing(format!("could not encode public key: {e}")))
    }

    /// Build, sign, and QR-encode a certificate. The caller persists it
    /// separately if desired.
    pub fn generate(
        &self,
        model: &str,
        serial: &str,
        method: &str,
        log_hash: &str,
    ) -> Result<SignedCertificate, WipeError> {
        // Whole-second timestamps keep the signed RFC3339 string stable
        // across a JSON round-trip.
        let now = Utc::now();
        let timestamp = DateTime::<Utc>::from_timestamp(now.timestamp(), 0).unwrap_or(now);

        let data = CertificateData {
            device_model: model.to_string(),
            device_serial: serial.to_string(),
            wipe_method: method.to_string(),
            timestamp,
            verification_hash: log_hash.to_string(),
        };

        let digest = payload_digest(&data);
        let signature_bytes = self
            .signing_key()
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| WipeError::Signing(e.to_string()))?;

        let mut certificate = SignedCertificate {
            data,
            signature: hex::encode(signature_bytes),
            public_key: self.public_key_pem()?,
            qr_code_png: Vec::new(),
        };
        certificate.qr_code_png = render_qr(&certificate)?;

        Ok(certificate)
    }

    /// Persist the certificate JSON (without the QR bytes) under the
    /// certificates directory as `{serial}-{unix_ts}.json`.
    pub fn persist(&self, certificate: &SignedCertificate) -> Result<PathBuf, WipeError> {
        let dir = self.certificates_dir();
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)?;

        let filename = format!(
            "{}-{}.json",
            certificate.data.device_serial,
            certificate.data.timestamp.timestamp()
        );
        let path = dir.join(filename);

        let json = serde_json::to_vec_pretty(certificate)
            .map_err(|e| WipeError::Signing(format!("could not serialize certificate: {e}")))?;
        fs::write(&path, json)?;

        Ok(path)
    }

    /// Every well-formed certificate in the certificates directory.
    /// A missing directory is an empty list, not an error.
    pub fn list(&self) -> Vec<SignedCertificate> {
        let entries = match fs::read_dir(self.certificates_dir()) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut certificates = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(certificate) = serde_json::from_str::<SignedCertificate>(&raw) {
                certificates.push(certificate);
            }
        }
        certificates
    }
}

/// Check a certificate against its own embedded public key. Works
/// without access to the producing process.
pub fn verify_certificate(certificate: &SignedCertificate) -> Result<(), WipeError> {
    let public_key = RsaPublicKey::from_public_key_pem(&certificate.public_key)
        .map_err(|e| WipeError::Signing(format!("could not parse public key: {e}")))?;

    let signature = hex::decode(&certificate.signature)
        .map_err(|e| WipeError::Signing(format!("could not decode signature: {e}")))?;

    let digest = payload_digest(&certificate.data);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| WipeError::Signing("signature verification failed".to_string()))
}

/// QR code of the certificate JSON: medium error correction, rendered
/// at 256x256 pixels.
fn render_qr(certificate: &SignedCertificate) -> Result<Vec<u8>, WipeError> {
    let json = serde_json::to_string(certificate)
        .map_err(|e| WipeError::Signing(format!("could not serialize certificate: {e}")))?;

    let code = QrCode::with_error_correction_level(json.as_bytes(), EcLevel::M)
        .map_err(|e| WipeError::Signing(format!("could not build QR code: {e}")))?;

    let qr_image = code
        .render::<image::Luma<u8>>()
        .min_dimensions(QR_PIXELS, QR_PIXELS)
        .build();

    let mut cursor = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageLuma8(qr_image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| WipeError::Signing(format!("could not encode QR PNG: {e}")))?;

    Ok(cursor.into_inner())
}

/// Text rendering of a certificate for download. Pure function of the
/// signed certificate.
pub fn render_pdf(certificate: &SignedCertificate) -> Result<Vec<u8>, WipeError> {
    use printpdf::{BuiltinFont, Mm, PdfDocument};

    fn pdf_err<E: std::fmt::Display>(e: E) -> WipeError {
        WipeError::Io(std::io::Error::other(e.to_string()))
    }

    let (doc, page, layer) = PdfDocument::new(
        "Data Destruction Certificate",
        Mm(210.0),
        Mm(297.0),
        "Layer 1",
    );

    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_err)?;
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_err)?;
    let mono = doc.add_builtin_font(BuiltinFont::Courier).map_err(pdf_err)?;

    let layer = doc.get_page(page).get_layer(layer);
    let mut y = 270.0;

    layer.use_text("Data Destruction Certificate", 20.0, Mm(20.0), Mm(y), &bold);
    y -= 15.0;

    let timestamp = certificate
        .data
        .timestamp
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();
    let fields = [
        ("Device Model:", certificate.data.device_model.as_str()),
        ("Device Serial:", certificate.data.device_serial.as_str()),
        ("Wipe Method:", certificate.data.wipe_method.as_str()),
        ("Timestamp:", timestamp.as_str()),
        (
            "Verification Hash:",
            certificate.data.verification_hash.as_str(),
        ),
    ];
    for (label, value) in fields {
        layer.use_text(label, 12.0, Mm(20.0), Mm(y), &bold);
        layer.use_text(value, 12.0, Mm(70.0), Mm(y), &regular);
        y -= 8.0;
    }
    y -= 8.0;

    layer.use_text("Digital Signature (SHA256withRSA):", 10.0, Mm(20.0), Mm(y), &bold);
    y -= 5.0;
    for chunk in wrap_chunks(&certificate.signature, 80) {
        layer.use_text(chunk, 7.0, Mm(20.0), Mm(y), &mono);
        y -= 3.5;
    }
    y -= 5.0;

    layer.use_text("Public Key:", 10.0, Mm(20.0), Mm(y), &bold);
    y -= 5.0;
    for line in certificate.public_key.lines() {
        layer.use_text(line, 7.0, Mm(20.0), Mm(y), &mono);
        y -= 3.5;
    }
    y -= 5.0;

    layer.use_text("Scan the QR code in the UI to verify offline.", 9.0, Mm(20.0), Mm(y), &regular);

    doc.save_to_bytes().map_err(pdf_err)
}

fn wrap_chunks(text: &str, width: usize) -> Vec<String> {
    text.as_bytes()
        .chunks(width)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}
