// src/tls.rs

//! In-memory TLS material for the HTTPS server.
//!
//! Used when `--h2` is given without `--key`/`--cert`: a self-signed
//! certificate over a fresh 2048-bit RSA key, valid for one year, with SAN
//! entries for `127.0.0.1`, `::1` and `localhost`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::{Context, Result};
use rsa::pkcs8::EncodePrivateKey;
use tracing::info;

/// PEM-encoded certificate and private key.
pub struct TlsMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

pub fn self_signed() -> Result<TlsMaterial> {
    info!("generating self-signed certificate (2048-bit RSA, valid one year)");

    let mut rng = rand::thread_rng();
    let key = rsa::RsaPrivateKey::new(&mut rng, 2048).context("generating RSA private key")?;
    let key_der = key
        .to_pkcs8_der()
        .context("encoding private key as PKCS#8")?;
    let key_pair =
        rcgen::KeyPair::try_from(key_der.as_bytes()).context("loading key for signing")?;

    let mut params = rcgen::CertificateParams::default();
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(365);
    params
        .distinguished_name
        .push(rcgen::DnType::OrganizationName, "watchrun");
    params.subject_alt_names = vec![
        rcgen::SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        rcgen::SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        rcgen::SanType::DnsName(
            rcgen::Ia5String::try_from("localhost".to_string())
                .context("encoding SAN hostname")?,
        ),
    ];

    let cert = params
        .self_signed(&key_pair)
        .context("self-signing certificate")?;

    Ok(TlsMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_pem_pair() {
        let material = self_signed().expect("generation should succeed");
        assert!(material.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(material.key_pem.contains("PRIVATE KEY"));
    }
}
