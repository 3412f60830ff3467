//! RSA keypair generator for handover release signing.
//!
//! Writes a 2048-bit keypair as PKCS#1 DER:
//! - `release_signing_key.der`: private key, embedded by the catalog server
//! - `release_signing_key.pub.der`: public key, embedded by nodes
//!
//! Usage:
//!   cargo run --bin handover-keygen [output-dir]

use color_eyre::eyre::WrapErr;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::env;
use std::fs;
use std::path::PathBuf;

const KEY_BITS: usize = 2048;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let output_dir = match env::args_os().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => env::current_dir()?,
    };
    fs::create_dir_all(&output_dir)
        .wrap_err_with(|| format!("failed to create {}", output_dir.display()))?;

    println!("Generating {KEY_BITS}-bit RSA keypair...");
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_der = private_key.to_pkcs1_der()?;
    let public_der = public_key.to_pkcs1_der()?;

    let private_path = output_dir.join("release_signing_key.der");
    fs::write(&private_path, private_der.as_bytes())
        .wrap_err_with(|| format!("failed to write {}", private_path.display()))?;
    println!("Private key saved to: {}", private_path.display());
    println!("  WARNING: Keep this file secure! Anyone holding it can sign releases.");

    let public_path = output_dir.join("release_signing_key.pub.der");
    fs::write(&public_path, public_der.as_bytes())
        .wrap_err_with(|| format!("failed to write {}", public_path.display()))?;
    println!("Public key saved to: {}", public_path.display());

    println!("\nCopy both files to keys/ and rebuild to embed them.");
    Ok(())
}
