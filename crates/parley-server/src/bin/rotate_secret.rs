//! Prints a fresh signing secret and the steps for a zero-downtime rotation.
//!
//! Usage: `parley-rotate-secret`

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

/// Entropy of a generated secret in bytes.
const SECRET_BYTES: usize = 32;

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn main() {
    let secret = generate_secret();
    let rule = "=".repeat(64);

    println!("{rule}");
    println!("  Signing secret rotation");
    println!("{rule}");
    println!();
    println!("  New secret: {secret}");
    println!();
    println!("  Steps for zero-downtime rotation:");
    println!();
    println!("  1. Copy your CURRENT auth.jwt_secret value.");
    println!();
    println!("  2. Keep it as the verification-only previous secret:");
    println!("     config.toml  ->  jwt_secret_previous = \"<current-secret>\"");
    println!("     environment  ->  PARLEY_JWT_SECRET_PREVIOUS=<current-secret>");
    println!();
    println!("  3. Install the NEW secret as the signing secret:");
    println!("     config.toml  ->  jwt_secret = \"{secret}\"");
    println!("     environment  ->  PARLEY_JWT_SECRET={secret}");
    println!();
    println!("  4. Send SIGHUP to the server (config file) or restart it (environment).");
    println!("     New credentials are signed with the new secret;");
    println!("     credentials signed with the old one keep verifying.");
    println!();
    println!("  5. Once the refresh lifetime has passed (30 days by default),");
    println!("     remove jwt_secret_previous / PARLEY_JWT_SECRET_PREVIOUS and reload.");
    println!();
    println!("{rule}");
}
