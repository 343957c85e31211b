//! Full end-to-end verification
//!
//! Verifies an enclave against the latest release of its source repository:
//! 1. Runtime attestation (SEV-SNP or Nitro)
//! 2. Sigstore provenance for the release digest
//! 3. Measurement comparison and TLS key binding
//!
//! ```text
//! cargo run --example full_verification -- inference.tinfoil.sh tinfoilsh/confidential-inference-proxy
//! ```
//!
//! Set `TINFOIL_TRUSTED_ROOT` to a `trusted_root.json` to use a root other
//! than the shipped Sigstore public-good one.

use tinfoil_verifier::{Config, TrustRoot, Verifier};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "inference.tinfoil.sh".to_string());
    let repo = args
        .next()
        .unwrap_or_else(|| "tinfoilsh/confidential-inference-proxy".to_string());

    let trust_root = match std::env::var("TINFOIL_TRUSTED_ROOT") {
        Ok(path) => TrustRoot::install(TrustRoot::load(&std::fs::read(path)?)?)?,
        Err(_) => TrustRoot::embedded()?,
    };

    let verifier = Verifier::new(Config::from_env(), trust_root)?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║             Enclave Verification                             ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");
    println!("Enclave host: {}", host);
    println!("Source repo:  {}\n", repo);

    println!("═══ Step 1: Runtime Attestation ═══");
    let enclave = verifier.verify_enclave(&host).await?;
    println!("   ✓ {:?} evidence verified", enclave.measurement.type_);
    println!("   Report: {}", enclave.report_json()?);

    println!("\n═══ Step 2: Code Provenance ═══");
    let code = verifier.verify_repo(&repo).await?;
    println!("   ✓ Provenance for {} verified", code.digest);
    println!("   Measurement fingerprint: {}", code.report());

    println!("\n═══ Step 3: Consistency ═══");
    match verifier.verify_complete(&host, &repo).await {
        Ok(truth) => {
            println!("   ✓ Enclave runs the published code");
            println!("   TLS key:  {}", truth.tls_public_key);
            if let Some(hpke) = &truth.hpke_public_key {
                println!("   HPKE key: {}", hpke);
            }
        }
        Err(failure) => {
            println!("   ✗ {}", failure);
            std::process::exit(1);
        }
    }

    Ok(())
}
