//! Throwaway PKI for tests: keys, certificates, Sigstore bundles, SEV-SNP
//! reports and Nitro documents, all minted at runtime.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use coset::cbor::Value;
use coset::{iana, CborSerializable, TaggedCborSerializable};
use der::asn1::{BitString, Ia5String, OctetString, UtcTime, Utf8StringRef};
use der::oid::{AssociatedOid, ObjectIdentifier};
use der::{Decode, Encode};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand_core::OsRng;
use serde_json::json;
use sha2::{Digest, Sha256, Sha384};
use signature::Signer;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};
use x509_cert::der::oid::db::rfc5912::{ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, ID_RSASSA_PSS};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, SubjectAltName};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, EncodePublicKey, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};
use x509_cert::{Certificate, TbsCertificate, Version};

use crate::attestation::sev::SevCollateral;
use crate::attestation::types::PredicateType;
use crate::certs;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::sigstore::{compute_pae, SignedBundle};
use crate::trust_root::{TrustRoot, VendorRoots};

/// Launch measurement carried by every fixture (48 bytes)
pub(crate) const TEST_MEASUREMENT: &str =
    "c0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffee";

/// Public key bytes the Nitro fixture attests to
pub(crate) const NITRO_PUBLIC_KEY: &[u8] = b"enclave tls key";

static SERIAL: AtomicU32 = AtomicU32::new(1);

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[derive(Clone)]
pub(crate) enum TestKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    Rsa(Box<rsa::RsaPrivateKey>),
}

impl TestKey {
    pub fn p256() -> Self {
        TestKey::P256(p256::ecdsa::SigningKey::random(&mut OsRng))
    }

    pub fn p384() -> Self {
        TestKey::P384(p384::ecdsa::SigningKey::random(&mut OsRng))
    }

    pub fn rsa() -> Self {
        TestKey::Rsa(Box::new(rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap()))
    }

    pub fn spki_der(&self) -> Vec<u8> {
        let doc = match self {
            TestKey::P256(k) => p256::PublicKey::from(k.verifying_key()).to_public_key_der(),
            TestKey::P384(k) => p384::PublicKey::from(k.verifying_key()).to_public_key_der(),
            TestKey::Rsa(k) => k.to_public_key().to_public_key_der(),
        };
        doc.unwrap().as_bytes().to_vec()
    }

    pub fn spki_fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.spki_der()))
    }

    /// DER-encoded ECDSA signature, or RSA-PSS SHA-384
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        match self {
            TestKey::P256(k) => {
                let sig: p256::ecdsa::Signature = k.sign(msg);
                sig.to_der().as_bytes().to_vec()
            }
            TestKey::P384(k) => {
                let sig: p384::ecdsa::Signature = k.sign(msg);
                sig.to_der().as_bytes().to_vec()
            }
            TestKey::Rsa(_) => self.sign_raw(msg),
        }
    }

    /// Fixed-width `r || s` for ECDSA
    pub fn sign_raw(&self, msg: &[u8]) -> Vec<u8> {
        match self {
            TestKey::P256(k) => {
                let sig: p256::ecdsa::Signature = k.sign(msg);
                sig.to_bytes().to_vec()
            }
            TestKey::P384(k) => {
                let sig: p384::ecdsa::Signature = k.sign(msg);
                sig.to_bytes().to_vec()
            }
            TestKey::Rsa(k) => {
                use rsa::signature::{RandomizedSigner, SignatureEncoding};
                let key = rsa::pss::BlindedSigningKey::<Sha384>::new((**k).clone());
                key.sign_with_rng(&mut OsRng, msg).to_vec()
            }
        }
    }

    fn signature_algorithm(&self) -> AlgorithmIdentifierOwned {
        let oid = match self {
            TestKey::P256(_) => ECDSA_WITH_SHA_256,
            TestKey::P384(_) => ECDSA_WITH_SHA_384,
            TestKey::Rsa(_) => ID_RSASSA_PSS,
        };
        AlgorithmIdentifierOwned { oid, parameters: None }
    }
}

fn asn1_time(t: DateTime<Utc>) -> Time {
    let since_epoch = std::time::Duration::from_secs(t.timestamp() as u64);
    Time::UtcTime(UtcTime::from_unix_duration(since_epoch).unwrap())
}

fn utf8_der(value: &str) -> Vec<u8> {
    Utf8StringRef::new(value).unwrap().to_der().unwrap()
}

pub(crate) struct CertBuilder {
    subject: Name,
    key: TestKey,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    extensions: Vec<Extension>,
}

impl CertBuilder {
    pub fn new(cn: &str, key: &TestKey) -> Self {
        let now = Utc::now();
        Self {
            subject: Name::from_str(&format!("CN={}", cn)).unwrap(),
            key: key.clone(),
            not_before: now - Duration::hours(1),
            not_after: now + Duration::days(365),
            extensions: Vec::new(),
        }
    }

    pub fn ca(self) -> Self {
        let constraints = BasicConstraints {
            ca: true,
            path_len_constraint: None,
        };
        self.extension(BasicConstraints::OID, true, constraints.to_der().unwrap())
    }

    pub fn valid_between(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    pub fn extension(mut self, oid: ObjectIdentifier, critical: bool, value: Vec<u8>) -> Self {
        self.extensions.push(Extension {
            extn_id: oid,
            critical,
            extn_value: OctetString::new(value).unwrap(),
        });
        self
    }

    pub fn self_signed(self) -> Certificate {
        let issuer = self.subject.clone();
        let key = self.key.clone();
        self.build(issuer, &key)
    }

    pub fn issued_by(self, issuer: &Certificate, issuer_key: &TestKey) -> Certificate {
        self.build(issuer.tbs_certificate.subject.clone(), issuer_key)
    }

    fn build(self, issuer: Name, signer: &TestKey) -> Certificate {
        let mut serial = vec![0x10];
        serial.extend_from_slice(&SERIAL.fetch_add(1, Ordering::Relaxed).to_be_bytes());

        let algorithm = signer.signature_algorithm();
        let tbs_certificate = TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(&serial).unwrap(),
            signature: algorithm.clone(),
            issuer,
            validity: Validity {
                not_before: asn1_time(self.not_before),
                not_after: asn1_time(self.not_after),
            },
            subject: self.subject,
            subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(&self.key.spki_der()).unwrap(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: (!self.extensions.is_empty()).then_some(self.extensions),
        };

        let signature = signer.sign(&tbs_certificate.to_der().unwrap());
        Certificate {
            tbs_certificate,
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&signature).unwrap(),
        }
    }
}

pub(crate) fn der(cert: &Certificate) -> Vec<u8> {
    cert.to_der().unwrap()
}

/// Knobs for [`SigstoreFixture::bundle_json`]
pub(crate) struct BundleOptions {
    pub repository: String,
    pub digest: String,
    /// Emit the Source Repository URI extension (otherwise only the SAN names the repo)
    pub repository_extension: bool,
    pub issuer: String,
    /// Integrated time relative to now
    pub integrated_time_offset: Duration,
    pub predicate_type: String,
    pub predicate: serde_json::Value,
}

impl BundleOptions {
    pub fn new(repository: &str, digest: &str) -> Self {
        Self {
            repository: repository.to_string(),
            digest: digest.to_string(),
            repository_extension: true,
            issuer: crate::sigstore::GITHUB_ACTIONS_ISSUER.to_string(),
            integrated_time_offset: Duration::zero(),
            predicate_type: PredicateType::SevGuestV2.as_uri().to_string(),
            predicate: json!({ "snp_measurement": TEST_MEASUREMENT }),
        }
    }
}

/// A Fulcio-style CA (root + intermediate) and a Rekor log key
pub(crate) struct SigstoreFixture {
    pub root: Certificate,
    pub root_key: TestKey,
    pub intermediate: Certificate,
    pub intermediate_key: TestKey,
    pub log_key: TestKey,
    created: DateTime<Utc>,
}

impl SigstoreFixture {
    pub fn new() -> Self {
        let root_key = TestKey::p384();
        let root = CertBuilder::new("sigstore", &root_key).ca().self_signed();
        let intermediate_key = TestKey::p384();
        let intermediate = CertBuilder::new("sigstore-intermediate", &intermediate_key)
            .ca()
            .issued_by(&root, &root_key);

        Self {
            root,
            root_key,
            intermediate,
            intermediate_key,
            log_key: TestKey::p256(),
            created: Utc::now(),
        }
    }

    pub fn log_id(&self) -> Vec<u8> {
        Sha256::digest(self.log_key.spki_der()).to_vec()
    }

    pub fn trusted_root_json(&self) -> Vec<u8> {
        let start = (self.created - Duration::days(1)).to_rfc3339();
        let doc = json!({
            "mediaType": "application/vnd.dev.sigstore.trustedroot+json;version=0.1",
            "tlogs": [{
                "baseUrl": "https://rekor.example",
                "hashAlgorithm": "SHA2_256",
                "publicKey": {
                    "rawBytes": b64(&self.log_key.spki_der()),
                    "keyDetails": "PKIX_ECDSA_P256_SHA_256",
                    "validFor": { "start": start }
                },
                "logId": { "keyId": b64(&self.log_id()) }
            }],
            "certificateAuthorities": [{
                "subject": { "organization": "example", "commonName": "sigstore" },
                "uri": "https://fulcio.example",
                "certChain": {
                    "certificates": [
                        { "rawBytes": b64(&der(&self.intermediate)) },
                        { "rawBytes": b64(&der(&self.root)) }
                    ]
                },
                "validFor": { "start": start }
            }],
            "ctlogs": [],
            "timestampAuthorities": []
        });
        serde_json::to_vec(&doc).unwrap()
    }

    pub fn trust_root(&self) -> TrustRoot {
        TrustRoot::load(&self.trusted_root_json()).unwrap()
    }

    pub fn bundle_json(&self, leaf_key: &TestKey, opts: &BundleOptions) -> serde_json::Value {
        self.bundle_json_from_ca(&self.intermediate, &self.intermediate_key, leaf_key, opts)
    }

    pub fn bundle_for(&self, leaf_key: &TestKey, repository: &str, digest: &str) -> SignedBundle {
        SignedBundle::from_value(self.bundle_json(leaf_key, &BundleOptions::new(repository, digest))).unwrap()
    }

    /// GitHub attestations API response wrapping one bundle
    pub fn attestations_response(&self, opts: &BundleOptions) -> Vec<u8> {
        let bundle = self.bundle_json(&TestKey::p256(), opts);
        serde_json::to_vec(&json!({ "attestations": [{ "bundle": bundle }] })).unwrap()
    }

    /// Bundle whose signing certificate is issued by `issuer`, logged in this
    /// fixture's transparency log.
    pub fn bundle_json_from_ca(
        &self,
        issuer: &Certificate,
        issuer_key: &TestKey,
        leaf_key: &TestKey,
        opts: &BundleOptions,
    ) -> serde_json::Value {
        let now = Utc::now();
        let repo_url = format!("https://github.com/{}", opts.repository);
        let workflow = format!("{}/.github/workflows/release.yml@refs/tags/v1.0.0", repo_url);

        let san = SubjectAltName(vec![GeneralName::UniformResourceIdentifier(
            Ia5String::new(&workflow).unwrap(),
        )]);
        let mut leaf = CertBuilder::new("sigstore-leaf", leaf_key)
            .valid_between(now - Duration::minutes(5), now + Duration::minutes(10))
            .extension(SubjectAltName::OID, true, san.to_der().unwrap())
            .extension(
                ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.1"),
                false,
                opts.issuer.as_bytes().to_vec(),
            )
            .extension(
                ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.8"),
                false,
                utf8_der(&opts.issuer),
            )
            .extension(
                ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.9"),
                false,
                utf8_der(&workflow),
            );
        if opts.repository_extension {
            leaf = leaf.extension(
                ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.12"),
                false,
                utf8_der(&repo_url),
            );
        }
        let leaf_der = der(&leaf.issued_by(issuer, issuer_key));

        let statement = json!({
            "_type": "https://in-toto.io/Statement/v1",
            "subject": [{ "name": "tinfoil.hash", "digest": { "sha256": opts.digest } }],
            "predicateType": opts.predicate_type,
            "predicate": opts.predicate,
        });
        let payload = serde_json::to_vec(&statement).unwrap();
        let payload_type = crate::sigstore::statement::IN_TOTO_PAYLOAD_TYPE;
        let signature = leaf_key.sign(&compute_pae(payload_type, &payload));

        let leaf_pem = pem::encode(&pem::Pem::new("CERTIFICATE", leaf_der.clone()));
        let body = json!({
            "apiVersion": "0.0.1",
            "kind": "dsse",
            "spec": {
                "envelopeHash": { "algorithm": "sha256", "value": hex::encode(Sha256::digest(&payload)) },
                "payloadHash": { "algorithm": "sha256", "value": hex::encode(Sha256::digest(&payload)) },
                "signatures": [{ "signature": b64(&signature), "verifier": b64(leaf_pem.as_bytes()) }]
            }
        });
        let body = serde_jcs::to_vec(&body).unwrap();

        let log_index: i64 = 123_456;
        let integrated_time = (now + opts.integrated_time_offset).timestamp();
        let set_payload = json!({
            "body": b64(&body),
            "integratedTime": integrated_time,
            "logID": hex::encode(self.log_id()),
            "logIndex": log_index,
        });
        let set = self.log_key.sign(&serde_jcs::to_vec(&set_payload).unwrap());

        json!({
            "mediaType": "application/vnd.dev.sigstore.bundle.v0.3+json",
            "verificationMaterial": {
                "certificate": { "rawBytes": b64(&leaf_der) },
                "tlogEntries": [{
                    "logIndex": log_index.to_string(),
                    "logId": { "keyId": b64(&self.log_id()) },
                    "kindVersion": { "kind": "dsse", "version": "0.0.1" },
                    "integratedTime": integrated_time.to_string(),
                    "inclusionPromise": { "signedEntryTimestamp": b64(&set) },
                    "canonicalizedBody": b64(&body)
                }]
            },
            "dsseEnvelope": {
                "payload": b64(&payload),
                "payloadType": payload_type,
                "signatures": [{ "sig": b64(&signature), "keyid": "" }]
            }
        })
    }
}

/// AMD chain (ARK → ASK → VCEK) and a signed report body
pub(crate) struct SevFixture {
    /// Base64 gzip report, as served in an attestation document
    pub body: String,
    pub collateral: SevCollateral,
    pub roots: VendorRoots,
    pub tls_fingerprint: String,
}

/// Built once per test binary; RSA key generation is slow.
pub(crate) fn sev_fixture() -> &'static SevFixture {
    static FIXTURE: OnceLock<SevFixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let ark_key = TestKey::rsa();
        let ark = CertBuilder::new("ARK-Genoa", &ark_key).ca().self_signed();
        let ask_key = TestKey::rsa();
        let ask = CertBuilder::new("SEV-Genoa", &ask_key).ca().issued_by(&ark, &ark_key);
        let vcek_key = TestKey::p384();
        let vcek = CertBuilder::new("SEV-VCEK", &vcek_key).issued_by(&ask, &ask_key);

        let tls_fingerprint = Sha256::digest(b"enclave tls spki");
        let report = sev_report(&vcek_key, &tls_fingerprint);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&report).unwrap();
        let body = b64(&encoder.finish().unwrap());

        let chain = pem::encode_many(&[
            pem::Pem::new("CERTIFICATE", der(&ask)),
            pem::Pem::new("CERTIFICATE", der(&ark)),
        ]);

        SevFixture {
            body,
            collateral: SevCollateral {
                vcek_der: der(&vcek),
                cert_chain_pem: chain.into_bytes(),
            },
            roots: VendorRoots {
                amd_ark_spki: vec![ark_key.spki_fingerprint()],
                aws_nitro_root: Vec::new(),
            },
            tls_fingerprint: hex::encode(tls_fingerprint),
        }
    })
}

/// Version 3 report for chip `ee..ee` at TCB bl=3 tee=0 snp=14 ucode=209
fn sev_report(vcek_key: &TestKey, tls_fingerprint: &[u8]) -> Vec<u8> {
    let mut report = vec![0u8; 1184];
    report[0..4].copy_from_slice(&3u32.to_le_bytes());
    report[80..112].copy_from_slice(tls_fingerprint);
    report[112..144].fill(0x22);
    report[144..192].copy_from_slice(&hex::decode(TEST_MEASUREMENT).unwrap());
    report[384] = 3;
    report[390] = 14;
    report[391] = 209;
    report[416..480].fill(0xee);

    // r and s are stored little-endian in 72-byte slots
    let sig = vcek_key.sign_raw(&report[..672]);
    for i in 0..48 {
        report[672 + i] = sig[47 - i];
        report[672 + 72 + i] = sig[95 - i];
    }
    report
}

/// AWS-style chain (root → intermediate → enclave leaf), all P-384
pub(crate) struct NitroFixture {
    root_der: Vec<u8>,
    intermediate_der: Vec<u8>,
    leaf_der: Vec<u8>,
    leaf_key: TestKey,
    pub roots: VendorRoots,
}

pub(crate) fn nitro_fixture() -> &'static NitroFixture {
    static FIXTURE: OnceLock<NitroFixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let root_key = TestKey::p384();
        let root = CertBuilder::new("aws.nitro-enclaves", &root_key).ca().self_signed();
        let int_key = TestKey::p384();
        let intermediate = CertBuilder::new("zonal.aws.nitro-enclaves", &int_key)
            .ca()
            .issued_by(&root, &root_key);
        let leaf_key = TestKey::p384();
        let leaf = CertBuilder::new("i-0123456789abcdef0.aws.nitro-enclaves", &leaf_key)
            .issued_by(&intermediate, &int_key);

        let root_der = der(&root);
        NitroFixture {
            roots: VendorRoots {
                amd_ark_spki: Vec::new(),
                aws_nitro_root: vec![certs::cert_fingerprint(&root_der)],
            },
            root_der,
            intermediate_der: der(&intermediate),
            leaf_der: der(&leaf),
            leaf_key,
        }
    })
}

impl NitroFixture {
    pub fn document(&self) -> NitroDocBuilder<'_> {
        let pcrs = (0u64..=4)
            .map(|i| {
                let fill = if i < 3 { i as u8 + 1 } else { 0 };
                (i, vec![fill; 48])
            })
            .collect();

        NitroDocBuilder {
            fixture: self,
            tagged: true,
            algorithm: iana::Algorithm::ES384,
            pcrs,
            public_key: Some(NITRO_PUBLIC_KEY.to_vec()),
            corrupt: false,
        }
    }
}

pub(crate) struct NitroDocBuilder<'a> {
    fixture: &'a NitroFixture,
    tagged: bool,
    algorithm: iana::Algorithm,
    pcrs: BTreeMap<u64, Vec<u8>>,
    public_key: Option<Vec<u8>>,
    corrupt: bool,
}

impl NitroDocBuilder<'_> {
    pub fn tagged(mut self, tagged: bool) -> Self {
        self.tagged = tagged;
        self
    }

    pub fn algorithm(mut self, algorithm: iana::Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn pcr(mut self, index: u64, value: Vec<u8>) -> Self {
        self.pcrs.insert(index, value);
        self
    }

    pub fn without_pcr(mut self, index: u64) -> Self {
        self.pcrs.remove(&index);
        self
    }

    pub fn public_key(mut self, key: Option<Vec<u8>>) -> Self {
        self.public_key = key;
        self
    }

    pub fn corrupt_signature(mut self) -> Self {
        self.corrupt = true;
        self
    }

    /// Base64 COSE_Sign1, as served in an attestation document
    pub fn build(self) -> String {
        let text = |s: &str| Value::Text(s.to_string());
        let pcrs = self
            .pcrs
            .into_iter()
            .map(|(i, v)| (Value::Integer(i.into()), Value::Bytes(v)))
            .collect();
        let payload = Value::Map(vec![
            (text("module_id"), text("i-0123456789abcdef0-enc0123456789abcd")),
            (text("digest"), text("SHA384")),
            (text("timestamp"), Value::Integer((Utc::now().timestamp_millis() as u64).into())),
            (text("pcrs"), Value::Map(pcrs)),
            (text("certificate"), Value::Bytes(self.fixture.leaf_der.clone())),
            (
                text("cabundle"),
                Value::Array(vec![
                    Value::Bytes(self.fixture.root_der.clone()),
                    Value::Bytes(self.fixture.intermediate_der.clone()),
                ]),
            ),
            (text("public_key"), self.public_key.map(Value::Bytes).unwrap_or(Value::Null)),
            (text("user_data"), Value::Null),
            (text("nonce"), Value::Null),
        ]);
        let mut encoded = Vec::new();
        coset::cbor::ser::into_writer(&payload, &mut encoded).unwrap();

        let leaf_key = &self.fixture.leaf_key;
        let mut sign1 = coset::CoseSign1Builder::new()
            .protected(coset::HeaderBuilder::new().algorithm(self.algorithm).build())
            .payload(encoded)
            .create_signature(b"", |data| leaf_key.sign_raw(data))
            .build();
        if self.corrupt {
            sign1.signature[50] ^= 0x01;
        }

        let bytes = if self.tagged {
            sign1.to_tagged_vec()
        } else {
            sign1.to_vec()
        };
        b64(&bytes.unwrap())
    }
}

/// Vendor roots trusting both the SEV and Nitro fixtures
pub(crate) fn fixture_vendor_roots() -> VendorRoots {
    VendorRoots {
        amd_ark_spki: sev_fixture().roots.amd_ark_spki.clone(),
        aws_nitro_root: nitro_fixture().roots.aws_nitro_root.clone(),
    }
}

/// [`Fetcher`] serving canned responses. Unknown URLs fail like a 404.
#[derive(Default)]
pub(crate) struct MockFetcher {
    responses: HashMap<String, Result<Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    delay: Option<std::time::Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.into(), Ok(body.into()));
        self
    }

    pub fn failing(mut self, url: impl Into<String>, error: Error) -> Self {
        self.responses.insert(url.into(), Err(error));
        self
    }

    /// Hold every response for `delay` before answering
    pub fn delayed(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(Error::FetchFailed(format!("HTTP 404: Not Found ({})", url))))
    }
}
