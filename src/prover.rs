//! Proving-service collaborator.
//!
//! The proving system is a black box to the relayer: it consumes a witness
//! JSON object and returns a Groth16 proof plus public signals. The
//! concrete implementation shells out to a circom witness generator and a
//! rapidsnark-style prover binary inside a scratch directory; anything
//! that satisfies `ProvingService` (including test doubles) plugs into the
//! pipeline the same way.

use crate::constants::BN254_FQ_MODULUS_DEC;
use crate::error::{AppError, AppResult};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitKind {
    /// Source-chain deposit inclusion (Solana state tree).
    Deposit,
    /// Destination-side withdrawal: nullifier non-membership.
    Withdrawal,
}

impl CircuitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitKind::Deposit => "deposit",
            CircuitKind::Withdrawal => "withdrawal",
        }
    }
}

/// Groth16 proof in the snarkjs `proof.json` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
}

/// Proof plus the circuit's public signals, as returned by the prover.
#[derive(Debug, Clone, Serialize)]
pub struct ProofBundle {
    pub proof: Groth16Proof,
    pub public_signals: Vec<String>,
}

/// EVM calldata shape: `(a, b, c, publicSignals)` with the Fq2 limb order
/// the Solidity verifier expects.
#[derive(Debug, Clone, Serialize)]
pub struct EvmCalldata {
    pub a: [String; 2],
    pub b: [[String; 2]; 2],
    pub c: [String; 2],
    #[serde(rename = "publicSignals")]
    pub public_signals: Vec<String>,
}

fn fq_modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::parse_bytes(BN254_FQ_MODULUS_DEC, 10).expect("bn254 fq modulus parse")
    })
}

pub fn u256_be32_from_dec_str(s: &str) -> AppResult<[u8; 32]> {
    let n: BigUint = s
        .parse::<BigUint>()
        .map_err(|_| AppError::Internal("prover produced non-decimal coordinates".into()))?;
    let b = n.to_bytes_be();
    if b.len() > 32 {
        return Err(AppError::Internal("bn254 coordinate exceeds 32 bytes".into()));
    }
    let mut out = [0u8; 32];
    out[32 - b.len()..].copy_from_slice(&b);
    Ok(out)
}

/// Negate a G1 y coordinate in Fq. Zero stays zero (point at infinity).
pub fn g1_negate_y_be(y_be32: &[u8; 32]) -> AppResult<[u8; 32]> {
    let y = BigUint::from_bytes_be(y_be32);
    if y == BigUint::from(0u8) {
        return Ok([0u8; 32]);
    }
    let p = fq_modulus();
    let y_neg = (p - (y % p)) % p;
    let b = y_neg.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - b.len()..].copy_from_slice(&b);
    Ok(out)
}

impl Groth16Proof {
    fn g1(&self, which: &str, coords: &[String]) -> AppResult<([u8; 32], [u8; 32])> {
        if coords.len() < 2 {
            return Err(AppError::Internal(format!(
                "proof point {which} has {} coordinates",
                coords.len()
            )));
        }
        Ok((
            u256_be32_from_dec_str(&coords[0])?,
            u256_be32_from_dec_str(&coords[1])?,
        ))
    }

    /// Byte form for the on-chain Solana verifier: `a` with y negated
    /// (alt_bn128 pairing takes -A), `b` with swapped Fq2 limbs, `c` as-is.
    pub fn to_solana_bytes(&self) -> AppResult<([u8; 64], [u8; 128], [u8; 64])> {
        let (ax, ay) = self.g1("pi_a", &self.pi_a)?;
        let ay_neg = g1_negate_y_be(&ay)?;
        let mut a = [0u8; 64];
        a[..32].copy_from_slice(&ax);
        a[32..].copy_from_slice(&ay_neg);

        if self.pi_b.len() < 2 || self.pi_b[0].len() < 2 || self.pi_b[1].len() < 2 {
            return Err(AppError::Internal("proof point pi_b is malformed".into()));
        }
        let mut b = [0u8; 128];
        // Fq2 limbs arrive (c0, c1); the verifier wants (c1, c0).
        b[0..32].copy_from_slice(&u256_be32_from_dec_str(&self.pi_b[0][1])?);
        b[32..64].copy_from_slice(&u256_be32_from_dec_str(&self.pi_b[0][0])?);
        b[64..96].copy_from_slice(&u256_be32_from_dec_str(&self.pi_b[1][1])?);
        b[96..128].copy_from_slice(&u256_be32_from_dec_str(&self.pi_b[1][0])?);

        let (cx, cy) = self.g1("pi_c", &self.pi_c)?;
        let mut c = [0u8; 64];
        c[..32].copy_from_slice(&cx);
        c[32..].copy_from_slice(&cy);

        Ok((a, b, c))
    }
}

impl ProofBundle {
    /// Calldata for the EVM verifier (the snarkjs `exportSolidityCallData`
    /// shape: `b` limbs swapped, public signals appended).
    pub fn to_evm_calldata(&self) -> AppResult<EvmCalldata> {
        let p = &self.proof;
        if p.pi_a.len() < 2 || p.pi_b.len() < 2 || p.pi_b[0].len() < 2 || p.pi_b[1].len() < 2 || p.pi_c.len() < 2 {
            return Err(AppError::Internal("proof points are malformed".into()));
        }
        Ok(EvmCalldata {
            a: [p.pi_a[0].clone(), p.pi_a[1].clone()],
            b: [
                [p.pi_b[0][1].clone(), p.pi_b[0][0].clone()],
                [p.pi_b[1][1].clone(), p.pi_b[1][0].clone()],
            ],
            c: [p.pi_c[0].clone(), p.pi_c[1].clone()],
            public_signals: self.public_signals.clone(),
        })
    }
}

pub trait ProvingService: Send + Sync {
    /// Generate a proof for `circuit` from a complete witness input object.
    fn prove(&self, circuit: CircuitKind, inputs: &serde_json::Value) -> AppResult<ProofBundle>;
}

/// Paths to one circuit's prover artifacts.
#[derive(Debug, Clone)]
pub struct ProverArtifacts {
    pub wasm: PathBuf,
    pub zkey: PathBuf,
    pub witness_js: PathBuf,
}

impl ProverArtifacts {
    /// Fail fast on missing artifacts before spawning anything.
    pub fn preflight(&self, circuit: CircuitKind) -> AppResult<()> {
        for (label, p) in [
            ("wasm", &self.wasm),
            ("zkey", &self.zkey),
            ("witness_js", &self.witness_js),
        ] {
            if !p.is_file() {
                return Err(AppError::Unavailable(format!(
                    "{} circuit {label} missing: {}",
                    circuit.as_str(),
                    p.display()
                )));
            }
        }
        Ok(())
    }
}

/// Subprocess-based Groth16 prover: node witness generator + rapidsnark.
pub struct SnarkjsProver {
    pub deposit: ProverArtifacts,
    pub withdrawal: ProverArtifacts,
    pub node_bin: String,
    pub rapidsnark_bin: String,
    pub scratch_dir: PathBuf,
    pub timeout: Duration,
}

impl SnarkjsProver {
    fn artifacts(&self, circuit: CircuitKind) -> &ProverArtifacts {
        match circuit {
            CircuitKind::Deposit => &self.deposit,
            CircuitKind::Withdrawal => &self.withdrawal,
        }
    }

    /// Run a command to completion before `deadline`.
    ///
    /// The child is polled (not waited) so a hung prover can be killed and
    /// surfaced as `ProvingTimeout` instead of blocking forever.
    fn run_with_deadline(
        &self,
        mut cmd: Command,
        stage: &str,
        deadline: Instant,
    ) -> AppResult<()> {
        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Internal(format!("spawn {stage}: {e}")))?;
        let mut backoff_ms: u64 = 20;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if !status.success() {
                        return Err(AppError::Internal(format!(
                            "{stage} exited with {status}"
                        )));
                    }
                    return Ok(());
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(AppError::ProvingTimeout(format!(
                            "{stage} exceeded {}s",
                            self.timeout.as_secs()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms = (backoff_ms.saturating_mul(2)).min(500);
                }
                Err(e) => {
                    return Err(AppError::Internal(format!("wait {stage}: {e}")));
                }
            }
        }
    }
}

impl ProvingService for SnarkjsProver {
    fn prove(&self, circuit: CircuitKind, inputs: &serde_json::Value) -> AppResult<ProofBundle> {
        let artifacts = self.artifacts(circuit);
        artifacts.preflight(circuit)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}_fullprove", circuit.as_str()))
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| AppError::Internal(format!("prover scratch dir: {e}")))?;
        let input_path = dir.path().join("input.json");
        let witness_path = dir.path().join("witness.wtns");
        let proof_path = dir.path().join("proof.json");
        let public_path = dir.path().join("public.json");

        std::fs::write(&input_path, inputs.to_string())
            .map_err(|e| AppError::Internal(format!("write witness input: {e}")))?;

        let deadline = Instant::now() + self.timeout;
        let t0 = Instant::now();

        let mut witness_cmd = Command::new(&self.node_bin);
        witness_cmd
            .arg(&artifacts.witness_js)
            .arg(&artifacts.wasm)
            .arg(&input_path)
            .arg(&witness_path);
        self.run_with_deadline(witness_cmd, "witness generation", deadline)?;
        let witness_ms = t0.elapsed().as_millis();

        let t1 = Instant::now();
        let mut prove_cmd = Command::new(&self.rapidsnark_bin);
        prove_cmd
            .arg(&artifacts.zkey)
            .arg(&witness_path)
            .arg(&proof_path)
            .arg(&public_path);
        self.run_with_deadline(prove_cmd, "proof generation", deadline)?;
        let prove_ms = t1.elapsed().as_millis();

        debug!(
            circuit = circuit.as_str(),
            witness_ms, prove_ms, "groth16 fullprove complete"
        );
        crate::metrics::observe_prove_timings(circuit.as_str(), witness_ms, prove_ms);

        let proof_bytes = std::fs::read(&proof_path)
            .map_err(|e| AppError::Internal(format!("read proof.json: {e}")))?;
        let public_bytes = std::fs::read(&public_path)
            .map_err(|e| AppError::Internal(format!("read public.json: {e}")))?;

        let proof: Groth16Proof = parse_first_json_value(&proof_bytes)
            .map_err(|e| AppError::Internal(format!("proof.json parse: {e}")))?;
        let public_signals: Vec<String> = parse_first_json_value(&public_bytes)
            .map_err(|e| AppError::Internal(format!("public.json parse: {e}")))?;

        Ok(ProofBundle {
            proof,
            public_signals,
        })
    }
}

/// Parse the first JSON value in a buffer, ignoring trailing whitespace or
/// NULs. External prover tools occasionally append log lines after the
/// JSON blob.
pub fn parse_first_json_value<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<T>();
    let v = stream
        .next()
        .ok_or_else(|| "empty JSON".to_string())?
        .map_err(|e| e.to_string())?;
    let used = stream.byte_offset();
    let trailing = &bytes[used..];
    let ok_trailing = trailing.iter().all(|b| b.is_ascii_whitespace() || *b == 0);
    if !ok_trailing {
        warn!(
            "non-whitespace trailing bytes after JSON (len={} used={})",
            bytes.len(),
            used
        );
    }
    Ok(v)
}

/// Scratch dir for prover inputs/outputs. Prefer tmpfs if available;
/// override via RELAYER_TMPDIR.
pub fn relayer_tmpdir() -> PathBuf {
    let mut opts: Vec<PathBuf> = Vec::new();
    if let Ok(v) = std::env::var("RELAYER_TMPDIR") {
        let v = v.trim();
        if !v.is_empty() {
            opts.push(PathBuf::from(v));
        }
    }
    opts.push(PathBuf::from("/dev/shm"));
    opts.push(std::env::temp_dir());

    for p in opts {
        if p.is_dir() {
            return p;
        }
    }
    std::env::temp_dir()
}

/// `true` if `path` exists and is a non-empty file (readiness checks).
pub fn artifact_ok(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
