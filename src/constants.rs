// Centralized constants (kept out of `main.rs`).

// ---------------------------------------------------------------------
// Circuit geometry
// ---------------------------------------------------------------------
/// Depth of the compressed-account state tree. Must match the deposit
/// circuit's `levels` parameter; the sibling and path-index arrays are
/// zero-padded to exactly this length.
pub(crate) const STATE_TREE_DEPTH: usize = 26;

/// Height of the indexed nullifier tree. Matches the state-tree depth;
/// capacity is 2^26 - 1 nullifiers (the genesis leaf occupies index 0).
pub(crate) const NULLIFIER_TREE_HEIGHT: usize = 26;

/// BN254 scalar field modulus (the circuits' native field), base 10.
pub(crate) const BN254_FR_MODULUS_DEC: &[u8] =
    b"21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// BN254 base field modulus (alt_bn128 Fq), base 10. Used for G1 point
/// negation when converting proofs to the on-chain pairing form.
pub(crate) const BN254_FQ_MODULUS_DEC: &[u8] =
    b"21888242871839275222246405745257275088696311157297823662689037894645226208583";

// ---------------------------------------------------------------------
// Input validation limits (spam protection)
// ---------------------------------------------------------------------
pub(crate) const MAX_PUBKEY_B58_LEN: usize = 64; // base58 pubkeys are ~32-44 chars; keep slack.

// ---------------------------------------------------------------------
// Runtime defaults
// ---------------------------------------------------------------------
pub(crate) const DEFAULT_API_BIND: &str = "0.0.0.0:3006";
pub(crate) const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8899";
pub(crate) const DEFAULT_COMPRESSION_URL: &str = "http://127.0.0.1:8784";
pub(crate) const DEFAULT_TRACKER_PATH: &str = "tracker.json";
pub(crate) const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;
pub(crate) const DEFAULT_PROVING_TIMEOUT_SECS: u64 = 120;
pub(crate) const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 90;
pub(crate) const DEFAULT_CHAIN_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_FINALIZE_MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------
// Prover artifact defaults
// ---------------------------------------------------------------------
pub(crate) const DEFAULT_DEPOSIT_WASM_PATH: &str = "/circuits/solDepositProof.wasm";
pub(crate) const DEFAULT_DEPOSIT_ZKEY_PATH: &str = "/circuits/solDepositProof_final.zkey";
pub(crate) const DEFAULT_DEPOSIT_WITNESS_JS: &str =
    "/circuits/solDepositProof_js/generate_witness.js";

pub(crate) const DEFAULT_WITHDRAWAL_WASM_PATH: &str = "/circuits/ethDepositProof.wasm";
pub(crate) const DEFAULT_WITHDRAWAL_ZKEY_PATH: &str = "/circuits/ethDepositProof_final.zkey";
pub(crate) const DEFAULT_WITHDRAWAL_WITNESS_JS: &str =
    "/circuits/ethDepositProof_js/generate_witness.js";

pub(crate) const DEFAULT_RAPIDSNARK_PATH: &str = "/usr/local/bin/rapidsnark";
pub(crate) const DEFAULT_NODE_BIN: &str = "node";
