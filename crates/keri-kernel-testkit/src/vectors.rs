//! Fixed secrets and the logs they produce.
//!
//! The same secrets always yield the same prefixes and digests, so reports
//! from [`verify_all_vectors`] can be compared across implementations and
//! releases.

use serde::Serialize;

use keri_kernel::{Habitat, KernelConfig};
use keri_kernel_core::{Digest, MatterCode, Qualified, Seal, SerialKind};

/// Qualified Ed25519 seeds for the controller called bob, in rotation order.
pub const BOB_SECRETS: &[&str] = &[
    "ArwXoACJgOleVZ2PY7kXn7rA0II0mHYDhc6WrBH8fDAc",
    "A6zz7M08-HQSFq92sJ8KJOT2cZ47x7pXFQLPB0pckB3Q",
    "AcwFTk-wgk3ZT2buPRIbK-zxgPx-TKbaegQvPEivN90Y",
    "Alntkt3u6dDgiQxTATr01dy8M72uuaZEf9eTdM-70Gk8",
    "A1-QxDkso9-MR1A8rZz_Naw6fgaAtayda8hrbkRVVu1E",
    "AKuYMe09COczwf2nIoD5AE119n7GLFOVFlNLxZcKuswc",
    "AxFfJTcSuEE11FINfXMqWttkZGnUZ8KaREhrnyAXTsjw",
    "ALq-w1UKkdrppwZzGTtz4PWYEeWm0-sDHzOv5sq96xJY",
];

/// Qualified Ed25519 seeds for the controller called eve, in rotation order.
pub const EVE_SECRETS: &[&str] = &[
    "AgjD4nRlycmM5cPcAkfOATAp8wVldRsnc9f1tiwctXlw",
    "AKUotEE0eAheKdDJh9QvNmSEmO_bjIav8V_GmctGpuCQ",
    "AK-nVhMMJciMPvmF5VZE_9H-nhrgng9aJWf7_UHPtRNM",
    "AT2cx-P5YUjIw_SLCHQ0pqoBWGk9s4N1brD-4pD_ANbs",
    "Ap5waegfnuP6ezC18w7jQiPyQwYYsp9Yv9rYMlKAYL8k",
    "Aqlc_FWWrxpxCo7R12uIz_Y2pHUH2prHx1kjghPa8jT8",
    "AagumsL8FeGES7tYcnr_5oN6qcwJzZfLKxoniKUpG4qc",
    "ADW3o9m3udwEf0aoOdZLLJdf1aylokP0lwwI_M2J9h0s",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOp {
    Rotate,
    /// Interaction anchoring the BLAKE3 digest of the given bytes.
    Interact(&'static [u8]),
}

/// A log built from fixed secrets.
#[derive(Debug, Clone)]
pub struct LogVector {
    pub name: &'static str,
    pub secrets: &'static [&'static str],
    pub kind: SerialKind,
    pub ops: &'static [VectorOp],
    /// Expected prefix, empty when only reported.
    pub expected_prefix: &'static str,
}

/// Get all log vectors.
pub fn all_vectors() -> Vec<LogVector> {
    vec![
        LogVector {
            name: "bob inception",
            secrets: BOB_SECRETS,
            kind: SerialKind::Json,
            ops: &[],
            expected_prefix: "",
        },
        LogVector {
            name: "bob rotate then interact",
            secrets: BOB_SECRETS,
            kind: SerialKind::Json,
            ops: &[VectorOp::Rotate, VectorOp::Interact(b"anchor")],
            expected_prefix: "",
        },
        LogVector {
            name: "eve interactions in cbor",
            secrets: EVE_SECRETS,
            kind: SerialKind::Cbor,
            ops: &[
                VectorOp::Interact(b"one"),
                VectorOp::Interact(b"two"),
                VectorOp::Rotate,
            ],
            expected_prefix: "",
        },
    ]
}

/// Build the habitat a vector describes.
pub fn habitat_from_vector(vector: &LogVector) -> keri_kernel::Result<Habitat> {
    let config = KernelConfig::default().with_kind(vector.kind);
    let mut hab = Habitat::from_seeds(vector.secrets, &config)?;
    for op in vector.ops {
        match op {
            VectorOp::Rotate => hab.rotate()?,
            VectorOp::Interact(data) => hab.interact(vec![Seal::Digest(Digest::compute(
                MatterCode::Blake3_256,
                data,
            )?)])?,
        };
    }
    Ok(hab)
}

/// What one vector produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorReport {
    pub name: String,
    pub matches: bool,
    pub prefix: String,
    pub sn: u64,
    /// Hex of the last event digest.
    pub last_digest: String,
    /// Hex of the whole log on the wire.
    pub log: String,
}

/// Build every vector and report what it produced.
pub fn verify_all_vectors() -> keri_kernel::Result<Vec<VectorReport>> {
    all_vectors()
        .iter()
        .map(|v| {
            let hab = habitat_from_vector(v)?;
            let prefix = hab.prefix().qb64();
            Ok(VectorReport {
                name: v.name.to_string(),
                matches: v.expected_prefix.is_empty() || prefix == v.expected_prefix,
                prefix,
                sn: hab.state().sn,
                last_digest: hab.state().last_digest.to_hex(),
                log: hex::encode(hab.kel_messages()?),
            })
        })
        .collect()
}

/// The vector report as pretty JSON.
pub fn vector_report_json() -> keri_kernel::Result<String> {
    let reports = verify_all_vectors()?;
    serde_json::to_string_pretty(&reports)
        .map_err(|e| keri_kernel::KernelError::InvalidOperation(e.to_string()))
}
