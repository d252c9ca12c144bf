//! Groth16 proving engine over BN254.
//!
//! The service only depends on the [`ProvingEngine`] contract; the arkworks
//! implementation is built from a circom proving key.

use std::io::Cursor;

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_circom::{read_zkey, CircomReduction};
use ark_ff::{PrimeField, UniformRand};
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, ProvingKey};
use ark_relations::r1cs::ConstraintMatrices;
use num_bigint::BigUint;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::binfile::{BinFile, ZkeyHeader};
use crate::config::ProofRandomness;
use crate::error::{ProofError, StartupError};

/// A proof together with the public signals it commits to.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedProof {
    pub proof: Proof<Bn254>,
    pub public_signals: Vec<Fr>,
}

/// Proof computation over a fixed circuit.
///
/// Implementations need not be reentrant; callers serialize access.
pub trait ProvingEngine: Send + Sync {
    /// Prove from the full witness assignment (element 0 is the constant 1).
    fn prove(&self, witness: &[Fr]) -> Result<GeneratedProof, ProofError>;

    fn verify(&self, proof: &Proof<Bn254>, public_signals: &[Fr]) -> Result<bool, ProofError>;
}

/// arkworks Groth16 with the circom QAP reduction.
pub struct ArkGroth16Engine {
    pk: ProvingKey<Bn254>,
    pvk: PreparedVerifyingKey<Bn254>,
    matrices: ConstraintMatrices<Fr>,
    n_vars: usize,
    randomness: ProofRandomness,
}

impl ArkGroth16Engine {
    /// Build the engine from an opened zkey whose header already passed the
    /// curve check. Reads the coefficient section (4) and the A, B1, B2, C
    /// and H point tables (sections 5 to 9).
    pub fn from_zkey(
        zkey: &BinFile,
        header: &ZkeyHeader,
        randomness: ProofRandomness,
    ) -> Result<Self, StartupError> {
        let mut cursor = Cursor::new(zkey.bytes());
        let (pk, matrices) =
            read_zkey(&mut cursor).map_err(|e| StartupError::Engine(format!("zkey parse failed: {e}")))?;

        let n_instance = header.n_public as usize + 1;
        if matrices.num_instance_variables != n_instance || pk.vk.gamma_abc_g1.len() != n_instance {
            return Err(StartupError::Engine(format!(
                "zkey declares {} public signals but its tables hold {}",
                header.n_public,
                matrices.num_instance_variables.saturating_sub(1)
            )));
        }
        // read_zkey counts the constant one both as an instance and a witness variable
        let private_vars = (header.n_vars - header.n_public) as usize;
        if matrices.num_witness_variables != private_vars {
            return Err(StartupError::Engine(format!(
                "zkey declares {} variables but its matrices cover {}",
                header.n_vars,
                matrices.num_instance_variables + matrices.num_witness_variables - 1
            )));
        }

        let pvk = prepare_verifying_key(&pk.vk);
        Ok(Self {
            pk,
            pvk,
            matrices,
            n_vars: header.n_vars as usize,
            randomness,
        })
    }

    fn blinding(&self) -> (Fr, Fr) {
        match self.randomness {
            // Fresh RNG per proof: the same witness always yields the same proof.
            ProofRandomness::Seeded(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                (Fr::rand(&mut rng), Fr::rand(&mut rng))
            }
            ProofRandomness::Os => {
                let mut rng = rand::thread_rng();
                (Fr::rand(&mut rng), Fr::rand(&mut rng))
            }
        }
    }
}

impl ProvingEngine for ArkGroth16Engine {
    fn prove(&self, witness: &[Fr]) -> Result<GeneratedProof, ProofError> {
        let n_instance = self.matrices.num_instance_variables;
        if witness.len() != self.n_vars {
            return Err(ProofError::Engine(format!(
                "witness has {} elements, circuit expects {}",
                witness.len(),
                self.n_vars
            )));
        }

        let (r, s) = self.blinding();
        let proof = Groth16::<Bn254, CircomReduction>::create_proof_with_reduction_and_matrices(
            &self.pk,
            r,
            s,
            &self.matrices,
            n_instance,
            self.matrices.num_constraints,
            witness,
        )
        .map_err(|e| ProofError::Engine(e.to_string()))?;

        Ok(GeneratedProof {
            proof,
            public_signals: witness[1..n_instance].to_vec(),
        })
    }

    fn verify(&self, proof: &Proof<Bn254>, public_signals: &[Fr]) -> Result<bool, ProofError> {
        if public_signals.len() + 1 != self.pvk.vk.gamma_abc_g1.len() {
            return Err(ProofError::BadInput(format!(
                "expected {} public signals, got {}",
                self.pvk.vk.gamma_abc_g1.len() - 1,
                public_signals.len()
            )));
        }
        Groth16::<Bn254>::verify_proof(&self.pvk, proof, public_signals)
            .map_err(|e| ProofError::Engine(e.to_string()))
    }
}

/// snarkjs-compatible JSON form of a Groth16 proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofDocument {
    pub pi_a: [String; 3],
    pub pi_b: [[String; 2]; 3],
    pub pi_c: [String; 3],
    pub protocol: String,
    pub curve: String,
}

impl From<&Proof<Bn254>> for ProofDocument {
    fn from(proof: &Proof<Bn254>) -> Self {
        Self {
            pi_a: g1_strings(&proof.a),
            pi_b: g2_strings(&proof.b),
            pi_c: g1_strings(&proof.c),
            protocol: "groth16".to_string(),
            curve: "bn128".to_string(),
        }
    }
}

impl TryFrom<&ProofDocument> for Proof<Bn254> {
    type Error = ProofError;

    fn try_from(doc: &ProofDocument) -> Result<Self, Self::Error> {
        if doc.protocol != "groth16" {
            return Err(ProofError::BadInput(format!(
                "unsupported protocol {:?}",
                doc.protocol
            )));
        }
        Ok(Proof {
            a: parse_g1(&doc.pi_a, "pi_a")?,
            b: parse_g2(&doc.pi_b, "pi_b")?,
            c: parse_g1(&doc.pi_c, "pi_c")?,
        })
    }
}

/// Decimal strings, as snarkjs lists public signals.
pub fn signals_to_strings(signals: &[Fr]) -> Vec<String> {
    signals.iter().map(|s| s.to_string()).collect()
}

pub fn parse_signals(signals: &[String]) -> Result<Vec<Fr>, ProofError> {
    signals
        .iter()
        .enumerate()
        .map(|(i, s)| parse_field::<Fr>(s, &format!("publicSignals[{i}]")))
        .collect()
}

fn g1_strings(p: &G1Affine) -> [String; 3] {
    if p.infinity {
        return ["0".into(), "1".into(), "0".into()];
    }
    [p.x.to_string(), p.y.to_string(), "1".into()]
}

fn g2_strings(p: &G2Affine) -> [[String; 2]; 3] {
    if p.infinity {
        return [
            ["0".into(), "0".into()],
            ["1".into(), "0".into()],
            ["0".into(), "0".into()],
        ];
    }
    [
        [p.x.c0.to_string(), p.x.c1.to_string()],
        [p.y.c0.to_string(), p.y.c1.to_string()],
        ["1".into(), "0".into()],
    ]
}

fn parse_g1(coords: &[String; 3], what: &str) -> Result<G1Affine, ProofError> {
    if coords[2] == "0" {
        return Ok(G1Affine::identity());
    }
    let x = parse_field::<Fq>(&coords[0], what)?;
    let y = parse_field::<Fq>(&coords[1], what)?;
    let p = G1Affine::new_unchecked(x, y);
    if !p.is_on_curve() || !p.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofError::BadInput(format!("{what} is not a valid G1 point")));
    }
    Ok(p)
}

fn parse_g2(coords: &[[String; 2]; 3], what: &str) -> Result<G2Affine, ProofError> {
    if coords[2][0] == "0" && coords[2][1] == "0" {
        return Ok(G2Affine::identity());
    }
    let x = Fq2::new(
        parse_field::<Fq>(&coords[0][0], what)?,
        parse_field::<Fq>(&coords[0][1], what)?,
    );
    let y = Fq2::new(
        parse_field::<Fq>(&coords[1][0], what)?,
        parse_field::<Fq>(&coords[1][1], what)?,
    );
    let p = G2Affine::new_unchecked(x, y);
    if !p.is_on_curve() || !p.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofError::BadInput(format!("{what} is not a valid G2 point")));
    }
    Ok(p)
}

/// Parse a canonical decimal field element.
fn parse_field<F: PrimeField>(s: &str, what: &str) -> Result<F, ProofError> {
    let value = BigUint::parse_bytes(s.as_bytes(), 10)
        .ok_or_else(|| ProofError::BadInput(format!("{what}: {s:?} is not a decimal number")))?;
    let modulus: BigUint = F::MODULUS.into();
    if value >= modulus {
        return Err(ProofError::BadInput(format!("{what}: value exceeds field modulus")));
    }
    Ok(F::from(value))
}
