//! Reader for the section-structured binary files produced by circom tooling
//! (`.zkey` proving keys and `.wtns` witnesses).
//!
//! Layout, all integers little endian:
//! ```text
//! magic[4] | version u32 | n_sections u32 | { id u32 | size u64 | data[size] }*
//! ```

use std::ops::Range;
use std::path::Path;

use ark_bn254::Fr;
use ark_ff::{BigInt, PrimeField};

use crate::config::FieldModulus;
use crate::error::{CurveMismatchError, FormatError};

pub const ZKEY_KIND: &str = "zkey";
pub const ZKEY_VERSION: u32 = 1;
pub const WTNS_KIND: &str = "wtns";
pub const WTNS_VERSION: u32 = 2;

const GROTH16_PROTOCOL_ID: u32 = 1;
const FR_BYTES: usize = 32;

/// An opened, structurally checked binary artifact.
pub struct BinFile {
    kind: String,
    version: u32,
    data: Vec<u8>,
    sections: Vec<(u32, Range<usize>)>,
}

impl BinFile {
    /// Read `path` and check it is a `kind` file no newer than `max_version`.
    pub fn open(path: &Path, kind: &str, max_version: u32) -> Result<Self, FormatError> {
        let data = std::fs::read(path).map_err(|source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(data, kind, max_version)
    }

    pub fn from_bytes(data: Vec<u8>, kind: &str, max_version: u32) -> Result<Self, FormatError> {
        let mut r = Reader::new(&data, kind);

        let magic = r.take(4)?;
        if magic != kind.as_bytes() {
            return Err(FormatError::BadMagic {
                expected: kind.to_string(),
                found: String::from_utf8_lossy(magic).into_owned(),
            });
        }

        let version = r.u32()?;
        if version == 0 || version > max_version {
            return Err(FormatError::UnsupportedVersion {
                kind: kind.to_string(),
                found: version,
                max: max_version,
            });
        }

        let n_sections = r.u32()?;
        // Each section header takes 12 bytes; never reserve more than the file can hold
        let mut sections = Vec::with_capacity((n_sections as usize).min(r.remaining() / 12));
        for _ in 0..n_sections {
            let id = r.u32()?;
            let size = r.u64()?;
            let size = usize::try_from(size).map_err(|_| r.truncated("section size overflows"))?;
            let start = r.pos;
            r.take(size)?;
            sections.push((id, start..start + size));
        }

        Ok(Self {
            kind: kind.to_string(),
            version,
            data,
            sections,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Data of the first section with the given id.
    pub fn section(&self, id: u32) -> Result<&[u8], FormatError> {
        self.sections
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, range)| &self.data[range.clone()])
            .ok_or_else(|| FormatError::MissingSection {
                kind: self.kind.clone(),
                id,
            })
    }

    /// The whole file image, framing included.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Groth16 header of a proving key (sections 1 and 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZkeyHeader {
    pub r: FieldModulus,
    pub n_vars: u32,
    pub n_public: u32,
    pub domain_size: u32,
}

impl ZkeyHeader {
    pub fn parse(file: &BinFile) -> Result<Self, FormatError> {
        let mut proto = Reader::new(file.section(1)?, ZKEY_KIND);
        let protocol = proto.u32()?;
        if protocol != GROTH16_PROTOCOL_ID {
            return Err(header_error(
                ZKEY_KIND,
                format!("protocol {protocol} is not groth16"),
            ));
        }

        let mut r = Reader::new(file.section(2)?, ZKEY_KIND);
        // Base field (n8q, q) is implied by the scalar field checked later
        let n8q = r.u32()?;
        r.take(n8q as usize)?;
        let n8r = r.u32()?;
        let rr = FieldModulus::from_le_bytes(r.take(n8r as usize)?);
        let n_vars = r.u32()?;
        let n_public = r.u32()?;
        let domain_size = r.u32()?;

        if n_public >= n_vars {
            return Err(header_error(
                ZKEY_KIND,
                format!("{n_public} public signals but only {n_vars} variables"),
            ));
        }

        Ok(Self {
            r: rr,
            n_vars,
            n_public,
            domain_size,
        })
    }
}

/// Header of a witness file (section 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessHeader {
    pub n8: u32,
    pub prime: FieldModulus,
    pub n_witness: u32,
}

impl WitnessHeader {
    pub fn parse(file: &BinFile) -> Result<Self, FormatError> {
        let mut r = Reader::new(file.section(1)?, WTNS_KIND);
        let n8 = r.u32()?;
        let prime = FieldModulus::from_le_bytes(r.take(n8 as usize)?);
        let n_witness = r.u32()?;
        Ok(Self {
            n8,
            prime,
            n_witness,
        })
    }
}

pub fn check_curve(declared: &FieldModulus, expected: &FieldModulus) -> Result<(), CurveMismatchError> {
    if declared != expected {
        return Err(CurveMismatchError {
            expected: expected.clone(),
            found: declared.clone(),
        });
    }
    Ok(())
}

/// Decode the witness values (section 2) as BN254 scalars.
///
/// Must only be called after the header's prime passed [`check_curve`].
pub fn read_witness_elements(file: &BinFile, header: &WitnessHeader) -> Result<Vec<Fr>, FormatError> {
    if header.n8 as usize != FR_BYTES {
        return Err(header_error(
            WTNS_KIND,
            format!("element size {} is not {FR_BYTES}", header.n8),
        ));
    }

    let data = file.section(2)?;
    let expected = header.n_witness as usize * FR_BYTES;
    if data.len() != expected {
        return Err(FormatError::Truncated {
            kind: WTNS_KIND.to_string(),
            detail: format!(
                "witness section holds {} bytes, header declares {} elements ({expected} bytes)",
                data.len(),
                header.n_witness
            ),
        });
    }

    data.chunks_exact(FR_BYTES)
        .enumerate()
        .map(|(i, chunk)| {
            let mut limbs = [0u64; 4];
            for (limb, bytes) in limbs.iter_mut().zip(chunk.chunks_exact(8)) {
                let mut word = [0u8; 8];
                word.copy_from_slice(bytes);
                *limb = u64::from_le_bytes(word);
            }
            Fr::from_bigint(BigInt::new(limbs))
                .ok_or_else(|| header_error(WTNS_KIND, format!("element {i} is not reduced")))
        })
        .collect()
}

fn header_error(kind: &str, detail: String) -> FormatError {
    FormatError::Header {
        kind: kind.to_string(),
        detail,
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    kind: &'a str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], kind: &'a str) -> Self {
        Self { data, pos: 0, kind }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                self.truncated(&format!(
                    "need {n} bytes at offset {}, {} available",
                    self.pos,
                    self.data.len().saturating_sub(self.pos)
                ))
            })?;
        let data = self.data;
        let out = &data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, FormatError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn truncated(&self, detail: &str) -> FormatError {
        FormatError::Truncated {
            kind: self.kind.to_string(),
            detail: detail.to_string(),
        }
    }
}
