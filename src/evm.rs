//! EVM primitives for session-key signing
//!
//! Key generation, address derivation, quantity parsing, and EIP-1559
//! (type 0x02) transaction encoding and signing.

use crate::error::{AgentBusError, Result};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{length_of_length, BufMut, Encodable, Header};
use k256::ecdsa::SigningKey;
use std::str::FromStr;

const EIP1559_TX_TYPE: u8 = 0x02;
const EMPTY_ACCESS_LIST_RLP_LEN: usize = 1;

/// Gas limit for a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Generate a fresh random secp256k1 key
pub fn generate_signing_key() -> SigningKey {
    SigningKey::random(&mut rand::rngs::OsRng)
}

/// Decode a 0x-hex private key
pub fn signing_key_from_hex(raw: &str) -> Result<SigningKey> {
    let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
        .map_err(|e| AgentBusError::Signing(format!("private key is not hex: {}", e)))?;
    SigningKey::from_slice(&bytes)
        .map_err(|e| AgentBusError::Signing(format!("invalid private key: {}", e)))
}

/// Encode a private key as 0x-hex
pub fn signing_key_to_hex(key: &SigningKey) -> String {
    format!("0x{}", hex::encode(key.to_bytes()))
}

/// Lowercase 0x address: last 20 bytes of Keccak-256(uncompressed pubkey)
pub fn address_of(key: &SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// Parse a 20-byte address
pub fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw.trim())
        .map_err(|e| AgentBusError::Signing(format!("invalid address '{}': {}", raw, e)))
}

/// Parse a quantity given as 0x-hex or decimal
pub fn parse_quantity(raw: &str, field: &str) -> Result<U256> {
    let trimmed = raw.trim();
    if let Some(hex_digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if hex_digits.is_empty() {
            return Ok(U256::ZERO);
        }
        return U256::from_str_radix(hex_digits, 16)
            .map_err(|e| AgentBusError::Signing(format!("{} is not valid hex: {}", field, e)));
    }
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AgentBusError::Signing(format!(
            "{} must be a decimal or 0x-hex quantity, got '{}'",
            field, raw
        )));
    }
    U256::from_str_radix(trimmed, 10)
        .map_err(|e| AgentBusError::Signing(format!("{} is out of range: {}", field, e)))
}

/// Parse a quantity that must fit in u64
pub fn parse_u64_quantity(raw: &str, field: &str) -> Result<u64> {
    let value = parse_quantity(raw, field)?;
    u64::try_from(value)
        .map_err(|_| AgentBusError::Signing(format!("{} exceeds u64", field)))
}

/// Decode 0x-hex call data
pub fn parse_call_data(raw: &str) -> Result<Bytes> {
    let digits = raw.trim().trim_start_matches("0x");
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| AgentBusError::Signing(format!("call data is not hex: {}", e)))
}

/// Unsigned EIP-1559 transaction with every field resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Eip1559Transaction {
    fn fields_length(&self) -> usize {
        self.chain_id.length()
            + self.nonce.length()
            + self.max_priority_fee_per_gas.length()
            + self.max_fee_per_gas.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
            + EMPTY_ACCESS_LIST_RLP_LEN
    }

    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
        Header {
            list: true,
            payload_length: 0,
        }
        .encode(out);
    }

    /// Hash that the sender signs: keccak256(0x02 || rlp(fields))
    pub fn signing_hash(&self) -> B256 {
        keccak256(typed_envelope(&alloy_rlp::encode(self)))
    }

    /// Sign with `key`, producing the raw transaction and its hash
    pub fn sign(&self, key: &SigningKey) -> Result<SignedTransaction> {
        let sighash = self.signing_hash();
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(sighash.as_slice())
            .map_err(|e| AgentBusError::Signing(format!("ecdsa signing failed: {}", e)))?;

        let bytes = signature.to_bytes();
        let signed = SignedFields {
            tx: self,
            y_parity: recovery_id.to_byte(),
            r: U256::from_be_slice(&bytes[..32]),
            s: U256::from_be_slice(&bytes[32..]),
        };
        let raw = typed_envelope(&alloy_rlp::encode(&signed));
        let hash = keccak256(&raw);
        Ok(SignedTransaction { raw, hash })
    }
}

impl Encodable for Eip1559Transaction {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.fields_length(),
        }
        .encode(out);
        self.encode_fields(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.fields_length();
        payload_length + length_of_length(payload_length)
    }
}

struct SignedFields<'a> {
    tx: &'a Eip1559Transaction,
    y_parity: u8,
    r: U256,
    s: U256,
}

impl SignedFields<'_> {
    fn payload_length(&self) -> usize {
        self.tx.fields_length() + self.y_parity.length() + self.r.length() + self.s.length()
    }
}

impl Encodable for SignedFields<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.tx.encode_fields(out);
        self.y_parity.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

/// Signed, broadcast-ready transaction
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    /// 0x02 || rlp(fields, y_parity, r, s)
    pub raw: Vec<u8>,
    /// Transaction hash, keccak256(raw)
    pub hash: B256,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash.as_slice()))
    }
}

fn typed_envelope(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(EIP1559_TX_TYPE);
    out.extend_from_slice(payload);
    out
}
