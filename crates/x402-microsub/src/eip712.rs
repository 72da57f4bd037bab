//! EIP-712 typed data for ERC-3009 `TransferWithAuthorization`.
//!
//! Provides functions for:
//! - Building the token's EIP-712 domain ([`get_token_domain`])
//! - Building a complete signable message ([`build_payment_typed_data`])
//! - Generating cryptographically secure random nonces ([`random_nonce`])
//! - Encoding signatures to hex ([`encode_signature_hex`])

use std::borrow::Cow;
use std::collections::BTreeMap;

use alloy::primitives::{Address, Signature, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};

use crate::constants::token_domain_params;
use crate::payment::TransferAuthorization;
use crate::{TransferWithAuthorization, X402Error};

/// Primary type of every payment message.
pub const PRIMARY_TYPE: &str = "TransferWithAuthorization";

/// EIP-712 domain separator fields of a token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl TypedDataDomain {
    pub fn to_eip712(&self) -> Eip712Domain {
        Eip712Domain {
            name: Some(Cow::Owned(self.name.clone())),
            version: Some(Cow::Owned(self.version.clone())),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: Some(self.verifying_contract),
            salt: None,
        }
    }
}

/// Build the EIP-712 domain for a token contract on a chain.
pub fn get_token_domain(token: Address, chain_id: u64) -> TypedDataDomain {
    let (name, version) = token_domain_params(token, chain_id);
    TypedDataDomain {
        name: name.to_string(),
        version: version.to_string(),
        chain_id,
        verifying_contract: token,
    }
}

/// One `{name, type}` entry of an EIP-712 struct definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

fn fields(defs: &[(&str, &str)]) -> Vec<TypedField> {
    defs.iter()
        .map(|(name, ty)| TypedField {
            name: (*name).to_string(),
            ty: (*ty).to_string(),
        })
        .collect()
}

/// Struct definitions for the payment message, keyed by type name.
pub fn payment_types() -> BTreeMap<String, Vec<TypedField>> {
    let mut types = BTreeMap::new();
    types.insert(
        "EIP712Domain".to_string(),
        fields(&[
            ("name", "string"),
            ("version", "string"),
            ("chainId", "uint256"),
            ("verifyingContract", "address"),
        ]),
    );
    types.insert(
        PRIMARY_TYPE.to_string(),
        fields(&[
            ("from", "address"),
            ("to", "address"),
            ("value", "uint256"),
            ("validAfter", "uint256"),
            ("validBefore", "uint256"),
            ("nonce", "bytes32"),
        ]),
    );
    types
}

/// A complete signable message in the `eth_signTypedData_v4` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTypedData {
    pub domain: TypedDataDomain,
    pub types: BTreeMap<String, Vec<TypedField>>,
    pub primary_type: &'static str,
    pub message: TransferAuthorization,
    /// x402 network the authorization is meant for. Not part of the signed data.
    #[serde(skip)]
    pub network: String,
}

impl PaymentTypedData {
    /// The message as the `sol!` struct used for hashing.
    pub fn to_sol(&self) -> Result<TransferWithAuthorization, X402Error> {
        let m = &self.message;
        let parse = |field: &str, s: &str| {
            s.parse::<U256>()
                .map_err(|e| X402Error::InvalidPayment(format!("invalid {field} '{s}': {e}")))
        };
        Ok(TransferWithAuthorization {
            from: m.from(),
            to: m.to(),
            value: parse("value", m.value())?,
            validAfter: parse("validAfter", m.valid_after())?,
            validBefore: parse("validBefore", m.valid_before())?,
            nonce: m.nonce(),
        })
    }

    /// EIP-712 digest a wallet signs for this message.
    pub fn signing_hash(&self) -> Result<B256, X402Error> {
        Ok(self.to_sol()?.eip712_signing_hash(&self.domain.to_eip712()))
    }
}

/// Build the typed data for one payment authorization.
///
/// Generates a fresh nonce and a validity window starting now. Inputs are
/// taken as given; address and amount validation is the caller's job.
pub fn build_payment_typed_data(
    token: Address,
    recipient: Address,
    amount: U256,
    network: &str,
    chain_id: u64,
    user: Address,
    valid_duration_secs: u64,
) -> PaymentTypedData {
    let now = unix_now();
    let valid_before = now.saturating_add(valid_duration_secs);
    let message = TransferAuthorization::new(
        user,
        recipient,
        amount.to_string(),
        now,
        valid_before,
        random_nonce(),
    );

    PaymentTypedData {
        domain: get_token_domain(token, chain_id),
        types: payment_types(),
        primary_type: PRIMARY_TYPE,
        message,
        network: network.to_string(),
    }
}

/// Fresh 32-byte ERC-3009 nonce from the thread-local CSPRNG.
pub fn random_nonce() -> B256 {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    B256::from(bytes)
}

/// `0x` + 130 hex chars: r, s, then v as 27/28.
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

/// Current unix time in seconds. A clock before the epoch reads as 0.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch");
            0
        })
}
