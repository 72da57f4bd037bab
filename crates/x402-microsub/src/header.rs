//! `X-PAYMENT` header codec: [`SignedPayload`] ⇄ JSON ⇄ base64.

use base64::Engine;

use crate::constants::{SCHEME_NAME, X402_VERSION};
use crate::payment::{ExactPayload, SignedPayload, TransferAuthorization};
use crate::X402Error;

/// Base64-encode a signed authorization for the `X-PAYMENT` header.
pub fn encode_payment_header(
    authorization: &TransferAuthorization,
    signature: &str,
    network: &str,
) -> Result<String, X402Error> {
    let payload = SignedPayload {
        x402_version: X402_VERSION,
        scheme: SCHEME_NAME.to_string(),
        network: network.to_string(),
        payload: ExactPayload {
            signature: signature.to_string(),
            authorization: authorization.clone(),
        },
    };
    encode_signed_payload(&payload)
}

/// Base64-encode an already assembled payload.
pub fn encode_signed_payload(payload: &SignedPayload) -> Result<String, X402Error> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| X402Error::EncodeError(format!("failed to serialize payload: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Decode a payment payload from the `X-PAYMENT` header.
pub fn decode_payment_header(encoded: &str) -> Result<SignedPayload, X402Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| X402Error::DecodeError(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| X402Error::DecodeError(format!("invalid JSON: {e}")))
}

/// Diagnostic decode: logs and returns `None` instead of failing.
pub fn inspect_payment_header(encoded: &str) -> Option<SignedPayload> {
    match decode_payment_header(encoded) {
        Ok(payload) => {
            tracing::debug!(
                scheme = %payload.scheme,
                network = %payload.network,
                from = %payload.payload.authorization.from(),
                value = %payload.payload.authorization.value(),
                "decoded payment header"
            );
            Some(payload)
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not decode payment header, continuing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256};

    fn sample_auth() -> TransferAuthorization {
        TransferAuthorization::new(
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            "10000",
            1_700_000_000,
            1_700_000_300,
            B256::repeat_byte(0xab),
        )
    }

    #[test]
    fn test_header_roundtrip() {
        let auth = sample_auth();
        let encoded = encode_payment_header(&auth, "0xdead", "base-sepolia").unwrap();
        let decoded = decode_payment_header(&encoded).unwrap();

        assert_eq!(decoded.payload.authorization, auth);
        assert_eq!(decoded.payload.signature, "0xdead");
        assert_eq!(decoded.network, "base-sepolia");
        assert_eq!(decoded.scheme, "exact");
        assert_eq!(decoded.x402_version, X402_VERSION);
    }

    #[test]
    fn test_wire_field_names() {
        let encoded = encode_payment_header(&sample_auth(), "0xdead", "base").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["scheme"], "exact");
        assert_eq!(json["network"], "base");
        assert_eq!(json["payload"]["signature"], "0xdead");
        let auth = &json["payload"]["authorization"];
        assert_eq!(auth["value"], "10000");
        assert_eq!(auth["validAfter"], "1700000000");
        assert_eq!(auth["validBefore"], "1700000300");
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_payment_header("not base64!!").unwrap_err();
        assert!(matches!(err, X402Error::DecodeError(_)));
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"{\"x402Version\":");
        let err = decode_payment_header(&encoded).unwrap_err();
        assert!(matches!(err, X402Error::DecodeError(_)));
    }

    #[test]
    fn test_inspect_swallows_errors() {
        assert!(inspect_payment_header("%%%").is_none());
        let encoded = encode_payment_header(&sample_auth(), "0xdead", "base").unwrap();
        assert!(inspect_payment_header(&encoded).is_some());
    }
}
