use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header LINE uses to carry the body signature.
pub const LINE_SIGNATURE_HEADER: &str = "x-line-signature";

fn body_mac(secret: &str, body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return None,
    };
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Base64 HMAC-SHA256 of `body` keyed with the channel secret.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    body_mac(secret, body)
        .map(|digest| B64.encode(digest))
        .unwrap_or_default()
}

/// Constant-time check of a base64 body signature. Empty or undecodable signatures never match.
pub fn verify_signature(secret: &str, body: &[u8], provided: &str) -> bool {
    let provided = provided.trim();
    if provided.is_empty() {
        return false;
    }
    let Ok(provided) = B64.decode(provided) else {
        return false;
    };
    let Some(expected) = body_mac(secret, body) else {
        return false;
    };
    expected.ct_eq(&provided).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"events":[]}"#;
        let sig = sign_body("channel-secret", body);
        assert!(verify_signature("channel-secret", body, &sig));
    }

    #[test]
    fn rejects_wrong_secret_or_body() {
        let body = br#"{"events":[]}"#;
        let sig = sign_body("channel-secret", body);
        assert!(!verify_signature("other-secret", body, &sig));
        assert!(!verify_signature("channel-secret", b"{}", &sig));
    }

    #[test]
    fn rejects_missing_or_garbage_signature() {
        assert!(!verify_signature("s", b"{}", ""));
        assert!(!verify_signature("s", b"{}", "not base64 !!"));
    }
}
