//! HMAC tokens for join admission and admin operations

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{MeshworkError, MeshworkResult};

type HmacSha256 = Hmac<Sha256>;

const ADMIN_TOKEN_SUBJECT: &[u8] = b"cluster-admin";

fn mac_for(secret: &str) -> MeshworkResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MeshworkError::internal(format!("invalid HMAC key: {}", e)))
}

fn join_subject(mac: &mut HmacSha256, cluster_name: &str, node_id: &str, address: &str) {
    mac.update(cluster_name.as_bytes());
    mac.update(b"\n");
    mac.update(node_id.as_bytes());
    mac.update(b"\n");
    mac.update(address.as_bytes());
}

/// Hex HMAC-SHA256 over `cluster \n node id \n address`
pub fn join_token(secret: &str, cluster_name: &str, node_id: &str, address: &str) -> MeshworkResult<String> {
    let mut mac = mac_for(secret)?;
    join_subject(&mut mac, cluster_name, node_id, address);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a join token. An empty secret admits everyone.
pub fn verify_join_token(secret: &str, cluster_name: &str, node_id: &str, address: &str, token: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Ok(expected) = hex::decode(token) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    join_subject(&mut mac, cluster_name, node_id, address);
    mac.verify_slice(&expected).is_ok()
}

pub fn admin_token(secret: &str) -> MeshworkResult<String> {
    let mut mac = mac_for(secret)?;
    mac.update(ADMIN_TOKEN_SUBJECT);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of an admin token. Without a secret every caller passes.
pub fn verify_admin_token(secret: Option<&str>, token: &str) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return true;
    };
    let Ok(expected) = hex::decode(token) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(ADMIN_TOKEN_SUBJECT);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_token_verifies() {
        let token = join_token("s3cret", "prod", "node-1", "10.0.0.1:7000").unwrap();
        assert_eq!(token.len(), 64);
        assert!(verify_join_token("s3cret", "prod", "node-1", "10.0.0.1:7000", &token));
    }

    #[test]
    fn test_join_token_bound_to_identity() {
        let token = join_token("s3cret", "prod", "node-1", "10.0.0.1:7000").unwrap();
        assert!(!verify_join_token("s3cret", "prod", "node-2", "10.0.0.1:7000", &token));
        assert!(!verify_join_token("s3cret", "prod", "node-1", "10.0.0.9:7000", &token));
        assert!(!verify_join_token("other", "prod", "node-1", "10.0.0.1:7000", &token));
        assert!(!verify_join_token("s3cret", "prod", "node-1", "10.0.0.1:7000", "not-hex"));
    }

    #[test]
    fn test_empty_secret_allows_all() {
        assert!(verify_join_token("", "prod", "n", "a:1", ""));
    }

    #[test]
    fn test_admin_token() {
        let token = admin_token("admin-key").unwrap();
        assert!(verify_admin_token(Some("admin-key"), &token));
        assert!(!verify_admin_token(Some("wrong"), &token));
        assert!(!verify_admin_token(Some("admin-key"), ""));
        assert!(verify_admin_token(None, ""));
        assert!(verify_admin_token(Some(""), ""));
    }
}
