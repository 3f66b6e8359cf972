/// Supplies the credentials forwarded to the broker when a connection is made.
/// Only the connection layer interprets them.
pub trait AuthProvider: Send + Sync {
    fn auth_method(&self) -> &str;
    fn auth_data(&self) -> Vec<u8>;
}

/// Authenticates with a static token, using the broker's `token` auth method.
#[derive(Clone)]
pub struct TokenAuthProvider {
    token: String,
}

impl TokenAuthProvider {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_owned(),
        }
    }
}

impl AuthProvider for TokenAuthProvider {
    fn auth_method(&self) -> &str {
        "token"
    }

    fn auth_data(&self) -> Vec<u8> {
        self.token.as_bytes().to_vec()
    }
}

// Keep the token out of logs.
impl std::fmt::Debug for TokenAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_auth_provider() {
        let auth = TokenAuthProvider::new("secret");

        assert_eq!(auth.auth_method(), "token");
        assert_eq!(auth.auth_data(), b"secret".to_vec());
        assert!(!format!("{:?}", auth).contains("secret"));
    }
}
