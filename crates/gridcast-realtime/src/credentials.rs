use gridcast_core::protocol::{AuthMode, ClientFrame, ConnectionInitPayload};
use std::fmt;
use url::Url;

/// Endpoint plus the auth material handed to the handshake. Two connects are
/// "the same session" exactly when their credentials compare equal.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub endpoint: Url,
    pub auth_mode: AuthMode,
    pub credential: String,
}

impl Credentials {
    pub fn api_key(endpoint: Url, key: impl Into<String>) -> Self {
        Self {
            endpoint,
            auth_mode: AuthMode::ApiKey,
            credential: key.into(),
        }
    }

    pub fn bearer(endpoint: Url, token: impl Into<String>) -> Self {
        Self {
            endpoint,
            auth_mode: AuthMode::Bearer,
            credential: token.into(),
        }
    }

    pub(crate) fn init_frame(&self) -> ClientFrame {
        ClientFrame::ConnectionInit {
            payload: ConnectionInitPayload {
                auth_mode: self.auth_mode,
                credential: self.credential.clone(),
            },
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint.as_str())
            .field("auth_mode", &self.auth_mode)
            .field("credential", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_secret() {
        let url = Url::parse("wss://realtime.example/graphql").expect("url");
        let creds = Credentials::bearer(url, "eyJ.secret.token");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("Bearer"));
    }
}
