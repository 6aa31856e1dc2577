//! Authentication modes and the OAuth2 token cache.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use intake_core::{redact_secrets, ConnectorError, Record};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Refresh the access token this long before its advertised expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// OAuth2 grant types supported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuth2Grant {
    /// Machine-to-machine client credentials.
    ClientCredentials,
    /// Exchange a long-lived refresh token.
    RefreshToken,
    /// Resource-owner password credentials.
    Password,
}

impl OAuth2Grant {
    fn as_str(&self) -> &'static str {
        match self {
            OAuth2Grant::ClientCredentials => "client_credentials",
            OAuth2Grant::RefreshToken => "refresh_token",
            OAuth2Grant::Password => "password",
        }
    }

    fn parse(s: &str) -> Result<Self, ConnectorError> {
        match s {
            "client_credentials" => Ok(OAuth2Grant::ClientCredentials),
            "refresh_token" => Ok(OAuth2Grant::RefreshToken),
            "password" => Ok(OAuth2Grant::Password),
            other => Err(ConnectorError::Configuration(format!(
                "unsupported oauth2 grant type '{other}'"
            ))),
        }
    }
}

/// OAuth2 settings.
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    /// Token endpoint URL.
    pub token_url: String,
    /// Client id.
    pub client_id: String,
    /// Client secret, injected by the credential store.
    pub client_secret: String,
    /// Grant type.
    pub grant_type: OAuth2Grant,
    /// Optional scope string.
    pub scope: Option<String>,
    /// Optional audience parameter.
    pub audience: Option<String>,
    /// Whether client credentials travel in the Basic header (`true`) or
    /// the request body.
    pub credentials_in_header: bool,
    /// Seed refresh token for the refresh_token grant.
    pub refresh_token: Option<String>,
    /// Resource-owner credentials for the password grant.
    pub username: Option<String>,
    /// Resource-owner password for the password grant.
    pub password: Option<String>,
    /// Extra form parameters sent verbatim.
    pub extra_params: Vec<(String, String)>,
}

impl OAuth2Config {
    /// Parse the `oauth2_config` object of an API connector config.
    pub fn from_record(config: &Record) -> Result<Self, ConnectorError> {
        let get = |key: &str| config.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                ConnectorError::Configuration(format!("oauth2_config missing '{key}'"))
            })
        };
        let extra_params = config
            .get("extra_params")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            token_url: required("token_url")?,
            client_id: required("client_id")?,
            client_secret: required("client_secret")?,
            grant_type: OAuth2Grant::parse(
                get("grant_type").as_deref().unwrap_or("client_credentials"),
            )?,
            scope: get("scope"),
            audience: get("audience"),
            credentials_in_header: get("auth_method").as_deref() != Some("body"),
            refresh_token: get("refresh_token"),
            username: get("username"),
            password: get("password"),
            extra_params,
        })
    }
}

/// Authentication mode of an API connector.
#[derive(Debug, Clone)]
pub enum AuthConfig {
    /// No authentication.
    None,
    /// Static API key sent in a configurable header.
    ApiKey {
        /// The key value.
        key: String,
        /// Header name (default `X-API-Key`).
        header: String,
    },
    /// HTTP Basic.
    Basic {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// Static bearer token.
    Bearer {
        /// The token value.
        token: String,
    },
    /// OAuth2 with automatic token refresh.
    OAuth2(OAuth2Config),
}

impl AuthConfig {
    /// Parse the auth portion of an API connector config.
    pub fn from_record(config: &Record) -> Result<Self, ConnectorError> {
        let get = |key: &str| config.get(key).and_then(|v| v.as_str()).map(str::to_string);
        match get("auth_type").as_deref().unwrap_or("none") {
            "none" => Ok(AuthConfig::None),
            "api_key" => Ok(AuthConfig::ApiKey {
                key: get("api_key").unwrap_or_default(),
                header: get("api_key_header").unwrap_or_else(|| "X-API-Key".to_string()),
            }),
            "basic" => Ok(AuthConfig::Basic {
                username: get("username").unwrap_or_default(),
                password: get("password").unwrap_or_default(),
            }),
            "bearer" => Ok(AuthConfig::Bearer {
                token: get("bearer_token").unwrap_or_default(),
            }),
            "oauth2" => {
                let oauth = config
                    .get("oauth2_config")
                    .and_then(|v| v.as_object())
                    .ok_or_else(|| {
                        ConnectorError::Configuration(
                            "auth_type 'oauth2' requires an 'oauth2_config' object".into(),
                        )
                    })?;
                Ok(AuthConfig::OAuth2(OAuth2Config::from_record(oauth)?))
            }
            other => Err(ConnectorError::Configuration(format!(
                "unsupported auth_type '{other}'"
            ))),
        }
    }
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
    refresh_token: Option<String>,
}

/// Per-connector OAuth2 token cache.
#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    token: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    /// A valid cached access token, or a freshly fetched one.
    pub(crate) async fn access_token(
        &self,
        client: &reqwest::Client,
        config: &OAuth2Config,
    ) -> Result<String, ConnectorError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if Instant::now() + REFRESH_MARGIN < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        // Prefer the rolling refresh token once one has been issued.
        let refresh_token = guard
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
            .or_else(|| config.refresh_token.clone());

        let fetched = fetch_token(client, config, refresh_token.as_deref()).await?;
        let access = fetched.access_token.clone();
        *guard = Some(fetched);
        Ok(access)
    }
}

async fn fetch_token(
    client: &reqwest::Client,
    config: &OAuth2Config,
    refresh_token: Option<&str>,
) -> Result<CachedToken, ConnectorError> {
    let mut form: Vec<(String, String)> = Vec::new();

    let effective_grant = match (config.grant_type, refresh_token) {
        (OAuth2Grant::RefreshToken, None) => {
            return Err(ConnectorError::Configuration(
                "refresh_token grant requires a refresh token".into(),
            ));
        }
        (grant, _) => grant,
    };
    form.push(("grant_type".into(), effective_grant.as_str().into()));

    match effective_grant {
        OAuth2Grant::RefreshToken => {
            form.push((
                "refresh_token".into(),
                refresh_token.unwrap_or_default().into(),
            ));
        }
        OAuth2Grant::Password => {
            let username = config.username.clone().ok_or_else(|| {
                ConnectorError::Configuration("password grant requires 'username'".into())
            })?;
            let password = config.password.clone().ok_or_else(|| {
                ConnectorError::Configuration("password grant requires 'password'".into())
            })?;
            form.push(("username".into(), username));
            form.push(("password".into(), password));
        }
        OAuth2Grant::ClientCredentials => {}
    }

    if let Some(scope) = &config.scope {
        form.push(("scope".into(), scope.clone()));
    }
    if let Some(audience) = &config.audience {
        form.push(("audience".into(), audience.clone()));
    }
    form.extend(config.extra_params.iter().cloned());

    let mut request = client
        .post(&config.token_url)
        .header("accept", "application/json");
    if config.credentials_in_header {
        let credentials =
            STANDARD.encode(format!("{}:{}", config.client_id, config.client_secret));
        request = request.header("authorization", format!("Basic {credentials}"));
    } else {
        form.push(("client_id".into(), config.client_id.clone()));
        form.push(("client_secret".into(), config.client_secret.clone()));
    }

    let response = request
        .form(&form)
        .send()
        .await
        .map_err(|e| ConnectorError::Connection(redact_secrets(&e.to_string())))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ConnectorError::Connection(redact_secrets(&e.to_string())))?;

    if !status.is_success() {
        let error = body["error"].as_str().unwrap_or("unknown");
        let description = body["error_description"].as_str().unwrap_or("");
        return Err(ConnectorError::Connection(format!(
            "token request failed ({status}): {error} {description}"
        )));
    }

    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| {
            ConnectorError::Connection("token response missing access_token".into())
        })?
        .to_string();
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    tracing::debug!(expires_in, "oauth2 token obtained");

    Ok(CachedToken {
        access_token,
        expires_at: Instant::now() + Duration::from_secs(expires_in),
        refresh_token: body["refresh_token"].as_str().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn parses_api_key_auth_with_default_header() {
        let config = record(json!({"auth_type": "api_key", "api_key": "k-123"}));
        match AuthConfig::from_record(&config).unwrap() {
            AuthConfig::ApiKey { key, header } => {
                assert_eq!(key, "k-123");
                assert_eq!(header, "X-API-Key");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_auth_type_means_none() {
        let config = record(json!({}));
        assert!(matches!(
            AuthConfig::from_record(&config).unwrap(),
            AuthConfig::None
        ));
    }

    #[test]
    fn unknown_auth_type_is_configuration_error() {
        let config = record(json!({"auth_type": "kerberos"}));
        assert!(matches!(
            AuthConfig::from_record(&config),
            Err(ConnectorError::Configuration(_))
        ));
    }

    #[test]
    fn oauth2_requires_config_object() {
        let config = record(json!({"auth_type": "oauth2"}));
        assert!(AuthConfig::from_record(&config).is_err());

        let config = record(json!({
            "auth_type": "oauth2",
            "oauth2_config": {
                "token_url": "https://idp/token",
                "client_id": "cid",
                "client_secret": "cs",
                "grant_type": "client_credentials",
                "scope": "system/*.read"
            }
        }));
        match AuthConfig::from_record(&config).unwrap() {
            AuthConfig::OAuth2(oauth) => {
                assert_eq!(oauth.grant_type, OAuth2Grant::ClientCredentials);
                assert!(oauth.credentials_in_header);
                assert_eq!(oauth.scope.as_deref(), Some("system/*.read"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn oauth2_body_credential_placement() {
        let config = record(json!({
            "token_url": "https://idp/token",
            "client_id": "cid",
            "client_secret": "cs",
            "auth_method": "body"
        }));
        let oauth = OAuth2Config::from_record(&config).unwrap();
        assert!(!oauth.credentials_in_header);
    }

    #[test]
    fn unsupported_grant_is_rejected() {
        let config = record(json!({
            "token_url": "https://idp/token",
            "client_id": "cid",
            "client_secret": "cs",
            "grant_type": "implicit"
        }));
        assert!(OAuth2Config::from_record(&config).is_err());
    }
}
