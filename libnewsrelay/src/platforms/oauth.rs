//! OAuth 1.0a request signing (HMAC-SHA1) for the write API

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;

use crate::error::PlatformError;

type HmacSha1 = Hmac<Sha1>;

/// Signs requests on behalf of one user with the four OAuth 1.0a secrets
pub struct OAuth1Signer {
    consumer_key: SecretString,
    consumer_secret: SecretString,
    token: SecretString,
    token_secret: SecretString,
}

impl OAuth1Signer {
    pub fn new(
        consumer_key: SecretString,
        consumer_secret: SecretString,
        token: SecretString,
        token_secret: SecretString,
    ) -> Self {
        Self {
            consumer_key,
            consumer_secret,
            token,
            token_secret,
        }
    }

    /// Build the `Authorization` header for a request.
    ///
    /// `params` are the form-encoded body parameters, if any; query parameters
    /// are taken from `url`. JSON and multipart bodies are not signed.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, PlatformError> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_header_with(method, url, params, &nonce, &timestamp)
    }

    fn authorization_header_with(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, PlatformError> {
        let parsed = Url::parse(url)
            .map_err(|e| PlatformError::Authentication(format!("Cannot sign {}: {}", url, e)))?;
        let base_url = format!("{}{}", parsed.origin().ascii_serialization(), parsed.path());

        let mut oauth_params: Vec<(String, String)> = vec![
            (
                "oauth_consumer_key".to_string(),
                self.consumer_key.expose_secret().to_string(),
            ),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_token".to_string(), self.token.expose_secret().to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];

        let mut signed: Vec<(String, String)> = oauth_params
            .iter()
            .cloned()
            .chain(
                parsed
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            )
            .chain(params.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .map(|(k, v)| (encode(&k), encode(&v)))
            .collect();
        signed.sort();

        let param_string = signed
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let base_string = format!(
            "{}&{}&{}",
            method.to_uppercase(),
            encode(&base_url),
            encode(&param_string)
        );
        let signing_key = format!(
            "{}&{}",
            encode(self.consumer_secret.expose_secret()),
            encode(self.token_secret.expose_secret())
        );

        let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
            .map_err(|e| PlatformError::Authentication(format!("Invalid signing key: {}", e)))?;
        mac.update(base_string.as_bytes());
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        oauth_params.push(("oauth_signature".to_string(), signature));
        oauth_params.sort();

        let header = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {}", header))
    }
}

/// RFC 3986 percent-encoding (everything but unreserved characters)
fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn documented_signer() -> OAuth1Signer {
        OAuth1Signer::new(
            SecretString::from("xvz1evFS4wEEPTGEFPHBog".to_string()),
            SecretString::from("kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw".to_string()),
            SecretString::from("370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".to_string()),
            SecretString::from("LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".to_string()),
        )
    }

    #[test]
    fn test_matches_documented_signature() {
        let header = documented_signer()
            .authorization_header_with(
                "POST",
                "https://api.twitter.com/1.1/statuses/update.json?include_entities=true",
                &[("status", "Hello Ladies + Gentlemen, a signed OAuth request!")],
                "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
                "1318622958",
            )
            .unwrap();

        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
        assert!(header.contains("oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\""));
        assert!(header.contains("oauth_version=\"1.0\""));
    }

    #[test]
    fn test_nonce_changes_between_requests() {
        let signer = documented_signer();
        let a = signer
            .authorization_header("POST", "https://api.twitter.com/2/tweets", &[])
            .unwrap();
        let b = signer
            .authorization_header("POST", "https://api.twitter.com/2/tweets", &[])
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let err = documented_signer()
            .authorization_header("POST", "not a url", &[])
            .unwrap_err();
        assert!(matches!(err, PlatformError::Authentication(_)));
    }

    #[test]
    fn test_encode_reserved_characters() {
        assert_eq!(encode("Hello Ladies + Gentlemen"), "Hello%20Ladies%20%2B%20Gentlemen");
        assert_eq!(encode("a-b_c.d~e"), "a-b_c.d~e");
    }
}
