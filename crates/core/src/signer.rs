//! HMAC request signing shared by every authenticated driver.
//!
//! A [`RequestSigner`] is parameterised by a hash algorithm, an output encoding
//! and a [`PayloadStrategy`] that lays out the signed bytes for one exchange.
//! [`Authenticator`] adds the credential precondition and the nonce.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{ExchangeError, Result};
use crate::nonce::NonceSequencer;

/// Request parameters. Ordered, so encoded bodies are deterministic.
pub type Params = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Hex,
    Base64,
}

/// How the configured API secret is turned into HMAC key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretEncoding {
    #[default]
    Raw,
    Base64,
}

/// Keyed HMAC over `payload`, encoded for transport as a header value.
pub fn sign(
    secret: &[u8],
    payload: &[u8],
    algorithm: HashAlgorithm,
    encoding: SignatureEncoding,
) -> Result<String> {
    let digest = match algorithm {
        HashAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                .map_err(|err| ExchangeError::Signature(err.to_string()))?;
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(secret)
                .map_err(|err| ExchangeError::Signature(err.to_string()))?;
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(secret)
                .map_err(|err| ExchangeError::Signature(err.to_string()))?;
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
    };

    Ok(match encoding {
        SignatureEncoding::Hex => hex::encode(digest),
        SignatureEncoding::Base64 => BASE64_STANDARD.encode(digest),
    })
}

/// `application/x-www-form-urlencoded` rendering of `params`, keys sorted.
pub fn encode_params(params: &Params) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, &param_text(value));
    }
    serializer.finish()
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

pub struct SignRequest<'a> {
    pub path: &'a str,
    pub nonce: Option<i64>,
    pub params: &'a Params,
}

/// Bytes fed to the HMAC plus the body that is actually transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPayload {
    pub message: Vec<u8>,
    pub body: String,
}

pub trait PayloadStrategy: fmt::Debug + Send + Sync {
    fn build(&self, request: &SignRequest<'_>) -> Result<CanonicalPayload>;
}

/// `path || sha256(nonce || form_body)`; the nonce travels inside the form body.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathDigestPayload;

impl PayloadStrategy for PathDigestPayload {
    fn build(&self, request: &SignRequest<'_>) -> Result<CanonicalPayload> {
        let nonce = request
            .nonce
            .ok_or_else(|| ExchangeError::Signature("path digest payload needs a nonce".into()))?;
        let mut params = request.params.clone();
        params.insert("nonce".into(), Value::String(nonce.to_string()));
        let body = encode_params(&params);

        let digest = Sha256::digest(format!("{nonce}{body}").as_bytes());
        let mut message = request.path.as_bytes().to_vec();
        message.extend_from_slice(&digest);
        Ok(CanonicalPayload { message, body })
    }
}

/// Base64 of a JSON object holding the request path, the nonce and the params.
/// The encoded payload is both the signed message and the transmitted body.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodedJsonPayload;

impl PayloadStrategy for EncodedJsonPayload {
    fn build(&self, request: &SignRequest<'_>) -> Result<CanonicalPayload> {
        let mut object: BTreeMap<&str, Value> = request
            .params
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();
        object.insert("request", Value::String(request.path.to_string()));
        if let Some(nonce) = request.nonce {
            object.insert("nonce", Value::from(nonce));
        }

        let json = serde_json::to_string(&object)?;
        let body = BASE64_STANDARD.encode(json.as_bytes());
        Ok(CanonicalPayload {
            message: body.clone().into_bytes(),
            body,
        })
    }
}

/// The form-encoded body itself, with `nonce` added when one is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStringPayload;

impl PayloadStrategy for QueryStringPayload {
    fn build(&self, request: &SignRequest<'_>) -> Result<CanonicalPayload> {
        let body = match request.nonce {
            Some(nonce) => {
                let mut params = request.params.clone();
                params.insert("nonce".into(), Value::from(nonce));
                encode_params(&params)
            }
            None => encode_params(request.params),
        };
        Ok(CanonicalPayload {
            message: body.clone().into_bytes(),
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub api_key: String,
    pub nonce: Option<i64>,
    pub body: String,
    pub signature: String,
}

#[derive(Debug)]
pub struct RequestSigner {
    algorithm: HashAlgorithm,
    encoding: SignatureEncoding,
    secret_encoding: SecretEncoding,
    strategy: Box<dyn PayloadStrategy>,
}

impl RequestSigner {
    pub fn new(
        algorithm: HashAlgorithm,
        encoding: SignatureEncoding,
        strategy: impl PayloadStrategy + 'static,
    ) -> Self {
        Self {
            algorithm,
            encoding,
            secret_encoding: SecretEncoding::Raw,
            strategy: Box::new(strategy),
        }
    }

    pub fn with_secret_encoding(mut self, secret_encoding: SecretEncoding) -> Self {
        self.secret_encoding = secret_encoding;
        self
    }

    pub fn sign(&self, credentials: &Credentials, request: &SignRequest<'_>) -> Result<SignedRequest> {
        let secret = match self.secret_encoding {
            SecretEncoding::Raw => credentials.api_secret.as_bytes().to_vec(),
            SecretEncoding::Base64 => BASE64_STANDARD
                .decode(credentials.api_secret.trim())
                .map_err(|err| ExchangeError::Signature(format!("api secret is not base64: {err}")))?,
        };
        let payload = self.strategy.build(request)?;
        let signature = sign(&secret, &payload.message, self.algorithm, self.encoding)?;

        Ok(SignedRequest {
            api_key: credentials.api_key.clone(),
            nonce: request.nonce,
            body: payload.body,
            signature,
        })
    }
}

/// Credentials, nonce sequencer and signer for one exchange account.
#[derive(Debug)]
pub struct Authenticator {
    exchange: String,
    credentials: Option<Credentials>,
    nonce: NonceSequencer,
    signer: RequestSigner,
}

impl Authenticator {
    pub fn new(
        exchange: impl Into<String>,
        credentials: Option<Credentials>,
        nonce: NonceSequencer,
        signer: RequestSigner,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            credentials,
            nonce,
            signer,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(Credentials::is_complete)
    }

    /// Fails with `CredentialsMissing` when key or secret is not configured.
    pub fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .filter(|credentials| credentials.is_complete())
            .ok_or_else(|| ExchangeError::CredentialsMissing(self.exchange.clone()))
    }

    pub fn nonce(&self) -> &NonceSequencer {
        &self.nonce
    }

    /// Signs with a fresh nonce. The credential check runs first so a missing
    /// key never consumes a nonce.
    pub fn sign(&self, path: &str, params: &Params) -> Result<SignedRequest> {
        let credentials = self.credentials()?;
        let nonce = self.nonce.next();
        self.signer.sign(
            credentials,
            &SignRequest {
                path,
                nonce: Some(nonce),
                params,
            },
        )
    }

    /// Signs exchanges that replace the nonce with a timestamp parameter.
    pub fn sign_without_nonce(&self, path: &str, params: &Params) -> Result<SignedRequest> {
        let credentials = self.credentials()?;
        self.signer.sign(
            credentials,
            &SignRequest {
                path,
                nonce: None,
                params,
            },
        )
    }
}
