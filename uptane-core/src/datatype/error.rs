use thiserror::Error;

/// Every fallible outcome the crate can produce, from metadata parsing
/// through installation. Mirrors the shape of the original hand-rolled
/// error enum but leans on `thiserror` for the `Display`/`From` boilerplate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("canonicalization error: {0}")]
    Canonical(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("{0}")]
    Internal(String),

    #[error("update lock error: {0}")]
    Lock(String),

    #[error("keystore error: {0}")]
    KeyStore(String),

    #[error("package manager error: {0}")]
    PackageManager(String),

    #[error("repo builder error: {0}")]
    RepoBuilder(String),

    #[error("secondary transport error: {0}")]
    Secondary(String),

    #[error("metadata verification failed: {0}")]
    Verify(String),

    #[error("command queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("ring error: {0}")]
    Ring(String),

    #[error("openssl error: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
}

impl From<ring::error::Unspecified> for Error {
    fn from(_: ring::error::Unspecified) -> Error {
        Error::Ring("unspecified ring failure".into())
    }
}

impl From<ring::error::KeyRejected> for Error {
    fn from(err: ring::error::KeyRejected) -> Error {
        Error::Ring(format!("key rejected: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
