//! S3 uploads with the temporary credentials handed out by import folders,
//! and downloads of presigned result URLs.
//!
//! Import folder responses carry, per file, an `uploadUrl` and a
//! `presignParams` object whose values are base64 encoded:
//!
//! ```json
//! {
//!   "uploadUrl": "https://bucket.s3.amazonaws.com/path/to/file.bak",
//!   "presignParams": {
//!     "accessKeyId": "<base64>",
//!     "secretAccessKey": "<base64>",
//!     "sessionToken": "<base64>",
//!     "path": "<base64>",
//!     "region": "<base64>"
//!   }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
    WriteMultipart,
};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::error::{IrpError, Result, ValidationError};
use crate::http_client::{BodyStream, HttpClient, HttpRequest};
use crate::validators;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Files at or above this size are sent as a multipart upload.
pub const MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;
const MULTIPART_CHUNK_SIZE: usize = 8 * 1024 * 1024;
const DOWNLOAD_TIMEOUT_MS: u64 = 300_000;

/// Content type inferred from the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("bak") => "application/octet-stream",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("zip") => "application/zip",
        Some("xml") => "application/xml",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Temporary AWS credentials for one upload.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub region: String,
    /// Upload path prefix, when the platform provides one.
    pub path: Option<String>,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &"***")
            .field("region", &self.region)
            .field("path", &self.path)
            .finish()
    }
}

impl S3Credentials {
    /// Every credential field must be present and non-empty.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let missing: Vec<&str> = [
            ("aws_access_key_id", &self.access_key_id),
            ("aws_secret_access_key", &self.secret_access_key),
            ("aws_session_token", &self.session_token),
            ("s3_region", &self.region),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Other(format!(
                "credentials missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

fn decode_param(params: &Value, key: &str) -> std::result::Result<Option<String>, ValidationError> {
    let Some(encoded) = params.get(key).and_then(Value::as_str) else {
        return Ok(None);
    };
    let raw = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ValidationError::Other(format!("presignParams.{key} is not valid base64: {e}")))?;
    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| ValidationError::Other(format!("presignParams.{key} is not UTF-8")))
}

/// Decode base64 `presignParams` into credentials.
pub fn decode_presign_params(params: &Value) -> std::result::Result<S3Credentials, ValidationError> {
    let credentials = S3Credentials {
        access_key_id: decode_param(params, "accessKeyId")?.unwrap_or_default(),
        secret_access_key: decode_param(params, "secretAccessKey")?.unwrap_or_default(),
        session_token: decode_param(params, "sessionToken")?.unwrap_or_default(),
        region: decode_param(params, "region")?.unwrap_or_default(),
        path: decode_param(params, "path")?,
    };
    credentials.validate()?;
    Ok(credentials)
}

/// Upload URL and decoded credentials for one file of an import folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDetails {
    pub upload_url: String,
    pub credentials: S3Credentials,
}

impl UploadDetails {
    pub fn from_json(details: &Value) -> std::result::Result<Self, ValidationError> {
        let upload_url = details
            .get("uploadUrl")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                ValidationError::Other(String::from(
                    "upload_details missing required field: uploadUrl",
                ))
            })?;
        let params = details
            .get("presignParams")
            .filter(|params| params.as_object().is_some_and(|map| !map.is_empty()))
            .ok_or_else(|| {
                ValidationError::Other(String::from(
                    "upload_details missing required field: presignParams",
                ))
            })?;
        Ok(Self {
            upload_url: upload_url.to_owned(),
            credentials: decode_presign_params(params)?,
        })
    }
}

/// Bucket and key addressed by an upload URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

/// Parse virtual-hosted (`bucket.s3[.region].amazonaws.com/key`) and
/// path-style (`s3[.region].amazonaws.com/bucket/key`) URLs.
pub fn parse_s3_url(upload_url: &str) -> std::result::Result<S3Location, ValidationError> {
    let fail = |reason: &str| {
        ValidationError::Other(format!("Failed to parse S3 URL '{upload_url}': {reason}"))
    };
    let parsed = reqwest::Url::parse(upload_url).map_err(|e| fail(&e.to_string()))?;
    let host = parsed.host_str().unwrap_or_default();
    let path = parsed.path().trim_start_matches('/');

    let (bucket, key) = if host.contains(".s3.") || host.contains(".s3-") {
        let bucket = host.split(".s3").next().unwrap_or_default();
        (bucket.to_owned(), path.to_owned())
    } else if host.starts_with("s3.") || host.starts_with("s3-") {
        let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
        (bucket.to_owned(), key.to_owned())
    } else {
        return Err(fail("unrecognized S3 URL format"));
    };

    if bucket.is_empty() || key.is_empty() {
        return Err(fail("could not extract bucket/key"));
    }
    let decoded = urlencoding::decode(&key).ok().map(|decoded| decoded.into_owned());
    let key = decoded.unwrap_or(key);
    debug!(%bucket, %key, "parsed S3 URL");
    Ok(S3Location { bucket, key })
}

/// Builds an object store for a bucket from temporary credentials.
pub trait StoreProvider: Send + Sync {
    fn store(&self, bucket: &str, credentials: &S3Credentials) -> Result<Arc<dyn ObjectStore>>;
}

/// Amazon S3 via `object_store`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmazonS3Provider;

impl StoreProvider for AmazonS3Provider {
    fn store(&self, bucket: &str, credentials: &S3Credentials) -> Result<Arc<dyn ObjectStore>> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&credentials.region)
            .with_access_key_id(&credentials.access_key_id)
            .with_secret_access_key(&credentials.secret_access_key)
            .with_token(&credentials.session_token)
            .build()
            .map_err(|e| IrpError::file(format!("Failed to build S3 client: {e}")))?;
        Ok(Arc::new(store))
    }
}

/// Uploads import files and downloads result files.
#[derive(Clone)]
pub struct S3Manager {
    provider: Arc<dyn StoreProvider>,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for S3Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Manager").finish_non_exhaustive()
    }
}

impl S3Manager {
    pub fn new(provider: Arc<dyn StoreProvider>, http: Arc<dyn HttpClient>) -> Self {
        Self { provider, http }
    }

    /// Uploads to Amazon S3; downloads go through `http`.
    pub fn amazon(http: Arc<dyn HttpClient>) -> Self {
        Self::new(Arc::new(AmazonS3Provider), http)
    }

    /// Upload a local file using the `uploadUrl`/`presignParams` of an import folder.
    pub async fn upload_file(
        &self,
        file_path: &Path,
        upload_details: &Value,
        content_type: Option<&str>,
    ) -> Result<()> {
        validators::file_exists(file_path)?;
        let details = UploadDetails::from_json(upload_details)?;
        let location = parse_s3_url(&details.upload_url)?;
        self.upload_to_s3(file_path, &location, &details.credentials, content_type)
            .await
    }

    /// Upload in-memory bytes using import folder upload details.
    pub async fn upload_bytes(
        &self,
        data: Bytes,
        upload_details: &Value,
        content_type: &str,
    ) -> Result<()> {
        validators::non_empty_str(content_type, "content_type")?;
        let details = UploadDetails::from_json(upload_details)?;
        let location = parse_s3_url(&details.upload_url)?;
        let store = self.provider.store(&location.bucket, &details.credentials)?;
        info!(bucket = %location.bucket, key = %location.key, "uploading bytes to S3");
        store
            .put_opts(
                &ObjectPath::from(location.key.as_str()),
                PutPayload::from(data),
                put_options(content_type),
            )
            .await
            .map_err(|e| {
                error!(error = %e, "S3 upload failed");
                IrpError::file(format!("Failed to upload file to S3: {e}"))
            })?;
        Ok(())
    }

    /// Upload with credentials that were decoded elsewhere.
    pub async fn upload_file_from_credentials(
        &self,
        file_path: &Path,
        credentials: &S3Credentials,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<()> {
        validators::file_exists(file_path)?;
        validators::non_empty_str(bucket, "bucket")?;
        validators::non_empty_str(key, "key")?;
        credentials.validate()?;
        let location = S3Location {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        };
        self.upload_to_s3(file_path, &location, credentials, content_type)
            .await
    }

    async fn upload_to_s3(
        &self,
        file_path: &Path,
        location: &S3Location,
        credentials: &S3Credentials,
        content_type: Option<&str>,
    ) -> Result<()> {
        let content_type = content_type.unwrap_or_else(|| content_type_for(file_path));
        let store = self.provider.store(&location.bucket, credentials)?;
        let object = ObjectPath::from(location.key.as_str());
        info!(
            file = %file_path.display(),
            bucket = %location.bucket,
            key = %location.key,
            content_type,
            "uploading file to S3"
        );

        let mut file = tokio::fs::File::open(file_path).await.map_err(|e| {
            IrpError::file(format!("File not found: {} ({e})", file_path.display()))
        })?;
        let size = file.metadata().await?.len();

        let outcome = if size >= MULTIPART_THRESHOLD {
            let opts = PutMultipartOpts {
                attributes: content_type_attributes(content_type),
                ..Default::default()
            };
            let upload = store.put_multipart_opts(&object, opts).await;
            match upload {
                Ok(upload) => {
                    let mut writer = WriteMultipart::new_with_chunk_size(upload, MULTIPART_CHUNK_SIZE);
                    let mut buffer = vec![0_u8; MULTIPART_CHUNK_SIZE];
                    loop {
                        let read = file.read(&mut buffer).await?;
                        if read == 0 {
                            break;
                        }
                        writer.write(&buffer[..read]);
                    }
                    writer.finish().await.map(|_| ())
                }
                Err(e) => Err(e),
            }
        } else {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data).await?;
            store
                .put_opts(&object, PutPayload::from(data), put_options(content_type))
                .await
                .map(|_| ())
        };

        outcome.map_err(|e| {
            error!(error = %e, "S3 upload failed");
            IrpError::file(format!("Failed to upload file to S3: {e}"))
        })?;
        info!("file uploaded successfully");
        Ok(())
    }

    /// Download a presigned or CDN URL to `destination`, writing the body
    /// as it arrives. A download that breaks off leaves no file behind.
    pub async fn download_from_url(&self, url: &str, destination: &Path) -> Result<()> {
        validators::non_empty_str(url, "url")?;
        info!(destination = %destination.display(), "downloading from URL");
        let response = self
            .http
            .execute_streaming(HttpRequest::get(url).with_timeout_ms(DOWNLOAD_TIMEOUT_MS))
            .await
            .map_err(|e| IrpError::file(format!("Failed to download from URL: {e}")))?;
        if !response.is_success() {
            error!(status = response.status, "download failed");
            return Err(IrpError::file(format!(
                "Failed to download from URL: HTTP {}",
                response.status
            )));
        }

        let mut file = File::create(destination)
            .await
            .map_err(|e| write_error(destination, e))?;
        match write_body(response.body, &mut file, destination).await {
            Ok(bytes) => {
                info!(destination = %destination.display(), bytes, "download complete");
                Ok(())
            }
            Err(error) => {
                drop(file);
                if let Err(e) = tokio::fs::remove_file(destination).await {
                    warn!(error = %e, destination = %destination.display(), "could not remove partial download");
                }
                Err(error)
            }
        }
    }
}

async fn write_body(
    mut body: Box<dyn BodyStream>,
    file: &mut File,
    destination: &Path,
) -> Result<u64> {
    let mut written = 0_u64;
    while let Some(chunk) = body
        .next_chunk()
        .await
        .map_err(|e| IrpError::file(format!("Failed to download from URL: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| write_error(destination, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| write_error(destination, e))?;
    Ok(written)
}

fn write_error(destination: &Path, e: std::io::Error) -> IrpError {
    IrpError::file(format!(
        "Failed to write file '{}': {e}",
        destination.display()
    ))
}

fn content_type_attributes(content_type: &str) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(
        Attribute::ContentType,
        AttributeValue::from(content_type.to_owned()),
    );
    attributes
}

fn put_options(content_type: &str) -> PutOptions {
    PutOptions {
        attributes: content_type_attributes(content_type),
        ..Default::default()
    }
}
