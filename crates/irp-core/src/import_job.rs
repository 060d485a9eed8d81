//! Import jobs of every type, routed to the manager that owns the upload.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::Value;

use crate::client::Client;
use crate::edm::{EdmManager, DEFAULT_IMPORT_SERVER};
use crate::error::{Result, ValidationError};
use crate::job::JobKind;
use crate::mri_import::{MriImportManager, MriImportRequest};
use crate::polling::PollConfig;
use crate::rdm::RdmManager;
use crate::s3::S3Manager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportType {
    Edm,
    Rdm,
    Mri,
}

impl ImportType {
    pub const ALL: [Self; 3] = [Self::Edm, Self::Mri, Self::Rdm];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Edm => "EDM",
            Self::Rdm => "RDM",
            Self::Mri => "MRI",
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportType {
    type Err = ValidationError;

    /// Case-insensitive.
    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|kind| kind.as_str()).collect();
                ValidationError::Other(format!(
                    "Invalid import_type '{value}'. Must be one of: {}",
                    allowed.join(", ")
                ))
            })
    }
}

/// Arguments for one import, by type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRequest {
    Edm {
        edm_name: String,
        edm_file_path: PathBuf,
        server_name: String,
    },
    Rdm {
        rdm_name: String,
        edm_name: String,
        rdm_file_path: PathBuf,
    },
    Mri(MriImportRequest),
}

impl ImportRequest {
    /// EDM import onto the default import server.
    pub fn edm(edm_name: impl Into<String>, edm_file_path: impl Into<PathBuf>) -> Self {
        Self::Edm {
            edm_name: edm_name.into(),
            edm_file_path: edm_file_path.into(),
            server_name: DEFAULT_IMPORT_SERVER.to_owned(),
        }
    }

    pub const fn import_type(&self) -> ImportType {
        match self {
            Self::Edm { .. } => ImportType::Edm,
            Self::Rdm { .. } => ImportType::Rdm,
            Self::Mri(_) => ImportType::Mri,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportJobManager {
    client: Client,
    s3: S3Manager,
}

impl ImportJobManager {
    pub fn new(client: Client) -> Self {
        let s3 = S3Manager::amazon(client.http().clone());
        Self { client, s3 }
    }

    pub fn with_s3(mut self, s3: S3Manager) -> Self {
        self.s3 = s3;
        self
    }

    /// Submit `request` through the manager for its import type. Returns the
    /// job id and request body.
    pub async fn submit_job(&self, request: &ImportRequest) -> Result<(i64, Value)> {
        match request {
            ImportRequest::Edm {
                edm_name,
                edm_file_path,
                server_name,
            } => {
                EdmManager::new(self.client.clone())
                    .with_s3(self.s3.clone())
                    .submit_edm_import_job(edm_name, edm_file_path, server_name)
                    .await
            }
            ImportRequest::Rdm {
                rdm_name,
                edm_name,
                rdm_file_path,
            } => {
                RdmManager::new(self.client.clone())
                    .with_s3(self.s3.clone())
                    .submit_rdm_import_job(rdm_name, edm_name, rdm_file_path)
                    .await
            }
            ImportRequest::Mri(mri) => {
                MriImportManager::new(self.client.clone())
                    .with_s3(self.s3.clone())
                    .submit_mri_import_job(mri)
                    .await
            }
        }
    }

    pub async fn get_import_job(&self, job_id: i64) -> Result<Value> {
        JobKind::IMPORT.get(&self.client, job_id).await
    }

    pub async fn poll_import_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        JobKind::IMPORT.poll(&self.client, job_id, config).await
    }
}
