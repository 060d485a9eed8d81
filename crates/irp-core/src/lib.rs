//! Client library for the Risk Modeler platform.
//!
//! This crate contains:
//! - An HTTP client with retries, pagination and workflow polling
//! - Managers for EDMs, portfolios, treaties, analyses and RDMs
//! - Import and export jobs with S3 uploads and result downloads
//! - Data Bridge SQL Server access with `{{ name }}` templating

pub mod analysis;
pub mod client;
pub mod config;
pub mod constants;
pub mod databridge;
pub mod edm;
pub mod error;
pub mod export_job;
pub mod extract;
pub mod http_client;
pub mod import_job;
pub mod irp;
pub mod job;
pub mod mri_import;
pub mod polling;
pub mod portfolio;
pub mod rdm;
pub mod reference_data;
pub mod retry;
pub mod s3;
pub mod treaty;
pub mod validators;

pub use analysis::{
    AnalysisManager, AnalysisRequest, AppAnalysis, GroupingRequest, GroupingSpec, MemberLookup,
    RegionPerilEntry, ResultQuery, SubmitOutcome,
};
pub use client::{Client, RequestOptions, WorkflowBatch, WorkflowOutcome};
pub use config::{ClientConfig, DataBridgeConfig};
pub use databridge::{
    render_sql, DataBridgeManager, ResultSet, SqlConnector, SqlParams, TiberiusConnector,
};
pub use edm::{EdmManager, EdmSpec, EdmUpgrade};
pub use error::{DataBridgeError, IrpError, Result, ValidationError};
pub use export_job::ExportJobManager;
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use import_job::{ImportJobManager, ImportRequest, ImportType};
pub use irp::IrpClient;
pub use job::{JobKind, JobManager};
pub use mri_import::{MriImportManager, MriImportRequest};
pub use polling::{JobStatus, PollConfig};
pub use portfolio::{GeohazRequest, PortfolioManager, PortfolioSpec};
pub use rdm::{DataBridgeJobStatus, RdmExportRequest, RdmManager};
pub use reference_data::{AnalysisCurrency, ReferenceDataManager};
pub use retry::{Backoff, RetryConfig};
pub use s3::{AmazonS3Provider, S3Credentials, S3Location, S3Manager, StoreProvider};
pub use treaty::{TreatyManager, TreatySpec};
