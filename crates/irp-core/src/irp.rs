//! Single entry point holding one [`Client`] and handing out managers.

use std::sync::Arc;

use crate::analysis::AnalysisManager;
use crate::client::Client;
use crate::config::ClientConfig;
use crate::databridge::DataBridgeManager;
use crate::edm::EdmManager;
use crate::error::Result;
use crate::export_job::ExportJobManager;
use crate::http_client::HttpClient;
use crate::import_job::ImportJobManager;
use crate::job::JobManager;
use crate::mri_import::MriImportManager;
use crate::portfolio::PortfolioManager;
use crate::rdm::RdmManager;
use crate::reference_data::ReferenceDataManager;
use crate::s3::S3Manager;
use crate::treaty::TreatyManager;

/// Managers share the client's transport, configuration and S3 access.
#[derive(Debug, Clone)]
pub struct IrpClient {
    client: Client,
    s3: S3Manager,
}

impl IrpClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::from_client(Client::new(config))
    }

    /// Configuration from `RISK_MODELER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_client(Client::from_env())
    }

    pub fn with_http_client(config: ClientConfig, http: Arc<dyn HttpClient>) -> Self {
        Self::from_client(Client::with_http_client(config, http))
    }

    pub fn from_client(client: Client) -> Self {
        let s3 = S3Manager::amazon(client.http().clone());
        Self { client, s3 }
    }

    /// Route uploads and downloads through `s3`.
    pub fn with_s3(mut self, s3: S3Manager) -> Self {
        self.s3 = s3;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn edm(&self) -> EdmManager {
        EdmManager::new(self.client.clone()).with_s3(self.s3.clone())
    }

    pub fn portfolio(&self) -> PortfolioManager {
        PortfolioManager::new(self.client.clone())
    }

    pub fn mri_import(&self) -> MriImportManager {
        MriImportManager::new(self.client.clone()).with_s3(self.s3.clone())
    }

    pub fn analysis(&self) -> AnalysisManager {
        AnalysisManager::new(self.client.clone())
    }

    pub fn treaty(&self) -> TreatyManager {
        TreatyManager::new(self.client.clone())
    }

    pub fn reference_data(&self) -> ReferenceDataManager {
        ReferenceDataManager::new(self.client.clone())
    }

    pub fn rdm(&self) -> RdmManager {
        RdmManager::new(self.client.clone()).with_s3(self.s3.clone())
    }

    pub fn job(&self) -> JobManager {
        JobManager::new(self.client.clone())
    }

    pub fn import_job(&self) -> ImportJobManager {
        ImportJobManager::new(self.client.clone()).with_s3(self.s3.clone())
    }

    pub fn export_job(&self) -> ExportJobManager {
        ExportJobManager::new(self.client.clone()).with_s3(self.s3.clone())
    }

    /// SQL Server access for the named connection (default `DATABRIDGE`).
    pub fn databridge(&self, connection_name: Option<&str>) -> Result<DataBridgeManager> {
        DataBridgeManager::from_env(connection_name)
    }
}
