//! Portfolios inside an EDM, their accounts, and GeoHaz (geocoding and
//! hazard) jobs.

use serde::Deserialize;
use serde_json::{json, Value};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::info;

use crate::client::{Client, RequestOptions};
use crate::constants::endpoints;
use crate::edm::EdmManager;
use crate::error::{IrpError, Result};
use crate::extract::{self, id_from_location};
use crate::http_client::HttpMethod;
use crate::job::JobKind;
use crate::polling::PollConfig;
use crate::validators;

/// Portfolio numbers longer than this are truncated.
pub const PORTFOLIO_NUMBER_MAX_CHARS: usize = 20;
pub const DEFAULT_GEOCODE_VERSION: &str = "22.0";

/// One portfolio to create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortfolioSpec {
    pub edm_name: String,
    pub portfolio_name: String,
    #[serde(default)]
    pub portfolio_number: String,
    #[serde(default)]
    pub description: String,
}

/// Geocoding of a portfolio plus optional hazard layers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeohazRequest {
    pub edm_name: String,
    pub portfolio_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub hazard_eq: bool,
    #[serde(default)]
    pub hazard_ws: bool,
    #[serde(default)]
    pub geocode_layer_options: Option<Value>,
    #[serde(default)]
    pub hazard_layer_options: Option<Value>,
}

fn default_version() -> String {
    String::from(DEFAULT_GEOCODE_VERSION)
}

impl GeohazRequest {
    pub fn new(edm_name: impl Into<String>, portfolio_name: impl Into<String>) -> Self {
        Self {
            edm_name: edm_name.into(),
            portfolio_name: portfolio_name.into(),
            version: default_version(),
            hazard_eq: false,
            hazard_ws: false,
            geocode_layer_options: None,
            hazard_layer_options: None,
        }
    }

    pub fn with_hazards(mut self, earthquake: bool, windstorm: bool) -> Self {
        self.hazard_eq = earthquake;
        self.hazard_ws = windstorm;
        self
    }

    /// Request body for a portfolio at `portfolio_uri`.
    pub fn body(&self, portfolio_uri: &str) -> Value {
        let geocode_options = self.geocode_layer_options.clone().unwrap_or_else(|| {
            json!({
                "aggregateTriggerEnabled": "true",
                "geoLicenseType": "0",
                "skipPrevGeocoded": false
            })
        });
        let hazard_options = self
            .hazard_layer_options
            .clone()
            .unwrap_or_else(|| json!({"overrideUserDef": false, "skipPrevHazard": false}));

        let layer = |kind: &str, name: &str, options: &Value| {
            json!({
                "type": kind,
                "name": name,
                "engineType": "RL",
                "version": self.version,
                "layerOptions": options,
            })
        };
        let mut layers = vec![layer("geocode", "geocode", &geocode_options)];
        if self.hazard_eq {
            layers.push(layer("hazard", "earthquake", &hazard_options));
        }
        if self.hazard_ws {
            layers.push(layer("hazard", "windstorm", &hazard_options));
        }

        json!({
            "resourceUri": portfolio_uri,
            "resourceType": "portfolio",
            "settings": {"layers": layers}
        })
    }
}

fn default_description(now: OffsetDateTime) -> String {
    let stamp = now
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_default();
    format!("Portfolio created via API on {stamp} UTC")
}

#[derive(Debug, Clone)]
pub struct PortfolioManager {
    client: Client,
}

impl PortfolioManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn edms(&self) -> EdmManager {
        EdmManager::new(self.client.clone())
    }

    pub async fn get_portfolio_by_id(&self, exposure_id: i64, portfolio_id: i64) -> Result<Value> {
        validators::positive(exposure_id, "exposure_id")?;
        validators::positive(portfolio_id, "portfolio_id")?;
        self.client
            .get_json(&endpoints::portfolio(exposure_id, portfolio_id), RequestOptions::new())
            .await
            .map_err(|error| {
                error.context(format!(
                    "Failed to get portfolio details for exposure ID '{exposure_id}' and portfolio ID '{portfolio_id}'"
                ))
            })
    }

    pub async fn get_portfolio_metadata(
        &self,
        exposure_id: i64,
        portfolio_id: i64,
    ) -> Result<Value> {
        validators::positive(exposure_id, "exposure_id")?;
        validators::positive(portfolio_id, "portfolio_id")?;
        self.client
            .get_json(
                &endpoints::portfolio_metrics(exposure_id, portfolio_id),
                RequestOptions::new(),
            )
            .await
            .map_err(|error| {
                error.context(format!(
                    "Failed to get portfolio metadata for exposure ID '{exposure_id}' and portfolio ID '{portfolio_id}'"
                ))
            })
    }

    pub async fn search_portfolios(
        &self,
        exposure_id: i64,
        filter: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>> {
        validators::positive(exposure_id, "exposure_id")?;
        self.client
            .get_json(
                &endpoints::portfolios(exposure_id),
                RequestOptions::new().filter(filter).page(limit, offset),
            )
            .await
            .map(extract::into_list)
            .map_err(|error| {
                error.context(format!(
                    "Failed to search portfolios for exposure ID '{exposure_id}'"
                ))
            })
    }

    pub async fn search_portfolios_paginated(
        &self,
        exposure_id: i64,
        filter: &str,
    ) -> Result<Vec<Value>> {
        validators::positive(exposure_id, "exposure_id")?;
        self.client
            .get_all_pages(&endpoints::portfolios(exposure_id), filter)
            .await
            .map_err(|error| {
                error.context(format!(
                    "Failed to search portfolios for exposure ID '{exposure_id}'"
                ))
            })
    }

    pub async fn search_accounts_by_portfolio(
        &self,
        exposure_id: i64,
        portfolio_id: i64,
    ) -> Result<Vec<Value>> {
        validators::positive(exposure_id, "exposure_id")?;
        validators::positive(portfolio_id, "portfolio_id")?;
        self.client
            .get_json(
                &endpoints::portfolio_accounts(exposure_id, portfolio_id),
                RequestOptions::new(),
            )
            .await
            .map(extract::into_list)
            .map_err(|error| {
                error.context(format!(
                    "Failed to search portfolio accounts for exposure ID '{exposure_id}' and portfolio ID '{portfolio_id}'"
                ))
            })
    }

    /// The single portfolio called `portfolio_name` in an exposure.
    pub async fn find_portfolio(&self, exposure_id: i64, portfolio_name: &str) -> Result<Value> {
        let portfolios = self
            .search_portfolios(
                exposure_id,
                &format!("portfolioName=\"{portfolio_name}\""),
                100,
                0,
            )
            .await?;
        extract::exactly_one(portfolios, &format!("portfolio with name '{portfolio_name}'"))
    }

    /// Create a portfolio in the EDM called `edm_name`.
    ///
    /// The portfolio number defaults to the name and is cut to 20 characters;
    /// an empty description is replaced by a creation timestamp.
    pub async fn create_portfolio(
        &self,
        edm_name: &str,
        portfolio_name: &str,
        portfolio_number: &str,
        description: &str,
    ) -> Result<(i64, Value)> {
        validators::non_empty_str(edm_name, "edm_name")?;
        validators::non_empty_str(portfolio_name, "portfolio_name")?;
        let exposure_id = self.edms().exposure_id_by_name(edm_name).await?;

        let existing = self
            .search_portfolios(
                exposure_id,
                &format!("portfolioName=\"{portfolio_name}\""),
                100,
                0,
            )
            .await?;
        if !existing.is_empty() {
            return Err(IrpError::api(format!(
                "{} portfolios found with name {portfolio_name}, please use a unique name",
                existing.len()
            )));
        }

        let number = if portfolio_number.is_empty() {
            portfolio_name
        } else {
            portfolio_number
        };
        let description = if description.is_empty() {
            default_description(OffsetDateTime::now_utc())
        } else {
            description.to_owned()
        };
        let body = json!({
            "portfolioName": portfolio_name,
            "portfolioNumber": extract::truncate_chars(number, PORTFOLIO_NUMBER_MAX_CHARS),
            "description": description,
        });

        info!(portfolio_name, exposure_id, "creating portfolio");
        let portfolio_id = self
            .client
            .request(
                HttpMethod::Post,
                &endpoints::portfolios(exposure_id),
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "portfolio creation"))
            .map_err(|error| {
                error.context(format!(
                    "Failed to create portfolio '{portfolio_name}' in exposure id '{exposure_id}'"
                ))
            })?;
        info!(portfolio_id, "portfolio created");
        Ok((portfolio_id, body))
    }

    pub async fn create_portfolios(&self, portfolios: &[PortfolioSpec]) -> Result<Vec<i64>> {
        validators::non_empty_list(portfolios, "portfolio_data_list")?;
        let mut ids = Vec::with_capacity(portfolios.len());
        for spec in portfolios {
            let (id, _) = self
                .create_portfolio(
                    &spec.edm_name,
                    &spec.portfolio_name,
                    &spec.portfolio_number,
                    &spec.description,
                )
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Submit a GeoHaz job for a portfolio that has at least one location.
    pub async fn submit_geohaz_job(&self, request: &GeohazRequest) -> Result<(i64, Value)> {
        let portfolio_name = request.portfolio_name.as_str();
        validators::non_empty_str(portfolio_name, "portfolio_name")?;
        validators::non_empty_str(&request.edm_name, "edm_name")?;

        let exposure_id = self.edms().exposure_id_by_name(&request.edm_name).await?;
        let portfolio = self.find_portfolio(exposure_id, portfolio_name).await?;
        let context = format!("portfolio '{portfolio_name}'");
        let portfolio_uri = extract::require_str(&portfolio, "uri", &context)?.to_owned();
        let portfolio_id = extract::require_i64(&portfolio, "portfolioId", &context)?;

        let accounts = self
            .search_accounts_by_portfolio(exposure_id, portfolio_id)
            .await?;
        if accounts.is_empty() {
            return Err(IrpError::api(format!(
                "Portfolio '{portfolio_name}' does not have any Accounts/Locations to be GeoHaz'd"
            )));
        }
        let mut has_locations = false;
        for account in &accounts {
            if extract::require_i64(account, "locationsCount", &context)? > 0 {
                has_locations = true;
                break;
            }
        }
        if !has_locations {
            return Err(IrpError::api(format!(
                "Portfolio '{portfolio_name}' has accounts but no locations to be GeoHaz'd"
            )));
        }

        let body = request.body(&portfolio_uri);
        info!(portfolio_name, "submitting GeoHaz job");
        let job_id = self
            .client
            .request(
                HttpMethod::Post,
                endpoints::GEOHAZ_JOBS,
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "portfolio geohaz"))
            .map_err(|error| {
                error.context(format!(
                    "Failed to execute geohaz for portfolio '{portfolio_uri}'"
                ))
            })?;
        info!(job_id, "GeoHaz job submitted");
        Ok((job_id, body))
    }

    pub async fn submit_geohaz_jobs(&self, requests: &[GeohazRequest]) -> Result<Vec<i64>> {
        validators::non_empty_list(requests, "geohaz_data_list")?;
        let mut job_ids = Vec::with_capacity(requests.len());
        for request in requests {
            let (job_id, _) = self.submit_geohaz_job(request).await?;
            job_ids.push(job_id);
        }
        Ok(job_ids)
    }

    pub async fn get_geohaz_job(&self, job_id: i64) -> Result<Value> {
        JobKind::GEOHAZ.get(&self.client, job_id).await
    }

    pub async fn poll_geohaz_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        JobKind::GEOHAZ.poll(&self.client, job_id, config).await
    }

    pub async fn poll_geohaz_job_batch_to_completion(
        &self,
        job_ids: &[i64],
        config: &PollConfig,
    ) -> Result<Vec<Value>> {
        JobKind::GEOHAZ
            .poll_batch(&self.client, job_ids, config)
            .await
    }
}
