//! Portfolio analyses, analysis groups and their loss results.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{Client, RequestOptions};
use crate::constants::{endpoints, PERSPECTIVE_CODES};
use crate::edm::EdmManager;
use crate::error::{IrpError, Result};
use crate::extract::{self, id_from_location, quoted_list};
use crate::http_client::HttpMethod;
use crate::job::JobKind;
use crate::polling::PollConfig;
use crate::portfolio::PortfolioManager;
use crate::reference_data::{AnalysisCurrency, ReferenceDataManager};
use crate::treaty::TreatyManager;
use crate::validators;

const DEFAULT_PLT_LIMIT: u32 = 100_000;

fn default_min_loss_threshold() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_num_max_loss_event() -> i64 {
    1
}

/// One portfolio analysis. Profile and scheme fields are display names
/// resolved through reference data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalysisRequest {
    pub edm_name: String,
    pub portfolio_name: String,
    pub job_name: String,
    pub analysis_profile_name: String,
    pub output_profile_name: String,
    /// Required for DLM profiles, optional for HD.
    #[serde(default)]
    pub event_rate_scheme_name: Option<String>,
    #[serde(default)]
    pub treaty_names: Vec<String>,
    #[serde(default)]
    pub tag_names: Vec<String>,
    /// Looked up from the latest currency scheme vintage when unset.
    #[serde(skip)]
    pub currency: Option<AnalysisCurrency>,
    #[serde(default)]
    pub franchise_deductible: bool,
    #[serde(default = "default_min_loss_threshold")]
    pub min_loss_threshold: f64,
    #[serde(default = "default_true")]
    pub treat_construction_occupancy_as_unknown: bool,
    #[serde(default = "default_num_max_loss_event")]
    pub num_max_loss_event: i64,
}

impl AnalysisRequest {
    pub fn new(
        edm_name: impl Into<String>,
        portfolio_name: impl Into<String>,
        job_name: impl Into<String>,
        analysis_profile_name: impl Into<String>,
        output_profile_name: impl Into<String>,
    ) -> Self {
        Self {
            edm_name: edm_name.into(),
            portfolio_name: portfolio_name.into(),
            job_name: job_name.into(),
            analysis_profile_name: analysis_profile_name.into(),
            output_profile_name: output_profile_name.into(),
            event_rate_scheme_name: None,
            treaty_names: Vec::new(),
            tag_names: Vec::new(),
            currency: None,
            franchise_deductible: false,
            min_loss_threshold: default_min_loss_threshold(),
            treat_construction_occupancy_as_unknown: true,
            num_max_loss_event: default_num_max_loss_event(),
        }
    }

    pub fn with_event_rate_scheme(mut self, name: impl Into<String>) -> Self {
        self.event_rate_scheme_name = Some(name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        validators::non_empty_str(&self.edm_name, "edm_name")?;
        validators::non_empty_str(&self.portfolio_name, "portfolio_name")?;
        validators::non_empty_str(&self.job_name, "job_name")?;
        validators::non_empty_str(&self.analysis_profile_name, "analysis_profile_name")?;
        validators::non_empty_str(&self.output_profile_name, "output_profile_name")?;
        Ok(())
    }
}

/// How grouping members are looked up by name.
///
/// Analysis names are unique only within an EDM, so names found in
/// `analysis_edm_map` are searched together with their EDM. Names in
/// `group_names` are searched as groups, by name alone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemberLookup {
    #[serde(default)]
    pub analysis_edm_map: HashMap<String, String>,
    #[serde(default)]
    pub group_names: HashSet<String>,
    /// Skip members that do not exist instead of failing.
    #[serde(default = "default_true")]
    pub skip_missing: bool,
}

impl Default for MemberLookup {
    fn default() -> Self {
        Self {
            analysis_edm_map: HashMap::new(),
            group_names: HashSet::new(),
            skip_missing: true,
        }
    }
}

/// Region/peril entry of a grouping request's `regionPerilSimulationSet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionPerilEntry {
    /// Comma-separated when merged, highest version first (`RL23,RL22`).
    pub engine_version: String,
    /// Always 0 for PLT regions.
    pub event_rate_scheme_id: i64,
    pub model_region_code: String,
    pub model_version: String,
    pub peril_code: String,
    pub region_code: String,
    pub simulation_periods: i64,
    /// Simulation set id for ELT regions, PET id for PLT regions.
    pub simulation_set_id: i64,
}

impl RegionPerilEntry {
    /// Equal in everything but the engine version.
    fn same_simulation(&self, other: &Self) -> bool {
        self.event_rate_scheme_id == other.event_rate_scheme_id
            && self.model_region_code == other.model_region_code
            && self.model_version == other.model_version
            && self.peril_code == other.peril_code
            && self.region_code == other.region_code
            && self.simulation_periods == other.simulation_periods
            && self.simulation_set_id == other.simulation_set_id
    }
}

/// An analysis group built from analyses and other groups.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingRequest {
    pub group_name: String,
    /// Analysis and group names to include.
    pub analysis_names: Vec<String>,
    /// Forced on when the region/peril simulation set is non-empty.
    pub simulate_to_plt: bool,
    pub num_simulations: i64,
    pub propagate_detailed_losses: bool,
    pub reporting_window_start: String,
    pub simulation_window_start: String,
    pub simulation_window_end: String,
    /// Built from the members' regions when unset.
    pub region_peril_simulation_set: Option<Vec<RegionPerilEntry>>,
    pub description: String,
    pub currency: Option<AnalysisCurrency>,
    pub lookup: MemberLookup,
}

impl GroupingRequest {
    pub fn new(group_name: impl Into<String>, analysis_names: Vec<String>) -> Self {
        Self {
            group_name: group_name.into(),
            analysis_names,
            simulate_to_plt: false,
            num_simulations: 50_000,
            propagate_detailed_losses: false,
            reporting_window_start: String::from("01/01/2021"),
            simulation_window_start: String::from("01/01/2021"),
            simulation_window_end: String::from("12/31/2021"),
            region_peril_simulation_set: None,
            description: String::new(),
            currency: None,
            lookup: MemberLookup::default(),
        }
    }

    pub fn with_lookup(mut self, lookup: MemberLookup) -> Self {
        self.lookup = lookup;
        self
    }
}

/// Group name and members, as read from a batch definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupingSpec {
    pub group_name: String,
    pub analysis_names: Vec<String>,
}

/// Result of submitting a job over named analyses and groups.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted {
        job_id: i64,
        included_items: Vec<String>,
        skipped_items: Vec<String>,
        body: Value,
    },
    /// No member could be found, so nothing was submitted.
    Skipped {
        skipped_items: Vec<String>,
        reason: String,
    },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> Option<i64> {
        match self {
            Self::Submitted { job_id, .. } => Some(*job_id),
            Self::Skipped { .. } => None,
        }
    }

    pub fn skipped_items(&self) -> &[String] {
        match self {
            Self::Submitted { skipped_items, .. } | Self::Skipped { skipped_items, .. } => {
                skipped_items
            }
        }
    }
}

/// Optional filter and paging for ELT and PLT requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultQuery {
    /// e.g. `eventId IN (1, 2, 3)`.
    pub filter: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Summary of an analysis found by its application id.
#[derive(Debug, Clone, PartialEq)]
pub struct AppAnalysis {
    pub analysis_id: Option<i64>,
    pub exposure_resource_id: Option<i64>,
    pub analysis_name: Option<String>,
    /// `HD` or `DLM`.
    pub engine_type: Option<String>,
    pub raw: Value,
}

/// Event rate scheme recorded in an analysis' `additionalProperties`.
///
/// Plain analyses carry it under `eventRateSchemeId` as `properties[0].id`,
/// groups under `eventRateSchemes` as `properties[0].value.eventRateSchemeId`.
fn event_rate_scheme_of(analysis: &Value) -> Option<i64> {
    let is_group = analysis
        .get("isGroup")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let key = if is_group {
        "eventRateSchemes"
    } else {
        "eventRateSchemeId"
    };
    let property = analysis
        .get("additionalProperties")?
        .as_array()?
        .iter()
        .find(|property| property.get("key").and_then(Value::as_str) == Some(key))?;
    let first = property.get("properties")?.as_array()?.first()?;
    if is_group {
        extract::require_i64(first.get("value")?, "eventRateSchemeId", "analysis").ok()
    } else {
        extract::require_i64(first, "id", "analysis").ok()
    }
}

/// PET model region codes are `{region}{peril}` with a two-letter peril,
/// e.g. `NAWF`.
fn split_model_region_code(code: &str) -> Option<(&str, &str)> {
    let split = code.char_indices().rev().nth(1)?.0;
    Some(code.split_at(split))
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    extract::require_i64(value, key, "").ok()
}

/// Join entries that differ only in engine version.
fn merge_engine_versions(entries: Vec<RegionPerilEntry>) -> Vec<RegionPerilEntry> {
    let mut merged: Vec<RegionPerilEntry> = Vec::new();
    for entry in entries {
        let existing = merged
            .iter_mut()
            .find(|candidate| candidate.same_simulation(&entry));
        match existing {
            Some(existing) => {
                let mut versions: BTreeSet<&str> = existing.engine_version.split(',').collect();
                versions.insert(&entry.engine_version);
                existing.engine_version = versions.into_iter().rev().collect::<Vec<_>>().join(",");
            }
            None => merged.push(entry),
        }
    }
    merged
}

/// Region returned by the results endpoint, with the owning analysis' codes.
struct MemberRegion {
    region: Value,
    peril_code: String,
    region_code: String,
    event_rate_scheme_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AnalysisManager {
    client: Client,
}

impl AnalysisManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn reference_data(&self) -> ReferenceDataManager {
        ReferenceDataManager::new(self.client.clone())
    }

    pub async fn get_analysis_by_id(&self, analysis_id: i64) -> Result<Value> {
        validators::positive(analysis_id, "analysis_id")?;
        self.client
            .get_json(&endpoints::analysis(analysis_id), RequestOptions::new())
            .await
            .map_err(|error| error.context(format!("Failed to get analysis {analysis_id}")))
    }

    pub async fn search_analyses(&self, filter: &str, limit: u32, offset: u32) -> Result<Vec<Value>> {
        self.client
            .get_json(
                endpoints::ANALYSES,
                RequestOptions::new().page(limit, offset).filter(filter),
            )
            .await
            .map(extract::into_list)
            .map_err(|error| error.context("Failed to search analysis results"))
    }

    pub async fn search_analyses_paginated(&self, filter: &str) -> Result<Vec<Value>> {
        self.client
            .get_all_pages(endpoints::ANALYSES, filter)
            .await
            .map_err(|error| error.context("Failed to search analysis results"))
    }

    /// The analysis called `analysis_name` in the EDM called `edm_name`.
    pub async fn get_analysis_by_name(&self, analysis_name: &str, edm_name: &str) -> Result<Value> {
        validators::non_empty_str(analysis_name, "analysis_name")?;
        validators::non_empty_str(edm_name, "edm_name")?;
        let filter = format!("analysisName = \"{analysis_name}\" AND exposureName = \"{edm_name}\"");
        let mut analyses = self.search_analyses(&filter, 100, 0).await?;
        match analyses.len() {
            0 => Err(IrpError::api(format!(
                "Analysis '{analysis_name}' not found for EDM '{edm_name}'"
            ))),
            1 => Ok(analyses.remove(0)),
            _ => Err(IrpError::api(format!(
                "Multiple analyses found with name '{analysis_name}' for EDM '{edm_name}'"
            ))),
        }
    }

    pub async fn delete_analysis(&self, analysis_id: i64) -> Result<()> {
        validators::positive(analysis_id, "analysis_id")?;
        self.client
            .request(
                HttpMethod::Delete,
                &endpoints::analysis(analysis_id),
                RequestOptions::new(),
            )
            .await
            .map_err(|error| error.context("Failed to delete analysis"))?;
        info!(analysis_id, "analysis deleted");
        Ok(())
    }

    /// Look up an analysis by the id shown in the application UI.
    pub async fn get_analysis_by_app_analysis_id(&self, app_analysis_id: i64) -> Result<AppAnalysis> {
        validators::positive(app_analysis_id, "app_analysis_id")?;
        let results = self
            .search_analyses(&format!("appAnalysisId={app_analysis_id}"), 100, 0)
            .await?;
        let raw = results.into_iter().next().ok_or_else(|| {
            IrpError::api(format!(
                "No analysis found with appAnalysisId={app_analysis_id}"
            ))
        })?;
        Ok(AppAnalysis {
            analysis_id: int_field(&raw, "analysisId"),
            exposure_resource_id: int_field(&raw, "exposureResourceId"),
            analysis_name: raw.get("analysisName").and_then(Value::as_str).map(str::to_owned),
            engine_type: raw.get("engineType").and_then(Value::as_str).map(str::to_owned),
            raw,
        })
    }

    /// Submit one portfolio analysis; fails if an analysis with the same
    /// name already exists in the EDM. Returns the job id and request body.
    pub async fn submit_portfolio_analysis_job(
        &self,
        request: &AnalysisRequest,
    ) -> Result<(i64, Value)> {
        request.validate()?;
        let filter = format!(
            "analysisName = \"{}\" AND exposureName = \"{}\"",
            request.job_name, request.edm_name
        );
        if !self.search_analyses(&filter, 100, 0).await?.is_empty() {
            return Err(IrpError::api(format!(
                "Analysis with name '{}' already exists for EDM '{}'",
                request.job_name, request.edm_name
            )));
        }
        self.submit_analysis(request).await
    }

    /// Submit several analyses after checking none of their names is taken.
    pub async fn submit_portfolio_analysis_jobs(
        &self,
        requests: &[AnalysisRequest],
    ) -> Result<Vec<i64>> {
        validators::non_empty_list(requests, "analysis_data_list")?;
        for request in requests {
            let filter = format!("analysisName = \"{}\"", request.job_name);
            if !self.search_analyses(&filter, 100, 0).await?.is_empty() {
                return Err(IrpError::api(format!(
                    "Analysis with this name already exists: {}",
                    request.job_name
                )));
            }
        }

        let mut job_ids = Vec::with_capacity(requests.len());
        for request in requests {
            request.validate()?;
            let (job_id, _) = self.submit_analysis(request).await?;
            job_ids.push(job_id);
        }
        Ok(job_ids)
    }

    async fn submit_analysis(&self, request: &AnalysisRequest) -> Result<(i64, Value)> {
        let edm_name = request.edm_name.as_str();
        let portfolio_name = request.portfolio_name.as_str();
        info!(job_name = %request.job_name, edm_name, portfolio_name, "submitting analysis job");

        let exposure_id = EdmManager::new(self.client.clone())
            .exposure_id_by_name(edm_name)
            .await?;
        let portfolio = PortfolioManager::new(self.client.clone())
            .find_portfolio(exposure_id, portfolio_name)
            .await?;
        let portfolio_uri = extract::require_str(&portfolio, "uri", "portfolio search response")
            .map_err(|error| {
                error.context(format!(
                    "Failed to extract portfolio URI for portfolio '{portfolio_name}'"
                ))
            })?;

        let treaty_ids = self.treaty_ids(exposure_id, &request.treaty_names).await?;

        let reference = self.reference_data();
        let profile_name = request.analysis_profile_name.as_str();
        let model_profiles = reference.get_model_profile_by_name(profile_name).await?;
        let output_profiles = reference
            .get_output_profile_by_name(&request.output_profile_name)
            .await?;
        if model_profiles.get("count").and_then(Value::as_i64).unwrap_or(0) == 0 {
            return Err(IrpError::reference_data(format!(
                "Analysis profile '{profile_name}' not found"
            )));
        }
        let Some(output_profile) = output_profiles.first() else {
            return Err(IrpError::reference_data(format!(
                "Output profile '{}' not found",
                request.output_profile_name
            )));
        };

        let model_profile = extract::list_at(&model_profiles, "items")
            .into_iter()
            .next()
            .unwrap_or(Value::Null);
        let profile_context = format!("model profile '{profile_name}'");
        let model_profile_id = extract::require_i64(&model_profile, "id", &profile_context)
            .map_err(IrpError::into_reference_data)?;
        let software_version =
            extract::require_str(&model_profile, "softwareVersionCode", &profile_context)
                .map_err(IrpError::into_reference_data)?;
        let job_type = if software_version.contains("HD") {
            "HD"
        } else {
            "DLM"
        };
        let output_profile_id = extract::require_i64(
            output_profile,
            "id",
            &format!("output profile '{}'", request.output_profile_name),
        )
        .map_err(IrpError::into_reference_data)?;

        let peril_code = model_profile.get("perilCode").and_then(Value::as_str);
        let model_region_code = model_profile.get("modelRegionCode").and_then(Value::as_str);
        let event_rate_scheme_id = match request.event_rate_scheme_name.as_deref() {
            Some(scheme_name) if !scheme_name.is_empty() => {
                let schemes = reference
                    .get_event_rate_scheme_by_name(scheme_name, peril_code, model_region_code)
                    .await?;
                if schemes.get("count").and_then(Value::as_i64).unwrap_or(0) == 0 {
                    let codes = if peril_code.is_some() || model_region_code.is_some() {
                        format!(
                            " (perilCode={}, modelRegionCode={})",
                            peril_code.unwrap_or("None"),
                            model_region_code.unwrap_or("None")
                        )
                    } else {
                        String::new()
                    };
                    return Err(IrpError::reference_data(format!(
                        "Event rate scheme '{scheme_name}'{codes} not found"
                    )));
                }
                let scheme = extract::list_at(&schemes, "items")
                    .into_iter()
                    .next()
                    .unwrap_or(Value::Null);
                Some(
                    extract::require_i64(
                        &scheme,
                        "eventRateSchemeId",
                        &format!("event rate scheme '{scheme_name}'"),
                    )
                    .map_err(IrpError::into_reference_data)?,
                )
            }
            _ if job_type == "DLM" => {
                return Err(IrpError::reference_data(
                    "Event rate scheme is required for DLM analyses",
                ))
            }
            _ => None,
        };

        let tag_ids = if request.tag_names.is_empty() {
            Vec::new()
        } else {
            reference
                .get_tag_ids_from_tag_names(&request.tag_names)
                .await
                .map_err(|error| {
                    error.context(format!(
                        "Failed to get tag ids for tag names {:?}",
                        request.tag_names
                    ))
                })?
        };

        let currency = match &request.currency {
            Some(currency) => currency.clone(),
            None => reference.get_analysis_currency().await?,
        };

        let mut settings = json!({
            "name": request.job_name,
            "modelProfileId": model_profile_id,
            "outputProfileId": output_profile_id,
            "treatyIds": treaty_ids,
            "tagIds": tag_ids,
            "currency": currency.to_json(),
            "franchiseDeductible": request.franchise_deductible,
            "minLossThreshold": request.min_loss_threshold,
            "treatConstructionOccupancyAsUnknown": request.treat_construction_occupancy_as_unknown,
            "numMaxLossEvent": request.num_max_loss_event,
        });
        if let (Some(id), Some(settings)) = (event_rate_scheme_id, settings.as_object_mut()) {
            settings.insert(String::from("eventRateSchemeId"), json!(id));
        }
        let body = json!({
            "resourceUri": portfolio_uri,
            "resourceType": "portfolio",
            "type": job_type,
            "settings": settings,
        });

        let job_id = self
            .client
            .request(
                HttpMethod::Post,
                endpoints::ANALYSIS_JOBS,
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "analysis job submission"))
            .map_err(|error| {
                error.context(format!(
                    "Failed to submit analysis job '{}' for portfolio {portfolio_name}",
                    request.job_name
                ))
            })?;
        info!(job_id, "analysis job submitted");
        Ok((job_id, body))
    }

    async fn treaty_ids(&self, exposure_id: i64, treaty_names: &[String]) -> Result<Vec<i64>> {
        if treaty_names.is_empty() {
            return Ok(Vec::new());
        }
        let filter = format!("treatyName IN ({})", quoted_list(treaty_names));
        let treaties = TreatyManager::new(self.client.clone())
            .search_treaties(exposure_id, &filter, 100, 0)
            .await
            .map_err(|error| {
                error.context(format!("Failed to search treaties with names {treaty_names:?}"))
            })?;
        if treaties.len() != treaty_names.len() {
            return Err(IrpError::api(format!(
                "Expected {} treaties, found {}",
                treaty_names.len(),
                treaties.len()
            )));
        }
        treaties
            .iter()
            .map(|treaty| extract::require_i64(treaty, "treatyId", "treaty search response"))
            .collect()
    }

    pub async fn get_analysis_job(&self, job_id: i64) -> Result<Value> {
        JobKind::ANALYSIS.get(&self.client, job_id).await
    }

    pub async fn search_analysis_jobs(
        &self,
        filter: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>> {
        JobKind::ANALYSIS
            .search(&self.client, filter, limit, offset)
            .await
    }

    pub async fn poll_analysis_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        info!(job_id, "polling analysis job");
        JobKind::ANALYSIS.poll(&self.client, job_id, config).await
    }

    pub async fn poll_analysis_job_batch_to_completion(
        &self,
        job_ids: &[i64],
        config: &PollConfig,
    ) -> Result<Vec<Value>> {
        JobKind::ANALYSIS
            .poll_batch(&self.client, job_ids, config)
            .await
    }

    pub async fn get_analysis_grouping_job(&self, job_id: i64) -> Result<Value> {
        JobKind::GROUPING.get(&self.client, job_id).await
    }

    pub async fn poll_analysis_grouping_job_to_completion(
        &self,
        job_id: i64,
        config: &PollConfig,
    ) -> Result<Value> {
        info!(job_id, "polling analysis grouping job");
        JobKind::GROUPING.poll(&self.client, job_id, config).await
    }

    pub async fn poll_analysis_grouping_job_batch_to_completion(
        &self,
        job_ids: &[i64],
        config: &PollConfig,
    ) -> Result<Vec<Value>> {
        JobKind::GROUPING
            .poll_batch(&self.client, job_ids, config)
            .await
    }

    /// Resolve one member to its search result, or `None` when it is
    /// missing and missing members are skipped. `group_clause` narrows the
    /// search for names listed as groups.
    pub(crate) async fn find_member(
        &self,
        name: &str,
        lookup: &MemberLookup,
        group_clause: &str,
    ) -> Result<Option<Value>> {
        let (filter, missing, duplicate) = if lookup.group_names.contains(name) {
            (
                format!("analysisName = \"{name}\"{group_clause}"),
                format!("Group with this name does not exist: {name}"),
                format!("Duplicate groups exist with name: {name}"),
            )
        } else if let Some(edm_name) = lookup.analysis_edm_map.get(name) {
            (
                format!("analysisName = \"{name}\" AND exposureName = \"{edm_name}\""),
                format!("Analysis '{name}' not found for EDM '{edm_name}'"),
                format!("Multiple analyses found with name '{name}' for EDM '{edm_name}'"),
            )
        } else {
            (
                format!("analysisName = \"{name}\""),
                format!("Analysis with this name does not exist: {name}"),
                format!("Duplicate analyses exist with name: {name}."),
            )
        };

        let mut found = self.search_analyses(&filter, 100, 0).await?;
        match found.len() {
            0 if lookup.skip_missing => Ok(None),
            0 => Err(IrpError::api(missing)),
            1 => Ok(Some(found.remove(0))),
            _ => Err(IrpError::api(duplicate)),
        }
    }

    /// Submit an analysis group over existing analyses and groups.
    pub async fn submit_analysis_grouping_job(
        &self,
        request: &GroupingRequest,
    ) -> Result<SubmitOutcome> {
        let group_name = request.group_name.as_str();
        validators::non_empty_str(group_name, "group_name")?;
        validators::non_empty_list(&request.analysis_names, "analysis_names")?;
        info!(
            group_name,
            count = request.analysis_names.len(),
            "submitting analysis grouping job"
        );

        let existing = self
            .search_analyses(&format!("analysisName = \"{group_name}\""), 100, 0)
            .await?;
        if !existing.is_empty() {
            return Err(IrpError::api(format!(
                "Analysis Group with this name already exists: {group_name}"
            )));
        }

        let mut uris = Vec::new();
        let mut analysis_ids = Vec::new();
        let mut included_items = Vec::new();
        let mut skipped_items = Vec::new();
        for name in &request.analysis_names {
            let Some(member) = self.find_member(name, &request.lookup, "").await? else {
                debug!(name = %name, "grouping member not found, skipping");
                skipped_items.push(name.clone());
                continue;
            };
            let context = format!("search result for '{name}'");
            uris.push(extract::require(&member, "uri", &context)?.clone());
            analysis_ids.push(extract::require_i64(&member, "analysisId", &context)?);
            included_items.push(name.clone());
        }

        if uris.is_empty() {
            return Ok(SubmitOutcome::Skipped {
                reason: format!(
                    "All {} analyses/groups were not found",
                    skipped_items.len()
                ),
                skipped_items,
            });
        }

        let currency = match &request.currency {
            Some(currency) => currency.clone(),
            None => self.reference_data().get_analysis_currency().await?,
        };
        let simulation_set = match &request.region_peril_simulation_set {
            Some(set) => set.clone(),
            None => self.build_region_peril_simulation_set(&analysis_ids).await?,
        };
        let simulate_to_plt = request.simulate_to_plt || !simulation_set.is_empty();

        let body = json!({
            "resourceType": "analyses",
            "resourceUris": uris,
            "settings": {
                "analysisName": group_name,
                "currency": currency.to_json(),
                "simulateToPLT": simulate_to_plt,
                "propagateDetailedLosses": request.propagate_detailed_losses,
                "numOfSimulations": request.num_simulations,
                "reportingWindowStart": request.reporting_window_start,
                "simulationWindowStart": request.simulation_window_start,
                "simulationWindowEnd": request.simulation_window_end,
                "regionPerilSimulationSet": simulation_set,
                "description": request.description,
            },
        });

        let job_id = self
            .client
            .request(
                HttpMethod::Post,
                endpoints::GROUPING_JOBS,
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "analysis group creation"))
            .map_err(|error| {
                error.context(format!(
                    "Failed to submit analysis group job '{group_name}'"
                ))
            })?;
        info!(job_id, "analysis grouping job submitted");
        Ok(SubmitOutcome::Submitted {
            job_id,
            included_items,
            skipped_items,
            body,
        })
    }

    /// Submit several groups; skipped groups contribute no job id.
    pub async fn submit_analysis_grouping_jobs(
        &self,
        groups: &[GroupingSpec],
        lookup: &MemberLookup,
    ) -> Result<Vec<i64>> {
        validators::non_empty_list(groups, "grouping_data_list")?;
        let mut job_ids = Vec::new();
        for group in groups {
            let request = GroupingRequest::new(group.group_name.clone(), group.analysis_names.clone())
                .with_lookup(lookup.clone());
            if let Some(job_id) = self.submit_analysis_grouping_job(&request).await?.job_id() {
                job_ids.push(job_id);
            }
        }
        Ok(job_ids)
    }

    /// Build the `regionPerilSimulationSet` for a group over `analysis_ids`.
    ///
    /// The set is only needed when a member is PLT based or when one
    /// peril/region pair carries more than one event rate scheme; otherwise
    /// the platform resolves it and the result is empty. ELT regions take
    /// their simulation set from the event rate scheme, PLT regions use the
    /// PET id with an event rate scheme of 0.
    pub async fn build_region_peril_simulation_set(
        &self,
        analysis_ids: &[i64],
    ) -> Result<Vec<RegionPerilEntry>> {
        validators::non_empty_list(analysis_ids, "analysis_ids")?;

        let mut regions = Vec::new();
        let mut has_plt = false;
        let mut schemes: HashMap<(String, String), BTreeSet<i64>> = HashMap::new();
        for &analysis_id in analysis_ids {
            let found = match self
                .search_analyses(&format!("analysisId={analysis_id}"), 100, 0)
                .await
            {
                Ok(found) => found,
                Err(error) => {
                    debug!(analysis_id, %error, "analysis lookup failed, skipping");
                    continue;
                }
            };
            let Some(info) = found.first() else {
                continue;
            };
            let peril_code = str_field(info, "perilCode");
            let region_code = str_field(info, "regionCode");
            if info.get("analysisFramework").and_then(Value::as_str) == Some("PLT") {
                has_plt = true;
            }

            let event_rate_scheme_id = match self.get_analysis_by_id(analysis_id).await {
                Ok(analysis) => event_rate_scheme_of(&analysis),
                Err(_) => None,
            };
            if let Some(id) = event_rate_scheme_id {
                schemes
                    .entry((peril_code.clone(), region_code.clone()))
                    .or_default()
                    .insert(id);
            }

            let member_regions = match self.get_regions(analysis_id).await {
                Ok(member_regions) => member_regions,
                Err(error) => {
                    debug!(analysis_id, %error, "analysis has no regions, skipping");
                    continue;
                }
            };
            for region in member_regions {
                if region.get("framework").and_then(Value::as_str) == Some("PLT") {
                    has_plt = true;
                }
                regions.push(MemberRegion {
                    region,
                    peril_code: peril_code.clone(),
                    region_code: region_code.clone(),
                    event_rate_scheme_id,
                });
            }
        }

        let ambiguous = schemes.values().any(|ids| ids.len() > 1);
        if regions.is_empty() || !(has_plt || ambiguous) {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for member in &regions {
            let entry = self.region_entry(member).await;
            let framework = member.region.get("framework").and_then(Value::as_str).unwrap_or("ELT");
            let pet_id = if framework == "PLT" {
                int_field(&member.region, "petId").unwrap_or(0)
            } else {
                0
            };
            let key = (
                entry.engine_version.clone(),
                entry.model_region_code.clone(),
                entry.peril_code.clone(),
                entry.region_code.clone(),
                framework == "PLT",
                pet_id,
            );
            if !seen.insert(key) {
                continue;
            }
            let model_version = self
                .model_version(&entry.engine_version, &entry.region_code, &entry.peril_code)
                .await;
            entries.push(RegionPerilEntry {
                model_version,
                ..entry
            });
        }
        Ok(merge_engine_versions(entries))
    }

    /// Entry for one member region, without the model version.
    async fn region_entry(&self, member: &MemberRegion) -> RegionPerilEntry {
        let region = &member.region;
        let engine_version = str_field(region, "engineVersion");
        let sub_region = str_field(region, "subRegion");
        let reference = self.reference_data();

        if region.get("framework").and_then(Value::as_str) == Some("PLT") {
            let pet_id = int_field(region, "petId").unwrap_or(0);
            // Analysis-level codes can be generic (`YY`), so prefer the PET's.
            let pet_codes = match reference.get_pet_metadata_by_id(pet_id).await {
                Ok(pet) => {
                    let code = str_field(&pet, "modelRegionCode");
                    split_model_region_code(&code)
                        .map(|(region, peril)| (region.to_owned(), peril.to_owned()))
                        .or_else(|| Some((String::new(), String::new())))
                }
                Err(_) => None,
            };
            let (region_code, peril_code) = pet_codes
                .unwrap_or_else(|| (member.region_code.clone(), member.peril_code.clone()));
            return RegionPerilEntry {
                engine_version,
                event_rate_scheme_id: 0,
                model_region_code: format!("{sub_region}{peril_code}"),
                model_version: String::new(),
                peril_code,
                region_code,
                simulation_periods: int_field(region, "periods").unwrap_or(0),
                simulation_set_id: pet_id,
            };
        }

        let rate_scheme_id = int_field(region, "rateSchemeId");
        let scheme_id = rate_scheme_id
            .filter(|id| *id > 0)
            .or(member.event_rate_scheme_id.filter(|id| *id > 0));
        let simulation_set = match scheme_id {
            Some(id) => reference.get_simulation_set_by_event_rate_scheme_id(id).await,
            None => {
                reference
                    .get_simulation_set_by_region_peril_and_engine(
                        &member.region_code,
                        &member.peril_code,
                        &engine_version,
                    )
                    .await
            }
        };
        let (event_rate_scheme_id, simulation_set_id, periods) = match simulation_set {
            Ok(set) => (
                int_field(&set, "eventRateSchemeId").unwrap_or(0),
                int_field(&set, "id").unwrap_or(0),
                int_field(&set, "defaultPeriods").unwrap_or(0),
            ),
            Err(error) => {
                debug!(%error, "simulation set lookup failed");
                (rate_scheme_id.unwrap_or(0), 0, 0)
            }
        };
        RegionPerilEntry {
            engine_version,
            event_rate_scheme_id,
            model_region_code: format!("{sub_region}{}", member.peril_code),
            model_version: String::new(),
            peril_code: member.peril_code.clone(),
            region_code: member.region_code.clone(),
            simulation_periods: periods,
            simulation_set_id,
        }
    }

    /// Model version for an engine, narrowed by region and peril when a
    /// mapping exists; otherwise the digits of the engine version.
    async fn model_version(&self, engine_version: &str, region_code: &str, peril_code: &str) -> String {
        let reference = self.reference_data();
        if let Ok(version) = reference
            .get_model_version_by_engine_region_peril(engine_version, region_code, peril_code)
            .await
        {
            return version;
        }
        if let Ok(version) = reference.get_model_version_by_engine_version(engine_version).await {
            return version;
        }
        engine_version.replace("HDv", "").replace("RL", "")
    }

    fn results_options(perspective_code: &str, exposure_resource_id: i64) -> Result<RequestOptions> {
        validators::one_of(perspective_code, PERSPECTIVE_CODES, "perspective_code")?;
        Ok(RequestOptions::new()
            .query("perspectiveCode", perspective_code)
            .query("exposureResourceType", "PORTFOLIO")
            .query("exposureResourceId", exposure_resource_id))
    }

    async fn get_results(
        &self,
        analysis_id: i64,
        resource: &str,
        options: RequestOptions,
        what: &str,
    ) -> Result<Vec<Value>> {
        self.client
            .get_json(&endpoints::analysis_results(analysis_id, resource), options)
            .await
            .map(extract::into_list)
            .map_err(|error| {
                error.context(format!("Failed to get {what} for analysis {analysis_id}"))
            })
    }

    /// Event loss table.
    pub async fn get_elt(
        &self,
        analysis_id: i64,
        perspective_code: &str,
        exposure_resource_id: i64,
        query: &ResultQuery,
    ) -> Result<Vec<Value>> {
        validators::positive(analysis_id, "analysis_id")?;
        let mut options = Self::results_options(perspective_code, exposure_resource_id)?;
        if let Some(filter) = &query.filter {
            options = options.query("filter", filter);
        }
        if let Some(limit) = query.limit {
            options = options.query("limit", limit);
        }
        if let Some(offset) = query.offset {
            options = options.query("offset", offset);
        }
        self.get_results(analysis_id, "elt", options, "ELT").await
    }

    /// Exceedance probability curves (OEP, AEP, CEP, TCE).
    pub async fn get_ep(
        &self,
        analysis_id: i64,
        perspective_code: &str,
        exposure_resource_id: i64,
    ) -> Result<Vec<Value>> {
        validators::positive(analysis_id, "analysis_id")?;
        let options = Self::results_options(perspective_code, exposure_resource_id)?;
        self.get_results(analysis_id, "ep", options, "EP metrics").await
    }

    pub async fn get_stats(
        &self,
        analysis_id: i64,
        perspective_code: &str,
        exposure_resource_id: i64,
    ) -> Result<Vec<Value>> {
        validators::positive(analysis_id, "analysis_id")?;
        let options = Self::results_options(perspective_code, exposure_resource_id)?;
        self.get_results(analysis_id, "stats", options, "statistics")
            .await
    }

    /// Period loss table; HD analyses only. The limit defaults to 100000.
    pub async fn get_plt(
        &self,
        analysis_id: i64,
        perspective_code: &str,
        exposure_resource_id: i64,
        query: &ResultQuery,
    ) -> Result<Vec<Value>> {
        validators::positive(analysis_id, "analysis_id")?;
        let mut options = Self::results_options(perspective_code, exposure_resource_id)?
            .query("limit", query.limit.unwrap_or(DEFAULT_PLT_LIMIT));
        if let Some(filter) = &query.filter {
            options = options.query("filter", filter);
        }
        if let Some(offset) = query.offset {
            options = options.query("offset", offset);
        }
        self.get_results(analysis_id, "plt", options, "PLT").await
    }

    /// Region/peril breakdown of an analysis or group.
    pub async fn get_regions(&self, analysis_id: i64) -> Result<Vec<Value>> {
        validators::positive(analysis_id, "analysis_id")?;
        self.get_results(analysis_id, "regions", RequestOptions::new(), "regions")
            .await
    }
}
