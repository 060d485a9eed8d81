//! Reference data lookups: model and output profiles, event rate schemes,
//! currencies, tags, simulation sets, PET metadata and the software/model
//! version map.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::client::{Client, RequestOptions};
use crate::constants::endpoints;
use crate::error::{IrpError, Result};
use crate::extract::{self, id_from_location};
use crate::http_client::HttpMethod;
use crate::validators;

/// Currency block of an analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisCurrency {
    pub as_of_date: String,
    pub code: String,
    pub scheme: String,
    pub vintage: String,
}

impl AnalysisCurrency {
    /// USD in the scheme and vintage of a currency scheme vintage record.
    pub fn from_vintage(vintage: &Value) -> Result<Self> {
        let context = "currency scheme vintage";
        let effective = extract::require_str(vintage, "effectiveDate", context)?;
        Ok(Self {
            as_of_date: effective.split('T').next().unwrap_or(effective).to_owned(),
            code: String::from("USD"),
            scheme: extract::require_str(vintage, "currencySchemeCode", context)?.to_owned(),
            vintage: extract::require_str(vintage, "vintage", context)?.to_owned(),
        })
    }

    /// Used when the vintage cannot be read from the platform.
    pub fn fallback() -> Self {
        Self {
            as_of_date: String::from("2025-05-28"),
            code: String::from("USD"),
            scheme: String::from("RMS"),
            vintage: String::from("RL25"),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "asOfDate": self.as_of_date,
            "code": self.code,
            "scheme": self.scheme,
            "vintage": self.vintage,
        })
    }
}

/// Event rate scheme `where` clause, narrowed by peril and model region when given.
pub fn event_rate_scheme_where(
    scheme_name: &str,
    peril_code: Option<&str>,
    model_region_code: Option<&str>,
) -> String {
    let mut parts = vec![format!("eventRateSchemeName=\"{scheme_name}\"")];
    if let Some(peril) = peril_code.filter(|code| !code.is_empty()) {
        parts.push(format!("perilCode=\"{peril}\""));
    }
    if let Some(region) = model_region_code.filter(|code| !code.is_empty()) {
        parts.push(format!("modelRegionCode=\"{region}\""));
    }
    parts.join(" AND ")
}

/// `rlVersion` is a comma separated list such as `RL16, RL17, RL18`.
fn rl_versions_contain(simulation_set: &Value, engine_version: &str) -> bool {
    simulation_set
        .get("rlVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .split(',')
        .any(|version| version.trim() == engine_version)
}

#[derive(Debug, Clone)]
pub struct ReferenceDataManager {
    client: Client,
}

impl ReferenceDataManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, path: &str, options: RequestOptions, what: &str) -> Result<Value> {
        self.client
            .get_json(path, options)
            .await
            .map_err(|error| error.context(format!("Failed to get {what}")))
    }

    pub async fn get_model_profiles(&self) -> Result<Value> {
        self.get(endpoints::MODEL_PROFILES, RequestOptions::new(), "model profiles")
            .await
    }

    pub async fn get_model_profile_by_name(&self, profile_name: &str) -> Result<Value> {
        validators::non_empty_str(profile_name, "profile_name")?;
        self.get(
            endpoints::MODEL_PROFILES,
            RequestOptions::new().query("name", profile_name),
            &format!("model profile '{profile_name}'"),
        )
        .await
    }

    pub async fn get_output_profiles(&self) -> Result<Vec<Value>> {
        self.get(endpoints::OUTPUT_PROFILES, RequestOptions::new(), "output profiles")
            .await
            .map(extract::into_list)
    }

    pub async fn get_output_profile_by_name(&self, profile_name: &str) -> Result<Vec<Value>> {
        validators::non_empty_str(profile_name, "profile_name")?;
        self.get(
            endpoints::OUTPUT_PROFILES,
            RequestOptions::new().query("name", profile_name),
            &format!("output profile '{profile_name}'"),
        )
        .await
        .map(extract::into_list)
    }

    /// Active event rate schemes.
    pub async fn get_event_rate_schemes(&self) -> Result<Value> {
        self.get(
            endpoints::EVENT_RATE_SCHEMES,
            RequestOptions::new().query("where", "isActive=True"),
            "event rate schemes",
        )
        .await
    }

    /// Event rate schemes named `scheme_name`. The same name can exist for
    /// several peril/region pairs; pass the codes from the model profile to
    /// pick one.
    pub async fn get_event_rate_scheme_by_name(
        &self,
        scheme_name: &str,
        peril_code: Option<&str>,
        model_region_code: Option<&str>,
    ) -> Result<Value> {
        validators::non_empty_str(scheme_name, "scheme_name")?;
        let clause = event_rate_scheme_where(scheme_name, peril_code, model_region_code);
        self.get(
            endpoints::EVENT_RATE_SCHEMES,
            RequestOptions::new().query("where", clause),
            &format!("event rate scheme '{scheme_name}'"),
        )
        .await
    }

    pub async fn search_currencies(&self, where_clause: &str) -> Result<Value> {
        let mut options = RequestOptions::new();
        if !where_clause.is_empty() {
            options = options.query("where", where_clause);
        }
        self.client
            .get_json(endpoints::CURRENCIES, options)
            .await
            .map_err(|error| error.context("Failed to search currencies"))
    }

    pub async fn search_currency_scheme_vintages(&self, where_clause: &str) -> Result<Value> {
        let mut options = RequestOptions::new();
        if !where_clause.is_empty() {
            options = options.query("where", where_clause);
        }
        self.client
            .get_json(endpoints::CURRENCY_SCHEME_VINTAGES, options)
            .await
            .map_err(|error| error.context("Failed to search currency scheme vintages"))
    }

    /// RMS currency scheme vintage with the latest `effectiveDate`.
    pub async fn get_latest_currency_scheme_vintage(&self) -> Result<Value> {
        let response = self
            .search_currency_scheme_vintages("currencySchemeCode=\"RMS\"")
            .await?;
        let items = extract::require(&response, "items", "currency scheme vintages response")
            .map_err(|error| {
                error.context("Failed to extract items from currency scheme vintages response")
            })?;
        let items = items.as_array().cloned().unwrap_or_default();
        let mut latest: Option<(String, Value)> = None;
        for item in items {
            let date = extract::require_str(&item, "effectiveDate", "currency scheme vintage")?
                .to_owned();
            if latest.as_ref().map_or(true, |(best, _)| date > *best) {
                latest = Some((date, item));
            }
        }
        latest
            .map(|(_, item)| item)
            .ok_or_else(|| IrpError::api("No RMS currency scheme vintages found"))
    }

    /// Currency for analysis requests, falling back to fixed defaults when
    /// the latest vintage cannot be read.
    pub async fn get_analysis_currency(&self) -> Result<AnalysisCurrency> {
        let vintage = self
            .get_latest_currency_scheme_vintage()
            .await
            .and_then(|vintage| AnalysisCurrency::from_vintage(&vintage));
        match vintage {
            Ok(currency) => Ok(currency),
            Err(error @ (IrpError::Api { .. } | IrpError::Transport(_))) => {
                warn!(%error, "Failed to get currency scheme vintage from API, using defaults");
                Ok(AnalysisCurrency::fallback())
            }
            Err(other) => Err(other),
        }
    }

    /// First currency named `currency_name`.
    pub async fn get_currency_by_name(&self, currency_name: &str) -> Result<Value> {
        validators::non_empty_str(currency_name, "currency_name")?;
        let response = self
            .search_currencies(&format!("currencyName=\"{currency_name}\""))
            .await?;
        response
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned()
            .ok_or_else(|| {
                IrpError::api(format!(
                    "Failed to extract currency '{currency_name}' from search response"
                ))
            })
    }

    pub async fn get_tag_by_name(&self, tag_name: &str) -> Result<Vec<Value>> {
        validators::non_empty_str(tag_name, "tag_name")?;
        self.get(
            endpoints::TAGS,
            RequestOptions::new()
                .query("isActive", true)
                .query("filter", format!("TAGNAME = '{tag_name}'")),
            &format!("tag '{tag_name}'"),
        )
        .await
        .map(extract::into_list)
    }

    /// Create a tag, returning its id.
    pub async fn create_tag(&self, tag_name: &str) -> Result<i64> {
        validators::non_empty_str(tag_name, "tag_name")?;
        info!(tag_name, "creating tag");
        let tag_id = self
            .client
            .request(
                HttpMethod::Post,
                endpoints::TAGS,
                RequestOptions::new().json(json!({"tagName": tag_name})),
            )
            .await
            .and_then(|response| id_from_location(&response, "tag creation"))
            .map_err(|error| error.context(format!("Failed to create tag '{tag_name}'")))?;
        info!(tag_id, "tag created");
        Ok(tag_id)
    }

    /// Ids of the named tags, creating the ones that do not exist yet.
    pub async fn get_tag_ids_from_tag_names(&self, tag_names: &[String]) -> Result<Vec<i64>> {
        validators::non_empty_list(tag_names, "tag_names")?;
        debug!(?tag_names, "resolving tag ids");
        let mut tag_ids = Vec::with_capacity(tag_names.len());
        for tag_name in tag_names {
            let found = self.get_tag_by_name(tag_name).await?;
            let tag_id = match found.first() {
                Some(tag) => extract::require_i64(tag, "tagId", "tag search response").map_err(
                    |error| {
                        error.context(format!(
                            "Failed to extract tag ID from search response for '{tag_name}'"
                        ))
                    },
                )?,
                None => self.create_tag(tag_name).await?,
            };
            tag_ids.push(tag_id);
        }
        Ok(tag_ids)
    }

    /// Active simulation sets.
    pub async fn get_all_simulation_sets(&self) -> Result<Vec<Value>> {
        self.get(
            endpoints::SIMULATION_SETS,
            RequestOptions::new()
                .query("isActive", true)
                .query("isActivePEQ", true)
                .query("sort", "id")
                .query("sortOrder", 1)
                .query("where", "isActive=true"),
            "simulation sets",
        )
        .await
        .map(|body| extract::list_at(&body, "items"))
    }

    /// Simulation set for an ELT-based region; its `id` is the simulation set id.
    pub async fn get_simulation_set_by_event_rate_scheme_id(
        &self,
        event_rate_scheme_id: i64,
    ) -> Result<Value> {
        self.get_all_simulation_sets()
            .await?
            .into_iter()
            .find(|set| set.get("eventRateSchemeId").and_then(Value::as_i64) == Some(event_rate_scheme_id))
            .ok_or_else(|| {
                IrpError::api(format!(
                    "No simulation set found for event rate scheme ID {event_rate_scheme_id}"
                ))
            })
    }

    /// Simulation set for the broader model region `{region}{peril}` (e.g.
    /// `NA` + `WS`) whose RL versions include `engine_version`. Among several
    /// matches the highest id wins.
    pub async fn get_simulation_set_by_region_peril_and_engine(
        &self,
        region_code: &str,
        peril_code: &str,
        engine_version: &str,
    ) -> Result<Value> {
        validators::non_empty_str(region_code, "region_code")?;
        validators::non_empty_str(peril_code, "peril_code")?;
        validators::non_empty_str(engine_version, "engine_version")?;
        let model_region_code = format!("{region_code}{peril_code}");

        self.get_all_simulation_sets()
            .await?
            .into_iter()
            .filter(|set| {
                set.get("modelRegionCode").and_then(Value::as_str) == Some(model_region_code.as_str())
                    && rl_versions_contain(set, engine_version)
            })
            .max_by_key(|set| set.get("id").and_then(Value::as_i64).unwrap_or(0))
            .ok_or_else(|| {
                IrpError::api(format!(
                    "No simulation set found for regionCode '{region_code}', perilCode '{peril_code}', engineVersion '{engine_version}'"
                ))
            })
    }

    pub async fn get_all_pet_metadata(&self) -> Result<Vec<Value>> {
        self.get(
            endpoints::PET_METADATA,
            RequestOptions::new().page(500, 0),
            "PET metadata",
        )
        .await
        .map(|body| extract::list_at(&body, "items"))
    }

    /// PET metadata for a PLT/HD region; the PET id is the simulation set id.
    pub async fn get_pet_metadata_by_id(&self, pet_id: i64) -> Result<Value> {
        validators::positive(pet_id, "pet_id")?;
        self.get_all_pet_metadata()
            .await?
            .into_iter()
            .find(|pet| pet.get("id").and_then(Value::as_i64) == Some(pet_id))
            .ok_or_else(|| IrpError::api(format!("No PET metadata found for PET ID {pet_id}")))
    }

    pub async fn get_all_software_model_version_map(&self) -> Result<Vec<Value>> {
        self.get(
            endpoints::SOFTWARE_MODEL_VERSION_MAP,
            RequestOptions::new().query("isActive", true),
            "software model version map",
        )
        .await
        .map(|body| extract::list_at(&body, "items"))
    }

    /// Model version of the first mapping for `engine_version`.
    pub async fn get_model_version_by_engine_version(&self, engine_version: &str) -> Result<String> {
        validators::non_empty_str(engine_version, "engine_version")?;
        let maps = self.get_all_software_model_version_map().await?;
        let found = maps.iter().find(|map| {
            map.get("softwareVersionCode").and_then(Value::as_str) == Some(engine_version)
        });
        match found {
            Some(map) => Ok(extract::require_str(map, "modelVersionCode", "version map")?.to_owned()),
            None => Err(IrpError::api(format!(
                "No model version mapping found for engine version '{engine_version}'"
            ))),
        }
    }

    pub async fn get_model_version_by_engine_region_peril(
        &self,
        engine_version: &str,
        region_code: &str,
        peril_code: &str,
    ) -> Result<String> {
        validators::non_empty_str(engine_version, "engine_version")?;
        validators::non_empty_str(region_code, "region_code")?;
        validators::non_empty_str(peril_code, "peril_code")?;
        let model_region_code = format!("{region_code}{peril_code}");

        let maps = self.get_all_software_model_version_map().await?;
        let found = maps.iter().find(|map| {
            map.get("softwareVersionCode").and_then(Value::as_str) == Some(engine_version)
                && map.get("modelRegionCode").and_then(Value::as_str)
                    == Some(model_region_code.as_str())
        });
        match found {
            Some(map) => Ok(extract::require_str(map, "modelVersionCode", "version map")?.to_owned()),
            None => Err(IrpError::api(format!(
                "No model version mapping found for engine version '{engine_version}', region code '{region_code}', peril code '{peril_code}'"
            ))),
        }
    }
}
