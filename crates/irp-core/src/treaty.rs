//! Reinsurance treaties and their line-of-business assignments.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{Client, RequestOptions};
use crate::constants::{
    code_for, endpoints, names_of, TREATY_ATTACHMENT_BASES, TREATY_ATTACHMENT_LEVELS,
    TREATY_TYPES,
};
use crate::edm::EdmManager;
use crate::error::{IrpError, Result, ValidationError};
use crate::extract::{self, id_from_location};
use crate::http_client::HttpMethod;
use crate::reference_data::ReferenceDataManager;
use crate::validators;

pub const TREATY_NUMBER_MAX_CHARS: usize = 20;

/// Treaty terms. Type, attachment basis and attachment level are display
/// names such as `Working Excess`, `Losses Occurring` and `Portfolio`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TreatySpec {
    pub edm_name: String,
    pub treaty_name: String,
    pub treaty_number: String,
    pub treaty_type: String,
    pub per_risk_limit: f64,
    pub occurrence_limit: f64,
    pub attachment_point: f64,
    pub inception_date: String,
    pub expiration_date: String,
    pub currency_name: String,
    pub attachment_basis: String,
    pub attachment_level: String,
    pub pct_covered: f64,
    pub pct_placed: f64,
    pub pct_share: f64,
    pub pct_retention: f64,
    pub premium: f64,
    pub num_reinstatements: i64,
    pub pct_reinstatement_charge: f64,
    pub aggregate_limit: f64,
    pub aggregate_deductible: f64,
    pub priority: i64,
}

/// Resolved platform codes for a treaty's display names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TreatyCodes {
    treaty_type: &'static str,
    attachment_basis: &'static str,
    attachment_level: &'static str,
}

fn resolve_code(
    table: &[(&str, &'static str)],
    value: &str,
    field: &'static str,
) -> std::result::Result<&'static str, ValidationError> {
    code_for(table, value).ok_or_else(|| ValidationError::InvalidChoice {
        field,
        value: value.to_owned(),
        allowed: names_of(table).join(", "),
    })
}

impl TreatySpec {
    fn validate(&self) -> std::result::Result<TreatyCodes, ValidationError> {
        for (value, field) in [
            (&self.edm_name, "edm_name"),
            (&self.treaty_name, "treaty_name"),
            (&self.treaty_number, "treaty_number"),
            (&self.treaty_type, "treaty_type"),
            (&self.inception_date, "inception_date"),
            (&self.expiration_date, "expiration_date"),
            (&self.currency_name, "currency"),
            (&self.attachment_basis, "attachment_basis"),
            (&self.attachment_level, "attachment_level"),
        ] {
            validators::non_empty_str(value, field)?;
        }
        for (value, field) in [
            (self.per_risk_limit, "per_risk_limit"),
            (self.occurrence_limit, "occurrence_limit"),
            (self.attachment_point, "attachment_point"),
            (self.pct_covered, "pct_covered"),
            (self.pct_placed, "pct_placed"),
            (self.pct_share, "pct_share"),
            (self.pct_retention, "pct_retention"),
            (self.premium, "premium"),
            (self.pct_reinstatement_charge, "pct_reinstatement_charge"),
            (self.aggregate_limit, "aggregate_limit"),
            (self.aggregate_deductible, "aggregate_deductible"),
        ] {
            validators::non_negative(value, field)?;
        }
        if self.num_reinstatements < 0 {
            return Err(ValidationError::Negative {
                field: "num_reinstatements",
            });
        }

        Ok(TreatyCodes {
            treaty_type: resolve_code(TREATY_TYPES, &self.treaty_type, "treaty_type")?,
            attachment_basis: resolve_code(
                TREATY_ATTACHMENT_BASES,
                &self.attachment_basis,
                "attachment_basis",
            )?,
            attachment_level: resolve_code(
                TREATY_ATTACHMENT_LEVELS,
                &self.attachment_level,
                "attachment_level",
            )?,
        })
    }

    fn body(&self, codes: TreatyCodes, currency: Value, cedant: Value) -> Value {
        json!({
            "treatyName": self.treaty_name,
            "treatyNumber": extract::truncate_chars(&self.treaty_number, TREATY_NUMBER_MAX_CHARS),
            "treatyType": codes.treaty_type,
            "riskLimit": self.per_risk_limit,
            "occurrenceLimit": self.occurrence_limit,
            "attachmentPoint": self.attachment_point,
            "effectiveDate": self.inception_date,
            "expirationDate": self.expiration_date,
            "currency": currency,
            "attachmentBasis": codes.attachment_basis,
            "attachmentLevel": codes.attachment_level,
            "percentageCovered": self.pct_covered,
            "percentagePlaced": self.pct_placed,
            "percentageRiShare": self.pct_share,
            "percentageRetention": self.pct_retention,
            "premium": self.premium,
            "numberOfReinstatements": self.num_reinstatements,
            "reinstatementCharge": self.pct_reinstatement_charge,
            "aggregateLimit": self.aggregate_limit,
            "aggregateDeductible": self.aggregate_deductible,
            "priority": self.priority,
            "cedant": cedant,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TreatyManager {
    client: Client,
}

impl TreatyManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn search_treaties(
        &self,
        exposure_id: i64,
        filter: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>> {
        validators::positive(exposure_id, "exposure_id")?;
        self.client
            .get_json(
                &endpoints::treaties(exposure_id),
                RequestOptions::new().filter(filter).page(limit, offset),
            )
            .await
            .map(extract::into_list)
            .map_err(|error| error.context("Failed to search treaties"))
    }

    pub async fn search_treaties_paginated(
        &self,
        exposure_id: i64,
        filter: &str,
    ) -> Result<Vec<Value>> {
        validators::positive(exposure_id, "exposure_id")?;
        self.client
            .get_all_pages(&endpoints::treaties(exposure_id), filter)
            .await
            .map_err(|error| error.context("Failed to search treaties"))
    }

    /// Create a treaty in an EDM and assign it every LOB of that EDM.
    ///
    /// The EDM must have exactly one cedant. Returns the treaty id and the
    /// request body.
    pub async fn create_treaty(&self, spec: &TreatySpec) -> Result<(i64, Value)> {
        let codes = spec.validate()?;
        let edm_name = spec.edm_name.as_str();
        info!(treaty_name = %spec.treaty_name, edm_name, "creating treaty");

        let edms = EdmManager::new(self.client.clone());
        let exposure_id = edms.exposure_id_by_name(edm_name).await?;

        debug!(exposure_id, "looking up cedant");
        let cedants = edms.get_cedants_by_edm(exposure_id).await.map_err(|error| {
            error.context(format!("Failed to retrieve cedants for EDM '{edm_name}'"))
        })?;
        let cedant = match cedants.as_slice() {
            [] => {
                return Err(IrpError::reference_data(format!(
                    "No cedants found for EDM '{edm_name}'"
                )))
            }
            [cedant] => cedant,
            _ => {
                return Err(IrpError::reference_data(format!(
                    "Multiple cedants found for EDM '{edm_name}'"
                )))
            }
        };
        let context = format!("cedant data for EDM '{edm_name}'");
        let cedant = json!({
            "cedantId": extract::require(cedant, "cedantId", &context)?,
            "cedantName": extract::require(cedant, "cedantName", &context)?,
        });

        debug!(currency_name = %spec.currency_name, "looking up currency");
        let currency = ReferenceDataManager::new(self.client.clone())
            .get_currency_by_name(&spec.currency_name)
            .await?;
        let context = format!("currency data for currency '{}'", spec.currency_name);
        let currency = json!({
            "id": extract::require(&currency, "currencyId", &context)?,
            "code": extract::require(&currency, "currencyCode", &context)?,
            "name": extract::require(&currency, "currencyName", &context)?,
        });

        let body = spec.body(codes, currency, cedant);
        let treaty_id = self
            .client
            .request(
                HttpMethod::Post,
                &endpoints::treaties(exposure_id),
                RequestOptions::new().json(body.clone()),
            )
            .await
            .and_then(|response| id_from_location(&response, "treaty creation"))
            .map_err(|error| {
                error.context(format!("Failed to create treaty '{}'", spec.treaty_name))
            })?;
        info!(treaty_id, "treaty created");

        let lobs = edms.get_lobs_by_edm(exposure_id).await?;
        debug!(count = lobs.len(), treaty_id, "assigning LOBs to treaty");
        for lob in &lobs {
            let lob_id = extract::require_i64(lob, "lobId", "LOB data")?;
            let lob_name = extract::require_str(lob, "lobName", "LOB data")?;
            self.create_treaty_lob(exposure_id, treaty_id, lob_id, lob_name)
                .await?;
        }
        Ok((treaty_id, body))
    }

    pub async fn create_treaties(&self, specs: &[TreatySpec]) -> Result<Vec<i64>> {
        validators::non_empty_list(specs, "treaty_data_list")?;
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let (id, _) = self.create_treaty(spec).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    pub async fn create_treaty_lob(
        &self,
        exposure_id: i64,
        treaty_id: i64,
        lob_id: i64,
        lob_name: &str,
    ) -> Result<i64> {
        validators::positive(exposure_id, "exposure_id")?;
        validators::positive(treaty_id, "treaty_id")?;
        validators::positive(lob_id, "lob_id")?;
        validators::non_empty_str(lob_name, "lobName")?;
        self.client
            .request(
                HttpMethod::Post,
                &endpoints::treaty_lob(exposure_id, treaty_id),
                RequestOptions::new().json(json!({"lobId": lob_id, "lobName": lob_name})),
            )
            .await
            .and_then(|response| id_from_location(&response, "treaty LOB creation"))
            .map_err(|error| error.context(format!("Failed to create treaty LOB '{lob_name}'")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::http_client::ScriptedHttpClient;
    use crate::job::tests::scripted_client;
    use std::sync::Arc;

    pub(crate) fn working_excess() -> TreatySpec {
        TreatySpec {
            edm_name: String::from("EDM_A"),
            treaty_name: String::from("WX 2025"),
            treaty_number: String::from("TREATY-NUMBER-0000000042"),
            treaty_type: String::from("Working Excess"),
            per_risk_limit: 1_000_000.0,
            occurrence_limit: 5_000_000.0,
            attachment_point: 250_000.0,
            inception_date: String::from("2025-01-01T00:00:00.000Z"),
            expiration_date: String::from("2025-12-31T00:00:00.000Z"),
            currency_name: String::from("US Dollar"),
            attachment_basis: String::from("Losses Occurring"),
            attachment_level: String::from("Portfolio"),
            pct_covered: 100.0,
            pct_placed: 95.0,
            pct_share: 100.0,
            pct_retention: 0.0,
            premium: 0.0,
            num_reinstatements: 1,
            pct_reinstatement_charge: 0.0,
            aggregate_limit: 0.0,
            aggregate_deductible: 0.0,
            priority: 1,
        }
    }

    #[test]
    fn unknown_treaty_type_lists_allowed_names() {
        let mut spec = working_excess();
        spec.treaty_type = String::from("Excess");
        let error = spec.validate().unwrap_err();
        assert!(error.to_string().contains("Quota Share"));
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let mut spec = working_excess();
        spec.premium = -1.0;
        assert_eq!(
            spec.validate(),
            Err(ValidationError::Negative { field: "premium" })
        );
    }

    #[tokio::test]
    async fn treaty_is_created_with_codes_and_lobs() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!([{"exposureId": 5}]));
        http.push_json(200, json!([{"cedantId": "C1", "cedantName": "Cedant"}]));
        http.push_json(
            200,
            json!({"items": [{"currencyId": 1, "currencyCode": "USD", "currencyName": "US Dollar"}]}),
        );
        http.push_location(201, "https://api.test/platform/riskdata/v1/exposures/5/treaties/70");
        http.push_json(200, json!([{"lobId": 11, "lobName": "Property"}]));
        http.push_location(201, "https://api.test/platform/riskdata/v1/exposures/5/treaties/70/lob/11");
        let treaties = TreatyManager::new(scripted_client(http.clone()));

        let (treaty_id, body) = treaties
            .create_treaty(&working_excess())
            .await
            .expect("created");

        assert_eq!(treaty_id, 70);
        assert_eq!(body["treatyType"], "WORK");
        assert_eq!(body["attachmentBasis"], "L");
        assert_eq!(body["attachmentLevel"], "PORT");
        assert_eq!(body["treatyNumber"], "TREATY-NUMBER-000000");
        assert_eq!(body["currency"]["code"], "USD");
        let requests = http.requests();
        assert_eq!(requests.len(), 6);
        assert_eq!(requests[5].json_body(), json!({"lobId": 11, "lobName": "Property"}));
    }

    #[tokio::test]
    async fn several_cedants_are_ambiguous() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(200, json!([{"exposureId": 5}]));
        http.push_json(200, json!([{"cedantId": "C1"}, {"cedantId": "C2"}]));
        let treaties = TreatyManager::new(scripted_client(http));

        let error = treaties
            .create_treaty(&working_excess())
            .await
            .expect_err("ambiguous");

        assert_eq!(error.code(), "irp.reference_data");
    }
}
