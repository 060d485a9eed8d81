//! Platform endpoint paths and fixed code tables.

/// REST paths relative to the configured base URL.
pub mod endpoints {
    pub const WORKFLOWS: &str = "/riskmodeler/v1/workflows";
    pub const RISK_DATA_JOBS: &str = "/platform/riskdata/v1/jobs";

    pub const DATA_SERVERS: &str = "/platform/riskdata/v1/dataservers";
    pub const EXPOSURE_SETS: &str = "/platform/riskdata/v1/exposuresets";
    pub const EXPOSURES: &str = "/platform/riskdata/v1/exposures";

    pub const IMPORT_FOLDERS: &str = "/platform/import/v1/folders";
    pub const IMPORT_JOBS: &str = "/platform/import/v1/jobs";
    pub const IMPORTED_RDMS: &str = "/platform/riskdata/v1/analyses/imported-rdms";

    pub const GEOHAZ_JOBS: &str = "/platform/geohaz/v1/jobs";
    pub const ANALYSIS_JOBS: &str = "/platform/model/v1/jobs";
    pub const ANALYSES: &str = "/platform/riskdata/v1/analyses";
    pub const GROUPING_JOBS: &str = "/platform/grouping/v1/jobs";
    pub const EXPORT_JOBS: &str = "/platform/export/v1/jobs";

    pub const MODEL_PROFILES: &str = "/analysis-settings/modelprofiles";
    pub const OUTPUT_PROFILES: &str = "/analysis-settings/outputprofiles";
    pub const EVENT_RATE_SCHEMES: &str = "/data-store/referencetables/eventratescheme";
    pub const TAGS: &str = "/platform/referencedata/v1/tags";
    pub const CURRENCIES: &str = "/data-store/referencetables/currency";
    pub const CURRENCY_SCHEME_VINTAGES: &str = "/data-store/referencetables/currencyschemevintage";
    pub const SIMULATION_SETS: &str = "/data-store/referenceTables/SimulationSet";
    pub const PET_METADATA: &str = "/data-store/referenceTables/PETMetadata";
    pub const SOFTWARE_MODEL_VERSION_MAP: &str =
        "/data-store/referenceTables/SoftwareModelVersionMap";

    pub fn workflow(id: i64) -> String {
        format!("{WORKFLOWS}/{id}")
    }

    pub fn risk_data_job(id: i64) -> String {
        format!("{RISK_DATA_JOBS}/{id}")
    }

    pub fn exposure_set_exposures(exposure_set_id: i64) -> String {
        format!("{EXPOSURE_SETS}/{exposure_set_id}/exposures")
    }

    pub fn exposure(exposure_id: i64) -> String {
        format!("{EXPOSURES}/{exposure_id}")
    }

    pub fn exposure_data_upgrade(exposure_id: i64) -> String {
        format!("{EXPOSURES}/{exposure_id}/data-upgrade")
    }

    pub fn exposure_cedants(exposure_id: i64) -> String {
        format!("{EXPOSURES}/{exposure_id}/cedants")
    }

    pub fn exposure_lobs(exposure_id: i64) -> String {
        format!("{EXPOSURES}/{exposure_id}/lobs")
    }

    pub fn import_job(id: i64) -> String {
        format!("{IMPORT_JOBS}/{id}")
    }

    pub fn portfolios(exposure_id: i64) -> String {
        format!("{EXPOSURES}/{exposure_id}/portfolios")
    }

    pub fn portfolio(exposure_id: i64, portfolio_id: i64) -> String {
        format!("{EXPOSURES}/{exposure_id}/portfolios/{portfolio_id}")
    }

    pub fn portfolio_accounts(exposure_id: i64, portfolio_id: i64) -> String {
        format!("{}/accounts", portfolio(exposure_id, portfolio_id))
    }

    pub fn portfolio_metrics(exposure_id: i64, portfolio_id: i64) -> String {
        format!("{}/metrics", portfolio(exposure_id, portfolio_id))
    }

    pub fn geohaz_job(id: i64) -> String {
        format!("{GEOHAZ_JOBS}/{id}")
    }

    pub fn treaties(exposure_id: i64) -> String {
        format!("{EXPOSURES}/{exposure_id}/treaties")
    }

    pub fn treaty_lob(exposure_id: i64, treaty_id: i64) -> String {
        format!("{EXPOSURES}/{exposure_id}/treaties/{treaty_id}/lob")
    }

    pub fn analysis_job(id: i64) -> String {
        format!("{ANALYSIS_JOBS}/{id}")
    }

    pub fn analysis(id: i64) -> String {
        format!("{ANALYSES}/{id}")
    }

    /// Results sub-resource: `elt`, `ep`, `stats`, `plt` or `regions`.
    pub fn analysis_results(id: i64, resource: &str) -> String {
        format!("{ANALYSES}/{id}/{resource}")
    }

    pub fn grouping_job(id: i64) -> String {
        format!("{GROUPING_JOBS}/{id}")
    }

    pub fn export_job(id: i64) -> String {
        format!("{EXPORT_JOBS}/{id}")
    }

    pub fn server_databases(server_id: i64) -> String {
        format!("{DATA_SERVERS}/{server_id}/databases")
    }

    pub fn databridge_database(instance: &str, database: &str) -> String {
        format!("/databridge/v1/sql-instances/{instance}/databases/{database}")
    }

    pub fn databridge_database_access(instance: &str, database: &str) -> String {
        format!("/databridge/v1/sql-instances/{instance}/Databases/{database}")
    }

    pub fn databridge_job(id: &str) -> String {
        format!("/databridge/v1/jobs/{id}")
    }
}

/// Treaty type display name to platform code.
pub const TREATY_TYPES: &[(&str, &str)] = &[
    ("Catastrophe", "CATA"),
    ("Corporate Catastrophe", "CORP"),
    ("Non-Catastrophe", "NCAT"),
    ("Quota Share", "QUOT"),
    ("Stop Loss", "STOP"),
    ("Surplus Share", "SURP"),
    ("Working Excess", "WORK"),
];

pub const TREATY_ATTACHMENT_BASES: &[(&str, &str)] =
    &[("Losses Occurring", "L"), ("Risks Attaching", "R")];

pub const TREATY_ATTACHMENT_LEVELS: &[(&str, &str)] = &[
    ("Account", "ACCT"),
    ("Portfolio", "PORT"),
    ("Policy", "POL"),
    ("Location", "LOC"),
];

/// Gross, ground-up and reinsurance layer.
pub const PERSPECTIVE_CODES: &[&str] = &["GR", "GU", "RL"];

pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Look up `name` in a display-name/code table.
pub fn code_for(table: &[(&str, &'static str)], name: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(display, _)| *display == name)
        .map(|(_, code)| *code)
}

/// Display names of a code table, for error messages.
pub fn names_of(table: &[(&str, &str)]) -> Vec<String> {
    table.iter().map(|(name, _)| (*name).to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn treaty_type_codes_resolve_by_display_name() {
        assert_eq!(code_for(TREATY_TYPES, "Quota Share"), Some("QUOT"));
        assert_eq!(code_for(TREATY_TYPES, "quota share"), None);
    }

    #[test]
    fn nested_paths_compose() {
        assert_eq!(
            endpoints::portfolio_accounts(3, 9),
            "/platform/riskdata/v1/exposures/3/portfolios/9/accounts"
        );
        assert_eq!(
            endpoints::databridge_database_access("sql-instance-1", "RDM_A"),
            "/databridge/v1/sql-instances/sql-instance-1/Databases/RDM_A"
        );
    }
}
