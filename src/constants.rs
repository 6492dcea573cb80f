/// Rate limiter keys, one per logical upstream operation
pub const UPLOAD_KEY: &str = "upload";
pub const STATUS_KEY: &str = "status";

/// Persistence list keys
pub const DUPLICATE_RECORDS_KEY: &str = "duplicate_records";
pub const INGESTION_RESULTS_KEY: &str = "ingestion_results";

/// Anti-forgery token header used by the upstream web API
pub const CSRF_HEADER: &str = "x-csrf-token";

pub const USER_AGENT: &str = concat!("asset_ingest/", env!("CARGO_PKG_VERSION"));

/// Placeholder substituted with the asset id in per-asset URL templates
pub const ASSET_ID_PLACEHOLDER: &str = "{id}";

/// Detail-page phrases that mean the asset is still in review
pub fn default_pending_phrases() -> Vec<String> {
    ["reviewing", "pending", "under review", "awaiting moderation"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Detail-page phrases that mean the asset was refused or taken down
pub fn default_declined_phrases() -> Vec<String> {
    ["declined", "removed", "not available", "rejected", "moderated"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Fill `{id}` in a URL template
pub fn asset_url(template: &str, asset_id: u64) -> String {
    template.replace(ASSET_ID_PLACEHOLDER, &asset_id.to_string())
}
