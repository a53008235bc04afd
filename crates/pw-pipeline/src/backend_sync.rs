//! Backend projection sync
//!
//! Maintains the denormalised "active models" table in the downstream
//! store. Staging reads recent aggregator snapshots from the pricing store
//! and joins the catalogue, so any model priced inside the freshness window
//! lands in the projection regardless of what the collection filters were.
//! Models the staging pass no longer covers are deactivated, except the
//! protected set, which must stay active whatever the upstream feed says.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use pw_config::Config;
use pw_store::{BackendRepo, PricingRepo};
use pw_types::{
    AppResult, BackendModelRecord, BackendRowMeta, ModelWithLinks, PricingSnapshot,
};

pub struct BackendSync {
    pricing_repo: Arc<PricingRepo>,
    backend: Option<BackendRepo>,
    /// model_type -> slug forced as the default for that type.
    forced_defaults: HashMap<String, String>,
    protected: Vec<String>,
    freshness_days: i64,
}

impl BackendSync {
    pub fn new(config: &Config, pricing_repo: Arc<PricingRepo>) -> AppResult<Self> {
        let backend = match &config.backend_store {
            Some(store) => Some(BackendRepo::new(store, config.request_timeout())?),
            None => None,
        };

        let mut forced_defaults = HashMap::new();
        if let Some(slug) = &config.default_chat_model_id {
            forced_defaults.insert("chat".to_string(), slug.clone());
        }
        if let Some(slug) = &config.default_embedding_model_id {
            forced_defaults.insert("embedding".to_string(), slug.clone());
        }

        Ok(Self {
            pricing_repo,
            backend,
            forced_defaults,
            protected: config.protected_models.clone(),
            freshness_days: config.backend_freshness_days,
        })
    }

    pub fn enabled(&self) -> bool {
        self.backend.is_some()
    }

    fn freshness_floor(&self) -> NaiveDate {
        Utc::now().date_naive() - Duration::days(self.freshness_days)
    }

    /// Slugs priced recently that have no backend row yet. Logged before
    /// every tick; the subsequent sync stages them.
    pub async fn missing_in_backend(&self) -> AppResult<Vec<String>> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };

        info!("checking for missing models in backend");

        let recent = self
            .pricing_repo
            .get_recent_priced_slugs(self.freshness_floor())
            .await?;
        let backend_slugs: HashSet<String> = backend
            .list_rows()
            .await?
            .into_iter()
            .map(|r| r.model_slug)
            .collect();

        let missing: Vec<String> = recent
            .into_iter()
            .filter(|s| !backend_slugs.contains(s))
            .collect();

        if missing.is_empty() {
            info!(backend_count = backend_slugs.len(), "no missing models in backend");
        } else {
            info!(
                count = missing.len(),
                models = ?missing.iter().take(10).collect::<Vec<_>>(),
                "found_missing_models_in_backend"
            );
        }

        Ok(missing)
    }

    /// Stage, upsert, deactivate, protect.
    pub async fn run(&self) -> AppResult<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        info!("starting backend projection sync");

        let snapshots = self
            .pricing_repo
            .get_recent_aggregator_snapshots(self.freshness_floor())
            .await?;

        // Rows arrive newest first; the first snapshot per model wins.
        let mut staged: HashMap<String, BackendModelRecord> = HashMap::new();
        for row in snapshots {
            let Some(model) = row.models_catalog else {
                continue;
            };
            if staged.contains_key(&model.model.model_slug) {
                continue;
            }
            if let Some(record) = stage_model(&model, &row.snapshot) {
                staged.insert(record.model_slug.clone(), record);
            }
        }

        let existing_by_slug: HashMap<String, BackendRowMeta> = backend
            .list_rows()
            .await?
            .into_iter()
            .map(|r| (r.model_slug.clone(), r))
            .collect();

        let mut records: Vec<BackendModelRecord> = staged.into_values().collect();
        records.sort_by(|a, b| b.sort_cost.cmp(&a.sort_cost));

        // Existing rows keep their manual ordering and default flags; only
        // newly-seen slugs get a computed rank.
        for (rank, record) in records.iter_mut().enumerate() {
            match existing_by_slug.get(&record.model_slug) {
                Some(meta) => {
                    record.sort_order = meta.sort_order;
                    record.is_default = meta.is_default;
                }
                None => {
                    record.sort_order = (100 - (rank as i32) * 5).max(0);
                }
            }
        }

        self.assign_defaults(&mut records, &existing_by_slug);

        backend.upsert_models(&records).await?;

        let staged_slugs: HashSet<String> =
            records.iter().map(|r| r.model_slug.clone()).collect();

        let mut missing: Vec<String> = existing_by_slug
            .keys()
            .filter(|slug| !staged_slugs.contains(*slug))
            .cloned()
            .collect();
        missing.sort();

        let protected_missing: Vec<String> = missing
            .iter()
            .filter(|slug| self.protected.contains(slug))
            .cloned()
            .collect();
        if !protected_missing.is_empty() {
            info!(models = ?protected_missing, "skipping_deactivation_for_protected_models");
            missing.retain(|slug| !self.protected.contains(slug));
        }

        backend.deactivate_models(&missing).await?;

        self.ensure_protected(backend, &staged_slugs, &existing_by_slug)
            .await?;

        info!(
            staged = staged_slugs.len(),
            deactivated = missing.len(),
            "backend projection sync completed"
        );
        Ok(())
    }

    /// One default per model type: preserved defaults stand, types without
    /// one get the highest-sorted active row, configured defaults override
    /// everything.
    fn assign_defaults(
        &self,
        records: &mut [BackendModelRecord],
        existing_by_slug: &HashMap<String, BackendRowMeta>,
    ) {
        let mut defaulted: HashSet<String> = records
            .iter()
            .filter(|r| r.is_default)
            .map(|r| r.model_type.clone())
            .collect();

        // Protected rows outside staging keep their flags, so their types
        // are taken too.
        for meta in existing_by_slug.values() {
            if meta.is_default && self.protected.contains(&meta.model_slug) {
                defaulted.insert(meta.model_type.clone());
            }
        }

        let mut by_sort: Vec<usize> = (0..records.len()).collect();
        by_sort.sort_by_key(|&i| std::cmp::Reverse(records[i].sort_order));

        for i in by_sort {
            let record = &mut records[i];
            if record.is_active && !defaulted.contains(&record.model_type) {
                record.is_default = true;
                defaulted.insert(record.model_type.clone());
            }
        }

        for (model_type, slug) in &self.forced_defaults {
            if !records.iter().any(|r| &r.model_slug == slug) {
                warn!(model_type = %model_type, model = %slug, "forced default model not staged");
                continue;
            }
            for record in records.iter_mut() {
                if &record.model_type == model_type {
                    record.is_default = &record.model_slug == slug;
                }
            }
        }
    }

    /// Every protected slug must end the sync present and active. Slugs
    /// absent from both staging and the backend table are inserted from the
    /// curated protection map.
    async fn ensure_protected(
        &self,
        backend: &BackendRepo,
        staged_slugs: &HashSet<String>,
        existing_by_slug: &HashMap<String, BackendRowMeta>,
    ) -> AppResult<()> {
        for slug in &self.protected {
            if staged_slugs.contains(slug) {
                continue;
            }

            match existing_by_slug.get(slug) {
                Some(meta) if meta.is_active => {}
                Some(_) => {
                    info!(model = %slug, "reactivating protected backend model");
                    backend.activate_models(std::slice::from_ref(slug)).await?;
                }
                None => match protection_map_row(slug) {
                    Some(row) => {
                        info!(model = %slug, "inserting protected backend model");
                        backend.upsert_models(std::slice::from_ref(&row)).await?;
                    }
                    None => {
                        warn!(model = %slug, "protected model has no curated definition");
                    }
                },
            }
        }

        Ok(())
    }
}

/// Build the projection row for one model from its freshest aggregator
/// snapshot. Models whose snapshot carries no paid component are left out of
/// the projection.
fn stage_model(model: &ModelWithLinks, snapshot: &PricingSnapshot) -> Option<BackendModelRecord> {
    let m = &model.model;
    let pricing = &snapshot.pricing;

    if !pricing.has_paid_component() {
        debug!(model = %m.model_slug, "skipping free model");
        return None;
    }

    let supported: HashSet<&str> = m
        .supported_parameters
        .iter()
        .flatten()
        .map(|s| s.as_str())
        .collect();
    let input_modalities = architecture_list(&m.architecture, "input_modalities");
    let output_modalities = architecture_list(&m.architecture, "output_modalities");

    let has = |modality: &str| {
        input_modalities.iter().any(|m| m == modality)
            || output_modalities.iter().any(|m| m == modality)
    };

    let supports_reasoning = pricing.internal_reasoning_usd_per_million.is_some()
        || supported.contains("reasoning")
        || supported.contains("include_reasoning");

    let mut capabilities = json!({
        "supports_tools": supported.contains("tools") || supported.contains("tool_choice"),
        "supports_vision": has("image"),
        "supports_reasoning": supports_reasoning,
        "supports_web_search": pricing.web_search_usd.is_some(),
        "supports_audio": has("audio"),
        "supports_video": has("video"),
    });
    if supports_reasoning {
        capabilities["supports_thinking"] = json!(true);
    }

    let display_name = m.display_name.clone().unwrap_or_else(|| m.model_slug.clone());
    let provider = model.derived_provider();
    let model_type = derive_model_type(&m.model_slug, &display_name, &supported);

    let cost_input = pricing.prompt_usd_per_million;
    let cost_output = pricing.completion_usd_per_million;
    let sort_cost = [cost_input, cost_output]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(Decimal::ZERO);

    let mut metadata = json!({
        "tier": classify_tier(cost_input),
        "series": derive_series(&m.model_slug),
        "provider": provider,
        "source": "aggregator",
    });
    if let Some(summary) = m.description.as_deref().and_then(summarize_description) {
        metadata["description"] = json!(summary);
    }

    Some(BackendModelRecord {
        model_slug: m.model_slug.clone(),
        display_name,
        provider,
        model_type: model_type.to_string(),
        context_window: m.context_length,
        max_output_tokens: model.max_output_tokens(),
        cost_per_million_input: cost_input,
        cost_per_million_output: cost_output,
        is_active: true,
        is_default: false,
        sort_order: 0,
        capabilities,
        metadata,
        is_thinking_model: supports_reasoning,
        updated_at: Utc::now(),
        sort_cost,
    })
}

fn architecture_list(architecture: &Option<Value>, key: &str) -> Vec<String> {
    architecture
        .as_ref()
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Cost tier drives presentation downstream. Thresholds are per-1M rates.
fn classify_tier(cost_per_million_input: Option<Decimal>) -> &'static str {
    let Some(cost) = cost_per_million_input else {
        return "experimental";
    };

    if cost >= Decimal::from(1_000) {
        "premium"
    } else if cost >= Decimal::from(200) {
        "standard"
    } else {
        "budget"
    }
}

/// Model family from the slug, e.g. `anthropic/claude-3.5-sonnet` ->
/// `claude-3.5`.
fn derive_series(model_slug: &str) -> Option<String> {
    let (_, model_path) = model_slug.split_once('/')?;
    let base = model_path.split(':').next().unwrap_or(model_path);
    let segments: Vec<&str> = base.split('-').collect();

    match segments.as_slice() {
        [first, second, ..] if second.replace('.', "").chars().all(|c| c.is_ascii_digit())
            && !second.is_empty() =>
        {
            Some(format!("{}-{}", first, second))
        }
        [first, ..] => Some(first.to_string()),
        [] => Some(base.to_string()),
    }
}

/// The projection only distinguishes chat and embedding models.
fn derive_model_type(model_slug: &str, display_name: &str, supported: &HashSet<&str>) -> &'static str {
    let slug = model_slug.to_lowercase();
    let name = display_name.to_lowercase();

    let keywords = ["embedding", "embed", "vector"];
    if keywords.iter().any(|k| slug.contains(k) || name.contains(k))
        || supported.contains("dimensions")
    {
        return "embedding";
    }

    "chat"
}

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+").expect("url pattern compiles"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));
static SENTENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?](\s+|$)").expect("sentence pattern compiles"));

/// First two sentences of a model description, links stripped, capped at
/// 240 characters.
fn summarize_description(description: &str) -> Option<String> {
    let no_links = URL_RE.replace_all(description, "");
    let normalized = WHITESPACE_RE.replace_all(&no_links, " ").trim().to_string();

    if normalized.is_empty() {
        return None;
    }

    let mut lines: Vec<String> = Vec::new();
    let mut start = 0;
    for boundary in SENTENCE_END_RE.find_iter(&normalized) {
        let sentence = normalized[start..boundary.end()].trim();
        if !sentence.is_empty() {
            lines.push(sentence.to_string());
        }
        start = boundary.end();
        if lines.len() >= 2 {
            break;
        }
    }
    if lines.len() < 2 {
        let tail = normalized[start..].trim();
        if !tail.is_empty() {
            lines.push(tail.to_string());
        }
    }

    if lines.is_empty() {
        return None;
    }

    let mut summary = lines.join("\n");
    if summary.chars().count() > 240 {
        let truncated: String = summary.chars().take(237).collect();
        summary = format!("{}...", truncated.trim_end());
    }

    Some(summary)
}

/// Curated rows for protected models that may never appear in the upstream
/// feed at all.
fn protection_map_row(slug: &str) -> Option<BackendModelRecord> {
    match slug {
        "openai/text-embedding-3-large" => Some(BackendModelRecord {
            model_slug: slug.to_string(),
            display_name: "Text Embedding 3 Large".to_string(),
            provider: "openai".to_string(),
            model_type: "embedding".to_string(),
            context_window: Some(8_191),
            max_output_tokens: None,
            cost_per_million_input: Some(Decimal::new(13, 2)),
            cost_per_million_output: Some(Decimal::new(65, 3)),
            is_active: true,
            is_default: false,
            sort_order: 0,
            capabilities: json!({
                "supports_tools": false,
                "supports_vision": false,
                "supports_reasoning": false,
            }),
            metadata: json!({
                "tier": "budget",
                "series": "text",
                "provider": "openai",
                "source": "curated",
            }),
            is_thinking_model: false,
            updated_at: Utc::now(),
            sort_cost: Decimal::new(13, 2),
        }),
        _ => None,
    }
}
