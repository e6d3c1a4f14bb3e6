//! Runtime settings from the environment + the category plan from YAML.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use jobsync_adapters::{AdapterRuntime, HttpSessionConfig, PoliteDelay, SourceEntry};
use jobsync_core::{
    CategoryConfig, CategoryPolicy, ExperienceRule, FreshnessWindow, LocationRule, TitleRule,
};
use jobsync_storage::{RemoteStore, SheetsClientConfig, SheetsRemoteStore};
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub categories_path: PathBuf,
    pub cache_path: PathBuf,
    pub schedule_minute: u32,
    pub user_agent: String,
    pub navigation_timeout_secs: u64,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub sheets: Option<SheetsClientConfig>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let navigation_timeout_secs = parsed("JOBSYNC_NAV_TIMEOUT_SECS", 30);
        let sheets = match (
            lookup("SHEETS_SPREADSHEET_ID").filter(|v| !v.trim().is_empty()),
            lookup("SHEETS_ACCESS_TOKEN").filter(|v| !v.trim().is_empty()),
        ) {
            (Some(spreadsheet_id), Some(access_token)) => Some(SheetsClientConfig {
                api_base: lookup("SHEETS_API_BASE")
                    .unwrap_or_else(|| SheetsClientConfig::DEFAULT_API_BASE.to_string()),
                spreadsheet_id,
                access_token,
                timeout: Duration::from_secs(navigation_timeout_secs),
            }),
            _ => None,
        };

        Self {
            categories_path: lookup("JOBSYNC_CATEGORIES")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./categories.yaml")),
            cache_path: lookup("JOBSYNC_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/jobs_cache.json")),
            schedule_minute: parsed("JOBSYNC_SCHEDULE_MINUTE", 0).min(59) as u32,
            user_agent: lookup("JOBSYNC_USER_AGENT").unwrap_or_else(|| {
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36"
                    .to_string()
            }),
            navigation_timeout_secs,
            delay_min_ms: parsed("JOBSYNC_DELAY_MIN_MS", 1500),
            delay_max_ms: parsed("JOBSYNC_DELAY_MAX_MS", 4000),
            sheets,
        }
    }

    pub fn adapter_runtime(&self) -> AdapterRuntime {
        AdapterRuntime {
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            delay: PoliteDelay {
                min: Duration::from_millis(self.delay_min_ms),
                max: Duration::from_millis(self.delay_max_ms.max(self.delay_min_ms)),
            },
        }
    }

    pub fn http_session(&self) -> HttpSessionConfig {
        HttpSessionConfig {
            timeout: Duration::from_secs(self.navigation_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    /// `None` when spreadsheet credentials are not configured.
    pub fn remote_store(&self) -> Result<Option<Arc<dyn RemoteStore>>> {
        match &self.sheets {
            Some(sheets) => {
                let store = SheetsRemoteStore::new(sheets.clone())?;
                Ok(Some(Arc::new(store)))
            }
            None => {
                warn!("SHEETS_SPREADSHEET_ID / SHEETS_ACCESS_TOKEN unset; remote store disabled");
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PlanFile {
    search_locations: Vec<String>,
    #[serde(default)]
    locations: LocationRule,
    #[serde(default)]
    freshness: FreshnessWindow,
    #[serde(default)]
    experience: ExperienceRule,
    sources: Vec<SourceEntry>,
    categories: Vec<CategoryFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryFile {
    tag: String,
    #[serde(default)]
    remote_target: Option<String>,
    roles: Vec<String>,
    #[serde(default)]
    facet_filter: Option<String>,
    title: TitleRule,
    #[serde(default)]
    allowed_locations: Option<Vec<String>>,
    #[serde(default)]
    experience: Option<ExperienceRule>,
}

/// Fully resolved, immutable run plan.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub search_locations: Vec<String>,
    pub freshness: FreshnessWindow,
    pub sources: Vec<SourceEntry>,
    pub categories: Vec<CategoryConfig>,
}

/// Literal target name, or `${VAR}` looked up once; unset/blank means unconfigured.
fn resolve_target(raw: Option<&str>, lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    let resolved = match raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        Some(var) => lookup(var.trim())?,
        None => raw.to_string(),
    };
    let resolved = resolved.trim().to_string();
    (!resolved.is_empty()).then_some(resolved)
}

impl PipelinePlan {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text, |key| std::env::var(key).ok())
            .with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file: PlanFile = serde_yaml::from_str(text).context("decoding category plan")?;
        ensure!(!file.search_locations.is_empty(), "search_locations must not be empty");

        let mut tags = HashSet::new();
        let mut categories = Vec::with_capacity(file.categories.len());
        for category in file.categories {
            ensure!(
                tags.insert(category.tag.clone()),
                "duplicate category tag {:?}",
                category.tag
            );
            if category.roles.is_empty() {
                warn!(category = %category.tag, "category has no role terms; it will never fetch");
            }
            let remote_target = resolve_target(category.remote_target.as_deref(), &lookup);
            if remote_target.is_none() {
                warn!(category = %category.tag, "no remote target; rows will only reach the local cache");
            }
            let location = LocationRule {
                allowed: category
                    .allowed_locations
                    .unwrap_or_else(|| file.locations.allowed.clone()),
                denied: file.locations.denied.clone(),
            };
            categories.push(CategoryConfig {
                tag: category.tag,
                remote_target,
                roles: category.roles,
                facet_filter: category.facet_filter.filter(|f| !f.trim().is_empty()),
                policy: CategoryPolicy {
                    title: category.title,
                    location,
                    experience: category.experience.unwrap_or_else(|| file.experience.clone()),
                },
            });
        }

        Ok(Self {
            search_locations: file.search_locations,
            freshness: file.freshness,
            sources: file.sources,
            categories,
        })
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceEntry> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const PLAN: &str = r#"
search_locations: [Chennai]
locations:
  allowed: [chennai, bengaluru, remote]
  denied: [london, united states]
freshness:
  max_age_hours: 24
experience:
  target_min: 2
  target_max: 3
sources:
  - platform: naukri
    kind: templated_search
    search_url: "https://jobs.example.com/{role}-jobs-in-{location}"
    next_page_selector: a.next
    max_pages: 2
    listing:
      card: div.job
      title: a.title
      company: .company
      location: .loc
      experience: .exp
      posted_date: .posted
      link: a.title
  - platform: linkedin
    enabled: false
    kind: keyword_geo
    base_url: "https://www.linkedin.com/jobs/search"
    listing:
      card: li
      title: h3
      link: a
categories:
  - tag: frontend
    remote_target: "${FRONTEND_SHEET}"
    roles: [Frontend Developer]
    title:
      valid: [frontend, front end, react]
      excluded: [lead, intern]
  - tag: design
    remote_target: Design
    roles: [UI UX Designer]
    facet_filter: "UX, Design"
    allowed_locations: [bengaluru]
    experience:
      target_min: 1
      target_max: 4
    title:
      valid: [ui, ux]
      excluded: [manager]
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn plan_resolves_targets_and_policy_overrides() {
        let plan = PipelinePlan::from_yaml_str(PLAN, env(&[("FRONTEND_SHEET", "Frontend Jobs")])).unwrap();
        assert_eq!(plan.categories.len(), 2);
        assert_eq!(plan.enabled_sources().count(), 1);

        let frontend = &plan.categories[0];
        assert_eq!(frontend.remote_target.as_deref(), Some("Frontend Jobs"));
        assert_eq!(frontend.policy.location.allowed, vec!["chennai", "bengaluru", "remote"]);
        assert_eq!(frontend.policy.experience.target_max, 3);
        assert!(frontend.validate_title("React Frontend Engineer"));

        let design = &plan.categories[1];
        assert_eq!(design.remote_target.as_deref(), Some("Design"));
        assert_eq!(design.facet_filter.as_deref(), Some("UX, Design"));
        assert_eq!(design.policy.location.allowed, vec!["bengaluru"]);
        assert_eq!(design.policy.location.denied, vec!["london", "united states"]);
        assert_eq!(design.policy.experience.target_min, 1);
        assert!(!design.validate_title("UI Manager"));
    }

    #[test]
    fn unset_env_target_means_unconfigured() {
        let plan = PipelinePlan::from_yaml_str(PLAN, env(&[])).unwrap();
        assert_eq!(plan.categories[0].remote_target, None);
    }

    #[test]
    fn duplicate_category_tags_are_rejected() {
        let text = PLAN.replace("tag: design", "tag: frontend");
        assert!(PipelinePlan::from_yaml_str(&text, env(&[])).is_err());
    }

    #[test]
    fn config_reads_sheets_only_with_full_credentials() {
        let config = SyncConfig::from_lookup(env(&[("SHEETS_SPREADSHEET_ID", "abc")]));
        assert!(config.sheets.is_none());
        assert_eq!(config.cache_path, PathBuf::from("./data/jobs_cache.json"));

        let config = SyncConfig::from_lookup(env(&[
            ("SHEETS_SPREADSHEET_ID", "abc"),
            ("SHEETS_ACCESS_TOKEN", "tok"),
            ("JOBSYNC_SCHEDULE_MINUTE", "75"),
            ("JOBSYNC_DELAY_MIN_MS", "500"),
            ("JOBSYNC_DELAY_MAX_MS", "100"),
        ]));
        let sheets = config.sheets.as_ref().unwrap();
        assert_eq!(sheets.spreadsheet_id, "abc");
        assert_eq!(sheets.api_base, SheetsClientConfig::DEFAULT_API_BASE);
        assert_eq!(config.schedule_minute, 59);
        let runtime = config.adapter_runtime();
        assert_eq!(runtime.delay.min, runtime.delay.max);
    }
}
