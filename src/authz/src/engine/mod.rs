//! Authorization engine
//!
//! Answers "is this action allowed" and "which fields apply" for a subject's
//! role claims, against the rule snapshot installed at call time.
//!
//! ```text
//! roles → DecisionCache ─miss→ PermissionCalculator → EffectivePermissionSet
//!              ↑                 (RoleCatalog + RuleSnapshot)        ↓
//!      generation of the                                 check / fields / regions
//!      installed snapshot                                          ↓
//!                                                              [Metrics]
//! ```
//!
//! Decision calls never fail: malformed input denies and is logged under the
//! `authz::config_defect` target, apart from ordinary denials.

pub mod cache;
pub mod decision;
mod fields;
pub mod metrics;

pub use cache::{CacheConfig, CacheStats, DecisionCache};
pub use decision::{AuthDecision, DecisionReason};
pub use metrics::{EngineMetrics, MetricsCollector};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::permissions::{EffectivePermissionSet, PermissionCalculator};
use crate::region::{AccessibleRegions, RegionMapper};
use crate::rules::source::env_parse;
use crate::rules::{RefreshOutcome, RuleConfigSource, RuleFetcher, RuleSourceConfig};
use crate::types::{AccessRequest, Action, FieldClass, RecordContext, Resource, Subject};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Enable the permission-set cache
    pub enable_cache: bool,

    /// Cache configuration
    pub cache_config: CacheConfig,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Rule source refresh settings
    pub rule_source: RuleSourceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_config: CacheConfig::default(),
            enable_metrics: true,
            rule_source: RuleSourceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `AUTHZ_CACHE_ENABLED`, `AUTHZ_CACHE_CAPACITY`
    /// and the rule source variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enable_cache: env_parse("AUTHZ_CACHE_ENABLED").unwrap_or(defaults.enable_cache),
            cache_config: CacheConfig {
                capacity: env_parse("AUTHZ_CACHE_CAPACITY").unwrap_or(defaults.cache_config.capacity),
            },
            enable_metrics: defaults.enable_metrics,
            rule_source: RuleSourceConfig::from_env(),
        }
    }

    /// Same configuration with the cache switched off
    pub fn without_cache(mut self) -> Self {
        self.enable_cache = false;
        self
    }
}

/// Public-facing evaluator
pub struct AuthorizationEngine {
    calculator: PermissionCalculator,

    /// Permission sets per role combination
    cache: Option<DecisionCache>,

    metrics: Option<Arc<MetricsCollector>>,
}

impl AuthorizationEngine {
    /// Create an engine reading rules from `source`
    pub fn new(config: EngineConfig, source: Arc<RuleConfigSource>) -> Self {
        let cache = config
            .enable_cache
            .then(|| DecisionCache::new(config.cache_config.clone()));

        let metrics = config.enable_metrics.then(|| Arc::new(MetricsCollector::new()));

        info!(
            "AuthorizationEngine initialized with cache={}, metrics={}",
            config.enable_cache, config.enable_metrics
        );

        Self {
            calculator: PermissionCalculator::new(source),
            cache,
            metrics,
        }
    }

    /// Create an engine with its own rule source around `fetcher`
    pub fn with_fetcher(config: EngineConfig, fetcher: Arc<dyn RuleFetcher>) -> Self {
        let source = Arc::new(RuleConfigSource::new(fetcher, config.rule_source.clone()));
        Self::new(config, source)
    }

    pub fn rule_source(&self) -> &Arc<RuleConfigSource> {
        self.calculator.source()
    }

    /// Refresh the rule snapshot now
    ///
    /// Cached permission sets from the previous generation are dropped on the
    /// next lookup.
    pub async fn refresh_rules(&self) -> Result<RefreshOutcome> {
        let outcome = self.rule_source().refresh().await;
        self.sync_refresh_stats();
        outcome
    }

    /// Start the background refresh loop of the rule source
    pub fn spawn_refresh_loop(&self) -> JoinHandle<()> {
        self.rule_source().spawn_refresh_loop()
    }

    /// Effective permissions for a role list
    pub fn permissions<S: AsRef<str>>(&self, roles: &[S]) -> Arc<EffectivePermissionSet> {
        self.resolve(roles).0
    }

    /// Permission set and the snapshot generation it was computed against
    fn resolve<S: AsRef<str>>(&self, roles: &[S]) -> (Arc<EffectivePermissionSet>, u64) {
        let snapshot = self.rule_source().current_snapshot();
        let generation = snapshot.generation();

        let Some(cache) = &self.cache else {
            return (Arc::new(PermissionCalculator::calculate_with(roles, &snapshot)), generation);
        };

        let key = DecisionCache::key_for(roles);
        if let Some(set) = cache.get(&key, generation) {
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_hit();
            }
            return (set, generation);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss();
        }

        let set = Arc::new(PermissionCalculator::calculate_with(roles, &snapshot));
        cache.put(key, Arc::clone(&set), generation);
        (set, generation)
    }

    /// Typed access check
    pub fn check(&self, subject: &Subject, request: &AccessRequest) -> AuthDecision {
        let start = Instant::now();
        let (perms, generation) = self.resolve(subject.roles.as_slice());

        let decision = match perms.allows(request.resource, request.action, request.region, subject.is_own_record) {
            Some(scope) => AuthDecision::allow(scope, generation),
            None => AuthDecision::deny(DecisionReason::NoMatchingGrant, generation),
        };

        debug!(
            resource = %request.resource,
            action = %request.action,
            region = request.region.map(|r| r.id()).unwrap_or("-"),
            allowed = decision.allowed,
            "Access check"
        );

        self.finish(decision, start)
    }

    /// Access check from caller-supplied strings
    ///
    /// Unknown resource, action or region names deny with a reason that
    /// marks them as caller defects.
    pub fn authorize(&self, subject: &Subject, resource: &str, action: &str, region: Option<&str>) -> AuthDecision {
        let resource_type = match resource.parse::<Resource>() {
            Ok(r) => r,
            Err(_) => {
                return self.defect(DecisionReason::UnknownResource {
                    resource: resource.to_string(),
                })
            }
        };
        let action_type = match action.parse::<Action>() {
            Ok(a) => a,
            Err(_) => {
                return self.defect(DecisionReason::UnknownAction {
                    action: action.to_string(),
                })
            }
        };

        let mut request = AccessRequest::new(resource_type, action_type);
        if let Some(raw) = region {
            match RegionMapper::parse_region(raw) {
                Some(token) => request = request.in_region(token),
                None => {
                    return self.defect(DecisionReason::InvalidRegion {
                        region: raw.to_string(),
                    })
                }
            }
        }

        self.check(subject, &request)
    }

    /// Whether `subject` may perform `action` on `resource`, optionally in a region
    pub fn can_perform(&self, subject: &Subject, resource: &str, action: &str, region: Option<&str>) -> bool {
        self.authorize(subject, resource, action, region).allowed
    }

    /// Typed field-class visibility check
    pub fn is_field_visible(
        &self,
        subject: &Subject,
        resource: Resource,
        field_class: FieldClass,
        record: &RecordContext,
    ) -> bool {
        let start = Instant::now();
        let (perms, _) = self.resolve(subject.roles.as_slice());
        let own = subject.is_own_record || record.is_own_record;

        let visible = fields::is_visible(&perms, own, resource, field_class, record);
        debug!(resource = %resource, field_class = %field_class, visible, "Field visibility");

        self.record(visible, start);
        visible
    }

    /// Field-class visibility from caller-supplied strings
    pub fn field_visibility(
        &self,
        subject: &Subject,
        resource: &str,
        field_class: &str,
        record: &RecordContext,
    ) -> bool {
        let resource_type = match resource.parse::<Resource>() {
            Ok(r) => r,
            Err(_) => {
                return self
                    .defect(DecisionReason::UnknownResource {
                        resource: resource.to_string(),
                    })
                    .allowed
            }
        };
        let class = match field_class.parse::<FieldClass>() {
            Ok(c) => c,
            Err(_) => {
                return self
                    .defect(DecisionReason::UnknownFieldClass {
                        field_class: field_class.to_string(),
                    })
                    .allowed
            }
        };

        self.is_field_visible(subject, resource_type, class, record)
    }

    /// Every field class the subject may see on the record
    pub fn visible_field_classes(
        &self,
        subject: &Subject,
        resource: Resource,
        record: &RecordContext,
    ) -> BTreeSet<FieldClass> {
        let (perms, _) = self.resolve(subject.roles.as_slice());
        let own = subject.is_own_record || record.is_own_record;

        FieldClass::ALL
            .into_iter()
            .filter(|class| fields::is_visible(&perms, own, resource, *class, record))
            .collect()
    }

    /// Whether the subject may change fields of this class on the record
    pub fn is_field_editable(
        &self,
        subject: &Subject,
        resource: Resource,
        field_class: FieldClass,
        record: &RecordContext,
    ) -> bool {
        let start = Instant::now();
        let (perms, _) = self.resolve(subject.roles.as_slice());
        let own = subject.is_own_record || record.is_own_record;

        let editable = fields::is_editable(&perms, own, resource, field_class, record);
        debug!(resource = %resource, field_class = %field_class, editable, "Field editability");

        self.record(editable, start);
        editable
    }

    /// Regions the subject may scope queries to
    pub fn accessible_regions(&self, subject: &Subject) -> AccessibleRegions {
        self.permissions(subject.roles.as_slice()).accessible_regions()
    }

    /// Drop every cached permission set
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
            info!("Permission cache invalidated");
        }
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecisionCache::stats)
    }

    /// Get engine metrics
    pub fn metrics(&self) -> Option<EngineMetrics> {
        self.sync_refresh_stats();
        self.metrics.as_ref().map(|m| m.get_metrics())
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> Option<String> {
        self.sync_refresh_stats();
        self.metrics.as_ref().map(|m| m.export_prometheus())
    }

    fn sync_refresh_stats(&self) {
        if let Some(metrics) = &self.metrics {
            let stats = self.rule_source().stats();
            metrics.record_refresh_stats(stats.successes, stats.failures);
        }
    }

    fn defect(&self, reason: DecisionReason) -> AuthDecision {
        warn!(target: "authz::config_defect", reason = ?reason, "Denied malformed authorization request");
        if let Some(metrics) = &self.metrics {
            metrics.record_config_defect();
            metrics.record_decision(false);
        }
        AuthDecision::deny(reason, self.rule_source().generation())
    }

    fn finish(&self, decision: AuthDecision, start: Instant) -> AuthDecision {
        self.record(decision.allowed, start);
        decision
    }

    fn record(&self, allowed: bool, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_latency(start.elapsed());
            metrics.record_decision(allowed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use crate::rules::{RuleConfigEntry, StaticRuleFetcher};
    use crate::types::Scope;

    fn engine_with(entries: Vec<RuleConfigEntry>) -> (AuthorizationEngine, Arc<StaticRuleFetcher>) {
        let fetcher = Arc::new(StaticRuleFetcher::new(entries));
        let engine = AuthorizationEngine::with_fetcher(EngineConfig::default(), fetcher.clone());
        (engine, fetcher)
    }

    #[test]
    fn test_engine_creation() {
        let (engine, _) = engine_with(Vec::new());
        assert!(engine.cache.is_some());
        assert!(engine.metrics.is_some());

        let bare = AuthorizationEngine::with_fetcher(
            EngineConfig::default().without_cache(),
            Arc::new(StaticRuleFetcher::unavailable()),
        );
        assert!(bare.cache_stats().is_none());
    }

    #[tokio::test]
    async fn test_check_reports_scope_and_generation() {
        let (engine, _) = engine_with(Vec::new());
        engine.refresh_rules().await.unwrap();

        let subject = Subject::new(["Members_CRUD", "Regio_Utrecht"]);
        let decision = engine.check(
            &subject,
            &AccessRequest::new(Resource::Members, Action::Write).in_region(Region::Utrecht),
        );

        assert!(decision.allowed);
        assert_eq!(decision.generation, 1);
        assert_eq!(
            decision.reason,
            DecisionReason::Granted {
                scope: Scope::Region(Region::Utrecht.into())
            }
        );
    }

    #[test]
    fn test_malformed_input_is_a_defect() {
        let (engine, _) = engine_with(Vec::new());
        let admin = Subject::new(["hdcnAdmins", "Regio_All"]);

        let decision = engine.authorize(&admin, "memebrs", "read", None);
        assert!(!decision.allowed);
        assert!(decision.is_config_defect());

        assert!(!engine.can_perform(&admin, "members", "delete", None));
        assert!(!engine.can_perform(&admin, "members", "read", Some("mars")));
        assert!(!engine.can_perform(&admin, "members", "read", Some("Utrecht")));
        assert!(!engine.field_visibility(&admin, "members", "shoe_size", &RecordContext::new()));
        assert!(engine.can_perform(&admin, "members", "read", Some("utrecht")));

        let metrics = engine.metrics().unwrap();
        assert_eq!(metrics.config_defects, 5);
        assert_eq!(metrics.allowed_decisions, 1);
    }

    #[test]
    fn test_empty_roles_mean_no_permissions() {
        let (engine, _) = engine_with(Vec::new());
        let nobody = Subject::default();

        for resource in Resource::ALL {
            assert!(!engine.can_perform(&nobody, resource.as_str(), "read", None));
        }
        assert!(engine.accessible_regions(&nobody).is_empty());
        assert!(engine
            .visible_field_classes(&nobody, Resource::Members, &RecordContext::new())
            .is_empty());
    }

    #[tokio::test]
    async fn test_cache_follows_snapshot_generation() {
        let (engine, fetcher) = engine_with(Vec::new());
        engine.refresh_rules().await.unwrap();

        let subject = Subject::new(["Events_Read"]);
        assert!(!engine.can_perform(&subject, "events", "read", None));
        assert!(!engine.can_perform(&subject, "events", "read", None));
        assert_eq!(engine.cache_stats().unwrap().hits, 1);

        fetcher.set_entries(vec![RuleConfigEntry::new("events", "read", ["Events_*"])]);
        engine.refresh_rules().await.unwrap();

        assert!(engine.can_perform(&subject, "events", "read", None));
        assert!(engine.cache_stats().unwrap().invalidations >= 1);
    }

    #[test]
    fn test_visible_field_classes() {
        let (engine, _) = engine_with(Vec::new());
        let subject = Subject::new(["Members_Read", "Regio_Limburg"]);
        let record = RecordContext::new()
            .with_region("Limburg")
            .with_membership_type("Donateur zonder motor");

        let classes = engine.visible_field_classes(&subject, Resource::Members, &record);
        assert_eq!(
            classes.into_iter().collect::<Vec<_>>(),
            vec![FieldClass::Personal, FieldClass::Address, FieldClass::Membership]
        );
    }

    #[test]
    fn test_prometheus_export_includes_refresh_counters() {
        let (engine, _) = engine_with(Vec::new());
        let export = engine.export_prometheus().unwrap();
        assert!(export.contains("authz_rule_refresh_total"));
    }
}
