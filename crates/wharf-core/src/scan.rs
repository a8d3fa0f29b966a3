//! Scan Gate: the vulnerability-decision table that admits or blocks a
//! digest from being served, backed by the decisions embedded in the
//! Cache Metadata Journal's `state.json`.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use wharf_db::{ActivityLogQuery, Database, NewActivityLogEntry};

use crate::error::CoreError;
use crate::journal::{Journal, ScanDecision, ScanResult, ScanStatus};

/// Minimum digest-prefix length accepted by prefix lookups, matching the
/// shortest prefix Docker CLIs commonly display.
pub const MIN_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmitPendingPolicy {
    Deny,
    Allow,
    AllowIfNoCriticals,
}

impl Default for AdmitPendingPolicy {
    fn default() -> Self {
        Self::Deny
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScanGatePolicy {
    pub admit_pending_on_pull: AdmitPendingPolicy,
    pub default_approval_ttl_days: i64,
}

impl Default for ScanGatePolicy {
    fn default() -> Self {
        Self {
            admit_pending_on_pull: AdmitPendingPolicy::default(),
            default_approval_ttl_days: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Pending,
    Denied,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub pending: usize,
    pub approved: usize,
    pub denied: usize,
    pub critical: u32,
    pub high: u32,
}

pub struct ScanGate {
    journal: Arc<Journal>,
    db: Database,
    policy: ScanGatePolicy,
}

impl ScanGate {
    pub fn new(journal: Arc<Journal>, db: Database, policy: ScanGatePolicy) -> Self {
        Self { journal, db, policy }
    }

    /// Read-only verdict for a digest. An expired `approved` decision is
    /// downgraded to `pending` as a side effect.
    pub async fn decide(&self, digest: &str) -> Decision {
        let Some(decision) = self.journal.get_decision(digest).await else {
            return Decision::Pending;
        };

        match decision.status {
            ScanStatus::Denied => Decision::Denied,
            ScanStatus::Pending => Decision::Pending,
            ScanStatus::Approved => {
                if decision.expires_at.is_some_and(|exp| exp < Utc::now()) {
                    let mut downgraded = decision;
                    downgraded.status = ScanStatus::Pending;
                    let _ = self.journal.upsert_decision(downgraded).await;
                    Decision::Pending
                } else {
                    Decision::Approved
                }
            }
        }
    }

    /// The most recent scan result recorded for a digest, if any.
    pub async fn get_result(&self, digest: &str) -> Option<ScanResult> {
        self.journal.get_decision(digest).await.and_then(|d| d.scan_result)
    }

    /// Whether a pending digest may be served given the current policy and
    /// its worst known severity.
    pub fn admits_pending(&self, result: Option<&ScanResult>) -> bool {
        match self.policy.admit_pending_on_pull {
            AdmitPendingPolicy::Deny => false,
            AdmitPendingPolicy::Allow => true,
            AdmitPendingPolicy::AllowIfNoCriticals => {
                result.is_none_or(|r| r.critical == 0)
            }
        }
    }

    /// Record a scan result, creating a `pending` decision if none exists.
    pub async fn submit(
        &self,
        digest: &str,
        image_name: &str,
        tag: &str,
        result: ScanResult,
    ) -> Result<(), CoreError> {
        let mut decision = self.journal.get_decision(digest).await.unwrap_or(ScanDecision {
            digest: digest.to_string(),
            image_name: image_name.to_string(),
            tag: tag.to_string(),
            status: ScanStatus::Pending,
            reason: None,
            decided_by: None,
            decided_at: None,
            expires_at: None,
            scan_result: None,
        });
        decision.scan_result = Some(result);
        self.journal.upsert_decision(decision).await
    }

    pub async fn approve(
        &self,
        digest: &str,
        reason: Option<String>,
        by: &str,
        expires_in_days: Option<i64>,
    ) -> Result<(), CoreError> {
        let mut decision = self.require_decision(digest).await?;
        decision.status = ScanStatus::Approved;
        decision.reason = reason.clone();
        decision.decided_by = Some(by.to_string());
        decision.decided_at = Some(Utc::now());
        let ttl = expires_in_days.unwrap_or(self.policy.default_approval_ttl_days);
        decision.expires_at = Some(Utc::now() + chrono::Duration::days(ttl));
        self.journal.upsert_decision(decision).await?;

        self.log_decision("scan.approve", digest, by, reason.as_deref()).await;
        Ok(())
    }

    pub async fn deny(&self, digest: &str, reason: Option<String>, by: &str) -> Result<(), CoreError> {
        let mut decision = self.require_decision(digest).await?;
        decision.status = ScanStatus::Denied;
        decision.reason = reason.clone();
        decision.decided_by = Some(by.to_string());
        decision.decided_at = Some(Utc::now());
        decision.expires_at = None;
        self.journal.upsert_decision(decision).await?;

        self.log_decision("scan.deny", digest, by, reason.as_deref()).await;
        Ok(())
    }

    pub async fn reset(&self, digest: &str, by: &str) -> Result<(), CoreError> {
        self.journal.remove_decision(digest).await?;
        self.log_decision("scan.reset", digest, by, None).await;
        Ok(())
    }

    pub async fn summary(&self) -> ScanSummary {
        let decisions = self.journal.list_decisions().await;
        let mut summary = ScanSummary::default();
        for d in &decisions {
            match d.status {
                ScanStatus::Pending => summary.pending += 1,
                ScanStatus::Approved => summary.approved += 1,
                ScanStatus::Denied => summary.denied += 1,
            }
            if let Some(result) = &d.scan_result {
                summary.critical += result.critical;
                summary.high += result.high;
            }
        }
        summary
    }

    pub async fn pending(&self) -> Vec<ScanDecision> {
        self.journal
            .list_decisions()
            .await
            .into_iter()
            .filter(|d| d.status == ScanStatus::Pending)
            .collect()
    }

    pub async fn all(&self) -> Vec<ScanDecision> {
        self.journal.list_decisions().await
    }

    /// Resolve a (possibly abbreviated) digest prefix to exactly one
    /// decision, failing `Ambiguous` on multiple matches.
    pub async fn report(&self, digest_prefix: &str) -> Result<ScanDecision, CoreError> {
        self.require_decision(digest_prefix).await
    }

    async fn require_decision(&self, digest_prefix: &str) -> Result<ScanDecision, CoreError> {
        if digest_prefix.len() < MIN_PREFIX_LEN {
            return Err(CoreError::BadRequest(format!(
                "digest prefix must be at least {MIN_PREFIX_LEN} characters"
            )));
        }

        if let Some(exact) = self.journal.get_decision(digest_prefix).await {
            return Ok(exact);
        }

        let mut matches = self.journal.find_decisions_by_prefix(digest_prefix).await;
        match matches.len() {
            0 => Err(CoreError::NotFound(digest_prefix.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(CoreError::Ambiguous(digest_prefix.to_string())),
        }
    }

    async fn log_decision(&self, action: &str, digest: &str, by: &str, reason: Option<&str>) {
        let entry = NewActivityLogEntry {
            action: action.to_string(),
            resource_type: "scan_decision".to_string(),
            resource_id: Some(digest.to_string()),
            user_id: None,
            username: Some(by.to_string()),
            details: reason.map(|r| r.to_string()),
        };
        if let Err(e) = self.db.insert_activity_log(entry).await {
            tracing::warn!(error = %e, "failed to record scan decision in activity log");
        }
    }
}

/// Re-exported for callers that need to page through the activity log
/// entries a scan decision produced.
pub type ScanActivityQuery = ActivityLogQuery;

#[cfg(test)]
mod tests {
    use super::*;
    use wharf_storage::PathResolver;

    async fn gate(policy: ScanGatePolicy) -> (tempfile::TempDir, ScanGate) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        paths.ensure_layout().await.unwrap();
        let journal = Arc::new(Journal::load(paths, 10_000_000).await.unwrap());
        let db = Database::new("sqlite::memory:").await.unwrap();
        (dir, ScanGate::new(journal, db, policy))
    }

    #[tokio::test]
    async fn unknown_digest_is_pending() {
        let (_dir, gate) = gate(ScanGatePolicy::default()).await;
        assert_eq!(gate.decide("sha256:unseen").await, Decision::Pending);
    }

    #[tokio::test]
    async fn approve_then_deny_round_trips() {
        let (_dir, gate) = gate(ScanGatePolicy::default()).await;
        gate.submit(
            "sha256:abc123abc123",
            "library/nginx",
            "latest",
            ScanResult { critical: 0, high: 1, medium: 2, low: 0, scanned_at: Utc::now() },
        )
        .await
        .unwrap();
        assert_eq!(gate.decide("sha256:abc123abc123").await, Decision::Pending);

        gate.approve("sha256:abc123abc123", Some("looks fine".into()), "admin", None).await.unwrap();
        assert_eq!(gate.decide("sha256:abc123abc123").await, Decision::Approved);

        gate.deny("sha256:abc123abc123", Some("reconsidered".into()), "admin").await.unwrap();
        assert_eq!(gate.decide("sha256:abc123abc123").await, Decision::Denied);
    }

    #[tokio::test]
    async fn expired_approval_downgrades_to_pending() {
        let (_dir, gate) = gate(ScanGatePolicy::default()).await;
        gate.submit(
            "sha256:expiredexpired",
            "library/nginx",
            "latest",
            ScanResult { critical: 0, high: 0, medium: 0, low: 0, scanned_at: Utc::now() },
        )
        .await
        .unwrap();
        gate.approve("sha256:expiredexpired", None, "admin", Some(-1)).await.unwrap();
        assert_eq!(gate.decide("sha256:expiredexpired").await, Decision::Pending);
    }

    #[tokio::test]
    async fn prefix_report_requires_minimum_length_and_detects_ambiguity() {
        let (_dir, gate) = gate(ScanGatePolicy::default()).await;
        assert!(gate.report("short").await.is_err());

        gate.submit("sha256:aaaaaaaaaaaa1111", "a", "1", ScanResult { critical: 0, high: 0, medium: 0, low: 0, scanned_at: Utc::now() }).await.unwrap();
        gate.submit("sha256:aaaaaaaaaaaa2222", "a", "2", ScanResult { critical: 0, high: 0, medium: 0, low: 0, scanned_at: Utc::now() }).await.unwrap();

        let result = gate.report("sha256:aaaaaaaaaaaa").await;
        assert!(matches!(result, Err(CoreError::Ambiguous(_))));
    }
}
