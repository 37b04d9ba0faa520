use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use teloxide::types::UserId;
use tokio::sync::Mutex;

/// What the next plain text message from a user is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKind {
    AddLink,
    CheckLink,
    ReportLink,
}

impl PendingKind {
    /// Text to prompt the user with.
    #[must_use]
    pub fn prompt(self) -> &'static str {
        match self {
            PendingKind::AddLink => "🔗 Send me the link you want to <b>add</b>.",
            PendingKind::CheckLink => "🔍 Send me the link you want to <b>check</b>.",
            PendingKind::ReportLink => concat!(
                "🚨 Send me the link you want to <b>report</b>, ",
                "optionally with a reason after a <code>|</code>, like this:\n",
                "<code>https://example.com | fake giveaway</code>"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInput {
    pub kind: PendingKind,
    pub expires_at: DateTime<Utc>,
}

/// At most one [`PendingInput`] per user, each of which expires on its own.
pub struct PendingInputs {
    inputs: Mutex<HashMap<UserId, PendingInput>>,
    ttl: chrono::Duration,
}

impl PendingInputs {
    /// Timeouts too long to be a date offset are treated as "forever".
    #[must_use]
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(PendingInputs {
            inputs: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        })
    }

    /// Start waiting for this user's next message, replacing anything
    /// that was waited on before.
    pub async fn begin(&self, user: UserId, kind: PendingKind) -> PendingInput {
        self.begin_at(user, kind, Utc::now()).await
    }

    async fn begin_at(&self, user: UserId, kind: PendingKind, now: DateTime<Utc>) -> PendingInput {
        let input = PendingInput {
            kind,
            expires_at: now
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.inputs.lock().await.insert(user, input);
        input
    }

    /// Remove and return what this user's message is expected to be.
    /// Returns [`None`] if nothing was expected or it has expired.
    pub async fn take(&self, user: UserId) -> Option<PendingInput> {
        self.take_at(user, Utc::now()).await
    }

    async fn take_at(&self, user: UserId, now: DateTime<Utc>) -> Option<PendingInput> {
        self.inputs
            .lock()
            .await
            .remove(&user)
            .filter(|input| now <= input.expires_at)
    }

    /// Stop waiting for this user. Returns `true` if anything unexpired
    /// was being waited on.
    pub async fn cancel(&self, user: UserId) -> bool {
        self.take(user).await.is_some()
    }

    /// Forget all expired inputs. Returns how many were dropped.
    pub async fn prune(&self) -> usize {
        self.prune_at(Utc::now()).await
    }

    async fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let mut inputs = self.inputs.lock().await;
        let before = inputs.len();
        inputs.retain(|_, input| now <= input.expires_at);
        before - inputs.len()
    }
}

/// Periodically prune expired inputs until the registry is dropped.
pub async fn prune_pending_spinloop(pending: Weak<PendingInputs>) {
    use tokio::time::sleep;
    loop {
        let Some(pending) = pending.upgrade() else {
            // Everyone's gone home.
            return;
        };

        let pruned = pending.prune().await;
        if pruned > 0 {
            log::debug!("Pruned {pruned} expired pending inputs.");
        }

        drop(pending);
        sleep(Duration::from_secs(60)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);

    #[tokio::test]
    async fn consumed_once() {
        let pending = PendingInputs::new(Duration::from_secs(300));
        pending.begin(ALICE, PendingKind::AddLink).await;

        assert_eq!(pending.take(BOB).await, None);
        assert_eq!(
            pending.take(ALICE).await.map(|x| x.kind),
            Some(PendingKind::AddLink)
        );
        assert_eq!(pending.take(ALICE).await, None);
    }

    #[tokio::test]
    async fn later_begin_replaces_earlier() {
        let pending = PendingInputs::new(Duration::from_secs(300));
        pending.begin(ALICE, PendingKind::AddLink).await;
        pending.begin(ALICE, PendingKind::ReportLink).await;

        assert_eq!(
            pending.take(ALICE).await.map(|x| x.kind),
            Some(PendingKind::ReportLink)
        );
    }

    #[tokio::test]
    async fn expires() {
        let pending = PendingInputs::new(Duration::from_secs(60));
        let start = Utc::now();
        pending.begin_at(ALICE, PendingKind::CheckLink, start).await;
        pending.begin_at(BOB, PendingKind::CheckLink, start).await;

        let just_in_time = start + chrono::Duration::seconds(60);
        assert!(pending.take_at(BOB, just_in_time).await.is_some());

        let too_late = start + chrono::Duration::seconds(61);
        assert_eq!(pending.take_at(ALICE, too_late).await, None);
    }

    #[tokio::test]
    async fn huge_timeouts_never_expire() {
        let pending = PendingInputs::new(Duration::from_secs(9_000_000_000_000_000));
        let input = pending.begin(ALICE, PendingKind::AddLink).await;
        assert_eq!(input.expires_at, DateTime::<Utc>::MAX_UTC);

        let pending = PendingInputs::new(Duration::from_secs(u64::MAX));
        pending.begin(ALICE, PendingKind::ReportLink).await;
        assert_eq!(
            pending.take(ALICE).await.map(|x| x.kind),
            Some(PendingKind::ReportLink)
        );
    }

    #[tokio::test]
    async fn cancel_and_prune() {
        let pending = PendingInputs::new(Duration::from_secs(60));
        assert!(!pending.cancel(ALICE).await);

        pending.begin(ALICE, PendingKind::AddLink).await;
        assert!(pending.cancel(ALICE).await);
        assert_eq!(pending.take(ALICE).await, None);

        let start = Utc::now();
        pending.begin_at(ALICE, PendingKind::AddLink, start).await;
        pending
            .begin_at(BOB, PendingKind::AddLink, start + chrono::Duration::seconds(120))
            .await;
        assert_eq!(
            pending
                .prune_at(start + chrono::Duration::seconds(90))
                .await,
            1
        );
        assert!(pending
            .take_at(BOB, start + chrono::Duration::seconds(90))
            .await
            .is_some());
    }
}
