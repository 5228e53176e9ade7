//! Hands per-alert dispatch results off to the external alert store.

use crate::core::{AlertStore, DeliveryError, DispatchStatus};
use itertools::Itertools;
use std::collections::HashMap;
use tracing::debug;

/// Groups a pass's statuses by alert and records each group with the store.
///
/// A store failure is a pass-level error and propagates; the invoking
/// trigger may redeliver the whole batch.
pub async fn record_pass(
    store: &dyn AlertStore,
    statuses: Vec<DispatchStatus>,
) -> Result<(), DeliveryError> {
    let grouped: HashMap<String, Vec<DispatchStatus>> = statuses
        .into_iter()
        .into_group_map_by(|status| status.alert_id.clone());

    for (alert_id, group) in grouped {
        debug!(
            alert_id = %alert_id,
            statuses = group.len(),
            "recording dispatch statuses"
        );
        store
            .record_statuses(&alert_id, group)
            .await
            .map_err(|e| DeliveryError::Store(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use crate::core::Alert;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        recorded: Mutex<HashMap<String, Vec<DispatchStatus>>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl AlertStore for MemoryStore {
        async fn get_alert(&self, _alert_id: &str) -> Result<Option<Alert>> {
            Ok(None)
        }

        async fn record_statuses(
            &self,
            alert_id: &str,
            statuses: Vec<DispatchStatus>,
        ) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("store unavailable");
            }
            self.recorded
                .lock()
                .unwrap()
                .entry(alert_id.to_string())
                .or_default()
                .extend(statuses);
            Ok(())
        }
    }

    #[tokio::test]
    async fn statuses_are_recorded_once_per_alert() {
        let store = MemoryStore::default();
        let statuses = vec![
            DispatchStatus::terminal("a1", "o1", "x"),
            DispatchStatus::terminal("a2", "o1", "x"),
            DispatchStatus::terminal("a1", "o2", "x"),
        ];

        record_pass(&store, statuses).await.unwrap();

        let recorded = store.recorded.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded["a1"].len(), 2);
        assert_eq!(recorded["a2"].len(), 1);
    }

    #[tokio::test]
    async fn store_failure_propagates_as_a_pass_level_error() {
        let store = MemoryStore::default();
        store
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let statuses = vec![DispatchStatus::terminal("a1", "o1", "x")];

        let err = record_pass(&store, statuses).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Store(_)));
    }
}
