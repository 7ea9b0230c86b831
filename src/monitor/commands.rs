//! Operations behind the operator command surface.
//!
//! Target mutations are whole-collection load-modify-save sequences, like the
//! monitoring cycle itself.

use super::{Monitor, MonitorError};
use crate::db::{DbError, Target, TargetError};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),
    #[error("target already monitored: {0}")]
    Duplicate(String),
    #[error("target not found: {0}")]
    UnknownTarget(String),
    #[error(transparent)]
    Store(#[from] DbError),
}

impl Monitor {
    /// Validate and add a target.
    pub fn add_target(&self, raw: &str) -> Result<Target, CommandError> {
        let target = Target::parse(raw)?;
        let mut targets = self.store.list_targets()?;
        if targets.contains(&target) {
            return Err(CommandError::Duplicate(target.to_string()));
        }

        targets.push(target.clone());
        self.store.replace_targets(&targets)?;
        tracing::info!("Added target {}", target);
        Ok(target)
    }

    /// Remove a target together with its downtime state.
    pub fn remove_target(&self, raw: &str) -> Result<Target, CommandError> {
        let raw = raw.trim();
        let mut targets = self.store.list_targets()?;
        let Some(pos) = targets.iter().position(|t| t.as_str() == raw) else {
            return Err(CommandError::UnknownTarget(raw.to_string()));
        };
        let target = targets.remove(pos);
        self.store.replace_targets(&targets)?;

        let mut state = self.store.get_state()?;
        if state.remove(&target).is_some() {
            self.store.replace_state(&state)?;
        }

        tracing::info!("Removed target {}", target);
        Ok(target)
    }

    pub fn target_list(&self) -> Result<String, DbError> {
        let mut text = "🔗 Monitored sites:".to_string();
        for target in self.store.list_targets()? {
            text.push('\n');
            text.push_str(target.as_str());
        }
        Ok(text)
    }

    /// Run a fresh cycle, then render one line per target.
    pub async fn status_report(&self) -> Result<String, MonitorError> {
        self.run_cycle().await?;
        Ok(self.render_status()?)
    }

    /// Render the stored state without probing.
    pub fn render_status(&self) -> Result<String, DbError> {
        let state = self.store.get_state()?;
        let mut lines = vec!["🌐 Site status:".to_string()];

        for target in self.store.list_targets()? {
            match state.get(&target).and_then(|s| s.down_since) {
                Some(since) => lines.push(format!(
                    "🔴 {} — DOWN since {}",
                    target,
                    since.format("%Y-%m-%d (%H:%M)")
                )),
                None => lines.push(format!("🟢 {} — OK", target)),
            }
        }

        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DownState, Store};
    use crate::events::EventLogger;
    use crate::probe::{Availability, ProbeError};
    use crate::testing::RecordingNotifier;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    struct AlwaysUp;

    #[async_trait]
    impl Availability for AlwaysUp {
        async fn probe(&self, _target: &Target) -> Result<bool, ProbeError> {
            Ok(true)
        }
    }

    fn monitor() -> (NamedTempFile, Arc<Store>, Monitor) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let monitor = Monitor::new(
            store.clone(),
            Arc::new(AlwaysUp),
            Arc::new(RecordingNotifier::default()),
            EventLogger::new(store.clone()),
        );
        (tmp, store, monitor)
    }

    #[test]
    fn test_add_and_remove_targets() {
        let (_tmp, store, monitor) = monitor();

        monitor.add_target("https://b.example.com").unwrap();
        monitor.add_target("https://a.example.com").unwrap();
        assert!(matches!(
            monitor.add_target("https://a.example.com"),
            Err(CommandError::Duplicate(_))
        ));
        assert!(matches!(
            monitor.add_target("not-a-url"),
            Err(CommandError::InvalidTarget(_))
        ));
        assert_eq!(
            monitor.target_list().unwrap(),
            "🔗 Monitored sites:\nhttps://a.example.com\nhttps://b.example.com"
        );

        let mut state = HashMap::new();
        state.insert(
            Target::parse("https://a.example.com").unwrap(),
            DownState::down_since(Utc::now()),
        );
        store.replace_state(&state).unwrap();

        monitor.remove_target("https://a.example.com").unwrap();
        assert!(store.get_state().unwrap().is_empty());
        assert!(matches!(
            monitor.remove_target("https://a.example.com"),
            Err(CommandError::UnknownTarget(_))
        ));
        assert_eq!(store.list_targets().unwrap().len(), 1);
    }

    #[test]
    fn test_render_status() {
        let (_tmp, store, monitor) = monitor();
        monitor.add_target("https://down.example.com").unwrap();
        monitor.add_target("https://up.example.com").unwrap();

        let mut state = HashMap::new();
        state.insert(
            Target::parse("https://down.example.com").unwrap(),
            DownState::down_since(Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap()),
        );
        store.replace_state(&state).unwrap();

        assert_eq!(
            monitor.render_status().unwrap(),
            "🌐 Site status:\n\
             🔴 https://down.example.com — DOWN since 2024-02-03 (04:05)\n\
             🟢 https://up.example.com — OK"
        );
    }

    #[tokio::test]
    async fn test_status_report_refreshes_state() {
        let (_tmp, store, monitor) = monitor();
        monitor.add_target("https://x.example.com").unwrap();

        let mut state = HashMap::new();
        state.insert(
            Target::parse("https://x.example.com").unwrap(),
            DownState::down_since(Utc::now()),
        );
        store.replace_state(&state).unwrap();

        let report = monitor.status_report().await.unwrap();
        assert_eq!(report, "🌐 Site status:\n🟢 https://x.example.com — OK");
    }
}
