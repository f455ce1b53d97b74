//! The slice of configuration the proxy's backend depends on.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::{BackendKind, CoordinatorConfig, Settings};

/// Backend-relevant settings captured at connect time.
///
/// Two snapshots differ only when reconnecting would produce a different
/// backend: the wrapped kind, the cache directory, the endpoint set or the
/// connect timeout. Per-operation deadlines are read live and never force a
/// rebuild.
#[derive(Debug, Clone)]
pub struct BackendSnapshot {
    pub kind: BackendKind,
    pub dir: PathBuf,
    pub params: CoordinatorConfig,
}

impl BackendSnapshot {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            kind: settings.discovery_proxy.connection,
            dir: settings.discovery_proxy.dir.clone(),
            params: settings.coordinator.clone(),
        }
    }

    pub fn differs_from(&self, other: &BackendSnapshot) -> bool {
        self.kind != other.kind
            || self.dir != other.dir
            || self.params.connect_timeout_ms != other.params.connect_timeout_ms
            || endpoint_set(&self.params) != endpoint_set(&other.params)
    }
}

fn endpoint_set(params: &CoordinatorConfig) -> BTreeSet<&str> {
    params.endpoints.iter().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmonitored_fields_do_not_differ() {
        let base = Settings::default();
        let mut changed = base.clone();
        changed.health.interval_ms = 1;
        changed.observability.log_level = "trace".into();
        changed.coordinator.op_timeout_ms = 42;
        changed.discovery_proxy.poll_interval_ms = 10;

        let a = BackendSnapshot::from_settings(&base);
        let b = BackendSnapshot::from_settings(&changed);
        assert!(!a.differs_from(&b));
    }

    #[test]
    fn test_endpoint_order_is_ignored() {
        let mut one = Settings::default();
        one.coordinator.endpoints = vec!["10.0.0.10:2379".into(), "10.0.0.11:2379".into()];
        let mut two = one.clone();
        two.coordinator.endpoints.reverse();

        assert!(!BackendSnapshot::from_settings(&one)
            .differs_from(&BackendSnapshot::from_settings(&two)));
    }

    #[test]
    fn test_monitored_fields_differ() {
        let base = Settings::default();
        let a = BackendSnapshot::from_settings(&base);

        let mut endpoints = base.clone();
        endpoints.coordinator.endpoints = vec!["10.0.0.99:2379".into()];
        assert!(a.differs_from(&BackendSnapshot::from_settings(&endpoints)));

        let mut dir = base.clone();
        dir.discovery_proxy.dir = PathBuf::from("/var/cache/other");
        assert!(a.differs_from(&BackendSnapshot::from_settings(&dir)));

        let mut kind = base.clone();
        kind.discovery_proxy.connection = BackendKind::Etcd;
        assert!(a.differs_from(&BackendSnapshot::from_settings(&kind)));

        let mut connect = base;
        connect.coordinator.connect_timeout_ms = 1;
        assert!(a.differs_from(&BackendSnapshot::from_settings(&connect)));
    }
}
