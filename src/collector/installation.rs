use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::stats::LabelCount;
use super::{settings, to_value, Collector, CollectorOpts};
use crate::management::types::{AuthConfig, Cluster, Driver, User};
use crate::management::{kind, list_as, ListOpts, ResourceClient};

pub const RECORD_KEY: &str = "install";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub uid: String,
    pub version: String,
    pub ui_default_landing: String,
    pub auth: LabelCount,
    pub users: LabelCount,
    pub node_drivers: LabelCount,
    pub kontainer_drivers: LabelCount,
    pub has_internal: bool,
}

/// Identity, version and enabled integrations of this installation.
pub struct InstallationCollector;

#[async_trait]
impl Collector for InstallationCollector {
    fn record_key(&self) -> &'static str {
        RECORD_KEY
    }

    async fn collect(&self, opts: &CollectorOpts) -> Option<Value> {
        debug!("Collecting Installation");
        let client = opts.client();

        let uid = settings::telemetry_uid(client).await.unwrap_or_else(|e| {
            error!("  Failed to get telemetry uid err={}", e);
            String::new()
        });

        let install = Installation {
            uid,
            version: settings::setting_or_default(client, settings::SERVER_VERSION_SETTING).await,
            ui_default_landing: settings::setting_or_default(
                client,
                settings::UI_DEFAULT_LANDING_SETTING,
            )
            .await,
            auth: auth_providers(client).await,
            users: user_providers(client).await,
            node_drivers: active_drivers(client, kind::NODE_DRIVERS).await,
            kontainer_drivers: active_drivers(client, kind::KONTAINER_DRIVERS).await,
            has_internal: has_internal_cluster(client).await,
        };

        to_value(RECORD_KEY, &install)
    }
}

async fn auth_providers(client: &dyn ResourceClient) -> LabelCount {
    let mut out = LabelCount::new();
    match list_as::<AuthConfig>(client, kind::AUTH_CONFIGS, &ListOpts::non_removed()).await {
        Ok(configs) => {
            for config in configs.iter().filter(|c| c.enabled) {
                out.increment(config.kind.strip_suffix("Config").unwrap_or(&config.kind));
            }
        }
        Err(e) => error!("  Failed to get authConfigs err={}", e),
    }
    out
}

/// Number of users per principal provider, each user counted once per provider.
async fn user_providers(client: &dyn ResourceClient) -> LabelCount {
    let mut out = LabelCount::new();
    match list_as::<User>(client, kind::USERS, &ListOpts::non_removed()).await {
        Ok(users) => {
            for user in users {
                let mut providers: Vec<&str> = user
                    .principal_ids
                    .iter()
                    .filter_map(|id| id.split_once("://").map(|(provider, _)| provider))
                    .collect();
                providers.sort_unstable();
                providers.dedup();
                for provider in providers {
                    out.increment(provider);
                }
            }
        }
        Err(e) => error!("  Failed to get users err={}", e),
    }
    out
}

async fn active_drivers(client: &dyn ResourceClient, kind: &str) -> LabelCount {
    let mut out = LabelCount::new();
    match list_as::<Driver>(client, kind, &ListOpts::non_removed()).await {
        Ok(drivers) => {
            for driver in drivers.iter().filter(|d| d.active) {
                out.increment(&driver.name);
            }
        }
        Err(e) => error!("  Failed to get {} err={}", kind, e),
    }
    out
}

async fn has_internal_cluster(client: &dyn ResourceClient) -> bool {
    match list_as::<Cluster>(client, kind::CLUSTERS, &ListOpts::non_removed()).await {
        Ok(clusters) => clusters.iter().any(|c| c.internal),
        Err(e) => {
            error!("  Failed to get clusters err={}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::settings::{
        SERVER_VERSION_SETTING, TELEMETRY_UID_SETTING, UI_DEFAULT_LANDING_SETTING,
    };
    use crate::management::mock::{MockClient, MockFactory};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn client() -> MockClient {
        MockClient::new("TEST_URL")
            .with_setting(SERVER_VERSION_SETTING, "SERVER_VERSION")
            .with_setting(TELEMETRY_UID_SETTING, "TELEMETRY_UID")
            .with_setting(UI_DEFAULT_LANDING_SETTING, "UI-DEFAULT-LANDING")
            .with_list(
                kind::AUTH_CONFIGS,
                r#"[
                    {"id": "authConfig1", "enabled": true, "type": "TEST1Config"},
                    {"id": "authConfig2", "enabled": false, "type": "TEST2Config"}
                ]"#,
            )
            .with_list(
                kind::USERS,
                r#"[{"id": "user1", "principalIds": ["id1://test", "id2://test", "id1://other"]}]"#,
            )
            .with_list(
                kind::NODE_DRIVERS,
                r#"[
                    {"id": "nd1", "active": true, "name": "NODE_DRIVER_TEST"},
                    {"id": "nd2", "active": false, "name": "INACTIVE"}
                ]"#,
            )
            .with_list(
                kind::KONTAINER_DRIVERS,
                r#"[{"id": "kd1", "active": true, "name": "KONTAINER_DRIVER_TEST"}]"#,
            )
            .with_list(kind::CLUSTERS, r#"[{"id": "cluster1", "internal": true}]"#)
    }

    async fn collect(client: MockClient) -> Installation {
        let opts = CollectorOpts::new(client.into_arc(), Arc::new(MockFactory::new()));
        let value = InstallationCollector.collect(&opts).await.unwrap();
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_installation_basic() {
        let install = collect(client()).await;

        assert_eq!(
            install,
            Installation {
                uid: "TELEMETRY_UID".to_string(),
                version: "SERVER_VERSION".to_string(),
                ui_default_landing: "UI-DEFAULT-LANDING".to_string(),
                auth: LabelCount::from([("TEST1", 1)]),
                users: LabelCount::from([("id1", 1), ("id2", 1)]),
                node_drivers: LabelCount::from([("NODE_DRIVER_TEST", 1)]),
                kontainer_drivers: LabelCount::from([("KONTAINER_DRIVER_TEST", 1)]),
                has_internal: true,
            }
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_installation_list_failures_degrade_to_empty() {
        let client = client()
            .failing_list(kind::AUTH_CONFIGS)
            .failing_list(kind::USERS)
            .failing_list(kind::NODE_DRIVERS)
            .failing_list(kind::KONTAINER_DRIVERS)
            .failing_list(kind::CLUSTERS);

        let install = collect(client).await;

        assert!(install.auth.is_empty());
        assert!(install.users.is_empty());
        assert!(install.node_drivers.is_empty());
        assert!(install.kontainer_drivers.is_empty());
        assert!(!install.has_internal);
        assert_eq!(install.uid, "TELEMETRY_UID");
    }

    #[tokio::test]
    async fn test_installation_setting_failure_keeps_collecting() {
        let install = collect(client().failing_by_id(kind::SETTINGS)).await;

        assert_eq!(install.uid, "");
        assert_eq!(install.version, "");
        assert_eq!(install.auth, LabelCount::from([("TEST1", 1)]));
        assert!(install.has_internal);
    }

    #[tokio::test]
    async fn test_installation_generates_uid_when_empty() {
        let install = collect(client().with_setting(TELEMETRY_UID_SETTING, "")).await;
        assert_eq!(install.uid.len(), 36);
    }

    #[tokio::test]
    async fn test_installation_uid_survives_failed_store() {
        let client = client().with_setting(TELEMETRY_UID_SETTING, "").failing_writes();
        let install = collect(client).await;
        assert_eq!(install.uid.len(), 36);
    }
}
