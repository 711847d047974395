use serde_json::json;
use tracing::{debug, error};

use crate::management::{by_id_as, kind, ApiResult, ResourceClient};
use crate::management::types::Setting;

pub const TELEMETRY_OPT_SETTING: &str = "telemetry-opt";
pub const TELEMETRY_UID_SETTING: &str = "telemetry-uid";
pub const SERVER_LICENSE_SETTING: &str = "server-license";
pub const INSTALLATION_UID_SETTING: &str = "install-uuid";
pub const SERVER_VERSION_SETTING: &str = "server-version";
pub const UI_DEFAULT_LANDING_SETTING: &str = "ui-default-landing";
pub const CLUSTER_TEMPLATE_ENFORCEMENT_SETTING: &str = "cluster-template-enforcement";

pub async fn get_setting(client: &dyn ResourceClient, name: &str) -> ApiResult<String> {
    let setting: Setting = by_id_as(client, kind::SETTINGS, name).await?;
    Ok(setting.value)
}

/// Value of a setting, or an empty string when it is absent or unreadable.
pub async fn setting_or_default(client: &dyn ResourceClient, name: &str) -> String {
    match get_setting(client, name).await {
        Ok(value) => value,
        Err(e) if e.is_not_found() => {
            debug!("  Setting {} doesn't exist", name);
            String::new()
        }
        Err(e) => {
            error!("  Failed to get setting {} err={}", name, e);
            String::new()
        }
    }
}

/// Updates a setting, creating it when it does not exist yet.
pub async fn set_setting(client: &dyn ResourceClient, name: &str, value: &str) -> ApiResult<()> {
    match client.by_id(kind::SETTINGS, name).await {
        Ok(_) => {
            client
                .update(kind::SETTINGS, name, &json!({ "value": value }))
                .await
                .map_err(|e| {
                    debug!("UpdateSetting({},{}): Error: {}", name, value, e);
                    e
                })?;
            debug!("UpdateSetting({},{})", name, value);
        }
        Err(e) if e.is_not_found() => {
            client
                .create(kind::SETTINGS, &json!({ "name": name, "value": value }))
                .await
                .map_err(|e| {
                    debug!("CreateSetting({},{}): Error: {}", name, value, e);
                    e
                })?;
            debug!("CreateSetting({},{})", name, value);
        }
        Err(e) => {
            debug!("Failed to get setting {} err={}", name, e);
            return Err(e);
        }
    }

    Ok(())
}

pub async fn is_telemetry_enabled(client: &dyn ResourceClient) -> bool {
    setting_or_default(client, TELEMETRY_OPT_SETTING).await == "in"
}

pub async fn license_key(client: &dyn ResourceClient) -> Option<String> {
    let key = setting_or_default(client, SERVER_LICENSE_SETTING).await;
    if key.is_empty() {
        debug!("  No license key");
        return None;
    }
    Some(key)
}

pub async fn is_licensed(client: &dyn ResourceClient) -> bool {
    license_key(client).await.is_some()
}

pub async fn installation_uid(client: &dyn ResourceClient) -> Option<String> {
    match get_setting(client, INSTALLATION_UID_SETTING).await {
        Ok(uid) => Some(uid),
        Err(e) => {
            error!("  Failed to get setting {} err={}", INSTALLATION_UID_SETTING, e);
            None
        }
    }
}

/// The telemetry identity of this installation, generated and stored on
/// first use. A failure to store a fresh uid still returns it.
pub async fn telemetry_uid(client: &dyn ResourceClient) -> ApiResult<String> {
    let uid = get_setting(client, TELEMETRY_UID_SETTING).await.or_else(|e| {
        if e.is_not_found() {
            Ok(String::new())
        } else {
            Err(e)
        }
    })?;

    if !uid.is_empty() {
        return Ok(uid);
    }

    let uid = uuid::Uuid::new_v4().to_string();
    if let Err(e) = set_setting(client, TELEMETRY_UID_SETTING, &uid).await {
        error!("Failed to store {} err={}", TELEMETRY_UID_SETTING, e);
    }
    Ok(uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::mock::MockClient;

    #[tokio::test]
    async fn test_set_existing_setting() {
        let client = MockClient::new("test").with_setting("test", "old");
        set_setting(&client, "test", "new").await.unwrap();
        assert_eq!(get_setting(&client, "test").await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_set_missing_setting_creates_it() {
        let client = MockClient::new("test");
        set_setting(&client, "test", "value").await.unwrap();
        assert_eq!(get_setting(&client, "test").await.unwrap(), "value");
    }

    #[tokio::test]
    async fn test_set_setting_lookup_error() {
        let client = MockClient::new("test").failing_by_id(kind::SETTINGS);
        let err = set_setting(&client, "test", "test").await.unwrap_err();
        assert_eq!(err.to_string(), "[ERROR] settings ByID Fail");
    }

    #[tokio::test]
    async fn test_set_setting_create_error() {
        let client = MockClient::new("test").failing_writes();
        let err = set_setting(&client, "test", "test").await.unwrap_err();
        assert_eq!(err.to_string(), "[ERROR] settings Create Fail");
    }

    #[tokio::test]
    async fn test_gates() {
        let client = MockClient::new("test")
            .with_setting(TELEMETRY_OPT_SETTING, "in")
            .with_setting(SERVER_LICENSE_SETTING, "");
        assert!(is_telemetry_enabled(&client).await);
        assert!(!is_licensed(&client).await);

        let client = MockClient::new("test").with_setting(SERVER_LICENSE_SETTING, "KEY");
        assert!(!is_telemetry_enabled(&client).await);
        assert_eq!(license_key(&client).await.as_deref(), Some("KEY"));
    }

    #[tokio::test]
    async fn test_telemetry_uid_is_generated_once() {
        let client = MockClient::new("test").with_setting(TELEMETRY_UID_SETTING, "");
        let uid = telemetry_uid(&client).await.unwrap();
        assert_eq!(uid.len(), 36);
        assert_eq!(telemetry_uid(&client).await.unwrap(), uid);
    }
}
