//! Assembles the server from configuration

use crate::clock::SystemClock;
use crate::config::{Config, LedgerConfig, StoreConfig};
use crate::ledger::book::RecordBook;
use crate::ledger::identity::Identity;
use crate::ledger::local::LocalLedger;
use crate::ledger::rpc::{RpcLedgerClient, RpcLedgerConfig};
use crate::ledger::LedgerClient;
use crate::metadata::MetadataBuilder;
use crate::pipeline::{PublishPipeline, ResolvePipeline};
use crate::server::AppState;
use crate::storage::{ContentStore, LocalStore, PinningConfig, PinningStore};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Credentials supplied outside the config file
#[derive(Default, Clone)]
pub struct Secrets {
    pub pinata_api_key: Option<String>,
    pub pinata_api_secret: Option<String>,
    /// Hex ed25519 secret the ledger identity signs with
    pub signing_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("pinata_api_key", &self.pinata_api_key.is_some())
            .field("pinata_api_secret", &self.pinata_api_secret.is_some())
            .field("signing_key", &self.signing_key.is_some())
            .finish()
    }
}

/// Build the content store named by the config
pub fn build_store(config: &StoreConfig, secrets: &Secrets) -> Result<Arc<dyn ContentStore>> {
    match config {
        StoreConfig::Pinning {
            api_url,
            gateway_url,
            timeout_secs,
        } => {
            let (Some(api_key), Some(api_secret)) =
                (&secrets.pinata_api_key, &secrets.pinata_api_secret)
            else {
                bail!("pinning store needs PINATA_API_KEY and PINATA_API_SECRET");
            };

            log::info!("Content store: pinning service at {}", api_url);
            let store = PinningStore::new(PinningConfig {
                api_url: api_url.clone(),
                gateway_url: gateway_url.clone(),
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
                timeout: Duration::from_secs(*timeout_secs),
            })
            .context("failed to create pinning client")?;
            Ok(Arc::new(store))
        }
        StoreConfig::Local { path, gateway_url } => {
            log::info!("Content store: local directory {:?}", path);
            let store = LocalStore::new(path, gateway_url.clone())
                .with_context(|| format!("failed to open local store at {:?}", path))?;
            Ok(Arc::new(store))
        }
    }
}

/// Build the ledger client named by the config
pub fn build_ledger(config: &LedgerConfig, secrets: &Secrets) -> Result<Arc<dyn LedgerClient>> {
    let identity = match &secrets.signing_key {
        Some(key) => Identity::from_hex(key).context("invalid FILEHUB_SIGNING_KEY")?,
        None => match config {
            LedgerConfig::Local { .. } => {
                log::warn!("No signing key given; records will be owned by a throwaway identity");
                Identity::generate()
            }
            LedgerConfig::Rpc { .. } => bail!("RPC ledger needs FILEHUB_SIGNING_KEY"),
        },
    };
    log::info!("Ledger identity: {}", identity.owner());

    match config {
        LedgerConfig::Rpc {
            rpc_url,
            record_store,
            timeout_secs,
            receipt_timeout_secs,
            poll_interval_ms,
        } => {
            log::info!("Ledger: {} (record store {:?})", rpc_url, record_store);
            let client = RpcLedgerClient::new(
                RpcLedgerConfig {
                    rpc_url: rpc_url.clone(),
                    record_store: record_store.clone(),
                    timeout: Duration::from_secs(*timeout_secs),
                    receipt_timeout: Duration::from_secs(*receipt_timeout_secs),
                    poll_interval: Duration::from_millis(*poll_interval_ms),
                },
                identity,
            )
            .context("failed to create ledger client")?;
            Ok(Arc::new(client))
        }
        LedgerConfig::Local { path, record_store } => {
            log::info!("Ledger: local record book {:?}", path);
            let book = RecordBook::open(path, record_store.clone())
                .with_context(|| format!("failed to open record book at {:?}", path))?;
            Ok(Arc::new(LocalLedger::new(Arc::new(book), identity)))
        }
    }
}

/// Wire stores, ledger and pipelines into handler state
pub fn build_state(config: &Config, secrets: &Secrets) -> Result<AppState> {
    let store = build_store(&config.store, secrets)?;
    let ledger = build_ledger(&config.ledger, secrets)?;
    Ok(assemble(config, store, ledger))
}

/// Handler state over already built clients
pub fn assemble(
    config: &Config,
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerClient>,
) -> AppState {
    let publish = PublishPipeline::new(store.clone(), ledger.clone(), Arc::new(SystemClock))
        .with_scheme(config.publish.scheme)
        .with_metadata_builder(MetadataBuilder::new(config.publish.description.clone()));
    let resolve = ResolvePipeline::new(store, ledger);

    AppState {
        publish: Arc::new(publish),
        resolve: Arc::new(resolve),
        upload_dir: config.server.upload_dir.clone(),
        max_upload_bytes: config.server.max_upload_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pinning_store_needs_credentials() {
        let config = StoreConfig::Pinning {
            api_url: "https://api.example".to_string(),
            gateway_url: "https://gw.example/ipfs/".to_string(),
            timeout_secs: 5,
        };
        assert!(build_store(&config, &Secrets::default()).is_err());

        let secrets = Secrets {
            pinata_api_key: Some("k".to_string()),
            pinata_api_secret: Some("s".to_string()),
            signing_key: None,
        };
        assert!(build_store(&config, &secrets).is_ok());
    }

    #[test]
    fn test_rpc_ledger_needs_signing_key() {
        let config = LedgerConfig::Rpc {
            rpc_url: "http://127.0.0.1:1".to_string(),
            record_store: "filehub".to_string(),
            timeout_secs: 1,
            receipt_timeout_secs: 1,
            poll_interval_ms: 10,
        };
        assert!(build_ledger(&config, &Secrets::default()).is_err());

        let secrets = Secrets {
            signing_key: Some("44".repeat(32)),
            ..Secrets::default()
        };
        let ledger = build_ledger(&config, &secrets).unwrap();
        assert_eq!(
            ledger.owner(),
            Identity::from_hex(&"44".repeat(32)).unwrap().owner()
        );
    }

    #[test]
    fn test_build_local_state() {
        let dir = TempDir::new().unwrap();
        let config = Config::parse(&format!(
            r#"
[server]
upload_dir = "{uploads}"

[store]
type = "local"
path = "{blobs}"

[ledger]
type = "local"
path = "{ledger}"
"#,
            uploads = dir.path().join("uploads").display(),
            blobs = dir.path().join("blobs").display(),
            ledger = dir.path().join("ledger").display(),
        ))
        .unwrap();

        let state = build_state(&config, &Secrets::default()).unwrap();
        assert_eq!(state.upload_dir, dir.path().join("uploads"));
        assert!(dir.path().join("blobs").is_dir());
    }

    #[test]
    fn test_secrets_debug_redacts() {
        let secrets = Secrets {
            pinata_api_key: Some("visible-key".to_string()),
            ..Secrets::default()
        };
        assert!(!format!("{:?}", secrets).contains("visible-key"));
    }
}
