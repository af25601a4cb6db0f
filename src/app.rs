//! Service wiring.
//!
//! Builds every service from configuration and an explicit store handle.
//!
//! ```ignore
//! let app = AppBuilder::new(config)
//!     .with_stores(stores)
//!     .with_sender(Arc::new(LogSender))
//!     .build();
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::dispatch::{LogSender, MessageSender, NotificationDispatcher};
use crate::ledger::LedgerService;
use crate::rewards::{
    ApproverValidator, CodeGenerator, RedemptionService, RewardEngine, SettingsService,
    StaticPinValidator,
};
use crate::router::EventRouter;
use crate::storage::Stores;

/// Builder for [`App`].
pub struct AppBuilder {
    config: Config,
    stores: Option<Stores>,
    sender: Option<Arc<dyn MessageSender>>,
    approvers: Option<Arc<dyn ApproverValidator>>,
    codes: Option<CodeGenerator>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stores: None,
            sender: None,
            approvers: None,
            codes: None,
        }
    }

    /// Defaults to fresh in-memory stores.
    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Defaults to [`LogSender`].
    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Defaults to the approvers listed in configuration.
    pub fn with_approvers(mut self, approvers: Arc<dyn ApproverValidator>) -> Self {
        self.approvers = Some(approvers);
        self
    }

    /// Defaults to random codes with the configured prefix.
    pub fn with_codes(mut self, codes: CodeGenerator) -> Self {
        self.codes = Some(codes);
        self
    }

    /// Wire the services and start the notification worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> App {
        let config = self.config;
        let stores = self.stores.unwrap_or_else(|| Stores::memory().0);
        let sender = self.sender.unwrap_or_else(|| Arc::new(LogSender));
        let approvers = self
            .approvers
            .unwrap_or_else(|| Arc::new(StaticPinValidator::new(&config.approvers)));
        let codes = self
            .codes
            .unwrap_or_else(|| CodeGenerator::new(config.rewards.code_prefix.clone()));
        let timeout = config.storage.operation_timeout();

        let (dispatcher, dispatch_worker) = NotificationDispatcher::spawn(sender, &config.dispatch);
        let settings = SettingsService::new(
            stores.settings.clone(),
            config.rewards.defaults.clone(),
            timeout,
        );
        let engine = Arc::new(
            RewardEngine::new(stores.clone(), settings.clone(), dispatcher.clone(), timeout)
                .with_codes(codes)
                .with_code_retry_limit(config.rewards.code_retry_limit),
        );
        let ledger = Arc::new(LedgerService::new(
            stores.clone(),
            settings.clone(),
            engine.clone(),
            approvers.clone(),
            dispatcher.clone(),
            config.checkin.points_per_checkin,
            timeout,
        ));
        let redemption = Arc::new(RedemptionService::new(stores.clone(), approvers, timeout));
        let router = Arc::new(EventRouter::new(
            stores.clone(),
            ledger.clone(),
            settings.clone(),
            dispatcher.clone(),
            timeout,
        ));

        App {
            config,
            stores,
            settings,
            engine,
            ledger,
            redemption,
            router,
            dispatcher,
            dispatch_worker,
        }
    }
}

/// Every service, sharing one store handle and one notification queue.
pub struct App {
    pub config: Config,
    pub stores: Stores,
    pub settings: SettingsService,
    pub engine: Arc<RewardEngine>,
    pub ledger: Arc<LedgerService>,
    pub redemption: Arc<RedemptionService>,
    pub router: Arc<EventRouter>,
    pub dispatcher: NotificationDispatcher,
    pub dispatch_worker: JoinHandle<()>,
}

impl App {
    /// One maintenance pass: expire overdue codes, then forget processed
    /// message ids older than `webhook.dedup_retention_secs`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<()> {
        self.redemption.expire_due(now).await?;
        if let Some(retention) = self.config.webhook.dedup_retention() {
            self.router.prune_processed(now - retention).await?;
        }
        Ok(())
    }

    /// Run [`App::sweep`] every `rewards.expiry_sweep_secs`.
    ///
    /// Returns `None` when the interval is zero.
    pub fn spawn_sweep(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let secs = self.config.rewards.expiry_sweep_secs;
        if secs == 0 {
            info!("Expiry sweep disabled");
            return None;
        }

        let app = self;
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = app.sweep(Utc::now()).await {
                    warn!(error = %e, "Sweep failed, retrying next interval");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::router::{InboundEvent, RouteOutcome, MESSAGE_EVENT};

    fn help(id: &str, received_at: DateTime<Utc>) -> InboundEvent {
        InboundEvent {
            message_id: id.to_string(),
            event_type: MESSAGE_EVENT.to_string(),
            sender: "15550007777@s.whatsapp.net".to_string(),
            from_self: false,
            text: "help".to_string(),
            received_at,
        }
    }

    #[tokio::test]
    async fn test_sweep_prunes_ids_past_retention() {
        let app = AppBuilder::new(Config::for_test()).build();
        let now = Utc::now();
        app.router.handle(help("old", now - Duration::days(8))).await.unwrap();
        app.router.handle(help("new", now)).await.unwrap();

        app.sweep(now).await.unwrap();

        let old = app.router.handle(help("old", now)).await.unwrap();
        assert!(matches!(old, RouteOutcome::Processed { .. }));
        let new = app.router.handle(help("new", now)).await.unwrap();
        assert_eq!(new, RouteOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_ids() {
        let mut config = Config::for_test();
        config.webhook.dedup_retention_secs = 0;
        let app = AppBuilder::new(config).build();
        let now = Utc::now();
        app.router.handle(help("old", now - Duration::days(400))).await.unwrap();

        app.sweep(now).await.unwrap();

        let old = app.router.handle(help("old", now)).await.unwrap();
        assert_eq!(old, RouteOutcome::Duplicate);
    }
}
