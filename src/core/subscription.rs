//! Subscription templates, fan-out and acknowledgement reconciliation.
//!
//! A [`Subscription`] names a logical channel ("orderbook", "ticker") for a
//! scope of asset classes. [`expand`] turns it into one concrete
//! subscription per qualified venue channel using a [`ChannelTemplate`]
//! and the configured instruments; [`SubscriptionManager`] then sends those
//! channels through the session and reconciles what the venue acknowledged.

use crate::core::errors::EngineError;
use crate::core::kernel::session::Session;
use crate::core::traits::InstrumentLookup;
use crate::core::types::{AssetClass, AssetScope, Interval, Pair};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Logical channel keys shared across venues.
pub mod keys {
    pub const TICKER: &str = "ticker";
    pub const ORDERBOOK: &str = "orderbook";
    pub const CANDLES: &str = "candles";
    pub const ALL_TRADES: &str = "all_trades";
    pub const MY_TRADES: &str = "my_trades";
    pub const MY_ORDERS: &str = "my_orders";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Pending,
    Acked,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub channel: String,
    pub asset: AssetScope,
    pub interval: Option<Interval>,
    pub authenticated: bool,
    pub enabled: bool,
    /// Set by [`expand`] for symbol channels.
    pub pair: Option<Pair>,
    pub asset_class: Option<AssetClass>,
    /// Venue channel string, set by [`expand`].
    pub qualified_channel: Option<String>,
    pub state: SubscriptionState,
}

impl Subscription {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            asset: AssetScope::All,
            interval: None,
            authenticated: false,
            enabled: true,
            pair: None,
            asset_class: None,
            qualified_channel: None,
            state: SubscriptionState::Pending,
        }
    }

    #[must_use]
    pub fn asset(mut self, asset: impl Into<AssetScope>) -> Self {
        self.asset = asset.into();
        self
    }

    #[must_use]
    pub const fn interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Checks the channel and interval against `template` without
    /// expanding. [`expand`] performs the same checks.
    pub fn validate(&self, template: &dyn ChannelTemplate) -> Result<(), EngineError> {
        template.channel_name(self)?;
        template.channel_interval(self)?;
        Ok(())
    }

    /// Qualified channel when expanded, otherwise the logical key.
    pub fn key(&self) -> &str {
        self.qualified_channel.as_deref().unwrap_or(&self.channel)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.channel)?;
        if let Some(asset) = self.asset_class {
            write!(f, " {}", asset)?;
        }
        if let Some(pair) = &self.pair {
            write!(f, " {}", pair)?;
        }
        if let Some(q) = &self.qualified_channel {
            write!(f, " [{}]", q)?;
        }
        Ok(())
    }
}

/// Venue naming rules for subscriptions.
pub trait ChannelTemplate: Send + Sync {
    /// Venue channel name, or `InvalidSubscription` for unsupported keys.
    fn channel_name(&self, sub: &Subscription) -> Result<&'static str, EngineError>;

    /// Venue interval suffix; `None` when the subscription has no interval.
    fn channel_interval(&self, sub: &Subscription) -> Result<Option<String>, EngineError>;

    /// Whether the channel is fanned out per instrument.
    fn is_symbol_channel(&self, sub: &Subscription) -> Result<bool, EngineError>;

    fn format_pair(&self, pair: &Pair) -> String {
        pair.to_string()
    }

    fn subscribe_method(&self, authenticated: bool) -> &'static str {
        if authenticated {
            "private/subscribe"
        } else {
            "public/subscribe"
        }
    }

    fn unsubscribe_method(&self, authenticated: bool) -> &'static str {
        if authenticated {
            "private/unsubscribe"
        } else {
            "public/unsubscribe"
        }
    }

    /// `name[.pair][.interval]`, with any trailing `.` on the name absorbed.
    fn qualify(&self, sub: &Subscription, pair: Option<&Pair>) -> Result<String, EngineError> {
        let mut qualified = self.channel_name(sub)?.trim_end_matches('.').to_string();
        if let Some(pair) = pair {
            qualified.push('.');
            qualified.push_str(&self.format_pair(pair));
        }
        if let Some(interval) = self.channel_interval(sub)? {
            qualified.push('.');
            qualified.push_str(&interval);
        }
        Ok(qualified)
    }
}

/// Fans enabled subscriptions out into concrete ones, one per qualified
/// channel. Disabled entries are skipped and duplicates collapse onto the
/// first occurrence.
pub fn expand(
    list: &[Subscription],
    template: &dyn ChannelTemplate,
    lookup: &dyn InstrumentLookup,
) -> Result<Vec<Subscription>, EngineError> {
    let mut seen = HashSet::new();
    let mut expanded = Vec::new();

    for sub in list.iter().filter(|s| s.enabled) {
        sub.validate(template)?;

        if template.is_symbol_channel(sub)? {
            for (asset, pairs) in lookup.asset_pairs(&sub.asset) {
                for pair in pairs {
                    let qualified = template.qualify(sub, Some(&pair))?;
                    if seen.insert(qualified.clone()) {
                        let mut concrete = sub.clone();
                        concrete.asset_class = Some(asset);
                        concrete.pair = Some(pair);
                        concrete.qualified_channel = Some(qualified);
                        concrete.state = SubscriptionState::Pending;
                        expanded.push(concrete);
                    }
                }
            }
        } else {
            let qualified = template.qualify(sub, None)?;
            if seen.insert(qualified.clone()) {
                let mut concrete = sub.clone();
                concrete.qualified_channel = Some(qualified);
                concrete.state = SubscriptionState::Pending;
                expanded.push(concrete);
            }
        }
    }

    Ok(expanded)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFailure {
    pub channel: String,
    pub reason: String,
    /// The requested subscription, left in `SubscriptionState::Failed`.
    /// `None` for acks of channels that were never requested.
    pub subscription: Option<Subscription>,
}

impl SubscriptionFailure {
    /// The venue acknowledged a channel that was never requested.
    pub const fn is_unexpected(&self) -> bool {
        self.subscription.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    FullyFailed,
    PartiallyFailed,
    /// Every requested channel went through, but the venue also acked
    /// channels nobody asked for.
    UnexpectedOnly,
}

/// Per-channel failures of one subscribe or unsubscribe call.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionErrors {
    pub requested: usize,
    pub failures: Vec<SubscriptionFailure>,
}

impl SubscriptionErrors {
    pub const fn new(requested: usize) -> Self {
        Self {
            requested,
            failures: Vec::new(),
        }
    }

    /// Records `sub` as failed and marks its state accordingly.
    pub fn push(&mut self, mut sub: Subscription, reason: impl Into<String>) {
        sub.state = SubscriptionState::Failed;
        self.failures.push(SubscriptionFailure {
            channel: sub.key().to_string(),
            reason: reason.into(),
            subscription: Some(sub),
        });
    }

    fn push_unexpected(&mut self, channel: impl Into<String>) {
        let channel = channel.into();
        self.failures.push(SubscriptionFailure {
            reason: format!("unexpected channel {:?} in result", channel),
            channel,
            subscription: None,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Requested channels that failed; unexpected acks are not counted.
    pub fn failed_count(&self) -> usize {
        self.failures.iter().filter(|f| !f.is_unexpected()).count()
    }

    pub fn outcome(&self) -> SubscriptionOutcome {
        if self.failed_count() == 0 {
            SubscriptionOutcome::UnexpectedOnly
        } else if self.requested > 0 && self.failed_count() >= self.requested {
            SubscriptionOutcome::FullyFailed
        } else {
            SubscriptionOutcome::PartiallyFailed
        }
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Subscription(self))
        }
    }
}

impl fmt::Display for SubscriptionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} subscription channels failed",
            self.failed_count(),
            self.requested
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.channel, failure.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for SubscriptionErrors {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Subscribe,
    Unsubscribe,
}

/// Sends subscription requests over a session and tracks what is live.
pub struct SubscriptionManager {
    session: Session,
    template: Arc<dyn ChannelTemplate>,
    lookup: Arc<dyn InstrumentLookup>,
    registry: DashMap<String, Subscription>,
}

impl SubscriptionManager {
    pub fn new(
        session: Session,
        template: Arc<dyn ChannelTemplate>,
        lookup: Arc<dyn InstrumentLookup>,
    ) -> Self {
        Self {
            session,
            template,
            lookup,
            registry: DashMap::new(),
        }
    }

    pub fn expand(&self, list: &[Subscription]) -> Result<Vec<Subscription>, EngineError> {
        expand(list, self.template.as_ref(), self.lookup.as_ref())
    }

    #[instrument(skip(self, list), fields(count = list.len()))]
    pub async fn subscribe(&self, list: &[Subscription]) -> Result<(), EngineError> {
        self.run(Operation::Subscribe, list).await
    }

    #[instrument(skip(self, list), fields(count = list.len()))]
    pub async fn unsubscribe(&self, list: &[Subscription]) -> Result<(), EngineError> {
        self.run(Operation::Unsubscribe, list).await
    }

    /// Every acknowledged subscription, ordered by qualified channel.
    pub fn active(&self) -> Vec<Subscription> {
        let mut active: Vec<Subscription> =
            self.registry.iter().map(|e| e.value().clone()).collect();
        active.sort_by(|a, b| a.key().cmp(b.key()));
        active
    }

    pub fn is_active(&self, qualified_channel: &str) -> bool {
        self.registry.contains_key(qualified_channel)
    }

    /// Forgets all subscriptions, e.g. after the connection dropped.
    pub fn clear(&self) {
        self.registry.clear();
    }

    async fn run(&self, op: Operation, list: &[Subscription]) -> Result<(), EngineError> {
        let expanded = self.expand(list)?;
        let (private, public): (Vec<_>, Vec<_>) =
            expanded.into_iter().partition(|s| s.authenticated);

        let mut errors = SubscriptionErrors::new(public.len() + private.len());
        self.send_subset(op, false, public, &mut errors).await;
        self.send_subset(op, true, private, &mut errors).await;

        if !errors.is_empty() {
            warn!("{}", errors);
        }
        errors.into_result()
    }

    async fn send_subset(
        &self,
        op: Operation,
        authenticated: bool,
        subs: Vec<Subscription>,
        errors: &mut SubscriptionErrors,
    ) {
        if subs.is_empty() {
            return;
        }

        let method = match op {
            Operation::Subscribe => self.template.subscribe_method(authenticated),
            Operation::Unsubscribe => self.template.unsubscribe_method(authenticated),
        };

        if authenticated && !self.session.can_use_authenticated_endpoints() {
            let reason = EngineError::AuthenticationFailed(
                "authenticated endpoints are unavailable".to_string(),
            )
            .to_string();
            for sub in subs {
                errors.push(sub, reason.clone());
            }
            return;
        }

        let channels: Vec<&str> = subs.iter().map(Subscription::key).collect();
        debug!(method, ?channels, "sending subscription request");

        let acked: Vec<String> = match self
            .session
            .request(method, &json!({ "channels": channels }))
            .await
        {
            Ok(acked) => acked,
            Err(e) => {
                let reason = e.to_string();
                for sub in subs {
                    errors.push(sub, reason.clone());
                }
                return;
            }
        };

        self.reconcile(op, method, subs, acked, errors);
    }

    fn reconcile(
        &self,
        op: Operation,
        method: &str,
        subs: Vec<Subscription>,
        acked: Vec<String>,
        errors: &mut SubscriptionErrors,
    ) {
        let mut acked: HashSet<String> = acked.into_iter().collect();

        for mut sub in subs {
            let key = sub.key().to_string();
            if acked.remove(&key) {
                match op {
                    Operation::Subscribe => {
                        sub.state = SubscriptionState::Acked;
                        self.registry.insert(key, sub);
                    }
                    Operation::Unsubscribe => {
                        self.registry.remove(&key);
                    }
                }
            } else {
                errors.push(sub, format!("failed to {}", method));
            }
        }

        for unexpected in acked {
            errors.push_unexpected(unexpected);
        }
        info!(method, active = self.registry.len(), "subscriptions reconciled");
    }
}
