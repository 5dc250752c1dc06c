//! Table-driven dispatch of unsolicited channel messages.
//!
//! A channel such as `book.BTC-PERPETUAL.100ms` is split on `.`; the first
//! segment selects a route, and nested tables select on the next segment
//! (`user.orders...`). Keys missing from the tables come back as
//! [`Dispatch::Unhandled`] rather than an error.

use crate::core::errors::EngineError;
use crate::core::traits::{Dispatch, PushHandler};
use serde_json::value::RawValue;
use std::collections::HashMap;
use tracing::trace;

/// Handler signature: context, all channel segments, raw payload.
pub type ChannelFn<C> = fn(&C, &[&str], &RawValue) -> Result<(), EngineError>;

pub enum Route<C> {
    Direct(ChannelFn<C>),
    Nested(HashMap<&'static str, Route<C>>),
}

pub struct Router<C> {
    routes: HashMap<&'static str, Route<C>>,
}

impl<C> Default for Router<C> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<C> Router<C> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(mut self, key: &'static str, handler: ChannelFn<C>) -> Self {
        self.routes.insert(key, Route::Direct(handler));
        self
    }

    /// Registers a nested table selected by the second channel segment.
    #[must_use]
    pub fn nested<I>(mut self, key: &'static str, table: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, ChannelFn<C>)>,
    {
        let table = table
            .into_iter()
            .map(|(k, handler)| (k, Route::Direct(handler)))
            .collect();
        self.routes.insert(key, Route::Nested(table));
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn dispatch(
        &self,
        ctx: &C,
        channel: &str,
        data: &RawValue,
    ) -> Result<Dispatch, EngineError> {
        let segments: Vec<&str> = channel.split('.').collect();

        let mut table = &self.routes;
        let mut depth = 0;
        loop {
            let Some(route) = segments.get(depth).and_then(|key| table.get(*key)) else {
                trace!(channel, "no route");
                return Ok(Dispatch::Unhandled);
            };
            match route {
                Route::Direct(handler) => {
                    handler(ctx, &segments, data)?;
                    return Ok(Dispatch::Handled);
                }
                Route::Nested(next) => {
                    table = next;
                    depth += 1;
                }
            }
        }
    }
}

/// Binds a router to its handler context so the session can push into it.
pub struct RoutedHandler<C> {
    ctx: C,
    router: Router<C>,
}

impl<C> RoutedHandler<C> {
    pub const fn new(ctx: C, router: Router<C>) -> Self {
        Self { ctx, router }
    }

    pub const fn context(&self) -> &C {
        &self.ctx
    }
}

impl<C: Send + Sync> PushHandler for RoutedHandler<C> {
    fn on_push(&self, channel: &str, data: &RawValue) -> Result<Dispatch, EngineError> {
        self.router.dispatch(&self.ctx, channel, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    fn record(ctx: &Calls, segments: &[&str], data: &RawValue) -> Result<(), EngineError> {
        ctx.0.lock().push(format!("{}={}", segments.join("|"), data.get()));
        Ok(())
    }

    fn strict(_: &Calls, segments: &[&str], _: &RawValue) -> Result<(), EngineError> {
        if segments.len() != 3 {
            return Err(EngineError::malformed(format!(
                "expected 3 segments, got {}",
                segments.len()
            )));
        }
        Ok(())
    }

    fn raw(s: &str) -> Box<RawValue> {
        RawValue::from_string(s.to_string()).unwrap()
    }

    fn router() -> Router<Calls> {
        Router::new()
            .route("ticker", record)
            .route("strict", strict)
            .nested("user", [("orders", record as ChannelFn<Calls>)])
    }

    #[test]
    fn test_direct_route() {
        let ctx = Calls::default();
        let data = raw("{\"x\":1}");
        let outcome = router()
            .dispatch(&ctx, "ticker.BTC-PERPETUAL.100ms", &data)
            .unwrap();
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(ctx.0.lock()[0], "ticker|BTC-PERPETUAL|100ms={\"x\":1}");
    }

    #[test]
    fn test_nested_route() {
        let ctx = Calls::default();
        let data = raw("[]");
        let router = router();
        assert_eq!(
            router.dispatch(&ctx, "user.orders.any.any.raw", &data).unwrap(),
            Dispatch::Handled
        );
        assert_eq!(
            router.dispatch(&ctx, "user.portfolio.btc", &data).unwrap(),
            Dispatch::Unhandled
        );
        assert_eq!(router.dispatch(&ctx, "user", &data).unwrap(), Dispatch::Unhandled);
    }

    #[test]
    fn test_unknown_channel_is_unhandled() {
        let ctx = Calls::default();
        let data = raw("null");
        assert_eq!(
            router().dispatch(&ctx, "nothing.here", &data).unwrap(),
            Dispatch::Unhandled
        );
        assert!(ctx.0.lock().is_empty());
    }

    #[test]
    fn test_handler_errors_propagate() {
        let handler = RoutedHandler::new(Calls::default(), router());
        let data = raw("{}");
        assert!(matches!(
            handler.on_push("strict.a", &data),
            Err(EngineError::MalformedData(_))
        ));
        assert_eq!(handler.on_push("strict.a.b", &data).unwrap(), Dispatch::Handled);
    }
}
