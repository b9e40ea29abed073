//! The Monitor type: builder, session loop and scheduling.

use std::sync::Arc;
use std::time::Duration;

use ratewatch_adapters::RateProvider;
use ratewatch_types::{Flag, Snapshot};
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::alerts::{check_all, AlertRule};
use crate::config::{ConfigError, MonitorConfig};
use crate::evaluator::evaluate;
use crate::flags::FlagSet;
use crate::handle::SessionHandle;
use crate::history::History;
use crate::output::Output;
use crate::source::SnapshotSource;
use crate::state::{MonitorState, Shared};
use crate::synthetic::Synthesizer;

/// A configured rate monitor, ready to start.
///
/// A Monitor periodically takes a snapshot of the tracked rates, compares it
/// against the previous one and reports the snapshot together with the
/// active anomaly flags.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use ratewatch_adapters::{FetchError, FnProvider, RateQuote};
/// use ratewatch_monitor::Monitor;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let provider = FnProvider::new("fixed", |_keys: Vec<String>| async {
///         Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", 0.92), ("GBP", 0.79)]))
///     });
///
///     let monitor = Monitor::builder()
///         .keys(["EUR", "GBP"])
///         .interval(Duration::from_secs(1))
///         .threshold(0.10)
///         .provider(Arc::new(provider))
///         .build()?;
///
///     let handle = monitor.start(|snapshot, flags| {
///         println!("{} rates, {} flags", snapshot.len(), flags.len());
///     });
///
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     handle.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Monitor {
    config: MonitorConfig,
    provider: Arc<dyn RateProvider>,
    synthesizer: Option<Box<dyn Synthesizer>>,
    alerts: Vec<AlertRule>,
    outputs: Vec<Output>,
}

impl Monitor {
    /// Create a monitor from a configuration and a provider.
    pub fn new(config: MonitorConfig, provider: Arc<dyn RateProvider>) -> Result<Self, ConfigError> {
        Self::builder().config(config).provider(provider).build()
    }

    /// Create a builder for configuring the monitor.
    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::new()
    }

    /// The validated configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start the session.
    ///
    /// Spawns a tokio task, so this must be called within a runtime. The first
    /// tick fetches immediately and reports the snapshot with no flags; every
    /// later tick reports the snapshot and all flags still active.
    ///
    /// `on_update` runs on the session task, one call per tick, in tick order.
    /// It may call [`SessionHandle::stop`].
    pub fn start<F>(self, on_update: F) -> SessionHandle
    where
        F: FnMut(&Snapshot, &[Flag]) + Send + 'static,
    {
        let mut source = SnapshotSource::new(self.provider, &self.config);
        if let Some(synthesizer) = self.synthesizer {
            source = source.with_synthesizer(synthesizer);
        }

        let (shared, stop_rx) = Shared::new(
            FlagSet::new(self.config.flag_ttl),
            History::new(self.config.history_len),
        );
        let shared = Arc::new(shared);

        info!(
            provider = source.description(),
            keys = ?self.config.keys,
            interval_ms = self.config.interval.as_millis() as u64,
            threshold = self.config.threshold,
            "Starting rate monitor"
        );

        let session = Session {
            shared: shared.clone(),
            source,
            interval: self.config.interval,
            threshold: self.config.threshold,
            alerts: self.alerts,
            outputs: self.outputs,
            output_timeout: self.config.output_timeout,
            on_update: Box::new(on_update),
            previous: None,
            tick: 0,
        };

        let task = tokio::spawn(session.run(stop_rx));
        SessionHandle::new(shared, task)
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("provider", &self.provider.description())
            .field("alerts", &self.alerts)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// Builder for configuring a Monitor.
#[derive(Default)]
pub struct MonitorBuilder {
    config: MonitorConfig,
    provider: Option<Arc<dyn RateProvider>>,
    synthesizer: Option<Box<dyn Synthesizer>>,
    alerts: Vec<AlertRule>,
    outputs: Vec<Output>,
}

impl MonitorBuilder {
    /// Create a new builder with default settings and no keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the tracked keys.
    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.config.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the refresh interval (default 30 seconds).
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the anomaly threshold as a fraction (default 0.10).
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.config.threshold = threshold;
        self
    }

    /// Set how long a raised flag stays active (default 10 seconds).
    pub fn flag_ttl(mut self, ttl: Duration) -> Self {
        self.config.flag_ttl = ttl;
        self
    }

    /// Set the consecutive live failures before hybrid mode (default 3).
    pub fn max_consecutive_failures(mut self, failures: u32) -> Self {
        self.config.max_consecutive_failures = failures;
        self
    }

    /// Set the bound on a single live fetch (default 8 seconds).
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    /// Set the bound on delivering one update to one output (default 2 seconds).
    pub fn output_timeout(mut self, timeout: Duration) -> Self {
        self.config.output_timeout = timeout;
        self
    }

    /// Set the per-tick chance of a live retry in hybrid mode (default 0.10).
    pub fn hybrid_retry_probability(mut self, probability: f64) -> Self {
        self.config.hybrid_retry_probability = probability;
        self
    }

    /// Set the synthetic perturbation bounds as fractions.
    pub fn perturbation(mut self, min: f64, max: f64) -> Self {
        self.config.perturbation_min = min;
        self.config.perturbation_max = max;
        self
    }

    /// Set the number of values kept per key for trends (default 60).
    pub fn history_len(mut self, len: usize) -> Self {
        self.config.history_len = len;
        self
    }

    /// Seed the RNG for reproducible synthetic data.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Set the live rate provider. Required.
    pub fn provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replace the default synthetic perturbation.
    pub fn synthesizer(mut self, synthesizer: impl Synthesizer + 'static) -> Self {
        self.synthesizer = Some(Box::new(synthesizer));
        self
    }

    /// Add a price alert.
    pub fn alert(mut self, rule: AlertRule) -> Self {
        self.alerts.push(rule);
        self
    }

    /// Add an output destination.
    ///
    /// Multiple outputs can be added; every update goes to all of them.
    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    /// Validate and build the monitor.
    pub fn build(self) -> Result<Monitor, ConfigError> {
        self.config.validate()?;
        let provider = self.provider.ok_or(ConfigError::NoProvider)?;

        Ok(Monitor {
            config: self.config,
            provider,
            synthesizer: self.synthesizer,
            alerts: self.alerts,
            outputs: self.outputs,
        })
    }
}

type UpdateFn = Box<dyn FnMut(&Snapshot, &[Flag]) + Send>;

/// Everything the session task owns.
struct Session {
    shared: Arc<Shared>,
    source: SnapshotSource,
    interval: Duration,
    threshold: f64,
    alerts: Vec<AlertRule>,
    outputs: Vec<Output>,
    output_timeout: Duration,
    on_update: UpdateFn,
    previous: Option<Snapshot>,
    tick: u64,
}

impl Session {
    async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        let mut next_tick = Instant::now();

        loop {
            // Wait for the tick, expiring flags in the meantime.
            let stopped = loop {
                let expiry = self.shared.flags.lock().next_expiry();
                tokio::select! {
                    biased;
                    _ = wait_stopped(&mut stop_rx) => break true,
                    _ = sleep_until(next_tick) => break false,
                    _ = sleep_until_some(expiry) => expire_flags(&self.shared, self.tick),
                }
            };
            if stopped {
                return self.finish();
            }

            // Fetch, still expiring flags while it is in flight.
            let tick_start = Instant::now();
            let fetched = {
                let fetch = self.source.next_snapshot();
                tokio::pin!(fetch);
                loop {
                    let expiry = self.shared.flags.lock().next_expiry();
                    tokio::select! {
                        biased;
                        _ = wait_stopped(&mut stop_rx) => break None,
                        snapshot = &mut fetch => break Some(snapshot),
                        _ = sleep_until_some(expiry) => expire_flags(&self.shared, self.tick),
                    }
                }
            };
            let Some(snapshot) = fetched else {
                return self.finish();
            };

            if !self.process(snapshot, &mut stop_rx).await {
                return self.finish();
            }

            let completed = Instant::now();
            next_tick = tick_start + self.interval;
            if completed > next_tick {
                debug!(
                    tick = self.tick,
                    overrun_ms = (completed - next_tick).as_millis() as u64,
                    "Tick overran its interval, skipping"
                );
                next_tick = completed + self.interval;
            }
        }
    }

    /// Evaluate, record and deliver one snapshot. Returns false once stopped.
    async fn process(&mut self, snapshot: Snapshot, stop_rx: &mut watch::Receiver<bool>) -> bool {
        let now = Instant::now();
        let raised = evaluate(self.previous.as_ref(), &snapshot, self.threshold);
        let alerts = check_all(&self.alerts, self.previous.as_ref(), &snapshot);

        let active = {
            let mut flags = self.shared.flags.lock();
            flags.prune(now);
            flags.merge(raised.iter().cloned(), now);
            flags.active(now)
        };
        self.shared.history.write().record(&snapshot);
        self.tick += 1;

        for flag in &raised {
            info!(
                tick = self.tick,
                key = %flag.key,
                previous = flag.previous,
                current = flag.current,
                change_percent = flag.change_percent,
                "Rate moved beyond threshold"
            );
        }
        for alert in &alerts {
            warn!(tick = self.tick, key = %alert.rule.key, value = alert.value, "Alert: {}", alert);
        }
        debug!(
            tick = self.tick,
            provenance = %snapshot.provenance,
            mode = self.source.mode().as_str(),
            flags = active.len(),
            "Tick complete"
        );

        let state = MonitorState {
            tick: self.tick,
            snapshot: Some(snapshot.clone()),
            flags: active,
            mode: self.source.mode(),
            alerts,
        };

        {
            let gate = self.shared.stopped.lock();
            if gate.get() {
                return false;
            }
            self.shared.state_tx.send_replace(state.clone());
            (self.on_update)(&snapshot, &state.flags);
        }

        for output in &self.outputs {
            let emitted = tokio::select! {
                biased;
                _ = wait_stopped(stop_rx) => return false,
                emitted = timeout(self.output_timeout, output.emit(&state)) => emitted,
            };
            match emitted {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(output = output.kind(), error = %e, "Failed to emit update"),
                Err(_) => warn!(
                    output = output.kind(),
                    timeout_ms = self.output_timeout.as_millis() as u64,
                    "Output timed out, update dropped"
                ),
            }
        }

        self.previous = Some(snapshot);
        !self.shared.is_stopped()
    }

    fn finish(self) {
        info!(ticks = self.tick, "Rate monitor stopped");
    }
}

/// Drop expired flags and publish the refreshed state. No callback runs.
fn expire_flags(shared: &Shared, tick: u64) {
    let now = Instant::now();
    let (removed, active) = {
        let mut flags = shared.flags.lock();
        let removed = flags.prune(now);
        (removed, flags.active(now))
    };
    if removed == 0 {
        return;
    }

    debug!(tick, removed, remaining = active.len(), "Flags expired");
    shared.state_tx.send_modify(|state| state.flags = active);
}

/// Resolves once the stop flag is set or the sender is gone.
async fn wait_stopped(stop_rx: &mut watch::Receiver<bool>) {
    while !*stop_rx.borrow_and_update() {
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertRule;
    use parking_lot::Mutex;
    use ratewatch_adapters::{FetchError, FnProvider, RateQuote};
    use ratewatch_types::Provenance;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Updates = Arc<Mutex<Vec<(Snapshot, Vec<Flag>)>>>;

    fn recorder() -> (Updates, impl FnMut(&Snapshot, &[Flag]) + Send + 'static) {
        let updates: Updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        (updates, move |snapshot: &Snapshot, flags: &[Flag]| {
            sink.lock().push((snapshot.clone(), flags.to_vec()))
        })
    }

    /// Replays scripted results, then keeps failing.
    fn scripted(results: Vec<Result<RateQuote, FetchError>>) -> Arc<dyn RateProvider> {
        let script = Arc::new(Mutex::new(VecDeque::from(results)));
        Arc::new(FnProvider::new("scripted", move |_keys: Vec<String>| {
            let next = script
                .lock()
                .pop_front()
                .unwrap_or(Err(FetchError::Connection("refused".into())));
            async move { next }
        }))
    }

    fn fixed(pairs: &'static [(&'static str, f64)]) -> Arc<dyn RateProvider> {
        Arc::new(FnProvider::new("fixed", move |_keys: Vec<String>| async move {
            Ok::<_, FetchError>(RateQuote::from_pairs(pairs.iter().copied()))
        }))
    }

    fn builder() -> MonitorBuilder {
        Monitor::builder()
            .keys(["EUR", "GBP"])
            .interval(Duration::from_secs(1))
            .seed(7)
    }

    #[test]
    fn build_requires_provider() {
        let err = builder().build().unwrap_err();
        assert_eq!(err, ConfigError::NoProvider);
    }

    #[test]
    fn build_validates_config() {
        let err = builder()
            .threshold(-1.0)
            .provider(fixed(&[("EUR", 1.0)]))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidThreshold(-1.0));

        let err = Monitor::builder()
            .provider(fixed(&[("EUR", 1.0)]))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::NoKeys);
    }

    #[test]
    fn builder_sets_config_fields() {
        let monitor = builder()
            .threshold(0.05)
            .flag_ttl(Duration::from_secs(5))
            .max_consecutive_failures(2)
            .fetch_timeout(Duration::from_millis(500))
            .hybrid_retry_probability(0.5)
            .perturbation(0.0, 0.01)
            .history_len(10)
            .provider(fixed(&[("EUR", 1.0)]))
            .build()
            .unwrap();

        let config = monitor.config();
        assert_eq!(config.keys, vec!["EUR", "GBP"]);
        assert_eq!(config.threshold, 0.05);
        assert_eq!(config.flag_ttl, Duration::from_secs(5));
        assert_eq!(config.max_consecutive_failures, 2);
        assert_eq!(config.fetch_timeout, Duration::from_millis(500));
        assert_eq!(config.history_len, 10);
        assert_eq!(config.seed, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate_and_unflagged() {
        let (updates, on_update) = recorder();
        let handle = builder()
            .threshold(0.0)
            .provider(fixed(&[("EUR", 0.9), ("GBP", 0.8)]))
            .build()
            .unwrap()
            .start(on_update);

        tokio::time::sleep(Duration::from_millis(10)).await;
        {
            let updates = updates.lock();
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].0.provenance, Provenance::Live);
            assert!(updates[0].1.is_empty());
        }

        let state = handle.state();
        assert_eq!(state.tick, 1);
        assert_eq!(state.snapshot.unwrap().get("EUR"), Some(0.9));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn live_failure_flags_synthetic_jump_then_expires() {
        let start = Instant::now();
        let (updates, on_update) = recorder();
        let handle = builder()
            .threshold(0.10)
            .flag_ttl(Duration::from_secs(5))
            .provider(scripted(vec![Ok(RateQuote::from_pairs([
                ("EUR", 0.90),
                ("GBP", 0.80),
            ]))]))
            .synthesizer(|key: &str, base: f64| if key == "EUR" { 1.00 } else { base })
            .alert(AlertRule::above("EUR", 0.95))
            .build()
            .unwrap()
            .start(on_update);
        let mut rx = handle.subscribe();

        // Tick 1 (live) and tick 2 (synthetic fallback).
        tokio::time::sleep_until(start + Duration::from_millis(1_500)).await;
        {
            let updates = updates.lock();
            assert_eq!(updates.len(), 2);
            assert!(updates[0].1.is_empty());

            let (snapshot, flags) = &updates[1];
            assert_eq!(snapshot.provenance, Provenance::Synthetic);
            assert_eq!(snapshot.get("EUR"), Some(1.00));
            assert_eq!(snapshot.get("GBP"), Some(0.80));
            assert_eq!(flags.len(), 1);
            assert_eq!(flags[0].key, "EUR");
            assert!(flags[0].is_increase);
            assert!((flags[0].change_percent - 11.111).abs() < 0.01);
        }
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.alerts.len(), 1);
        assert_eq!(state.alerts[0].rule.key, "EUR");

        // Tick 2 ran at start + 1s; its flag lives until start + 6s even
        // though later ticks raise nothing new.
        tokio::time::sleep_until(start + Duration::from_millis(1_000 + 4_999)).await;
        assert_eq!(handle.active_flags().len(), 1);
        assert!(updates.lock().last().is_some_and(|(_, flags)| flags.len() == 1));

        tokio::time::sleep_until(start + Duration::from_millis(1_000 + 5_001)).await;
        assert!(handle.active_flags().is_empty());
        assert!(handle.state().flags.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_between_ticks_publishes_without_callback() {
        let start = Instant::now();
        let values = Arc::new(Mutex::new(VecDeque::from([0.9, 1.0])));
        let provider = FnProvider::new("stepped", move |_keys: Vec<String>| {
            let mut values = values.lock();
            let eur = if values.len() > 1 {
                values.pop_front().unwrap_or(1.0)
            } else {
                values.front().copied().unwrap_or(1.0)
            };
            async move { Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", eur), ("GBP", 0.8)])) }
        });

        let (updates, on_update) = recorder();
        let handle = builder()
            .interval(Duration::from_secs(10))
            .flag_ttl(Duration::from_secs(3))
            .provider(Arc::new(provider))
            .build()
            .unwrap()
            .start(on_update);

        // Ticks at 0s and 10s; the flag raised at 10s expires at 13s.
        tokio::time::sleep_until(start + Duration::from_millis(10_500)).await;
        assert_eq!(handle.state().flags.len(), 1);

        tokio::time::sleep_until(start + Duration::from_millis(13_500)).await;
        assert!(handle.state().flags.is_empty());
        assert_eq!(handle.state().tick, 2);
        assert_eq!(updates.lock().len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetches_never_overlap() {
        let start = Instant::now();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let provider = {
            let (in_flight, max_in_flight, starts) =
                (in_flight.clone(), max_in_flight.clone(), starts.clone());
            FnProvider::new("slow", move |_keys: Vec<String>| {
                let (in_flight, max_in_flight, starts) =
                    (in_flight.clone(), max_in_flight.clone(), starts.clone());
                async move {
                    starts.lock().push(Instant::now());
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2_500)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", 1.0), ("GBP", 1.0)]))
                }
            })
        };

        let (updates, on_update) = recorder();
        let handle = builder()
            .provider(Arc::new(provider))
            .build()
            .unwrap()
            .start(on_update);

        tokio::time::sleep_until(start + Duration::from_millis(8_000)).await;
        handle.shutdown().await;

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        let offsets: Vec<u128> = starts
            .lock()
            .iter()
            .map(|t| (*t - start).as_millis())
            .collect();
        // Each tick overruns the 1s interval, so the next one is scheduled
        // a full interval after completion.
        assert_eq!(offsets, vec![0, 3_500, 7_000]);
        assert_eq!(updates.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_fetches_keep_the_cadence() {
        let start = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let provider = {
            let starts = starts.clone();
            FnProvider::new("quick", move |_keys: Vec<String>| {
                let starts = starts.clone();
                async move {
                    starts.lock().push(Instant::now());
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", 1.0), ("GBP", 1.0)]))
                }
            })
        };

        let (_updates, on_update) = recorder();
        let handle = builder()
            .provider(Arc::new(provider))
            .build()
            .unwrap()
            .start(on_update);

        tokio::time::sleep_until(start + Duration::from_millis(3_500)).await;
        handle.shutdown().await;

        let offsets: Vec<u128> = starts
            .lock()
            .iter()
            .map(|t| (*t - start).as_millis())
            .collect();
        assert_eq!(offsets, vec![0, 1_000, 2_000, 3_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_yields_no_callbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = builder()
            .provider(fixed(&[("EUR", 1.0), ("GBP", 1.0)]))
            .build()
            .unwrap()
            .start(move |_: &Snapshot, _: &[Flag]| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        handle.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state().tick, 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_in_flight_fetch() {
        let start = Instant::now();
        let provider = FnProvider::new("stalled", |_keys: Vec<String>| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", 1.0), ("GBP", 1.0)]))
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = builder()
            .provider(Arc::new(provider))
            .build()
            .unwrap()
            .start(move |_: &Snapshot, _: &[Flag]| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        tokio::time::sleep_until(start + Duration::from_millis(500)).await;
        handle.clone().shutdown().await;
        assert!(Instant::now() - start < Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state().tick, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flags_expire_while_a_fetch_is_in_flight() {
        let start = Instant::now();
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = FnProvider::new("stalls-on-third", move |_keys: Vec<String>| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n >= 2 {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
                let eur = if n == 0 { 0.9 } else { 1.0 };
                Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", eur), ("GBP", 0.8)]))
            }
        });

        let (updates, on_update) = recorder();
        let handle = builder()
            .flag_ttl(Duration::from_millis(1_500))
            .provider(Arc::new(provider))
            .build()
            .unwrap()
            .start(on_update);
        let rx = handle.subscribe();

        // Flag raised by tick 2 at 1s; tick 3 starts fetching at 2s and
        // does not finish until 5s.
        tokio::time::sleep_until(start + Duration::from_millis(1_500)).await;
        assert_eq!(rx.borrow().flags.len(), 1);

        tokio::time::sleep_until(start + Duration::from_millis(3_000)).await;
        assert!(handle.active_flags().is_empty());
        assert!(rx.borrow().flags.is_empty());
        assert_eq!(rx.borrow().tick, 2);
        assert_eq!(updates.lock().len(), 2);

        handle.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stuck_output_does_not_stall_ticks_or_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("updates.fifo");
        let status = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(status.success());

        // Nothing reads the pipe, so every file write blocks opening it.
        let (updates, on_update) = recorder();
        let handle = builder()
            .interval(Duration::from_millis(100))
            .output_timeout(Duration::from_millis(50))
            .provider(fixed(&[("EUR", 0.9), ("GBP", 0.8)]))
            .output(Output::file(&fifo))
            .build()
            .unwrap()
            .start(on_update);

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        let shutdown = tokio::time::timeout(Duration::from_secs(1), handle.clone().shutdown()).await;
        assert!(shutdown.is_ok());
        assert!(updates.lock().len() >= 5);

        // Release the writers still blocked on the pipe.
        let _reader = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&fifo)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn state_read_inside_callback_matches_the_tick() {
        let slot: Arc<std::sync::OnceLock<SessionHandle>> = Arc::new(std::sync::OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let (slot, seen) = (slot.clone(), seen.clone());
            builder()
                .max_consecutive_failures(1)
                .hybrid_retry_probability(0.0)
                .provider(scripted(vec![Ok(RateQuote::from_pairs([
                    ("EUR", 0.9),
                    ("GBP", 0.8),
                ]))]))
                .build()
                .unwrap()
                .start(move |snapshot: &Snapshot, _: &[Flag]| {
                    if let Some(handle) = slot.get() {
                        let state = handle.state();
                        let same = state.snapshot.as_ref() == Some(snapshot);
                        seen.lock().push((state.tick, state.mode, same));
                    }
                })
        };
        let _ = slot.set(handle.clone());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        handle.shutdown().await;

        let seen = seen.lock();
        assert!(seen.len() >= 3);
        assert!(seen.iter().all(|(_, _, same)| *same));
        let ticks: Vec<u64> = seen.iter().map(|(tick, _, _)| *tick).collect();
        let expected: Vec<u64> = (ticks[0]..ticks[0] + ticks.len() as u64).collect();
        assert_eq!(ticks, expected);
        assert_eq!(seen.last().map(|(_, mode, _)| *mode), Some(crate::source::SourceMode::Hybrid));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_inside_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<SessionHandle>>> = Arc::new(Mutex::new(None));

        let handle = {
            let (calls, slot) = (calls.clone(), slot.clone());
            builder()
                .provider(fixed(&[("EUR", 1.0), ("GBP", 1.0)]))
                .build()
                .unwrap()
                .start(move |_: &Snapshot, _: &[Flag]| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if let Some(handle) = slot.lock().as_ref() {
                        handle.stop();
                    }
                })
        };
        *slot.lock() = Some(handle.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_stopped());

        slot.lock().take();
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_across_clones() {
        let (updates, on_update) = recorder();
        let handle = builder()
            .provider(fixed(&[("EUR", 1.0), ("GBP", 1.0)]))
            .build()
            .unwrap()
            .start(on_update);
        let other = handle.clone();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.stop();
        handle.stop();
        other.stop();
        let seen = updates.lock().len();
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(updates.lock().len(), seen);

        other.shutdown().await;
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn updates_arrive_in_tick_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let provider = {
            let counter = counter.clone();
            FnProvider::new("counting", move |_keys: Vec<String>| {
                let n = counter.fetch_add(1, Ordering::SeqCst) as f64;
                async move {
                    Ok::<_, FetchError>(RateQuote::from_pairs([("EUR", 1.0 + n), ("GBP", 1.0)]))
                }
            })
        };

        let (updates, on_update) = recorder();
        let handle = builder()
            .threshold(10.0)
            .provider(Arc::new(provider))
            .build()
            .unwrap()
            .start(on_update);

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        handle.shutdown().await;

        let eur: Vec<f64> = updates
            .lock()
            .iter()
            .filter_map(|(s, _)| s.get("EUR"))
            .collect();
        assert_eq!(eur, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_switch_to_hybrid() {
        let (updates, on_update) = recorder();
        let handle = builder()
            .max_consecutive_failures(2)
            .hybrid_retry_probability(0.0)
            .provider(scripted(vec![]))
            .build()
            .unwrap()
            .start(on_update);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.state().mode, crate::source::SourceMode::Normal);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let state = handle.state();
        assert_eq!(state.mode, crate::source::SourceMode::Hybrid);
        assert!(state.is_degraded());
        assert!(updates
            .lock()
            .iter()
            .all(|(s, _)| s.provenance == Provenance::Synthetic));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn history_and_outputs_follow_ticks() {
        let (output, mut rx) = Output::channel(16);
        let (_updates, on_update) = recorder();
        let handle = builder()
            .history_len(3)
            .provider(fixed(&[("EUR", 0.9), ("GBP", 0.8)]))
            .output(output)
            .build()
            .unwrap()
            .start(on_update);

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        handle.clone().shutdown().await;

        let history = handle.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history.values("EUR"), vec![0.9, 0.9, 0.9]);

        let mut ticks = Vec::new();
        while let Ok(state) = rx.try_recv() {
            ticks.push(state.tick);
        }
        assert_eq!(ticks, vec![1, 2, 3, 4, 5]);
    }
}
