use crate::api::cached_client::CachedPosClient;
use crate::api::client::PosClient;
use crate::cache::{CacheLayer, LocalCache};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{Database, KvStore, MemoryStore};
use crate::network::{HttpProbe, NetworkEvent, NetworkMonitor};
use crate::notify::ConsoleNotifier;
use crate::queue::{RetryReport, SaleQueue, SaleSync};
use color_eyre::{eyre::eyre, Result};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Backing store shared by the list cache and the sale queue
pub type Store = Arc<dyn KvStore>;

/// Upper bound for a single connectivity probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Tenant every command acts for
  tenant: String,

  /// Backend client with list caching
  client: CachedPosClient<Store>,

  /// Live submission and batch retry of sales
  sync: SaleSync<Store, PosClient>,

  clock: Arc<dyn Clock>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let tenant = config.require_tenant()?.to_string();
    let store = open_store(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ttl = chrono::Duration::try_hours(config.cache.ttl_hours)
      .ok_or_else(|| eyre!("cache.ttl_hours {} is out of range", config.cache.ttl_hours))?;
    let cache = CacheLayer::new(LocalCache::new(Arc::clone(&store), Arc::clone(&clock)).with_ttl(ttl));
    let client = PosClient::new(&config)?;
    let queue = Arc::new(SaleQueue::new(Arc::clone(&store), Arc::clone(&clock)));

    let sync = SaleSync::new(
      client.clone(),
      queue,
      cache.clone(),
      Arc::new(ConsoleNotifier),
      Arc::clone(&clock),
    )
    .with_policy(config.queue.policy());

    Ok(Self {
      config,
      tenant,
      client: CachedPosClient::new(client, cache),
      sync,
      clock,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn tenant(&self) -> &str {
    &self.tenant
  }

  pub fn client(&self) -> &CachedPosClient<Store> {
    &self.client
  }

  pub fn sync(&self) -> &SaleSync<Store, PosClient> {
    &self.sync
  }

  pub fn queue(&self) -> &SaleQueue<Store> {
    self.sync.queue()
  }

  pub fn clock(&self) -> &dyn Clock {
    self.clock.as_ref()
  }

  /// Retry the tenant's pending sales right away.
  pub async fn sync_now(&self) -> RetryReport {
    self.sync.retry_all(&self.tenant).await
  }

  /// Retry pending sales whenever connectivity comes back, until Ctrl-C.
  ///
  /// A retry runs once `retry_delay` after the first `Online` event and
  /// after every offline-to-online transition. If the link drops during
  /// that delay the retry is skipped. Nothing retries on a timer.
  pub async fn watch(&self) -> Result<()> {
    let probe = HttpProbe::new(
      self.client.inner().base_url().clone(),
      PROBE_TIMEOUT.min(Duration::from_secs(self.config.api.timeout_secs)),
    )?;
    let interval = Duration::from_secs(self.config.network.probe_interval_secs);
    let monitor = NetworkMonitor::spawn(probe, interval);

    info!(tenant = self.tenant.as_str(), "Watching connectivity");
    eprintln!(
      "Watching connectivity for {} ({} pending). Press Ctrl-C to stop.",
      self.tenant,
      self.queue().count(&self.tenant)
    );

    let ctrl_c = async {
      tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))
    };

    drive_retries(monitor, self.sync.policy().retry_delay, ctrl_c, move || async move {
      let report = self.sync_now().await;
      debug!(?report, "Retry finished");
    })
    .await
  }
}

/// Run `retry` for each event `RetryTrigger` accepts, `delay` after it.
///
/// An `Offline` event inside the delay cancels the pending retry. Returns when
/// `shutdown` resolves or the event stream ends.
pub(crate) async fn drive_retries<E, S, F, Fut>(
  mut events: E,
  delay: Duration,
  shutdown: S,
  mut retry: F,
) -> Result<()>
where
  E: Stream<Item = NetworkEvent> + Unpin,
  S: Future<Output = Result<()>>,
  F: FnMut() -> Fut,
  Fut: Future<Output = ()>,
{
  let settle = tokio::time::sleep(delay);
  tokio::pin!(settle);
  tokio::pin!(shutdown);
  let mut armed = false;
  let mut trigger = RetryTrigger::default();

  loop {
    tokio::select! {
      res = &mut shutdown => {
        res?;
        info!("Stopping watch");
        break;
      }
      event = events.next() => {
        let Some(event) = event else {
          break;
        };
        if trigger.on_event(event) {
          match Instant::now().checked_add(delay) {
            Some(deadline) => {
              debug!(?delay, "Connectivity back, retry scheduled");
              settle.as_mut().reset(deadline);
              armed = true;
            }
            None => warn!(?delay, "Retry delay out of range, skipping retry"),
          }
        } else if event == NetworkEvent::Offline && armed {
          debug!("Link dropped before retry, skipping it");
          armed = false;
        }
      }
      () = &mut settle, if armed => {
        armed = false;
        retry().await;
      }
    }
  }

  Ok(())
}

fn open_store(config: &Config) -> Result<Store> {
  if config.storage.in_memory {
    debug!("Using in-memory store");
    return Ok(Arc::new(MemoryStore::new()));
  }
  let db = Database::open(config.storage.path.as_deref())?;
  Ok(Arc::new(db))
}

/// Decides which connectivity events start a retry.
#[derive(Debug, Default)]
struct RetryTrigger {
  last: Option<NetworkEvent>,
}

impl RetryTrigger {
  /// True for the first `Online` event and for every offline-to-online edge.
  fn on_event(&mut self, event: NetworkEvent) -> bool {
    let previous = self.last.replace(event);
    event == NetworkEvent::Online && previous != Some(NetworkEvent::Online)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::channel::mpsc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::time::sleep;
  use NetworkEvent::{Offline, Online};

  const DELAY: Duration = Duration::from_millis(2000);

  /// Runs `drive_retries` over a channel while `script` feeds it events.
  /// The script drops the sender when done, which ends the driver.
  async fn run_script<Fut>(
    delay: Duration,
    script: impl FnOnce(mpsc::UnboundedSender<NetworkEvent>, Arc<AtomicUsize>) -> Fut,
  ) -> usize
  where
    Fut: Future<Output = ()>,
  {
    let (tx, rx) = mpsc::unbounded();
    let retries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&retries);

    let driver = drive_retries(rx, delay, std::future::pending::<Result<()>>(), move || {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
      }
    });

    let (res, ()) = tokio::join!(driver, script(tx, Arc::clone(&retries)));
    res.unwrap();
    retries.load(Ordering::SeqCst)
  }

  fn fire(events: &[NetworkEvent]) -> Vec<bool> {
    let mut trigger = RetryTrigger::default();
    events.iter().map(|e| trigger.on_event(*e)).collect()
  }

  #[test]
  fn test_mount_trigger_when_starting_online() {
    assert_eq!(fire(&[Online]), vec![true]);
  }

  #[test]
  fn test_edge_trigger_on_reconnect() {
    assert_eq!(
      fire(&[Offline, Online, Offline, Online]),
      vec![false, true, false, true]
    );
  }

  #[test]
  fn test_repeated_online_does_not_retrigger() {
    assert_eq!(fire(&[Online, Online]), vec![true, false]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_waits_for_settle_delay() {
    let total = run_script(DELAY, |tx, retries| async move {
      tx.unbounded_send(Online).unwrap();
      sleep(DELAY - Duration::from_millis(100)).await;
      assert_eq!(retries.load(Ordering::SeqCst), 0);
      sleep(Duration::from_millis(200)).await;
      assert_eq!(retries.load(Ordering::SeqCst), 1);
    })
    .await;
    assert_eq!(total, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_during_delay_skips_retry() {
    let total = run_script(DELAY, |tx, retries| async move {
      tx.unbounded_send(Online).unwrap();
      sleep(Duration::from_millis(500)).await;
      tx.unbounded_send(Offline).unwrap();
      sleep(Duration::from_secs(3)).await;
      assert_eq!(retries.load(Ordering::SeqCst), 0);
    })
    .await;
    assert_eq!(total, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnect_rearms_retry() {
    let total = run_script(DELAY, |tx, retries| async move {
      tx.unbounded_send(Offline).unwrap();
      sleep(Duration::from_secs(1)).await;
      assert_eq!(retries.load(Ordering::SeqCst), 0);

      tx.unbounded_send(Online).unwrap();
      sleep(DELAY + Duration::from_millis(100)).await;
      assert_eq!(retries.load(Ordering::SeqCst), 1);

      tx.unbounded_send(Offline).unwrap();
      tx.unbounded_send(Online).unwrap();
      sleep(DELAY + Duration::from_millis(100)).await;
      assert_eq!(retries.load(Ordering::SeqCst), 2);
    })
    .await;
    assert_eq!(total, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unrepresentable_delay_never_retries() {
    let total = run_script(Duration::MAX, |tx, _| async move {
      tx.unbounded_send(Online).unwrap();
      sleep(Duration::from_secs(3600)).await;
    })
    .await;
    assert_eq!(total, 0);
  }

  #[tokio::test]
  async fn test_shutdown_error_is_returned() {
    let (_tx, rx) = mpsc::unbounded::<NetworkEvent>();
    let res = drive_retries(rx, DELAY, async { Err::<(), _>(eyre!("no signal")) }, || async {}).await;
    assert!(res.is_err());
  }

  #[test]
  fn test_out_of_range_ttl_is_an_error() {
    let yaml = "api:\n  url: http://127.0.0.1:9\ntenant: org_1\ncache:\n  ttl_hours: 9000000000000000\nstorage:\n  in_memory: true\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert!(App::new(config).is_err());
  }

  #[test]
  fn test_in_memory_app() {
    let yaml = "api:\n  url: http://127.0.0.1:9\ntenant: org_1\nstorage:\n  in_memory: true\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    let app = App::new(config).unwrap();
    assert_eq!(app.tenant(), "org_1");
    assert_eq!(app.queue().count("org_1"), 0);
    assert!(app.client().cache_entries("org_1").is_empty());
  }
}
