use color_eyre::{eyre::eyre, Result};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

/// Connectivity changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
  Online,
  Offline,
}

impl NetworkEvent {
  fn from_online(online: bool) -> Self {
    if online {
      NetworkEvent::Online
    } else {
      NetworkEvent::Offline
    }
  }
}

/// One connectivity check
pub trait Probe: Send + Sync + 'static {
  fn is_online(&self) -> impl Future<Output = bool> + Send;
}

/// Online when the API host answers at all, whatever the status code.
pub struct HttpProbe {
  http: reqwest::Client,
  url: Url,
}

impl HttpProbe {
  pub fn new(url: Url, timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create connectivity HTTP client: {}", e))?;
    Ok(Self { http, url })
  }
}

impl Probe for HttpProbe {
  async fn is_online(&self) -> bool {
    match self.http.get(self.url.clone()).send().await {
      Ok(_) => true,
      Err(e) => {
        debug!(error = %e, "Probe failed");
        false
      }
    }
  }
}

/// Turns a stream of probe results into edge events.
#[derive(Debug, Default)]
struct Transitions {
  last: Option<bool>,
}

impl Transitions {
  /// The event to emit for this observation, if the state changed.
  fn observe(&mut self, online: bool) -> Option<NetworkEvent> {
    if self.last == Some(online) {
      return None;
    }
    self.last = Some(online);
    Some(NetworkEvent::from_online(online))
  }
}

/// Polls a probe in the background and reports the initial state, then every change
pub struct NetworkMonitor {
  rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl NetworkMonitor {
  pub fn spawn<P: Probe>(probe: P, interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut transitions = Transitions::default();
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        let online = probe.is_online().await;
        if let Some(event) = transitions.observe(online) {
          info!(?event, "Connectivity changed");
          if tx.send(event).is_err() {
            break;
          }
        }
      }
    });

    Self { rx }
  }
}

impl Stream for NetworkMonitor {
  type Item = NetworkEvent;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<NetworkEvent>> {
    self.rx.poll_recv(cx)
  }
}
