//! Push messages and notification clicks.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// A system notification shown for a push message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  /// Arbitrary data attached by the sender; `data.url` is opened on click
  #[serde(default)]
  pub data: Value,
}

impl Notification {
  /// Explicit click target carried in the notification data, if any.
  pub fn target_url(&self) -> Option<&str> {
    self.data.get("url").and_then(Value::as_str)
  }
}

/// Platform side of notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: &Notification) -> Result<()>;

  async fn close(&self, notification: &Notification) -> Result<()>;

  /// Open a new window/tab on `url`.
  async fn open_window(&self, url: &Url) -> Result<()>;
}

/// Notifier for headless runs: writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn show(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "notification");
    Ok(())
  }

  async fn close(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, "notification closed");
    Ok(())
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    info!(%url, "open window");
    Ok(())
  }
}

pub struct PushHandler {
  notifier: Arc<dyn Notifier>,
  origin: Url,
  default_title: String,
  landing_route: String,
  icon: Option<String>,
}

impl PushHandler {
  pub fn new(
    notifier: Arc<dyn Notifier>,
    origin: Url,
    default_title: String,
    landing_route: String,
    icon: Option<String>,
  ) -> Self {
    Self {
      notifier,
      origin,
      default_title,
      landing_route,
      icon,
    }
  }

  /// Turn a raw push payload into a notification.
  ///
  /// JSON objects supply `title`, `body` and `data`, each read on its own so
  /// one odd field does not discard the rest. Anything else becomes the body
  /// of a notification with the default title.
  pub fn parse(&self, payload: &[u8]) -> Notification {
    let (title, body, data) = match serde_json::from_slice::<Value>(payload) {
      Ok(Value::Object(mut fields)) => {
        let title = fields.get("title").and_then(Value::as_str).map(str::to_string);
        let body = match fields.get("body") {
          Some(Value::String(body)) => body.clone(),
          Some(Value::Null) | None => String::new(),
          Some(other) => other.to_string(),
        };
        (title, body, fields.remove("data").unwrap_or(Value::Null))
      }
      _ => (None, String::from_utf8_lossy(payload).into_owned(), Value::Null),
    };

    Notification {
      title: title.unwrap_or_else(|| self.default_title.clone()),
      body,
      icon: self.icon.clone(),
      data,
    }
  }

  /// Show a notification for an incoming push message.
  pub async fn on_push(&self, payload: &[u8]) -> Result<Notification> {
    let notification = self.parse(payload);
    self.notifier.show(&notification).await?;
    Ok(notification)
  }

  /// Close the notification, open the landing route and then any target URL
  /// it carries. Returns the URLs opened.
  pub async fn on_click(&self, notification: &Notification) -> Result<Vec<Url>> {
    self.notifier.close(notification).await?;

    let mut targets = vec![self.origin.join(&self.landing_route)?];
    if let Some(target) = notification.target_url() {
      match self.origin.join(target) {
        Ok(url) => targets.push(url),
        Err(e) => warn!(url = target, error = %e, "ignoring invalid notification url"),
      }
    }

    for url in &targets {
      self.notifier.open_window(url).await?;
    }

    Ok(targets)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::RecordingNotifier;

  fn handler(notifier: &Arc<RecordingNotifier>) -> PushHandler {
    PushHandler::new(
      notifier.clone(),
      Url::parse("http://localhost:5000").unwrap(),
      "QuestByCycle".to_string(),
      "/notifications/".to_string(),
      None,
    )
  }

  #[tokio::test]
  async fn push_shows_title_and_body() {
    let notifier = Arc::new(RecordingNotifier::default());
    let push = handler(&notifier);

    let shown = push.on_push(br#"{"title":"Hi","body":"Hello"}"#).await.unwrap();

    assert_eq!(shown.title, "Hi");
    assert_eq!(shown.body, "Hello");
    assert_eq!(notifier.shown.lock().unwrap().as_slice(), &[shown]);
  }

  #[test]
  fn missing_title_uses_default() {
    let notifier = Arc::new(RecordingNotifier::default());
    let n = handler(&notifier).parse(br#"{"body":"New badge earned"}"#);
    assert_eq!(n.title, "QuestByCycle");
    assert_eq!(n.body, "New badge earned");
  }

  #[test]
  fn malformed_payload_becomes_plain_text_body() {
    let notifier = Arc::new(RecordingNotifier::default());
    let push = handler(&notifier);

    let n = push.parse(b"Your quest was approved");
    assert_eq!(n.title, "QuestByCycle");
    assert_eq!(n.body, "Your quest was approved");
    assert_eq!(n.data, Value::Null);

    let n = push.parse(b"42");
    assert_eq!(n.body, "42");
  }

  #[test]
  fn mistyped_fields_do_not_discard_the_rest() {
    let notifier = Arc::new(RecordingNotifier::default());
    let push = handler(&notifier);

    let n = push.parse(br#"{"title":"Hi","body":5,"data":{"url":"/quests/1"}}"#);
    assert_eq!(n.title, "Hi");
    assert_eq!(n.body, "5");
    assert_eq!(n.target_url(), Some("/quests/1"));

    let n = push.parse(br#"{"title":7,"body":"Hello"}"#);
    assert_eq!(n.title, "QuestByCycle");
    assert_eq!(n.body, "Hello");
  }

  #[tokio::test]
  async fn click_opens_landing_route() {
    let notifier = Arc::new(RecordingNotifier::default());
    let push = handler(&notifier);
    let n = push.parse(br#"{"title":"Hi","body":"Hello"}"#);

    let opened = push.on_click(&n).await.unwrap();

    assert_eq!(opened, vec![Url::parse("http://localhost:5000/notifications/").unwrap()]);
    assert_eq!(notifier.closed.lock().unwrap().len(), 1);
    assert_eq!(notifier.opened.lock().unwrap().clone(), opened);
  }

  #[tokio::test]
  async fn click_also_opens_data_url() {
    let notifier = Arc::new(RecordingNotifier::default());
    let push = handler(&notifier);
    let n = push.parse(br#"{"title":"Hi","body":"Hello","data":{"url":"/quests/12"}}"#);

    let opened = push.on_click(&n).await.unwrap();

    assert_eq!(
      opened,
      vec![
        Url::parse("http://localhost:5000/notifications/").unwrap(),
        Url::parse("http://localhost:5000/quests/12").unwrap(),
      ]
    );
  }
}
