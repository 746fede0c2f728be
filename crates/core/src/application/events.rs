// Job event bus
//
// Every event is published twice: once under its generic topic ("fail")
// and once scoped to the job name ("fail:send-email").

use crate::domain::Job;
use std::fmt;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Complete,
    Success,
    Fail,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Complete => "complete",
            EventKind::Success => "success",
            EventKind::Fail => "fail",
        }
    }

    /// Topic scoped to a job name
    pub fn scoped(&self, job_name: &str) -> String {
        format!("{}:{}", self.as_str(), job_name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: EventKind,
    pub topic: String,
    pub job: Job,
    /// Failure reason for `Fail` events
    pub error: Option<String>,
}

/// Broadcast fan-out of job events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish on the generic and the name-scoped topic
    pub fn emit(&self, kind: EventKind, job: &Job, error: Option<&str>) {
        // No receivers is not an error
        for topic in [kind.as_str().to_string(), kind.scoped(&job.name)] {
            let _ = self.tx.send(JobEvent {
                kind,
                topic,
                job: job.clone(),
                error: error.map(str::to_string),
            });
        }
    }

    /// Receive every topic
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            topic: None,
        }
    }

    /// Receive one topic, e.g. "fail" or "success:report"
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            topic: Some(topic.into()),
        }
    }
}

pub struct EventSubscription {
    rx: broadcast::Receiver<JobEvent>,
    topic: Option<String>,
}

impl EventSubscription {
    /// Next matching event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.topic.as_deref().map_or(true, |t| t == event.topic) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.topic.as_deref().map_or(true, |t| t == event.topic) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "Event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobPayload;

    #[tokio::test]
    async fn test_emit_publishes_generic_and_scoped() {
        let bus = EventBus::new(16);
        let mut all = bus.subscribe();
        let job = Job::new("report", JobPayload::default(), 0);

        bus.emit(EventKind::Fail, &job, Some("Timeout"));

        let first = all.recv().await.unwrap();
        let second = all.recv().await.unwrap();
        assert_eq!(first.topic, "fail");
        assert_eq!(second.topic, "fail:report");
        assert_eq!(second.error.as_deref(), Some("Timeout"));
    }

    #[tokio::test]
    async fn test_topic_filter() {
        let bus = EventBus::new(16);
        let mut scoped = bus.subscribe_topic("success:report");
        let report = Job::new("report", JobPayload::default(), 0);
        let other = Job::new("other", JobPayload::default(), 0);

        bus.emit(EventKind::Success, &other, None);
        bus.emit(EventKind::Start, &report, None);
        bus.emit(EventKind::Success, &report, None);

        let event = scoped.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Success);
        assert_eq!(event.job.name, "report");
        assert!(scoped.try_recv().is_none());
    }
}
