//! Background status delivery.
//!
//! A feeder thread pulls from the job's subscription with a bounded wait and
//! hands messages to a dispatcher thread over a channel. The dispatcher
//! decodes each payload, invokes the handler, then acknowledges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clash_protocol::{ReceivedMessage, StatusMessage, SubscriptionPath};
use tracing::{debug, warn};

use crate::cloud::{CloudError, MessageBus};

/// A running listener on one subscription. Stops on drop.
pub struct StatusListener {
    job: String,
    stop: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl StatusListener {
    pub(crate) fn spawn<F>(
        job: &str,
        bus: Arc<dyn MessageBus>,
        subscription: SubscriptionPath,
        pull_wait: Duration,
        handler: F,
    ) -> Self
    where
        F: FnMut(StatusMessage) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let feeder = {
            let job = job.to_string();
            let bus = bus.clone();
            let subscription = subscription.clone();
            let stop = stop.clone();
            thread::spawn(move || feed(&job, bus.as_ref(), &subscription, pull_wait, &stop, tx))
        };

        let dispatcher = {
            let job = job.to_string();
            let stop = stop.clone();
            thread::spawn(move || dispatch(&job, bus.as_ref(), &subscription, &stop, rx, handler))
        };

        debug!(job, "status listener started");
        Self {
            job: job.to_string(),
            stop,
            feeder: Some(feeder),
            dispatcher: Some(dispatcher),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
            && self.feeder.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop both threads. Returns after at most one pull wait.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in [self.feeder.take(), self.dispatcher.take()].into_iter().flatten() {
            // A handler that drops its own listener must not join itself.
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                warn!(job = %self.job, "status listener thread panicked");
            }
        }
    }
}

impl Drop for StatusListener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StatusListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusListener")
            .field("job", &self.job)
            .field("running", &self.is_running())
            .finish()
    }
}

fn feed(
    job: &str,
    bus: &dyn MessageBus,
    subscription: &SubscriptionPath,
    pull_wait: Duration,
    stop: &AtomicBool,
    tx: Sender<ReceivedMessage>,
) {
    while !stop.load(Ordering::SeqCst) {
        match bus.pull(subscription, pull_wait) {
            Ok(Some(received)) => {
                if tx.send(received).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(CloudError::NotFound(e)) => {
                warn!(job, subscription = %subscription, error = %e, "status subscription is gone");
                break;
            }
            Err(e) => {
                warn!(job, subscription = %subscription, error = %e, "status pull failed");
                thread::sleep(pull_wait);
            }
        }
    }
    debug!(job, "status feeder stopped");
}

fn dispatch<F>(
    job: &str,
    bus: &dyn MessageBus,
    subscription: &SubscriptionPath,
    stop: &AtomicBool,
    rx: Receiver<ReceivedMessage>,
    mut handler: F,
) where
    F: FnMut(StatusMessage),
{
    for received in rx {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let decoded = received
            .message
            .decode_data()
            .and_then(|data| StatusMessage::from_slice(&data));
        match decoded {
            Ok(status) => {
                debug!(job, status = status.status, "status received");
                handler(status);
            }
            Err(e) => warn!(
                job,
                message_id = %received.message.message_id,
                error = %e,
                "dropping malformed status message"
            ),
        }
        if let Err(e) = bus.acknowledge(subscription, &[received.ack_id]) {
            warn!(job, error = %e, "failed to acknowledge status message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCloud;
    use clash_protocol::TopicPath;
    use std::sync::Mutex;
    use std::time::Instant;

    fn setup() -> (MockCloud, SubscriptionPath) {
        let cloud = MockCloud::new();
        let topic = TopicPath::new("p", "job-1");
        let subscription = SubscriptionPath::new("p", "job-1");
        cloud.create_topic(&topic, &[]).unwrap();
        cloud.create_subscription(&subscription, &topic).unwrap();
        (cloud, subscription)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let start = Instant::now();
        while !condition() {
            assert!(start.elapsed() < Duration::from_secs(5), "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_delivers_and_acknowledges() {
        let (cloud, subscription) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut listener = StatusListener::spawn(
            "job-1",
            Arc::new(cloud.clone()),
            subscription,
            Duration::from_millis(10),
            move |status| sink.lock().unwrap().push(status.status),
        );

        cloud.publish_status("job-1", 7).unwrap();
        wait_for(|| !seen.lock().unwrap().is_empty());
        wait_for(|| cloud.unacked_count("projects/p/subscriptions/job-1") == 0);
        listener.stop();

        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert!(!listener.is_running());
    }

    #[test]
    fn test_malformed_payload_is_acked_and_dropped() {
        let (cloud, subscription) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _listener = StatusListener::spawn(
            "job-1",
            Arc::new(cloud.clone()),
            subscription,
            Duration::from_millis(10),
            move |status| sink.lock().unwrap().push(status.status),
        );

        cloud.publish_raw("job-1", b"not json").unwrap();
        cloud.publish_status("job-1", 0).unwrap();
        wait_for(|| !seen.lock().unwrap().is_empty());
        wait_for(|| cloud.unacked_count("projects/p/subscriptions/job-1") == 0);

        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(cloud.queued_count("projects/p/subscriptions/job-1"), 0);
    }

    #[test]
    fn test_stops_when_subscription_deleted() {
        let (cloud, subscription) = setup();
        let listener = StatusListener::spawn(
            "job-1",
            Arc::new(cloud.clone()),
            subscription.clone(),
            Duration::from_millis(10),
            |_| {},
        );
        cloud.delete_subscription(&subscription).unwrap();
        wait_for(|| !listener.is_running());
    }
}
