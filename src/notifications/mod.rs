//! Best effort delivery of messages to users.
//!
//! Callers hand messages to a [`NotificationQueue`] and move on. A worker
//! task delivers them in the background, failures end up in the log and
//! nowhere else.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

pub mod clients;

pub use clients::{ConsoleMailer, EmailClient, Message, SendgridMailer};

pub type DynEmailClient = Arc<dyn EmailClient>;

#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Message>,
}

impl NotificationQueue {
    /// Start a worker delivering queued messages through `client`.
    ///
    /// # Arguments
    ///
    /// * `client` - The client messages are delivered with.
    /// * `capacity` - How many messages may wait for delivery before new
    ///   ones are dropped.
    ///
    /// # Returns
    ///
    /// The queue, and the handle of the worker. The worker stops once every
    /// clone of the queue has been dropped.
    pub fn start(client: DynEmailClient, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Message>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match client.send(&message).await {
                    Ok(()) => debug!(subject = %message.subject, "Delivered notification."),
                    Err(error) => {
                        warn!(?error, subject = %message.subject, "Failed to deliver notification.")
                    }
                }
            }
        });

        (Self { sender }, worker)
    }

    /// Queue a message without waiting for it to be delivered.
    pub fn submit(&self, message: Message) {
        if let Err(error) = self.sender.try_send(message) {
            warn!(%error, "Dropping notification.");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl EmailClient for RecordingClient {
        async fn send(&self, message: &Message) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message.clone());

            Ok(())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl EmailClient for FailingClient {
        async fn send(&self, _: &Message) -> anyhow::Result<()> {
            Err(anyhow!("mail server is down"))
        }
    }

    fn message(subject: &str) -> Message {
        Message {
            to: "someone@example.com".to_owned(),
            subject: subject.to_owned(),
            text: "Hello".to_owned(),
        }
    }

    #[tokio::test]
    async fn queued_messages_are_delivered() {
        let client = Arc::new(RecordingClient::default());
        let (queue, worker) = NotificationQueue::start(client.clone(), 4);

        queue.submit(message("first"));
        queue.submit(message("second"));
        drop(queue);
        worker.await.unwrap();

        let subjects = client
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.subject.clone())
            .collect::<Vec<_>>();
        assert_eq!(vec!["first", "second"], subjects);
    }

    #[tokio::test]
    async fn failed_deliveries_do_not_stop_the_worker() {
        let (queue, worker) = NotificationQueue::start(Arc::new(FailingClient), 4);

        queue.submit(message("first"));
        queue.submit(message("second"));
        drop(queue);

        assert!(worker.await.is_ok());
    }
}
