use crate::domain::jobs::JobRequest;
use crate::ports::queue::JobQueue;
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Bounded in-process job queue shared by the dispatcher and the workers.
#[derive(Clone)]
pub struct ChannelQueue {
    // Single sender shared by every clone; `None` once closed.
    sender: Arc<Mutex<Option<mpsc::Sender<JobRequest>>>>,
    receiver: Arc<Mutex<mpsc::Receiver<JobRequest>>>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Stop accepting jobs. Queued jobs are still handed out, after which
    /// `pop` returns `None`.
    pub async fn close(&self) {
        self.sender.lock().await.take();
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn push(&self, request: JobRequest) -> Result<(), Box<dyn Error + Send + Sync>> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or("job queue is closed")?;
        sender.send(request).await.map_err(|_| "job queue is closed")?;
        Ok(())
    }

    async fn pop(
        &self,
        wait: Option<Duration>,
    ) -> Result<Option<JobRequest>, Box<dyn Error + Send + Sync>> {
        let mut receiver = self.receiver.lock().await;
        match wait {
            None => Ok(receiver.recv().await),
            Some(limit) => Ok(tokio::time::timeout(limit, receiver.recv())
                .await
                .unwrap_or(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::NaturalKey;

    fn job(user: &str) -> JobRequest {
        JobRequest::new(NaturalKey::new("m", "1", user).unwrap())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = ChannelQueue::new(4);
        queue.push(job("a")).await.unwrap();
        queue.push(job("b")).await.unwrap();

        let first = queue.pop(Some(Duration::from_secs(1))).await.unwrap().unwrap();
        let second = queue.pop(Some(Duration::from_secs(1))).await.unwrap().unwrap();
        assert_eq!(first.key.user_id, "a");
        assert_eq!(second.key.user_id, "b");
    }

    #[tokio::test]
    async fn test_pop_times_out_empty() {
        let queue = ChannelQueue::new(1);
        assert!(queue.pop(Some(Duration::from_millis(50))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_drains() {
        let queue = ChannelQueue::new(4);
        queue.push(job("a")).await.unwrap();
        queue.close().await;

        assert!(queue.push(job("b")).await.is_err());
        assert!(queue.pop(None).await.unwrap().is_some());
        assert!(queue.pop(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_idle_consumer() {
        let queue = ChannelQueue::new(1);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(None).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close().await;
        let job = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer still blocked")
            .unwrap();
        assert!(job.is_none());
    }
}
