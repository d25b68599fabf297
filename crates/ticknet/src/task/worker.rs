use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// One-shot computation on a dedicated thread whose result is polled.
#[derive(Debug)]
pub struct Worker<T> {
    result: Option<T>,
    receiver: Option<Receiver<T>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn<F>(name: &str, work: F) -> io::Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        thread::Builder::new().name(name.to_string()).spawn(move || {
            // The receiving side may have been dropped already.
            let _ = sender.send(work());
        })?;

        Ok(Self {
            result: None,
            receiver: Some(receiver),
        })
    }

    /// Waits at most `wait` for the result. Returns it on every call once available.
    pub fn poll(&mut self, wait: Duration) -> Option<&T> {
        if self.result.is_none() {
            let receiver = self.receiver.as_ref()?;
            match receiver.recv_timeout(wait) {
                Ok(value) => {
                    self.result = Some(value);
                    self.receiver = None;
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("Worker thread exited without producing a result");
                    self.receiver = None;
                    return None;
                }
            }
        }
        self.result.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some() || self.receiver.is_none()
    }

    pub fn into_result(mut self) -> Option<T> {
        self.result.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_worker_poll_until_ready() {
        let mut worker = Worker::spawn("test-worker", || {
            thread::sleep(Duration::from_millis(20));
            42
        })
        .unwrap();

        let start = Instant::now();
        while worker.poll(Duration::from_millis(1)).is_none() {
            assert!(start.elapsed() < Duration::from_secs(5));
        }

        assert!(worker.is_finished());
        assert_eq!(worker.poll(Duration::ZERO), Some(&42));
        assert_eq!(worker.into_result(), Some(42));
    }

    #[test]
    fn test_worker_panic_reports_finished_without_result() {
        let mut worker: Worker<u32> = Worker::spawn("test-panic", || panic!("boom")).unwrap();

        let start = Instant::now();
        while !worker.is_finished() {
            assert!(worker.poll(Duration::from_millis(1)).is_none());
            assert!(start.elapsed() < Duration::from_secs(5));
        }
        assert!(worker.into_result().is_none());
    }
}
