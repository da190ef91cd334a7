use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const MAX_TRACKED_CONTACTS: usize = 10_000;

/// Sliding-window cap on how many codes may be mailed to one contact.
#[derive(Clone)]
pub struct SendThrottle {
    sends: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    limit: u32,
}

impl SendThrottle {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            sends: Arc::new(Mutex::new(HashMap::new())),
            window,
            limit,
        }
    }

    /// Records a send for `contact`, or returns how long until the oldest one ages out.
    /// A limit of zero disables throttling.
    pub fn try_acquire(&self, contact: &str) -> Result<(), Duration> {
        if self.limit == 0 {
            return Ok(());
        }

        let key = contact.trim().to_ascii_lowercase();
        let now = Instant::now();
        let mut sends = self.lock();

        let history = sends.entry(key).or_default();
        forget_before(history, now, self.window);
        if history.len() >= self.limit as usize {
            let retry_after = history
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }
        history.push_back(now);

        if sends.len() > MAX_TRACKED_CONTACTS {
            sends.retain(|_, history| {
                forget_before(history, now, self.window);
                !history.is_empty()
            });
        }

        Ok(())
    }

    /// Gives back the most recent send for `contact` when the mail never went out.
    pub fn release(&self, contact: &str) {
        let key = contact.trim().to_ascii_lowercase();
        let mut sends = self.lock();
        if let Some(history) = sends.get_mut(&key) {
            history.pop_back();
            if history.is_empty() {
                sends.remove(&key);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        match self.sends.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn forget_before(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(sent_at) = history.front() {
        if now.duration_since(*sent_at) >= window {
            history.pop_front();
        } else {
            break;
        }
    }
}
