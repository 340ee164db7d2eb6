use std::time::Duration;

use crate::entropy::EntropyPool;

// In seconds.
const JITTER_RANGE: f32 = 0.5;

/// Retry pacing for handshake steps stalled on a non-blocking transport.
///
/// Starts at the configured minimum handshake timeout and doubles with a
/// ±0.25s jitter until the maximum is reached; one attempt at the maximum is
/// allowed before the backoff reports exhaustion.
pub(crate) struct ExponentialBackoff {
    start_rto: Duration,
    max_rto: Duration,
    rto: Duration,
    jitter: f32,
    exhausted: bool,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, max_rto: Duration, pool: &EntropyPool) -> Self {
        Self {
            start_rto,
            max_rto,
            rto: start_rto,
            jitter: Self::jitter(pool),
            exhausted: false,
        }
    }

    pub fn reset(&mut self, pool: &EntropyPool) {
        self.rto = self.start_rto;
        self.jitter = Self::jitter(pool);
        self.exhausted = false;
    }

    pub fn rto(&self) -> Duration {
        if self.jitter < 0.0 {
            let duration = Duration::from_secs_f32(self.jitter.abs());
            self.rto.saturating_sub(duration)
        } else {
            self.rto + Duration::from_secs_f32(self.jitter)
        }
        .max(Duration::from_millis(50))
        .min(self.max_rto)
    }

    // A value between -0.25s and 0.25s
    fn jitter(pool: &EntropyPool) -> f32 {
        pool.random::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    pub fn attempt(&mut self, pool: &EntropyPool) {
        if self.rto >= self.max_rto {
            self.exhausted = true;
            return;
        }
        self.jitter = Self::jitter(pool);
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    pub fn can_retry(&self) -> bool {
        !self.exhausted
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn attempts() {
        let pool = EntropyPool::new(Some(42));
        let mut exp =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(16), &pool);

        let n1 = exp.rto().as_millis();
        assert_eq!(exp.rto().as_millis(), n1);

        exp.attempt(&pool);
        let n2 = exp.rto().as_millis();
        assert!(n2 > n1);
        assert!(exp.can_retry());

        exp.attempt(&pool);
        let n3 = exp.rto().as_millis();
        assert!(n3 > n2);

        exp.attempt(&pool);
        exp.attempt(&pool);
        // Now at the maximum, jitter aside.
        assert!(exp.rto() >= Duration::from_millis(15_750));
        assert!(exp.rto() <= Duration::from_secs(16));
        assert!(exp.can_retry());

        exp.attempt(&pool);
        assert!(!exp.can_retry());
    }

    #[test]
    fn reset_restores_the_start_rto() {
        let pool = EntropyPool::new(Some(1));
        let mut exp =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(4), &pool);

        exp.attempt(&pool);
        exp.attempt(&pool);
        exp.attempt(&pool);
        assert!(!exp.can_retry());

        exp.reset(&pool);
        assert!(exp.can_retry());
        assert!(exp.rto() <= Duration::from_millis(1250));
    }
}
