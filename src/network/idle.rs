use std::time::Duration;

use tokio::time::Instant;

use crate::pipeline::IdleEvent;
use crate::service::EndpointConfig;

/// Idle-timeout policy for one endpoint: three independent timers, each in
/// seconds, 0 = disabled. Reader-idle expiry reclaims the connection;
/// writer-idle and all-idle are surfaced to the chain as events only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdlePolicy {
    pub reader: Option<Duration>,
    pub writer: Option<Duration>,
    pub all: Option<Duration>,
}

impl IdlePolicy {
    pub fn from_config(config: &EndpointConfig) -> Self {
        let secs = |v: i64| (v > 0).then(|| Duration::from_secs(v as u64));
        IdlePolicy {
            reader: secs(config.reader_idle_time_seconds),
            writer: secs(config.writer_idle_time_seconds),
            all: secs(config.all_idle_time_seconds),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.reader.is_none() && self.writer.is_none() && self.all.is_none()
    }
}

/// Tracks per-connection activity and computes the next idle deadline.
/// After an event fires its baseline resets to now, so a persistently idle
/// peer keeps producing writer/all events once per period.
#[derive(Debug)]
pub(crate) struct IdleTimers {
    policy: IdlePolicy,
    reader_base: Instant,
    writer_base: Instant,
    all_base: Instant,
}

impl IdleTimers {
    pub(crate) fn new(policy: IdlePolicy, now: Instant) -> Self {
        IdleTimers {
            policy,
            reader_base: now,
            writer_base: now,
            all_base: now,
        }
    }

    pub(crate) fn on_read(&mut self, now: Instant) {
        self.reader_base = now;
        self.all_base = now;
    }

    pub(crate) fn on_write(&mut self, now: Instant) {
        self.writer_base = now;
        self.all_base = now;
    }

    pub(crate) fn fired(&mut self, event: IdleEvent, now: Instant) {
        match event {
            IdleEvent::ReaderIdle => self.reader_base = now,
            IdleEvent::WriterIdle => self.writer_base = now,
            IdleEvent::AllIdle => self.all_base = now,
        }
    }

    /// Earliest pending deadline among the enabled timers. Reader-idle wins
    /// ties so an abandoned client is reclaimed rather than merely observed.
    pub(crate) fn next_deadline(&self) -> Option<(Instant, IdleEvent)> {
        let mut next: Option<(Instant, IdleEvent)> = None;
        let candidates = [
            (self.policy.reader, self.reader_base, IdleEvent::ReaderIdle),
            (self.policy.all, self.all_base, IdleEvent::AllIdle),
            (self.policy.writer, self.writer_base, IdleEvent::WriterIdle),
        ];
        for (timeout, base, event) in candidates {
            if let Some(timeout) = timeout {
                let at = base + timeout;
                if next.map_or(true, |(current, _)| at < current) {
                    next = Some((at, event));
                }
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(reader: i64, writer: i64, all: i64) -> EndpointConfig {
        EndpointConfig {
            name: "t".to_string(),
            port: 9000,
            boss_count: 0,
            worker_count: 0,
            reader_idle_time_seconds: reader,
            writer_idle_time_seconds: writer,
            all_idle_time_seconds: all,
            handler_name: "H".to_string(),
            keep_alive: true,
            backlog: 10,
            tcp_no_delay: true,
            decoder_name: None,
            encoder_name: None,
            use_native_transport: true,
        }
    }

    #[test]
    fn zero_disables_each_timer() {
        let policy = IdlePolicy::from_config(&endpoint(0, 0, 0));
        assert!(policy.is_disabled());
        let timers = IdleTimers::new(policy, Instant::now());
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn reader_wins_tie_with_all() {
        let policy = IdlePolicy::from_config(&endpoint(5, 0, 5));
        let now = Instant::now();
        let timers = IdleTimers::new(policy, now);
        let (at, event) = timers.next_deadline().unwrap();
        assert_eq!(at, now + Duration::from_secs(5));
        assert_eq!(event, IdleEvent::ReaderIdle);
    }

    #[test]
    fn read_activity_pushes_reader_deadline() {
        let policy = IdlePolicy::from_config(&endpoint(5, 3, 0));
        let now = Instant::now();
        let mut timers = IdleTimers::new(policy, now);

        // writer timer is the nearest until a write happens
        let (at, event) = timers.next_deadline().unwrap();
        assert_eq!(event, IdleEvent::WriterIdle);
        assert_eq!(at, now + Duration::from_secs(3));

        let later = now + Duration::from_secs(2);
        timers.on_read(later);
        let (at, event) = timers.next_deadline().unwrap();
        assert_eq!(event, IdleEvent::WriterIdle);
        assert_eq!(at, now + Duration::from_secs(3));

        timers.on_write(later);
        let (_, event) = timers.next_deadline().unwrap();
        assert_eq!(event, IdleEvent::WriterIdle);
    }

    #[test]
    fn fired_rearms_only_that_timer() {
        let policy = IdlePolicy::from_config(&endpoint(0, 2, 4));
        let now = Instant::now();
        let mut timers = IdleTimers::new(policy, now);

        let fire_at = now + Duration::from_secs(2);
        let (at, event) = timers.next_deadline().unwrap();
        assert_eq!((at, event), (fire_at, IdleEvent::WriterIdle));

        timers.fired(IdleEvent::WriterIdle, fire_at);
        let (at, event) = timers.next_deadline().unwrap();
        // all-idle is now nearest; writer re-armed from its firing time
        assert_eq!((at, event), (now + Duration::from_secs(4), IdleEvent::AllIdle));
    }
}
