//! Gapless scheduling of inbound agent audio on the output clock.

/// Mild boost compensating for the decoded loudness of agent speech.
pub const PLAYBACK_GAIN: f32 = 1.2;

/// One decoded payload bound to a start offset on the output timeline.
#[derive(Debug)]
struct PlaybackUnit {
    /// Absolute start, in samples since the output stream began.
    start: u64,
    samples: Vec<f32>,
}

impl PlaybackUnit {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Schedules decoded payloads back-to-back on a monotonic sample clock.
///
/// The clock is the number of samples the output stream has rendered since
/// the call started. Invariant: unit start offsets are non-decreasing and
/// units never overlap; each one starts at or after the end of the previous
/// unit, and never in the past.
pub struct PlaybackScheduler {
    clock: u64,
    next_start: u64,
    live: Vec<PlaybackUnit>,
    gain: f32,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self {
            clock: 0,
            next_start: 0,
            live: Vec::new(),
            gain: PLAYBACK_GAIN,
        }
    }

    /// Schedule a decoded payload after the current tail. Returns the chosen
    /// start offset.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> u64 {
        // Catch up: never schedule in the past.
        if self.next_start < self.clock {
            self.next_start = self.clock;
        }
        let start = self.next_start;
        if samples.is_empty() {
            return start;
        }
        self.next_start = start + samples.len() as u64;
        self.live.push(PlaybackUnit { start, samples });
        start
    }

    /// Barge-in: force-stop every live unit and rewind the cursor. The next
    /// enqueue catches up to the clock, so playback resumes exactly at
    /// "now" rather than at a stale future offset.
    pub fn flush(&mut self) {
        self.live.clear();
        self.next_start = 0;
    }

    /// Mix scheduled units into `out` and advance the clock by `out.len()`.
    /// Regions with no scheduled audio render as silence; units that end
    /// behind the clock leave the live set (natural completion).
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let begin = self.clock;
        let end = begin + out.len() as u64;

        for unit in &self.live {
            let from = unit.start.max(begin);
            let to = unit.end().min(end);
            for t in from..to {
                let src = (t - unit.start) as usize;
                let dst = (t - begin) as usize;
                out[dst] += unit.samples[src] * self.gain;
            }
        }
        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        self.clock = end;
        let clock = self.clock;
        self.live.retain(|u| u.end() > clock);
    }

    /// Samples rendered so far.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    pub fn live_units(&self) -> usize {
        self.live.len()
    }

    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: usize = 24_000;

    fn advance(sched: &mut PlaybackScheduler, samples: usize) {
        let mut sink = vec![0.0f32; samples];
        sched.render(&mut sink);
    }

    #[test]
    fn sequential_payloads_never_overlap() {
        let mut sched = PlaybackScheduler::new();
        let mut prev_end = 0u64;
        for _ in 0..5 {
            let start = sched.enqueue(vec![0.1; 100]);
            assert!(start >= prev_end);
            assert!(start >= sched.clock());
            prev_end = start + 100;
        }
    }

    #[test]
    fn catch_up_when_cursor_falls_behind() {
        let mut sched = PlaybackScheduler::new();
        sched.enqueue(vec![0.1; 10]);
        advance(&mut sched, 50);
        // Cursor (10) is behind the clock (50); next unit starts at "now".
        assert_eq!(sched.enqueue(vec![0.1; 10]), 50);
    }

    #[test]
    fn spec_arrival_scenario() {
        // Three 1.0 s payloads arriving at t = 0, 0.2, 0.9 schedule at
        // t = 0, 1.0, 2.0.
        let mut sched = PlaybackScheduler::new();

        let s1 = sched.enqueue(vec![0.1; RATE]);
        assert_eq!(s1, 0);

        advance(&mut sched, RATE / 5); // t = 0.2
        let s2 = sched.enqueue(vec![0.1; RATE]);
        assert_eq!(s2, RATE as u64);

        advance(&mut sched, (RATE * 7) / 10); // t = 0.9
        let s3 = sched.enqueue(vec![0.1; RATE]);
        assert_eq!(s3, 2 * RATE as u64);
    }

    #[test]
    fn interrupt_clears_live_set_and_resets_cursor() {
        let mut sched = PlaybackScheduler::new();
        sched.enqueue(vec![0.1; RATE]);
        sched.enqueue(vec![0.1; RATE]);
        sched.enqueue(vec![0.1; RATE]);
        advance(&mut sched, RATE / 5);
        assert!(sched.live_units() > 0);

        // Interrupt at t = 2.5.
        advance(&mut sched, (RATE * 23) / 10);
        sched.flush();
        assert_eq!(sched.live_units(), 0);
        assert_eq!(sched.next_start(), 0);

        // The next payload starts at the clock value at arrival, not at a
        // stale future offset.
        let clock_at_arrival = sched.clock();
        let start = sched.enqueue(vec![0.1; 100]);
        assert_eq!(start, clock_at_arrival);
    }

    #[test]
    fn render_applies_gain() {
        let mut sched = PlaybackScheduler::new();
        sched.enqueue(vec![0.5; 4]);
        let mut out = vec![0.0f32; 4];
        sched.render(&mut out);
        for &s in &out {
            assert!((s - 0.6).abs() < 1e-6);
        }
    }

    #[test]
    fn render_clamps_boosted_peaks() {
        let mut sched = PlaybackScheduler::new();
        sched.enqueue(vec![1.0; 4]);
        let mut out = vec![0.0f32; 4];
        sched.render(&mut out);
        for &s in &out {
            assert_eq!(s, 1.0);
        }
    }

    #[test]
    fn silence_between_payloads() {
        let mut sched = PlaybackScheduler::new();
        advance(&mut sched, 100);
        let start = sched.enqueue(vec![0.5; 10]);
        assert_eq!(start, 100);

        // Nothing scheduled before the unit's start: render stays silent
        // until the unit begins.
        let mut out = vec![0.7f32; 10];
        // Move clock to just before the unit (it starts at 100, clock is
        // already 100, so this renders the unit immediately).
        sched.render(&mut out);
        assert!((out[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn units_leave_live_set_on_completion() {
        let mut sched = PlaybackScheduler::new();
        sched.enqueue(vec![0.1; 32]);
        assert_eq!(sched.live_units(), 1);
        advance(&mut sched, 32);
        assert_eq!(sched.live_units(), 0);
        assert!(sched.is_idle());
    }

    #[test]
    fn empty_payload_does_not_advance_cursor() {
        let mut sched = PlaybackScheduler::new();
        let start = sched.enqueue(Vec::new());
        assert_eq!(start, 0);
        assert_eq!(sched.next_start(), 0);
        assert_eq!(sched.live_units(), 0);
    }
}
