//! Time bounds of procedures

use serde::{Deserialize, Serialize};
use tsq_ir::{QueryTime, Time};

/// Interval of time a procedure reads. Either endpoint may be unset (zero).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundsSpec {
    pub start: QueryTime,
    pub stop: QueryTime,
}

impl BoundsSpec {
    pub fn new(start: QueryTime, stop: QueryTime) -> Self {
        Self { start, stop }
    }

    pub fn is_zero(&self) -> bool {
        self.start.is_zero() && self.stop.is_zero()
    }

    /// Smallest interval covering both bounds, evaluated against one `now`.
    pub fn union(&self, o: &BoundsSpec, now: Time) -> BoundsSpec {
        let mut u = *self;
        if u.start.is_zero() || (!o.start.is_zero() && o.start.time(now) < self.start.time(now)) {
            u.start = o.start;
        }
        // The stop is compared only when the other start is set, matching how unset
        // stops are read as "now".
        if u.stop.is_zero() || (!o.start.is_zero() && o.stop.time(now) > self.stop.time(now)) {
            u.stop = o.stop;
        }
        u
    }

    /// Overlap of both bounds. An unset stop with a set start means "now". When the
    /// bounds do not overlap the result falls back to `self`.
    pub fn intersect(&self, o: &BoundsSpec, now: Time) -> BoundsSpec {
        let self_stop = effective_stop(self);
        let o_stop = effective_stop(o);

        let start = if (self.start.is_zero() || o.start.time(now) > self.start.time(now))
            && o.start.time(now) < self_stop.time(now)
        {
            o.start
        } else {
            self.start
        };

        let stop = if o_stop.time(now) < self_stop.time(now)
            && o.stop.time(now) > self.start.time(now)
        {
            o.stop
        } else {
            self.stop
        };

        BoundsSpec { start, stop }
    }
}

fn effective_stop(b: &BoundsSpec) -> QueryTime {
    if !b.start.is_zero() && b.stop.is_zero() {
        QueryTime::NOW
    } else {
        b.stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsq_ir::Duration;

    fn rel(mins: i64) -> QueryTime {
        QueryTime::relative(Duration::from_mins(mins))
    }

    fn start(mins: i64) -> BoundsSpec {
        BoundsSpec::new(rel(mins), QueryTime::default())
    }

    fn stop(mins: i64) -> BoundsSpec {
        BoundsSpec::new(QueryTime::default(), rel(mins))
    }

    fn span(from: i64, to: i64) -> BoundsSpec {
        BoundsSpec::new(rel(from), rel(to))
    }

    struct Case {
        name: &'static str,
        a: BoundsSpec,
        b: BoundsSpec,
        want_ab: BoundsSpec,
        want_ba: BoundsSpec,
    }

    #[test]
    fn test_intersect() {
        let cases = [
            Case {
                name: "contained",
                a: start(-60),
                b: start(-30),
                want_ab: start(-30),
                want_ba: start(-30),
            },
            Case {
                name: "no overlap",
                a: start(-60),
                b: span(-180, -120),
                want_ab: start(-60),
                // Without overlap the receiver is returned unchanged.
                want_ba: span(-180, -120),
            },
            Case {
                name: "overlap",
                a: start(-60),
                b: span(-120, -30),
                want_ab: span(-60, -30),
                want_ba: span(-60, -30),
            },
            Case {
                name: "both start zero",
                a: stop(-60),
                b: stop(-20),
                want_ab: stop(-60),
                want_ba: stop(-60),
            },
        ];
        let now = Time::now();
        for c in cases {
            assert_eq!(c.a.intersect(&c.b, now), c.want_ab, "{} (a, b)", c.name);
            assert_eq!(c.b.intersect(&c.a, now), c.want_ba, "{} (b, a)", c.name);
        }
    }

    #[test]
    fn test_union() {
        let now = Time::now();
        assert_eq!(start(-60).union(&start(-30), now), start(-60));
        assert_eq!(span(-120, -30).union(&span(-60, -10), now), span(-120, -10));
        assert_eq!(BoundsSpec::default().union(&span(-60, -10), now), span(-60, -10));
        assert!(BoundsSpec::default().is_zero());
    }
}
