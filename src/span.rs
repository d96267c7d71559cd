use serde::{Deserialize, Serialize};

use crate::db::{CatalogError, Result};

/// The audible part of a file that a track covers, in seconds.
///
/// Either bound may be absent: a missing start means the beginning of the
/// file, a missing end means its end. When both are present the span is the
/// half-open interval `[start, end)`. All validation lives in [`Span::new`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SpanBounds")]
pub struct Span {
    start: Option<f64>,
    end: Option<f64>,
}

#[derive(Deserialize)]
struct SpanBounds {
    start: Option<f64>,
    end: Option<f64>,
}

impl TryFrom<SpanBounds> for Span {
    type Error = CatalogError;

    fn try_from(b: SpanBounds) -> Result<Self> {
        Span::new(b.start, b.end)
    }
}

impl Span {
    pub fn new(start: Option<f64>, end: Option<f64>) -> Result<Self> {
        for (name, bound) in [("start", start), ("end", end)] {
            if let Some(v) = bound {
                if !v.is_finite() {
                    return Err(CatalogError::InvalidSpan(format!("{name} is not a finite number")));
                }
                if v < 0.0 {
                    return Err(CatalogError::InvalidSpan(format!("{name} {v} is negative")));
                }
            }
        }
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Err(CatalogError::InvalidSpan(format!(
                    "start {s} is not before end {e}"
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// The whole file.
    pub fn whole() -> Self {
        Self::default()
    }

    pub fn between(start: f64, end: f64) -> Result<Self> {
        Self::new(Some(start), Some(end))
    }

    /// Rebuild a span from stored columns, which the schema already constrains.
    pub(crate) fn from_columns(start: Option<f64>, end: Option<f64>) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> Option<f64> {
        self.start
    }

    pub fn end(&self) -> Option<f64> {
        self.end
    }

    pub fn is_whole(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Check the span fits a file of `duration` seconds. Never clamps.
    pub fn check_within(&self, duration: f64) -> Result<()> {
        if let Some(e) = self.end {
            if e > duration {
                return Err(CatalogError::InvalidSpan(format!(
                    "end {e} exceeds file duration {duration}"
                )));
            }
        } else if let Some(s) = self.start {
            if s >= duration {
                return Err(CatalogError::InvalidSpan(format!(
                    "start {s} is at or past file duration {duration}"
                )));
            }
        }
        Ok(())
    }

    /// Concrete `[start, end)` bounds within a file of `duration` seconds.
    pub fn resolve(&self, duration: f64) -> (f64, f64) {
        (self.start.unwrap_or(0.0), self.end.unwrap_or(duration))
    }

    pub fn overlaps(&self, other: &Span, duration: f64) -> bool {
        let (a_start, a_end) = self.resolve(duration);
        let (b_start, b_end) = other.resolve(duration);
        a_start < b_end && b_start < a_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_must_precede_end() {
        assert!(Span::between(0.0, 1800.0).is_ok());
        assert!(matches!(
            Span::between(10.0, 10.0),
            Err(CatalogError::InvalidSpan(_))
        ));
        assert!(matches!(
            Span::between(20.0, 10.0),
            Err(CatalogError::InvalidSpan(_))
        ));
    }

    #[test]
    fn negative_and_non_finite_bounds_rejected() {
        assert!(Span::new(Some(-1.0), None).is_err());
        assert!(Span::new(None, Some(-0.5)).is_err());
        assert!(Span::new(Some(f64::NAN), None).is_err());
        assert!(Span::new(None, Some(f64::INFINITY)).is_err());
    }

    #[test]
    fn open_ended_spans_are_valid() {
        let s = Span::new(Some(30.0), None).unwrap();
        assert_eq!(s.resolve(100.0), (30.0, 100.0));
        let e = Span::new(None, Some(30.0)).unwrap();
        assert_eq!(e.resolve(100.0), (0.0, 30.0));
        assert!(Span::whole().is_whole());
    }

    #[test]
    fn end_beyond_duration_is_never_clamped() {
        let s = Span::between(0.0, 3600.5).unwrap();
        assert!(matches!(
            s.check_within(3600.0),
            Err(CatalogError::InvalidSpan(_))
        ));
        assert!(Span::between(1800.0, 3600.0).unwrap().check_within(3600.0).is_ok());
    }

    #[test]
    fn open_start_at_duration_has_no_audio() {
        let s = Span::new(Some(3600.0), None).unwrap();
        assert!(s.check_within(3600.0).is_err());
        assert!(Span::whole().check_within(0.0).is_ok());
    }

    #[test]
    fn adjacent_spans_do_not_overlap() {
        let a = Span::between(0.0, 1800.0).unwrap();
        let b = Span::between(1800.0, 3600.0).unwrap();
        assert!(!a.overlaps(&b, 3600.0));
        let c = Span::between(1700.0, 1900.0).unwrap();
        assert!(a.overlaps(&c, 3600.0));
        assert!(Span::whole().overlaps(&b, 3600.0));
    }

    #[test]
    fn deserializing_validates() {
        let ok: Span = serde_json::from_str(r#"{"start":1.0,"end":2.0}"#).unwrap();
        assert_eq!(ok, Span::between(1.0, 2.0).unwrap());
        assert!(serde_json::from_str::<Span>(r#"{"start":2.0,"end":1.0}"#).is_err());
    }
}
