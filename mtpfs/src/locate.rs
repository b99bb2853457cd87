//! Device discovery: exactly one attached device must match.

use libmtp::{DeviceBus, MtpDevice};
use tracing::{debug, info};

use crate::error::LocateError;
use crate::filter::{FilterPattern, filter};

/// Opens the single device whose descriptor matches `pattern`. Candidates
/// that are not selected are never opened.
pub fn locate(
    bus: &dyn DeviceBus,
    pattern: &FilterPattern,
) -> Result<Box<dyn MtpDevice>, LocateError> {
    let candidates = bus.candidates().map_err(LocateError::EnumerationFailed)?;
    for c in &candidates {
        debug!("candidate device: {}", c.descriptor());
    }

    let mut matched = filter(candidates, pattern, |c| c.descriptor());
    let candidate = match matched.len() {
        0 => {
            return Err(LocateError::NoDeviceFound {
                pattern: pattern.as_str().to_string(),
            });
        }
        1 => matched.remove(0),
        _ => {
            return Err(LocateError::MultipleDevicesMatched {
                candidates: matched.iter().map(|c| c.descriptor().to_string()).collect(),
            });
        }
    };

    let descriptor = candidate.descriptor().to_string();
    info!("using device {descriptor}");
    candidate
        .open()
        .map_err(|source| LocateError::OpenFailed { descriptor, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use libmtp::mock::{MockBus, MockDevice};

    fn bus() -> MockBus {
        MockBus::new(vec![
            MockDevice::new("Google Pixel 7 1A2B"),
            MockDevice::new("SanDisk Sansa Clip 99"),
        ])
    }

    #[test]
    fn empty_pattern_needs_a_single_device() {
        let one = MockBus::new(vec![MockDevice::new("Google Pixel 7 1A2B")]);
        let dev = locate(&one, &FilterPattern::default()).unwrap();
        assert_eq!(dev.descriptor(), "Google Pixel 7 1A2B");

        let err = locate(&bus(), &FilterPattern::default()).err().unwrap();
        match err {
            LocateError::MultipleDevicesMatched { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pattern_selects_and_opens_only_the_match() {
        let bus = bus();
        let dev = locate(&bus, &FilterPattern::new("Sansa").unwrap()).unwrap();
        assert_eq!(dev.descriptor(), "SanDisk Sansa Clip 99");
        assert_eq!(bus.opened(), vec!["SanDisk Sansa Clip 99".to_string()]);
    }

    #[test]
    fn nothing_attached() {
        let err = locate(&MockBus::new(vec![]), &FilterPattern::default()).err().unwrap();
        assert!(matches!(err, LocateError::NoDeviceFound { .. }));
        let err = locate(&bus(), &FilterPattern::new("iPhone").unwrap()).err().unwrap();
        assert!(matches!(err, LocateError::NoDeviceFound { .. }));
    }

    #[test]
    fn enumeration_and_open_failures() {
        let err = locate(&MockBus::failing(), &FilterPattern::default()).err().unwrap();
        assert!(matches!(err, LocateError::EnumerationFailed(_)));

        let bus = MockBus::new(vec![MockDevice::new("Locked Phone").failing_open()]);
        let err = locate(&bus, &FilterPattern::default()).err().unwrap();
        assert!(matches!(err, LocateError::OpenFailed { .. }));
        assert!(bus.opened().is_empty());
    }
}
