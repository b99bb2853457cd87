use libmtp::{MtpDevice, MtpError};
use tracing::info;

use crate::config::SessionSettings;

/// Applies `settings` and runs the session handshake. The timeout and debug
/// flags are in effect for the handshake itself.
pub fn configure(device: &mut dyn MtpDevice, settings: &SessionSettings) -> Result<(), MtpError> {
    device.set_timeout(settings.timeout);
    device.set_debug(settings.debug_flags());
    device.configure()?;

    if let Some(info) = device.device_info() {
        info!(
            "session open: {} {} (firmware {}, extensions \"{}\")",
            info.manufacturer, info.model, info.device_version, info.mtp_extension
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libmtp::DebugFlags;
    use libmtp::mock::MockDevice;
    use std::time::Duration;

    #[test]
    fn settings_are_applied_before_the_handshake() {
        let mut dev = MockDevice::new("Mock Phone");
        let settings = SessionSettings {
            timeout: Duration::from_millis(300),
            mtp_debug: true,
            data_debug: true,
        };
        configure(&mut dev, &settings).unwrap();
        let stats = dev.stats();
        assert_eq!(stats.timeout, Some(Duration::from_millis(300)));
        assert_eq!(
            stats.debug,
            DebugFlags {
                mtp: true,
                data: true
            }
        );
        assert!(stats.session_open);
        assert_eq!(stats.configure_calls, 1);
    }

    #[test]
    fn handshake_failures_propagate() {
        let mut dev = MockDevice::new("Broken").failing_configure();
        assert!(configure(&mut dev, &SessionSettings::default()).is_err());
        // the timeout was still applied
        assert!(dev.stats().timeout.is_some());

        let mut camera = MockDevice::new("Camera").ptp_only();
        assert!(matches!(
            configure(&mut camera, &SessionSettings::default()),
            Err(MtpError::Protocol(_))
        ));
    }
}
