//! Android extension probing.
//!
//! An extension starts out usable when the device advertises all of its
//! operations. The first "unsupported" answer turns it off for the rest of the
//! mount, and callers fall back to the baseline operations.

use std::sync::atomic::{AtomicU8, Ordering};

use libmtp::DeviceInfo;
use libmtp::codes::op;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// Directory listing with one GetObjectPropList.
    PropList,
    /// GetPartialObject64.
    Partial64,
    /// BeginEditObject / SendPartialObject / TruncateObject / EndEditObject.
    Edit,
}

impl Extension {
    const ALL: [Extension; 3] = [Extension::PropList, Extension::Partial64, Extension::Edit];

    fn operations(self) -> &'static [u16] {
        match self {
            Extension::PropList => &[op::GET_OBJECT_PROP_LIST],
            Extension::Partial64 => &[op::GET_PARTIAL_OBJECT_64],
            Extension::Edit => &[
                op::BEGIN_EDIT_OBJECT,
                op::SEND_PARTIAL_OBJECT,
                op::TRUNCATE_OBJECT,
                op::END_EDIT_OBJECT,
            ],
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

const UNSUPPORTED: u8 = 0;
const UNTRIED: u8 = 1;
const CONFIRMED: u8 = 2;

#[derive(Debug)]
pub struct Capabilities {
    state: [AtomicU8; 3],
}

impl Capabilities {
    pub fn none() -> Self {
        Self {
            state: [const { AtomicU8::new(UNSUPPORTED) }; 3],
        }
    }

    /// Extensions advertised by `info`; all off when `enabled` is false.
    pub fn detect(info: Option<&DeviceInfo>, enabled: bool) -> Self {
        let caps = Self::none();
        let Some(info) = info.filter(|_| enabled) else {
            return caps;
        };
        for ext in Extension::ALL {
            if ext.operations().iter().all(|code| info.supports(*code)) {
                caps.state[ext.index()].store(UNTRIED, Ordering::Relaxed);
            }
        }
        info!(
            "android extensions: prop-list={} partial64={} edit={}",
            caps.usable(Extension::PropList),
            caps.usable(Extension::Partial64),
            caps.usable(Extension::Edit)
        );
        caps
    }

    pub fn usable(&self, ext: Extension) -> bool {
        self.state[ext.index()].load(Ordering::Relaxed) != UNSUPPORTED
    }

    pub fn confirmed(&self, ext: Extension) -> bool {
        self.state[ext.index()].load(Ordering::Relaxed) == CONFIRMED
    }

    pub fn confirm(&self, ext: Extension) {
        let _ = self.state[ext.index()].compare_exchange(
            UNTRIED,
            CONFIRMED,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    /// Turns `ext` off. Logged the first time only.
    pub fn reject(&self, ext: Extension) {
        if self.state[ext.index()].swap(UNSUPPORTED, Ordering::Relaxed) != UNSUPPORTED {
            info!("device rejected {ext:?}, falling back to baseline operations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(ops: &[u16]) -> DeviceInfo {
        DeviceInfo {
            operations_supported: ops.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn disabled_means_none() {
        let full = info(&[op::GET_OBJECT_PROP_LIST, op::GET_PARTIAL_OBJECT_64]);
        let caps = Capabilities::detect(Some(&full), false);
        assert!(!caps.usable(Extension::PropList));
        assert!(!caps.usable(Extension::Partial64));
    }

    #[test]
    fn edit_needs_every_operation() {
        let partial = info(&[op::BEGIN_EDIT_OBJECT, op::END_EDIT_OBJECT]);
        let caps = Capabilities::detect(Some(&partial), true);
        assert!(!caps.usable(Extension::Edit));
    }

    #[test]
    fn rejection_sticks() {
        let caps = Capabilities::detect(Some(&info(&[op::GET_PARTIAL_OBJECT_64])), true);
        assert!(caps.usable(Extension::Partial64));
        caps.confirm(Extension::Partial64);
        assert!(caps.confirmed(Extension::Partial64));
        caps.reject(Extension::Partial64);
        caps.confirm(Extension::Partial64);
        assert!(!caps.usable(Extension::Partial64));
    }
}
