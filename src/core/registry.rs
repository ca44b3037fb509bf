//! Per-class whitelist of sanitization methods.
//!
//! NIST SP 800-88r1 categories: Clear protects against keyboard
//! attack, Purge against laboratory attack. The table is fixed; the
//! engine refuses any (class, method) pair not listed here.

use crate::core::inventory::DeviceClass;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MethodCategory {
    Clear,
    Purge,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeMethod {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: MethodCategory,
}

pub const NVME_FORMAT: &str = "nvme_format";
pub const SATA_SECURE_ERASE: &str = "sata_secure_erase";
pub const OVERWRITE_1_PASS: &str = "overwrite_1_pass";
pub const OVERWRITE_2_PASS: &str = "overwrite_2_pass";
pub const OVERWRITE_3_PASS: &str = "overwrite_3_pass";
pub const ANDROID_FACTORY_RESET: &str = "android_factory_reset";

const METHODS: &[WipeMethod] = &[
    WipeMethod {
        id: NVME_FORMAT,
        name: "Purge: NVMe Format",
        description: "Uses the drive's built-in, high-speed firmware command (NVM Express Format).",
        category: MethodCategory::Purge,
    },
    WipeMethod {
        id: SATA_SECURE_ERASE,
        name: "Purge: ATA Secure Erase",
        description: "Uses the drive's built-in firmware command to reset all memory cells.",
        category: MethodCategory::Purge,
    },
    WipeMethod {
        id: OVERWRITE_1_PASS,
        name: "Clear: 1-Pass Overwrite",
        description: "A single pass of a fixed pattern, per NIST SP 800-88r1 guidelines.",
        category: MethodCategory::Clear,
    },
    WipeMethod {
        id: OVERWRITE_2_PASS,
        name: "Clear: 2-Pass Overwrite",
        description: "A pattern and its complement, per NIST guidelines for USB/removable media.",
        category: MethodCategory::Clear,
    },
    WipeMethod {
        id: OVERWRITE_3_PASS,
        name: "Purge: 3-Pass Overwrite",
        description: "Three passes of fixed patterns, an optional NIST Purge method.",
        category: MethodCategory::Purge,
    },
    WipeMethod {
        id: ANDROID_FACTORY_RESET,
        name: "Clear: Factory Reset",
        description: "Initiates the device's built-in factory data reset, as per NIST guidelines.",
        category: MethodCategory::Clear,
    },
];

fn method(id: &str) -> WipeMethod {
    METHODS
        .iter()
        .find(|m| m.id == id)
        .cloned()
        .expect("method id must exist in the static table")
}

/// Methods permitted for a storage device class.
///
/// Overwrite on flash media is advisory only: wear-leveling and
/// over-provisioning leave cells a lab could recover.
pub fn methods_for_class(class: DeviceClass) -> Vec<WipeMethod> {
    match class {
        DeviceClass::Nvme => vec![method(NVME_FORMAT), method(OVERWRITE_1_PASS)],
        DeviceClass::SataSsd => vec![method(SATA_SECURE_ERASE), method(OVERWRITE_1_PASS)],
        DeviceClass::Hdd => vec![method(OVERWRITE_1_PASS), method(OVERWRITE_3_PASS)],
        DeviceClass::Usb | DeviceClass::Other => vec![method(OVERWRITE_2_PASS)],
        DeviceClass::MobileAndroid => vec![method(ANDROID_FACTORY_RESET)],
    }
}

pub fn is_permitted(class: DeviceClass, method_id: &str) -> bool {
    methods_for_class(class).iter().any(|m| m.id == method_id)
}

pub fn display_name(method_id: &str) -> Option<&'static str> {
    METHODS.iter().find(|m| m.id == method_id).map(|m| m.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdd_gets_overwrite_methods_only() {
        let ids: Vec<_> = methods_for_class(DeviceClass::Hdd)
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![OVERWRITE_1_PASS, OVERWRITE_3_PASS]);
    }

    #[test]
    fn firmware_purge_is_class_specific() {
        assert!(is_permitted(DeviceClass::Nvme, NVME_FORMAT));
        assert!(!is_permitted(DeviceClass::SataSsd, NVME_FORMAT));
        assert!(is_permitted(DeviceClass::SataSsd, SATA_SECURE_ERASE));
        assert!(!is_permitted(DeviceClass::Hdd, SATA_SECURE_ERASE));
    }

    #[test]
    fn removable_media_gets_two_pass_clear() {
        for class in [DeviceClass::Usb, DeviceClass::Other] {
            let methods = methods_for_class(class);
            assert_eq!(methods.len(), 1);
            assert_eq!(methods[0].id, OVERWRITE_2_PASS);
            assert_eq!(methods[0].category, MethodCategory::Clear);
        }
    }

    #[test]
    fn android_gets_factory_reset_only() {
        let methods = methods_for_class(DeviceClass::MobileAndroid);
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].id, ANDROID_FACTORY_RESET);
    }

    #[test]
    fn display_names_resolve() {
        assert_eq!(display_name(NVME_FORMAT), Some("Purge: NVMe Format"));
        assert_eq!(display_name("bogus"), None);
    }
}
